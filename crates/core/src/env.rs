//! Configuration handed to a plugin by its host through environment variables

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::logging::Level;

pub const ENV_MAGIC_COOKIE: &str = "TF_PLUGIN_MAGIC_COOKIE";
pub const ENV_PROTOCOL_VERSIONS: &str = "PLUGIN_PROTOCOL_VERSIONS";
pub const ENV_MIN_PORT: &str = "PLUGIN_MIN_PORT";
pub const ENV_MAX_PORT: &str = "PLUGIN_MAX_PORT";
pub const ENV_UNIX_SOCKET_DIR: &str = "PLUGIN_UNIX_SOCKET_DIR";
pub const ENV_UNIX_SOCKET_GROUP: &str = "PLUGIN_UNIX_SOCKET_GROUP";
pub const ENV_CLIENT_CERT: &str = "PLUGIN_CLIENT_CERT";
pub const ENV_LOG_PROVIDER: &str = "TF_LOG_PROVIDER";
pub const ENV_LOG: &str = "TF_LOG";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PluginEnv {
    pub magic_cookie: Option<String>,
    /// Protocol versions the host is able to speak, in the order they were listed
    pub protocol_versions: Vec<u32>,
    /// Entries of the protocol version list that could not be parsed
    pub ignored_protocol_versions: Vec<String>,
    pub min_port: u16,
    pub max_port: u16,
    pub unix_socket_dir: Option<PathBuf>,
    pub unix_socket_group: Option<String>,
    /// PEM encoded certificate the host will present when mutual TLS is requested
    pub client_cert: Option<String>,
    pub log_level: Option<Level>,
}

impl PluginEnv {
    /// Load the plugin environment from the current process
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Load the plugin environment from an explicit set of variables
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let non_empty = |name: &str| vars.get(name).filter(|v| !v.is_empty()).cloned();

        let mut protocol_versions = Vec::new();
        let mut ignored_protocol_versions = Vec::new();
        if let Some(list) = non_empty(ENV_PROTOCOL_VERSIONS) {
            for version in list.split(',') {
                match version.trim().parse() {
                    Ok(v) => protocol_versions.push(v),
                    Err(_) => ignored_protocol_versions.push(version.to_string()),
                }
            }
        }

        let min_port = parse_port(ENV_MIN_PORT, non_empty(ENV_MIN_PORT))?;
        let max_port = parse_port(ENV_MAX_PORT, non_empty(ENV_MAX_PORT))?;
        if min_port > max_port {
            return Err(ConfigError::PortRange {
                min: min_port,
                max: max_port,
            });
        }

        let log_level = non_empty(ENV_LOG_PROVIDER)
            .or_else(|| non_empty(ENV_LOG))
            .and_then(|v| v.parse().ok());

        Ok(Self {
            magic_cookie: vars.get(ENV_MAGIC_COOKIE).cloned(),
            protocol_versions,
            ignored_protocol_versions,
            min_port,
            max_port,
            unix_socket_dir: non_empty(ENV_UNIX_SOCKET_DIR).map(PathBuf::from),
            unix_socket_group: non_empty(ENV_UNIX_SOCKET_GROUP),
            client_cert: non_empty(ENV_CLIENT_CERT),
            log_level,
        })
    }
}

fn parse_port(name: &'static str, value: Option<String>) -> Result<u16, ConfigError> {
    match value {
        None => Ok(0),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|source| ConfigError::InvalidPort {
                name,
                value,
                source,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_environment_uses_defaults() {
        let env = PluginEnv::from_vars(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(env, PluginEnv::default());
    }

    #[test]
    fn parses_host_variables() {
        let env = PluginEnv::from_vars([
            (ENV_MAGIC_COOKIE, "cookie"),
            (ENV_PROTOCOL_VERSIONS, "5,6,x"),
            (ENV_MIN_PORT, "10000"),
            (ENV_MAX_PORT, "25000"),
            (ENV_CLIENT_CERT, "-----BEGIN CERTIFICATE-----"),
            (ENV_LOG, "DEBUG"),
            (ENV_UNIX_SOCKET_DIR, ""),
        ])
        .unwrap();
        assert_eq!(env.magic_cookie.as_deref(), Some("cookie"));
        assert_eq!(env.protocol_versions, vec![5, 6]);
        assert_eq!(env.ignored_protocol_versions, vec!["x".to_string()]);
        assert_eq!((env.min_port, env.max_port), (10000, 25000));
        assert!(env.client_cert.is_some());
        assert_eq!(env.log_level, Some(Level::Debug));
        assert_eq!(env.unix_socket_dir, None);
    }

    #[test]
    fn provider_log_level_wins() {
        let env = PluginEnv::from_vars([(ENV_LOG, "TRACE"), (ENV_LOG_PROVIDER, "error")]).unwrap();
        assert_eq!(env.log_level, Some(Level::Error));
    }

    #[test]
    fn rejects_bad_port_ranges() {
        assert!(matches!(
            PluginEnv::from_vars([(ENV_MIN_PORT, "20"), (ENV_MAX_PORT, "10")]),
            Err(ConfigError::PortRange { min: 20, max: 10 })
        ));
        assert!(matches!(
            PluginEnv::from_vars([(ENV_MIN_PORT, "http")]),
            Err(ConfigError::InvalidPort { .. })
        ));
    }
}
