//! Log levels as selected by the host through `TF_LOG_PROVIDER` or `TF_LOG`

use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
    /// Logging explicitly disabled
    Off,
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            // the host uses JSON to request raw trace output
            "trace" | "json" => Ok(Self::Trace),
            "off" => Ok(Self::Off),
            _ => Err(format!("unknown log level: {s}")),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::INFO => Self::Info,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::TRACE => Self::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_levels() {
        assert_eq!("TRACE".parse::<Level>(), Ok(Level::Trace));
        assert_eq!("JSON".parse::<Level>(), Ok(Level::Trace));
        assert_eq!("Warn".parse::<Level>(), Ok(Level::Warn));
        assert_eq!("off".parse::<Level>(), Ok(Level::Off));
        assert!("verbose".parse::<Level>().is_err());
    }
}
