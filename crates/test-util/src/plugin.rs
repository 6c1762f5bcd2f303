//! Provider plugin process management utilities for use during testing

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{bail, ensure, Context as _, Result};
use tfplugin_core::env::{
    ENV_LOG, ENV_MAGIC_COOKIE, ENV_PROTOCOL_VERSIONS, ENV_UNIX_SOCKET_DIR,
};
use tfplugin_sdk::handshake::{Handshake, MAGIC_COOKIE_VALUE};
use tfplugin_sdk::proto::plugin::grpc_controller_client::GrpcControllerClient;
use tfplugin_sdk::proto::plugin::Empty;
use tfplugin_sdk::proto::tfplugin6::provider_client::ProviderClient;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tonic::transport::{Channel, Endpoint, Uri};
use tracing::{debug, info};

/// How long a plugin may take to print its handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a plugin may take to exit once asked to
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(15);

/// A provider plugin launched the way a host launches it
pub struct PluginProcess {
    child: Child,
    handshake: Handshake,
    // dropped after the child, which owns the socket inside
    _socket_dir: tempfile::TempDir,
}

/// Reads the handshake line, forwarding nothing else: a plugin writes exactly one line to stdout
async fn read_handshake(stdout: ChildStdout) -> Result<Handshake> {
    let mut lines = BufReader::new(stdout).lines();
    let line = timeout(HANDSHAKE_TIMEOUT, lines.next_line())
        .await
        .context("timed out waiting for the plugin handshake")?
        .context("failed to read plugin stdout")?
        .context("plugin exited before printing its handshake")?;
    debug!(%line, "received handshake");
    line.parse().context("failed to parse plugin handshake")
}

impl PluginProcess {
    /// Launch the plugin binary at `bin` with the environment a conforming host sets
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the plugin fails to start or does not complete the handshake
    pub async fn spawn(bin: impl AsRef<Path>) -> Result<Self> {
        Self::spawn_with_env(bin, Vec::<(OsString, OsString)>::new()).await
    }

    /// Like [`PluginProcess::spawn`], with additional environment variables that take precedence
    /// over the defaults
    pub async fn spawn_with_env<I, K, V>(bin: impl AsRef<Path>, envs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        let bin = bin.as_ref();
        let socket_dir = tempfile::tempdir().context("failed to create socket directory")?;
        let mut child = Command::new(bin)
            .env(ENV_MAGIC_COOKIE, MAGIC_COOKIE_VALUE)
            .env(ENV_PROTOCOL_VERSIONS, "5,6")
            .env(ENV_UNIX_SOCKET_DIR, socket_dir.path())
            .env(ENV_LOG, "trace")
            .envs(envs.into_iter().map(|(k, v)| (k.into(), v.into())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn `{}`", bin.display()))?;
        let stdout = child.stdout.take().context("plugin stdout is not captured")?;
        let handshake = read_handshake(stdout).await?;
        info!(
            pid = child.id(),
            network = %handshake.network,
            address = %handshake.address,
            "plugin started"
        );
        Ok(Self {
            child,
            handshake,
            _socket_dir: socket_dir,
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Dial the address advertised in the handshake
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the plugin asked for TLS, which this harness does not set up, or the
    /// connection fails
    pub async fn channel(&self) -> Result<Channel> {
        ensure!(
            self.handshake.server_cert.is_empty(),
            "plugin advertised a server certificate, but no client certificate was set"
        );
        let address = self.handshake.address.clone();
        match self.handshake.network.as_str() {
            "tcp" => Endpoint::from_shared(format!("http://{address}"))?
                .connect()
                .await
                .with_context(|| format!("failed to connect to `{address}`")),
            #[cfg(unix)]
            "unix" => Endpoint::from_static("http://[::]:50051")
                .connect_with_connector(tower::service_fn(move |_: Uri| {
                    let address = address.clone();
                    async move {
                        let stream = tokio::net::UnixStream::connect(address).await?;
                        Ok::<_, std::io::Error>(hyper_util::rt::TokioIo::new(stream))
                    }
                }))
                .await
                .context("failed to connect to plugin socket"),
            network => bail!("unsupported network `{network}`"),
        }
    }

    pub async fn provider_client(&self) -> Result<ProviderClient<Channel>> {
        Ok(ProviderClient::new(self.channel().await?))
    }

    pub async fn controller_client(&self) -> Result<GrpcControllerClient<Channel>> {
        Ok(GrpcControllerClient::new(self.channel().await?))
    }

    /// Wait for the plugin to exit, killing it after `limit`
    pub async fn wait(&mut self, limit: Duration) -> Result<ExitStatus> {
        match timeout(limit, self.child.wait()).await {
            Ok(status) => status.context("failed to wait for plugin"),
            Err(_) => {
                self.child.kill().await.context("failed to kill plugin")?;
                bail!("plugin did not exit within {limit:?}")
            }
        }
    }

    /// Disconnect the way a host does: call `GRPCController.Shutdown`, then wait for the exit
    pub async fn shutdown(mut self) -> Result<ExitStatus> {
        self.controller_client()
            .await?
            .shutdown(Empty {})
            .await
            .context("failed to call Shutdown")?;
        self.wait(EXIT_TIMEOUT).await
    }
}
