//! Functions for starting and running a provider plugin

use core::future::Future;
use core::time::Duration;

use std::collections::HashMap;
use std::io::Write as _;
use std::process::ExitCode;

use serde::Serialize;
use tfplugin_core::logging::Level;
use tfplugin_core::PluginEnv;
use tfplugin_tracing::LogFormat;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, warn};

use crate::controller::Controller;
use crate::error::{ServeError, ServeResult};
use crate::handshake::{
    negotiate_protocol_version, Handshake, MAGIC_COOKIE_VALUE, NOT_LAUNCHED_BY_HOST_MESSAGE,
    RPC_PROTOCOL, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::listener::{PluginConn, PluginListener};
use crate::proto::plugin::grpc_controller_server::GrpcControllerServer;
use crate::proto::tfplugin6::provider_server::ProviderServer;
use crate::service::ProviderService;
use crate::tls::{self, ServerIdentity};
use crate::ProviderHandler;

/// Grace period given to in-flight RPCs once shutdown was requested
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Health service name the host checks
const HEALTH_SERVICE_NAME: &str = "plugin";

/// Bound on waiting for stuck runtime threads after serving stopped
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for [`serve`]
pub struct ServeOptions<F> {
    /// Called exactly once to build the provider
    pub provider_func: F,
    /// Registry address of the provider, e.g. `registry.terraform.io/example/localfs`. Only used
    /// for the reattach configuration printed in debug mode.
    pub provider_addr: Option<String>,
    /// Serve without a host: skip the cookie check and TLS, log plain text and print reattach
    /// configuration instead of the handshake line
    pub debug: bool,
    pub grace_period: Duration,
}

impl<F> ServeOptions<F> {
    pub fn new(provider_func: F) -> Self {
        Self {
            provider_func,
            provider_addr: None,
            debug: false,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    #[must_use]
    pub fn with_provider_addr(mut self, provider_addr: impl Into<String>) -> Self {
        self.provider_addr = Some(provider_addr.into());
        self
    }

    #[must_use]
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

/// Serves a provider to the host that launched this process and returns the exit code the
/// process should finish with. Blocks until the host is done with the plugin.
pub fn serve<F, P>(opts: ServeOptions<F>) -> ExitCode
where
    F: FnOnce() -> P,
    P: ProviderHandler,
{
    let env = match PluginEnv::from_env() {
        Ok(env) => env,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if !opts.debug && env.magic_cookie.as_deref() != Some(MAGIC_COOKIE_VALUE) {
        eprintln!("{NOT_LAUNCHED_BY_HOST_MESSAGE}");
        return ExitCode::FAILURE;
    }

    let (format, level) = if opts.debug {
        (LogFormat::Plain, env.log_level.or(Some(Level::Info)))
    } else {
        (LogFormat::Hclog, env.log_level)
    };
    let _flush_guard = match tfplugin_tracing::configure_tracing("provider", format, level.as_ref())
    {
        Ok((dispatch, guard)) => {
            if tracing::dispatcher::set_global_default(dispatch).is_err() {
                eprintln!("Failed to configure tracing: a global subscriber is already set");
            }
            Some(guard)
        }
        Err(e) => {
            eprintln!("Failed to configure tracing: {e}");
            None
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(opts, env));
    // in the unlikely case there are any stuck threads,
    // close them so the process has a clean exit
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    match result {
        Ok(()) => {
            debug!("plugin exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "plugin failed");
            ExitCode::FAILURE
        }
    }
}

/// Runs the plugin. You can use this function instead of [`serve`] if you are already in an
/// async context and have loaded the environment yourself. The magic cookie is not checked.
pub async fn run<F, P>(opts: ServeOptions<F>, env: PluginEnv) -> ServeResult<()>
where
    F: FnOnce() -> P,
    P: ProviderHandler,
{
    let ServeOptions {
        provider_func,
        provider_addr,
        debug,
        grace_period,
    } = opts;
    if debug && provider_addr.is_none() {
        return Err(ServeError::MissingProviderAddress);
    }
    for version in &env.ignored_protocol_versions {
        warn!(%version, "host sent an invalid protocol version, ignoring it");
    }

    let handler = provider_func();
    let server = PluginServer::bind(&env, debug).await?;
    let handshake = server.handshake().clone();
    spawn_signal_handlers(server.shutdown_token(), debug)?;

    match provider_addr.filter(|_| debug) {
        Some(provider_addr) => {
            println!("{}", reattach_instructions(&provider_addr, &handshake)?);
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{handshake}")?;
            stdout.flush()?;
        }
    }
    info!(
        network = %handshake.network,
        address = %handshake.address,
        protocol_version = handshake.app_version,
        tls = !handshake.server_cert.is_empty(),
        "plugin server started"
    );

    server.serve(handler, grace_period).await
}

/// A bound plugin server that has not started serving yet
pub struct PluginServer {
    listener: PluginListener,
    tls: Option<TlsAcceptor>,
    handshake: Handshake,
    shutdown: CancellationToken,
}

impl PluginServer {
    /// Negotiates the protocol version, binds the listener and, unless in debug mode or the host
    /// did not ask for it, sets up mutual TLS
    pub async fn bind(env: &PluginEnv, debug: bool) -> ServeResult<Self> {
        let app_version =
            negotiate_protocol_version(&env.protocol_versions, SUPPORTED_PROTOCOL_VERSIONS);
        let listener = PluginListener::bind(env).await?;
        let mut handshake = Handshake::new(app_version, listener.network(), listener.address());

        let tls = match env.client_cert.as_deref() {
            Some(client_cert) if !debug => {
                let client_cert = tls::parse_client_certificate(client_cert)?;
                let identity = ServerIdentity::generate()?;
                handshake = handshake.with_server_cert(identity.handshake_encoding());
                Some(tls::acceptor(identity, client_cert)?)
            }
            _ => None,
        };
        Ok(Self {
            listener,
            tls,
            handshake,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Cancelling the token stops the server, just like a shutdown request from the host
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves `handler` until shutdown is requested, then waits up to `grace_period` for
    /// in-flight RPCs
    pub async fn serve<P: ProviderHandler>(
        self,
        handler: P,
        grace_period: Duration,
    ) -> ServeResult<()> {
        let Self {
            listener,
            tls,
            shutdown,
            ..
        } = self;

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_service_status(HEALTH_SERVICE_NAME, tonic_health::ServingStatus::Serving)
            .await;

        let incoming = accept_connections(listener, tls, shutdown.clone());
        let stopped = shutdown.clone();
        let server = Server::builder()
            .add_service(health_service)
            .add_service(GrpcControllerServer::new(Controller::new(shutdown.clone())))
            .add_service(ProviderServer::new(ProviderService::new(handler)))
            .serve_with_incoming_shutdown(incoming, async move { stopped.cancelled().await });

        with_grace_period(server, &shutdown, grace_period).await?;
        info!("plugin server stopped");
        Ok(())
    }
}

/// Drives `server` to completion, giving up `grace_period` after `shutdown` was cancelled
async fn with_grace_period<S>(
    server: S,
    shutdown: &CancellationToken,
    grace_period: Duration,
) -> Result<(), tonic::transport::Error>
where
    S: Future<Output = Result<(), tonic::transport::Error>>,
{
    tokio::pin!(server);
    tokio::select! {
        result = &mut server => result,
        () = async {
            shutdown.cancelled().await;
            tokio::time::sleep(grace_period).await;
        } => {
            warn!(?grace_period, "graceful shutdown timed out, dropping open connections");
            Ok(())
        }
    }
}

/// Accepts connections until `shutdown` is cancelled, completing TLS handshakes off the accept
/// loop. A failing listener stops the server.
fn accept_connections(
    listener: PluginListener,
    tls: Option<TlsAcceptor>,
    shutdown: CancellationToken,
) -> ReceiverStream<std::io::Result<PluginConn>> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let stream = match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "failed to accept connection from host");
                    shutdown.cancel();
                    break;
                }
            };
            match &tls {
                None => {
                    if tx.send(Ok(PluginConn::from_boxed(stream))).await.is_err() {
                        break;
                    }
                }
                Some(acceptor) => {
                    let acceptor = acceptor.clone();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(stream) => {
                                let _ = tx.send(Ok(PluginConn::new(stream))).await;
                            }
                            Err(e) => warn!(error = %e, "TLS handshake with host failed"),
                        }
                    });
                }
            }
        }
        // keeps the socket directory alive until no more connections are accepted
        drop(listener);
    });
    ReceiverStream::new(rx)
}

/// The host delivers interrupts to the whole process group and follows up with a shutdown
/// request, so SIGINT is only honored in debug mode. SIGTERM always stops the server.
///
/// Handlers are installed before returning, so signals sent right after the handshake are seen.
#[cfg(unix)]
fn spawn_signal_handlers(shutdown: CancellationToken, debug: bool) -> ServeResult<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        let mut count = 0_u64;
        loop {
            tokio::select! {
                Some(()) = interrupt.recv() => {
                    if debug {
                        info!("received interrupt, stopping");
                        break;
                    }
                    count += 1;
                    debug!(count, "plugin received interrupt signal, ignoring");
                }
                Some(()) = terminate.recv() => {
                    info!("received SIGTERM, stopping");
                    break;
                }
                else => return,
            }
        }
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handlers(shutdown: CancellationToken, debug: bool) -> ServeResult<()> {
    tokio::spawn(async move {
        let mut count = 0_u64;
        while tokio::signal::ctrl_c().await.is_ok() {
            if debug {
                info!("received interrupt, stopping");
                shutdown.cancel();
                break;
            }
            count += 1;
            debug!(count, "plugin received interrupt signal, ignoring");
        }
    });
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReattachConfig<'a> {
    protocol: &'a str,
    protocol_version: u32,
    pid: u32,
    test: bool,
    addr: ReattachAddr<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ReattachAddr<'a> {
    network: &'a str,
    string: &'a str,
}

fn reattach_config(provider_addr: &str, handshake: &Handshake) -> serde_json::Result<String> {
    let config = ReattachConfig {
        protocol: RPC_PROTOCOL,
        protocol_version: handshake.app_version,
        pid: std::process::id(),
        test: true,
        addr: ReattachAddr {
            network: &handshake.network,
            string: &handshake.address,
        },
    };
    serde_json::to_string(&HashMap::from([(provider_addr, config)]))
}

fn reattach_instructions(provider_addr: &str, handshake: &Handshake) -> ServeResult<String> {
    let config = reattach_config(provider_addr, handshake)
        .map_err(|e| ServeError::Io(std::io::Error::other(e)))?;
    Ok(format!(
        "Provider started. To attach Terraform CLI, set the TF_REATTACH_PROVIDERS environment \
         variable with the following:\n\n\tTF_REATTACH_PROVIDERS='{config}'\n"
    ))
}
