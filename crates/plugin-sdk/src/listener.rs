//! The socket the host connects to

use core::pin::Pin;
use core::task::{Context, Poll};

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tfplugin_core::PluginEnv;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tonic::transport::server::Connected;
use tracing::{debug, trace};

use crate::error::{ServeError, ServeResult};

#[cfg(unix)]
const SOCKET_DIR_PREFIX: &str = "plugin";
#[cfg(unix)]
const SOCKET_FILE_NAME: &str = "plugin.sock";

/// Anything a connection can be carried over
pub(crate) trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A single connection from the host, plain or TLS, over unix or tcp
pub struct PluginConn(Box<dyn Io>);

impl PluginConn {
    pub(crate) fn new(io: impl Io) -> Self {
        Self(Box::new(io))
    }

    pub(crate) fn from_boxed(io: Box<dyn Io>) -> Self {
        Self(io)
    }
}

impl AsyncRead for PluginConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().0).poll_read(cx, buf)
    }
}

impl AsyncWrite for PluginConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.get_mut().0).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().0).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.get_mut().0).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.get_mut().0).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.0.is_write_vectored()
    }
}

impl Connected for PluginConn {
    type ConnectInfo = ();

    fn connect_info(&self) -> Self::ConnectInfo {}
}

enum Inner {
    Tcp(TcpListener, SocketAddr),
    #[cfg(unix)]
    Unix(UnixListener, PathBuf),
}

/// A bound listener. On unix the socket lives in a temporary directory that is removed when the
/// listener is dropped.
pub struct PluginListener {
    inner: Inner,
    #[cfg(unix)]
    _socket_dir: Option<tempfile::TempDir>,
}

impl PluginListener {
    /// Binds the listener the host expects on this platform: a unix socket where available,
    /// loopback tcp otherwise
    pub async fn bind(env: &PluginEnv) -> ServeResult<Self> {
        #[cfg(unix)]
        {
            Self::bind_unix(
                env.unix_socket_dir.as_deref(),
                env.unix_socket_group.as_deref(),
            )
        }
        #[cfg(not(unix))]
        {
            Self::bind_tcp(env.min_port, env.max_port).await
        }
    }

    /// Binds `127.0.0.1` on the first free port in `min_port..=max_port`. A range of `0..=0`
    /// picks an ephemeral port.
    pub async fn bind_tcp(min_port: u16, max_port: u16) -> ServeResult<Self> {
        if min_port > max_port {
            return Err(ServeError::Bind(format!(
                "minimum port {min_port} is greater than maximum port {max_port}"
            )));
        }
        for port in min_port..=max_port {
            match TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
                Ok(listener) => {
                    let addr = listener.local_addr()?;
                    debug!(%addr, "bound plugin tcp listener");
                    return Ok(Self {
                        inner: Inner::Tcp(listener, addr),
                        #[cfg(unix)]
                        _socket_dir: None,
                    });
                }
                Err(e) => trace!(port, error = %e, "port unavailable"),
            }
        }
        Err(ServeError::Bind(format!(
            "couldn't bind plugin TCP listener in range {min_port}..={max_port}"
        )))
    }

    /// Binds `plugin.sock` in a fresh temporary directory under `dir` (or the system temp dir).
    /// When `group` is given the socket is handed to that group with read/write access.
    #[cfg(unix)]
    pub fn bind_unix(dir: Option<&Path>, group: Option<&str>) -> ServeResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SOCKET_DIR_PREFIX);
        let socket_dir = match dir {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };
        let path = socket_dir.path().join(SOCKET_FILE_NAME);
        let listener = UnixListener::bind(&path)
            .map_err(|e| ServeError::Bind(format!("{}: {e}", path.display())))?;
        if let Some(group) = group {
            set_socket_group(&path, group)?;
        }
        debug!(path = %path.display(), "bound plugin unix listener");
        Ok(Self {
            inner: Inner::Unix(listener, path),
            _socket_dir: Some(socket_dir),
        })
    }

    /// The network name used in the handshake line
    pub fn network(&self) -> &'static str {
        match self.inner {
            Inner::Tcp(..) => "tcp",
            #[cfg(unix)]
            Inner::Unix(..) => "unix",
        }
    }

    /// The address used in the handshake line
    pub fn address(&self) -> String {
        match &self.inner {
            Inner::Tcp(_, addr) => addr.to_string(),
            #[cfg(unix)]
            Inner::Unix(_, path) => path.display().to_string(),
        }
    }

    pub(crate) async fn accept(&self) -> io::Result<Box<dyn Io>> {
        match &self.inner {
            Inner::Tcp(listener, _) => {
                let (stream, peer) = listener.accept().await?;
                trace!(%peer, "accepted tcp connection");
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Inner::Unix(listener, _) => {
                let (stream, _) = listener.accept().await?;
                trace!("accepted unix connection");
                Ok(Box::new(stream))
            }
        }
    }
}

#[cfg(unix)]
fn set_socket_group(path: &Path, group: &str) -> ServeResult<()> {
    use std::os::unix::fs::PermissionsExt;

    use nix::unistd::{chown, Gid, Group};

    let gid = match group.parse::<u32>() {
        Ok(gid) => Gid::from_raw(gid),
        Err(_) => Group::from_name(group)
            .map_err(|e| ServeError::Bind(format!("failed to look up group {group}: {e}")))?
            .ok_or_else(|| ServeError::Bind(format!("group {group} does not exist")))?
            .gid,
    };
    chown(path, None, Some(gid)).map_err(|e| {
        ServeError::Bind(format!(
            "failed to change group of {} to {group}: {e}",
            path.display()
        ))
    })?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tcp_listener_uses_loopback() {
        let listener = PluginListener::bind_tcp(0, 0).await.unwrap();
        assert_eq!(listener.network(), "tcp");
        let addr: SocketAddr = listener.address().parse().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn tcp_listener_rejects_inverted_range() {
        assert!(matches!(
            PluginListener::bind_tcp(20, 10).await,
            Err(ServeError::Bind(_))
        ));
    }

    #[tokio::test]
    async fn tcp_listener_skips_taken_ports() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        match PluginListener::bind_tcp(port, port.saturating_add(20)).await {
            Ok(listener) => {
                let addr: SocketAddr = listener.address().parse().unwrap();
                assert_ne!(addr.port(), port);
            }
            // every port in the range may be taken on a busy machine
            Err(e) => assert!(matches!(e, ServeError::Bind(_))),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_socket_lives_in_removable_temp_dir() {
        let parent = tempfile::tempdir().unwrap();
        let listener = PluginListener::bind_unix(Some(parent.path()), None).unwrap();
        assert_eq!(listener.network(), "unix");

        let socket = PathBuf::from(listener.address());
        assert_eq!(socket.file_name().unwrap(), SOCKET_FILE_NAME);
        let socket_dir = socket.parent().unwrap().to_path_buf();
        assert_eq!(socket_dir.parent().unwrap(), parent.path());
        assert!(socket_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(SOCKET_DIR_PREFIX));
        assert!(socket.exists());

        drop(listener);
        assert!(!socket_dir.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_socket_group_is_applied() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let parent = tempfile::tempdir().unwrap();
        let gid = nix::unistd::getegid().as_raw();
        let listener =
            PluginListener::bind_unix(Some(parent.path()), Some(&gid.to_string())).unwrap();
        let metadata = std::fs::metadata(listener.address()).unwrap();
        assert_eq!(metadata.gid(), gid);
        assert_eq!(metadata.permissions().mode() & 0o777, 0o660);
    }
}
