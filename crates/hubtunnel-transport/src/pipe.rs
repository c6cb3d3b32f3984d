//! Named pipe transport.
//!
//! On Windows this is a real `\\server\pipe\name` pipe. Elsewhere it follows
//! the .NET convention of a Unix domain socket at `$TMPDIR/CoreFxPipe_<name>`
//! so peers built on either runtime find each other by pipe name alone.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::connector::Connector;
use crate::error::{Result, TransportError};
use crate::stream::TunnelStream;

/// Server name meaning "this machine".
pub const LOCAL_SERVER: &str = ".";

#[cfg(unix)]
const PIPE_PREFIX: &str = "CoreFxPipe_";

/// Resolve the filesystem path a pipe name maps to.
///
/// Absolute names are used as-is.
#[cfg(unix)]
pub fn pipe_path(pipe_name: &str) -> PathBuf {
    let candidate = Path::new(pipe_name);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        std::env::temp_dir().join(format!("{PIPE_PREFIX}{pipe_name}"))
    }
}

/// Resolve the full pipe address for a server and pipe name.
#[cfg(windows)]
pub fn pipe_path(pipe_name: &str) -> PathBuf {
    pipe_address(LOCAL_SERVER, pipe_name)
}

#[cfg(windows)]
fn pipe_address(server_name: &str, pipe_name: &str) -> PathBuf {
    PathBuf::from(format!(r"\\{server_name}\pipe\{pipe_name}"))
}

fn is_local_server(server_name: &str) -> bool {
    server_name == LOCAL_SERVER || server_name.eq_ignore_ascii_case("localhost")
}

/// Connects to a named pipe as a client.
#[derive(Debug, Clone)]
pub struct NamedPipeConnector {
    pipe_name: String,
    server_name: String,
}

impl NamedPipeConnector {
    /// Create a connector for `pipe_name` on `server_name` (`"."` for the local machine).
    pub fn new(pipe_name: impl Into<String>, server_name: impl Into<String>) -> Result<Self> {
        let pipe_name = pipe_name.into();
        let server_name = server_name.into();

        if pipe_name.is_empty() {
            return Err(TransportError::Unsupported("empty pipe name".to_string()));
        }
        if !cfg!(windows) && !is_local_server(&server_name) {
            return Err(TransportError::Unsupported(format!(
                "remote pipe server {server_name:?} (only \".\" is reachable on this platform)"
            )));
        }

        Ok(Self {
            pipe_name,
            server_name,
        })
    }

    /// A connector for a pipe on the local machine.
    pub fn local(pipe_name: impl Into<String>) -> Result<Self> {
        Self::new(pipe_name, LOCAL_SERVER)
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

#[async_trait]
impl Connector for NamedPipeConnector {
    #[cfg(unix)]
    async fn connect(&self) -> Result<TunnelStream> {
        let path = pipe_path(&self.pipe_name);
        let stream = tokio::net::UnixStream::connect(&path)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: path.display().to_string(),
                source,
            })?;
        debug!(?path, "connected to named pipe");
        Ok(TunnelStream::from_unix(stream, format!("pipe:{}", self.pipe_name)))
    }

    #[cfg(windows)]
    async fn connect(&self) -> Result<TunnelStream> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let address = pipe_address(&self.server_name, &self.pipe_name);
        let client = ClientOptions::new()
            .open(&address)
            .map_err(|source| TransportError::Connect {
                endpoint: address.display().to_string(),
                source,
            })?;
        debug!(?address, "connected to named pipe");
        Ok(TunnelStream::from_pipe_client(
            client,
            format!("pipe:{}", self.pipe_name),
        ))
    }

    fn describe(&self) -> String {
        format!("pipe:{}\\{}", self.server_name, self.pipe_name)
    }
}

/// Multi-instance named pipe server.
///
/// Binding once and calling [`PipeListener::accept`] repeatedly yields one
/// independent stream per client. Must be created inside a tokio runtime.
#[cfg(unix)]
pub struct PipeListener {
    listener: tokio::net::UnixListener,
    pipe_name: String,
    path: PathBuf,
    created_inode: (u64, u64),
}

#[cfg(unix)]
impl PipeListener {
    /// Default permission mode for created pipe sockets.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind the pipe `pipe_name` on the local machine.
    pub fn bind(pipe_name: &str) -> Result<Self> {
        Self::bind_with_mode(pipe_name, Self::DEFAULT_SOCKET_MODE)
    }

    /// Bind with an explicit socket permission mode.
    pub fn bind_with_mode(pipe_name: &str, mode: u32) -> Result<Self> {
        use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};

        let path = pipe_path(pipe_name);
        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        let bind_error = |source: std::io::Error| TransportError::Bind {
            path: path.clone(),
            source,
        };

        // Stale sockets are replaced; anything else at the path is left alone.
        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_error(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale pipe socket");
            std::fs::remove_file(&path).map_err(bind_error)?;
        }

        let std_listener = std::os::unix::net::UnixListener::bind(&path).map_err(bind_error)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_error)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let listener = tokio::net::UnixListener::from_std(std_listener).map_err(bind_error)?;

        tracing::info!(?path, pipe = pipe_name, "listening on named pipe");

        Ok(Self {
            listener,
            pipe_name: pipe_name.to_string(),
            path,
            created_inode: (created.dev(), created.ino()),
        })
    }

    /// Wait for the next client.
    pub async fn accept(&mut self) -> Result<TunnelStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!(pipe = %self.pipe_name, "accepted pipe client");
        Ok(TunnelStream::from_unix(
            stream,
            format!("pipe:{}", self.pipe_name),
        ))
    }

    /// The socket path backing this pipe.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }
}

#[cfg(unix)]
impl Drop for PipeListener {
    fn drop(&mut self) {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};

        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        if metadata.file_type().is_socket() && (metadata.dev(), metadata.ino()) == self.created_inode
        {
            debug!(path = ?self.path, "cleaning up pipe socket");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "pipe path identity changed; skipping cleanup");
        }
    }
}

/// Multi-instance named pipe server.
///
/// One unconnected server instance is always kept open so clients arriving
/// between two `accept` calls are not refused.
#[cfg(windows)]
pub struct PipeListener {
    next: tokio::net::windows::named_pipe::NamedPipeServer,
    pipe_name: String,
    path: PathBuf,
}

#[cfg(windows)]
impl PipeListener {
    /// Bind the pipe `pipe_name` on the local machine.
    pub fn bind(pipe_name: &str) -> Result<Self> {
        use tokio::net::windows::named_pipe::ServerOptions;

        let path = pipe_path(pipe_name);
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(&path)
            .map_err(|source| TransportError::Bind {
                path: path.clone(),
                source,
            })?;
        tracing::info!(?path, pipe = pipe_name, "listening on named pipe");
        Ok(Self {
            next,
            pipe_name: pipe_name.to_string(),
            path,
        })
    }

    /// Wait for the next client.
    pub async fn accept(&mut self) -> Result<TunnelStream> {
        use tokio::net::windows::named_pipe::ServerOptions;

        self.next.connect().await.map_err(TransportError::Accept)?;
        let fresh = ServerOptions::new()
            .create(&self.path)
            .map_err(TransportError::Accept)?;
        let connected = std::mem::replace(&mut self.next, fresh);
        debug!(pipe = %self.pipe_name, "accepted pipe client");
        Ok(TunnelStream::from_pipe_server(
            connected,
            format!("pipe:{}", self.pipe_name),
        ))
    }

    /// The full pipe address.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pipe_name(&self) -> &str {
        &self.pipe_name
    }
}
