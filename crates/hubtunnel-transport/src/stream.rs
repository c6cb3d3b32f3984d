use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::TcpStream;

/// A connected duplex byte stream carrying one hub tunnel.
///
/// Every transport (named pipe, socket, websocket, in-memory pipe) is
/// normalized into this type so the connection layer deals with a single
/// `AsyncRead + AsyncWrite` shape.
pub struct TunnelStream {
    inner: TunnelStreamInner,
    peer: String,
}

enum TunnelStreamInner {
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    Tcp(TcpStream),
    Memory(DuplexStream),
    #[cfg(windows)]
    PipeClient(tokio::net::windows::named_pipe::NamedPipeClient),
    #[cfg(windows)]
    PipeServer(tokio::net::windows::named_pipe::NamedPipeServer),
}

impl TunnelStream {
    /// Wrap a connected Unix domain socket.
    #[cfg(unix)]
    pub fn from_unix(stream: tokio::net::UnixStream, peer: impl Into<String>) -> Self {
        Self {
            inner: TunnelStreamInner::Unix(stream),
            peer: peer.into(),
        }
    }

    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream, peer: impl Into<String>) -> Self {
        Self {
            inner: TunnelStreamInner::Tcp(stream),
            peer: peer.into(),
        }
    }

    /// Wrap one half of an in-memory duplex pipe.
    pub fn from_duplex(stream: DuplexStream, peer: impl Into<String>) -> Self {
        Self {
            inner: TunnelStreamInner::Memory(stream),
            peer: peer.into(),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_pipe_client(
        pipe: tokio::net::windows::named_pipe::NamedPipeClient,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            inner: TunnelStreamInner::PipeClient(pipe),
            peer: peer.into(),
        }
    }

    #[cfg(windows)]
    pub(crate) fn from_pipe_server(
        pipe: tokio::net::windows::named_pipe::NamedPipeServer,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            inner: TunnelStreamInner::PipeServer(pipe),
            peer: peer.into(),
        }
    }

    /// Create a connected in-memory pair, useful for tests and in-process peers.
    pub fn pair(max_buf_size: usize) -> (Self, Self) {
        let (a, b) = tokio::io::duplex(max_buf_size);
        (
            Self::from_duplex(a, "memory:client"),
            Self::from_duplex(b, "memory:server"),
        )
    }

    /// Human-readable description of the remote endpoint.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix(_) => "unix-domain-socket",
            TunnelStreamInner::Tcp(_) => "tcp",
            TunnelStreamInner::Memory(_) => "memory",
            #[cfg(windows)]
            TunnelStreamInner::PipeClient(_) | TunnelStreamInner::PipeServer(_) => "named-pipe",
        }
    }
}

impl fmt::Debug for TunnelStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelStream")
            .field("transport", &self.transport_name())
            .field("peer", &self.peer)
            .finish()
    }
}

macro_rules! dispatch {
    ($self:ident, $stream:ident => $body:expr) => {
        match &mut $self.get_mut().inner {
            #[cfg(unix)]
            TunnelStreamInner::Unix($stream) => $body,
            TunnelStreamInner::Tcp($stream) => $body,
            TunnelStreamInner::Memory($stream) => $body,
            #[cfg(windows)]
            TunnelStreamInner::PipeClient($stream) => $body,
            #[cfg(windows)]
            TunnelStreamInner::PipeServer($stream) => $body,
        }
    };
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        dispatch!(self, stream => Pin::new(stream).poll_read(cx, buf))
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        dispatch!(self, stream => Pin::new(stream).poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(self, stream => Pin::new(stream).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        dispatch!(self, stream => Pin::new(stream).poll_shutdown(cx))
    }
}
