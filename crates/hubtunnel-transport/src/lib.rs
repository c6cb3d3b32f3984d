//! Duplex byte transports for hub tunnels.
//!
//! Provides a unified [`TunnelStream`] over the transports a hub connection
//! can ride on:
//! - In-memory duplex pipes and pre-connected streams
//! - Named pipes (Unix domain sockets on Linux/macOS, real pipes on Windows)
//! - `tcp://`, `unix://`, `pipe://` and `ws(s)://` URLs
//!
//! This is the lowest layer of hubtunnel. The connection layer only ever
//! sees a [`Connector`] that yields fresh [`TunnelStream`]s.

pub mod connector;
pub mod endpoint;
pub mod error;
pub mod pipe;
pub mod stream;

mod websocket;

pub use connector::{Connector, StreamConnector};
pub use endpoint::{AccessTokenProvider, StaticToken, UrlConnector};
pub use error::{Result, TransportError};
pub use pipe::{pipe_path, NamedPipeConnector, PipeListener, LOCAL_SERVER};
pub use stream::TunnelStream;
