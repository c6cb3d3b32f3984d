//! Hub connection state machine.
//!
//! A [`HubConnection`] rides on any transport a
//! [`Connector`](hubtunnel_transport::Connector) can produce. It owns:
//! - The handshake and the single-writer frame stream
//! - Pending invocations and their completions
//! - Method subscriptions, dispatched in wire order
//! - Keepalive pings, the server timeout and the reconnect policy
//!
//! Handlers and lifecycle events return a [`PendingAck`]; the connection
//! waits for it before dispatching the next message.

pub mod ack;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod handler;
pub mod handshake;
pub mod id;
pub mod state;

mod pending;

pub use ack::{ack_pair, Acknowledger, PendingAck};
pub use config::{ConnectionConfig, ReconnectPolicy};
pub use connection::{HubConnection, SERVER_TIMEOUT_MESSAGE};
pub use error::{ConnectionError, Result};
pub use events::{ConnectionEvents, NoEvents};
pub use handler::{Handler, Subscription, SubscriptionId};
pub use handshake::{
    handshake_client, handshake_server, HandshakeConfig, HandshakeRequest, HandshakeResponse,
};
pub use id::ConnectionId;
pub use state::ConnectionState;
pub use tokio_util::sync::CancellationToken;
