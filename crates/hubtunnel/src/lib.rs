//! SignalR-style hub connections over arbitrary duplex transports.
//!
//! hubtunnel runs a MessagePack hub protocol over named pipes, sockets,
//! websockets or in-memory streams, and exposes the connection through a
//! C ABI in the `hubtunnel-ffi` crate.
//!
//! # Crate Structure
//!
//! - [`transport`]: duplex streams, named pipes, URL connectors
//! - [`frame`]: varint framing and the hub message codec
//! - [`conn`]: handshake, connection lifecycle, invocations and subscriptions
//! - [`mock`]: an in-process hub peer (behind the `mock` feature)

/// Re-export transport types.
pub mod transport {
    pub use hubtunnel_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hubtunnel_frame::*;
}

/// Re-export connection types.
pub mod conn {
    pub use hubtunnel_conn::*;
}

/// Re-export the mock hub (requires `mock` feature).
#[cfg(feature = "mock")]
pub mod mock {
    pub use hubtunnel_mock::*;
}
