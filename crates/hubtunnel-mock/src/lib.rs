//! In-process mock hub.
//!
//! [`MockHub`] speaks the server side of the hub protocol over any
//! [`TunnelStream`](hubtunnel_transport::TunnelStream). Tests hand a
//! [`MockConnector`] to a connection, then inspect what the hub received or
//! push invocations and Close messages back.

mod completion;
mod hub;

pub use completion::{encode_completion, Reply};
pub use hub::{echo_first_argument, MockConnector, MockHub, Responder};
