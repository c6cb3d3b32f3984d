//! Varint-framed MessagePack hub message codec.
//!
//! Every message on the wire is framed as:
//! - A 1-5 byte little-endian base-128 payload length
//! - A MessagePack array whose first element is the message kind
//!
//! Invocation arguments are carried as an opaque blob and never decoded.
//! The async [`FrameReader`] and [`FrameWriter`] take care of partial reads
//! and bounded writes.

pub mod args;
pub mod codec;
pub mod error;
pub mod message;
pub mod reader;
pub mod varint;
pub mod writer;

mod wire;

pub use codec::{
    decode_message, decode_payload, encode_message, encode_payload, peek_frame, Decoded,
    FrameConfig, Payload, DEFAULT_MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use message::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, CompletionOutcome, Headers,
    HubMessage, InvocationMessage, MessageKind,
};
pub use reader::{FrameReader, RECORD_SEPARATOR};
pub use varint::{LengthPrefix, MAX_PREFIX_LEN};
pub use writer::{FrameWriter, WRITE_CHUNK_SIZE};
