use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{FrameError, Result};
use crate::message::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, CompletionOutcome, HubMessage,
    InvocationMessage, MessageKind,
};
use crate::varint::{read_length_prefix, write_length_prefix, LengthPrefix, MAX_PREFIX_LEN};
use crate::wire;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Outcome of one decode attempt over a byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The buffer does not yet hold a complete frame. Nothing was consumed.
    NeedMoreData,
    /// A complete frame was consumed but its kind is not dispatched here.
    Skipped { kind: i64, consumed: usize },
    /// A complete frame was consumed and decoded.
    Message { message: HubMessage, consumed: usize },
}

impl Decoded {
    /// Bytes the caller must drop from the front of its buffer.
    pub fn consumed(&self) -> usize {
        match self {
            Self::NeedMoreData => 0,
            Self::Skipped { consumed, .. } | Self::Message { consumed, .. } => *consumed,
        }
    }
}

/// A decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Message(HubMessage),
    /// Well-formed frame of a kind this side does not handle.
    Unsupported(i64),
}

/// Locate the next complete frame at the start of `src`.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn peek_frame(src: &[u8], max_payload: usize) -> Result<Option<LengthPrefix>> {
    let Some(prefix) = read_length_prefix(src)? else {
        return Ok(None);
    };

    if prefix.payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: prefix.payload_len,
            max: max_payload,
        });
    }

    if src.len() < prefix.frame_len() {
        return Ok(None);
    }

    Ok(Some(prefix))
}

/// Decode one message from the start of `src` without modifying it.
///
/// Once a whole frame is present its full length is reported as consumed,
/// whether or not the body maps to a dispatchable message.
pub fn decode_message(src: &[u8], max_payload: usize) -> Result<Decoded> {
    let Some(prefix) = peek_frame(src, max_payload)? else {
        return Ok(Decoded::NeedMoreData);
    };

    let consumed = prefix.frame_len();
    let payload = Bytes::copy_from_slice(&src[prefix.prefix_len..consumed]);
    Ok(match decode_payload(&payload)? {
        Payload::Message(message) => Decoded::Message { message, consumed },
        Payload::Unsupported(kind) => Decoded::Skipped { kind, consumed },
    })
}

/// Decode a frame body. Opaque fields are sliced out of `payload` without copying.
pub fn decode_payload(payload: &Bytes) -> Result<Payload> {
    let mut rd: &[u8] = payload;
    let count = wire::read_array_len(&mut rd)?;
    if count == 0 {
        return Err(FrameError::InvalidPayload("empty message array".to_string()));
    }

    let tag = wire::read_int(&mut rd, "message kind")?;
    let Some(kind) = MessageKind::from_tag(tag) else {
        debug!(kind = tag, "skipping unknown hub message kind");
        return Ok(Payload::Unsupported(tag));
    };

    let require = |min: u32| {
        if count < min {
            Err(FrameError::InvalidPayload(format!(
                "{} message has {count} fields, expected at least {min}",
                kind.name()
            )))
        } else {
            Ok(())
        }
    };

    let message = match kind {
        MessageKind::Invocation => {
            require(5)?;
            let headers = wire::read_headers(&mut rd)?;
            let invocation_id =
                wire::read_nullable_str(&mut rd, "invocation id")?.filter(|id| !id.is_empty());
            let target = wire::read_str(&mut rd, "target")?;
            let rest = payload.slice(payload.len() - rd.len()..);
            let (arguments, stream_ids) = split_arguments(rest, count);
            HubMessage::Invocation(InvocationMessage {
                headers,
                invocation_id,
                target,
                arguments,
                stream_ids,
            })
        }
        MessageKind::Completion => {
            require(4)?;
            let headers = wire::read_headers(&mut rd)?;
            let invocation_id = wire::read_str(&mut rd, "invocation id")?;
            let outcome = match wire::read_int(&mut rd, "result kind")? {
                1 => CompletionOutcome::Error(wire::read_str(&mut rd, "error")?),
                2 => CompletionOutcome::Void,
                3 => CompletionOutcome::Result(payload.slice(payload.len() - rd.len()..)),
                other => {
                    return Err(FrameError::InvalidPayload(format!(
                        "invalid invocation result kind {other}"
                    )))
                }
            };
            HubMessage::Completion(CompletionMessage {
                headers,
                invocation_id,
                outcome,
            })
        }
        MessageKind::CancelInvocation => {
            require(3)?;
            HubMessage::CancelInvocation(CancelInvocationMessage {
                headers: wire::read_headers(&mut rd)?,
                invocation_id: wire::read_str(&mut rd, "invocation id")?,
            })
        }
        MessageKind::Ping => HubMessage::Ping,
        MessageKind::Close => {
            require(2)?;
            let error = wire::read_nullable_str(&mut rd, "close error")?;
            let allow_reconnect = count > 2 && wire::read_bool(&mut rd, "allow reconnect")?;
            HubMessage::Close(CloseMessage {
                error,
                allow_reconnect,
            })
        }
        MessageKind::StreamItem | MessageKind::StreamInvocation => {
            debug!(kind = kind.name(), "skipping unsupported hub message kind");
            return Ok(Payload::Unsupported(tag));
        }
    };

    Ok(Payload::Message(message))
}

/// Separate the raw argument blob from the trailing stream id array.
///
/// The arguments are written raw, so the split is found structurally. Whole
/// MessagePack values are skipped one at a time until the rest is exactly a
/// string array. Blobs that are not a run of complete values fall back to the
/// shortest string-array suffix, and failing that everything is arguments.
fn split_arguments(rest: Bytes, count: u32) -> (Bytes, Vec<String>) {
    if count < 6 {
        return (rest, Vec::new());
    }

    let mut rd: &[u8] = &rest;
    loop {
        if let Some(stream_ids) = wire::parse_str_array_exact(rd) {
            let args_len = rest.len() - rd.len();
            return (rest.slice(..args_len), stream_ids);
        }
        if rd.is_empty() || wire::skip_value(&mut rd).is_err() {
            break;
        }
    }

    for start in (0..rest.len()).rev() {
        if let Some(stream_ids) = wire::parse_str_array_exact(&rest[start..]) {
            return (rest.slice(..start), stream_ids);
        }
    }

    (rest, Vec::new())
}

/// Serialize a message body (without the length prefix) into `buf`.
pub fn encode_payload(message: &HubMessage, buf: &mut Vec<u8>) -> Result<()> {
    match message {
        HubMessage::Invocation(invocation) => {
            wire::write_array_len(buf, 6)?;
            wire::write_kind(buf, MessageKind::Invocation.tag())?;
            wire::write_headers(buf, &invocation.headers)?;
            let id = invocation.invocation_id.as_deref().filter(|id| !id.is_empty());
            wire::write_nullable_str(buf, id)?;
            wire::write_str(buf, &invocation.target)?;
            buf.extend_from_slice(&invocation.arguments);
            wire::write_str_array(buf, &invocation.stream_ids)?;
        }
        HubMessage::CancelInvocation(cancel) => {
            wire::write_array_len(buf, 3)?;
            wire::write_kind(buf, MessageKind::CancelInvocation.tag())?;
            wire::write_headers(buf, &cancel.headers)?;
            wire::write_str(buf, &cancel.invocation_id)?;
        }
        HubMessage::Ping => {
            wire::write_array_len(buf, 1)?;
            wire::write_kind(buf, MessageKind::Ping.tag())?;
        }
        HubMessage::Close(close) => {
            wire::write_array_len(buf, 3)?;
            wire::write_kind(buf, MessageKind::Close.tag())?;
            let error = close.error.as_deref().filter(|e| !e.trim().is_empty());
            wire::write_nullable_str(buf, error)?;
            wire::write_bool(buf, close.allow_reconnect)?;
        }
        HubMessage::Completion(_) => {
            return Err(FrameError::UnsupportedMessage(MessageKind::Completion.name()));
        }
    }
    Ok(())
}

/// Encode a message into a length-prefixed frame appended to `dst`.
///
/// The body is serialized to a scratch buffer first so the minimal prefix
/// can be computed from its length.
pub fn encode_message(message: &HubMessage, dst: &mut BytesMut) -> Result<()> {
    let mut scratch = Vec::new();
    encode_payload(message, &mut scratch)?;

    let mut prefix = [0u8; MAX_PREFIX_LEN];
    let used = write_length_prefix(scratch.len(), &mut prefix)?;

    dst.reserve(used + scratch.len());
    dst.put_slice(&prefix[..used]);
    dst.put_slice(&scratch);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Headers;

    fn frame(message: &HubMessage) -> BytesMut {
        let mut wire = BytesMut::new();
        encode_message(message, &mut wire).unwrap();
        wire
    }

    fn decode_whole(bytes: &[u8]) -> HubMessage {
        match decode_message(bytes, DEFAULT_MAX_PAYLOAD).unwrap() {
            Decoded::Message { message, consumed } => {
                assert_eq!(consumed, bytes.len());
                message
            }
            other => panic!("expected a message, got {other:?}"),
        }
    }

    /// Frame a hand-built body.
    fn raw_frame(body: &[u8]) -> Vec<u8> {
        let mut prefix = [0u8; MAX_PREFIX_LEN];
        let used = write_length_prefix(body.len(), &mut prefix).unwrap();
        let mut out = prefix[..used].to_vec();
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn invocation_with_empty_id_decodes_as_absent() {
        let message = HubMessage::Invocation(InvocationMessage {
            headers: Headers::new(),
            invocation_id: Some(String::new()),
            target: "Foo".to_string(),
            arguments: Bytes::from_static(&[0x91, 0x2A]),
            stream_ids: Vec::new(),
        });

        let HubMessage::Invocation(decoded) = decode_whole(&frame(&message)) else {
            panic!("expected invocation");
        };
        assert_eq!(decoded.invocation_id, None);
        assert_eq!(decoded.target, "Foo");
        assert_eq!(decoded.arguments.as_ref(), &[0x91, 0x2A]);
        assert!(decoded.stream_ids.is_empty());
    }

    #[test]
    fn opaque_two_byte_blob_survives_round_trip() {
        // Two values rather than one array.
        let message = HubMessage::Invocation(
            InvocationMessage::new("Foo", Bytes::from_static(&[0x01, 0x02])).with_invocation_id(""),
        );
        let HubMessage::Invocation(decoded) = decode_whole(&frame(&message)) else {
            panic!("expected invocation");
        };
        assert_eq!(decoded.arguments.as_ref(), &[0x01, 0x02]);
        assert!(decoded.stream_ids.is_empty());
    }

    #[test]
    fn stream_id_ending_like_an_empty_array_round_trips() {
        // "ɐ" is C9 90; its last byte alone reads as an empty array.
        let message = HubMessage::Invocation(InvocationMessage {
            headers: Headers::new(),
            invocation_id: None,
            target: "Foo".to_string(),
            arguments: Bytes::from_static(&[0x01, 0x02]),
            stream_ids: vec!["ɐ".to_string()],
        });
        assert_eq!(decode_whole(&frame(&message)), message);
    }

    #[test]
    fn malformed_argument_blob_still_finds_stream_ids() {
        // 0xC1 is never valid MessagePack.
        let message = HubMessage::Invocation(InvocationMessage {
            headers: Headers::new(),
            invocation_id: None,
            target: "Foo".to_string(),
            arguments: Bytes::from_static(&[0xC1, 0x07]),
            stream_ids: vec!["s1".to_string()],
        });
        assert_eq!(decode_whole(&frame(&message)), message);
    }

    #[test]
    fn invocation_round_trip_keeps_headers_and_streams() {
        let mut headers = Headers::new();
        headers.insert("b".to_string(), "2".to_string());
        headers.insert("a".to_string(), "1".to_string());
        let message = HubMessage::Invocation(InvocationMessage {
            headers,
            invocation_id: Some("42".to_string()),
            target: "Upload".to_string(),
            arguments: Bytes::from_static(&[0x92, 0xA1, b'x', 0xC3]),
            stream_ids: vec!["s1".to_string(), "s2".to_string()],
        });

        let decoded = decode_whole(&frame(&message));
        assert_eq!(decoded, message);
        let HubMessage::Invocation(invocation) = decoded else {
            unreachable!()
        };
        let order: Vec<_> = invocation.headers.keys().cloned().collect();
        assert_eq!(order, ["b", "a"]);
    }

    #[test]
    fn five_field_invocation_keeps_all_trailing_bytes() {
        // [1, {}, nil, "T", [7]]
        let body = [0x95, 0x01, 0x80, 0xC0, 0xA1, b'T', 0x91, 0x07];
        let HubMessage::Invocation(decoded) = decode_whole(&raw_frame(&body)) else {
            panic!("expected invocation");
        };
        assert_eq!(decoded.arguments.as_ref(), &[0x91, 0x07]);
        assert!(decoded.stream_ids.is_empty());
    }

    #[test]
    fn control_messages_round_trip() {
        let messages = [
            HubMessage::Ping,
            HubMessage::Close(CloseMessage::default()),
            HubMessage::Close(CloseMessage {
                error: Some("server shutting down".to_string()),
                allow_reconnect: true,
            }),
            HubMessage::CancelInvocation(CancelInvocationMessage {
                headers: Headers::new(),
                invocation_id: "9".to_string(),
            }),
        ];
        for message in messages {
            assert_eq!(decode_whole(&frame(&message)), message);
        }
    }

    #[test]
    fn blank_close_error_is_written_as_nil() {
        let message = HubMessage::Close(CloseMessage {
            error: Some("   ".to_string()),
            allow_reconnect: false,
        });
        assert_eq!(
            decode_whole(&frame(&message)),
            HubMessage::Close(CloseMessage::default())
        );
    }

    #[test]
    fn close_without_reconnect_flag_defaults_to_false() {
        // [7, "bye"]
        let body = [0x92, 0x07, 0xA3, b'b', b'y', b'e'];
        assert_eq!(
            decode_whole(&raw_frame(&body)),
            HubMessage::Close(CloseMessage {
                error: Some("bye".to_string()),
                allow_reconnect: false,
            })
        );
    }

    #[test]
    fn completion_result_kinds_decode() {
        // [3, {}, "1", 1, "boom"]
        let error = [0x95, 0x03, 0x80, 0xA1, b'1', 0x01, 0xA4, b'b', b'o', b'o', b'm'];
        // [3, {}, "2", 2]
        let void = [0x94, 0x03, 0x80, 0xA1, b'2', 0x02];
        // [3, {}, "3", 3, 42]
        let value = [0x95, 0x03, 0x80, 0xA1, b'3', 0x03, 0x2A];

        let outcome = |bytes: &[u8]| match decode_whole(&raw_frame(bytes)) {
            HubMessage::Completion(completion) => completion.outcome,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(outcome(&error), CompletionOutcome::Error("boom".to_string()));
        assert_eq!(outcome(&void), CompletionOutcome::Void);
        assert_eq!(
            outcome(&value),
            CompletionOutcome::Result(Bytes::from_static(&[0x2A]))
        );
    }

    #[test]
    fn completion_with_unknown_result_kind_is_invalid() {
        let body = [0x94, 0x03, 0x80, 0xA1, b'1', 0x09];
        let err = decode_message(&raw_frame(&body), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload(_)));
    }

    #[test]
    fn completion_cannot_be_encoded() {
        let message = HubMessage::Completion(CompletionMessage {
            headers: Headers::new(),
            invocation_id: "1".to_string(),
            outcome: CompletionOutcome::Void,
        });
        let err = encode_message(&message, &mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, FrameError::UnsupportedMessage("completion")));
    }

    #[test]
    fn unknown_and_stream_kinds_are_skipped_but_consumed() {
        let unknown = raw_frame(&[0x91, 0x63]);
        let stream_item = raw_frame(&[0x93, 0x02, 0x80, 0xA1, b'1']);
        for (bytes, kind) in [(unknown, 99), (stream_item, 2)] {
            let mut wire = bytes.clone();
            wire.extend_from_slice(&frame(&HubMessage::Ping));
            let decoded = decode_message(&wire, DEFAULT_MAX_PAYLOAD).unwrap();
            assert_eq!(
                decoded,
                Decoded::Skipped {
                    kind,
                    consumed: bytes.len()
                }
            );
            assert_eq!(decode_whole(&wire[bytes.len()..]), HubMessage::Ping);
        }
    }

    #[test]
    fn lone_prefix_byte_needs_more_data() {
        let decoded = decode_message(&[0x05], DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(decoded, Decoded::NeedMoreData);
        assert_eq!(decoded.consumed(), 0);

        let decoded = decode_message(&[0x85], DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(decoded, Decoded::NeedMoreData);
    }

    #[test]
    fn padded_prefix_is_malformed() {
        let mut wire = vec![0x82, 0x00];
        wire.extend_from_slice(&[0x91, 0x06]);
        let err = decode_message(&wire, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLengthPrefix(_)));
    }

    #[test]
    fn oversized_payload_is_rejected_before_buffering() {
        let err = decode_message(&[0x80, 0x08], 512).unwrap_err();
        assert!(matches!(
            err,
            FrameError::PayloadTooLarge {
                size: 1024,
                max: 512
            }
        ));
    }

    #[test]
    fn garbage_body_is_invalid() {
        let err = decode_message(&raw_frame(&[0xC1]), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload(_)));

        let err = decode_message(&raw_frame(&[0x90]), DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload(_)));
    }
}
