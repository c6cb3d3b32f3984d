use bytes::Bytes;
use hubtunnel_frame::varint::write_length_prefix;
use hubtunnel_frame::{FrameError, MessageKind, MAX_PREFIX_LEN};

/// What the mock hub answers to an invocation that carries an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Raw MessagePack value returned to the caller.
    Result(Bytes),
    /// Completion without a value.
    Void,
    /// Completion carrying an error message.
    Error(String),
    /// Send nothing; the invocation stays pending on the client.
    Silent,
}

const RESULT_KIND_ERROR: u8 = 1;
const RESULT_KIND_VOID: u8 = 2;
const RESULT_KIND_VALUE: u8 = 3;

/// Encode a framed completion for `invocation_id`.
///
/// Returns `None` for [`Reply::Silent`].
pub fn encode_completion(invocation_id: &str, reply: &Reply) -> Result<Option<Vec<u8>>, FrameError> {
    let mut body = Vec::new();
    let fields = match reply {
        Reply::Silent => return Ok(None),
        Reply::Void => 4,
        Reply::Result(_) | Reply::Error(_) => 5,
    };

    rmp::encode::write_array_len(&mut body, fields).map_err(encode_error)?;
    rmp::encode::write_uint(&mut body, u64::from(MessageKind::Completion.tag())).map_err(encode_error)?;
    rmp::encode::write_map_len(&mut body, 0).map_err(encode_error)?;
    rmp::encode::write_str(&mut body, invocation_id).map_err(encode_error)?;
    match reply {
        Reply::Error(message) => {
            rmp::encode::write_uint(&mut body, u64::from(RESULT_KIND_ERROR)).map_err(encode_error)?;
            rmp::encode::write_str(&mut body, message).map_err(encode_error)?;
        }
        Reply::Void => {
            rmp::encode::write_uint(&mut body, u64::from(RESULT_KIND_VOID)).map_err(encode_error)?;
        }
        Reply::Result(value) => {
            rmp::encode::write_uint(&mut body, u64::from(RESULT_KIND_VALUE)).map_err(encode_error)?;
            body.extend_from_slice(value);
        }
        Reply::Silent => {}
    }

    let mut prefix = [0u8; MAX_PREFIX_LEN];
    let used = write_length_prefix(body.len(), &mut prefix)?;
    let mut frame = Vec::with_capacity(used + body.len());
    frame.extend_from_slice(&prefix[..used]);
    frame.extend_from_slice(&body);
    Ok(Some(frame))
}

fn encode_error(err: impl std::fmt::Display) -> FrameError {
    FrameError::InvalidPayload(format!("encode failed: {err}"))
}

#[cfg(test)]
mod tests {
    use hubtunnel_frame::{
        decode_message, CompletionOutcome, Decoded, HubMessage, DEFAULT_MAX_PAYLOAD,
    };

    use super::*;

    fn decode(frame: &[u8]) -> (String, CompletionOutcome) {
        match decode_message(frame, DEFAULT_MAX_PAYLOAD).unwrap() {
            Decoded::Message {
                message: HubMessage::Completion(completion),
                consumed,
            } => {
                assert_eq!(consumed, frame.len());
                (completion.invocation_id, completion.outcome)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn each_reply_decodes_as_completion() {
        let frame = encode_completion("7", &Reply::Result(Bytes::from_static(&[0xa2, b'h', b'i'])))
            .unwrap()
            .unwrap();
        assert_eq!(
            decode(&frame),
            ("7".to_string(), CompletionOutcome::Result(Bytes::from_static(&[0xa2, b'h', b'i'])))
        );

        let frame = encode_completion("8", &Reply::Void).unwrap().unwrap();
        assert_eq!(decode(&frame), ("8".to_string(), CompletionOutcome::Void));

        let frame = encode_completion("9", &Reply::Error("nope".into())).unwrap().unwrap();
        assert_eq!(
            decode(&frame),
            ("9".to_string(), CompletionOutcome::Error("nope".into()))
        );
    }

    #[test]
    fn silent_reply_writes_nothing() {
        assert_eq!(encode_completion("1", &Reply::Silent).unwrap(), None);
    }
}
