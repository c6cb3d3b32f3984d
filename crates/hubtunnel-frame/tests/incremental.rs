use bytes::{Bytes, BytesMut};
use hubtunnel_frame::{
    decode_message, encode_message, CancelInvocationMessage, CloseMessage, Decoded, Headers,
    HubMessage, InvocationMessage, DEFAULT_MAX_PAYLOAD,
};
use proptest::collection::{hash_map, vec};
use proptest::prelude::*;

fn headers() -> impl Strategy<Value = Headers> {
    hash_map("[a-z]{1,8}", "[ -~]{0,16}", 0..4).prop_map(|map| map.into_iter().collect())
}

/// A MessagePack array of small positive integers.
fn arguments() -> impl Strategy<Value = Bytes> {
    vec(0u8..0x80, 0..15).prop_map(|values| {
        let mut blob = vec![0x90 | values.len() as u8];
        blob.extend(values);
        Bytes::from(blob)
    })
}

fn message() -> impl Strategy<Value = HubMessage> {
    prop_oneof![
        Just(HubMessage::Ping),
        (proptest::option::of("[a-z]{1,24}"), any::<bool>()).prop_map(
            |(error, allow_reconnect)| HubMessage::Close(CloseMessage {
                error,
                allow_reconnect,
            })
        ),
        (headers(), "[0-9]{1,6}").prop_map(|(headers, invocation_id)| {
            HubMessage::CancelInvocation(CancelInvocationMessage {
                headers,
                invocation_id,
            })
        }),
        (
            headers(),
            proptest::option::of("[0-9]{1,6}"),
            "[A-Za-z]{1,16}",
            arguments(),
            vec("[a-z0-9]{1,6}", 0..3),
        )
            .prop_map(|(headers, invocation_id, target, arguments, stream_ids)| {
                HubMessage::Invocation(InvocationMessage {
                    headers,
                    invocation_id,
                    target,
                    arguments,
                    stream_ids,
                })
            }),
    ]
}

fn encode(message: &HubMessage) -> Vec<u8> {
    let mut wire = BytesMut::new();
    encode_message(message, &mut wire).unwrap();
    wire.to_vec()
}

proptest! {
    #[test]
    fn split_feed_matches_whole_feed(message in message(), split in any::<prop::sample::Index>()) {
        let wire = encode(&message);
        let at = split.index(wire.len());

        let partial = decode_message(&wire[..at], DEFAULT_MAX_PAYLOAD).unwrap();
        prop_assert_eq!(partial, Decoded::NeedMoreData);

        let mut buffer = wire[..at].to_vec();
        buffer.extend_from_slice(&wire[at..]);
        let whole = decode_message(&buffer, DEFAULT_MAX_PAYLOAD).unwrap();
        prop_assert_eq!(
            whole,
            Decoded::Message { message, consumed: wire.len() }
        );
    }

    #[test]
    fn back_to_back_frames_decode_in_order(messages in vec(message(), 1..6)) {
        let mut wire = Vec::new();
        for message in &messages {
            wire.extend(encode(message));
        }

        let mut offset = 0;
        for expected in messages {
            match decode_message(&wire[offset..], DEFAULT_MAX_PAYLOAD).unwrap() {
                Decoded::Message { message, consumed } => {
                    prop_assert_eq!(message, expected);
                    offset += consumed;
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
        prop_assert_eq!(offset, wire.len());
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in vec(any::<u8>(), 0..64)) {
        let _ = decode_message(&bytes, DEFAULT_MAX_PAYLOAD);
    }
}
