//! JSON ⇄ MessagePack conversion for command-line arguments and results.

use bytes::Bytes;
use serde_json::Value;

use crate::exit::{CliError, CliResult, USAGE};

/// Encode `--args` as a MessagePack argument array.
///
/// A JSON array supplies one argument per element; any other value is sent
/// as the only argument. No `--args` means no arguments.
pub fn encode_arguments(json: Option<&str>) -> CliResult<Bytes> {
    let arguments = match json {
        None => Vec::new(),
        Some(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(values)) => values,
            Ok(value) => vec![value],
            Err(err) => {
                return Err(CliError::new(USAGE, format!("--args is not valid JSON: {err}")));
            }
        },
    };
    rmp_serde::to_vec(&arguments)
        .map(Bytes::from)
        .map_err(|err| CliError::new(USAGE, format!("--args cannot be encoded: {err}")))
}

/// Render MessagePack as JSON. Values JSON cannot hold are summarized.
pub fn decode_value(raw: &[u8]) -> Value {
    rmp_serde::from_slice::<Value>(raw)
        .unwrap_or_else(|_| Value::String(format!("<msgpack {} bytes>", raw.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_spread_into_arguments() {
        let blob = encode_arguments(Some(r#"[1, "two"]"#)).unwrap();
        assert_eq!(blob.as_ref(), &[0x92, 0x01, 0xA3, b't', b'w', b'o']);
    }

    #[test]
    fn scalars_become_a_single_argument() {
        let blob = encode_arguments(Some("42")).unwrap();
        assert_eq!(blob.as_ref(), &[0x91, 0x2A]);
    }

    #[test]
    fn missing_args_encode_an_empty_array() {
        assert_eq!(encode_arguments(None).unwrap().as_ref(), &[0x90]);
    }

    #[test]
    fn invalid_json_is_a_usage_error() {
        let err = encode_arguments(Some("{nope")).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn decode_round_trips_json_values() {
        let blob = encode_arguments(Some(r#"[{"a": [true, null]}]"#)).unwrap();
        assert_eq!(decode_value(&blob), serde_json::json!([{"a": [true, null]}]));
        assert_eq!(decode_value(&[0xC4, 0x01, 0x00]), Value::String("<msgpack 3 bytes>".into()));
    }
}
