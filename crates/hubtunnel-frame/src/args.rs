//! Helpers for raw argument blobs.
//!
//! An argument blob is a MessagePack array holding one encoded value per
//! parameter. The codec never looks inside; these helpers exist for callers
//! that need shallow structure (arity checks, picking one argument).

use bytes::Bytes;

use crate::error::{FrameError, Result};
use crate::wire;

/// The blob for a call without arguments.
pub const NO_ARGUMENTS: &[u8] = &[0x90];

/// Number of arguments in `blob`.
pub fn argument_count(blob: &[u8]) -> Result<u32> {
    let mut rd = blob;
    wire::read_array_len(&mut rd)
}

/// Slice out the `index`-th argument without copying.
pub fn nth_argument(blob: &Bytes, index: usize) -> Result<Option<Bytes>> {
    let mut rd: &[u8] = blob;
    let count = wire::read_array_len(&mut rd)? as usize;
    if index >= count {
        return Ok(None);
    }

    for _ in 0..index {
        wire::skip_value(&mut rd)?;
    }
    let start = blob.len() - rd.len();
    wire::skip_value(&mut rd)?;
    let end = blob.len() - rd.len();
    Ok(Some(blob.slice(start..end)))
}

/// Build a blob from already-encoded argument values.
pub fn encode_arguments<'a>(values: impl IntoIterator<Item = &'a [u8]>) -> Result<Bytes> {
    let values: Vec<&[u8]> = values.into_iter().collect();
    let mut buf = Vec::new();
    wire::write_array_len(&mut buf, values.len())?;
    for value in values {
        let mut rd = value;
        wire::skip_value(&mut rd)?;
        if !rd.is_empty() {
            return Err(FrameError::InvalidPayload(
                "argument is not a single MessagePack value".to_string(),
            ));
        }
        buf.extend_from_slice(value);
    }
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_and_pick_arguments() {
        let blob = encode_arguments([&[0x2A][..], &[0xA2, b'h', b'i'][..], &[0xC0][..]]).unwrap();
        assert_eq!(argument_count(&blob).unwrap(), 3);
        assert_eq!(nth_argument(&blob, 1).unwrap().unwrap().as_ref(), &[0xA2, b'h', b'i']);
        assert_eq!(nth_argument(&blob, 2).unwrap().unwrap().as_ref(), &[0xC0]);
        assert_eq!(nth_argument(&blob, 3).unwrap(), None);
    }

    #[test]
    fn empty_blob_constant_has_no_arguments() {
        assert_eq!(argument_count(NO_ARGUMENTS).unwrap(), 0);
    }

    #[test]
    fn non_array_blob_is_rejected() {
        assert!(argument_count(&[0xA1, b'x']).is_err());
    }

    #[test]
    fn encode_rejects_trailing_bytes() {
        let err = encode_arguments([&[0x01, 0x02][..]]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidPayload(_)));
    }
}
