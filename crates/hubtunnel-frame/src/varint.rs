//! Base-128 length prefix.
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────┐
//! │ Length (1-5B, LE base-128)   │ Payload (Length B)   │
//! │ bit 7 set = more bytes follow│ MessagePack array    │
//! └──────────────────────────────┴──────────────────────┘
//! ```

use crate::error::{FrameError, Result};

/// Longest permitted length prefix.
pub const MAX_PREFIX_LEN: usize = 5;

/// Largest payload a prefix can describe (the 5th byte carries 3 bits).
pub const MAX_ENCODABLE_LEN: usize = i32::MAX as usize;

/// Decoded length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthPrefix {
    /// Number of bytes the prefix itself occupies.
    pub prefix_len: usize,
    /// Number of payload bytes that follow the prefix.
    pub payload_len: usize,
}

impl LengthPrefix {
    /// Total frame size: prefix plus payload.
    pub fn frame_len(&self) -> usize {
        self.prefix_len + self.payload_len
    }
}

/// Read a length prefix from the start of `src`.
///
/// Returns `Ok(None)` if the prefix is not terminated within the available
/// bytes (and fewer than [`MAX_PREFIX_LEN`] bytes were available).
pub fn read_length_prefix(src: &[u8]) -> Result<Option<LengthPrefix>> {
    let mut length: u32 = 0;

    for (index, &byte) in src.iter().take(MAX_PREFIX_LEN).enumerate() {
        if index == MAX_PREFIX_LEN - 1 && byte > 0x07 {
            return Err(FrameError::InvalidLengthPrefix(
                "fifth prefix byte exceeds 0x07",
            ));
        }

        length |= u32::from(byte & 0x7F) << (7 * index);

        if byte & 0x80 == 0 {
            if index > 0 && byte == 0 {
                return Err(FrameError::InvalidLengthPrefix("non-minimal encoding"));
            }
            return Ok(Some(LengthPrefix {
                prefix_len: index + 1,
                payload_len: length as usize,
            }));
        }
    }

    Ok(None)
}

/// Write the minimal prefix for `len` into `dst`, returning the bytes used.
pub fn write_length_prefix(len: usize, dst: &mut [u8; MAX_PREFIX_LEN]) -> Result<usize> {
    if len > MAX_ENCODABLE_LEN {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: MAX_ENCODABLE_LEN,
        });
    }

    let mut remaining = len;
    let mut used = 0;
    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        dst[used] = byte;
        used += 1;
        if remaining == 0 {
            return Ok(used);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(len: usize) -> Vec<u8> {
        let mut buf = [0u8; MAX_PREFIX_LEN];
        let used = write_length_prefix(len, &mut buf).unwrap();
        buf[..used].to_vec()
    }

    #[test]
    fn boundaries_use_minimal_width() {
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(127), vec![0x7F]);
        assert_eq!(encode(128), vec![0x80, 0x01]);
        assert_eq!(encode(16_383), vec![0xFF, 0x7F]);
        assert_eq!(encode(16_384), vec![0x80, 0x80, 0x01]);
        assert_eq!(encode(MAX_ENCODABLE_LEN), vec![0xFF, 0xFF, 0xFF, 0xFF, 0x07]);
    }

    #[test]
    fn read_back_written_prefixes() {
        for len in [0usize, 1, 127, 128, 300, 65_535, 1 << 21, MAX_ENCODABLE_LEN] {
            let bytes = encode(len);
            let prefix = read_length_prefix(&bytes).unwrap().unwrap();
            assert_eq!(prefix.payload_len, len);
            assert_eq!(prefix.prefix_len, bytes.len());
        }
    }

    #[test]
    fn unterminated_prefix_needs_more_data() {
        assert_eq!(read_length_prefix(&[]).unwrap(), None);
        assert_eq!(read_length_prefix(&[0x80]).unwrap(), None);
        assert_eq!(read_length_prefix(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap(), None);
    }

    #[test]
    fn fifth_byte_over_seven_is_malformed() {
        let err = read_length_prefix(&[0xFF, 0xFF, 0xFF, 0xFF, 0x08]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLengthPrefix(_)));

        let err = read_length_prefix(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLengthPrefix(_)));
    }

    #[test]
    fn padded_prefix_is_malformed() {
        let err = read_length_prefix(&[0x85, 0x00]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLengthPrefix("non-minimal encoding")));

        let err = read_length_prefix(&[0x80, 0x80, 0x00]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLengthPrefix(_)));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = [0u8; MAX_PREFIX_LEN];
        let err = write_length_prefix(MAX_ENCODABLE_LEN + 1, &mut buf).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }
}
