//! MessagePack field helpers shared by the codec and argument utilities.
//!
//! Readers take a `&mut &[u8]` cursor that is advanced past whatever they
//! consume, so callers can compute offsets into the original payload.

use std::fmt::Display;

use rmp::Marker;

use crate::error::{FrameError, Result};
use crate::message::Headers;

const NIL: u8 = 0xC0;

fn decode_error(field: &'static str, err: impl Display) -> FrameError {
    FrameError::InvalidPayload(format!("{field}: {err}"))
}

fn encode_error(err: impl Display) -> FrameError {
    FrameError::InvalidPayload(format!("encode failed: {err}"))
}

fn truncated(field: &'static str) -> FrameError {
    FrameError::InvalidPayload(format!("{field}: unexpected end of payload"))
}

fn wire_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

pub(crate) fn take<'a>(rd: &mut &'a [u8], len: usize, field: &'static str) -> Result<&'a [u8]> {
    if rd.len() < len {
        return Err(truncated(field));
    }
    let (head, tail) = rd.split_at(len);
    *rd = tail;
    Ok(head)
}

fn take_be(rd: &mut &[u8], width: usize, field: &'static str) -> Result<u64> {
    let bytes = take(rd, width, field)?;
    Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
}

pub(crate) fn read_array_len(rd: &mut &[u8]) -> Result<u32> {
    rmp::decode::read_array_len(rd).map_err(|err| decode_error("array header", err))
}

pub(crate) fn read_int(rd: &mut &[u8], field: &'static str) -> Result<i64> {
    rmp::decode::read_int::<i64, _>(rd).map_err(|err| decode_error(field, err))
}

pub(crate) fn read_bool(rd: &mut &[u8], field: &'static str) -> Result<bool> {
    rmp::decode::read_bool(rd).map_err(|err| decode_error(field, err))
}

pub(crate) fn read_str(rd: &mut &[u8], field: &'static str) -> Result<String> {
    let len = rmp::decode::read_str_len(rd).map_err(|err| decode_error(field, err))?;
    let bytes = take(rd, len as usize, field)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|err| decode_error(field, err))
}

/// Read a string that may be encoded as nil.
pub(crate) fn read_nullable_str(rd: &mut &[u8], field: &'static str) -> Result<Option<String>> {
    if rd.first() == Some(&NIL) {
        *rd = &rd[1..];
        return Ok(None);
    }
    read_str(rd, field).map(Some)
}

pub(crate) fn read_headers(rd: &mut &[u8]) -> Result<Headers> {
    let count = rmp::decode::read_map_len(rd).map_err(|err| decode_error("headers", err))?;
    let mut headers = Headers::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let key = read_str(rd, "header name")?;
        let value = read_str(rd, "header value")?;
        if headers.insert(key, value).is_some() {
            return Err(FrameError::InvalidPayload("duplicate header".to_string()));
        }
    }
    Ok(headers)
}

pub(crate) fn read_str_array(rd: &mut &[u8], field: &'static str) -> Result<Vec<String>> {
    let count = read_array_len(rd)?;
    let mut items = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        items.push(read_str(rd, field)?);
    }
    Ok(items)
}

/// Parse `bytes` as a string array that occupies the whole slice.
pub(crate) fn parse_str_array_exact(bytes: &[u8]) -> Option<Vec<String>> {
    let mut rd = bytes;
    let items = read_str_array(&mut rd, "stream id").ok()?;
    rd.is_empty().then_some(items)
}

/// Advance past exactly one MessagePack value of any type.
pub(crate) fn skip_value(rd: &mut &[u8]) -> Result<()> {
    const FIELD: &str = "value";
    let mut pending: u64 = 1;

    while pending > 0 {
        pending -= 1;
        let marker = Marker::from_u8(take(rd, 1, FIELD)?[0]);
        let skip = match marker {
            Marker::FixPos(_) | Marker::FixNeg(_) | Marker::Null | Marker::True | Marker::False => 0,
            Marker::U8 | Marker::I8 => 1,
            Marker::U16 | Marker::I16 => 2,
            Marker::U32 | Marker::I32 | Marker::F32 => 4,
            Marker::U64 | Marker::I64 | Marker::F64 => 8,
            Marker::FixStr(len) => usize::from(len),
            Marker::Str8 | Marker::Bin8 => take_be(rd, 1, FIELD)? as usize,
            Marker::Str16 | Marker::Bin16 => take_be(rd, 2, FIELD)? as usize,
            Marker::Str32 | Marker::Bin32 => take_be(rd, 4, FIELD)? as usize,
            Marker::FixArray(len) => {
                pending += u64::from(len);
                0
            }
            Marker::Array16 => {
                pending += take_be(rd, 2, FIELD)?;
                0
            }
            Marker::Array32 => {
                pending += take_be(rd, 4, FIELD)?;
                0
            }
            Marker::FixMap(len) => {
                pending += 2 * u64::from(len);
                0
            }
            Marker::Map16 => {
                pending += 2 * take_be(rd, 2, FIELD)?;
                0
            }
            Marker::Map32 => {
                pending += 2 * take_be(rd, 4, FIELD)?;
                0
            }
            // Extension types carry a one-byte type id before their data.
            Marker::FixExt1 => 2,
            Marker::FixExt2 => 3,
            Marker::FixExt4 => 5,
            Marker::FixExt8 => 9,
            Marker::FixExt16 => 17,
            Marker::Ext8 => 1 + take_be(rd, 1, FIELD)? as usize,
            Marker::Ext16 => 1 + take_be(rd, 2, FIELD)? as usize,
            Marker::Ext32 => 1 + take_be(rd, 4, FIELD)? as usize,
            Marker::Reserved => {
                return Err(FrameError::InvalidPayload(
                    "reserved MessagePack marker".to_string(),
                ))
            }
        };
        take(rd, skip, FIELD)?;
    }

    Ok(())
}

pub(crate) fn write_array_len(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    rmp::encode::write_array_len(buf, wire_len(len)?).map_err(encode_error)?;
    Ok(())
}

pub(crate) fn write_kind(buf: &mut Vec<u8>, tag: u8) -> Result<()> {
    rmp::encode::write_uint(buf, u64::from(tag)).map_err(encode_error)?;
    Ok(())
}

pub(crate) fn write_str(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    rmp::encode::write_str(buf, value).map_err(encode_error)
}

pub(crate) fn write_nullable_str(buf: &mut Vec<u8>, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => write_str(buf, value),
        None => rmp::encode::write_nil(buf).map_err(encode_error),
    }
}

pub(crate) fn write_bool(buf: &mut Vec<u8>, value: bool) -> Result<()> {
    rmp::encode::write_bool(buf, value).map_err(encode_error)
}

pub(crate) fn write_headers(buf: &mut Vec<u8>, headers: &Headers) -> Result<()> {
    rmp::encode::write_map_len(buf, wire_len(headers.len())?).map_err(encode_error)?;
    for (name, value) in headers {
        write_str(buf, name)?;
        write_str(buf, value)?;
    }
    Ok(())
}

pub(crate) fn write_str_array(buf: &mut Vec<u8>, items: &[String]) -> Result<()> {
    write_array_len(buf, items.len())?;
    for item in items {
        write_str(buf, item)?;
    }
    Ok(())
}
