//! Primitive encoders and bounds-checked decoders
//!
//! All integers are little-endian. Strings and byte strings carry a u32
//! length prefix.

use crate::error::{Result, WireError};
use bytes::{Buf, BufMut, Bytes};

/// Fail with `BufferUnderflow` unless `needed` bytes remain.
pub fn ensure<B: Buf>(buf: &B, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(WireError::BufferUnderflow {
            needed,
            have: buf.remaining(),
        });
    }
    Ok(())
}

pub fn get_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

pub fn get_u32<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

pub fn get_i64<B: Buf>(buf: &mut B) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64_le())
}

pub fn get_f64<B: Buf>(buf: &mut B) -> Result<f64> {
    ensure(buf, 8)?;
    Ok(buf.get_f64_le())
}

pub fn put_str<B: BufMut>(buf: &mut B, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

pub fn get_str<B: Buf>(buf: &mut B) -> Result<String> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

pub fn put_bytes<B: BufMut>(buf: &mut B, value: &[u8]) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value);
}

pub fn get_bytes<B: Buf>(buf: &mut B) -> Result<Bytes> {
    let len = get_u32(buf)? as usize;
    ensure(buf, len)?;
    Ok(buf.copy_to_bytes(len))
}

pub fn put_opt_str<B: BufMut>(buf: &mut B, value: Option<&str>) {
    match value {
        Some(s) => {
            buf.put_u8(1);
            put_str(buf, s);
        }
        None => buf.put_u8(0),
    }
}

pub fn get_opt_str<B: Buf>(buf: &mut B) -> Result<Option<String>> {
    match get_u8(buf)? {
        0 => Ok(None),
        1 => Ok(Some(get_str(buf)?)),
        other => Err(WireError::Malformed(format!(
            "invalid option marker 0x{other:02x}"
        ))),
    }
}

pub fn put_str_list<B: BufMut>(buf: &mut B, values: &[String]) {
    buf.put_u32_le(values.len() as u32);
    for value in values {
        put_str(buf, value);
    }
}

pub fn get_str_list<B: Buf>(buf: &mut B) -> Result<Vec<String>> {
    let count = get_u32(buf)? as usize;
    // Every string needs at least its length prefix.
    ensure(buf, count.saturating_mul(4))?;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(get_str(buf)?);
    }
    Ok(values)
}

/// Fail unless the buffer has been fully consumed.
pub fn finish<B: Buf>(buf: &B) -> Result<()> {
    if buf.has_remaining() {
        return Err(WireError::TrailingBytes(buf.remaining()));
    }
    Ok(())
}
