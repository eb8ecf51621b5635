//! Byte-order and string primitives
//!
//! Everything on the wire is network byte order (big-endian) regardless of
//! host endianness. Reads validate availability before touching the buffer,
//! so a short input surfaces as [`Error::Truncated`] instead of a panic.

use bytes::{Buf, BufMut};

use super::{Error, Result};

/// Copy granularity for long-string decode. A hostile length prefix is
/// rejected against the bytes actually available before any allocation, and
/// the payload is then materialized in bounded steps.
const LONG_STRING_CHUNK: usize = 1024;

fn ensure(buf: &impl Buf, needed: usize) -> Result<()> {
    let got = buf.remaining();
    if got < needed {
        return Err(Error::Truncated { needed, got });
    }
    Ok(())
}

/// Write an unsigned 8-bit integer.
pub fn write_u8(out: &mut impl BufMut, v: u8) {
    out.put_u8(v);
}

/// Read an unsigned 8-bit integer.
pub fn read_u8(buf: &mut impl Buf) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

/// Write an unsigned 16-bit integer in network order.
pub fn write_u16(out: &mut impl BufMut, v: u16) {
    out.put_u16(v);
}

/// Read an unsigned 16-bit integer in network order.
pub fn read_u16(buf: &mut impl Buf) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

/// Write an unsigned 32-bit integer in network order.
pub fn write_u32(out: &mut impl BufMut, v: u32) {
    out.put_u32(v);
}

/// Read an unsigned 32-bit integer in network order.
pub fn read_u32(buf: &mut impl Buf) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

/// Write an unsigned 64-bit integer in network order.
pub fn write_u64(out: &mut impl BufMut, v: u64) {
    out.put_u64(v);
}

/// Read an unsigned 64-bit integer in network order.
pub fn read_u64(buf: &mut impl Buf) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64())
}

/// Write a short string: one length byte followed by the raw bytes.
///
/// # Errors
///
/// Fails with [`Error::ShortStringTooLong`] for strings over 255 bytes.
pub fn write_short_string(out: &mut impl BufMut, s: &str) -> Result<()> {
    let len = s.len();
    if len > u8::MAX as usize {
        return Err(Error::ShortStringTooLong { len });
    }
    out.put_u8(len as u8);
    out.put_slice(s.as_bytes());
    Ok(())
}

/// Read a short string: one length byte followed by the raw bytes.
///
/// # Errors
///
/// Fails with [`Error::Truncated`] if the declared length cannot be fully
/// read, or [`Error::InvalidUtf8`] if the bytes are not valid UTF-8.
pub fn read_short_string(buf: &mut impl Buf) -> Result<String> {
    let len = read_u8(buf)? as usize;
    ensure(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    Ok(String::from_utf8(raw)?)
}

/// Write a long string: four-byte length prefix followed by the raw bytes.
pub fn write_long_string(out: &mut impl BufMut, s: &str) {
    out.put_u32(s.len() as u32);
    out.put_slice(s.as_bytes());
}

/// Read a long string: four-byte length prefix followed by the raw bytes.
///
/// The declared length is checked against the bytes available before any
/// allocation, then the payload is copied in bounded chunks.
pub fn read_long_string(buf: &mut impl Buf) -> Result<String> {
    let len = read_u32(buf)? as usize;
    ensure(buf, len)?;

    let mut raw = Vec::new();
    let mut copied = 0;
    let mut chunk = [0u8; LONG_STRING_CHUNK];
    while copied < len {
        let step = LONG_STRING_CHUNK.min(len - copied);
        buf.copy_to_slice(&mut chunk[..step]);
        raw.extend_from_slice(&chunk[..step]);
        copied += step;
    }
    Ok(String::from_utf8(raw)?)
}

/// Write a raw byte run with a four-byte length prefix.
pub fn write_long_bytes(out: &mut impl BufMut, b: &[u8]) {
    out.put_u32(b.len() as u32);
    out.put_slice(b);
}

/// Read a raw byte run with a four-byte length prefix.
pub fn read_long_bytes(buf: &mut impl Buf) -> Result<Vec<u8>> {
    let len = read_u32(buf)? as usize;
    ensure(buf, len)?;
    let mut raw = vec![0u8; len];
    buf.copy_to_slice(&mut raw);
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_big_endian() {
        let mut out = Vec::new();
        write_u16(&mut out, 0x0102);
        write_u32(&mut out, 0x0304_0506);
        write_u64(&mut out, 0x0708_090A_0B0C_0D0E);
        assert_eq!(
            out,
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E]
        );

        let mut buf = &out[..];
        assert_eq!(read_u16(&mut buf).unwrap(), 0x0102);
        assert_eq!(read_u32(&mut buf).unwrap(), 0x0304_0506);
        assert_eq!(read_u64(&mut buf).unwrap(), 0x0708_090A_0B0C_0D0E);
    }

    #[test]
    fn truncated_integer_read_fails() {
        let mut buf: &[u8] = &[0x01, 0x02, 0x03];
        let err = read_u32(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Truncated { needed: 4, got: 3 }));
    }

    #[test]
    fn short_string_roundtrip() {
        let mut out = Vec::new();
        write_short_string(&mut out, "vhost").unwrap();
        assert_eq!(out[0], 5);

        let mut buf = &out[..];
        assert_eq!(read_short_string(&mut buf).unwrap(), "vhost");
        assert!(buf.is_empty());
    }

    #[test]
    fn short_string_boundary() {
        let max = "x".repeat(255);
        let mut out = Vec::new();
        write_short_string(&mut out, &max).unwrap();
        assert_eq!(out.len(), 256);

        let over = "x".repeat(256);
        let err = write_short_string(&mut Vec::new(), &over).unwrap_err();
        assert!(matches!(err, Error::ShortStringTooLong { len: 256 }));
    }

    #[test]
    fn short_string_declared_past_end() {
        // Length byte claims 10 but only 3 bytes follow.
        let mut buf: &[u8] = &[10, b'a', b'b', b'c'];
        let err = read_short_string(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Truncated { needed: 10, got: 3 }));
    }

    #[test]
    fn long_string_roundtrip() {
        // Longer than one copy chunk to exercise the bounded loop.
        let s = "y".repeat(LONG_STRING_CHUNK * 3 + 17);
        let mut out = Vec::new();
        write_long_string(&mut out, &s);

        let mut buf = &out[..];
        assert_eq!(read_long_string(&mut buf).unwrap(), s);
    }

    #[test]
    fn long_string_declared_past_end() {
        let mut out = Vec::new();
        write_u32(&mut out, 1_000_000);
        out.extend_from_slice(b"short");

        let mut buf = &out[..];
        let err = read_long_string(&mut buf).unwrap_err();
        assert!(matches!(err, Error::Truncated { needed: 1_000_000, .. }));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut buf: &[u8] = &[2, 0xFF, 0xFE];
        assert!(matches!(
            read_short_string(&mut buf),
            Err(Error::InvalidUtf8(_))
        ));
    }
}
