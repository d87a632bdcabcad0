//! Length-prefixed field framing.
//!
//! Every length prefix is an unsigned 32-bit big-endian integer, and every
//! read takes an explicit maximum. The limit is checked before any allocation
//! happens, so a peer cannot force unbounded memory use with a forged prefix.

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::CryptoError;

pub(crate) fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

pub(crate) fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_bytes(buf, s.as_bytes());
}

pub(crate) fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Read one length-prefixed field, refusing prefixes above `max`.
pub(crate) fn read_bytes(
    buf: &mut &[u8],
    step: &'static str,
    max: usize,
) -> Result<Vec<u8>, CryptoError> {
    let len = buf.read_u32::<BigEndian>().map_err(CryptoError::Io)? as usize;
    if len > max {
        return Err(CryptoError::SizeLimit {
            step,
            max,
            actual: len,
        });
    }
    let remaining = *buf;
    if remaining.len() < len {
        return Err(CryptoError::BadLength {
            step,
            expected: len,
            actual: remaining.len(),
        });
    }
    let (field, rest) = remaining.split_at(len);
    *buf = rest;
    Ok(field.to_vec())
}

pub(crate) fn read_str(
    buf: &mut &[u8],
    step: &'static str,
    max: usize,
) -> Result<String, CryptoError> {
    let raw = read_bytes(buf, step, max)?;
    String::from_utf8(raw).map_err(|_| CryptoError::BadFormat("string field is not valid UTF-8"))
}

pub(crate) fn read_u64(buf: &mut &[u8]) -> Result<u64, CryptoError> {
    buf.read_u64::<BigEndian>().map_err(CryptoError::Io)
}

/// Read exactly `N` bytes, without a length prefix.
pub(crate) fn read_array<const N: usize>(
    buf: &mut &[u8],
    step: &'static str,
) -> Result<[u8; N], CryptoError> {
    let remaining = *buf;
    if remaining.len() < N {
        return Err(CryptoError::BadLength {
            step,
            expected: N,
            actual: remaining.len(),
        });
    }
    let (field, rest) = remaining.split_at(N);
    let mut out = [0u8; N];
    out.copy_from_slice(field);
    *buf = rest;
    Ok(out)
}

/// Fail unless the decoder consumed the whole buffer.
pub(crate) fn expect_end(buf: &[u8], step: &'static str) -> Result<(), CryptoError> {
    if buf.is_empty() {
        Ok(())
    } else {
        Err(CryptoError::BadLength {
            step,
            expected: 0,
            actual: buf.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"some payload");
        write_str(&mut buf, "alice");
        write_u64(&mut buf, 0x0123_4567_89ab_cdef);

        let mut rd = &buf[..];
        assert_eq!(read_bytes(&mut rd, "payload", 64).unwrap(), b"some payload");
        assert_eq!(read_str(&mut rd, "username", 64).unwrap(), "alice");
        assert_eq!(read_u64(&mut rd).unwrap(), 0x0123_4567_89ab_cdef);
        expect_end(rd, "message").unwrap();
    }

    #[test]
    fn oversized_prefix_is_rejected_before_reading() {
        let mut buf = Vec::new();
        // Prefix claims 1 GiB; no such data follows.
        buf.extend_from_slice(&(1u32 << 30).to_be_bytes());
        let mut rd = &buf[..];
        match read_bytes(&mut rd, "payload", 4096) {
            Err(CryptoError::SizeLimit { max: 4096, actual, .. }) => {
                assert_eq!(actual, 1usize << 30)
            }
            other => panic!("expected SizeLimit, got {:?}", other),
        }
    }

    #[test]
    fn truncated_field() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"full field");
        buf.truncate(buf.len() - 3);
        let mut rd = &buf[..];
        match read_bytes(&mut rd, "payload", 64) {
            Err(CryptoError::BadLength { expected: 10, actual: 7, .. }) => (),
            other => panic!("expected BadLength, got {:?}", other),
        }
    }

    #[test]
    fn trailing_bytes_are_an_error() {
        let mut buf = Vec::new();
        write_str(&mut buf, "alice");
        buf.push(0xFF);
        let mut rd = &buf[..];
        read_str(&mut rd, "username", 64).unwrap();
        assert!(expect_end(rd, "message").is_err());
    }

    #[test]
    fn invalid_utf8_string() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &[0xC0, 0x80]);
        let mut rd = &buf[..];
        match read_str(&mut rd, "username", 64) {
            Err(CryptoError::BadFormat(_)) => (),
            other => panic!("expected BadFormat, got {:?}", other),
        }
    }
}
