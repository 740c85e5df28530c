use crate::{Error, Result};
use bytes::{Buf, BufMut};

/*
Varint layout schema. Seven payload bits per byte, lowest group first.
-----------------------------------------------------------
|   Byte #1    |   Byte #2    | ... |       Byte #N       |
-----------------------------------------------------------
| 1 | bits 0-6 | 1 | bits 7-13| ... | 0 | remaining bits  |
-----------------------------------------------------------
*/

/// A u32 never needs more than five groups of seven bits.
pub const MAX_LEN: usize = 5;

const PAYLOAD_MASK: u8 = 0x7f;
const CONTINUATION: u8 = 0x80;

/// Number of bytes `encode` writes for the value.
pub fn size(mut value: u32) -> usize {
    let mut len = 1;
    while value > PAYLOAD_MASK as u32 {
        value >>= 7;
        len += 1;
    }
    len
}

pub fn encode(mut value: u32, buf: &mut impl BufMut) {
    while value > PAYLOAD_MASK as u32 {
        buf.put_u8((value as u8 & PAYLOAD_MASK) | CONTINUATION);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

pub fn decode(buf: &mut impl Buf) -> Result<u32> {
    let mut value: u32 = 0;

    for i in 0..MAX_LEN {
        if !buf.has_remaining() {
            return Err(Error::format("varint is truncated"));
        }

        let byte = buf.get_u8();
        let payload = (byte & PAYLOAD_MASK) as u32;

        // The last group has room for four bits only.
        if i == MAX_LEN - 1 && payload > 0x0f {
            return Err(Error::format("varint overflows u32"));
        }

        value |= payload << (7 * i);
        if byte & CONTINUATION == 0 {
            return Ok(value);
        }
    }

    Err(Error::format("varint is longer than 5 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(value: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        encode(value, &mut buf);
        buf
    }

    #[test]
    fn test_size() {
        assert_eq!(size(0), 1);
        assert_eq!(size(127), 1);
        assert_eq!(size(128), 2);
        assert_eq!(size(16_383), 2);
        assert_eq!(size(16_384), 3);
        assert_eq!(size(2_097_152), 4);
        assert_eq!(size(268_435_456), 5);
        assert_eq!(size(u32::MAX), 5);
    }

    #[test]
    fn test_size_matches_encoded_len() {
        for value in [0, 1, 127, 128, 300, 65_535, 1 << 21, 1 << 28, u32::MAX] {
            assert_eq!(encoded(value).len(), size(value), "value {}", value);
        }
    }

    #[test]
    fn test_encode() {
        assert_eq!(encoded(0), vec![0x00]);
        assert_eq!(encoded(1), vec![0x01]);
        assert_eq!(encoded(127), vec![0x7f]);
        assert_eq!(encoded(128), vec![0x80, 0x01]);
        assert_eq!(encoded(300), vec![0xac, 0x02]);
        assert_eq!(encoded(u32::MAX), vec![0xff, 0xff, 0xff, 0xff, 0x0f]);
    }

    #[test]
    fn test_decode() {
        let mut raw: &[u8] = &[0xac, 0x02, 0x7f, 0xff, 0xff, 0xff, 0xff, 0x0f];
        assert_eq!(decode(&mut raw).unwrap(), 300);
        assert_eq!(decode(&mut raw).unwrap(), 127);
        assert_eq!(decode(&mut raw).unwrap(), u32::MAX);
        assert!(raw.is_empty());
    }

    #[test]
    fn test_decode_too_long() {
        let mut raw: &[u8] = &[0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(matches!(decode(&mut raw), Err(Error::Format(_))));
    }

    #[test]
    fn test_decode_overflow() {
        let mut raw: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0x1f];
        assert!(matches!(decode(&mut raw), Err(Error::Format(_))));
    }

    #[test]
    fn test_decode_truncated() {
        let mut raw: &[u8] = &[0x80, 0x80];
        assert!(matches!(decode(&mut raw), Err(Error::Format(_))));

        let mut raw: &[u8] = &[];
        assert!(matches!(decode(&mut raw), Err(Error::Format(_))));
    }
}
