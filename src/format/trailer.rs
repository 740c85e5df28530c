use crate::key::ByteKey;
use crate::varint;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes};

/*
Block trailer layout. Keys are kept in the order they were put into the block,
which is ascending.
-------------------------------------------------------------------------------------------
| Key count (varint) |                          Entry #1                          | ... |
-------------------------------------------------------------------------------------------
|                    | key_len (varint) | key | value offset in block (varint)  | ... |
-------------------------------------------------------------------------------------------
*/

/// Keys of a block being packed together with offsets of their values inside the block.
#[derive(Debug, Default)]
pub struct BlockTrailer {
    entries: Vec<(ByteKey, u32)>,
}

impl BlockTrailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: ByteKey, value_offset: u32) {
        self.entries.push((key, value_offset));
    }

    pub fn first_key(&self) -> Option<&ByteKey> {
        self.entries.first().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact byte size of the encoded trailer.
    pub fn encoded_len(&self) -> usize {
        varint::size(self.entries.len() as u32)
            + self
                .entries
                .iter()
                .map(|(key, offset)| {
                    varint::size(key.len() as u32) + key.len() + varint::size(*offset)
                })
                .sum::<usize>()
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        varint::encode(self.entries.len() as u32, buf);
        for (key, offset) in &self.entries {
            varint::encode(key.len() as u32, buf);
            buf.put_slice(key.as_ref());
            varint::encode(*offset, buf);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Walks over an encoded block trailer. Keys are slices of the trailer region, so nothing
/// gets copied while scanning.
#[derive(Debug, Clone)]
pub struct TrailerEntries {
    raw: Bytes,
    remaining: usize,
}

impl TrailerEntries {
    pub fn new(mut raw: Bytes) -> Result<Self> {
        let remaining = varint::decode(&mut raw)? as usize;
        Ok(Self { raw, remaining })
    }

    /// Number of keys left to visit.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    fn read_entry(&mut self) -> Result<(Bytes, u32)> {
        let key_len = varint::decode(&mut self.raw)? as usize;
        if self.raw.remaining() < key_len {
            return Err(Error::format("block trailer is truncated"));
        }
        let key = self.raw.split_to(key_len);
        let offset = varint::decode(&mut self.raw)?;

        Ok((key, offset))
    }

    /// Linear scan for the key's value offset.
    pub fn find(mut self, key: &[u8]) -> Result<Option<u32>> {
        while let Some(entry) = self.next() {
            let (entry_key, offset) = entry?;
            if entry_key == key {
                return Ok(Some(offset));
            }
        }

        Ok(None)
    }
}

impl Iterator for TrailerEntries {
    type Item = Result<(Bytes, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        match self.read_entry() {
            Ok(entry) => {
                self.remaining -= 1;
                Some(Ok(entry))
            }
            Err(e) => {
                // Nothing after a broken entry can be trusted.
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_trailer() -> BlockTrailer {
        let mut trailer = BlockTrailer::new();
        trailer.push(ByteKey::from(&b"b"[..]), 0);
        trailer.push(ByteKey::from(&b"aa"[..]), 5);
        trailer.push(ByteKey::from(&b"zz"[..]), 200);
        trailer
    }

    #[test]
    fn test_encode() {
        let trailer = make_trailer();
        let mut buf = Vec::new();
        trailer.encode(&mut buf);

        assert_eq!(
            buf,
            vec![3, 1, b'b', 0, 2, b'a', b'a', 5, 2, b'z', b'z', 0xc8, 0x01]
        );
        assert_eq!(trailer.encoded_len(), buf.len());
        assert_eq!(trailer.first_key(), Some(&ByteKey::from(&b"b"[..])));
    }

    #[test]
    fn test_entries() {
        let mut buf = Vec::new();
        make_trailer().encode(&mut buf);

        let entries = TrailerEntries::new(Bytes::from(buf)).unwrap();
        assert_eq!(entries.remaining(), 3);

        let decoded: Vec<(Bytes, u32)> = entries.collect::<Result<_>>().unwrap();
        assert_eq!(
            decoded,
            vec![
                (Bytes::from("b"), 0),
                (Bytes::from("aa"), 5),
                (Bytes::from("zz"), 200),
            ]
        );
    }

    #[test]
    fn test_find() {
        let mut buf = Vec::new();
        make_trailer().encode(&mut buf);
        let raw = Bytes::from(buf);

        let entries = TrailerEntries::new(raw.clone()).unwrap();
        assert_eq!(entries.find(b"zz").unwrap(), Some(200));

        let entries = TrailerEntries::new(raw).unwrap();
        assert_eq!(entries.find(b"a").unwrap(), None);
    }

    #[test]
    fn test_truncated() {
        // Claims two entries but the second key is cut off.
        let raw = Bytes::from_static(&[2, 1, b'b', 0, 3, b'a']);
        let mut entries = TrailerEntries::new(raw.clone()).unwrap();
        assert!(entries.next().unwrap().is_ok());
        assert!(matches!(entries.next(), Some(Err(Error::Format(_)))));
        assert!(entries.next().is_none());

        let entries = TrailerEntries::new(raw).unwrap();
        assert!(matches!(entries.find(b"aaa"), Err(Error::Format(_))));
    }

    #[test]
    fn test_clear() {
        let mut trailer = make_trailer();
        assert_eq!(trailer.len(), 3);
        trailer.clear();
        assert!(trailer.is_empty());
        assert_eq!(trailer.encoded_len(), 1);
    }
}
