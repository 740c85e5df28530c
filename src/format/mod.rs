pub mod trailer;

use crate::key::ByteKey;
use crate::varint;
use crate::{Error, Result};
use bytes::{Buf, BufMut, Bytes};

pub use trailer::{BlockTrailer, TrailerEntries};

/*
Map file layout schema. Header is the only fixed size section, everything else
is located through the global trailer offset stored in it.
-----------------------------------------------------------------------------------------------------
|  Header  |  Block #1  | Block trailer #1 | ... |  Block #N  | Block trailer #N |  Global trailer  |
-----------------------------------------------------------------------------------------------------
|   21B    |   values   |  keys + offsets  | ... |   values   |  keys + offsets  | blocks directory |
-----------------------------------------------------------------------------------------------------

Header layout.
-------------------------------------------------------------------------------------------
| Version (4B) | Entry count (4B) | Block size (4B) | Compression (1B) | Trailer offset (8B) |
-------------------------------------------------------------------------------------------

Block entry layout. Keys live in the block trailer, the block itself holds values only.
------------------------------------------
|          Entry #1          | ... |
------------------------------------------
| value_len (varint) | value | ... |
------------------------------------------

Global trailer layout.
------------------------------------------------------------------------------------------------------
| Block count (varint) |                               Entry #1                                | ... |
------------------------------------------------------------------------------------------------------
|                      | start (varint) | trailer start (varint) | key_len (varint) | first_key | ... |
------------------------------------------------------------------------------------------------------

Block trailer layout is given where BlockTrailer is defined. Fixed width integers are big endian.
*/

/// Has to be bumped on any incompatible layout change, readers refuse other versions.
pub const FORMAT_VERSION: u32 = 4;

pub const HEADER_SIZE: usize = 21;

/// Position of the global trailer offset inside the header. Builder patches it in place
/// once the body is written.
pub const TRAILER_OFFSET_POS: u64 = 13;

const COMPRESSION_OFF: u8 = 0;
const COMPRESSION_SNAPPY: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub entry_count: u32,
    pub block_size: u32,
    pub compressed: bool,
    pub trailer_offset: u64,
}

impl Header {
    pub fn new(entry_count: u32, block_size: u32, compressed: bool) -> Self {
        Self {
            version: FORMAT_VERSION,
            entry_count,
            block_size,
            compressed,
            trailer_offset: 0,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.version);
        buf.put_u32(self.entry_count);
        buf.put_u32(self.block_size);
        buf.put_u8(if self.compressed {
            COMPRESSION_SNAPPY
        } else {
            COMPRESSION_OFF
        });
        buf.put_u64(self.trailer_offset);
    }

    /// Decodes the header and checks its version. Nothing past the version is trusted
    /// when it does not match.
    pub fn decode(mut raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_SIZE {
            return Err(Error::format(format!(
                "header is {} bytes, expected {}",
                raw.len(),
                HEADER_SIZE
            )));
        }

        let version = raw.get_u32();
        if version != FORMAT_VERSION {
            return Err(Error::VersionMismatch {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        let entry_count = raw.get_u32();
        let block_size = raw.get_u32();
        let compressed = match raw.get_u8() {
            COMPRESSION_OFF => false,
            COMPRESSION_SNAPPY => true,
            flag => {
                return Err(Error::format(format!("unknown compression flag {}", flag)));
            }
        };
        let trailer_offset = raw.get_u64();

        Ok(Self {
            version,
            entry_count,
            block_size,
            compressed,
            trailer_offset,
        })
    }
}

/// Position of a single block and its trailer in the file along with the block's first key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHandle {
    pub start: u64,
    pub trailer_start: u64,
    pub first_key: ByteKey,
}

impl BlockHandle {
    /// Length of the value section of the block.
    pub fn data_len(&self) -> u64 {
        self.trailer_start - self.start
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalTrailer(pub Vec<BlockHandle>);

impl GlobalTrailer {
    /// Offsets are stored as varints, so the body of the file has to stay below 4 GiB.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<()> {
        varint::encode(self.0.len() as u32, buf);
        for handle in &self.0 {
            varint::encode(narrow(handle.start)?, buf);
            varint::encode(narrow(handle.trailer_start)?, buf);
            varint::encode(handle.first_key.len() as u32, buf);
            buf.put_slice(handle.first_key.as_ref());
        }

        Ok(())
    }

    /// Decodes the trailer from the rest of the file. Keys are sliced out of `raw`
    /// without copying.
    pub fn decode(mut raw: Bytes) -> Result<Self> {
        let count = varint::decode(&mut raw)? as usize;
        let mut handles = Vec::with_capacity(count.min(raw.remaining()));

        for _ in 0..count {
            let start = varint::decode(&mut raw)? as u64;
            let trailer_start = varint::decode(&mut raw)? as u64;
            let key_len = varint::decode(&mut raw)? as usize;
            if raw.remaining() < key_len {
                return Err(Error::format("global trailer is truncated"));
            }
            let first_key = ByteKey::new(raw.split_to(key_len));

            handles.push(BlockHandle {
                start,
                trailer_start,
                first_key,
            });
        }

        if raw.has_remaining() {
            return Err(Error::format(format!(
                "{} unexpected bytes after global trailer",
                raw.remaining()
            )));
        }

        Ok(Self(handles))
    }

    /// Checks that blocks and their trailers follow each other in the order they were
    /// written and all of them fit between the header and the global trailer.
    pub fn validate(&self, trailer_offset: u64) -> Result<()> {
        let mut min_start = HEADER_SIZE as u64;
        let mut prev_key: Option<&ByteKey> = None;

        for handle in &self.0 {
            if handle.start < min_start || handle.trailer_start <= handle.start {
                return Err(Error::format(format!(
                    "block at {} with trailer at {} is out of order",
                    handle.start, handle.trailer_start
                )));
            }
            if prev_key.is_some_and(|prev| prev >= &handle.first_key) {
                return Err(Error::format("first keys are not ascending"));
            }

            prev_key = Some(&handle.first_key);
            // A trailer holds at least its key count.
            min_start = handle.trailer_start + 1;
        }

        if min_start > trailer_offset {
            return Err(Error::format("block trailer overlaps global trailer"));
        }

        Ok(())
    }
}

pub(crate) fn narrow(offset: u64) -> Result<u32> {
    u32::try_from(offset)
        .map_err(|_| Error::format(format!("offset {} does not fit into a varint", offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(start: u64, trailer_start: u64, key: &'static [u8]) -> BlockHandle {
        BlockHandle {
            start,
            trailer_start,
            first_key: ByteKey::from(key),
        }
    }

    #[test]
    fn test_header_encode() {
        let mut header = Header::new(10, 1024, true);
        header.trailer_offset = 0x0102;

        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);
        assert_eq!(&buf[..4], &FORMAT_VERSION.to_be_bytes());
        assert_eq!(&buf[4..8], &10u32.to_be_bytes());
        assert_eq!(&buf[8..12], &1024u32.to_be_bytes());
        assert_eq!(buf[12], 1);
        assert_eq!(&buf[TRAILER_OFFSET_POS as usize..], &0x0102u64.to_be_bytes());

        assert_eq!(Header::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_version_mismatch() {
        let mut buf = Vec::new();
        Header::new(1, 1, false).encode(&mut buf);
        buf[..4].copy_from_slice(&3u32.to_be_bytes());

        match Header::decode(&buf) {
            Err(Error::VersionMismatch { found, expected }) => {
                assert_eq!(found, 3);
                assert_eq!(expected, FORMAT_VERSION);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_header_bad_compression_flag() {
        let mut buf = Vec::new();
        Header::new(1, 1, false).encode(&mut buf);
        buf[12] = 7;
        assert!(matches!(Header::decode(&buf), Err(Error::Format(_))));
    }

    #[test]
    fn test_header_truncated() {
        assert!(matches!(Header::decode(&[0; 20]), Err(Error::Format(_))));
    }

    #[test]
    fn test_global_trailer() {
        let trailer = GlobalTrailer(vec![handle(21, 31, b"a"), handle(44, 300, b"bb")]);

        let mut buf = Vec::new();
        trailer.encode(&mut buf).unwrap();
        assert_eq!(
            buf,
            vec![2, 21, 31, 1, b'a', 44, 0xac, 0x02, 2, b'b', b'b'],
            "count, then start, trailer start, key len and key of every block"
        );

        let decoded = GlobalTrailer::decode(Bytes::from(buf)).unwrap();
        assert_eq!(decoded, trailer);
    }

    #[test]
    fn test_global_trailer_truncated() {
        let raw = Bytes::from_static(&[2, 21, 31, 1, b'a', 44, 50, 4, b'b']);
        assert!(matches!(
            GlobalTrailer::decode(raw),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_global_trailer_offset_overflow() {
        let trailer = GlobalTrailer(vec![handle(1 << 32, (1 << 32) + 1, b"a")]);
        assert!(matches!(
            trailer.encode(&mut Vec::new()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_validate() {
        let trailer = GlobalTrailer(vec![handle(21, 31, b"a"), handle(44, 54, b"b")]);
        assert!(trailer.validate(67).is_ok());

        // Second block overlaps the first block's trailer.
        let trailer = GlobalTrailer(vec![handle(21, 31, b"a"), handle(30, 54, b"b")]);
        assert!(trailer.validate(67).is_err());

        // First keys must ascend.
        let trailer = GlobalTrailer(vec![handle(21, 31, b"b"), handle(44, 54, b"a")]);
        assert!(trailer.validate(67).is_err());

        // Last trailer runs into the global trailer.
        let trailer = GlobalTrailer(vec![handle(21, 31, b"a"), handle(44, 54, b"b")]);
        assert!(trailer.validate(54).is_err());

        assert!(GlobalTrailer::default().validate(21).is_ok());
    }
}
