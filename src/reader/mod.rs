mod index;
mod iter;

use crate::cache::BlockCache;
use crate::compression;
use crate::format::{GlobalTrailer, Header, HEADER_SIZE};
use crate::storage::MapFile;
use crate::varint;
use crate::{Error, Result};
use bytes::{Buf, Bytes};
use index::BlockIndex;
use std::path::Path;
use tracing::debug;

pub use iter::Iter;

pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Decode every block trailer into a hash map when opening.
    pub preload_offsets: bool,
    /// Map all blocks up front and keep them resident for the reader's lifetime.
    pub preload_values: bool,
    /// Number of mapped blocks kept around. Ignored with `preload_values`.
    pub block_cache_capacity: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            preload_offsets: false,
            preload_values: false,
            block_cache_capacity: DEFAULT_BLOCK_CACHE_CAPACITY,
        }
    }
}

impl ReadOptions {
    pub fn preload_offsets(mut self) -> Self {
        self.preload_offsets = true;
        self
    }

    pub fn preload_values(mut self) -> Self {
        self.preload_values = true;
        self
    }

    pub fn block_cache_capacity(mut self, capacity: usize) -> Self {
        self.block_cache_capacity = capacity;
        self
    }
}

/// Serves lookups from a finished map file. Blocks are memory mapped on demand and kept
/// in a block cache shared by all callers, so a reader can be used from many threads
/// through a plain reference.
#[derive(Debug)]
pub struct Reader {
    file: MapFile,
    header: Header,
    index: BlockIndex,
    cache: BlockCache,
}

impl Reader {
    pub fn open(path: impl AsRef<Path>, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref();
        let file = MapFile::open(path)?;

        let raw_header = file.read_exact_at(0, file.size().min(HEADER_SIZE as u64) as usize)?;
        let header = Header::decode(&raw_header)?;

        // The global trailer holds at least its block count.
        if header.trailer_offset < HEADER_SIZE as u64 || header.trailer_offset >= file.size() {
            return Err(Error::format(format!(
                "global trailer offset {} is out of the file of {} bytes",
                header.trailer_offset,
                file.size()
            )));
        }

        // One mapping covers everything after the header. Trailers, preloaded blocks
        // and first keys are views into it.
        let mapped = file.map_range(HEADER_SIZE as u64, file.size(), options.preload_values)?;
        let trailer = GlobalTrailer::decode(mapped.slice(header.trailer_offset, file.size())?)?;
        trailer.validate(header.trailer_offset)?;
        if trailer.0.is_empty() != (header.entry_count == 0) {
            return Err(Error::format(format!(
                "{} entries stored in {} blocks",
                header.entry_count,
                trailer.0.len()
            )));
        }

        let index = BlockIndex::load(
            &mapped,
            trailer,
            header.trailer_offset,
            options.preload_offsets,
        )?;

        let cache = if options.preload_values {
            let blocks = index
                .handles()
                .iter()
                .map(|h| Ok((h.first_key.clone(), mapped.slice(h.start, h.trailer_start)?)))
                .collect::<Result<Vec<_>>>()?;
            BlockCache::pinned(blocks)
        } else {
            BlockCache::new(options.block_cache_capacity)
        };

        debug!(
            "opened map {} with {} entries in {} blocks, {} of them cached{}{}",
            path.display(),
            header.entry_count,
            index.len(),
            cache.capacity(),
            if options.preload_offsets {
                ", offsets preloaded"
            } else {
                ""
            },
            if options.preload_values {
                ", values preloaded"
            } else {
                ""
            }
        );

        Ok(Self {
            file,
            header,
            index,
            cache,
        })
    }

    /// Number of entries in the map.
    pub fn size(&self) -> u32 {
        self.header.entry_count
    }

    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_compressed(&self) -> bool {
        self.header.compressed
    }

    pub fn block_size(&self) -> u32 {
        self.header.block_size
    }

    /// Looks the key up. Missing keys are `Ok(None)`, errors are reserved for broken
    /// files and failed I/O.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let Some(block) = self.index.locate(key) else {
            return Ok(None);
        };
        let Some(offset) = self.index.value_offset(block, key)? else {
            return Ok(None);
        };

        let region = self.block(block)?;
        self.read_value(&region, offset).map(Some)
    }

    /// Iterates over all entries in ascending key order.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self)
    }

    /// Releases the file and every mapped region held by the reader. Values handed out
    /// earlier stay valid.
    pub fn close(self) {
        debug!("closing map with {} cached blocks", self.cache.len());
    }

    fn block(&self, block: usize) -> Result<Bytes> {
        let handle = self.index.handle(block);
        self.cache.get_or_load(&handle.first_key, || {
            debug!("mapping block at {}", handle.start);
            Ok(self.file.map(handle.start, handle.data_len(), false)?)
        })
    }

    fn read_value(&self, region: &Bytes, offset: u32) -> Result<Bytes> {
        let offset = offset as usize;
        if offset >= region.len() {
            return Err(Error::format(format!(
                "value offset {} is out of the block of {} bytes",
                offset,
                region.len()
            )));
        }

        let mut raw = region.slice(offset..);
        let len = varint::decode(&mut raw)? as usize;
        if raw.remaining() < len {
            return Err(Error::format(format!(
                "value of {} bytes at {} is out of the block",
                len, offset
            )));
        }
        let value = raw.split_to(len);

        if self.header.compressed {
            Ok(Bytes::from(compression::decompress(&value)?))
        } else {
            Ok(value)
        }
    }
}

impl<'a> IntoIterator for &'a Reader {
    type Item = Result<(Bytes, Bytes)>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
