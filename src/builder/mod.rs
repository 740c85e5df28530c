mod spill;

use crate::compression;
use crate::format::{self, BlockHandle, BlockTrailer, GlobalTrailer, Header, TRAILER_OFFSET_POS};
use crate::key::ByteKey;
use crate::varint;
use crate::{Error, Result};
use ahash::{AHashMap, AHashSet};
use spill::{SpillFile, ValuePos};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const DEFAULT_BLOCK_SIZE: u32 = 1024 * 1024; // 1 MiB.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Upper bound of the value section of a block. Every single entry has to fit in it.
    pub block_size: u32,
    /// Compress every value on its own with Snappy.
    pub compression: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            compression: true,
        }
    }
}

/// Writes a map file. Keys may be added in any order, they are staged in a spill file
/// next to the target and sorted by [`Builder::build`].
///
/// The target is never overwritten. A failed build leaves a partial file behind which
/// has to be discarded by the caller, the spill file is removed in any case.
#[derive(Debug)]
pub struct Builder {
    path: PathBuf,
    target: File,
    spill: SpillFile,
    seen: AHashSet<ByteKey>,
    options: WriteOptions,
}

impl Builder {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_options(path, WriteOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: WriteOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let target = File::options().write(true).create_new(true).open(&path)?;
        let spill = SpillFile::create(&path)?;

        info!(
            "building map {} with block size {} and compression {}",
            path.display(),
            options.block_size,
            if options.compression { "on" } else { "off" }
        );

        Ok(Self {
            path,
            target,
            spill,
            seen: AHashSet::new(),
            options,
        })
    }

    /// Stages the entry. A key that has already been added keeps its first value, the
    /// new one is dropped with a warning.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let key = ByteKey::copy_from_slice(key);
        if self.seen.contains(&key) {
            warn!("key {:?} has already been added, ignoring the new value", key);
            return Ok(());
        }

        self.spill.append(key.as_ref(), value)?;
        self.seen.insert(key);

        Ok(())
    }

    /// Number of distinct keys added so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn build(mut self) -> Result<()> {
        // Keys are read back from the spill, no need to hold two copies.
        self.seen = AHashSet::new();
        self.spill.finish()?;

        let mut positions: AHashMap<ByteKey, ValuePos> = AHashMap::new();
        for (key, pos) in self.spill.scan()? {
            if positions.contains_key(&key) {
                return Err(Error::DuplicateKey(key));
            }
            positions.insert(key, pos);
        }

        let mut entries: Vec<(ByteKey, ValuePos)> = positions.into_iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        debug!("sorted {} keys from the spill file", entries.len());

        let entry_count = u32::try_from(entries.len())
            .map_err(|_| Error::format(format!("{} entries do not fit a map", entries.len())))?;
        let header = Header::new(entry_count, self.options.block_size, self.options.compression);

        let mut packer = Packer::new(BufWriter::new(&self.target), self.options.block_size);
        let mut raw_header = Vec::with_capacity(format::HEADER_SIZE);
        header.encode(&mut raw_header);
        packer.write(&raw_header)?;

        for (key, pos) in entries {
            let value = self.spill.read_value(pos)?;
            let value = if self.options.compression {
                compression::compress(&value)?
            } else {
                value
            };
            packer.add(key, &value)?;
        }
        packer.finish_block()?;

        let trailer_offset = packer.pos;
        let blocks = GlobalTrailer(std::mem::take(&mut packer.blocks));
        let mut raw_trailer = Vec::new();
        blocks.encode(&mut raw_trailer)?;
        packer.write(&raw_trailer)?;
        packer.into_inner()?;

        self.target
            .write_all_at(&trailer_offset.to_be_bytes(), TRAILER_OFFSET_POS)?;
        self.target.sync_all()?;

        info!(
            "built map {} with {} entries in {} blocks, global trailer at {}",
            self.path.display(),
            entry_count,
            blocks.0.len(),
            trailer_offset
        );

        Ok(())
    }
}

/// Lays entries out into blocks, flushing a block's trailer once the next entry does not
/// fit into what is left of the budget.
struct Packer<W: Write> {
    out: W,
    pos: u64,
    block_size: u32,
    block_start: u64,
    remaining: u32,
    trailer: BlockTrailer,
    blocks: Vec<BlockHandle>,
    scratch: Vec<u8>,
}

impl<'a> Packer<BufWriter<&'a File>> {
    fn into_inner(self) -> Result<&'a File> {
        Ok(self.out.into_inner().map_err(|e| e.into_error())?)
    }
}

impl<W: Write> Packer<W> {
    fn new(out: W, block_size: u32) -> Self {
        Self {
            out,
            pos: 0,
            block_size,
            block_start: 0,
            remaining: 0,
            trailer: BlockTrailer::new(),
            blocks: Vec::new(),
            scratch: Vec::new(),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.out.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    fn add(&mut self, key: ByteKey, value: &[u8]) -> Result<()> {
        let value_len = u32::try_from(value.len()).map_err(|_| Error::BlockCapacity {
            key: key.clone(),
            size: value.len(),
            block_size: self.block_size,
        })?;

        let size = varint::size(value_len) + value.len();
        if size > self.block_size as usize {
            return Err(Error::BlockCapacity {
                key,
                size,
                block_size: self.block_size,
            });
        }
        if size > self.remaining as usize {
            self.finish_block()?;
        }
        if self.trailer.is_empty() {
            self.block_start = self.pos;
            self.remaining = self.block_size;
        }

        let offset = format::narrow(self.pos - self.block_start)?;
        self.scratch.clear();
        varint::encode(value_len, &mut self.scratch);
        self.scratch.extend_from_slice(value);
        self.out.write_all(&self.scratch)?;
        self.pos += self.scratch.len() as u64;

        self.trailer.push(key, offset);
        self.remaining -= size as u32;

        Ok(())
    }

    /// Writes the trailer of the current block, if the block holds anything.
    fn finish_block(&mut self) -> Result<()> {
        let Some(first_key) = self.trailer.first_key().cloned() else {
            return Ok(());
        };

        let trailer_start = self.pos;
        self.scratch.clear();
        self.trailer.encode(&mut self.scratch);
        self.out.write_all(&self.scratch)?;
        self.pos += self.scratch.len() as u64;

        debug!(
            "block #{} at {} holds {} entries, trailer at {}",
            self.blocks.len(),
            self.block_start,
            self.trailer.len(),
            trailer_start
        );

        self.trailer.clear();
        self.blocks.push(BlockHandle {
            start: self.block_start,
            trailer_start,
            first_key,
        });

        Ok(())
    }
}
