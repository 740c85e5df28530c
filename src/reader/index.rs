use crate::format::{BlockHandle, GlobalTrailer, TrailerEntries};
use crate::key;
use crate::storage::MappedRange;
use crate::Result;
use ahash::AHashMap;
use bytes::Bytes;
use std::cmp::Ordering;

/// Block trailer decoded up front. Both tables hold views into the mapped trailer, key
/// bytes are never copied. The map serves lookups, the vector keeps the stored order
/// for iteration.
#[derive(Debug)]
struct DecodedTrailer {
    offsets: AHashMap<Bytes, u32>,
    order: Vec<(Bytes, u32)>,
}

/// How value offsets are resolved inside a block. Chosen once when the map is opened.
#[derive(Debug)]
enum KeyLookup {
    /// Raw trailer regions, scanned linearly on every lookup.
    Scan(Vec<Bytes>),
    /// Trailers decoded into hash maps.
    Preloaded(Vec<DecodedTrailer>),
}

/// Sorted first keys of all blocks along with the way to find keys within a block.
#[derive(Debug)]
pub(crate) struct BlockIndex {
    handles: Vec<BlockHandle>,
    lookup: KeyLookup,
}

impl BlockIndex {
    /// Builds the index from a validated global trailer. A block trailer spans up to the
    /// start of the next block, the last one up to the global trailer. Trailers are
    /// sliced out of `body`, the mapped part of the file holding all the blocks.
    pub fn load(
        body: &MappedRange,
        trailer: GlobalTrailer,
        trailer_offset: u64,
        preload: bool,
    ) -> Result<Self> {
        let handles = trailer.0;
        let ends = handles
            .iter()
            .skip(1)
            .map(|h| h.start)
            .chain(std::iter::once(trailer_offset));

        let regions = handles
            .iter()
            .zip(ends)
            .map(|(h, end)| Ok(body.slice(h.trailer_start, end)?))
            .collect::<Result<Vec<Bytes>>>()?;

        let lookup = if preload {
            let trailers = regions
                .into_iter()
                .map(|raw| {
                    let order = TrailerEntries::new(raw)?.collect::<Result<Vec<_>>>()?;
                    let offsets = order.iter().cloned().collect();
                    Ok(DecodedTrailer { offsets, order })
                })
                .collect::<Result<Vec<_>>>()?;
            KeyLookup::Preloaded(trailers)
        } else {
            KeyLookup::Scan(regions)
        };

        Ok(Self { handles, lookup })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn handle(&self, block: usize) -> &BlockHandle {
        &self.handles[block]
    }

    pub fn handles(&self) -> &[BlockHandle] {
        &self.handles
    }

    /// Block whose first key is the greatest one not above `key`. Keys below the first
    /// key of the map have no block.
    pub fn locate(&self, key: &[u8]) -> Option<usize> {
        let idx = self
            .handles
            .partition_point(|h| key::compare(h.first_key.as_ref(), key) != Ordering::Greater);
        idx.checked_sub(1)
    }

    /// Offset of the key's value inside the block. Only this block is consulted.
    pub fn value_offset(&self, block: usize, key: &[u8]) -> Result<Option<u32>> {
        match &self.lookup {
            KeyLookup::Scan(regions) => TrailerEntries::new(regions[block].clone())?.find(key),
            KeyLookup::Preloaded(trailers) => Ok(trailers[block].offsets.get(key).copied()),
        }
    }

    /// Keys of the block in the order they are stored.
    pub fn entries(&self, block: usize) -> Result<BlockEntries<'_>> {
        match &self.lookup {
            KeyLookup::Scan(regions) => Ok(BlockEntries::Scan(TrailerEntries::new(
                regions[block].clone(),
            )?)),
            KeyLookup::Preloaded(trailers) => Ok(BlockEntries::Preloaded(trailers[block].order.iter())),
        }
    }
}

pub(crate) enum BlockEntries<'a> {
    Scan(TrailerEntries),
    Preloaded(std::slice::Iter<'a, (Bytes, u32)>),
}

impl Iterator for BlockEntries<'_> {
    type Item = Result<(Bytes, u32)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            BlockEntries::Scan(entries) => entries.next(),
            BlockEntries::Preloaded(entries) => entries.next().cloned().map(Ok),
        }
    }
}
