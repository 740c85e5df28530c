use super::index::BlockEntries;
use super::Reader;
use crate::Result;
use bytes::Bytes;

/// Single pass over the entries of a map in ascending key order. Blocks are visited in
/// index order and values are read straight from the block region, which is fetched
/// once per block through the block cache.
///
/// The first error ends the iteration.
pub struct Iter<'a> {
    reader: &'a Reader,
    next_block: usize,
    current: Option<(Bytes, BlockEntries<'a>)>,
    done: bool,
}

impl<'a> Iter<'a> {
    pub(super) fn new(reader: &'a Reader) -> Self {
        Self {
            reader,
            next_block: 0,
            current: None,
            done: false,
        }
    }

    fn open_block(&mut self) -> Result<bool> {
        if self.next_block >= self.reader.index.len() {
            return Ok(false);
        }

        let region = self.reader.block(self.next_block)?;
        let entries = self.reader.index.entries(self.next_block)?;
        self.next_block += 1;
        self.current = Some((region, entries));

        Ok(true)
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<(Bytes, Bytes)>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader;

        while !self.done {
            let entry = match self.current.as_mut() {
                Some((region, entries)) => entries.next().map(|entry| -> Result<(Bytes, Bytes)> {
                    let (key, offset) = entry?;
                    Ok((key, reader.read_value(region, offset)?))
                }),
                None => match self.open_block() {
                    Ok(true) => continue,
                    Ok(false) => {
                        self.done = true;
                        return None;
                    }
                    Err(e) => Some(Err(e)),
                },
            };

            match entry {
                Some(Ok(entry)) => return Some(Ok(entry)),
                Some(Err(e)) => {
                    self.done = true;
                    self.current = None;
                    return Some(Err(e));
                }
                // Block is exhausted.
                None => self.current = None,
            }
        }

        None
    }
}
