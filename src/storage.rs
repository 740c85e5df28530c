use bytes::Bytes;
use memmap2::MmapOptions;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Read only handle of a finished map file. The descriptor is closed and every
/// mapping made through it stays valid on its own after the handle is dropped.
#[derive(Debug)]
pub struct MapFile {
    file: File,
    size: u64,
}

impl MapFile {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::options().read(true).write(false).open(path)?;
        let size = file.metadata()?.len();
        Ok(MapFile { file, size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Reads exactly `len` bytes at the given position.
    pub fn read_exact_at(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        self.check_range(offset, len as u64)?;

        let mut data = vec![0; len];
        self.file.read_exact_at(&mut data, offset)?;

        Ok(Bytes::from(data))
    }

    /// Maps the region read only. With `populate` the pages are read ahead so the
    /// region is resident before it is first touched.
    pub fn map(&self, offset: u64, len: u64, populate: bool) -> io::Result<Bytes> {
        self.check_range(offset, len)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let mut options = MmapOptions::new();
        options.offset(offset).len(len as usize);
        if populate {
            options.populate();
        }

        // SAFETY: map files are never modified once built and the mapping is read only.
        // Truncating the file from another process while it is mapped is not supported.
        let mmap = unsafe { options.map(&self.file)? };

        Ok(Bytes::from_owner(mmap))
    }

    /// Maps `[start, end)` as a single region which is then sliced by absolute file
    /// offsets. Parts of the file needed for the reader's whole lifetime go through one
    /// mapping, so the number of mappings does not grow with the number of blocks.
    pub fn map_range(&self, start: u64, end: u64, populate: bool) -> io::Result<MappedRange> {
        let len = end.checked_sub(start).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("range end {} is before its start {}", end, start),
            )
        })?;

        Ok(MappedRange {
            start,
            data: self.map(start, len, populate)?,
        })
    }

    fn check_range(&self, offset: u64, len: u64) -> io::Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}+{} is out of the file of {} bytes",
                    offset, len, self.size
                ),
            )),
        }
    }
}

/// Mapped part of a file addressed by file offsets.
#[derive(Debug, Clone)]
pub struct MappedRange {
    start: u64,
    data: Bytes,
}

impl MappedRange {
    /// Zero copy view of `[start, end)`, which has to lie within the mapped range.
    pub fn slice(&self, start: u64, end: u64) -> io::Result<Bytes> {
        let range_end = self.start + self.data.len() as u64;
        if start < self.start || end < start || end > range_end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}..{} is out of the mapped range {}..{}",
                    start, end, self.start, range_end
                ),
            ));
        }

        Ok(self
            .data
            .slice((start - self.start) as usize..(end - self.start) as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_file(data: &[u8]) -> (tempfile::TempDir, MapFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        File::create(&path).unwrap().write_all(data).unwrap();
        let file = MapFile::open(&path).unwrap();
        (dir, file)
    }

    #[test]
    fn test_read_exact_at() {
        let (_dir, file) = make_file(b"abcdefgh");
        assert_eq!(file.size(), 8);
        assert_eq!(file.read_exact_at(2, 3).unwrap(), Bytes::from("cde"));
        assert_eq!(file.read_exact_at(8, 0).unwrap(), Bytes::new());
        assert!(file.read_exact_at(6, 3).is_err());
    }

    #[test]
    fn test_map() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let (_dir, file) = make_file(&data);

        // Offsets don't have to be page aligned.
        let region = file.map(4099, 100, false).unwrap();
        assert_eq!(region.as_ref(), &data[4099..4199]);

        let region = file.map(0, data.len() as u64, true).unwrap();
        assert_eq!(region.as_ref(), data.as_slice());

        assert!(file.map(9_999, 2, false).is_err());
        assert!(file.map(5, 0, false).unwrap().is_empty());
    }

    #[test]
    fn test_map_range() {
        let data: Vec<u8> = (0..10_000u32).map(|i| i as u8).collect();
        let (_dir, file) = make_file(&data);

        let range = file.map_range(21, 9_000, false).unwrap();
        assert_eq!(range.slice(21, 30).unwrap().as_ref(), &data[21..30]);
        assert_eq!(range.slice(8_000, 9_000).unwrap().as_ref(), &data[8_000..9_000]);
        assert!(range.slice(100, 100).unwrap().is_empty());

        assert!(range.slice(20, 30).is_err());
        assert!(range.slice(8_999, 9_001).is_err());
        assert!(range.slice(50, 40).is_err());

        assert!(file.map_range(30, 20, false).is_err());
        assert!(file.map_range(21, 21, false).unwrap().slice(21, 21).unwrap().is_empty());
    }

    #[test]
    fn test_region_outlives_handle() {
        let (_dir, file) = make_file(b"payload");
        let region = file.map(3, 4, false).unwrap();
        drop(file);
        assert_eq!(region, Bytes::from("load"));
    }
}
