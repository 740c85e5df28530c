use crate::key::ByteKey;
use bytes::{Buf, BufMut};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/*
Spill record layout schema. Records are appended in the order keys were added.
------------------------------------------------------------
|                     Record #1                      | ... |
------------------------------------------------------------
| key_len (4B) | value_len (4B) | key | value        | ... |
------------------------------------------------------------
*/

const RECORD_HEADER_SIZE: usize = 2 * std::mem::size_of::<u32>(); // 8.

/// Position of a value inside the spill file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuePos {
    pub offset: u64,
    pub len: u32,
}

/// Unsorted staging file the builder appends records to. It lives next to the target
/// map file and is removed when dropped, whatever way the build ends.
#[derive(Debug)]
pub struct SpillFile {
    path: PathBuf,
    file: File,
    writer: Option<BufWriter<File>>,
    len: u64,
}

impl SpillFile {
    /// Creates a uniquely named spill file in the directory of the target.
    pub fn create(target: &Path) -> io::Result<Self> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "diskmap".to_string());
        let path = target.with_file_name(format!(".{}.{}.spill", name, Uuid::now_v7()));

        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        let writer = BufWriter::new(file.try_clone()?);

        tracing::debug!("spilling records to {}", path.display());

        Ok(Self {
            path,
            file,
            writer: Some(writer),
            len: 0,
        })
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "spill file is already finished")
        })?;

        let mut header = Vec::with_capacity(RECORD_HEADER_SIZE);
        header.put_u32(len_u32(key.len())?);
        header.put_u32(len_u32(value.len())?);

        writer.write_all(&header)?;
        writer.write_all(key)?;
        writer.write_all(value)?;
        self.len += (RECORD_HEADER_SIZE + key.len() + value.len()) as u64;

        Ok(())
    }

    /// Flushes buffered records. No more records can be appended afterwards.
    pub fn finish(&mut self) -> io::Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.into_inner().map_err(|e| e.into_error())?;
        }

        Ok(())
    }

    /// Reads all the records sequentially from the start, keeping keys and the position
    /// of their values.
    pub fn scan(&self) -> io::Result<Vec<(ByteKey, ValuePos)>> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        let mut pos: u64 = 0;

        while pos < self.len {
            let mut raw = [0u8; RECORD_HEADER_SIZE];
            reader.read_exact(&mut raw)?;
            let mut header = &raw[..];
            let key_len = header.get_u32() as usize;
            let value_len = header.get_u32();

            let mut key = vec![0; key_len];
            reader.read_exact(&mut key)?;
            reader.seek_relative(value_len as i64)?;

            let offset = pos + (RECORD_HEADER_SIZE + key_len) as u64;
            records.push((
                ByteKey::from(key),
                ValuePos {
                    offset,
                    len: value_len,
                },
            ));
            pos = offset + value_len as u64;
        }

        Ok(records)
    }

    pub fn read_value(&self, pos: ValuePos) -> io::Result<Vec<u8>> {
        let mut value = vec![0; pos.len as usize];
        self.file.read_exact_at(&mut value, pos.offset)?;
        Ok(value)
    }
}

impl Drop for SpillFile {
    fn drop(&mut self) {
        // Close the writer before the file goes away.
        self.writer.take();

        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("removed spill file {}", self.path.display()),
            Err(e) => tracing::warn!(
                "could not remove spill file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn len_u32(len: usize) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("record part of {} bytes is too long", len),
        )
    })
}
