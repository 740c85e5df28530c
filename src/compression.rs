//! Value compression. Every value is compressed on its own with the raw Snappy format,
//! which carries the uncompressed length in its preamble.

use crate::Result;

pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    Ok(snap::raw::Encoder::new().compress_vec(raw)?)
}

pub fn decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    Ok(snap::raw::Decoder::new().decompress_vec(compressed)?)
}
