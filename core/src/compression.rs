//! Gzip compression for session payloads, pluggable only in the sense that the pipeline stage
//! table (`pipeline::stage`) calls these as ordinary `bytes -> bytes` functions.
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use flux::error::{Error, Result};
use std::io::{Read, Write};

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Compression(format!("gzip compress: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Compression(format!("gzip compress: {}", e)))
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Compression(format!("gzip decompress: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_then_decompress_round_trips() {
        let original = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
        let compressed = compress(original).expect("compress");
        let restored = decompress(&compressed).expect("decompress");
        assert_eq!(restored, original);
    }

    #[test]
    fn decompress_rejects_garbage() {
        assert!(decompress(b"not gzip data").is_err());
    }
}
