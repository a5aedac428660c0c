//! FlateDecode (zlib/deflate) via flate2.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use std::io::Read;

/// FlateDecode filter implementation.
///
/// Tries a zlib stream first. Some producers emit raw deflate data or truncate
/// the final checksum, so a raw-deflate pass and partial output are accepted
/// before giving up.
pub struct FlateDecoder;

impl StreamDecoder for FlateDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        let zlib_err = match ZlibDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => return Ok(output),
            Err(e) => e,
        };

        if !output.is_empty() {
            log::warn!(
                "FlateDecode partial recovery: {} bytes before error: {}",
                output.len(),
                zlib_err
            );
            return Ok(output);
        }

        log::debug!("zlib decode failed ({}), trying raw deflate", zlib_err);
        output.clear();
        match DeflateDecoder::new(input).read_to_end(&mut output) {
            Ok(_) => Ok(output),
            Err(_) if !output.is_empty() => Ok(output),
            Err(e) => Err(Error::Decode(format!("FlateDecode failed: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "FlateDecode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use std::io::Write;

    #[test]
    fn test_zlib_roundtrip() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"0 0 m 10 10 l S").unwrap();
        let data = enc.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&data).unwrap(), b"0 0 m 10 10 l S");
    }

    #[test]
    fn test_raw_deflate_fallback() {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"raw deflate body").unwrap();
        let data = enc.finish().unwrap();
        assert_eq!(FlateDecoder.decode(&data).unwrap(), b"raw deflate body");
    }

    #[test]
    fn test_garbage_fails() {
        assert!(FlateDecoder.decode(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }
}
