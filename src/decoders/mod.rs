//! Stream filters needed to read the structure of a document.
//!
//! Signing only has to look inside three kinds of streams: cross-reference
//! streams, object streams and page content streams. In practice these use
//! FlateDecode (optionally with a PNG predictor) and, rarely, ASCIIHexDecode.
//! Image filters (DCT, JBIG2, CCITT) never need decoding here.

use crate::error::{Error, Result};

mod ascii_hex;
mod flate;
mod predictor;

pub use ascii_hex::AsciiHexDecoder;
pub use flate::FlateDecoder;
pub use predictor::{DecodeParams, decode_predictor};

/// Upper bound on a single decoded stream.
const MAX_DECODED_SIZE: usize = 64 * 1024 * 1024;

/// Trait for PDF stream decoders.
pub trait StreamDecoder {
    /// Decode the input data.
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>>;

    /// Get the name of this decoder (e.g., "FlateDecode").
    fn name(&self) -> &str;
}

fn decoder_for(filter_name: &str) -> Result<Box<dyn StreamDecoder>> {
    match filter_name {
        "FlateDecode" | "Fl" => Ok(Box::new(FlateDecoder)),
        "ASCIIHexDecode" | "AHx" => Ok(Box::new(AsciiHexDecoder)),
        other => Err(Error::UnsupportedFilter(other.to_string())),
    }
}

/// Decode stream data through a filter pipeline, then undo any predictor.
pub fn decode_stream_with_params(
    data: &[u8],
    filters: &[String],
    params: Option<&DecodeParams>,
) -> Result<Vec<u8>> {
    let mut current = data.to_vec();

    for filter_name in filters {
        let decoder = decoder_for(filter_name)?;
        current = decoder.decode(&current)?;
        log::trace!("{} produced {} bytes", decoder.name(), current.len());

        if current.len() > MAX_DECODED_SIZE {
            return Err(Error::Decode(format!(
                "decoded stream of {} bytes exceeds limit of {} bytes",
                current.len(),
                MAX_DECODED_SIZE
            )));
        }
    }

    match params {
        Some(params) if params.predictor > 1 => decode_predictor(&current, params),
        _ => Ok(current),
    }
}
