//! ASCIIHexDecode: pairs of hex digits, whitespace ignored, '>' terminates.

use crate::decoders::StreamDecoder;
use crate::error::{Error, Result};

/// ASCIIHexDecode filter implementation.
pub struct AsciiHexDecoder;

impl StreamDecoder for AsciiHexDecoder {
    fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let end = input.iter().position(|&c| c == b'>').unwrap_or(input.len());
        let digits: Vec<u8> = input[..end]
            .iter()
            .copied()
            .filter(|c| !c.is_ascii_whitespace())
            .collect();

        digits
            .chunks(2)
            .map(|pair| {
                // odd trailing digit is padded with an implicit 0
                let high = hex_value(pair[0])?;
                let low = pair.get(1).map(|&c| hex_value(c)).transpose()?.unwrap_or(0);
                Ok((high << 4) | low)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "ASCIIHexDecode"
    }
}

fn hex_value(digit: u8) -> Result<u8> {
    (digit as char)
        .to_digit(16)
        .map(|v| v as u8)
        .ok_or_else(|| Error::Decode(format!("ASCIIHexDecode: invalid hex digit '{}'", digit as char)))
}
