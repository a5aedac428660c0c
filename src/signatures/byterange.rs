//! ByteRange calculation for PDF signatures.
//!
//! The ByteRange is an array of four integers, `[0, a, b, len - b]`, where
//! `[a, b)` is the `/Contents` hex string including its angle brackets. The
//! signature covers every byte of the revision except that hole.
//!
//! Both the ByteRange and the `/Contents` value are written as fixed-width
//! placeholders first, so patching them never moves any other byte.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Width of the `/ByteRange` placeholder, brackets included.
pub const BYTE_RANGE_WIDTH: usize = 48;

/// Calculator for PDF signature byte ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRangeCalculator {
    /// Size of the /Contents value: hex digits plus 2 angle brackets
    placeholder_size: usize,
}

impl ByteRangeCalculator {
    /// Calculator reserving `reserved_bytes` for the DER container.
    pub fn new(reserved_bytes: usize) -> Self {
        // Each byte becomes 2 hex characters, plus 2 for < and >
        Self {
            placeholder_size: reserved_bytes * 2 + 2,
        }
    }

    /// Size of the `/Contents` value in the file.
    pub fn placeholder_size(&self) -> usize {
        self.placeholder_size
    }

    /// Bytes of DER that fit.
    pub fn reserved_bytes(&self) -> usize {
        (self.placeholder_size - 2) / 2
    }

    /// `<000…0>`
    pub fn generate_placeholder(&self) -> String {
        format!("<{}>", "0".repeat(self.placeholder_size - 2))
    }

    /// `[0 0 0 0]` padded with spaces to [`BYTE_RANGE_WIDTH`].
    pub fn byte_range_placeholder() -> String {
        format!("{:<width$}", "[0 0 0 0]", width = BYTE_RANGE_WIDTH)
    }

    /// ByteRange for a `/Contents` value starting at `contents_offset`.
    pub fn calculate_byte_range(&self, file_size: usize, contents_offset: usize) -> [usize; 4] {
        let after = contents_offset + self.placeholder_size;
        [0, contents_offset, after, file_size.saturating_sub(after)]
    }

    /// Format a ByteRange to exactly [`BYTE_RANGE_WIDTH`] bytes.
    pub fn format_byte_range(byte_range: &[usize; 4]) -> Result<String> {
        let formatted = format!(
            "[{} {} {} {}]",
            byte_range[0], byte_range[1], byte_range[2], byte_range[3]
        );
        if formatted.len() > BYTE_RANGE_WIDTH {
            return Err(Error::InvalidPdf(format!(
                "ByteRange {} does not fit its placeholder",
                formatted
            )));
        }
        Ok(format!("{:<width$}", formatted, width = BYTE_RANGE_WIDTH))
    }

    /// Check that a ByteRange starts at 0, leaves a hole, and stays inside the file.
    ///
    /// The range may end before the file does: later revisions follow it.
    pub fn validate_byte_range(byte_range: &[usize; 4], file_size: usize) -> Result<()> {
        let [offset1, length1, offset2, length2] = *byte_range;

        if offset1 != 0 {
            return Err(Error::InvalidPdf(format!("ByteRange must start at 0, got {}", offset1)));
        }
        if length1 >= offset2 {
            return Err(Error::InvalidPdf(format!(
                "ByteRange first range ({}) overlaps with second range start ({})",
                length1, offset2
            )));
        }
        let end = offset2.checked_add(length2).ok_or(Error::InvalidPdf(
            "ByteRange end overflows".to_string(),
        ))?;
        if end > file_size {
            return Err(Error::InvalidPdf(format!(
                "ByteRange ends at {} beyond file size {}",
                end, file_size
            )));
        }
        Ok(())
    }

    /// SHA-256 over both parts of the range.
    pub fn digest(pdf_data: &[u8], byte_range: &[usize; 4]) -> Result<[u8; 32]> {
        Self::validate_byte_range(byte_range, pdf_data.len())?;
        let [offset1, length1, offset2, length2] = *byte_range;
        let mut hasher = Sha256::new();
        hasher.update(&pdf_data[offset1..offset1 + length1]);
        hasher.update(&pdf_data[offset2..offset2 + length2]);
        Ok(hasher.finalize().into())
    }

    /// Write the container into the placeholder at `contents_offset`,
    /// zero-padded to the full width.
    pub fn insert_signature(&self, pdf_data: &mut [u8], contents_offset: usize, der: &[u8]) -> Result<()> {
        let hex = to_hex(der);
        if hex.len() + 2 > self.placeholder_size {
            return Err(Error::InvalidPdf(format!(
                "Signature ({} bytes) exceeds placeholder size ({} bytes)",
                hex.len() + 2,
                self.placeholder_size
            )));
        }
        let end = contents_offset + self.placeholder_size;
        let slot = pdf_data.get_mut(contents_offset..end).ok_or(Error::InvalidPdf(
            "Signature insertion would exceed file bounds".to_string(),
        ))?;
        if slot.first() != Some(&b'<') || slot.last() != Some(&b'>') {
            return Err(Error::InvalidPdf(format!(
                "No /Contents placeholder at offset {}",
                contents_offset
            )));
        }

        let digits = &mut slot[1..self.placeholder_size - 1];
        digits[..hex.len()].copy_from_slice(hex.as_bytes());
        digits[hex.len()..].fill(b'0');
        Ok(())
    }
}

impl Default for ByteRangeCalculator {
    fn default() -> Self {
        Self::new(8192)
    }
}

/// Uppercase hex.
pub(crate) fn to_hex(data: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(data.len() * 2);
    for byte in data {
        out.push(DIGITS[(byte >> 4) as usize] as char);
        out.push(DIGITS[(byte & 0x0F) as usize] as char);
    }
    out
}
