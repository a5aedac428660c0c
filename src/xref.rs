//! Cross-reference parsing.
//!
//! The xref maps object numbers to byte offsets (or to a slot in an object
//! stream). Both classic `xref` tables and cross-reference streams are read, and
//! `/Prev` chains left by earlier incremental updates are followed so that the
//! newest entry for each object wins.

use crate::error::{Error, Result};
use crate::lexer::{Token, token};
use crate::object::{Dict, Object};
use crate::parser::{parse_indirect_object_at, parse_object};
use std::collections::HashMap;

/// Maximum length of a `/Prev` chain.
const MAX_PREV_DEPTH: u32 = 100;

/// Where an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Free slot.
    Free,
    /// Uncompressed object at a byte offset.
    InUse {
        /// Byte offset of `N G obj`
        offset: u64,
        /// Generation number
        generation: u16,
    },
    /// Object stored inside an object stream.
    Compressed {
        /// Object number of the containing `/Type /ObjStm` stream
        stream_id: u32,
        /// Index within that stream
        index: u32,
    },
}

/// Merged cross-reference information for a whole document.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    entries: HashMap<u32, XRefEntry>,
    trailer: Dict,
}

impl CrossRefTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest trailer dictionary (for xref streams, the stream dictionary).
    pub fn trailer(&self) -> &Dict {
        &self.trailer
    }

    /// Add or overwrite an entry.
    pub fn add_entry(&mut self, object_number: u32, entry: XRefEntry) {
        self.entries.insert(object_number, entry);
    }

    /// Look up an entry.
    pub fn get(&self, object_number: u32) -> Option<&XRefEntry> {
        self.entries.get(&object_number)
    }

    /// Highest object number with an entry of any kind.
    pub fn max_object_number(&self) -> u32 {
        self.entries.keys().copied().max().unwrap_or(0)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries were read.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge an older table into this one. Existing (newer) entries and the
    /// newer trailer are kept.
    pub fn merge_from(&mut self, older: CrossRefTable) {
        for (id, entry) in older.entries {
            self.entries.entry(id).or_insert(entry);
        }
        for (key, value) in older.trailer {
            if key != "Prev" && key != "XRefStm" {
                self.trailer.entry(key).or_insert(value);
            }
        }
    }
}

/// Kind of the last cross-reference section, which decides how the next
/// incremental update writes its own section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefKind {
    /// Classic `xref` table with a `trailer` dictionary
    Table,
    /// `/Type /XRef` stream
    Stream,
}

/// Locate the offset after the last `startxref` keyword (searching the last 2KB).
pub fn find_xref_offset(data: &[u8]) -> Result<u64> {
    let tail_start = data.len().saturating_sub(2048);
    let tail = &data[tail_start..];
    let keyword = b"startxref";

    let pos = tail
        .windows(keyword.len())
        .rposition(|w| w == keyword)
        .ok_or(Error::InvalidXref)?;

    match token(&tail[pos + keyword.len()..]) {
        Ok((_, Token::Integer(offset))) if offset >= 0 => Ok(offset as u64),
        _ => Err(Error::InvalidXref),
    }
}

/// Parse the xref section at `offset` and every older section it chains to.
///
/// Returns the merged table and the kind of the section at `offset`.
pub fn parse_xref(data: &[u8], offset: u64) -> Result<(CrossRefTable, XRefKind)> {
    let kind = section_kind(data, offset)?;
    let table = parse_xref_recursive(data, offset, 0)?;
    Ok((table, kind))
}

fn section_kind(data: &[u8], offset: u64) -> Result<XRefKind> {
    let section = data.get(offset as usize..).ok_or(Error::InvalidXref)?;
    let start = section
        .iter()
        .position(|c| !c.is_ascii_whitespace())
        .ok_or(Error::InvalidXref)?;
    let section = &section[start..];

    if section.starts_with(b"xref") {
        Ok(XRefKind::Table)
    } else if section.first().is_some_and(|c| c.is_ascii_digit()) {
        Ok(XRefKind::Stream)
    } else {
        Err(Error::InvalidXref)
    }
}

fn parse_xref_recursive(data: &[u8], offset: u64, depth: u32) -> Result<CrossRefTable> {
    if depth > MAX_PREV_DEPTH {
        return Err(Error::InvalidPdf(format!(
            "xref /Prev chain deeper than {}",
            MAX_PREV_DEPTH
        )));
    }

    log::debug!("parsing xref section at offset {}", offset);
    let mut table = match section_kind(data, offset)? {
        XRefKind::Table => parse_table_section(data, offset)?,
        XRefKind::Stream => parse_stream_section(data, offset)?,
    };

    // Hybrid files: a classic trailer may point at an xref stream for the same revision
    if let Some(stm) = table.trailer.get("XRefStm").and_then(|o| o.as_integer()) {
        match parse_stream_section(data, stm as u64) {
            Ok(hybrid) => {
                for (id, entry) in hybrid.entries {
                    table.entries.entry(id).or_insert(entry);
                }
            },
            Err(e) => log::warn!("ignoring unreadable /XRefStm at {}: {}", stm, e),
        }
    }

    if let Some(prev) = table.trailer.get("Prev").and_then(|o| o.as_integer()) {
        if prev < 0 || prev as u64 == offset {
            return Err(Error::InvalidXref);
        }
        let older = parse_xref_recursive(data, prev as u64, depth + 1)?;
        table.merge_from(older);
    }

    Ok(table)
}

fn expect_integer(input: &[u8]) -> Result<(&[u8], i64)> {
    match token(input) {
        Ok((rest, Token::Integer(v))) => Ok((rest, v)),
        _ => Err(Error::InvalidXref),
    }
}

/// Classic table:
///
/// ```text
/// xref
/// 0 3
/// 0000000000 65535 f
/// 0000000017 00000 n
/// 0000000081 00000 n
/// trailer
/// << /Size 3 /Root 1 0 R >>
/// ```
fn parse_table_section(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let mut input = data.get(offset as usize..).ok_or(Error::InvalidXref)?;
    input = match token(input) {
        Ok((rest, Token::Operator(b"xref"))) => rest,
        _ => return Err(Error::InvalidXref),
    };

    let mut table = CrossRefTable::new();
    loop {
        match token(input) {
            Ok((rest, Token::Operator(b"trailer"))) => {
                let (_, trailer) = parse_object(rest).map_err(|_| Error::InvalidXref)?;
                match trailer {
                    Object::Dictionary(dict) => table.trailer = dict,
                    _ => return Err(Error::InvalidXref),
                }
                return Ok(table);
            },
            Ok((_, Token::Integer(_))) => {
                let (rest, first) = expect_integer(input)?;
                let (rest, count) = expect_integer(rest)?;
                if first < 0 || count < 0 {
                    return Err(Error::InvalidXref);
                }
                input = rest;
                for i in 0..count {
                    let (rest, field1) = expect_integer(input)?;
                    let (rest, field2) = expect_integer(rest)?;
                    let (rest, kind) = match token(rest) {
                        Ok((rest, Token::Operator(kind))) => (rest, kind),
                        _ => return Err(Error::InvalidXref),
                    };
                    let id = (first + i) as u32;
                    let entry = match kind {
                        b"n" => XRefEntry::InUse {
                            offset: field1 as u64,
                            generation: field2 as u16,
                        },
                        b"f" => XRefEntry::Free,
                        _ => return Err(Error::InvalidXref),
                    };
                    // Within one section the first occurrence is authoritative
                    table.entries.entry(id).or_insert(entry);
                    input = rest;
                }
            },
            _ => return Err(Error::InvalidXref),
        }
    }
}

/// Cross-reference stream (`/Type /XRef`, `/W [a b c]`, optional `/Index`).
fn parse_stream_section(data: &[u8], offset: u64) -> Result<CrossRefTable> {
    let (_, object) = parse_indirect_object_at(data, offset as usize)?;
    let dict = match &object {
        Object::Stream { dict, .. } => dict,
        _ => return Err(Error::InvalidXref),
    };
    if dict.get("Type").and_then(|t| t.as_name()) != Some("XRef") {
        return Err(Error::InvalidXref);
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(|w| w.as_array())
        .ok_or(Error::InvalidXref)?
        .iter()
        .map(|w| w.as_integer().filter(|&v| (0..=8).contains(&v)).map(|v| v as usize))
        .collect::<Option<Vec<_>>>()
        .ok_or(Error::InvalidXref)?;
    if widths.len() != 3 {
        return Err(Error::InvalidXref);
    }
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(Error::InvalidXref);
    }

    let size = dict.get("Size").and_then(|s| s.as_integer()).unwrap_or(0);
    let index: Vec<i64> = match dict.get("Index").and_then(|i| i.as_array()) {
        Some(arr) => arr
            .iter()
            .map(|o| o.as_integer())
            .collect::<Option<Vec<_>>>()
            .ok_or(Error::InvalidXref)?,
        None => vec![0, size],
    };

    let decoded = object.decode_stream_data()?;
    let mut rows = decoded.chunks_exact(row_len);
    let mut table = CrossRefTable::new();

    for range in index.chunks_exact(2) {
        let (first, count) = (range[0], range[1]);
        for i in 0..count.max(0) {
            let Some(row) = rows.next() else {
                log::warn!("xref stream at {} has fewer rows than /Index declares", offset);
                break;
            };
            let (f1, rest) = row.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            // A zero-width type field defaults to 1
            let kind = if widths[0] == 0 { 1 } else { read_int(f1) };
            let entry = match kind {
                0 => XRefEntry::Free,
                1 => XRefEntry::InUse {
                    offset: read_int(f2),
                    generation: read_int(f3) as u16,
                },
                2 => XRefEntry::Compressed {
                    stream_id: read_int(f2) as u32,
                    index: read_int(f3) as u32,
                },
                _ => continue,
            };
            table.entries.entry((first + i) as u32).or_insert(entry);
        }
    }

    let mut trailer = dict.clone();
    for key in ["Length", "Filter", "DecodeParms", "W", "Index", "Type"] {
        trailer.remove(key);
    }
    table.trailer = trailer;
    Ok(table)
}

/// Big-endian unsigned integer of arbitrary width.
fn read_int(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
