//! ToUnicode CMaps: character codes of a font to the Unicode text they show.
//!
//! Only the `bfchar` and `bfrange` sections matter for reading text. Range
//! destinations are either a starting string, whose last UTF-16 unit is
//! incremented across the range, or an array with one string per code.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

/// Codes expanded per `bfrange` entry; longer ranges are clipped.
const MAX_RANGE: u32 = 0xFFFF;

lazy_static! {
    static ref BFCHAR: Regex = Regex::new(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]*)>").expect("static pattern");
    static ref BFRANGE: Regex =
        Regex::new(r"<([0-9A-Fa-f]+)>\s*<([0-9A-Fa-f]+)>\s*(?:<([0-9A-Fa-f]*)>|\[([^\]]*)\])")
            .expect("static pattern");
    static ref HEX_STRING: Regex = Regex::new(r"<([0-9A-Fa-f]*)>").expect("static pattern");
}

/// Parsed code-to-text mapping of one font.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ToUnicode {
    map: HashMap<u32, String>,
}

impl ToUnicode {
    /// Parse a decoded CMap stream. Unreadable entries are skipped.
    pub(crate) fn parse(data: &[u8]) -> Self {
        let content = String::from_utf8_lossy(data);
        let mut map = HashMap::new();

        for section in sections(&content, "beginbfchar", "endbfchar") {
            for caps in BFCHAR.captures_iter(section) {
                if let (Some(code), Some(text)) = (parse_code(&caps[1]), utf16_hex(&caps[2])) {
                    map.insert(code, text);
                }
            }
        }

        for section in sections(&content, "beginbfrange", "endbfrange") {
            for caps in BFRANGE.captures_iter(section) {
                let (Some(lo), Some(hi)) = (parse_code(&caps[1]), parse_code(&caps[2])) else {
                    continue;
                };
                if hi < lo {
                    continue;
                }
                let hi = hi.min(lo.saturating_add(MAX_RANGE));

                if let Some(start) = caps.get(3) {
                    let Some(units) = hex_bytes(start.as_str()).map(|b| utf16_units(&b)) else {
                        continue;
                    };
                    let Some((&last, head)) = units.split_last() else {
                        continue;
                    };
                    for code in lo..=hi {
                        let mut shifted = head.to_vec();
                        shifted.push(last.wrapping_add((code - lo) as u16));
                        if let Ok(text) = String::from_utf16(&shifted) {
                            map.insert(code, text);
                        }
                    }
                } else if let Some(array) = caps.get(4) {
                    let destinations = HEX_STRING.captures_iter(array.as_str());
                    for (code, dst) in (lo..=hi).zip(destinations) {
                        if let Some(text) = utf16_hex(&dst[1]) {
                            map.insert(code, text);
                        }
                    }
                }
            }
        }

        log::trace!("ToUnicode map with {} entries", map.len());
        Self { map }
    }

    /// Text for `code`.
    pub(crate) fn get(&self, code: u32) -> Option<&str> {
        self.map.get(&code).map(String::as_str)
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// Bodies between each `begin` marker and the following `end` marker.
fn sections<'a>(content: &'a str, begin: &str, end: &str) -> Vec<&'a str> {
    let mut found = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find(begin) {
        let body = &rest[start + begin.len()..];
        let Some(stop) = body.find(end) else {
            break;
        };
        found.push(&body[..stop]);
        rest = &body[stop + end.len()..];
    }
    found
}

fn parse_code(hex: &str) -> Option<u32> {
    if hex.len() > 8 {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

fn hex_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.is_empty() {
        return None;
    }
    // An odd trailing digit is padded with 0, as in PDF hex strings
    let padded;
    let hex = if hex.len() % 2 == 1 {
        padded = format!("{}0", hex);
        padded.as_str()
    } else {
        hex
    };
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

fn utf16_units(bytes: &[u8]) -> Vec<u16> {
    if bytes.len() == 1 {
        return vec![u16::from(bytes[0])];
    }
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Destination string: UTF-16BE, surrogate pairs included.
fn utf16_hex(hex: &str) -> Option<String> {
    let units = utf16_units(&hex_bytes(hex)?);
    String::from_utf16(&units).ok().filter(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY_SHIFTED: &[u8] = b"/CIDInit /ProcSet findresource begin\n\
        12 dict begin\nbegincmap\n1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
        2 beginbfchar\n<0001> <0041> <0002> <00660069>\nendbfchar\n\
        1 beginbfrange\n<0003> <0061> <0020>\nendbfrange\nendcmap\nend end";

    #[test]
    fn test_bfchar_and_sequential_range() {
        let cmap = ToUnicode::parse(IDENTITY_SHIFTED);
        assert_eq!(cmap.get(0x0001), Some("A"));
        assert_eq!(cmap.get(0x0002), Some("fi"));
        assert_eq!(cmap.get(0x0003), Some(" "));
        assert_eq!(cmap.get(0x0036), Some("S"));
        assert_eq!(cmap.get(0x0061), Some("~"));
        assert_eq!(cmap.get(0x0062), None);
        assert_eq!(cmap.len(), 2 + 0x5F);
    }

    #[test]
    fn test_array_range() {
        let cmap = ToUnicode::parse(b"beginbfrange\n<10> <12> [<0066> <00660066> <D835DF0C>]\nendbfrange");
        assert_eq!(cmap.get(0x10), Some("f"));
        assert_eq!(cmap.get(0x11), Some("ff"));
        assert_eq!(cmap.get(0x12), Some("\u{1D70C}"));
    }

    #[test]
    fn test_single_byte_destination() {
        let cmap = ToUnicode::parse(b"beginbfchar <20> <20> endbfchar beginbfrange <41> <43> <61> endbfrange");
        assert_eq!(cmap.get(0x20), Some(" "));
        assert_eq!(cmap.get(0x42), Some("b"));
    }

    #[test]
    fn test_bad_entries_skipped() {
        let cmap = ToUnicode::parse(b"beginbfchar\n<0001> <D800>\n<0002> <>\nendbfchar\nbeginbfrange\n<0010> <0001> <0041>\nendbfrange");
        assert_eq!(cmap.len(), 0);
        assert_eq!(ToUnicode::parse(b"beginbfchar <0001> <0041>").len(), 0);
        assert_eq!(ToUnicode::parse(b"\xFF\x00 garbage").len(), 0);
    }
}
