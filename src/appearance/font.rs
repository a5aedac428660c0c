//! Helvetica metrics and WinAnsi (Windows-1252) encoding for stamp text.
//!
//! Widths are in 1/1000 em, from the standard Helvetica AFM.

/// Base font name used in the font resource.
pub(crate) const BASE_FONT: &str = "Helvetica";

/// Ascender and descender, 1/1000 em.
pub(crate) const ASCENT: f32 = 718.0;
pub(crate) const DESCENT: f32 = -207.0;

/// Advance width of `ch`.
pub(crate) fn char_width(ch: char) -> f32 {
    match ch {
        ' ' | '!' | ',' | '.' | '/' | ':' | ';' | '[' | '\\' | ']' | 'I' | 'f' | 't' => 278.0,
        '"' => 355.0,
        '#' | '$' | '0'..='9' | '?' | '_' | 'L' | 'a' | 'b' | 'd' | 'e' | 'g' | 'h' | 'n' | 'o' | 'p'
        | 'q' | 'u' => 556.0,
        '%' => 889.0,
        '&' | 'A' | 'B' | 'E' | 'K' | 'P' | 'S' | 'V' | 'X' | 'Y' => 667.0,
        '\'' => 191.0,
        '(' | ')' | '-' | '`' | 'r' => 333.0,
        '*' => 389.0,
        '+' | '<' | '=' | '>' | '~' => 584.0,
        '@' => 1015.0,
        'C' | 'D' | 'H' | 'N' | 'R' | 'U' | 'w' => 722.0,
        'F' | 'T' | 'Z' => 611.0,
        'G' | 'O' | 'Q' => 778.0,
        'J' | 'c' | 'k' | 's' | 'v' | 'x' | 'y' | 'z' => 500.0,
        'M' | 'm' => 833.0,
        'W' => 944.0,
        '^' => 469.0,
        'i' | 'j' | 'l' => 222.0,
        '{' | '}' => 334.0,
        '|' => 260.0,
        _ => 556.0,
    }
}

/// Width of `text` at `size`, in points.
pub(crate) fn text_width(text: &str, size: f32) -> f32 {
    text.chars().map(char_width).sum::<f32>() * size / 1000.0
}

/// Windows-1252 codes 0x80–0x9F and the characters they stand for.
const WIN_ANSI_HIGH: [(u8, char); 27] = [
    (0x80, '\u{20AC}'),
    (0x82, '\u{201A}'),
    (0x83, '\u{0192}'),
    (0x84, '\u{201E}'),
    (0x85, '\u{2026}'),
    (0x86, '\u{2020}'),
    (0x87, '\u{2021}'),
    (0x88, '\u{02C6}'),
    (0x89, '\u{2030}'),
    (0x8A, '\u{0160}'),
    (0x8B, '\u{2039}'),
    (0x8C, '\u{0152}'),
    (0x8E, '\u{017D}'),
    (0x91, '\u{2018}'),
    (0x92, '\u{2019}'),
    (0x93, '\u{201C}'),
    (0x94, '\u{201D}'),
    (0x95, '\u{2022}'),
    (0x96, '\u{2013}'),
    (0x97, '\u{2014}'),
    (0x98, '\u{02DC}'),
    (0x99, '\u{2122}'),
    (0x9A, '\u{0161}'),
    (0x9B, '\u{203A}'),
    (0x9C, '\u{0153}'),
    (0x9E, '\u{017E}'),
    (0x9F, '\u{0178}'),
];

/// WinAnsi byte for `ch`, if it has one.
pub(crate) fn encode_char(ch: char) -> Option<u8> {
    let code = ch as u32;
    if code < 0x80 || (0xA0..=0xFF).contains(&code) {
        return Some(code as u8);
    }
    WIN_ANSI_HIGH.iter().find(|(_, c)| *c == ch).map(|(b, _)| *b)
}

/// Encode `text`; characters outside WinAnsi become `?`.
pub(crate) fn encode(text: &str) -> Vec<u8> {
    text.chars().map(|ch| encode_char(ch).unwrap_or(b'?')).collect()
}

/// Character for a WinAnsi byte, used when reading page text.
pub(crate) fn decode_byte(byte: u8) -> char {
    WIN_ANSI_HIGH
        .iter()
        .find(|(b, _)| *b == byte)
        .map(|(_, c)| *c)
        .unwrap_or(byte as char)
}
