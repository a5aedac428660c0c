//! Locating anchor phrases in page text.
//!
//! Text positions are tracked through the graphics state (`q`/`Q`/`cm`) and
//! the text state (`Tm`, `Td`, `TD`, `T*`, `TL`, `Tf`). Shown strings are
//! decoded through the current font's `/ToUnicode` map when it has one and as
//! WinAnsi otherwise. Advances use the font's own widths, falling back to
//! Helvetica metrics.

use super::cmap::ToUnicode;
use super::font;
use crate::content::{Operation, parse_content_stream};
use crate::document::PdfDocument;
use crate::geometry::{Matrix, Point};
use crate::object::{Dict, Object};
use std::collections::HashMap;

/// TJ adjustment (thousandths of an em) treated as a word break.
const TJ_SPACE_THRESHOLD: f32 = 200.0;

/// One shown string with the user-space x of each of its characters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TextRun {
    pub text: Vec<char>,
    pub char_x: Vec<f32>,
    pub end_x: f32,
    pub baseline: f32,
    pub height: f32,
}

/// Page fonts by resource name.
pub(crate) type FontMap = HashMap<String, FontDecoder>;

/// Turns one font's string bytes into text and glyph advances.
#[derive(Debug, Clone, Default)]
pub(crate) struct FontDecoder {
    to_unicode: Option<ToUnicode>,
    /// Composite fonts show two-byte codes
    two_byte: bool,
    /// Glyph widths by code, 1/1000 em
    widths: HashMap<u32, f32>,
    default_width: Option<f32>,
}

/// One shown code.
#[derive(Debug, Clone, PartialEq)]
struct Glyph {
    text: String,
    width: f32,
    is_space: bool,
}

impl FontDecoder {
    /// Decoder for a font dictionary. Parts that cannot be read fall back to
    /// WinAnsi text and Helvetica widths.
    pub(crate) fn from_font(doc: &mut PdfDocument, font: &Dict) -> Self {
        let two_byte = font.get("Subtype").and_then(Object::as_name) == Some("Type0");
        let to_unicode = resolved(doc, font.get("ToUnicode")).and_then(|stream| match stream.decode_stream_data() {
            Ok(data) => Some(ToUnicode::parse(&data)),
            Err(e) => {
                log::debug!("unreadable ToUnicode stream: {}", e);
                None
            },
        });

        let mut decoder = Self {
            to_unicode,
            two_byte,
            ..Self::default()
        };
        if two_byte {
            let descendant = resolved(doc, font.get("DescendantFonts"))
                .and_then(|fonts| fonts.as_array().and_then(|a| a.first().cloned()))
                .and_then(|first| doc.resolve(&first).ok());
            let cid_font = descendant.as_ref().and_then(Object::as_dict);
            decoder.default_width = Some(
                cid_font
                    .and_then(|d| d.get("DW"))
                    .and_then(Object::as_number)
                    .map(|w| w as f32)
                    .unwrap_or(1000.0),
            );
            if let Some(w) = cid_font.and_then(|d| d.get("W")).cloned() {
                decoder.read_cid_widths(doc, &w);
            }
        } else {
            decoder.read_simple_widths(doc, font);
        }

        log::trace!(
            "font decoder: two_byte={} to_unicode={} widths={}",
            decoder.two_byte,
            decoder.to_unicode.as_ref().map_or(0, ToUnicode::len),
            decoder.widths.len()
        );
        decoder
    }

    /// `/FirstChar` and `/Widths` of a simple font.
    fn read_simple_widths(&mut self, doc: &mut PdfDocument, font: &Dict) {
        let Some(first) = font.get("FirstChar").and_then(Object::as_integer) else {
            return;
        };
        let Some(widths) = resolved(doc, font.get("Widths")) else {
            return;
        };
        for (i, w) in widths.as_array().into_iter().flatten().enumerate() {
            if let (Ok(code), Some(w)) = (u32::try_from(first + i as i64), w.as_number()) {
                self.widths.insert(code, w as f32);
            }
        }
    }

    /// `/W` of a CID font: `c [w1 w2 ...]` and `c_first c_last w` entries.
    fn read_cid_widths(&mut self, doc: &mut PdfDocument, w: &Object) {
        let Some(items) = doc.resolve(w).ok().and_then(|o| o.as_array().cloned()) else {
            return;
        };
        let mut i = 0;
        while i + 1 < items.len() {
            let Some(start) = items[i].as_integer().and_then(|c| u32::try_from(c).ok()) else {
                return;
            };
            match doc.resolve(&items[i + 1]).ok() {
                Some(Object::Array(list)) => {
                    for (offset, width) in list.iter().enumerate() {
                        if let Some(width) = width.as_number() {
                            self.widths.insert(start + offset as u32, width as f32);
                        }
                    }
                    i += 2;
                },
                Some(last) => {
                    let (Some(last), Some(width)) = (
                        last.as_integer().and_then(|c| u32::try_from(c).ok()),
                        items.get(i + 2).and_then(Object::as_number),
                    ) else {
                        return;
                    };
                    for code in start..=last.min(start.saturating_add(0xFFFF)) {
                        self.widths.insert(code, width as f32);
                    }
                    i += 3;
                },
                None => return,
            }
        }
    }

    fn glyphs(&self, bytes: &[u8]) -> Vec<Glyph> {
        let step = if self.two_byte { 2 } else { 1 };
        bytes
            .chunks(step)
            .map(|chunk| {
                let code = chunk.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
                let text = match self.to_unicode.as_ref().and_then(|map| map.get(code)) {
                    Some(text) => text.to_string(),
                    None if self.two_byte => String::new(),
                    None => font::decode_byte(chunk[0]).to_string(),
                };
                let width = self
                    .widths
                    .get(&code)
                    .copied()
                    .or(self.default_width)
                    .unwrap_or_else(|| text.chars().next().map_or(0.0, font::char_width));
                Glyph {
                    text,
                    width,
                    is_space: !self.two_byte && code == 32,
                }
            })
            .collect()
    }
}

fn resolved(doc: &mut PdfDocument, obj: Option<&Object>) -> Option<Object> {
    obj.and_then(|o| doc.resolve(o).ok())
}

/// Decoders for every font in a page's `/Resources`.
pub(crate) fn page_fonts(doc: &mut PdfDocument, resources: &Dict) -> FontMap {
    let Some(Object::Dictionary(fonts)) = resolved(doc, resources.get("Font")) else {
        return FontMap::new();
    };
    let mut map = FontMap::new();
    for (name, font) in &fonts {
        if let Ok(Object::Dictionary(dict)) = doc.resolve(font) {
            map.insert(name.clone(), FontDecoder::from_font(doc, &dict));
        }
    }
    map
}

/// Where an anchor phrase starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct AnchorHit {
    /// Baseline origin of the first matched character
    pub origin: Point,
    /// Font height in user space
    pub height: f32,
}

#[derive(Debug, Clone)]
struct TextState {
    ctm: Matrix,
    stack: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    leading: f32,
    font: Option<String>,
    font_size: f32,
    char_spacing: f32,
    word_spacing: f32,
}

impl TextState {
    fn new() -> Self {
        Self {
            ctm: Matrix::identity(),
            stack: Vec::new(),
            tm: Matrix::identity(),
            tlm: Matrix::identity(),
            leading: 0.0,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translation(tx, ty).multiply(&self.tlm);
        self.tm = self.tlm;
    }

    fn next_line(&mut self) {
        self.move_line(0.0, -self.leading);
    }

    fn show(&mut self, bytes: &[u8], decoder: &FontDecoder, runs: &mut Vec<TextRun>) {
        let trm = self.tm.multiply(&self.ctm);
        let origin = trm.transform_point(0.0, 0.0);
        let sx = (trm.a * trm.a + trm.b * trm.b).sqrt();

        let mut advance = 0.0;
        let mut text = Vec::with_capacity(bytes.len());
        let mut char_x = Vec::with_capacity(bytes.len());
        for glyph in decoder.glyphs(bytes) {
            for ch in glyph.text.chars() {
                text.push(ch);
                char_x.push(origin.x + advance * sx);
            }
            advance += glyph.width * self.font_size / 1000.0 + self.char_spacing;
            if glyph.is_space {
                advance += self.word_spacing;
            }
        }

        self.tm = Matrix::translation(advance, 0.0).multiply(&self.tm);
        if !text.is_empty() {
            runs.push(TextRun {
                text,
                char_x,
                end_x: origin.x + advance * sx,
                baseline: origin.y,
                height: self.font_size * trm.vertical_scale(),
            });
        }
    }

    fn apply(&mut self, op: &Operation, fonts: &FontMap, runs: &mut Vec<TextRun>) {
        let fallback = FontDecoder::default();
        let decoder = self.font.as_ref().and_then(|name| fonts.get(name)).unwrap_or(&fallback);
        match op.operator.as_str() {
            "q" => self.stack.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.stack.pop() {
                    self.ctm = ctm;
                }
            },
            "cm" => {
                if let Some([a, b, c, d, e, f]) = op.matrix() {
                    self.ctm = Matrix::new(a, b, c, d, e, f).multiply(&self.ctm);
                }
            },
            "BT" => {
                self.tm = Matrix::identity();
                self.tlm = Matrix::identity();
            },
            "Tf" => {
                self.font = op.operands.first().and_then(Object::as_name).map(str::to_string);
                self.font_size = op.number(1).unwrap_or(self.font_size);
            },
            "TL" => self.leading = op.number(0).unwrap_or(self.leading),
            "Tc" => self.char_spacing = op.number(0).unwrap_or(0.0),
            "Tw" => self.word_spacing = op.number(0).unwrap_or(0.0),
            "Td" => self.move_line(op.number(0).unwrap_or(0.0), op.number(1).unwrap_or(0.0)),
            "TD" => {
                let ty = op.number(1).unwrap_or(0.0);
                self.leading = -ty;
                self.move_line(op.number(0).unwrap_or(0.0), ty);
            },
            "Tm" => {
                if let Some([a, b, c, d, e, f]) = op.matrix() {
                    self.tlm = Matrix::new(a, b, c, d, e, f);
                    self.tm = self.tlm;
                }
            },
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(bytes) = op.operands.first().and_then(Object::as_string) {
                    self.show(bytes, decoder, runs);
                }
            },
            "'" => {
                self.next_line();
                if let Some(bytes) = op.operands.first().and_then(Object::as_string) {
                    self.show(bytes, decoder, runs);
                }
            },
            "\"" => {
                self.word_spacing = op.number(0).unwrap_or(self.word_spacing);
                self.char_spacing = op.number(1).unwrap_or(self.char_spacing);
                self.next_line();
                if let Some(bytes) = op.operands.get(2).and_then(Object::as_string) {
                    self.show(bytes, decoder, runs);
                }
            },
            "TJ" => {
                let Some(items) = op.operands.first().and_then(Object::as_array) else {
                    return;
                };
                for item in items {
                    match item {
                        Object::String(bytes) => self.show(bytes, decoder, runs),
                        other => {
                            let adjust = other.as_number().unwrap_or(0.0) as f32;
                            let tx = -adjust / 1000.0 * self.font_size;
                            self.tm = Matrix::translation(tx, 0.0).multiply(&self.tm);
                            if adjust < -TJ_SPACE_THRESHOLD {
                                if let Some(last) = runs.last_mut() {
                                    last.text.push(' ');
                                    last.char_x.push(last.end_x);
                                }
                            }
                        },
                    }
                }
            },
            _ => {},
        }
    }
}

/// Text runs of a decoded content stream, in stream order. Fonts missing
/// from `fonts` read as WinAnsi with Helvetica widths.
pub(crate) fn text_runs(content: &[u8], fonts: &FontMap) -> Vec<TextRun> {
    let mut state = TextState::new();
    let mut runs = Vec::new();
    for op in parse_content_stream(content) {
        state.apply(&op, fonts, &mut runs);
    }
    runs
}

/// Lower-case `phrase` and collapse whitespace runs to single spaces.
pub(crate) fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First occurrence of the first phrase (in `phrases` order) that appears.
///
/// Runs on the same line that touch are joined directly; otherwise a space
/// separates them, so a phrase may span runs and lines.
pub(crate) fn find_anchor(runs: &[TextRun], phrases: &[String]) -> Option<AnchorHit> {
    // Normalized page text with, per char, the (run, char) it came from
    let mut text = String::new();
    let mut sources: Vec<(usize, usize)> = Vec::new();
    let mut last_was_space = true;

    for (run_index, run) in runs.iter().enumerate() {
        if run_index > 0 && !last_was_space {
            let prev = &runs[run_index - 1];
            let same_line = (prev.baseline - run.baseline).abs() <= run.height.max(prev.height) * 0.5;
            let touching = (run.char_x.first().copied().unwrap_or(run.end_x) - prev.end_x).abs()
                <= run.height.max(1.0) * 0.2;
            if !(same_line && touching) {
                text.push(' ');
                sources.push((run_index, 0));
                last_was_space = true;
            }
        }
        for (char_index, ch) in run.text.iter().enumerate() {
            if ch.is_whitespace() {
                if !last_was_space {
                    text.push(' ');
                    sources.push((run_index, char_index));
                    last_was_space = true;
                }
                continue;
            }
            for lower in ch.to_lowercase() {
                text.push(lower);
                sources.push((run_index, char_index));
            }
            last_was_space = false;
        }
    }

    let chars: Vec<char> = text.chars().collect();
    for phrase in phrases {
        let needle: Vec<char> = normalize_phrase(phrase).chars().collect();
        if needle.is_empty() || needle.len() > chars.len() {
            continue;
        }
        let Some(start) = chars.windows(needle.len()).position(|window| window == needle.as_slice()) else {
            continue;
        };
        let (run_index, char_index) = sources[start];
        let run = &runs[run_index];
        let x = run.char_x.get(char_index).copied().unwrap_or(run.end_x);
        return Some(AnchorHit {
            origin: Point::new(x, run.baseline),
            height: run.height,
        });
    }
    None
}
