//! Content stream builder for stamp overlays.
//!
//! Operators are collected as [`ContentStreamOp`] values and written one per
//! line. Numbers go through the same formatter as the object serializer, so a
//! given sequence of operations always yields the same bytes.

use crate::writer::object_serializer::format_real;

/// Operations that can be added to a content stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentStreamOp {
    /// Save graphics state (q)
    SaveState,
    /// Restore graphics state (Q)
    RestoreState,
    /// Concatenate to the transformation matrix (cm)
    Transform(f32, f32, f32, f32, f32, f32),
    /// Begin text object (BT)
    BeginText,
    /// End text object (ET)
    EndText,
    /// Set font resource and size (Tf)
    SetFont(String, f32),
    /// Set text matrix (Tm)
    SetTextMatrix(f32, f32, f32, f32, f32, f32),
    /// Show a string already encoded for the current font (Tj)
    ShowText(Vec<u8>),
    /// Set fill color gray (g)
    SetFillColorGray(f32),
    /// Set fill color RGB (rg)
    SetFillColorRGB(f32, f32, f32),
    /// Rectangle path (re)
    Rectangle(f32, f32, f32, f32),
    /// Clip with the non-zero rule (W)
    Clip,
    /// End the path without painting (n)
    EndPath,
    /// Paint an XObject resource (Do)
    PaintXObject(String),
}

/// Builder for content stream bytes.
#[derive(Debug, Clone, Default)]
pub struct ContentStreamBuilder {
    operations: Vec<ContentStreamOp>,
    in_text_object: bool,
}

impl ContentStreamBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation.
    pub fn op(&mut self, op: ContentStreamOp) -> &mut Self {
        self.operations.push(op);
        self
    }

    /// `q`
    pub fn save_state(&mut self) -> &mut Self {
        self.op(ContentStreamOp::SaveState)
    }

    /// `Q`
    pub fn restore_state(&mut self) -> &mut Self {
        self.op(ContentStreamOp::RestoreState)
    }

    /// `cm`
    pub fn transform(&mut self, a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> &mut Self {
        self.op(ContentStreamOp::Transform(a, b, c, d, e, f))
    }

    /// Clip subsequent painting to a rectangle.
    pub fn clip_rect(&mut self, x: f32, y: f32, width: f32, height: f32) -> &mut Self {
        self.op(ContentStreamOp::Rectangle(x, y, width, height))
            .op(ContentStreamOp::Clip)
            .op(ContentStreamOp::EndPath)
    }

    /// Draw an image XObject scaled into the given box.
    pub fn draw_image(&mut self, name: &str, x: f32, y: f32, width: f32, height: f32) -> &mut Self {
        self.save_state()
            .transform(width, 0.0, 0.0, height, x, y)
            .op(ContentStreamOp::PaintXObject(name.to_string()))
            .restore_state()
    }

    /// Fill gray level for following text or shapes.
    pub fn fill_gray(&mut self, level: f32) -> &mut Self {
        self.op(ContentStreamOp::SetFillColorGray(level))
    }

    /// Fill color for following text or shapes.
    pub fn fill_rgb(&mut self, r: f32, g: f32, b: f32) -> &mut Self {
        self.op(ContentStreamOp::SetFillColorRGB(r, g, b))
    }

    /// Begin a text object (no-op when already inside one).
    pub fn begin_text(&mut self) -> &mut Self {
        if !self.in_text_object {
            self.op(ContentStreamOp::BeginText);
            self.in_text_object = true;
        }
        self
    }

    /// End a text object (no-op when not inside one).
    pub fn end_text(&mut self) -> &mut Self {
        if self.in_text_object {
            self.op(ContentStreamOp::EndText);
            self.in_text_object = false;
        }
        self
    }

    /// Show `encoded` with its baseline origin at (x, y).
    pub fn text_at(&mut self, font: &str, size: f32, x: f32, y: f32, encoded: Vec<u8>) -> &mut Self {
        self.begin_text()
            .op(ContentStreamOp::SetFont(font.to_string(), size))
            .op(ContentStreamOp::SetTextMatrix(1.0, 0.0, 0.0, 1.0, x, y))
            .op(ContentStreamOp::ShowText(encoded))
            .end_text()
    }

    /// Build the content stream, closing an open text object.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for op in &self.operations {
            write_op(&mut buf, op);
            buf.push(b'\n');
        }
        if self.in_text_object {
            write_op(&mut buf, &ContentStreamOp::EndText);
            buf.push(b'\n');
        }
        buf
    }
}

fn push_numbers(w: &mut Vec<u8>, values: &[f32]) {
    for v in values {
        w.extend_from_slice(format_real(*v as f64).as_bytes());
        w.push(b' ');
    }
}

fn write_op(w: &mut Vec<u8>, op: &ContentStreamOp) {
    match op {
        ContentStreamOp::SaveState => w.push(b'q'),
        ContentStreamOp::RestoreState => w.push(b'Q'),
        ContentStreamOp::Transform(a, b, c, d, e, f) => {
            push_numbers(w, &[*a, *b, *c, *d, *e, *f]);
            w.extend_from_slice(b"cm");
        },
        ContentStreamOp::BeginText => w.extend_from_slice(b"BT"),
        ContentStreamOp::EndText => w.extend_from_slice(b"ET"),
        ContentStreamOp::SetFont(name, size) => {
            w.push(b'/');
            w.extend_from_slice(name.as_bytes());
            w.push(b' ');
            push_numbers(w, &[*size]);
            w.extend_from_slice(b"Tf");
        },
        ContentStreamOp::SetTextMatrix(a, b, c, d, e, f) => {
            push_numbers(w, &[*a, *b, *c, *d, *e, *f]);
            w.extend_from_slice(b"Tm");
        },
        ContentStreamOp::ShowText(text) => {
            w.push(b'(');
            write_escaped(w, text);
            w.extend_from_slice(b") Tj");
        },
        ContentStreamOp::SetFillColorGray(g) => {
            push_numbers(w, &[*g]);
            w.push(b'g');
        },
        ContentStreamOp::SetFillColorRGB(r, g, b) => {
            push_numbers(w, &[*r, *g, *b]);
            w.extend_from_slice(b"rg");
        },
        ContentStreamOp::Rectangle(x, y, width, height) => {
            push_numbers(w, &[*x, *y, *width, *height]);
            w.extend_from_slice(b"re");
        },
        ContentStreamOp::Clip => w.push(b'W'),
        ContentStreamOp::EndPath => w.push(b'n'),
        ContentStreamOp::PaintXObject(name) => {
            w.push(b'/');
            w.extend_from_slice(name.as_bytes());
            w.extend_from_slice(b" Do");
        },
    }
}

fn write_escaped(w: &mut Vec<u8>, text: &[u8]) {
    for &byte in text {
        match byte {
            b'(' => w.extend_from_slice(b"\\("),
            b')' => w.extend_from_slice(b"\\)"),
            b'\\' => w.extend_from_slice(b"\\\\"),
            b'\n' => w.extend_from_slice(b"\\n"),
            b'\r' => w.extend_from_slice(b"\\r"),
            0x80..=0xFF => w.extend_from_slice(format!("\\{:03o}", byte).as_bytes()),
            _ => w.push(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_placement() {
        let mut b = ContentStreamBuilder::new();
        b.draw_image("SealIm1", 435.0, 72.0, 105.0, 33.5);
        assert_eq!(
            String::from_utf8(b.build()).unwrap(),
            "q\n105 0 0 33.5 435 72 cm\n/SealIm1 Do\nQ\n"
        );
    }

    #[test]
    fn test_text_is_escaped() {
        let mut b = ContentStreamBuilder::new();
        b.text_at("SealF1", 9.0, 10.0, 20.0, b"Dr. (Jane) \\ Doe".to_vec());
        let out = String::from_utf8(b.build()).unwrap();
        assert!(out.contains("BT\n/SealF1 9 Tf\n1 0 0 1 10 20 Tm\n"));
        assert!(out.contains("(Dr. \\(Jane\\) \\\\ Doe) Tj\nET\n"));
    }

    #[test]
    fn test_high_bytes_are_octal() {
        let mut b = ContentStreamBuilder::new();
        b.op(ContentStreamOp::ShowText(vec![0xE9]));
        assert_eq!(b.build(), b"(\\351) Tj\n");
    }

    #[test]
    fn test_unclosed_text_object_is_closed() {
        let mut b = ContentStreamBuilder::new();
        b.begin_text().begin_text();
        assert_eq!(b.build(), b"BT\nET\n");
    }

    #[test]
    fn test_clip_and_colors() {
        let mut b = ContentStreamBuilder::new();
        b.clip_rect(0.0, 0.0, 10.0, 5.0).fill_gray(0.0).fill_rgb(0.1, 0.2, 0.3);
        assert_eq!(
            String::from_utf8(b.build()).unwrap(),
            "0 0 10 5 re\nW\nn\n0 g\n0.1 0.2 0.3 rg\n"
        );
    }
}
