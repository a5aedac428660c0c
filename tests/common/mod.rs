//! Shared helpers for the integration tests.
//!
//! Builds small PDFs from scratch (classic xref table or xref stream), PNG
//! signature images, and one RSA identity shared by every test in a binary so
//! key generation runs once.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use pdf_seal::config::IdentityConfig;
use pdf_seal::{IdentityStore, SignerIdentity};
use std::io::Cursor;
use std::sync::OnceLock;

/// Name of the shared test signer.
pub const SIGNER: &str = "Dr. Jane Doe";

/// Page text containing the default anchor phrase at (72, 150).
pub const ANCHOR_PAGE: &str = "BT /F1 12 Tf 72 700 Td (Internal Assessment Marks) Tj ET\n\
                               BT /F1 12 Tf 72 150 Td (Signature of the Course Instructor) Tj ET";

/// Page text without any anchor phrase.
pub const PLAIN_PAGE: &str = "BT /F1 12 Tf 72 700 Td (Attendance Report) Tj ET";

/// Route `log` output through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The shared identity, created once per test binary and valid from yesterday.
pub fn identity() -> &'static SignerIdentity {
    static IDENTITY: OnceLock<SignerIdentity> = OnceLock::new();
    IDENTITY.get_or_init(|| {
        IdentityStore::in_memory(IdentityConfig::default())
            .resolve_at(SIGNER, Utc::now() - Duration::days(1))
            .expect("generate shared test identity")
    })
}

/// Name of the signer whose certificate has already run out.
pub const EXPIRED_SIGNER: &str = "Dr. Past Due";

/// An identity created 800 days ago, so the default two-year certificate
/// expired about ten weeks before today.
pub fn expired_identity() -> &'static SignerIdentity {
    static IDENTITY: OnceLock<SignerIdentity> = OnceLock::new();
    IDENTITY.get_or_init(|| {
        IdentityStore::in_memory(IdentityConfig::default())
            .resolve_at(EXPIRED_SIGNER, Utc::now() - Duration::days(800))
            .expect("generate expired test identity")
    })
}

/// A store holding the shared identity under [`SIGNER`].
pub fn store_with_identity(config: IdentityConfig) -> IdentityStore {
    let store = IdentityStore::in_memory(config);
    let shared = identity();
    store
        .import(SIGNER, shared.private_key_pem(), shared.certificate_pem(), None)
        .expect("import shared identity");
    store
}

/// Minimal PDF writer for test inputs.
#[derive(Debug, Clone, Default)]
pub struct TestPdf {
    pages: Vec<String>,
    xref_stream: bool,
    encrypted: bool,
    cid_font: bool,
}

impl TestPdf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a US Letter page with the given content stream.
    pub fn page(mut self, content: &str) -> Self {
        self.pages.push(content.to_string());
        self
    }

    /// Use a cross-reference stream instead of a classic table.
    pub fn xref_stream(mut self) -> Self {
        self.xref_stream = true;
        self
    }

    /// Add a composite font `/F2` whose two-byte codes are only readable
    /// through its ToUnicode map. See [`cid_hex`].
    pub fn cid_font(mut self) -> Self {
        self.cid_font = true;
        self
    }

    /// Add an `/Encrypt` entry to the trailer.
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let header: &[u8] = if self.xref_stream {
            b"%PDF-1.5\n%\xE2\xE3\xCF\xD3\n"
        } else {
            b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n"
        };
        let mut out = header.to_vec();
        let mut offsets = Vec::new();

        let kids: Vec<String> = (0..self.pages.len()).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
        let mut objects = vec![
            "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
            format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), self.pages.len()),
            "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>".to_string(),
        ];
        let cid_font_id = 4 + 2 * self.pages.len();
        let fonts = if self.cid_font {
            format!("/F1 3 0 R /F2 {} 0 R", cid_font_id)
        } else {
            "/F1 3 0 R".to_string()
        };
        for (i, content) in self.pages.iter().enumerate() {
            objects.push(format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
                 /Resources << /Font << {} >> >> /Contents {} 0 R >>",
                fonts,
                5 + 2 * i
            ));
            objects.push(format!(
                "<< /Length {} >>\nstream\n{}\nendstream",
                content.len(),
                content
            ));
        }

        if self.cid_font {
            objects.push(format!(
                "<< /Type /Font /Subtype /Type0 /BaseFont /ABCDEF+NotoSans /Encoding /Identity-H \
                 /DescendantFonts [{} 0 R] /ToUnicode {} 0 R >>",
                cid_font_id + 1,
                cid_font_id + 2
            ));
            objects.push(
                "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /ABCDEF+NotoSans \
                 /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> \
                 /DW 600 /W [3 [260] 54 [560]] >>"
                    .to_string(),
            );
            objects.push(format!("<< /Length {} >>\nstream\n{}\nendstream", SHIFTED_CMAP.len(), SHIFTED_CMAP));
        }

        for (i, body) in objects.iter().enumerate() {
            offsets.push(out.len());
            out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }

        let encrypt = if self.encrypted {
            " /Encrypt << /Filter /Standard /V 1 /R 2 /O <00> /U <00> /P -4 >> /ID [<0102> <0102>]"
        } else {
            ""
        };

        if self.xref_stream {
            let id = objects.len() + 1;
            let xref_at = out.len();
            offsets.push(xref_at);
            let mut rows = vec![0u8, 0, 0, 0, 0, 0xFF, 0xFF];
            for offset in &offsets {
                rows.push(1);
                rows.extend_from_slice(&(*offset as u32).to_be_bytes());
                rows.extend_from_slice(&[0, 0]);
            }
            out.extend_from_slice(
                format!(
                    "{} 0 obj\n<< /Type /XRef /Size {} /W [1 4 2] /Root 1 0 R{} /Length {} >>\nstream\n",
                    id,
                    id + 1,
                    encrypt,
                    rows.len()
                )
                .as_bytes(),
            );
            out.extend_from_slice(&rows);
            out.extend_from_slice(format!("\nendstream\nendobj\nstartxref\n{}\n%%EOF\n", xref_at).as_bytes());
        } else {
            let xref_at = out.len();
            out.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", offsets.len() + 1).as_bytes());
            for offset in &offsets {
                out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
            }
            out.extend_from_slice(
                format!(
                    "trailer\n<< /Size {} /Root 1 0 R{} >>\nstartxref\n{}\n%%EOF\n",
                    offsets.len() + 1,
                    encrypt,
                    xref_at
                )
                .as_bytes(),
            );
        }
        out
    }
}

/// ToUnicode map of the [`TestPdf::cid_font`] font: glyph ids sit 0x1D
/// below the characters they show.
const SHIFTED_CMAP: &str = "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
                            1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n\
                            1 beginbfrange\n<0003> <0061> <0020>\nendbfrange\n\
                            endcmap\nend\nend";

/// `text` as a hex string in the [`TestPdf::cid_font`] encoding.
pub fn cid_hex(text: &str) -> String {
    let codes: String = text.chars().map(|c| format!("{:04X}", c as u32 - 0x1D)).collect();
    format!("<{}>", codes)
}

/// A one-page document with the anchor phrase.
pub fn anchor_pdf() -> Vec<u8> {
    TestPdf::new().page(ANCHOR_PAGE).build()
}

/// A document of `n` pages without anchors.
pub fn plain_pdf(n: usize) -> Vec<u8> {
    (0..n).fold(TestPdf::new(), |pdf, _| pdf.page(PLAIN_PAGE)).build()
}

/// A `width` x `height` RGB PNG.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 7) as u8, (y * 5) as u8, 90]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .expect("encode png");
    buf
}

/// A PNG with an alpha channel.
pub fn png_with_alpha(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_fn(width, height, |x, _| image::Rgba([10, 20, 30, (x * 10) as u8]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .expect("encode png");
    buf
}

/// Position of `needle` in `haystack`.
pub fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Number of occurrences of `needle` in `haystack`.
pub fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}
