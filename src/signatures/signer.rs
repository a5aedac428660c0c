//! Incremental PDF signing.
//!
//! Each signature is one incremental update holding the signature dictionary,
//! a widget annotation that doubles as the signature field, the updated page
//! `/Annots` and the updated `/AcroForm`. The ByteRange and `/Contents` are
//! written as fixed-width placeholders and patched once offsets are final.

use super::byterange::{ByteRangeCalculator, BYTE_RANGE_WIDTH};
use super::container::SignatureContainer;
use super::types::{SignatureSummary, SignedDocument, SigningError, SigningMode, SigningRequest};
use crate::config::SignerConfig;
use crate::document::{Page, PdfDocument};
use crate::error::Error;
use crate::identity::SignerIdentity;
use crate::object::{Dict, Object, ObjectRef};
use crate::writer::{IncrementalUpdate, ObjectSerializer};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Extra bytes added on top of the measured container size when growing the
/// placeholder.
const PLACEHOLDER_HEADROOM: usize = 512;

/// Annotation flags: Print | Locked.
const WIDGET_FLAGS: i64 = 132;

/// SignaturesExist | AppendOnly.
const SIG_FLAGS: i64 = 3;

/// Signs documents by appending one incremental update per signature.
#[derive(Debug, Clone, Default)]
pub struct IncrementalSigner {
    config: SignerConfig,
}

/// Serialized signature dictionary with the placeholder positions inside it.
#[derive(Debug, Clone)]
struct SignatureBody {
    bytes: Vec<u8>,
    byte_range_at: usize,
    contents_at: usize,
}

impl IncrementalSigner {
    /// Signer with the given settings.
    pub fn new(config: SignerConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    pub fn config(&self) -> &SignerConfig {
        &self.config
    }

    /// Sign `document` as `identity`.
    ///
    /// In [`SigningMode::AllPages`] one signature is added per page, each in
    /// its own revision, so a later signature covers every earlier one. The
    /// input bytes are always a prefix of the output.
    ///
    /// The certificate must be valid both now and at `request.signing_time`.
    pub fn sign(
        &self,
        document: impl Into<Bytes>,
        identity: &SignerIdentity,
        request: &SigningRequest,
    ) -> Result<SignedDocument, SigningError> {
        identity.check_validity(Utc::now())?;
        identity.check_validity(request.signing_time)?;

        let mut bytes: Bytes = document.into();

        let page_count = {
            let mut doc = open_signable(bytes.clone())?;
            doc.page_count()?
        };
        let pages: Vec<usize> = match request.mode {
            SigningMode::SinglePage => vec![0],
            SigningMode::AllPages => (0..page_count).collect(),
        };

        let mut summaries = Vec::with_capacity(pages.len());
        for page_index in pages {
            let (signed, summary) = self.sign_page(&bytes, page_index, identity, request)?;
            log::debug!(
                "signature {} on page {} covers {} bytes",
                summary.field_name,
                page_index,
                summary.covered_len()
            );
            bytes = Bytes::from(signed);
            summaries.push(summary);
        }

        log::info!(
            "signed document as '{}' ({} signature(s), {} bytes)",
            identity.name(),
            summaries.len(),
            bytes.len()
        );
        Ok(SignedDocument::new(bytes, summaries))
    }

    fn sign_page(
        &self,
        base: &Bytes,
        page_index: usize,
        identity: &SignerIdentity,
        request: &SigningRequest,
    ) -> Result<(Vec<u8>, SignatureSummary), SigningError> {
        let reserved = self.config.reserved_bytes;
        match self.sign_with_reservation(base, page_index, identity, request, reserved) {
            Err(SigningError::PlaceholderTooSmall { required, reserved }) if self.config.grow_placeholder => {
                let grown = required + PLACEHOLDER_HEADROOM;
                log::warn!(
                    "signature container needs {} bytes, {} reserved; retrying with {}",
                    required,
                    reserved,
                    grown
                );
                self.sign_with_reservation(base, page_index, identity, request, grown)
            },
            other => other,
        }
    }

    fn sign_with_reservation(
        &self,
        base: &Bytes,
        page_index: usize,
        identity: &SignerIdentity,
        request: &SigningRequest,
        reserved: usize,
    ) -> Result<(Vec<u8>, SignatureSummary), SigningError> {
        let mut doc = open_signable(base.clone())?;
        let page_count = doc.page_count()?;
        if page_index >= page_count {
            return Err(Error::InvalidPdf(format!(
                "page {} out of range (document has {} pages)",
                page_index, page_count
            ))
            .into());
        }
        let page = doc.page(page_index)?;
        let calc = ByteRangeCalculator::new(reserved);

        let mut update = IncrementalUpdate::new(&doc);
        let signature_ref = update.allocate();
        let widget_ref = update.allocate();

        let field_name = register_field(&mut doc, &mut update, widget_ref)?;
        attach_widget(&mut doc, &mut update, &page, widget_ref)?;

        let widget = Object::dict(vec![
            ("Type", Object::name("Annot")),
            ("Subtype", Object::name("Widget")),
            ("FT", Object::name("Sig")),
            ("Rect", Object::Array(vec![Object::Integer(0); 4])),
            ("F", Object::Integer(WIDGET_FLAGS)),
            ("P", page.reference.into()),
            ("T", Object::text(&field_name)),
            ("V", signature_ref.into()),
        ]);
        update.set(widget_ref, widget);

        let signer_name = request.signer_name.as_deref().unwrap_or(identity.name());
        let body = self.signature_body(&calc, request, signer_name);
        update.set_raw(signature_ref, body.bytes);

        let written = update.write(base)?;
        let body_offset = written.body_offset(signature_ref.id).ok_or_else(|| {
            Error::InvalidPdf("signature dictionary missing from the written update".to_string())
        })?;
        let byte_range_start = body_offset + body.byte_range_at;
        let contents_start = body_offset + body.contents_at;
        let mut out = written.bytes;

        let byte_range = calc.calculate_byte_range(out.len(), contents_start);
        let formatted = ByteRangeCalculator::format_byte_range(&byte_range)?;
        out[byte_range_start..byte_range_start + BYTE_RANGE_WIDTH].copy_from_slice(formatted.as_bytes());

        let digest = ByteRangeCalculator::digest(&out, &byte_range)?;
        let container = SignatureContainer::build(identity, digest, request.signing_time)?;
        if container.len() > reserved {
            return Err(SigningError::PlaceholderTooSmall {
                required: container.len(),
                reserved,
            });
        }
        calc.insert_signature(&mut out, contents_start, container.der())?;

        if ByteRangeCalculator::digest(&out, &byte_range)? != *container.digest() {
            return Err(SigningError::DigestMismatch);
        }

        Ok((
            out,
            SignatureSummary {
                field_name,
                page_index,
                signature_ref,
                widget_ref,
                byte_range,
            },
        ))
    }

    fn signature_body(&self, calc: &ByteRangeCalculator, request: &SigningRequest, signer_name: &str) -> SignatureBody {
        let serializer = ObjectSerializer::new();
        let mut bytes = Vec::with_capacity(calc.placeholder_size() + 512);

        bytes.extend_from_slice(b"<<\n  /Type /Sig\n  /Filter ");
        bytes.extend_from_slice(&serializer.serialize(&Object::name(&self.config.filter)));
        bytes.extend_from_slice(b"\n  /SubFilter ");
        bytes.extend_from_slice(&serializer.serialize(&Object::name(&self.config.sub_filter)));

        bytes.extend_from_slice(b"\n  /ByteRange ");
        let byte_range_at = bytes.len();
        bytes.extend_from_slice(ByteRangeCalculator::byte_range_placeholder().as_bytes());

        bytes.extend_from_slice(b"\n  /Contents ");
        let contents_at = bytes.len();
        bytes.extend_from_slice(calc.generate_placeholder().as_bytes());

        let entries = [
            ("M", pdf_date(request.signing_time)),
            ("Name", signer_name.to_string()),
            ("Reason", request.reason.clone()),
            ("Location", request.location.clone()),
            ("ContactInfo", request.contact.clone()),
        ];
        for (key, value) in entries {
            bytes.extend_from_slice(format!("\n  /{} ", key).as_bytes());
            bytes.extend_from_slice(&serializer.serialize(&Object::text(&value)));
        }
        bytes.extend_from_slice(b"\n>>");

        SignatureBody {
            bytes,
            byte_range_at,
            contents_at,
        }
    }
}

/// Parse `data` and refuse documents that cannot carry a signature.
fn open_signable(data: Bytes) -> Result<PdfDocument, SigningError> {
    let mut doc = PdfDocument::from_bytes(data)?;
    if doc.is_encrypted() {
        return Err(Error::Unsupported("signing encrypted documents".to_string()).into());
    }
    if doc.page_count()? == 0 {
        return Err(Error::InvalidPdf("document has no pages".to_string()).into());
    }
    Ok(doc)
}

/// Add `widget_ref` to `/AcroForm /Fields` and return a fresh field name.
///
/// An inline or missing AcroForm is written as a new object referenced from
/// the catalog.
fn register_field(
    doc: &mut PdfDocument,
    update: &mut IncrementalUpdate,
    widget_ref: ObjectRef,
) -> Result<String, SigningError> {
    let catalog_ref = doc.catalog_ref()?;
    let mut catalog = doc.catalog()?;

    let (acroform_ref, mut acroform) = match catalog.get("AcroForm") {
        Some(Object::Reference(r)) => (Some(*r), doc.load_dict(*r)?),
        Some(Object::Dictionary(d)) => (None, d.clone()),
        _ => (None, Dict::new()),
    };

    let mut fields = match acroform.get("Fields") {
        Some(obj) => doc.resolve(obj)?.as_array().cloned().unwrap_or_default(),
        None => Vec::new(),
    };
    let taken = field_names(doc, &fields);
    let field_name = (1..)
        .map(|n| format!("Signature{}", n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| "Signature".to_string());

    fields.push(widget_ref.into());
    acroform.insert("Fields".to_string(), Object::Array(fields));
    acroform.insert("SigFlags".to_string(), Object::Integer(SIG_FLAGS));

    match acroform_ref {
        Some(r) => update.set(r, Object::Dictionary(acroform)),
        None => {
            let r = update.add(Object::Dictionary(acroform));
            catalog.insert("AcroForm".to_string(), r.into());
            update.set(catalog_ref, Object::Dictionary(catalog));
        },
    }
    Ok(field_name)
}

/// `/T` values of the given fields. Unreadable fields are skipped.
fn field_names(doc: &mut PdfDocument, fields: &[Object]) -> HashSet<String> {
    let mut names = HashSet::new();
    for field in fields {
        let Ok(resolved) = doc.resolve(field) else {
            continue;
        };
        if let Some(title) = resolved.as_dict().and_then(|d| d.get("T")).and_then(Object::as_string) {
            names.insert(decode_text(title));
        }
    }
    names
}

/// Append `widget_ref` to the page's `/Annots`.
fn attach_widget(
    doc: &mut PdfDocument,
    update: &mut IncrementalUpdate,
    page: &Page,
    widget_ref: ObjectRef,
) -> Result<(), SigningError> {
    let mut page_dict = page.dict.clone();
    match page_dict.get("Annots").cloned() {
        Some(Object::Reference(r)) => match doc.load_object(r)? {
            Object::Array(mut annots) => {
                annots.push(widget_ref.into());
                update.set(r, Object::Array(annots));
                return Ok(());
            },
            other => log::warn!("/Annots {} is a {}, replacing it", r, other.type_name()),
        },
        Some(Object::Array(mut annots)) => {
            annots.push(widget_ref.into());
            page_dict.insert("Annots".to_string(), Object::Array(annots));
            update.set(page.reference, Object::Dictionary(page_dict));
            return Ok(());
        },
        _ => {},
    }
    page_dict.insert("Annots".to_string(), Object::Array(vec![widget_ref.into()]));
    update.set(page.reference, Object::Dictionary(page_dict));
    Ok(())
}

/// Text string bytes as Rust text (UTF-16BE with BOM, else Latin-1).
pub(crate) fn decode_text(raw: &[u8]) -> String {
    if let Some(utf16) = raw.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    raw.iter().map(|&b| b as char).collect()
}

/// `D:YYYYMMDDHHmmSS+00'00'`
fn pdf_date(at: DateTime<Utc>) -> String {
    format!("D:{}+00'00'", at.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request() -> SigningRequest {
        SigningRequest::new(Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap())
            .with_reason("Approved (final)")
            .with_location("Manipal, India")
    }

    #[test]
    fn test_pdf_date() {
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap();
        assert_eq!(pdf_date(at), "D:20240305140709+00'00'");
    }

    #[test]
    fn test_signature_body_layout() {
        let signer = IncrementalSigner::default();
        let calc = ByteRangeCalculator::new(16);
        let body = signer.signature_body(&calc, &request(), "Dr. Jane Doe");
        let text = String::from_utf8(body.bytes.clone()).unwrap();

        assert!(text.starts_with("<<\n  /Type /Sig\n  /Filter /Adobe.PPKLite\n"));
        assert!(text.contains("/SubFilter /adbe.pkcs7.detached"));
        assert!(text.contains("/M (D:20240305140709+00'00')"));
        assert!(text.contains("/Name (Dr. Jane Doe)"));
        assert!(text.contains("/Reason (Approved \\(final\\))"));
        assert!(text.ends_with(">>"));

        let range = &body.bytes[body.byte_range_at..body.byte_range_at + BYTE_RANGE_WIDTH];
        assert!(range.starts_with(b"[0 0 0 0]"));
        let contents = &body.bytes[body.contents_at..body.contents_at + calc.placeholder_size()];
        assert_eq!(contents, calc.generate_placeholder().as_bytes());
    }

    #[test]
    fn test_signature_body_non_ascii_name() {
        let signer = IncrementalSigner::default();
        let calc = ByteRangeCalculator::new(4);
        let body = signer.signature_body(&calc, &request(), "Zoë");
        let text = String::from_utf8_lossy(&body.bytes);
        assert!(text.contains("/Name <FEFF005A006F00EB>"));
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text(b"Signature1"), "Signature1");
        assert_eq!(decode_text(&[0xFE, 0xFF, 0x00, 0x5A, 0x00, 0xEB]), "Zë");
        assert_eq!(decode_text(&[0xE9]), "é");
    }
}
