//! Signature verification.
//!
//! Re-checks every signature field of a document independently of how it was
//! produced: the byte range, the digest over it, and the CMS signature with
//! the certificate embedded in the container. Trust in that certificate is not
//! evaluated.

use super::byterange::ByteRangeCalculator;
use super::signer::decode_text;
use super::types::VerifiedSignature;
use crate::document::PdfDocument;
use crate::error::Result;
use crate::identity::{certificate_info, from_asn1_time};
use crate::object::{Dict, Object, ObjectRef};
use crate::parser::decode_hex;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier};
use const_oid::db::rfc5911::{ID_MESSAGE_DIGEST, ID_SIGNED_DATA, ID_SIGNING_TIME};
use const_oid::db::rfc5912::ID_SHA_256;
use der::asn1::OctetString;
use der::{Decode, Encode, SliceReader};
use rsa::pkcs1v15::VerifyingKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha2::Sha256;
use signature::Verifier;
use std::collections::HashSet;
use x509_cert::time::Time;

/// Maximum depth of the field tree walk.
const MAX_FIELD_DEPTH: u32 = 8;

/// Verifier for the signatures of a document.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

/// The parts of a CMS container needed for verification.
struct ParsedContainer {
    message_digest: Option<Vec<u8>>,
    signing_time: Option<DateTime<Utc>>,
    digest_is_sha256: bool,
    signed_attrs: Vec<u8>,
    signature: Vec<u8>,
    certificate_der: Option<Vec<u8>>,
}

impl SignatureVerifier {
    /// Verify every signature field in `data`, ordered by covered length.
    ///
    /// Fails only when the document itself cannot be parsed; problems with an
    /// individual signature are reported in its `messages`.
    pub fn verify_all(data: &[u8]) -> Result<Vec<VerifiedSignature>> {
        let mut doc = PdfDocument::from_bytes(Bytes::copy_from_slice(data))?;
        let fields = signature_fields(&mut doc)?;
        log::debug!("found {} signature field(s)", fields.len());

        let mut results: Vec<VerifiedSignature> = fields
            .into_iter()
            .map(|(name, sig)| verify_field(data, name, &sig))
            .collect();
        results.sort_by_key(|v| v.covered_len);
        Ok(results)
    }
}

/// `(qualified name, signature dictionary)` of every signed `/FT /Sig` field.
fn signature_fields(doc: &mut PdfDocument) -> Result<Vec<(String, Dict)>> {
    let catalog = doc.catalog()?;
    let Some(acroform) = catalog.get("AcroForm") else {
        return Ok(Vec::new());
    };
    let acroform = doc.resolve(acroform)?;
    let fields = match acroform.as_dict().and_then(|d| d.get("Fields")) {
        Some(fields) => doc.resolve(fields)?,
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for field in fields.as_array().cloned().unwrap_or_default() {
        walk_field(doc, &field, None, "", 0, &mut seen, &mut out);
    }
    Ok(out)
}

fn walk_field(
    doc: &mut PdfDocument,
    field: &Object,
    inherited_ft: Option<&str>,
    parent_name: &str,
    depth: u32,
    seen: &mut HashSet<ObjectRef>,
    out: &mut Vec<(String, Dict)>,
) {
    if depth > MAX_FIELD_DEPTH {
        log::warn!("field tree deeper than {}, ignoring the rest", MAX_FIELD_DEPTH);
        return;
    }
    if let Object::Reference(r) = field {
        if !seen.insert(*r) {
            return;
        }
    }
    let dict = match doc.resolve(field) {
        Ok(Object::Dictionary(dict)) => dict,
        Ok(other) => {
            log::debug!("skipping form field of type {}", other.type_name());
            return;
        },
        Err(e) => {
            log::warn!("unreadable form field: {}", e);
            return;
        },
    };

    let partial = dict.get("T").and_then(Object::as_string).map(decode_text);
    let name = match (parent_name, partial) {
        ("", Some(partial)) => partial,
        (parent, Some(partial)) => format!("{}.{}", parent, partial),
        (parent, None) => parent.to_string(),
    };
    let ft = dict
        .get("FT")
        .and_then(Object::as_name)
        .map(str::to_string)
        .or_else(|| inherited_ft.map(str::to_string));

    if let Some(Object::Array(kids)) = dict.get("Kids").map(|k| doc.resolve(k).unwrap_or(Object::Null)) {
        for kid in &kids {
            walk_field(doc, kid, ft.as_deref(), &name, depth + 1, seen, out);
        }
    }

    if ft.as_deref() != Some("Sig") {
        return;
    }
    match dict.get("V").map(|v| doc.resolve(v)) {
        Some(Ok(Object::Dictionary(sig))) => out.push((name, sig)),
        Some(Err(e)) => log::warn!("signature value of '{}' is unreadable: {}", name, e),
        _ => log::debug!("signature field '{}' is unsigned", name),
    }
}

fn verify_field(data: &[u8], field_name: String, sig: &Dict) -> VerifiedSignature {
    let mut result = VerifiedSignature {
        field_name,
        byte_range: [0; 4],
        covered_len: 0,
        digest_matches: false,
        signature_valid: false,
        signer_cn: None,
        signing_time: None,
        messages: Vec::new(),
    };

    let Some(byte_range) = read_byte_range(sig) else {
        result.messages.push("missing or malformed /ByteRange".to_string());
        return result;
    };
    result.byte_range = byte_range;
    result.covered_len = byte_range[2].saturating_add(byte_range[3]);

    if let Err(e) = ByteRangeCalculator::validate_byte_range(&byte_range, data.len()) {
        result.messages.push(e.to_string());
        return result;
    }
    let contents = match hole_contents(&data[byte_range[1]..byte_range[2]]) {
        Ok(contents) => contents,
        Err(msg) => {
            result.messages.push(msg);
            return result;
        },
    };
    if let Some(parsed) = sig.get("Contents").and_then(Object::as_string) {
        if parsed != contents.as_slice() {
            result
                .messages
                .push("ByteRange hole is not the /Contents value".to_string());
        }
    }

    let digest = match ByteRangeCalculator::digest(data, &byte_range) {
        Ok(digest) => digest,
        Err(e) => {
            result.messages.push(e.to_string());
            return result;
        },
    };
    let container = match parse_container(&contents) {
        Ok(container) => container,
        Err(msg) => {
            result.messages.push(msg);
            return result;
        },
    };

    result.signing_time = container.signing_time;
    if !container.digest_is_sha256 {
        result.messages.push("digest algorithm is not SHA-256".to_string());
    }
    match &container.message_digest {
        Some(md) => {
            result.digest_matches = md.as_slice() == digest.as_slice();
            if !result.digest_matches {
                result
                    .messages
                    .push("message digest does not match the byte range".to_string());
            }
        },
        None => result.messages.push("message-digest attribute missing".to_string()),
    }

    let Some(cert_der) = &container.certificate_der else {
        result.messages.push("signer certificate missing".to_string());
        return result;
    };
    result.signer_cn = certificate_info(cert_der).ok().map(|info| info.subject_cn);
    match verify_rsa(cert_der, &container.signed_attrs, &container.signature) {
        Ok(()) => result.signature_valid = true,
        Err(msg) => result.messages.push(msg),
    }

    log::debug!(
        "signature '{}': digest {}, signature {}",
        result.field_name,
        if result.digest_matches { "ok" } else { "BAD" },
        if result.signature_valid { "ok" } else { "BAD" }
    );
    result
}

fn read_byte_range(sig: &Dict) -> Option<[usize; 4]> {
    let values = sig.get("ByteRange")?.as_array()?;
    if values.len() != 4 {
        return None;
    }
    let mut range = [0usize; 4];
    for (slot, value) in range.iter_mut().zip(values) {
        *slot = usize::try_from(value.as_integer()?).ok()?;
    }
    Some(range)
}

/// Decode the `<hex>` string sitting in the ByteRange hole.
fn hole_contents(hole: &[u8]) -> std::result::Result<Vec<u8>, String> {
    let inner = hole
        .strip_prefix(b"<")
        .and_then(|rest| rest.strip_suffix(b">"))
        .ok_or_else(|| "ByteRange hole is not a hex string".to_string())?;
    if !inner.iter().all(|c| c.is_ascii_hexdigit() || c.is_ascii_whitespace()) {
        return Err("ByteRange hole contains non-hex bytes".to_string());
    }
    decode_hex(inner).map_err(|e| e.to_string())
}

fn parse_container(contents: &[u8]) -> std::result::Result<ParsedContainer, String> {
    let der_err = |what: &str| {
        let what = what.to_string();
        move |e: der::Error| format!("{}: {}", what, e)
    };

    // The placeholder's zero padding follows the DER value
    let mut reader = SliceReader::new(contents).map_err(der_err("CMS container"))?;
    let content_info = ContentInfo::decode(&mut reader).map_err(der_err("CMS container"))?;
    if content_info.content_type != ID_SIGNED_DATA {
        return Err(format!("CMS content type {} is not SignedData", content_info.content_type));
    }
    let signed_data = SignedData::from_der(&content_info.content.to_der().map_err(der_err("SignedData"))?)
        .map_err(der_err("SignedData"))?;

    let signer_info = signed_data
        .signer_infos
        .0
        .iter()
        .next()
        .ok_or_else(|| "no SignerInfo in container".to_string())?;
    let attrs = signer_info
        .signed_attrs
        .as_ref()
        .ok_or_else(|| "no signed attributes".to_string())?;

    let mut message_digest = None;
    let mut signing_time = None;
    for attr in attrs.iter() {
        let Some(value) = attr.values.iter().next() else {
            continue;
        };
        let encoded = value.to_der().map_err(der_err("signed attribute"))?;
        if attr.oid == ID_MESSAGE_DIGEST {
            let octets = OctetString::from_der(&encoded).map_err(der_err("message digest"))?;
            message_digest = Some(octets.as_bytes().to_vec());
        } else if attr.oid == ID_SIGNING_TIME {
            signing_time = Time::from_der(&encoded).ok().as_ref().and_then(from_asn1_time);
        }
    }

    let certificates: Vec<_> = signed_data
        .certificates
        .iter()
        .flat_map(|set| set.0.iter())
        .filter_map(|choice| match choice {
            CertificateChoices::Certificate(cert) => Some(cert),
            _ => None,
        })
        .collect();
    let signer_cert = match &signer_info.sid {
        SignerIdentifier::IssuerAndSerialNumber(id) => certificates.iter().find(|cert| {
            cert.tbs_certificate.issuer == id.issuer && cert.tbs_certificate.serial_number == id.serial_number
        }),
        SignerIdentifier::SubjectKeyIdentifier(_) => None,
    }
    .or_else(|| certificates.first());
    let certificate_der = signer_cert
        .map(|cert| cert.to_der())
        .transpose()
        .map_err(der_err("certificate"))?;

    Ok(ParsedContainer {
        message_digest,
        signing_time,
        digest_is_sha256: signer_info.digest_alg.oid == ID_SHA_256,
        signed_attrs: attrs.to_der().map_err(der_err("signed attributes"))?,
        signature: signer_info.signature.as_bytes().to_vec(),
        certificate_der,
    })
}

/// RSA PKCS#1 v1.5 / SHA-256 check of `signature` over the DER signed attributes.
fn verify_rsa(cert_der: &[u8], signed_attrs: &[u8], signature: &[u8]) -> std::result::Result<(), String> {
    let cert = x509_cert::Certificate::from_der(cert_der).map_err(|e| format!("certificate: {}", e))?;
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| format!("public key: {}", e))?;
    let public_key = RsaPublicKey::from_public_key_der(&spki).map_err(|e| format!("public key: {}", e))?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signature =
        rsa::pkcs1v15::Signature::try_from(signature).map_err(|e| format!("signature value: {}", e))?;
    verifying_key
        .verify(signed_attrs, &signature)
        .map_err(|_| "CMS signature does not verify".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_byte_range() {
        let sig: Dict = [(
            "ByteRange".to_string(),
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(10),
                Object::Integer(30),
                Object::Integer(5),
            ]),
        )]
        .into_iter()
        .collect();
        assert_eq!(read_byte_range(&sig), Some([0, 10, 30, 5]));

        let negative: Dict = [(
            "ByteRange".to_string(),
            Object::Array(vec![Object::Integer(0), Object::Integer(-1), Object::Integer(3), Object::Integer(4)]),
        )]
        .into_iter()
        .collect();
        assert_eq!(read_byte_range(&negative), None);
        assert_eq!(read_byte_range(&Dict::new()), None);
    }

    #[test]
    fn test_hole_contents() {
        assert_eq!(hole_contents(b"<ABCD00>").unwrap(), vec![0xAB, 0xCD, 0x00]);
        assert!(hole_contents(b"ABCD").is_err());
        assert!(hole_contents(b"<AB)CD>").is_err());
    }

    #[test]
    fn test_garbage_container() {
        assert!(parse_container(&[0x30, 0x03, 0x02, 0x01, 0x00]).is_err());
        assert!(parse_container(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_verify_field_reports_bad_range() {
        let data = b"%PDF-1.7 short file";
        let sig: Dict = [(
            "ByteRange".to_string(),
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(5),
                Object::Integer(8),
                Object::Integer(500),
            ]),
        )]
        .into_iter()
        .collect();
        let result = verify_field(data, "Signature1".to_string(), &sig);
        assert!(!result.is_valid());
        assert_eq!(result.covered_len, 508);
        assert_eq!(result.messages.len(), 1);
    }

    #[test]
    fn test_unsigned_document_has_no_signatures() {
        let pdf = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n";
        let mut data = pdf.to_vec();
        let xref_offset = data.len();
        data.extend_from_slice(
            format!(
                "xref\n0 3\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                9, 58, xref_offset
            )
            .as_bytes(),
        );
        assert!(SignatureVerifier::verify_all(&data).unwrap().is_empty());
    }
}
