//! Signing as incremental updates, checked with the independent verifier.

mod common;

use chrono::{Duration, Utc};
use common::{
    SIGNER, TestPdf, anchor_pdf, count, expired_identity, find, identity, init_logging, plain_pdf, PLAIN_PAGE,
};
use pdf_seal::config::SignerConfig;
use pdf_seal::signatures::{IncrementalSigner, SignatureVerifier, SigningError, SigningMode, SigningRequest};
use pdf_seal::xref::XRefKind;
use pdf_seal::identity::IdentityError;
use pdf_seal::{Error, PdfDocument, VerifiedSignature};

fn request() -> SigningRequest {
    SigningRequest::new(Utc::now())
}

#[test]
fn test_single_signature_verifies() {
    init_logging();
    let input = anchor_pdf();
    let req = request();
    let signed = IncrementalSigner::default().sign(input.clone(), identity(), &req).unwrap();
    let out = signed.as_bytes();

    assert!(out.starts_with(&input));
    assert_eq!(signed.signatures().len(), 1);
    let summary = &signed.signatures()[0];
    assert_eq!(summary.field_name, "Signature1");
    assert_eq!(summary.page_index, 0);
    assert_eq!(summary.covered_len(), out.len());

    let verified: Vec<VerifiedSignature> = SignatureVerifier::verify_all(out).unwrap();
    assert_eq!(verified.len(), 1);
    let sig = &verified[0];
    assert!(sig.is_valid(), "{:?}", sig.messages);
    assert_eq!(sig.field_name, "Signature1");
    assert_eq!(sig.byte_range, summary.byte_range);
    assert_eq!(sig.byte_range[0], 0);
    assert_eq!(sig.covered_len, out.len());
    assert_eq!(sig.signer_cn.as_deref(), Some(SIGNER));
    let skew = (sig.signing_time.unwrap() - req.signing_time).num_seconds().abs();
    assert!(skew <= 1);
}

#[test]
fn test_expired_certificate_cannot_sign() {
    let expired = expired_identity();
    assert!(expired.not_after() < Utc::now());

    // Signing time inside the certificate's window does not help: the wall clock counts
    let inside = SigningRequest::new(expired.not_before() + Duration::days(10));
    let err = IncrementalSigner::default()
        .sign(plain_pdf(1), expired, &inside)
        .unwrap_err();
    assert!(
        matches!(err, SigningError::Identity(IdentityError::Expired { ref not_after, .. }) if *not_after == expired.not_after()),
        "{:?}",
        err
    );

    let err = IncrementalSigner::default()
        .sign(plain_pdf(1), expired, &request())
        .unwrap_err();
    assert!(matches!(err, SigningError::Identity(IdentityError::Expired { .. })));
}

#[test]
fn test_signing_time_outside_validity_is_rejected() {
    let backdated = SigningRequest::new(identity().not_before() - Duration::days(3));
    let err = IncrementalSigner::default()
        .sign(plain_pdf(1), identity(), &backdated)
        .unwrap_err();
    assert!(matches!(err, SigningError::Identity(IdentityError::NotYetValid { .. })));

    let future = SigningRequest::new(identity().not_after() + Duration::days(1));
    let err = IncrementalSigner::default()
        .sign(plain_pdf(1), identity(), &future)
        .unwrap_err();
    assert!(matches!(err, SigningError::Identity(IdentityError::Expired { .. })));
}

#[test]
fn test_signature_dictionary_and_form() {
    let req = request()
        .with_reason("Marks verified")
        .with_signer_name("J. Doe");
    let signed = IncrementalSigner::default().sign(plain_pdf(1), identity(), &req).unwrap();
    let out = signed.as_bytes();

    assert!(find(out, b"/Type /Sig").is_some());
    assert!(find(out, b"/Filter /Adobe.PPKLite").is_some());
    assert!(find(out, b"/SubFilter /adbe.pkcs7.detached").is_some());
    assert!(find(out, b"/Reason (Marks verified)").is_some());
    assert!(find(out, b"/Name (J. Doe)").is_some());
    assert!(find(out, b"/SigFlags 3").is_some());
    assert!(find(out, b"/F 132").is_some());

    // The ByteRange hole is exactly the hex string
    let [_, a, b, _] = signed.signatures()[0].byte_range;
    assert_eq!(out[a], b'<');
    assert_eq!(out[b - 1], b'>');
    assert!(out[a + 1..b - 1].iter().all(u8::is_ascii_hexdigit));

    let mut doc = PdfDocument::from_bytes(out.to_vec()).unwrap();
    let catalog = doc.catalog().unwrap();
    let form = doc.resolve(&catalog["AcroForm"]).unwrap();
    let fields = doc.resolve(&form.as_dict().unwrap()["Fields"]).unwrap();
    assert_eq!(fields.as_array().unwrap().len(), 1);
    let page = doc.page(0).unwrap();
    let annots = doc.resolve(&page.dict["Annots"]).unwrap();
    assert_eq!(annots.as_array().unwrap().len(), 1);
}

#[test]
fn test_all_pages_nested_coverage() {
    let input = plain_pdf(3);
    let req = request().with_mode(SigningMode::AllPages);
    let signed = IncrementalSigner::default().sign(input.clone(), identity(), &req).unwrap();
    let out = signed.as_bytes();

    let names: Vec<&str> = signed.signatures().iter().map(|s| s.field_name.as_str()).collect();
    assert_eq!(names, ["Signature1", "Signature2", "Signature3"]);
    let pages: Vec<usize> = signed.signatures().iter().map(|s| s.page_index).collect();
    assert_eq!(pages, [0, 1, 2]);

    let verified = SignatureVerifier::verify_all(out).unwrap();
    assert_eq!(verified.len(), 3);
    assert!(verified.iter().all(|v| v.is_valid()));
    assert!(verified.windows(2).all(|w| w[0].covered_len < w[1].covered_len));
    assert!(verified[0].covered_len > input.len());
    assert_eq!(verified[2].covered_len, out.len());

    // Every page carries its own widget
    let mut doc = PdfDocument::from_bytes(out.to_vec()).unwrap();
    for index in 0..3 {
        let page = doc.page(index).unwrap();
        let annots = doc.resolve(&page.dict["Annots"]).unwrap();
        assert_eq!(annots.as_array().unwrap().len(), 1);
    }
}

#[test]
fn test_second_signing_keeps_first_valid() {
    let signer = IncrementalSigner::default();
    let once = signer.sign(plain_pdf(1), identity(), &request()).unwrap();
    let twice = signer.sign(once.clone().into_bytes(), identity(), &request()).unwrap();

    assert!(twice.as_bytes().starts_with(once.as_bytes()));
    assert_eq!(twice.signatures()[0].field_name, "Signature2");

    let verified = SignatureVerifier::verify_all(twice.as_bytes()).unwrap();
    assert_eq!(verified.len(), 2);
    assert!(verified.iter().all(|v| v.is_valid()));
    assert_eq!(verified[0].covered_len, once.len());
}

#[test]
fn test_tampering_is_detected() {
    let signed = IncrementalSigner::default().sign(plain_pdf(1), identity(), &request()).unwrap();
    let mut bytes = signed.as_bytes().to_vec();
    let at = find(&bytes, b"Attendance").unwrap();
    bytes[at] = b'X';

    let verified = SignatureVerifier::verify_all(&bytes).unwrap();
    assert_eq!(verified.len(), 1);
    assert!(!verified[0].digest_matches);
    assert!(!verified[0].is_valid());
    assert!(!verified[0].messages.is_empty());
}

#[test]
fn test_placeholder_too_small() {
    let signer = IncrementalSigner::new(SignerConfig {
        reserved_bytes: 64,
        ..SignerConfig::default()
    });
    match signer.sign(plain_pdf(1), identity(), &request()) {
        Err(SigningError::PlaceholderTooSmall { required, reserved }) => {
            assert_eq!(reserved, 64);
            assert!(required > 64);
        },
        other => panic!("expected PlaceholderTooSmall, got {:?}", other.map(|s| s.len())),
    }
}

#[test]
fn test_placeholder_grows_when_allowed() {
    let signer = IncrementalSigner::new(SignerConfig {
        reserved_bytes: 64,
        grow_placeholder: true,
        ..SignerConfig::default()
    });
    let signed = signer.sign(plain_pdf(1), identity(), &request()).unwrap();
    let verified = SignatureVerifier::verify_all(signed.as_bytes()).unwrap();
    assert!(verified[0].is_valid());
    let [_, a, b, _] = verified[0].byte_range;
    assert!(b - a > 2 * 64);
}

#[test]
fn test_xref_stream_input() {
    let input = TestPdf::new().page(PLAIN_PAGE).page(PLAIN_PAGE).xref_stream().build();
    let req = request().with_mode(SigningMode::AllPages);
    let signed = IncrementalSigner::default().sign(input.clone(), identity(), &req).unwrap();
    assert!(signed.as_bytes().starts_with(&input));

    let doc = PdfDocument::from_bytes(signed.as_bytes().to_vec()).unwrap();
    assert_eq!(doc.xref_kind(), XRefKind::Stream);

    let verified = SignatureVerifier::verify_all(signed.as_bytes()).unwrap();
    assert_eq!(verified.len(), 2);
    assert!(verified.iter().all(|v| v.is_valid()));
}

#[test]
fn test_non_ascii_metadata() {
    let req = request().with_location("Zürich").with_signer_name("Zoë");
    let signed = IncrementalSigner::default().sign(plain_pdf(1), identity(), &req).unwrap();
    let out = signed.as_bytes();
    assert!(find(out, b"/Name <FEFF005A006F00EB>").is_some());
    assert!(SignatureVerifier::verify_all(out).unwrap()[0].is_valid());
}

#[test]
fn test_unsigned_document_has_no_signatures() {
    assert!(SignatureVerifier::verify_all(&plain_pdf(2)).unwrap().is_empty());
}

#[test]
fn test_encrypted_input_rejected() {
    let input = TestPdf::new().page(PLAIN_PAGE).encrypted().build();
    let err = IncrementalSigner::default().sign(input, identity(), &request()).unwrap_err();
    assert!(matches!(err, SigningError::MalformedDocument(Error::Unsupported(_))));
}

#[test]
fn test_malformed_input_rejected() {
    let err = IncrementalSigner::default()
        .sign(b"%PDF-1.7\nthis is not a pdf".to_vec(), identity(), &request())
        .unwrap_err();
    assert!(matches!(err, SigningError::MalformedDocument(_)));

    let no_pages = TestPdf::new().build();
    let err = IncrementalSigner::default().sign(no_pages, identity(), &request()).unwrap_err();
    assert!(matches!(err, SigningError::MalformedDocument(_)));
}

#[test]
fn test_one_widget_per_signature() {
    let signed = IncrementalSigner::default().sign(anchor_pdf(), identity(), &request()).unwrap();
    assert_eq!(count(signed.as_bytes(), b"/Subtype /Widget"), 1);
}
