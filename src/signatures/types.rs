//! Signing request, result and error types.

use crate::object::ObjectRef;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Which pages receive a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningMode {
    /// One signature, widget on the first page
    #[default]
    SinglePage,
    /// One signature per page, each covering all earlier ones
    AllPages,
}

/// Metadata for one signing call.
#[derive(Debug, Clone, PartialEq)]
pub struct SigningRequest {
    /// `/Reason`
    pub reason: String,
    /// `/Location`
    pub location: String,
    /// `/ContactInfo`
    pub contact: String,
    /// `/M` and the CMS signing-time attribute; also the clock for certificate validity
    pub signing_time: DateTime<Utc>,
    /// Page coverage
    pub mode: SigningMode,
    /// `/Name`; the identity's name when unset
    pub signer_name: Option<String>,
}

impl SigningRequest {
    /// Request with the default metadata at `signing_time`.
    pub fn new(signing_time: DateTime<Utc>) -> Self {
        crate::config::SignerConfig::default().request(signing_time)
    }

    /// Set the reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Set the location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set the contact information.
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = contact.into();
        self
    }

    /// Set the page coverage.
    pub fn with_mode(mut self, mode: SigningMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the `/Name` entry.
    pub fn with_signer_name(mut self, name: impl Into<String>) -> Self {
        self.signer_name = Some(name.into());
        self
    }
}

/// One signature added by a signing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSummary {
    /// `/T` of the signature field
    pub field_name: String,
    /// Page holding the widget
    pub page_index: usize,
    /// The signature dictionary
    pub signature_ref: ObjectRef,
    /// The widget annotation (also the field)
    pub widget_ref: ObjectRef,
    /// `[0, a, b, len - b]` of the revision this signature closed
    pub byte_range: [usize; 4],
}

impl SignatureSummary {
    /// Length of the revision covered by this signature.
    pub fn covered_len(&self) -> usize {
        self.byte_range[2] + self.byte_range[3]
    }
}

/// Signed PDF bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedDocument {
    bytes: Bytes,
    signatures: Vec<SignatureSummary>,
}

impl SignedDocument {
    pub(crate) fn new(bytes: Bytes, signatures: Vec<SignatureSummary>) -> Self {
        Self { bytes, signatures }
    }

    /// The signed file.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The signed file, without copying.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// File size.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for an empty file (never produced by the signer).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Signatures added, in signing order.
    pub fn signatures(&self) -> &[SignatureSummary] {
        &self.signatures
    }
}

impl AsRef<[u8]> for SignedDocument {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Signing failure. No output is produced for any of them.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The encoded container does not fit the reserved `/Contents`
    #[error("Signature container needs {required} bytes but only {reserved} are reserved")]
    PlaceholderTooSmall {
        /// DER size of the container
        required: usize,
        /// Bytes reserved in the placeholder
        reserved: usize,
    },

    /// Re-hashing the written byte range disagrees with the signed digest
    #[error("Byte range digest does not match the signature container")]
    DigestMismatch,

    /// The key could not produce a signature
    #[error("Signing key is unusable: {0}")]
    KeyUnusable(String),

    /// The certificate is outside its validity window now or at the signing time
    #[error("Signer certificate is not usable: {0}")]
    Identity(#[from] crate::identity::IdentityError),

    /// The input cannot be parsed, is encrypted, or has no pages
    #[error("Malformed document: {0}")]
    MalformedDocument(#[from] crate::error::Error),
}

/// Result of re-checking one signature in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// `/T` of the signature field
    pub field_name: String,
    /// `/ByteRange`
    pub byte_range: [usize; 4],
    /// Bytes covered, from offset 0 to the end of the range
    pub covered_len: usize,
    /// Re-hashing the range reproduced the signed message digest
    pub digest_matches: bool,
    /// The RSA signature over the signed attributes verified with the embedded certificate
    pub signature_valid: bool,
    /// Signer common name from the embedded certificate
    pub signer_cn: Option<String>,
    /// CMS signing-time attribute
    pub signing_time: Option<DateTime<Utc>>,
    /// Everything that went wrong
    pub messages: Vec<String>,
}

impl VerifiedSignature {
    /// Digest and signature both check out.
    pub fn is_valid(&self) -> bool {
        self.digest_matches && self.signature_valid && self.messages.is_empty()
    }
}
