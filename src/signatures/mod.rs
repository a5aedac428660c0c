//! PDF digital signatures.
//!
//! Signatures are added as incremental updates, one revision each, so every
//! byte of the input stays in place and earlier signatures remain valid.
//!
//! ## Signing
//!
//! 1. Append a signature dictionary with fixed-width `/ByteRange` and
//!    `/Contents` placeholders, a widget annotation on the page, and the
//!    updated `/AcroForm`.
//! 2. Patch the ByteRange from the final offsets.
//! 3. Hash everything except the `/Contents` value (SHA-256).
//! 4. Build a detached CMS SignedData over that digest
//!    ([`SignatureContainer`]).
//! 5. Write it hex-encoded into the placeholder and re-hash.
//!
//! ## Example
//!
//! ```ignore
//! use pdf_seal::identity::IdentityStore;
//! use pdf_seal::signatures::{IncrementalSigner, SignatureVerifier, SigningRequest};
//!
//! let store = IdentityStore::in_memory(Default::default());
//! let identity = store.resolve("Dr. Jane Doe")?;
//! let signed = IncrementalSigner::default().sign(pdf_bytes, &identity, &SigningRequest::new(chrono::Utc::now()))?;
//! for sig in SignatureVerifier::verify_all(signed.as_bytes())? {
//!     println!("{}: {}", sig.field_name, sig.is_valid());
//! }
//! ```
//!
//! ## PDF Specification Reference
//!
//! - ISO 32000-1:2008 Section 12.8 - Digital Signatures
//! - RFC 5652 - Cryptographic Message Syntax

mod byterange;
mod container;
mod signer;
mod types;
mod verifier;

pub use byterange::{ByteRangeCalculator, BYTE_RANGE_WIDTH};
pub use container::SignatureContainer;
pub use signer::IncrementalSigner;
pub use types::{
    SignatureSummary, SignedDocument, SigningError, SigningMode, SigningRequest, VerifiedSignature,
};
pub use verifier::SignatureVerifier;
