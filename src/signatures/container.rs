//! Detached CMS SignedData containers.
//!
//! The container certifies a SHA-256 digest computed by the caller over the
//! document's byte range. Its signed attributes are content-type (`id-data`),
//! message-digest and signing-time, signed RSA PKCS#1 v1.5 with SHA-256. The
//! signer certificate is embedded.

use super::types::SigningError;
use crate::identity::{SignerIdentity, to_asn1_time};
use chrono::{DateTime, Utc};
use cms::builder::{SignedDataBuilder, SignerInfoBuilder};
use cms::cert::{CertificateChoices, IssuerAndSerialNumber};
use cms::signed_data::{EncapsulatedContentInfo, SignerIdentifier};
use const_oid::db::rfc5911::{ID_DATA, ID_SIGNING_TIME};
use const_oid::db::rfc5912::ID_SHA_256;
use der::asn1::SetOfVec;
use der::{Any, Encode};
use rsa::pkcs1v15::SigningKey;
use sha2::Sha256;
use spki::AlgorithmIdentifierOwned;
use x509_cert::attr::Attribute;

/// DER SignedData plus the values it certifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureContainer {
    der: Vec<u8>,
    digest: [u8; 32],
    signing_time: DateTime<Utc>,
    certificate_der: Vec<u8>,
}

impl SignatureContainer {
    /// Sign `digest` as `identity` at `signing_time`.
    pub fn build(
        identity: &SignerIdentity,
        digest: [u8; 32],
        signing_time: DateTime<Utc>,
    ) -> Result<Self, SigningError> {
        let unusable = |what: &str, detail: String| {
            SigningError::KeyUnusable(format!("{} for '{}': {}", what, identity.name(), detail))
        };

        let cert = identity.certificate().clone();
        let sid = SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: cert.tbs_certificate.issuer.clone(),
            serial_number: cert.tbs_certificate.serial_number.clone(),
        });
        let digest_algorithm = AlgorithmIdentifierOwned {
            oid: ID_SHA_256,
            parameters: None,
        };
        let content = EncapsulatedContentInfo {
            econtent_type: ID_DATA,
            econtent: None,
        };

        let time = to_asn1_time(signing_time).map_err(|e| unusable("signing time", e))?;
        let time_value = Any::encode_from(&time).map_err(|e| unusable("signing time", e.to_string()))?;
        let signing_time_attr = Attribute {
            oid: ID_SIGNING_TIME,
            values: SetOfVec::try_from(vec![time_value])
                .map_err(|e| unusable("signing time", e.to_string()))?,
        };

        let signer = identity.signing_key();
        let mut signer_info = SignerInfoBuilder::new(
            &signer,
            sid,
            digest_algorithm.clone(),
            &content,
            Some(digest.as_slice()),
        )
        .map_err(|e| unusable("signer info", format!("{:?}", e)))?;
        signer_info
            .add_signed_attribute(signing_time_attr)
            .map_err(|e| unusable("signed attributes", format!("{:?}", e)))?;

        let mut builder = SignedDataBuilder::new(&content);
        let content_info = builder
            .add_digest_algorithm(digest_algorithm)
            .map_err(|e| unusable("digest algorithm", format!("{:?}", e)))?
            .add_certificate(CertificateChoices::Certificate(cert))
            .map_err(|e| unusable("certificate", format!("{:?}", e)))?
            .add_signer_info::<SigningKey<Sha256>, rsa::pkcs1v15::Signature>(signer_info)
            .map_err(|e| unusable("signature", format!("{:?}", e)))?
            .build()
            .map_err(|e| unusable("signed data", format!("{:?}", e)))?;
        let der = content_info
            .to_der()
            .map_err(|e| unusable("encoding", e.to_string()))?;

        log::debug!("built {}-byte CMS container for '{}'", der.len(), identity.name());

        Ok(Self {
            der,
            digest,
            signing_time,
            certificate_der: identity.certificate_der().to_vec(),
        })
    }

    /// DER `ContentInfo`.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER size.
    pub fn len(&self) -> usize {
        self.der.len()
    }

    /// Never true for a built container.
    pub fn is_empty(&self) -> bool {
        self.der.is_empty()
    }

    /// The certified message digest.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// The signing-time attribute value.
    pub fn signing_time(&self) -> DateTime<Utc> {
        self.signing_time
    }

    /// The embedded signer certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }
}
