//! Signer identities: an RSA key and the self-signed certificate that goes with it.
//!
//! [`IdentityStore`] resolves a signer name to its material, creating it on
//! first use and returning the same persisted material on every later call.
//! Material that exists but cannot be used (unparseable, partial, mismatched,
//! expired) is an error, never a reason to silently create new keys;
//! [`IdentityStore::regenerate`] is the explicit way out.
//!
//! ```ignore
//! use pdf_seal::identity::{IdentityStore, FsStorage};
//! use pdf_seal::config::IdentityConfig;
//!
//! let store = IdentityStore::new(FsStorage::new("/var/lib/seal")?, IdentityConfig::default());
//! let identity = store.resolve("Dr. Jane Doe")?;
//! println!("{}", identity.info()?.subject_cn);
//! ```

mod certificate;
mod storage;

pub use certificate::{CertificateInfo, MIN_KEY_BITS, certificate_info, escape_rfc4514, subject_dn};
pub use storage::{FsStorage, IdentityStorage, MemoryStorage, StoredMaterial, check_key};

pub(crate) use certificate::{from_asn1_time, to_asn1_time};

use crate::config::IdentityConfig;
use chrono::{DateTime, Utc};
use der::Encode;
use lazy_static::lazy_static;
use regex::Regex;
use rsa::RsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once, PoisonError};
use x509_cert::Certificate;

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s").expect("static pattern");
}

/// Identity resolution error.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Stored material exists but cannot be used
    #[error("Identity material for '{name}' is unreadable: {reason}")]
    Unreadable {
        /// Signer name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// The certificate's validity has ended
    #[error("Certificate for '{name}' expired at {not_after}")]
    Expired {
        /// Signer name
        name: String,
        /// End of validity
        not_after: DateTime<Utc>,
    },

    /// The certificate's validity has not started
    #[error("Certificate for '{name}' is not valid before {not_before}")]
    NotYetValid {
        /// Signer name
        name: String,
        /// Start of validity
        not_before: DateTime<Utc>,
    },

    /// The storage backend failed
    #[error("Identity storage failure: {0}")]
    StorageFailure(#[from] std::io::Error),

    /// Empty name, or one that cannot be used as a storage key
    #[error("Invalid signer name {0:?}")]
    InvalidName(String),

    /// Key or certificate generation failed
    #[error("Failed to generate identity for '{name}': {reason}")]
    Generation {
        /// Signer name
        name: String,
        /// Underlying failure
        reason: String,
    },
}

/// Result alias for identity operations.
pub type Result<T> = std::result::Result<T, IdentityError>;

/// Storage key for a signer name: trimmed, lowercased, each whitespace character
/// and path separator replaced by `_`.
///
/// Names differing only in inner spacing ("Jane  Doe" and "Jane Doe") get
/// separate keys.
pub fn normalize_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(IdentityError::InvalidName(name.to_string()));
    }
    let lowered = trimmed.to_lowercase().replace(['/', '\\'], "_");
    let key = WHITESPACE.replace_all(&lowered, "_").into_owned();
    check_key(&key).map_err(|_| IdentityError::InvalidName(name.to_string()))?;
    Ok(key)
}

/// A signer's private key and certificate.
///
/// Immutable once resolved. `Debug` never prints key material.
#[derive(Clone)]
pub struct SignerIdentity {
    name: String,
    key: String,
    private_key: RsaPrivateKey,
    certificate: Certificate,
    certificate_der: Vec<u8>,
    material: StoredMaterial,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl std::fmt::Debug for SignerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerIdentity")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("private_key", &"[REDACTED]")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

impl SignerIdentity {
    /// Parse stored PEM material. Any defect is `Unreadable`.
    fn from_material(
        name: &str,
        key: &str,
        material: StoredMaterial,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        let unreadable = |reason: String| IdentityError::Unreadable {
            name: name.to_string(),
            reason,
        };

        let (key_pem, cert_pem) = match (&material.key_pem, &material.cert_pem) {
            (Some(k), Some(c)) => (k, c),
            (Some(_), None) => return Err(unreadable("private key without certificate".into())),
            (None, Some(_)) => return Err(unreadable("certificate without private key".into())),
            (None, None) => return Err(unreadable("no material".into())),
        };

        let private_key = certificate::decode_key_pem(key_pem, passphrase).map_err(unreadable)?;
        let cert = certificate::decode_cert_pem(cert_pem).map_err(unreadable)?;
        if !certificate::key_matches(&private_key, &cert) {
            return Err(unreadable("private key does not match certificate".into()));
        }

        let validity = &cert.tbs_certificate.validity;
        let (Some(not_before), Some(not_after)) = (
            certificate::from_asn1_time(&validity.not_before),
            certificate::from_asn1_time(&validity.not_after),
        ) else {
            return Err(unreadable("certificate validity out of range".into()));
        };
        let certificate_der = cert.to_der().map_err(|e| unreadable(e.to_string()))?;

        Ok(Self {
            name: name.trim().to_string(),
            key: key.to_string(),
            private_key,
            certificate: cert,
            certificate_der,
            material,
            not_before,
            not_after,
        })
    }

    /// Signer name as given by the caller.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized storage key.
    pub fn storage_key(&self) -> &str {
        &self.key
    }

    /// The RSA private key.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// PKCS#1 v1.5 / SHA-256 signing key.
    pub fn signing_key(&self) -> SigningKey<Sha256> {
        SigningKey::<Sha256>::new(self.private_key.clone())
    }

    /// Parsed certificate.
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// DER certificate.
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    /// PEM certificate, exactly as stored.
    pub fn certificate_pem(&self) -> &str {
        self.material.cert_pem.as_deref().unwrap_or_default()
    }

    /// PEM private key, exactly as stored (encrypted when the store encrypts).
    pub fn private_key_pem(&self) -> &str {
        self.material.key_pem.as_deref().unwrap_or_default()
    }

    /// SHA-256 of the DER certificate.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.certificate_der).into()
    }

    /// Start of validity.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of validity.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Subject, serial and validity as read by `x509-parser`.
    pub fn info(&self) -> Result<CertificateInfo> {
        certificate_info(&self.certificate_der).map_err(|reason| IdentityError::Unreadable {
            name: self.name.clone(),
            reason,
        })
    }

    /// `Ok` when `now` lies inside the validity window.
    pub fn check_validity(&self, now: DateTime<Utc>) -> Result<()> {
        if now < self.not_before {
            return Err(IdentityError::NotYetValid {
                name: self.name.clone(),
                not_before: self.not_before,
            });
        }
        if now > self.not_after {
            return Err(IdentityError::Expired {
                name: self.name.clone(),
                not_after: self.not_after,
            });
        }
        Ok(())
    }
}

/// Keyed store of signer identities over an [`IdentityStorage`] backend.
pub struct IdentityStore {
    storage: Box<dyn IdentityStorage>,
    config: IdentityConfig,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    plaintext_warning: Once,
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("storage", &self.storage)
            .field("config", &self.config)
            .finish()
    }
}

impl IdentityStore {
    /// Store over `storage`.
    pub fn new(storage: impl IdentityStorage + 'static, config: IdentityConfig) -> Self {
        Self {
            storage: Box::new(storage),
            config,
            locks: Mutex::new(HashMap::new()),
            plaintext_warning: Once::new(),
        }
    }

    /// Store kept in memory only.
    pub fn in_memory(config: IdentityConfig) -> Self {
        Self::new(MemoryStorage::new(), config)
    }

    /// [`FsStorage`] under `config.storage_dir`, or memory when unset.
    pub fn from_config(config: &IdentityConfig) -> Result<Self> {
        match &config.storage_dir {
            Some(dir) => Ok(Self::new(FsStorage::new(dir)?, config.clone())),
            None => {
                log::warn!("no identity storage directory configured, identities will not persist");
                Ok(Self::in_memory(config.clone()))
            },
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Resolve (or create) the identity for `name`, checked against the current time.
    pub fn resolve(&self, name: &str) -> Result<SignerIdentity> {
        self.resolve_at(name, Utc::now())
    }

    /// Resolve (or create) the identity for `name`, checked against `now`.
    ///
    /// New certificates start at `now`.
    pub fn resolve_at(&self, name: &str, now: DateTime<Utc>) -> Result<SignerIdentity> {
        let key = normalize_name(name)?;
        let lock = self.lock_for(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let identity = match self.storage.load(&key)? {
            Some(material) => self.parse(name, &key, material)?,
            None => {
                let (identity, material) = self.generate(name, &key, now)?;
                if self.storage.store_if_absent(&key, &material)? {
                    log::info!("created signer identity '{}' ({})", identity.name(), key);
                    identity
                } else {
                    log::debug!("identity '{}' was created concurrently, loading it", key);
                    let stored = self.storage.load(&key)?.ok_or_else(|| IdentityError::Unreadable {
                        name: name.to_string(),
                        reason: "material vanished after a concurrent write".to_string(),
                    })?;
                    self.parse(name, &key, stored)?
                }
            },
        };

        identity.check_validity(now)?;
        Ok(identity)
    }

    /// Replace whatever is stored for `name` with fresh material.
    pub fn regenerate(&self, name: &str) -> Result<SignerIdentity> {
        self.regenerate_at(name, Utc::now())
    }

    /// [`regenerate`](Self::regenerate) with an explicit clock.
    pub fn regenerate_at(&self, name: &str, now: DateTime<Utc>) -> Result<SignerIdentity> {
        let key = normalize_name(name)?;
        let lock = self.lock_for(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (identity, material) = self.generate(name, &key, now)?;
        self.storage.replace(&key, &material)?;
        log::info!("regenerated signer identity '{}' ({})", identity.name(), key);
        Ok(identity)
    }

    /// Import existing PEM material for `name`, replacing what is stored.
    ///
    /// The key may be encrypted PKCS#8 (with `passphrase`), PKCS#8 or PKCS#1.
    /// It is re-encoded under this store's at-rest policy.
    pub fn import(
        &self,
        name: &str,
        key_pem: &str,
        cert_pem: &str,
        passphrase: Option<&str>,
    ) -> Result<SignerIdentity> {
        let key = normalize_name(name)?;
        let unreadable = |reason: String| IdentityError::Unreadable {
            name: name.to_string(),
            reason,
        };

        let private_key = certificate::decode_key_pem(key_pem, passphrase).map_err(unreadable)?;
        let cert = certificate::decode_cert_pem(cert_pem).map_err(unreadable)?;
        if !certificate::key_matches(&private_key, &cert) {
            return Err(unreadable("private key does not match certificate".into()));
        }

        let material = StoredMaterial::new(
            self.encode_key(&private_key).map_err(unreadable)?,
            certificate::encode_cert_pem(&cert).map_err(unreadable)?,
        );
        let identity = self.parse(name, &key, material.clone())?;

        let lock = self.lock_for(&key);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.replace(&key, &material)?;
        log::info!("imported signer identity '{}' ({})", identity.name(), key);
        Ok(identity)
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.to_string()).or_default().clone()
    }

    fn parse(&self, name: &str, key: &str, material: StoredMaterial) -> Result<SignerIdentity> {
        SignerIdentity::from_material(name, key, material, self.config.key_passphrase.as_deref())
    }

    fn encode_key(&self, private_key: &RsaPrivateKey) -> std::result::Result<String, String> {
        let passphrase = self.config.key_passphrase.as_deref();
        if passphrase.is_none() {
            self.plaintext_warning.call_once(|| {
                log::warn!("private keys are stored unencrypted; set identity.key_passphrase to encrypt them");
            });
        }
        certificate::encode_key_pem(private_key, passphrase)
    }

    fn generate(
        &self,
        name: &str,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<(SignerIdentity, StoredMaterial)> {
        let generation = |reason: String| IdentityError::Generation {
            name: name.to_string(),
            reason,
        };

        log::debug!("generating {}-bit RSA key for '{}'", self.config.key_bits, key);
        let private_key = certificate::generate_key(self.config.key_bits).map_err(generation)?;
        let cert = certificate::self_signed(
            &private_key,
            name.trim(),
            &self.config.profile,
            now,
            self.config.validity_days,
        )
        .map_err(generation)?;

        let material = StoredMaterial::new(
            self.encode_key(&private_key).map_err(generation)?,
            certificate::encode_cert_pem(&cert).map_err(generation)?,
        );
        let identity = self.parse(name, key, material.clone())?;
        Ok((identity, material))
    }
}
