//! Configuration for the signing engine.
//!
//! Every section derives `Deserialize` with `#[serde(default)]`, so a JSON file
//! only needs the values it overrides:
//!
//! ```json
//! {
//!   "identity": { "storage_dir": "/var/lib/seal/keys", "validity_days": 365 },
//!   "signer": { "grow_placeholder": true }
//! }
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Configuration loading or validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid JSON for this schema
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Signer key and certificate material
    pub identity: IdentityConfig,
    /// Visible stamp placement
    pub appearance: AppearanceConfig,
    /// Signature dictionary and placeholder
    pub signer: SignerConfig,
}

/// Organizational attributes written into generated certificates next to `CN`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CertificateProfile {
    /// `O`
    pub organization: String,
    /// `OU`
    pub organizational_unit: String,
    /// `C`, two letters
    pub country: String,
}

impl Default for CertificateProfile {
    fn default() -> Self {
        Self {
            organization: "Manipal Institute of Technology".to_string(),
            organizational_unit: "MAHE Manipal".to_string(),
            country: "IN".to_string(),
        }
    }
}

/// Identity store settings.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Directory for persisted PEM files. `None` keeps identities in memory.
    pub storage_dir: Option<PathBuf>,
    /// RSA modulus size for generated keys
    pub key_bits: usize,
    /// Lifetime of generated certificates
    pub validity_days: u32,
    /// Subject attributes for generated certificates
    pub profile: CertificateProfile,
    /// When set, private keys are stored as encrypted PKCS#8
    pub key_passphrase: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            key_bits: 2048,
            validity_days: 730,
            profile: CertificateProfile::default(),
            key_passphrase: None,
        }
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("storage_dir", &self.storage_dir)
            .field("key_bits", &self.key_bits)
            .field("validity_days", &self.validity_days)
            .field("profile", &self.profile)
            .field("key_passphrase", &self.key_passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Stamp placement settings used when an appearance has no explicit regions.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppearanceConfig {
    /// Phrases that mark where the stamp goes (case-insensitive)
    pub anchor_phrases: Vec<String>,
    /// Distance of the fallback box from the page's right and bottom edges, in points
    pub margin: f32,
    /// Box width when there is no image
    pub default_box_width: f32,
    /// Box height when there is no image
    pub default_box_height: f32,
    /// Points per image pixel when sizing the box from an image
    pub pixel_scale: f32,
    /// Share of the region height given to text when an image is also drawn
    pub text_band_ratio: f32,
    /// Largest font size for stamp text
    pub font_size: f32,
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            anchor_phrases: vec!["Signature of the".to_string()],
            margin: 50.0,
            default_box_width: 105.0,
            default_box_height: 33.0,
            pixel_scale: 0.75 / 1.33,
            text_band_ratio: 0.3,
            font_size: 9.0,
        }
    }
}

/// Default signature metadata, applied by [`SignerConfig::request`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RequestProfile {
    /// `/Reason`
    pub reason: String,
    /// `/Location`
    pub location: String,
    /// `/ContactInfo`
    pub contact: String,
}

impl Default for RequestProfile {
    fn default() -> Self {
        Self {
            reason: "I am the author of this document".to_string(),
            location: "Manipal, India".to_string(),
            contact: "faculty.email@example.com".to_string(),
        }
    }
}

/// Signature writing settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Bytes reserved for the DER signature container (hex doubles it in the file)
    pub reserved_bytes: usize,
    /// Retry once with a larger placeholder when the container does not fit
    pub grow_placeholder: bool,
    /// `/Filter` of the signature dictionary
    pub filter: String,
    /// `/SubFilter` of the signature dictionary
    pub sub_filter: String,
    /// Metadata used by [`SignerConfig::request`]
    pub request_defaults: RequestProfile,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            reserved_bytes: 8192,
            grow_placeholder: false,
            filter: "Adobe.PPKLite".to_string(),
            sub_filter: "adbe.pkcs7.detached".to_string(),
            request_defaults: RequestProfile::default(),
        }
    }
}

impl SignerConfig {
    /// A request carrying the configured default metadata.
    pub fn request(
        &self,
        signing_time: chrono::DateTime<chrono::Utc>,
    ) -> crate::signatures::SigningRequest {
        crate::signatures::SigningRequest {
            reason: self.request_defaults.reason.clone(),
            location: self.request_defaults.location.clone(),
            contact: self.request_defaults.contact.clone(),
            signing_time,
            mode: crate::signatures::SigningMode::default(),
            signer_name: None,
        }
    }
}

impl EngineConfig {
    /// Defaults for every section.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path.as_ref())?;
        log::debug!("loaded engine config from {}", path.as_ref().display());
        Self::from_json_str(&json)
    }

    /// Persist identities under `dir`.
    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.identity.storage_dir = Some(dir.into());
        self
    }

    /// Encrypt stored private keys with `passphrase`.
    pub fn with_key_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.identity.key_passphrase = Some(passphrase.into());
        self
    }

    /// RSA modulus size for new keys.
    pub fn with_key_bits(mut self, bits: usize) -> Self {
        self.identity.key_bits = bits;
        self
    }

    /// Lifetime of new certificates.
    pub fn with_validity_days(mut self, days: u32) -> Self {
        self.identity.validity_days = days;
        self
    }

    /// Subject attributes for new certificates.
    pub fn with_profile(mut self, profile: CertificateProfile) -> Self {
        self.identity.profile = profile;
        self
    }

    /// Phrases searched for when placing a stamp automatically.
    pub fn with_anchor_phrases(mut self, phrases: Vec<String>) -> Self {
        self.appearance.anchor_phrases = phrases;
        self
    }

    /// Placeholder reservation for the signature container.
    pub fn with_reserved_bytes(mut self, bytes: usize) -> Self {
        self.signer.reserved_bytes = bytes;
        self
    }

    /// Retry with a larger placeholder instead of failing.
    pub fn with_grow_placeholder(mut self, grow: bool) -> Self {
        self.signer.grow_placeholder = grow;
        self
    }

    /// Reject out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.identity.key_bits < 2048 {
            return invalid(format!("key_bits must be at least 2048, got {}", self.identity.key_bits));
        }
        if self.identity.validity_days == 0 {
            return invalid("validity_days must be positive".to_string());
        }
        if self.identity.profile.country.chars().count() != 2 {
            return invalid(format!(
                "country must be a two-letter code, got {:?}",
                self.identity.profile.country
            ));
        }
        if matches!(&self.identity.key_passphrase, Some(p) if p.is_empty()) {
            return invalid("key_passphrase must not be empty".to_string());
        }

        let a = &self.appearance;
        if !a.margin.is_finite() || a.margin < 0.0 {
            return invalid(format!("margin must not be negative, got {}", a.margin));
        }
        if !(a.default_box_width > 0.0 && a.default_box_height > 0.0) {
            return invalid("default box dimensions must be positive".to_string());
        }
        if !(a.pixel_scale.is_finite() && a.pixel_scale > 0.0) {
            return invalid("pixel_scale must be positive".to_string());
        }
        if !(a.text_band_ratio > 0.0 && a.text_band_ratio < 1.0) {
            return invalid("text_band_ratio must be between 0 and 1".to_string());
        }
        if !(a.font_size.is_finite() && a.font_size > 0.0) {
            return invalid("font_size must be positive".to_string());
        }

        if self.signer.reserved_bytes == 0 {
            return invalid("reserved_bytes must be positive".to_string());
        }
        if self.signer.filter.is_empty() || self.signer.sub_filter.is_empty() {
            return invalid("filter and sub_filter must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.identity.key_bits, 2048);
        assert_eq!(config.identity.validity_days, 730);
        assert_eq!(config.signer.reserved_bytes, 8192);
        assert_eq!(config.appearance.anchor_phrases, vec!["Signature of the"]);
        assert_eq!(config.signer.request_defaults.location, "Manipal, India");
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{ "identity": { "validity_days": 30 }, "signer": { "grow_placeholder": true } }"#,
        )
        .unwrap();
        assert_eq!(config.identity.validity_days, 30);
        assert_eq!(config.identity.key_bits, 2048);
        assert!(config.signer.grow_placeholder);
        assert_eq!(config.signer.sub_filter, "adbe.pkcs7.detached");
    }

    #[test]
    fn test_rejects_weak_keys() {
        let err = EngineConfig::from_json_str(r#"{ "identity": { "key_bits": 1024 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::new().with_validity_days(0).validate().is_err());
        assert!(EngineConfig::new().with_reserved_bytes(0).validate().is_err());
        let mut config = EngineConfig::new();
        config.appearance.margin = -1.0;
        assert!(config.validate().is_err());
        config.appearance.margin = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json_str("{ not json").unwrap_err(),
            ConfigError::Json(_)
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "appearance": { "margin": 20 } }"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.appearance.margin, 20.0);
    }

    #[test]
    fn test_passphrase_is_redacted() {
        let config = EngineConfig::new().with_key_passphrase("hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_request_defaults() {
        let time = chrono::Utc::now();
        let request = SignerConfig::default().request(time);
        assert_eq!(request.reason, "I am the author of this document");
        assert_eq!(request.contact, "faculty.email@example.com");
        assert_eq!(request.signing_time, time);
    }
}
