//! End-to-end signing requests.
//!
//! A request moves through
//!
//! ```text
//! Received -> IdentityResolved -> AppearanceApplied (optional) -> CryptographicallySigned -> Finalized
//! ```
//!
//! and fails from any stage before `Finalized`. A failure carries the stage
//! reached, the component error and the untouched input, and no partial output
//! is ever returned or written.

use crate::appearance::{AppearanceError, AppearanceRenderer, AppearanceSpec};
use crate::config::EngineConfig;
use crate::identity::{IdentityError, IdentityStore};
use crate::signatures::{IncrementalSigner, SignedDocument, SigningError, SigningRequest};
use bytes::Bytes;
use std::io::Write;
use std::path::Path;

/// Last stage a request reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SigningStage {
    /// Request accepted, nothing done yet
    Received,
    /// Signer identity loaded or created
    IdentityResolved,
    /// Visual stamp drawn
    AppearanceApplied,
    /// Signature(s) written
    CryptographicallySigned,
    /// Output handed back
    Finalized,
}

impl std::fmt::Display for SigningStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SigningStage::Received => "received",
            SigningStage::IdentityResolved => "identity resolved",
            SigningStage::AppearanceApplied => "appearance applied",
            SigningStage::CryptographicallySigned => "cryptographically signed",
            SigningStage::Finalized => "finalized",
        };
        f.write_str(name)
    }
}

/// Component error of a failed request.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Identity resolution failed
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Stamping failed
    #[error(transparent)]
    Appearance(#[from] AppearanceError),

    /// Signing failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// The request was rejected before any work
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// PDF bytes to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedDocument(Bytes);

impl UnsignedDocument {
    /// Wrap PDF bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The document bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The document bytes, without copying.
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for UnsignedDocument {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<Bytes> for UnsignedDocument {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for UnsignedDocument {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A failed request. The input is handed back unchanged.
#[derive(Debug, thiserror::Error)]
#[error("Signing failed at stage '{stage}': {error}")]
pub struct SigningFailure {
    /// Last stage reached
    pub stage: SigningStage,
    /// What went wrong
    #[source]
    pub error: EngineError,
    original: UnsignedDocument,
}

impl SigningFailure {
    /// The input document.
    pub fn original(&self) -> &UnsignedDocument {
        &self.original
    }

    /// Take back the input document.
    pub fn into_original(self) -> UnsignedDocument {
        self.original
    }
}

/// Failure of [`SigningOrchestrator::sign_file`].
#[derive(Debug, thiserror::Error)]
pub enum SignFileError {
    /// The input file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Input path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Signing failed; the output path was not touched
    #[error(transparent)]
    Signing(#[from] SigningFailure),

    /// The output could not be written; the output path was not touched
    #[error("Failed to write {path}: {source}")]
    Write {
        /// Output path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },
}

/// Runs identity resolution, stamping and signing for each request.
#[derive(Debug)]
pub struct SigningOrchestrator {
    identities: IdentityStore,
    renderer: AppearanceRenderer,
    signer: IncrementalSigner,
}

impl SigningOrchestrator {
    /// Build all components from `config`.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidRequest(e.to_string()))?;
        let identities = IdentityStore::from_config(&config.identity)?;
        Ok(Self::with_components(
            identities,
            AppearanceRenderer::new(config.appearance),
            IncrementalSigner::new(config.signer),
        ))
    }

    /// Assemble from existing components.
    pub fn with_components(
        identities: IdentityStore,
        renderer: AppearanceRenderer,
        signer: IncrementalSigner,
    ) -> Self {
        Self {
            identities,
            renderer,
            signer,
        }
    }

    /// The identity store.
    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// A request with the configured default metadata at `signing_time`.
    pub fn request(&self, signing_time: chrono::DateTime<chrono::Utc>) -> SigningRequest {
        self.signer.config().request(signing_time)
    }

    /// Sign `document` as `identity_name`, stamping it first when
    /// `appearance` is given.
    pub fn sign(
        &self,
        document: impl Into<UnsignedDocument>,
        identity_name: &str,
        appearance: Option<&AppearanceSpec>,
        request: &SigningRequest,
    ) -> Result<SignedDocument, SigningFailure> {
        let original = document.into();
        let mut stage = SigningStage::Received;
        log::info!("signing request for '{}' received ({} bytes)", identity_name, original.0.len());

        let fail = |stage: SigningStage, error: EngineError, original: UnsignedDocument| {
            log::warn!("signing request failed at stage '{}': {}", stage, error);
            SigningFailure {
                stage,
                error,
                original,
            }
        };

        if let Some(problem) = precondition_problem(&original, identity_name, appearance) {
            return Err(fail(stage, EngineError::InvalidRequest(problem), original));
        }

        // New certificates start no later than the signing time; the
        // certificate must then cover both the wall clock and the signing time.
        let now = chrono::Utc::now();
        let identity = match self
            .identities
            .resolve_at(identity_name, request.signing_time.min(now))
            .and_then(|identity| {
                identity.check_validity(now)?;
                identity.check_validity(request.signing_time)?;
                Ok(identity)
            }) {
            Ok(identity) => identity,
            Err(e) => return Err(fail(stage, e.into(), original)),
        };
        stage = SigningStage::IdentityResolved;
        log::debug!("stage: {}", stage);

        let to_sign = match appearance {
            Some(spec) => match self.renderer.apply(original.0.clone(), spec) {
                Ok(appeared) => {
                    stage = SigningStage::AppearanceApplied;
                    log::debug!("stage: {}", stage);
                    appeared.into_bytes()
                },
                Err(e) => return Err(fail(stage, e.into(), original)),
            },
            None => original.0.clone(),
        };

        let signed = match self.signer.sign(to_sign, &identity, request) {
            Ok(signed) => signed,
            Err(e) => return Err(fail(stage, e.into(), original)),
        };
        stage = SigningStage::CryptographicallySigned;
        log::debug!("stage: {}", stage);

        stage = SigningStage::Finalized;
        log::info!(
            "signing request for '{}' {} ({} signature(s))",
            identity.name(),
            stage,
            signed.signatures().len()
        );
        Ok(signed)
    }

    /// Sign the file at `input` and atomically write the result to `output`.
    ///
    /// The output is written to a temporary file next to it and renamed into
    /// place, so `output` is only replaced after full success.
    pub fn sign_file(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        identity_name: &str,
        appearance: Option<&AppearanceSpec>,
        request: &SigningRequest,
    ) -> Result<SignedDocument, SignFileError> {
        let (input, output) = (input.as_ref(), output.as_ref());
        let data = std::fs::read(input).map_err(|source| SignFileError::Read {
            path: input.display().to_string(),
            source,
        })?;

        let signed = self.sign(data, identity_name, appearance, request)?;

        let write_err = |source: std::io::Error| SignFileError::Write {
            path: output.display().to_string(),
            source,
        };
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(signed.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(output).map_err(|e| write_err(e.error))?;

        log::info!("wrote {} ({} bytes)", output.display(), signed.len());
        Ok(signed)
    }
}

fn precondition_problem(
    document: &UnsignedDocument,
    identity_name: &str,
    appearance: Option<&AppearanceSpec>,
) -> Option<String> {
    if identity_name.trim().is_empty() {
        return Some("identity name is empty".to_string());
    }
    if !document.as_bytes().starts_with(b"%PDF-") {
        return Some("document does not start with %PDF-".to_string());
    }
    appearance.and_then(AppearanceSpec::problem)
}
