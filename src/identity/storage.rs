//! Persistence backends for signer key and certificate material.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tempfile::NamedTempFile;

/// How often, and how far apart, [`FsStorage::load`] re-reads a missing
/// certificate while another writer still holds a fresh key claim.
const CLAIM_POLLS: u32 = 40;
const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// PEM text for one signer. Either half may be missing when the stored state
/// is partial.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct StoredMaterial {
    /// PKCS#8 (possibly encrypted) or PKCS#1 private key
    pub key_pem: Option<String>,
    /// X.509 certificate
    pub cert_pem: Option<String>,
}

impl StoredMaterial {
    /// Complete material.
    pub fn new(key_pem: impl Into<String>, cert_pem: impl Into<String>) -> Self {
        Self {
            key_pem: Some(key_pem.into()),
            cert_pem: Some(cert_pem.into()),
        }
    }
}

impl std::fmt::Debug for StoredMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredMaterial")
            .field("key_pem", &self.key_pem.as_ref().map(|_| "[REDACTED]"))
            .field("cert_pem", &self.cert_pem.as_ref().map(|pem| pem.len()))
            .finish()
    }
}

/// Keyed storage for identity material.
///
/// Keys are already normalized and checked with [`check_key`] by the caller,
/// but implementations must not trust that.
pub trait IdentityStorage: Send + Sync + std::fmt::Debug {
    /// Stored material, `None` when nothing exists under `key`.
    fn load(&self, key: &str) -> io::Result<Option<StoredMaterial>>;

    /// Store `material` unless anything already exists under `key`.
    ///
    /// Returns `false` when another writer got there first.
    fn store_if_absent(&self, key: &str, material: &StoredMaterial) -> io::Result<bool>;

    /// Overwrite whatever is stored under `key`.
    fn replace(&self, key: &str, material: &StoredMaterial) -> io::Result<()>;
}

/// Reject keys that could escape a storage directory.
pub fn check_key(key: &str) -> io::Result<()> {
    if key.is_empty()
        || key.contains("..")
        || key.contains('/')
        || key.contains('\\')
        || key.contains('\0')
    {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("illegal storage key {:?}", key),
        ));
    }
    Ok(())
}

/// One directory, two files per signer: `<key>.key.pem` and `<key>.cert.pem`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    dir: PathBuf,
}

impl FsStorage {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Storage directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.key.pem", key))
    }

    fn cert_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.cert.pem", key))
    }

    fn write_temp(&self, contents: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;
        Ok(file)
    }

    /// Atomically create `path`. `Ok(false)` if it already exists.
    fn create_new(&self, path: &Path, contents: &str) -> io::Result<bool> {
        let file = self.write_temp(contents)?;
        match file.persist_noclobber(path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error),
        }
    }

    fn overwrite(&self, path: &Path, contents: &str) -> io::Result<()> {
        let file = self.write_temp(contents)?;
        file.persist(path).map(|_| ()).map_err(|e| e.error)
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn incomplete() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "material must contain both key and certificate")
}

impl IdentityStorage for FsStorage {
    fn load(&self, key: &str) -> io::Result<Option<StoredMaterial>> {
        check_key(key)?;
        let key_pem = read_optional(&self.key_path(key))?;
        let mut cert_pem = read_optional(&self.cert_path(key))?;
        if key_pem.is_none() && cert_pem.is_none() {
            return Ok(None);
        }

        // A key without a certificate is either a creator between its claim
        // and its certificate write, or genuinely partial material.
        let mut polls = 0;
        while key_pem.is_some() && cert_pem.is_none() && polls < CLAIM_POLLS {
            std::thread::sleep(CLAIM_POLL_INTERVAL);
            cert_pem = read_optional(&self.cert_path(key))?;
            polls += 1;
        }
        if polls > 0 {
            log::debug!(
                "waited {} poll(s) for the certificate of '{}' (found: {})",
                polls,
                key,
                cert_pem.is_some()
            );
        }
        Ok(Some(StoredMaterial { key_pem, cert_pem }))
    }

    fn store_if_absent(&self, key: &str, material: &StoredMaterial) -> io::Result<bool> {
        check_key(key)?;
        let (Some(key_pem), Some(cert_pem)) = (&material.key_pem, &material.cert_pem) else {
            return Err(incomplete());
        };
        if self.cert_path(key).exists() {
            return Ok(false);
        }
        // The key file is the claim: whoever creates it also writes the certificate.
        if !self.create_new(&self.key_path(key), key_pem)? {
            return Ok(false);
        }
        self.overwrite(&self.cert_path(key), cert_pem)?;
        log::debug!("stored identity material under {}", self.dir.display());
        Ok(true)
    }

    fn replace(&self, key: &str, material: &StoredMaterial) -> io::Result<()> {
        check_key(key)?;
        let (Some(key_pem), Some(cert_pem)) = (&material.key_pem, &material.cert_pem) else {
            return Err(incomplete());
        };
        self.overwrite(&self.key_path(key), key_pem)?;
        self.overwrite(&self.cert_path(key), cert_pem)
    }
}

/// In-process storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, StoredMaterial>>,
}

impl MemoryStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put arbitrary (even partial) material under `key`.
    pub fn insert(&self, key: &str, material: StoredMaterial) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), material);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityStorage for MemoryStorage {
    fn load(&self, key: &str) -> io::Result<Option<StoredMaterial>> {
        check_key(key)?;
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn store_if_absent(&self, key: &str, material: &StoredMaterial) -> io::Result<bool> {
        check_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), material.clone());
        Ok(true)
    }

    fn replace(&self, key: &str, material: &StoredMaterial) -> io::Result<()> {
        check_key(key)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), material.clone());
        Ok(())
    }
}

impl<T: IdentityStorage + ?Sized> IdentityStorage for std::sync::Arc<T> {
    fn load(&self, key: &str) -> io::Result<Option<StoredMaterial>> {
        (**self).load(key)
    }

    fn store_if_absent(&self, key: &str, material: &StoredMaterial) -> io::Result<bool> {
        (**self).store_if_absent(key, material)
    }

    fn replace(&self, key: &str, material: &StoredMaterial) -> io::Result<()> {
        (**self).replace(key, material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material(tag: &str) -> StoredMaterial {
        StoredMaterial::new(format!("key-{}", tag), format!("cert-{}", tag))
    }

    #[test]
    fn test_check_key() {
        assert!(check_key("dr._jane_doe").is_ok());
        for bad in ["", "..", "a/b", "a\\b", "a\0b", "x..y"] {
            assert!(check_key(bad).is_err(), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path().join("keys")).unwrap();
        assert_eq!(storage.load("alice").unwrap(), None);

        assert!(storage.store_if_absent("alice", &material("a")).unwrap());
        assert!(!storage.store_if_absent("alice", &material("b")).unwrap());
        assert_eq!(storage.load("alice").unwrap(), Some(material("a")));
        assert!(dir.path().join("keys/alice.key.pem").exists());
        assert!(dir.path().join("keys/alice.cert.pem").exists());

        storage.replace("alice", &material("c")).unwrap();
        assert_eq!(storage.load("alice").unwrap(), Some(material("c")));
    }

    #[test]
    fn test_fs_partial_material() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        fs::write(dir.path().join("bob.cert.pem"), "cert only").unwrap();

        let loaded = storage.load("bob").unwrap().unwrap();
        assert!(loaded.key_pem.is_none());
        assert_eq!(loaded.cert_pem.as_deref(), Some("cert only"));
        assert!(!storage.store_if_absent("bob", &material("b")).unwrap());
    }

    #[test]
    fn test_fs_load_waits_for_claimed_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        fs::write(dir.path().join("dave.key.pem"), "key-d").unwrap();

        let cert_path = dir.path().join("dave.cert.pem");
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            fs::write(cert_path, "cert-d").unwrap();
        });
        let loaded = storage.load("dave").unwrap();
        writer.join().unwrap();
        assert_eq!(loaded, Some(material("d")));
    }

    #[test]
    fn test_fs_key_without_certificate_stays_partial() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        fs::write(dir.path().join("erin.key.pem"), "key only").unwrap();

        let loaded = storage.load("erin").unwrap().unwrap();
        assert_eq!(loaded.key_pem.as_deref(), Some("key only"));
        assert!(loaded.cert_pem.is_none());
    }

    #[test]
    fn test_fs_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        let err = storage.store_if_absent("../evil", &material("x")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_incomplete_material_is_refused() {
        let storage = MemoryStorage::new();
        let partial = StoredMaterial {
            key_pem: Some("k".to_string()),
            cert_pem: None,
        };
        let dir = tempfile::tempdir().unwrap();
        assert!(FsStorage::new(dir.path()).unwrap().replace("k", &partial).is_err());
        // Memory storage accepts anything, which is how tests plant broken state
        storage.insert("k", partial.clone());
        assert_eq!(storage.load("k").unwrap(), Some(partial));
    }

    #[test]
    fn test_memory_store_if_absent() {
        let storage = MemoryStorage::new();
        assert!(storage.is_empty());
        assert!(storage.store_if_absent("carol", &material("1")).unwrap());
        assert!(!storage.store_if_absent("carol", &material("2")).unwrap());
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.load("carol").unwrap(), Some(material("1")));
    }

    #[test]
    fn test_debug_hides_key() {
        let debug = format!("{:?}", material("secret"));
        assert!(!debug.contains("key-secret"));
    }
}
