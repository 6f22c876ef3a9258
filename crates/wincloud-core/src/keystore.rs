//! Master key lifecycle: load-or-create from a per-user file.
//!
//! The key encrypts every cloud fragment for this user. It is created on
//! first use, never rotated automatically, and never leaves the local
//! machine; losing it makes cloud fragments unrecoverable.

use crate::encryption::MasterKey;
use crate::error::{ArchiveError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Name of the per-user directory holding the key and configuration.
pub const USER_DIR: &str = ".wincloud";
const KEY_FILE: &str = "master.key";

/// Source of the master key, injected into the engine so tests and future
/// key backends need no global state.
pub trait KeyProvider: Send + Sync {
    /// Produce the master key, creating it if the backend supports that.
    fn master_key(&self) -> Result<MasterKey>;
}

/// Fixed in-memory key, for tests.
pub struct StaticKeyProvider(pub MasterKey);

impl KeyProvider for StaticKeyProvider {
    fn master_key(&self) -> Result<MasterKey> {
        Ok(self.0.clone())
    }
}

/// File-backed key store at `~/.wincloud/master.key` (or a custom directory).
pub struct FileKeyStore {
    key_path: PathBuf,
}

impl FileKeyStore {
    /// Store rooted at a specific directory.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            key_path: dir.as_ref().join(KEY_FILE),
        }
    }

    /// Store at the fixed per-user location.
    pub fn default_location() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| ArchiveError::KeyStore("home directory not found".to_string()))?;
        Ok(Self::new(home.join(USER_DIR)))
    }

    /// Path of the key file.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    fn load(&self) -> Result<MasterKey> {
        let bytes = fs::read(&self.key_path)?;
        let raw: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            ArchiveError::KeyStore(format!(
                "{} holds {} bytes, expected 32",
                self.key_path.display(),
                bytes.len()
            ))
        })?;
        Ok(MasterKey::from_bytes(raw))
    }

    fn create(&self) -> Result<MasterKey> {
        let key = MasterKey::generate();
        if let Some(parent) = self.key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        // owner-only from the first byte
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.key_path)?;
        file.write_all(&key.0)?;
        file.sync_all()?;
        tracing::info!(path = %self.key_path.display(), "generated new master key");
        Ok(key)
    }
}

impl KeyProvider for FileKeyStore {
    fn master_key(&self) -> Result<MasterKey> {
        if self.key_path.exists() {
            self.load()
        } else {
            self.create()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_key_on_first_use_then_reloads_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        assert!(!store.key_path().exists());

        let first = store.master_key().unwrap();
        assert!(store.key_path().exists());
        let second = store.master_key().unwrap();
        assert_eq!(first.0, second.0);
    }

    #[test]
    #[cfg(unix)]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        store.master_key().unwrap();
        let mode = fs::metadata(store.key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn rejects_wrong_length_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path());
        fs::write(store.key_path(), [1u8; 16]).unwrap();
        assert!(matches!(
            store.master_key(),
            Err(ArchiveError::KeyStore(_))
        ));
    }

    #[test]
    fn static_provider_returns_injected_key() {
        let provider = StaticKeyProvider(MasterKey::from_bytes([7u8; 32]));
        assert_eq!(provider.master_key().unwrap().0, [7u8; 32]);
    }
}
