//! Keyed session persistence.
//!
//! The session core stores opaque string values under a handful of keys
//! (`auth`, `cookies`). `FileStorage` is the on-disk backend shared by every
//! process of the same user; `MemoryStorage` backs tests and embedders that
//! persist elsewhere.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

use super::crypto::{self, EncryptionEnvelope, KeyMaterial, SealedValue};
use super::error::StorageError;
use crate::config::config_root_dir;

const STORAGE_VERSION_PLAIN: u32 = 1;
const STORAGE_VERSION_ENCRYPTED: u32 = 2;

/// Keyed string persistence used for the session record and cookies.
///
/// Absence of a key is the normal logged-out state, not an error.
pub trait SessionStorage: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Returns `true` when a value was removed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
}

/// Returns the default storage path (`~/.config/mapmylearn/session.json`).
pub fn default_storage_path() -> Option<PathBuf> {
    config_root_dir().map(|dir| dir.join("mapmylearn").join("session.json"))
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-process storage. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.remove(key).is_some())
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StorageFile {
    #[serde(default)]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    encryption: Option<EncryptionEnvelope>,
    #[serde(default)]
    entries: BTreeMap<String, StoredEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Sealed(SealedValue),
    Plain(String),
}

/// JSON file storage, optionally encrypted with a machine-derived key.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    encrypt: bool,
    /// Serializes read-modify-write cycles within this process and caches
    /// the unwrapped key for the envelope last seen on disk.
    key_cache: Mutex<Option<KeyMaterial>>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>, encrypt: bool) -> Self {
        Self {
            path: path.into(),
            encrypt,
            key_cache: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every entry in plaintext.
    pub fn load_entries(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let mut cache = self.key_cache.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_locked(&mut cache)
    }

    fn load_locked(
        &self,
        cache: &mut Option<KeyMaterial>,
    ) -> Result<BTreeMap<String, String>, StorageError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(StorageError::Io(err)),
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        let file: StorageFile = serde_json::from_str(&text).map_err(|err| {
            StorageError::Invalid(format!(
                "failed to parse session storage `{}`: {err}",
                self.path.display()
            ))
        })?;

        let key = match file.encryption.as_ref() {
            Some(envelope) => Some(self.key_for(cache, envelope)?),
            None => None,
        };
        let mut plain = BTreeMap::new();
        let mut saw_plaintext = false;
        for (name, entry) in file.entries {
            let value = match entry {
                StoredEntry::Plain(value) => {
                    saw_plaintext = true;
                    value
                }
                StoredEntry::Sealed(sealed) => {
                    let Some(key) = key.as_ref() else {
                        return Err(StorageError::Invalid(format!(
                            "session storage entry `{name}` is encrypted but no key envelope is present"
                        )));
                    };
                    crypto::open(key, &sealed, &name)?
                }
            };
            plain.insert(name, value);
        }

        if self.encrypt && saw_plaintext {
            // Best-effort migration; keep serving plaintext if it fails.
            if let Err(err) = self.save_locked(cache, &plain) {
                warn!(path = %self.path.display(), error = %err, "failed to encrypt legacy session storage");
            }
        }
        Ok(plain)
    }

    fn key_for(
        &self,
        cache: &mut Option<KeyMaterial>,
        envelope: &EncryptionEnvelope,
    ) -> Result<KeyMaterial, StorageError> {
        if let Some(key) = cache.as_ref().filter(|key| &key.envelope == envelope) {
            return Ok(key.clone());
        }
        let key = crypto::unwrap_key_material(envelope)?;
        *cache = Some(key.clone());
        Ok(key)
    }

    fn save_locked(
        &self,
        cache: &mut Option<KeyMaterial>,
        entries: &BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        let file = if self.encrypt {
            let key = match cache.as_ref() {
                Some(key) => key.clone(),
                None => {
                    let key = crypto::new_key_material()?;
                    *cache = Some(key.clone());
                    key
                }
            };
            let mut sealed = BTreeMap::new();
            for (name, value) in entries {
                sealed.insert(name.clone(), StoredEntry::Sealed(crypto::seal(&key, value)?));
            }
            StorageFile {
                version: STORAGE_VERSION_ENCRYPTED,
                encryption: Some(key.envelope.clone()),
                entries: sealed,
            }
        } else {
            StorageFile {
                version: STORAGE_VERSION_PLAIN,
                encryption: None,
                entries: entries
                    .iter()
                    .map(|(name, value)| (name.clone(), StoredEntry::Plain(value.clone())))
                    .collect(),
            }
        };
        write_private_file(&self.path, &file)
    }
}

impl SessionStorage for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load_entries()?.remove(key))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut cache = self.key_cache.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load_locked(&mut cache)?;
        entries.insert(key.to_string(), value.to_string());
        self.save_locked(&mut cache, &entries)
    }

    fn remove(&self, key: &str) -> Result<bool, StorageError> {
        let mut cache = self.key_cache.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = match self.load_locked(&mut cache) {
            Ok(entries) => entries,
            Err(StorageError::Invalid(reason)) => {
                // Unreadable storage cannot hold a usable session; start over.
                warn!(path = %self.path.display(), %reason, "resetting unreadable session storage");
                *cache = None;
                self.save_locked(&mut cache, &BTreeMap::new())?;
                return Ok(true);
            }
            Err(err) => return Err(err),
        };
        let removed = entries.remove(key).is_some();
        if removed {
            self.save_locked(&mut cache, &entries)?;
            debug!(key, "removed session storage entry");
        }
        Ok(removed)
    }
}

/// Persist the storage file with owner-only permissions.
///
/// The text goes to a sibling temp file that is renamed over `path`, so a
/// concurrent reader sees either the previous file or the new one.
fn write_private_file(path: &Path, file: &StorageFile) -> Result<(), StorageError> {
    static TMP_SEQ: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700));
        }
    }

    let text = serde_json::to_string_pretty(file).map_err(|err| {
        StorageError::Invalid(format!("failed to serialize session storage: {err}"))
    })?;
    // PID plus counter keeps racing writers off each other's temp file.
    let tmp_name = format!(
        ".{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        TMP_SEQ.fetch_add(1, Ordering::Relaxed),
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut options = std::fs::OpenOptions::new();
    options.create_new(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let written = options.open(&tmp_path).and_then(|mut handle| {
        handle.write_all(text.as_bytes())?;
        handle.sync_all()
    });
    if let Err(err) = written.and_then(|()| std::fs::rename(&tmp_path, path)) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(StorageError::Io(err));
    }
    Ok(())
}
