//! Machine-derived encryption-at-rest for persisted session values.

use aes_gcm_siv::aead::{Aead, KeyInit};
use aes_gcm_siv::{Aes256GcmSiv, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use scrypt::{scrypt, Params as ScryptParams};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::error::StorageError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const MACHINE_KEY_CONTEXT: &str = "mapmylearn-session-machine-kek-v1";

/// Wrapped data-encryption key stored alongside the sealed entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct EncryptionEnvelope {
    #[serde(default)]
    pub(crate) salt: String,
    #[serde(default)]
    pub(crate) wrapped_dek_nonce: String,
    #[serde(default)]
    pub(crate) wrapped_dek_ciphertext: String,
}

/// One sealed storage value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct SealedValue {
    pub(crate) nonce: String,
    pub(crate) ciphertext: String,
}

/// Unwrapped key plus the envelope it came from.
///
/// Unwrapping runs scrypt, so storage backends cache this per envelope.
#[derive(Clone)]
pub(crate) struct KeyMaterial {
    pub(crate) envelope: EncryptionEnvelope,
    dek: [u8; KEY_LEN],
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("envelope", &self.envelope)
            .field("dek", &"***")
            .finish()
    }
}

/// Generate a fresh data key wrapped with the machine key.
pub(crate) fn new_key_material() -> Result<KeyMaterial, StorageError> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let kek = derive_machine_kek(&salt)?;

    let mut dek = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut dek);
    let (wrapped_nonce, wrapped_ciphertext) = encrypt_blob(&kek, &dek)?;

    Ok(KeyMaterial {
        envelope: EncryptionEnvelope {
            salt: B64.encode(salt),
            wrapped_dek_nonce: B64.encode(wrapped_nonce),
            wrapped_dek_ciphertext: B64.encode(wrapped_ciphertext),
        },
        dek,
    })
}

/// Recover the data key from a stored envelope.
pub(crate) fn unwrap_key_material(envelope: &EncryptionEnvelope) -> Result<KeyMaterial, StorageError> {
    let salt = decode_fixed::<SALT_LEN>(&envelope.salt, "salt")?;
    let kek = derive_machine_kek(&salt)?;
    let nonce = decode_fixed::<NONCE_LEN>(&envelope.wrapped_dek_nonce, "wrapped_dek_nonce")?;
    let wrapped = decode_bytes(&envelope.wrapped_dek_ciphertext, "wrapped_dek_ciphertext")?;
    let raw = decrypt_blob(&kek, &nonce, &wrapped).map_err(|_| {
        StorageError::Invalid(
            "failed to decrypt session storage (machine identity may have changed); run `mapmylearn logout` and login again"
                .to_string(),
        )
    })?;
    if raw.len() != KEY_LEN {
        return Err(StorageError::Invalid(
            "invalid encrypted key material in session storage".to_string(),
        ));
    }
    let mut dek = [0u8; KEY_LEN];
    dek.copy_from_slice(&raw);
    Ok(KeyMaterial {
        envelope: envelope.clone(),
        dek,
    })
}

pub(crate) fn seal(key: &KeyMaterial, plaintext: &str) -> Result<SealedValue, StorageError> {
    let (nonce, ciphertext) = encrypt_blob(&key.dek, plaintext.as_bytes())?;
    Ok(SealedValue {
        nonce: B64.encode(nonce),
        ciphertext: B64.encode(ciphertext),
    })
}

pub(crate) fn open(key: &KeyMaterial, sealed: &SealedValue, entry: &str) -> Result<String, StorageError> {
    let nonce = decode_fixed::<NONCE_LEN>(&sealed.nonce, "nonce")?;
    let ciphertext = decode_bytes(&sealed.ciphertext, "ciphertext")?;
    let payload = decrypt_blob(&key.dek, &nonce, &ciphertext).map_err(|_| {
        StorageError::Invalid(format!("failed to decrypt session storage entry `{entry}`"))
    })?;
    String::from_utf8(payload).map_err(|_| {
        StorageError::Invalid(format!("session storage entry `{entry}` is not utf-8"))
    })
}

fn derive_machine_kek(salt: &[u8; SALT_LEN]) -> Result<[u8; KEY_LEN], StorageError> {
    let mut material = machine_secret_material();
    material.extend_from_slice(salt);

    let mut hashed = Sha256::new();
    hashed.update(MACHINE_KEY_CONTEXT.as_bytes());
    hashed.update(&material);
    let seed = hashed.finalize();

    let params = ScryptParams::recommended();
    let mut key = [0u8; KEY_LEN];
    scrypt(&seed, salt, &params, &mut key)
        .map_err(|err| StorageError::Invalid(format!("failed to derive machine key: {err}")))?;
    Ok(key)
}

fn machine_secret_material() -> Vec<u8> {
    let hostname = hostname::get()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown-user".to_string());
    let home = dirs::home_dir()
        .map(|path| path.display().to_string())
        .unwrap_or_default();
    let machine_id = ["/etc/machine-id", "/var/lib/dbus/machine-id"]
        .iter()
        .find_map(|path| {
            std::fs::read_to_string(path)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_default();
    format!(
        "os={}|host={hostname}|user={username}|home={home}|machine_id={machine_id}",
        std::env::consts::OS
    )
    .into_bytes()
}

fn encrypt_blob(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), StorageError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| StorageError::Invalid("invalid encryption key length".to_string()))?;
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| StorageError::Invalid("failed to encrypt session data".to_string()))?;
    Ok((nonce.to_vec(), ciphertext))
}

fn decrypt_blob(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, StorageError> {
    let cipher = Aes256GcmSiv::new_from_slice(key)
        .map_err(|_| StorageError::Invalid("invalid encryption key length".to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StorageError::Invalid("failed to decrypt session data".to_string()))
}

fn decode_bytes(value: &str, field: &str) -> Result<Vec<u8>, StorageError> {
    B64.decode(value).map_err(|err| {
        StorageError::Invalid(format!("failed to decode storage field `{field}`: {err}"))
    })
}

fn decode_fixed<const N: usize>(value: &str, field: &str) -> Result<[u8; N], StorageError> {
    let bytes = decode_bytes(value, field)?;
    if bytes.len() != N {
        return Err(StorageError::Invalid(format!(
            "invalid storage field `{field}` length: expected {N}, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwrapped_envelope_opens_values_sealed_with_original_key() {
        let key = new_key_material().unwrap();
        let sealed = seal(&key, "access-token").unwrap();
        assert!(!sealed.ciphertext.contains("access-token"));

        let reloaded = unwrap_key_material(&key.envelope).unwrap();
        assert_eq!(open(&reloaded, &sealed, "auth").unwrap(), "access-token");
    }

    #[test]
    fn value_from_another_key_is_rejected() {
        let sealed = seal(&new_key_material().unwrap(), "secret").unwrap();
        let other = new_key_material().unwrap();
        let err = open(&other, &sealed, "auth").unwrap_err();
        assert!(err.to_string().contains("`auth`"), "got: {err}");
    }
}
