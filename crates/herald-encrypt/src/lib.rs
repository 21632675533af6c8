//! Passphrase sealing for key material.
//!
//! Secret keys stored in a herald keyring are sealed with AES-256-GCM under a
//! key derived from the operator's passphrase with PBKDF2-SHA256.
//!
//! ```
//! use herald_encrypt::{seal, open};
//!
//! let sealed = seal(b"secret scalar", "correct horse").expect("seal");
//! assert_eq!(open(&sealed, "correct horse").expect("open"), b"secret scalar");
//! assert!(open(&sealed, "wrong").is_err());
//! ```
//!
//! Sealed format: `base64(salt || nonce || ciphertext || tag)`.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac_array;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const PBKDF2_ITERATIONS: u32 = 100_000;
const KEY_SIZE: usize = 32;

/// Failure to seal or open a value.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("sealed value is not valid base64")]
    Encoding(#[from] base64::DecodeError),
    #[error("sealed value too short ({0} bytes)")]
    Truncated(usize),
    /// Authentication failed: wrong passphrase or tampered data.
    #[error("unable to unseal: wrong passphrase or corrupted data")]
    WrongPassphrase,
    #[error("cipher failure: {0}")]
    Cipher(String),
}

/// Where a passphrase comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassphraseSource {
    /// Literal passphrase (discouraged outside tests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    /// Environment variable holding the passphrase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_var: Option<String>,
}

impl PassphraseSource {
    pub fn from_env(env_var: impl Into<String>) -> Self {
        Self {
            passphrase: None,
            env_var: Some(env_var.into()),
        }
    }

    pub fn literal(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
            env_var: None,
        }
    }

    /// Resolve the passphrase. The environment wins over a literal; an empty
    /// variable counts as unset.
    pub fn resolve(&self) -> Option<String> {
        if let Some(var) = &self.env_var
            && let Ok(value) = std::env::var(var)
            && !value.is_empty()
        {
            return Some(value);
        }
        self.passphrase.clone()
    }

    /// Human-readable description for error messages.
    pub fn describe(&self) -> String {
        match (&self.env_var, &self.passphrase) {
            (Some(var), _) => format!("environment variable {var}"),
            (None, Some(_)) => "configured passphrase".to_string(),
            (None, None) => "no passphrase source".to_string(),
        }
    }
}

/// Seal `data` under `passphrase`. Each call uses a fresh salt and nonce.
pub fn seal(data: &[u8], passphrase: &str) -> Result<String, SealError> {
    let salt: [u8; SALT_SIZE] = random_bytes();
    let nonce_bytes: [u8; NONCE_SIZE] = random_bytes();

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| SealError::Cipher(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), data)
        .map_err(|e| SealError::Cipher(format!("{e:?}")))?;

    let mut out = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

/// Open a value produced by [`seal`].
pub fn open(sealed: &str, passphrase: &str) -> Result<Vec<u8>, SealError> {
    let data = BASE64.decode(sealed.trim())?;
    if data.len() < SALT_SIZE + NONCE_SIZE + TAG_SIZE {
        return Err(SealError::Truncated(data.len()));
    }

    let (salt, rest) = data.split_at(SALT_SIZE);
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

    let key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|e| SealError::Cipher(e.to_string()))?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| SealError::WrongPassphrase)
}

/// Cheap structural check: decodes and is long enough to be sealed.
pub fn looks_sealed(content: &str) -> bool {
    BASE64
        .decode(content.trim())
        .map(|d| d.len() >= SALT_SIZE + NONCE_SIZE + TAG_SIZE)
        .unwrap_or(false)
}

/// Fill an array from the operating system RNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    OsRng.fill_bytes(&mut buf);
    buf
}

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_SIZE] {
    pbkdf2_hmac_array::<Sha256, KEY_SIZE>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS)
}
