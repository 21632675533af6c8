//! Detached artifact signatures.
//!
//! Release keys are ECDSA P-256 keys kept in a TOML keyring. The secret half
//! is sealed with the operator's passphrase (see `herald-encrypt`):
//!
//! ```toml
//! [[keys]]
//! id = "release"
//! capabilities = ["sign"]
//! public_key = "02a1..."       # SEC1 compressed, hex
//! secret_key = "base64..."     # sealed 32-byte scalar
//! created_at = "2026-01-01T00:00:00Z"
//! ```
//!
//! Each artifact is read once. The same SHA-256 pass feeds both the
//! signature and the `checksums.sha256` manifest. Signatures use RFC 6979
//! deterministic nonces and carry no timestamp, so signing the same files
//! with the same key always produces the same bytes.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use herald_encrypt::{PassphraseSource, SealError};
use herald_types::ArtifactSignature;
use p256::ecdsa::signature::{DigestSigner, DigestVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SigningError;

/// Checksum manifest written next to the signatures.
pub const CHECKSUMS_FILE: &str = "checksums.sha256";

/// Capability a key needs to sign artifacts.
pub const SIGN_CAPABILITY: &str = "sign";

const ARMOR_BEGIN: &str = "-----BEGIN HERALD SIGNATURE-----";
const ARMOR_END: &str = "-----END HERALD SIGNATURE-----";
const ARMOR_WIDTH: usize = 64;
const READ_CHUNK: usize = 64 * 1024;

static CRYPTO_READY: OnceLock<Result<(), String>> = OnceLock::new();

/// One-time self-test of the signature primitives. Safe to call repeatedly
/// and from several threads; only the first call does any work.
pub fn ensure_crypto_initialized() -> Result<(), SigningError> {
    CRYPTO_READY
        .get_or_init(self_test)
        .clone()
        .map_err(SigningError::Configuration)
}

fn self_test() -> Result<(), String> {
    let key = SigningKey::from_slice(&[0x42; 32]).map_err(|e| format!("key setup failed: {e}"))?;
    let digest = Sha256::new_with_prefix(b"herald self-test");
    let signature: Signature = key.sign_digest(digest.clone());
    key.verifying_key()
        .verify_digest(digest, &signature)
        .map_err(|e| format!("signature self-test failed: {e}"))
}

/// A key as stored in the keyring file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub id: String,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn default_capabilities() -> Vec<String> {
    vec![SIGN_CAPABILITY.to_string()]
}

impl KeyEntry {
    pub fn can_sign(&self) -> bool {
        self.secret_key.is_some() && self.capabilities.iter().any(|c| c == SIGN_CAPABILITY)
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, SigningError> {
        public_key_from_hex(&self.public_key)
    }
}

/// A set of keys loaded from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyring {
    #[serde(default)]
    pub keys: Vec<KeyEntry>,
}

impl Keyring {
    /// Load a keyring; an absent file is a configuration error.
    pub fn load(path: &Path) -> Result<Self, SigningError> {
        if !path.exists() {
            return Err(SigningError::Configuration(format!(
                "keyring not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path).map_err(|e| SigningError::io(path, e))?;
        toml::from_str(&content).map_err(|e| {
            SigningError::Configuration(format!("invalid keyring {}: {e}", path.display()))
        })
    }

    /// Load a keyring, or an empty one when the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self, SigningError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SigningError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| SigningError::io(parent, e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SigningError::Configuration(format!("failed to serialize keyring: {e}")))?;
        fs::write(path, content).map_err(|e| SigningError::io(path, e))
    }

    pub fn add(&mut self, entry: KeyEntry) -> Result<(), SigningError> {
        if self.keys.iter().any(|k| k.id == entry.id) {
            return Err(SigningError::Configuration(format!(
                "keyring already contains a key named '{}'",
                entry.id
            )));
        }
        self.keys.push(entry);
        Ok(())
    }

    /// First signing-capable key, or the one named `key_id`.
    pub fn find_signing(&self, key_id: Option<&str>) -> Option<&KeyEntry> {
        self.keys
            .iter()
            .filter(|k| k.can_sign())
            .find(|k| key_id.is_none_or(|id| k.id == id))
    }

    /// First key, or the one named `key_id`, regardless of capability.
    pub fn find(&self, key_id: Option<&str>) -> Option<&KeyEntry> {
        self.keys.iter().find(|k| key_id.is_none_or(|id| k.id == id))
    }
}

/// An unlocked release key.
pub struct ReleaseKey {
    id: String,
    signing_key: SigningKey,
}

impl std::fmt::Debug for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseKey").field("id", &self.id).finish_non_exhaustive()
    }
}

impl ReleaseKey {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key().clone()
    }

    pub fn public_key_hex(&self) -> String {
        public_key_to_hex(&self.verifying_key())
    }
}

/// Generate a fresh key and seal its secret half with `passphrase`.
pub fn generate_key(id: &str, passphrase: &str) -> Result<KeyEntry, SigningError> {
    ensure_crypto_initialized()?;
    let signing_key = loop {
        // Out-of-range scalars are astronomically rare; draw again.
        if let Ok(key) = SigningKey::from_slice(&herald_encrypt::random_bytes::<32>()) {
            break key;
        }
    };
    let secret = signing_key.to_bytes();
    let sealed = herald_encrypt::seal(secret.as_slice(), passphrase)
        .map_err(|e| SigningError::Configuration(format!("failed to seal key '{id}': {e}")))?;

    Ok(KeyEntry {
        id: id.to_string(),
        capabilities: default_capabilities(),
        public_key: public_key_to_hex(signing_key.verifying_key()),
        secret_key: Some(sealed),
        created_at: Utc::now(),
    })
}

/// Unlock the signing key. Runs before any file is touched.
pub fn load_signing_key(
    keyring_path: &Path,
    key_id: Option<&str>,
    passphrase: &PassphraseSource,
) -> Result<ReleaseKey, SigningError> {
    ensure_crypto_initialized()?;
    let keyring = Keyring::load(keyring_path)?;
    let entry = keyring
        .find_signing(key_id)
        .ok_or_else(|| SigningError::KeyNotFound {
            keyring: keyring_path.to_path_buf(),
            key_id: key_id.map(str::to_string),
        })?;

    let passphrase = passphrase.resolve().ok_or_else(|| {
        SigningError::Configuration(format!(
            "no passphrase for key '{}' ({})",
            entry.id,
            passphrase.describe()
        ))
    })?;

    let sealed = entry.secret_key.as_deref().unwrap_or_default();
    let secret = herald_encrypt::open(sealed, &passphrase).map_err(|e| {
        SigningError::DecryptionFailed {
            key_id: entry.id.clone(),
            reason: match e {
                SealError::WrongPassphrase => "wrong passphrase".to_string(),
                other => other.to_string(),
            },
        }
    })?;

    let signing_key =
        SigningKey::from_slice(&secret).map_err(|_| SigningError::DecryptionFailed {
            key_id: entry.id.clone(),
            reason: "unsealed secret is not a valid P-256 scalar".to_string(),
        })?;

    if public_key_to_hex(signing_key.verifying_key()) != entry.public_key.to_ascii_lowercase() {
        return Err(SigningError::DecryptionFailed {
            key_id: entry.id.clone(),
            reason: "secret key does not match the recorded public key".to_string(),
        });
    }

    Ok(ReleaseKey {
        id: entry.id.clone(),
        signing_key,
    })
}

/// Delete and recreate a directory.
pub fn prepare_output_directory(path: &Path) -> Result<(), SigningError> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| SigningError::io(path, e))?;
    }
    fs::create_dir_all(path).map_err(|e| SigningError::io(path, e))
}

/// Path of the detached signature for `source` inside `output_dir`.
pub fn signature_path(output_dir: &Path, source: &Path, armored: bool) -> PathBuf {
    let mut name = source
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(if armored { ".asc" } else { ".bpg" });
    output_dir.join(name)
}

/// Sign every file and write the checksum manifest, replacing `output_dir`.
///
/// The batch is written to a sibling `.partial` directory and moved into
/// place only once every file is signed. On any error neither directory is
/// left behind, so a failed run never leaves signatures to publish.
pub fn sign_all(
    files: &[PathBuf],
    key: &ReleaseKey,
    armored: bool,
    output_dir: &Path,
) -> Result<Vec<ArtifactSignature>, SigningError> {
    check_unique_names(files)?;

    let staging = output_dir.with_extension("partial");
    let result = write_batch(files, key, armored, &staging, output_dir)
        .and_then(|signatures| replace_dir(&staging, output_dir).map(|()| signatures));
    if result.is_err() {
        discard_dir(&staging);
        discard_dir(output_dir);
    }
    result
}

/// Signatures and manifest entries are keyed by file name.
fn check_unique_names(files: &[PathBuf]) -> Result<(), SigningError> {
    let mut seen = BTreeMap::new();
    for source in files {
        let name = source.file_name().ok_or_else(|| {
            SigningError::Configuration(format!("artifact {} has no file name", source.display()))
        })?;
        if let Some(first) = seen.insert(name, source) {
            return Err(SigningError::Configuration(format!(
                "artifacts {} and {} share the file name {}",
                first.display(),
                source.display(),
                name.to_string_lossy()
            )));
        }
    }
    Ok(())
}

fn write_batch(
    files: &[PathBuf],
    key: &ReleaseKey,
    armored: bool,
    staging: &Path,
    output_dir: &Path,
) -> Result<Vec<ArtifactSignature>, SigningError> {
    prepare_output_directory(staging)?;

    let mut signatures = Vec::with_capacity(files.len());
    let mut manifest = String::new();

    for source in files {
        let hasher = digest_file(source)?;
        let checksum = hex::encode(hasher.clone().finalize());
        let signature: Signature = key.signing_key.sign_digest(hasher);

        let staged_path = signature_path(staging, source, armored);
        let encoded = if armored {
            armor(&signature, key.id()).into_bytes()
        } else {
            signature.to_bytes().to_vec()
        };
        fs::write(&staged_path, encoded).map_err(|e| SigningError::io(&staged_path, e))?;

        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        manifest.push_str(&format!("{checksum}  {name}\n"));

        signatures.push(ArtifactSignature {
            source_path: source.clone(),
            signature_path: signature_path(output_dir, source, armored),
            armored,
        });
    }

    let manifest_path = staging.join(CHECKSUMS_FILE);
    fs::write(&manifest_path, manifest).map_err(|e| SigningError::io(&manifest_path, e))?;
    Ok(signatures)
}

fn replace_dir(staging: &Path, output_dir: &Path) -> Result<(), SigningError> {
    if output_dir.exists() {
        fs::remove_dir_all(output_dir).map_err(|e| SigningError::io(output_dir, e))?;
    }
    fs::rename(staging, output_dir).map_err(|e| SigningError::io(output_dir, e))
}

fn discard_dir(path: &Path) {
    if path.exists() {
        // Best effort; the original error is the one worth reporting.
        let _ = fs::remove_dir_all(path);
    }
}

/// Artifact checksums recorded by the last complete signing batch.
///
/// Empty when `output_dir` holds no manifest.
pub fn read_manifest(output_dir: &Path) -> Result<BTreeMap<String, String>, SigningError> {
    let path = output_dir.join(CHECKSUMS_FILE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(SigningError::io(&path, e)),
    };
    Ok(content
        .lines()
        .filter_map(|line| line.split_once("  "))
        .map(|(checksum, name)| (name.to_string(), checksum.to_ascii_lowercase()))
        .collect())
}

/// Hex SHA-256 of a file, as written to the manifest.
pub fn file_checksum(path: &Path) -> Result<String, SigningError> {
    Ok(hex::encode(digest_file(path)?.finalize()))
}

/// Check a `.asc` or `.bpg` signature over `source`.
///
/// Returns `Ok(false)` for a well-formed signature that does not match.
pub fn verify_detached(
    source: &Path,
    signature: &Path,
    public_key: &VerifyingKey,
) -> Result<bool, SigningError> {
    ensure_crypto_initialized()?;
    let raw = fs::read(signature).map_err(|e| SigningError::io(signature, e))?;
    let bytes = match std::str::from_utf8(&raw) {
        Ok(text) if text.trim_start().starts_with(ARMOR_BEGIN) => dearmor(text).ok_or_else(|| {
            SigningError::Configuration(format!("malformed armored signature {}", signature.display()))
        })?,
        _ => raw,
    };
    let parsed = Signature::from_slice(&bytes).map_err(|_| {
        SigningError::Configuration(format!("malformed signature {}", signature.display()))
    })?;

    let hasher = digest_file(source)?;
    Ok(public_key.verify_digest(hasher, &parsed).is_ok())
}

pub fn public_key_to_hex(key: &VerifyingKey) -> String {
    hex::encode(key.as_affine().to_encoded_point(true).as_bytes())
}

pub fn public_key_from_hex(encoded: &str) -> Result<VerifyingKey, SigningError> {
    let bytes = hex::decode(encoded.trim())
        .map_err(|e| SigningError::Configuration(format!("public key is not hex: {e}")))?;
    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|_| SigningError::Configuration("public key is not a P-256 point".to_string()))
}

fn digest_file(path: &Path) -> Result<Sha256, SigningError> {
    let mut file = File::open(path).map_err(|e| SigningError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SigningError::io(path, e)),
        };
        hasher.update(&buf[..n]);
    }
    Ok(hasher)
}

fn armor(signature: &Signature, key_id: &str) -> String {
    let encoded = BASE64.encode(signature.to_bytes());
    let mut out = format!("{ARMOR_BEGIN}\nKey: {key_id}\nHash: SHA256\n\n");
    for chunk in encoded.as_bytes().chunks(ARMOR_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(ARMOR_END);
    out.push('\n');
    out
}

fn dearmor(text: &str) -> Option<Vec<u8>> {
    let mut lines = text.lines().map(str::trim).skip_while(|l| *l != ARMOR_BEGIN).skip(1);
    // Header lines run until the first blank line.
    for line in lines.by_ref() {
        if line.is_empty() {
            break;
        }
    }
    let body: String = lines.take_while(|l| *l != ARMOR_END).collect();
    BASE64.decode(body).ok()
}
