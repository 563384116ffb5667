//! Detached signatures in a minisign-style wire format
//!
//! Signatures are produced in-process with Ed25519. The formats follow the
//! minisign conventions: detached signature next to the signed file with a
//! `.minisig` suffix, base64 payload lines behind untrusted comment lines, an
//! 8-byte key id embedded in every key and signature, and a second "global"
//! signature binding the trusted comment to the file signature.
//!
//! Secret keys are either stored in the clear or encrypted by XORing the key
//! material with an Argon2id-derived keystream; a keyed checksum over the key
//! material turns a wrong password into a clean error instead of garbage keys.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::error::{HistorifyError, SignatureError};

/// Environment variable consulted for the password of an encrypted secret key.
pub const PASSWORD_ENV: &str = "HISTORIFY_PASSWORD";

const SIG_ALG: &[u8; 2] = b"Ed";
const KDF_NONE: &[u8; 2] = b"\0\0";
const KDF_ARGON2: &[u8; 2] = b"Ar";
const CHK_BLAKE3: &[u8; 2] = b"B3";

const KEY_ID_LEN: usize = 8;
const SALT_LEN: usize = 16;
// key_id(8) + seed(32) + pk(32) + checksum(32)
const KEYNUM_LEN: usize = 104;

/// Detached signature path: `<path>.minisig` next to the file.
pub fn sig_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".minisig");
    path.with_file_name(name)
}

/// A public verification key with its 8-byte id.
#[derive(Debug, Clone)]
pub struct PublicKey {
    key_id: [u8; KEY_ID_LEN],
    key: VerifyingKey,
}

impl PublicKey {
    pub fn from_file(path: &Path) -> Result<Self, SignatureError> {
        let (_, payload) = read_key_lines(path)?;
        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| malformed(path, format!("invalid base64: {e}")))?;
        if bytes.len() != 2 + KEY_ID_LEN + 32 {
            return Err(malformed(path, format!("{} byte payload", bytes.len())));
        }
        if &bytes[..2] != SIG_ALG {
            return Err(malformed(path, "unknown signature algorithm".to_string()));
        }
        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&bytes[2..2 + KEY_ID_LEN]);
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&bytes[2 + KEY_ID_LEN..]);
        let key = VerifyingKey::from_bytes(&pk)
            .map_err(|e| malformed(path, format!("invalid Ed25519 point: {e}")))?;
        Ok(PublicKey { key_id, key })
    }

    /// Hex-uppercase key id, the cache filename stem.
    pub fn key_id_hex(&self) -> String {
        hex::encode_upper(self.key_id)
    }

    pub fn write_to(&self, path: &Path) -> Result<(), HistorifyError> {
        let mut payload = Vec::with_capacity(2 + KEY_ID_LEN + 32);
        payload.extend_from_slice(SIG_ALG);
        payload.extend_from_slice(&self.key_id);
        payload.extend_from_slice(self.key.as_bytes());
        let content = format!(
            "untrusted comment: historify public key {}\n{}\n",
            self.key_id_hex(),
            BASE64.encode(&payload)
        );
        fs::write(path, content).map_err(|e| HistorifyError::io(path, e))
    }
}

/// A secret signing key with its 8-byte id.
#[derive(Debug)]
pub struct SecretKey {
    key_id: [u8; KEY_ID_LEN],
    signing: SigningKey,
}

impl SecretKey {
    /// Load a secret key, decrypting it if necessary.
    ///
    /// For an encrypted key with no password supplied, the `HISTORIFY_PASSWORD`
    /// environment variable is consulted before failing.
    pub fn from_file(path: &Path, password: Option<&str>) -> Result<Self, SignatureError> {
        if !path.exists() {
            return Err(SignatureError::KeyMissing {
                path: path.to_path_buf(),
            });
        }
        let (_, payload) = read_key_lines(path)?;
        let bytes = BASE64
            .decode(payload.trim())
            .map_err(|e| malformed(path, format!("invalid base64: {e}")))?;
        if bytes.len() != 2 + 2 + 2 + SALT_LEN + KEYNUM_LEN {
            return Err(malformed(path, format!("{} byte payload", bytes.len())));
        }
        if &bytes[..2] != SIG_ALG {
            return Err(malformed(path, "unknown signature algorithm".to_string()));
        }
        let kdf_alg = &bytes[2..4];
        if &bytes[4..6] != CHK_BLAKE3 {
            return Err(malformed(path, "unknown checksum algorithm".to_string()));
        }
        let salt = &bytes[6..6 + SALT_LEN];
        let mut blob: [u8; KEYNUM_LEN] = bytes[6 + SALT_LEN..].try_into().expect("sized above");

        let mut wrong_password_is_checksum = false;
        match kdf_alg {
            k if k == KDF_NONE => {}
            k if k == KDF_ARGON2 => {
                let env_password = std::env::var(PASSWORD_ENV).ok();
                let password = match password.or(env_password.as_deref()) {
                    Some(p) => p,
                    None => return Err(SignatureError::PasswordRequired),
                };
                let keystream = derive_keystream(password, salt, path)?;
                for (b, k) in blob.iter_mut().zip(keystream.iter()) {
                    *b ^= k;
                }
                wrong_password_is_checksum = true;
            }
            _ => return Err(malformed(path, "unknown KDF algorithm".to_string())),
        }

        let mut key_id = [0u8; KEY_ID_LEN];
        key_id.copy_from_slice(&blob[..KEY_ID_LEN]);
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&blob[KEY_ID_LEN..KEY_ID_LEN + 32]);
        let mut pk = [0u8; 32];
        pk.copy_from_slice(&blob[KEY_ID_LEN + 32..KEY_ID_LEN + 64]);
        let checksum = &blob[KEY_ID_LEN + 64..];

        if key_checksum(&key_id, &seed, &pk) != checksum {
            return if wrong_password_is_checksum {
                Err(SignatureError::BadPassword)
            } else {
                Err(malformed(path, "checksum mismatch".to_string()))
            };
        }

        let signing = SigningKey::from_bytes(&seed);
        if signing.verifying_key().as_bytes() != &pk {
            return Err(malformed(path, "public half does not match".to_string()));
        }
        Ok(SecretKey { key_id, signing })
    }

    pub fn key_id_hex(&self) -> String {
        hex::encode_upper(self.key_id)
    }

    /// Write the key, encrypting it when a password is given.
    pub fn write_to(&self, path: &Path, password: Option<&str>) -> Result<(), HistorifyError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let seed = self.signing.to_bytes();
        let pk = self.signing.verifying_key().to_bytes();
        let mut blob = Vec::with_capacity(KEYNUM_LEN);
        blob.extend_from_slice(&self.key_id);
        blob.extend_from_slice(&seed);
        blob.extend_from_slice(&pk);
        blob.extend_from_slice(&key_checksum(&self.key_id, &seed, &pk));

        let (kdf_alg, comment) = match password {
            Some(p) => {
                let keystream =
                    derive_keystream(p, &salt, path).map_err(HistorifyError::Signature)?;
                for (b, k) in blob.iter_mut().zip(keystream.iter()) {
                    *b ^= k;
                }
                (KDF_ARGON2, "encrypted secret key")
            }
            None => (KDF_NONE, "unencrypted secret key"),
        };

        let mut payload = Vec::with_capacity(2 + 2 + 2 + SALT_LEN + KEYNUM_LEN);
        payload.extend_from_slice(SIG_ALG);
        payload.extend_from_slice(kdf_alg);
        payload.extend_from_slice(CHK_BLAKE3);
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&blob);

        let content = format!(
            "untrusted comment: historify {} {}\n{}\n",
            comment,
            self.key_id_hex(),
            BASE64.encode(&payload)
        );
        fs::write(path, content).map_err(|e| HistorifyError::io(path, e))
    }
}

/// A freshly generated key pair.
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    pub fn generate() -> KeyPair {
        let signing = SigningKey::generate(&mut OsRng);
        let mut key_id = [0u8; KEY_ID_LEN];
        OsRng.fill_bytes(&mut key_id);
        let public = PublicKey {
            key_id,
            key: signing.verifying_key(),
        };
        let secret = SecretKey { key_id, signing };
        KeyPair { public, secret }
    }
}

/// Sign `path`, writing the detached signature to `<path>.minisig`.
pub fn sign_file(path: &Path, secret: &SecretKey) -> Result<(), HistorifyError> {
    let message = fs::read(path).map_err(|e| HistorifyError::io(path, e))?;
    let signature = secret.signing.sign(&message);

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let trusted_comment = format!(
        "timestamp:{}\tfile:{}",
        chrono::Utc::now().timestamp(),
        file_name
    );

    let mut global_message = Vec::with_capacity(64 + trusted_comment.len());
    global_message.extend_from_slice(&signature.to_bytes());
    global_message.extend_from_slice(trusted_comment.as_bytes());
    let global_signature = secret.signing.sign(&global_message);

    let mut payload = Vec::with_capacity(2 + KEY_ID_LEN + 64);
    payload.extend_from_slice(SIG_ALG);
    payload.extend_from_slice(&secret.key_id);
    payload.extend_from_slice(&signature.to_bytes());

    let content = format!(
        "untrusted comment: signature from historify secret key {}\n{}\ntrusted comment: {}\n{}\n",
        secret.key_id_hex(),
        BASE64.encode(&payload),
        trusted_comment,
        BASE64.encode(global_signature.to_bytes()),
    );

    let sig_file = sig_path(path);
    fs::write(&sig_file, content).map_err(|e| HistorifyError::io(&sig_file, e))?;
    debug!(file = %path.display(), "wrote detached signature");
    Ok(())
}

/// Verify the detached signature of `path` against a public key.
///
/// A missing signature file is a distinct failure from an invalid one.
pub fn verify_file(path: &Path, public: &PublicKey) -> Result<(), SignatureError> {
    let sig_file = sig_path(path);
    if !sig_file.exists() {
        return Err(SignatureError::MissingSignature {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(&sig_file)
        .map_err(|e| invalid(path, format!("unreadable signature file: {e}")))?;
    let mut lines = content.lines();
    let _untrusted = lines
        .next()
        .ok_or_else(|| invalid(path, "empty signature file".to_string()))?;
    let payload = lines
        .next()
        .ok_or_else(|| invalid(path, "truncated signature file".to_string()))?;
    let trusted_line = lines
        .next()
        .ok_or_else(|| invalid(path, "missing trusted comment".to_string()))?;
    let global_payload = lines
        .next()
        .ok_or_else(|| invalid(path, "missing global signature".to_string()))?;

    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| invalid(path, format!("invalid base64: {e}")))?;
    if bytes.len() != 2 + KEY_ID_LEN + 64 {
        return Err(invalid(path, format!("{} byte payload", bytes.len())));
    }
    if &bytes[..2] != SIG_ALG {
        return Err(invalid(path, "unknown signature algorithm".to_string()));
    }
    let found_id = &bytes[2..2 + KEY_ID_LEN];
    if found_id != &public.key_id[..] {
        return Err(SignatureError::KeyIdMismatch {
            expected: public.key_id_hex(),
            found: hex::encode_upper(found_id),
        });
    }
    let sig_bytes: [u8; 64] = bytes[2 + KEY_ID_LEN..].try_into().expect("sized above");
    let signature = Signature::from_bytes(&sig_bytes);

    let message = fs::read(path).map_err(|e| invalid(path, format!("unreadable file: {e}")))?;
    public
        .key
        .verify(&message, &signature)
        .map_err(|_| invalid(path, "signature does not match file content".to_string()))?;

    let trusted_comment = trusted_line
        .strip_prefix("trusted comment: ")
        .ok_or_else(|| invalid(path, "malformed trusted comment line".to_string()))?;
    let global_bytes = BASE64
        .decode(global_payload.trim())
        .map_err(|e| invalid(path, format!("invalid base64: {e}")))?;
    let global_sig_bytes: [u8; 64] = global_bytes
        .as_slice()
        .try_into()
        .map_err(|_| invalid(path, "malformed global signature".to_string()))?;
    let global_signature = Signature::from_bytes(&global_sig_bytes);

    let mut global_message = Vec::with_capacity(64 + trusted_comment.len());
    global_message.extend_from_slice(&sig_bytes);
    global_message.extend_from_slice(trusted_comment.as_bytes());
    public
        .key
        .verify(&global_message, &global_signature)
        .map_err(|_| invalid(path, "trusted comment does not match signature".to_string()))?;

    Ok(())
}

fn derive_keystream(
    password: &str,
    salt: &[u8],
    path: &Path,
) -> Result<[u8; KEYNUM_LEN], SignatureError> {
    let mut keystream = [0u8; KEYNUM_LEN];
    argon2::Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut keystream)
        .map_err(|e| malformed(path, format!("key derivation failed: {e}")))?;
    Ok(keystream)
}

fn key_checksum(key_id: &[u8; KEY_ID_LEN], seed: &[u8; 32], pk: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(SIG_ALG);
    hasher.update(key_id);
    hasher.update(seed);
    hasher.update(pk);
    *hasher.finalize().as_bytes()
}

fn read_key_lines(path: &Path) -> Result<(String, String), SignatureError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SignatureError::KeyMissing {
                path: path.to_path_buf(),
            }
        } else {
            malformed(path, format!("unreadable: {e}"))
        }
    })?;
    let mut lines = content.lines();
    let comment = lines
        .next()
        .ok_or_else(|| malformed(path, "empty key file".to_string()))?;
    let payload = lines
        .next()
        .ok_or_else(|| malformed(path, "missing key payload line".to_string()))?;
    Ok((comment.to_string(), payload.to_string()))
}

fn malformed(path: &Path, reason: String) -> SignatureError {
    SignatureError::MalformedKey {
        path: path.to_path_buf(),
        reason,
    }
}

fn invalid(path: &Path, reason: String) -> SignatureError {
    SignatureError::Invalid {
        path: path.to_path_buf(),
        reason,
    }
}
