//! The setting cipher: encrypt-on-write, decrypt-on-read for
//! secret-convention settings.
//!
//! Secret settings (`password_*` keys) are stored as opaque tokens so
//! a casual reader of `config.json` never sees the plaintext. The
//! scheme is built from HMAC-SHA256: a keystream in counter mode over
//! a per-token nonce, plus a truncated authentication tag. Token
//! format: `dh1:` + base64(nonce || ciphertext || tag).
//!
//! This keeps secrets out of config files and backups on a single-user
//! desktop; it is not a substitute for an OS keychain. The salt comes
//! from host configuration, so tokens only decrypt on the host that
//! wrote them.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Marker prefix identifying an encrypted token.
pub const TOKEN_PREFIX: &str = "dh1:";

const KEY_CONTEXT: &[u8] = b"deskhand setting cipher v1";
const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// Why a token failed to decrypt. Decrypt failures are non-fatal at
/// the call sites: the raw stored value is returned instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptError {
    /// The value does not carry the token prefix.
    #[error("value is not an encrypted token")]
    NotAToken,

    /// The token body is not decodable or is too short.
    #[error("encrypted token is malformed")]
    Malformed,

    /// The authentication tag does not match (wrong salt, or the
    /// stored value was edited).
    #[error("encrypted token failed authentication")]
    TagMismatch,
}

/// Symmetric cipher for secret setting values, keyed by a host salt.
pub struct SettingCipher {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

impl SettingCipher {
    /// Derive the cipher keys from the host's configured salt.
    pub fn new(salt: &str) -> Self {
        let root = keyed_digest(salt.as_bytes(), &[KEY_CONTEXT]);
        Self {
            enc_key: keyed_digest(&root, &[b"enc"]),
            mac_key: keyed_digest(&root, &[b"mac"]),
        }
    }

    /// Whether a stored value is an encrypted token.
    pub fn is_encrypted(value: &str) -> bool {
        value.starts_with(TOKEN_PREFIX)
    }

    /// Encrypt a plaintext into a token. Each call produces a distinct
    /// token, even for identical plaintexts.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let nonce = fresh_nonce();
        let mut body = plaintext.as_bytes().to_vec();
        self.apply_keystream(&nonce, &mut body);
        let tag = keyed_digest(&self.mac_key, &[&nonce, &body]);

        let mut packed = Vec::with_capacity(NONCE_LEN + body.len() + TAG_LEN);
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&body);
        packed.extend_from_slice(&tag[..TAG_LEN]);
        format!("{TOKEN_PREFIX}{}", BASE64.encode(packed))
    }

    /// Decrypt a token back to its plaintext.
    pub fn decrypt(&self, token: &str) -> Result<String, DecryptError> {
        let encoded = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or(DecryptError::NotAToken)?;
        let packed = BASE64.decode(encoded).map_err(|_| DecryptError::Malformed)?;
        if packed.len() < NONCE_LEN + TAG_LEN {
            return Err(DecryptError::Malformed);
        }
        let (nonce, rest) = packed.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        let expected = keyed_digest(&self.mac_key, &[nonce, ciphertext]);
        if !constant_time_eq(&expected[..TAG_LEN], tag) {
            return Err(DecryptError::TagMismatch);
        }

        let mut body = ciphertext.to_vec();
        self.apply_keystream(nonce, &mut body);
        String::from_utf8(body).map_err(|_| DecryptError::Malformed)
    }

    fn apply_keystream(&self, nonce: &[u8], data: &mut [u8]) {
        for (index, chunk) in data.chunks_mut(32).enumerate() {
            let counter = (index as u32).to_be_bytes();
            let block = keyed_digest(&self.enc_key, &[nonce, &counter]);
            for (byte, pad) in chunk.iter_mut().zip(block.iter()) {
                *byte ^= pad;
            }
        }
    }
}

impl std::fmt::Debug for SettingCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SettingCipher")
    }
}

fn keyed_digest(key: &[u8], parts: &[&[u8]]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

/// Per-token nonce: digest of wall clock, a process-wide counter, and
/// the pid. Uniqueness is what matters here, not unpredictability.
fn fresh_nonce() -> [u8; NONCE_LEN] {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(now.as_nanos().to_le_bytes());
    hasher.update(COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    let digest = hasher.finalize();

    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    nonce
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}
