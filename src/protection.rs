//! Tamper-evident sealing of cookie payloads
//!
//! Session and correlation cookies are sealed with AES-256-GCM. Each use
//! site passes a purpose string that is bound into the ciphertext as
//! associated data, so a value sealed for one purpose (say a correlation
//! ticket) never unseals under another (a session).
//!
//! Wire format: `base64url(nonce[12] || ciphertext || tag[16])`.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FrontdoorError, Result};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

const NONCE_LEN: usize = 12;

/// Seals and unseals opaque payloads.
#[derive(Clone)]
pub struct DataProtector {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for DataProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataProtector").finish_non_exhaustive()
    }
}

impl DataProtector {
    /// Creates a protector from a raw 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::Protection`] when the key is not 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(FrontdoorError::Protection(format!(
                "key must be {KEY_LEN} bytes, got {}",
                key.len()
            ))
            .into());
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| FrontdoorError::Protection(format!("invalid key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Creates a protector from a standard base64 encoded key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let key = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| FrontdoorError::Protection(format!("key is not base64: {e}")))?;
        Self::new(&key)
    }

    /// Creates a protector with a fresh random key.
    ///
    /// Values sealed by it cannot be opened after the process restarts.
    pub fn ephemeral() -> Self {
        use rand::RngCore as _;
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    /// Seals `plaintext` for `purpose`.
    pub fn protect(&self, purpose: &str, plaintext: &[u8]) -> Result<String> {
        use rand::RngCore as _;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: purpose.as_bytes(),
                },
            )
            .map_err(|e| FrontdoorError::Protection(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Opens a value sealed for `purpose`.
    ///
    /// # Errors
    ///
    /// Returns [`FrontdoorError::Protection`] when the value is malformed,
    /// was altered, or was sealed for another purpose or key.
    pub fn unprotect(&self, purpose: &str, sealed: &str) -> Result<Vec<u8>> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|_| FrontdoorError::Protection("payload is not base64url".to_string()))?;

        if bytes.len() < NONCE_LEN + 16 {
            return Err(FrontdoorError::Protection("payload too short".to_string()).into());
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: purpose.as_bytes(),
                },
            )
            .map_err(|_| FrontdoorError::Protection("integrity check failed".to_string()).into())
    }

    /// Serializes `value` to JSON and seals it.
    pub fn protect_json<T: Serialize>(&self, purpose: &str, value: &T) -> Result<String> {
        let json = serde_json::to_vec(value)?;
        self.protect(purpose, &json)
    }

    /// Unseals and deserializes a JSON value.
    pub fn unprotect_json<T: DeserializeOwned>(&self, purpose: &str, sealed: &str) -> Result<T> {
        let json = self.unprotect(purpose, sealed)?;
        serde_json::from_slice(&json).map_err(|e| {
            FrontdoorError::Protection(format!("sealed payload is not valid JSON: {e}")).into()
        })
    }
}
