//! Sealing of provider access tokens kept in the database.
//!
//! A sealed token reads `v1.` followed by base64 of `nonce || ciphertext`.
//! The owning principal's external id is bound in as associated data, so a
//! sealed value copied onto another principal's row fails to open.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const SEAL_VERSION: &str = "v1.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("token key must be {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("token key is not valid base64")]
    InvalidKeyEncoding,

    #[error("failed to seal provider token")]
    Seal,

    /// Wrong key, wrong owner, or a tampered value.
    #[error("failed to open sealed provider token")]
    Open,

    #[error("sealed provider token is malformed")]
    Malformed,
}

/// AES-256-GCM cipher for provider tokens at rest.
#[derive(Clone)]
pub struct TokenCipher {
    aead: Aes256Gcm,
}

impl TokenCipher {
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength(key.len()));
        }
        Ok(Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        })
    }

    /// Key as configured in `BREEZE_ENCRYPTION_KEY`: standard base64 of
    /// [`KEY_LEN`] bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKeyEncoding)?;
        Self::new(&key)
    }

    /// Cipher over a random key. Anything it seals is unreadable after a
    /// restart.
    pub fn ephemeral() -> Self {
        let mut key = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut key);
        Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    pub fn seal(&self, owner: i64, token: &str) -> Result<String, CryptoError> {
        let mut blob = vec![0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut blob);

        let sealed = self
            .aead
            .encrypt(
                Nonce::from_slice(&blob),
                Payload {
                    msg: token.as_bytes(),
                    aad: &owner.to_be_bytes(),
                },
            )
            .map_err(|_| CryptoError::Seal)?;
        blob.extend_from_slice(&sealed);

        Ok(format!("{SEAL_VERSION}{}", STANDARD.encode(blob)))
    }

    pub fn open(&self, owner: i64, sealed: &str) -> Result<String, CryptoError> {
        let blob = sealed
            .strip_prefix(SEAL_VERSION)
            .and_then(|body| STANDARD.decode(body).ok())
            .filter(|blob| blob.len() > NONCE_LEN)
            .ok_or(CryptoError::Malformed)?;
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let token = self
            .aead
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &owner.to_be_bytes(),
                },
            )
            .map_err(|_| CryptoError::Open)?;

        String::from_utf8(token).map_err(|_| CryptoError::Malformed)
    }
}
