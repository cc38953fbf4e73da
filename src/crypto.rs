// Refresh token encryption
//
// Blobs are base64(nonce || tag || ciphertext) under AES-256-GCM with a fresh
// 96-bit nonce per call. Access tokens are short-lived and stay plaintext; only
// refresh tokens go through this cipher.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::CryptoError;

/// Key length in bytes
pub const KEY_SIZE: usize = 32;
/// Nonce length in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;
/// Authentication tag length in bytes
pub const TAG_SIZE: usize = 16;

/// Authenticated cipher bound to one immutable key
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for TokenCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCipher").field("key", &"<redacted>").finish()
    }
}

impl TokenCipher {
    /// Create a cipher from raw key bytes
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_SIZE {
            return Err(CryptoError::Config(format!(
                "encryption key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::Config(format!("invalid encryption key: {e}")))?;

        Ok(Self { cipher })
    }

    /// Create a cipher from its configuration form: 64 hex characters or
    /// base64 of 32 bytes.
    pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(CryptoError::Config("encryption key is empty".to_string()));
        }

        let is_hex = encoded.len() == KEY_SIZE * 2 && encoded.bytes().all(|b| b.is_ascii_hexdigit());
        let key = if is_hex {
            hex::decode(encoded)
                .map_err(|e| CryptoError::Config(format!("invalid hex encryption key: {e}")))?
        } else {
            STANDARD.decode(encoded).map_err(|e| {
                CryptoError::Config(format!(
                    "encryption key is neither 64 hex characters nor base64: {e}"
                ))
            })?
        };

        Self::new(&key)
    }

    /// Encrypt plaintext into a textual blob
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.as_bytes().to_vec();

        // Encryption only fails for inputs far beyond any token size
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|e| CryptoError::Integrity(format!("encryption failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + TAG_SIZE + buffer.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&tag);
        blob.extend_from_slice(&buffer);

        Ok(STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`TokenCipher::encrypt`]
    pub fn decrypt(&self, blob: &str) -> Result<String, CryptoError> {
        let raw = STANDARD
            .decode(blob.trim())
            .map_err(|e| CryptoError::Integrity(format!("blob is not valid base64: {e}")))?;

        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Integrity(format!(
                "blob truncated: {} bytes, need at least {}",
                raw.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }

        let (nonce, rest) = raw.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);
        let mut buffer = ciphertext.to_vec();

        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(nonce),
                b"",
                &mut buffer,
                GenericArray::from_slice(tag),
            )
            .map_err(|_| {
                CryptoError::Integrity("authentication tag mismatch (wrong key or tampered data)".to_string())
            })?;

        String::from_utf8(buffer)
            .map_err(|e| CryptoError::Integrity(format!("plaintext is not valid UTF-8: {e}")))
    }
}
