//! AES-256-GCM encryption for tokens at rest.
//!
//! Every token is encrypted with a fresh random nonce, so encrypting the same
//! plaintext twice yields different ciphertexts. The master key is 32 bytes
//! (256 bits), provided base64-encoded from the environment at startup.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Cipher failures.
///
/// `Decryption` indicates a tampered ciphertext or a key that does not match
/// the one the data was written with. Callers must surface it, never swallow
/// it: it means at-rest data can no longer be read.
#[derive(Debug, PartialEq, Clone)]
pub enum CipherError {
    /// Key is not valid base64 or not 32 bytes once decoded
    InvalidKey(String),
    /// Encryption failed
    Encryption(String),
    /// Ciphertext is malformed, tampered with, or from a different key
    Decryption(String),
}

impl std::fmt::Display for CipherError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CipherError::InvalidKey(msg) => write!(f, "Invalid encryption key: {}", msg),
            CipherError::Encryption(msg) => write!(f, "Encryption failed: {}", msg),
            CipherError::Decryption(msg) => write!(f, "Decryption failed: {}", msg),
        }
    }
}

impl std::error::Error for CipherError {}

/// Process-wide symmetric cipher for token storage.
///
/// Wraps AES-256-GCM with a single master key. The ciphertext string format
/// is `base64(nonce || ciphertext)`, one opaque value per encrypted token.
#[derive(Clone)]
pub struct TokenCipher {
    cipher: Aes256Gcm,
}

impl TokenCipher {
    /// Builds a cipher from a base64-encoded 32-byte master key.
    pub fn new(key_base64: &str) -> Result<Self, CipherError> {
        let key_bytes = validate_key(key_base64)?;
        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| CipherError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Encrypts a plaintext token with a fresh random nonce.
    ///
    /// Returns `base64(nonce || ciphertext)`. Two calls on the same input
    /// produce different outputs.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&nonce);
        combined.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(combined))
    }

    /// Decrypts a ciphertext string produced by [`encrypt`](Self::encrypt).
    ///
    /// Fails on tampered data or a foreign key; authenticated encryption
    /// detects both.
    pub fn decrypt(&self, ciphertext_base64: &str) -> Result<String, CipherError> {
        let combined = BASE64
            .decode(ciphertext_base64)
            .map_err(|e| CipherError::Decryption(format!("invalid base64: {}", e)))?;

        if combined.len() < NONCE_SIZE {
            return Err(CipherError::Decryption(format!(
                "ciphertext too short: {} bytes",
                combined.len()
            )));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::Decryption("wrong key or corrupted data".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| CipherError::Decryption(format!("not valid UTF-8: {}", e)))
    }
}

/// Validates that the master key is exactly 32 bytes when base64 decoded.
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>, CipherError> {
    let key_bytes = BASE64
        .decode(key_base64)
        .map_err(|e| CipherError::InvalidKey(format!("invalid base64: {}", e)))?;

    if key_bytes.len() != KEY_SIZE {
        return Err(CipherError::InvalidKey(format!(
            "key must be {} bytes (256 bits), got {}",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> TokenCipher {
        let key = BASE64.encode([0u8; 32]);
        TokenCipher::new(&key).expect("Failed to create test cipher")
    }

    #[test]
    fn test_key_validation() {
        // Valid 32-byte key (base64-encoded)
        let valid_key = BASE64.encode([0u8; 32]);
        assert!(validate_key(&valid_key).is_ok());

        // Too short
        let short_key = BASE64.encode([0u8; 16]);
        assert!(validate_key(&short_key).is_err());

        // Too long
        let long_key = BASE64.encode([0u8; 64]);
        assert!(validate_key(&long_key).is_err());

        // Invalid base64
        assert!(validate_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let plaintext = "my-secret-access-token-12345";

        let ciphertext = cipher.encrypt(plaintext).expect("Encryption failed");
        assert_ne!(ciphertext, plaintext);

        let decrypted = cipher.decrypt(&ciphertext).expect("Decryption failed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_string_roundtrip() {
        let cipher = test_cipher();

        let ciphertext = cipher.encrypt("").expect("Encryption failed");
        assert!(!ciphertext.is_empty());

        let decrypted = cipher.decrypt(&ciphertext).expect("Decryption failed");
        assert_eq!(decrypted, "");
    }

    #[test]
    fn test_encryption_is_non_deterministic() {
        let cipher = test_cipher();
        let plaintext = "same-plaintext";

        let ciphertext1 = cipher.encrypt(plaintext).unwrap();
        let ciphertext2 = cipher.encrypt(plaintext).unwrap();

        // Fresh nonce per call, so ciphertexts differ
        assert_ne!(ciphertext1, ciphertext2);

        // Both decrypt back to the original
        assert_eq!(cipher.decrypt(&ciphertext1).unwrap(), plaintext);
        assert_eq!(cipher.decrypt(&ciphertext2).unwrap(), plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let cipher1 = test_cipher();
        let cipher2 = TokenCipher::new(&BASE64.encode([1u8; 32])).unwrap();

        let ciphertext = cipher1.encrypt("secret").unwrap();

        let result = cipher2.decrypt(&ciphertext);
        assert!(matches!(result, Err(CipherError::Decryption(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();

        let ciphertext = cipher.encrypt("secret").unwrap();

        // Flip the last character of the base64 payload
        let mut tampered: Vec<char> = ciphertext.chars().collect();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = tampered.into_iter().collect();

        assert!(cipher.decrypt(&tampered).is_err());
    }

    #[test]
    fn test_garbage_ciphertext_fails() {
        let cipher = test_cipher();

        assert!(matches!(
            cipher.decrypt("not base64 at all!!!"),
            Err(CipherError::Decryption(_))
        ));
        // Valid base64 but shorter than a nonce
        assert!(matches!(
            cipher.decrypt(&BASE64.encode([0u8; 4])),
            Err(CipherError::Decryption(_))
        ));
    }
}
