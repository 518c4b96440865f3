// Cryptographic utilities for generating secure tokens and nonces

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use serde::{de::DeserializeOwned, Serialize};

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Generate a cryptographically secure CSRF token
///
/// 24 bytes (192 bits) of entropy, base64url encoded to 32 characters.
#[must_use]
pub fn generate_csrf_token() -> String {
    let mut nonce = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Generate a cryptographically secure nonce of the given byte length
///
/// # Returns
///
/// A base64url-encoded string representing the specified bytes of random data
#[must_use]
pub fn generate_nonce(length: usize) -> String {
    let mut nonce = vec![0u8; length];
    rand::thread_rng().fill_bytes(&mut nonce);
    general_purpose::URL_SAFE_NO_PAD.encode(nonce)
}

/// Generic encryption function for any serializable data using AES-256-GCM
///
/// # Returns
///
/// A base64url-encoded string containing the nonce + ciphertext
///
/// # Errors
///
/// Returns an error if:
/// - Serialization fails
/// - Key length is invalid
/// - AES encryption fails
pub fn encrypt_data<T: Serialize>(data: &T, key: &[u8]) -> Result<String> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let json_data = serde_json::to_string(data).context("Failed to serialize data")?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, json_data.as_bytes())
        .map_err(|e| anyhow!("AES encryption failed: {e}"))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);

    Ok(general_purpose::URL_SAFE_NO_PAD.encode(&combined))
}

/// Generic decryption function for any deserializable data using AES-256-GCM
///
/// # Errors
///
/// Returns an error if:
/// - Key length is invalid
/// - Base64 decoding fails
/// - Data length is invalid
/// - AES decryption fails
/// - Deserialization fails
pub fn decrypt_data<T: DeserializeOwned>(encrypted_data: &str, key: &[u8]) -> Result<T> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(anyhow!(
            "Invalid key length: expected {} bytes, got {}",
            ENCRYPTION_KEY_SIZE,
            key.len()
        ));
    }

    let combined = general_purpose::URL_SAFE_NO_PAD
        .decode(encrypted_data)
        .context("Failed to decode base64 data")?;

    if combined.len() < NONCE_SIZE {
        return Err(anyhow!("Invalid data length"));
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| anyhow!("AES decryption failed: {e}"))?;

    let data: T = serde_json::from_slice(&plaintext)
        .context("Failed to deserialize data from decrypted JSON")?;

    Ok(data)
}

/// Derive a proper 32-byte encryption key from input key material
///
/// Keys shorter than 32 bytes are extended with a SHA-256 based expansion;
/// longer keys are truncated.
#[must_use]
pub fn derive_encryption_key(input_key: &[u8]) -> [u8; ENCRYPTION_KEY_SIZE] {
    use sha2::{Digest, Sha256};

    let mut encryption_key = [0u8; ENCRYPTION_KEY_SIZE];
    let key_len = std::cmp::min(input_key.len(), ENCRYPTION_KEY_SIZE);
    encryption_key[..key_len].copy_from_slice(&input_key[..key_len]);

    if key_len < ENCRYPTION_KEY_SIZE {
        let mut hasher = Sha256::new();
        hasher.update(input_key);
        let digest = hasher.finalize();
        for (i, byte) in encryption_key
            .iter_mut()
            .enumerate()
            .take(ENCRYPTION_KEY_SIZE)
            .skip(key_len)
        {
            *byte = digest[i % digest.len()];
        }
    }

    encryption_key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Payload {
        value: String,
        count: u32,
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = derive_encryption_key(b"test-secret");
        let payload = Payload {
            value: "hello".to_string(),
            count: 42,
        };

        let encrypted = encrypt_data(&payload, &key).unwrap();
        let decrypted: Payload = decrypt_data(&encrypted, &key).unwrap();
        assert_eq!(payload, decrypted);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key = derive_encryption_key(b"key-one");
        let other = derive_encryption_key(b"key-two");
        let payload = Payload {
            value: "hello".to_string(),
            count: 1,
        };

        let encrypted = encrypt_data(&payload, &key).unwrap();
        assert!(decrypt_data::<Payload>(&encrypted, &other).is_err());
    }

    #[test]
    fn nonce_generation_is_unique() {
        let a = generate_nonce(32);
        let b = generate_nonce(32);
        assert_ne!(a, b);
        assert_ne!(generate_csrf_token(), generate_csrf_token());
    }

    #[test]
    fn short_keys_are_expanded() {
        let key = derive_encryption_key(b"short");
        assert_eq!(key.len(), ENCRYPTION_KEY_SIZE);
        // Expansion must be deterministic
        assert_eq!(key, derive_encryption_key(b"short"));
    }
}
