use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

const PBKDF2_ITERATIONS: u32 = 150_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext is not valid base64")]
    Encoding,
    #[error("ciphertext is truncated or malformed")]
    Malformed,
    #[error("decryption failed: wrong key or corrupted payload")]
    Decrypt,
}

/// A decrypted NVR credential password. Deliberately carries no `Debug` or
/// `Display` impl - the only way to get the bytes out is `expose()`, and
/// callers that try to log this type get a compile error instead of a
/// leaked secret in a log line or error message.
pub struct SecretPassword(String);

impl SecretPassword {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

fn derive_key(secret_key: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(secret_key.as_bytes(), b"netmanager-vault", PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt a plaintext password for storage (`NvrCredential.encrypted_password`).
pub fn encrypt_password(secret_key: &str, plaintext: &str) -> String {
    if plaintext.is_empty() {
        return String::new();
    }

    let key_bytes = derive_key(secret_key);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);

    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .expect("AES-GCM encryption of a bounded payload cannot fail");

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    BASE64.encode(out)
}

/// Decrypt a stored password. Understands the legacy `b64:`-prefixed
/// plaintext-obfuscation format as a migration path, matching the
/// original service's fallback behavior.
pub fn decrypt_password(secret_key: &str, ciphertext: &str) -> Result<SecretPassword, CryptoError> {
    if ciphertext.is_empty() {
        return Ok(SecretPassword(String::new()));
    }

    if let Some(rest) = ciphertext.strip_prefix("b64:") {
        let bytes = BASE64.decode(rest).map_err(|_| CryptoError::Encoding)?;
        let plain = String::from_utf8(bytes).map_err(|_| CryptoError::Malformed)?;
        return Ok(SecretPassword(plain));
    }

    let raw = BASE64.decode(ciphertext).map_err(|_| CryptoError::Encoding)?;
    if raw.len() < SALT_LEN + NONCE_LEN {
        return Err(CryptoError::Malformed);
    }

    let (salt_and_nonce, encrypted) = raw.split_at(SALT_LEN + NONCE_LEN);
    let (_salt, nonce_bytes) = salt_and_nonce.split_at(SALT_LEN);

    let key_bytes = derive_key(secret_key);
    let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
    let cipher = Aes256Gcm::new(key);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| CryptoError::Decrypt)?;

    String::from_utf8(plaintext)
        .map(SecretPassword)
        .map_err(|_| CryptoError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let enc = encrypt_password("test-secret", "donbosco2024");
        let dec = decrypt_password("test-secret", &enc).unwrap();
        assert_eq!(dec.expose(), "donbosco2024");
    }

    #[test]
    fn wrong_key_fails() {
        let enc = encrypt_password("test-secret", "donbosco2024");
        let err = decrypt_password("other-secret", &enc).unwrap_err();
        assert!(matches!(err, CryptoError::Decrypt));
    }

    #[test]
    fn empty_password_round_trips_to_empty() {
        let enc = encrypt_password("test-secret", "");
        assert_eq!(enc, "");
        let dec = decrypt_password("test-secret", "").unwrap();
        assert_eq!(dec.expose(), "");
    }

    #[test]
    fn legacy_b64_prefix_is_understood() {
        let legacy = format!("b64:{}", BASE64.encode("legacy-pass"));
        let dec = decrypt_password("anything", &legacy).unwrap();
        assert_eq!(dec.expose(), "legacy-pass");
    }
}
