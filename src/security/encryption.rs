//! AES-256-GCM encryption of selected metadata fields.
//!
//! Encrypted values are strings of the form `enc:v1:<hex(nonce || ciphertext)>`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::Sha256;

use super::SecurityError;
use crate::config::EncryptionConfig;

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const ENCRYPTED_PREFIX: &str = "enc:v1:";

const KDF_SALT: &[u8] = b"gg-telemetry-field-encryption";
const KDF_ROUNDS: u32 = 100_000;

pub struct FieldEncryptor {
    cipher: Aes256Gcm,
    fields: Vec<String>,
}

impl FieldEncryptor {
    /// Build from a hex key, or derive one from a password with PBKDF2.
    pub fn new(config: &EncryptionConfig) -> Result<Self, SecurityError> {
        let key = match (&config.key_hex, &config.password) {
            (Some(key_hex), _) => parse_key(key_hex)?,
            (None, Some(password)) => derive_key(password),
            (None, None) => {
                return Err(SecurityError::InvalidKey(
                    "encryption enabled without keyHex or password".into(),
                ))
            }
        };
        Self::from_key(&key, config.fields.clone())
    }

    pub fn from_key(key: &[u8; KEY_SIZE], fields: Vec<String>) -> Result<Self, SecurityError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| SecurityError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher, fields })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, SecurityError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| SecurityError::Encryption(e.to_string()))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{ENCRYPTED_PREFIX}{}", hex::encode(payload)))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, SecurityError> {
        let payload = encoded
            .strip_prefix(ENCRYPTED_PREFIX)
            .ok_or_else(|| SecurityError::Encryption("missing encryption prefix".into()))?;
        let bytes = hex::decode(payload).map_err(|e| SecurityError::Encryption(e.to_string()))?;
        if bytes.len() < NONCE_SIZE {
            return Err(SecurityError::Encryption("ciphertext too short".into()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SecurityError::Encryption("authentication failed".into()))?;
        String::from_utf8(plaintext).map_err(|e| SecurityError::Encryption(e.to_string()))
    }

    /// Encrypt the configured top-level fields of `map` in place. Non-string
    /// values are encrypted as their JSON text; already encrypted values are
    /// left alone.
    pub fn encrypt_fields(&self, map: &mut Map<String, Value>) -> Result<(), SecurityError> {
        for field in &self.fields {
            let Some(value) = map.get_mut(field) else {
                continue;
            };
            let plaintext = match &*value {
                Value::String(s) if s.starts_with(ENCRYPTED_PREFIX) => continue,
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            *value = Value::from(self.encrypt(&plaintext)?);
        }
        Ok(())
    }
}

fn parse_key(key_hex: &str) -> Result<[u8; KEY_SIZE], SecurityError> {
    let bytes = hex::decode(key_hex.trim()).map_err(|e| SecurityError::InvalidKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| SecurityError::InvalidKey(format!("expected {KEY_SIZE} bytes, got {}", b.len())))
}

fn derive_key(password: &str) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn encryptor() -> FieldEncryptor {
        FieldEncryptor::from_key(&[7u8; KEY_SIZE], vec!["prompt".into(), "usage".into()]).unwrap()
    }

    #[test]
    fn test_encrypt_then_decrypt() {
        let enc = encryptor();
        let sealed = enc.encrypt("secret prompt").unwrap();
        assert!(sealed.starts_with(ENCRYPTED_PREFIX));
        assert_eq!(enc.decrypt(&sealed).unwrap(), "secret prompt");
    }

    #[test]
    fn test_nonces_differ() {
        let enc = encryptor();
        assert_ne!(enc.encrypt("x").unwrap(), enc.encrypt("x").unwrap());
    }

    #[test]
    fn test_tampering_detected() {
        let enc = encryptor();
        let mut sealed = enc.encrypt("secret").unwrap();
        let last = sealed.pop().unwrap();
        sealed.push(if last == '0' { '1' } else { '0' });
        assert!(enc.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_encrypt_fields_only_touches_configured_keys() {
        let enc = encryptor();
        let mut map = json!({ "prompt": "hi", "usage": { "tokens": 3 }, "model": "m" })
            .as_object()
            .cloned()
            .unwrap();
        enc.encrypt_fields(&mut map).unwrap();

        assert_eq!(map["model"], "m");
        let usage = map["usage"].as_str().unwrap();
        assert_eq!(enc.decrypt(usage).unwrap(), r#"{"tokens":3}"#);
        let once = map["prompt"].clone();
        enc.encrypt_fields(&mut map).unwrap();
        assert_eq!(map["prompt"], once);
    }

    #[test]
    fn test_key_config_validation() {
        let bad = EncryptionConfig {
            enabled: true,
            key_hex: Some("abcd".into()),
            password: None,
            fields: Vec::new(),
        };
        assert!(matches!(FieldEncryptor::new(&bad), Err(SecurityError::InvalidKey(_))));

        let derived = EncryptionConfig {
            enabled: true,
            key_hex: None,
            password: Some("correct horse".into()),
            fields: Vec::new(),
        };
        assert!(FieldEncryptor::new(&derived).is_ok());
    }
}
