//! Credential encryption at rest
//!
//! Stored credentials carry a version tag. `AesGcm` is the only scheme used
//! for new writes. `LegacyCbc` records are still readable but never written.
//! Records without any tag predate encryption and hold base64 or plain text.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::CryptoConfig;
use crate::error::{RegistryError, RegistryResult};

const GCM_NONCE_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const CBC_IV_LEN: usize = 16;

type LegacyDecryptor = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CipherVersion {
    /// AES-256-CBC, decrypt only
    LegacyCbc,
    /// AES-256-GCM
    AesGcm,
}

impl CipherVersion {
    pub fn as_tag(&self) -> &'static str {
        match self {
            CipherVersion::LegacyCbc => "v1",
            CipherVersion::AesGcm => "v2",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "v1" => Some(CipherVersion::LegacyCbc),
            "v2" => Some(CipherVersion::AesGcm),
            _ => None,
        }
    }
}

/// Sealed credential as stored on a provider record
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// Hex ciphertext, or the raw legacy value when `version` is `None`
    pub ciphertext: String,
    /// Hex nonce / IV
    pub iv: String,
    /// Hex authentication tag (empty for schemes without one)
    pub auth_tag: String,
    pub version: Option<CipherVersion>,
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("ciphertext", &"<redacted>")
            .field("version", &self.version)
            .finish()
    }
}

impl EncryptedSecret {
    /// Wrap a value written before encryption was introduced
    pub fn unversioned(raw: impl Into<String>) -> Self {
        Self {
            ciphertext: raw.into(),
            iv: String::new(),
            auth_tag: String::new(),
            version: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

/// 256-bit key
#[derive(Clone)]
pub struct CipherKey([u8; 32]);

impl CipherKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Accepts 64 hex characters, otherwise derives the key from a passphrase
    pub fn from_config_value(value: &str) -> RegistryResult<Self> {
        let value = value.trim();
        if value.len() == 64
            && let Ok(bytes) = hex::decode(value)
        {
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            return Ok(Self(key));
        }

        if value.len() < 32 {
            return Err(RegistryError::validation(
                "encryption key must be 64 hex characters or a passphrase of at least 32 characters",
            ));
        }

        let mut hasher = Sha256::new();
        hasher.update(value.as_bytes());
        Ok(Self(hasher.finalize().into()))
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

pub struct SecretCipher {
    current: CipherKey,
    retired: CipherKey,
}

impl SecretCipher {
    /// `retired` defaults to the current key when the old scheme shared it
    pub fn new(current: CipherKey, retired: Option<CipherKey>) -> Self {
        let retired = retired.unwrap_or_else(|| current.clone());
        Self { current, retired }
    }

    pub fn from_config(config: &CryptoConfig) -> RegistryResult<Self> {
        let current = CipherKey::from_config_value(&config.encryption_key)?;
        let retired = config
            .legacy_encryption_key
            .as_deref()
            .map(CipherKey::from_config_value)
            .transpose()?;
        Ok(Self::new(current, retired))
    }

    /// Seal a secret under the current scheme
    pub fn encrypt(&self, secret: &str) -> RegistryResult<EncryptedSecret> {
        let cipher = Aes256Gcm::new_from_slice(self.current.as_bytes())
            .map_err(|_| RegistryError::validation("invalid encryption key length"))?;

        let mut nonce = [0u8; GCM_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), secret.as_bytes())
            .map_err(|_| RegistryError::Decryption("encryption failed".to_string()))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);

        Ok(EncryptedSecret {
            ciphertext: hex::encode(sealed),
            iv: hex::encode(nonce),
            auth_tag: hex::encode(tag),
            version: Some(CipherVersion::AesGcm),
        })
    }

    /// Open a stored secret, dispatching on its version tag
    pub fn decrypt(&self, sealed: &EncryptedSecret) -> RegistryResult<String> {
        match sealed.version {
            Some(CipherVersion::AesGcm) => self.decrypt_gcm(sealed),
            Some(CipherVersion::LegacyCbc) => self.decrypt_legacy_cbc(sealed),
            None => decode_unversioned(&sealed.ciphertext),
        }
    }

    fn decrypt_gcm(&self, sealed: &EncryptedSecret) -> RegistryResult<String> {
        let mut payload = decode_hex_field("ciphertext", &sealed.ciphertext)?;
        let nonce = decode_hex_field("iv", &sealed.iv)?;
        let tag = decode_hex_field("auth tag", &sealed.auth_tag)?;

        if nonce.len() != GCM_NONCE_LEN {
            return Err(RegistryError::Decryption(format!(
                "iv must be {} bytes, got {}",
                GCM_NONCE_LEN,
                nonce.len()
            )));
        }
        if tag.len() != GCM_TAG_LEN {
            return Err(RegistryError::Decryption(format!(
                "auth tag must be {} bytes, got {}",
                GCM_TAG_LEN,
                tag.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(self.current.as_bytes())
            .map_err(|_| RegistryError::Decryption("invalid key length".to_string()))?;

        payload.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), payload.as_ref())
            .map_err(|_| RegistryError::Decryption("authentication tag mismatch".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| RegistryError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    fn decrypt_legacy_cbc(&self, sealed: &EncryptedSecret) -> RegistryResult<String> {
        let payload = decode_hex_field("ciphertext", &sealed.ciphertext)?;
        let iv = decode_hex_field("iv", &sealed.iv)?;

        if iv.len() != CBC_IV_LEN {
            return Err(RegistryError::Decryption(format!(
                "legacy iv must be {} bytes, got {}",
                CBC_IV_LEN,
                iv.len()
            )));
        }

        let decryptor = LegacyDecryptor::new_from_slices(self.retired.as_bytes(), &iv)
            .map_err(|_| RegistryError::Decryption("invalid legacy key or iv".to_string()))?;

        let plaintext = decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(&payload)
            .map_err(|_| RegistryError::Decryption("legacy padding check failed".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| RegistryError::Decryption("plaintext is not valid UTF-8".to_string()))
    }
}

fn decode_hex_field(name: &str, value: &str) -> RegistryResult<Vec<u8>> {
    if value.is_empty() {
        return Err(RegistryError::Decryption(format!("{} is missing", name)));
    }
    hex::decode(value).map_err(|_| RegistryError::Decryption(format!("{} is not valid hex", name)))
}

fn is_printable(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_graphic())
}

/// Best-effort read of a pre-encryption value: base64 first, then raw text
fn decode_unversioned(raw: &str) -> RegistryResult<String> {
    let raw = raw.trim();

    if let Ok(bytes) = BASE64.decode(raw)
        && let Ok(decoded) = String::from_utf8(bytes)
        && is_printable(&decoded)
    {
        return Ok(decoded);
    }

    if is_printable(raw) {
        return Ok(raw.to_string());
    }

    Err(RegistryError::Decryption(
        "unversioned secret is neither base64 nor printable text".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbc::cipher::BlockEncryptMut;

    fn test_cipher() -> SecretCipher {
        SecretCipher::new(CipherKey::from_bytes([7u8; 32]), None)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        for secret in ["sk-live-0123456789abcdef", "x", "unicode-ключ-🔑"] {
            let sealed = cipher.encrypt(secret).unwrap();
            assert_eq!(sealed.version, Some(CipherVersion::AesGcm));
            assert_eq!(cipher.decrypt(&sealed).unwrap(), secret);
        }
    }

    #[test]
    fn test_fresh_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same-secret-value").unwrap();
        let b = cipher.encrypt("same-secret-value").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();
        let mut sealed = cipher.encrypt("sk-live-0123456789abcdef").unwrap();

        let mut bytes = hex::decode(&sealed.ciphertext).unwrap();
        bytes[0] ^= 0xFF;
        sealed.ciphertext = hex::encode(bytes);

        assert!(matches!(
            cipher.decrypt(&sealed),
            Err(RegistryError::Decryption(_))
        ));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let cipher = test_cipher();
        let mut sealed = cipher.encrypt("sk-live-0123456789abcdef").unwrap();

        let mut tag = hex::decode(&sealed.auth_tag).unwrap();
        tag[15] ^= 0x01;
        sealed.auth_tag = hex::encode(tag);

        assert!(matches!(
            cipher.decrypt(&sealed),
            Err(RegistryError::Decryption(_))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = test_cipher().encrypt("sk-live-0123456789abcdef").unwrap();
        let other = SecretCipher::new(CipherKey::from_bytes([9u8; 32]), None);
        assert!(other.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_malformed_fields_fail() {
        let cipher = test_cipher();
        let mut sealed = cipher.encrypt("sk-live-0123456789abcdef").unwrap();
        sealed.iv = "not-hex".to_string();
        assert!(matches!(
            cipher.decrypt(&sealed),
            Err(RegistryError::Decryption(_))
        ));

        let mut sealed = cipher.encrypt("sk-live-0123456789abcdef").unwrap();
        sealed.auth_tag = String::new();
        assert!(cipher.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_legacy_cbc_decrypts() {
        let key = [3u8; 32];
        let iv = [5u8; 16];
        let encryptor = cbc::Encryptor::<aes::Aes256>::new_from_slices(&key, &iv).unwrap();
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(b"legacy-credential-42");

        let sealed = EncryptedSecret {
            ciphertext: hex::encode(ciphertext),
            iv: hex::encode(iv),
            auth_tag: String::new(),
            version: Some(CipherVersion::LegacyCbc),
        };

        let cipher = SecretCipher::new(
            CipherKey::from_bytes([7u8; 32]),
            Some(CipherKey::from_bytes(key)),
        );
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "legacy-credential-42");
    }

    #[test]
    fn test_unversioned_fallbacks() {
        let cipher = test_cipher();

        let encoded = BASE64.encode("legacy-plain-credential");
        assert_eq!(
            cipher.decrypt(&EncryptedSecret::unversioned(encoded)).unwrap(),
            "legacy-plain-credential"
        );

        assert_eq!(
            cipher
                .decrypt(&EncryptedSecret::unversioned("sk_raw-value_123"))
                .unwrap(),
            "sk_raw-value_123"
        );

        assert!(cipher.decrypt(&EncryptedSecret::unversioned("")).is_err());
    }

    #[test]
    fn test_key_parsing() {
        assert!(CipherKey::from_config_value(&"ab".repeat(32)).is_ok());
        assert!(CipherKey::from_config_value("a passphrase that is long enough!!").is_ok());
        assert!(CipherKey::from_config_value("too-short").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let sealed = test_cipher().encrypt("sk-live-0123456789abcdef").unwrap();
        let rendered = format!("{:?}", sealed);
        assert!(!rendered.contains(&sealed.ciphertext));
    }

    #[test]
    fn test_version_tags() {
        for version in [CipherVersion::LegacyCbc, CipherVersion::AesGcm] {
            assert_eq!(CipherVersion::from_tag(version.as_tag()), Some(version));
        }
        assert_eq!(CipherVersion::from_tag("v9"), None);
    }
}
