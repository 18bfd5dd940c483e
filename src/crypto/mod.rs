//! Cryptographic utilities for the provider registry
//!
//! Provides:
//! - Versioned credential encryption (AES-256-GCM, legacy AES-256-CBC read path)
//! - Salted one-way hashing of registration signals
//! - Composite registration fingerprints

pub mod cipher;
pub mod fingerprint;

pub use cipher::{CipherKey, CipherVersion, EncryptedSecret, SecretCipher};
pub use fingerprint::{RegistrationSignals, SignalHasher, credential_pattern};
