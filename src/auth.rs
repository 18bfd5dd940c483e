//! Caller identity capabilities
//!
//! Owner and admin identities are Ed25519 public keys written as hex. The
//! registry only consumes a yes/no answer from these traits, so a wallet
//! verifier can replace [`Ed25519Verifier`] without touching core logic.

use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};

/// Signatures dated this far ahead of our clock are still accepted
pub const MAX_CLOCK_SKEW_SECS: i64 = 60;

pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &str, signature: &str, claimed_signer: &str) -> bool;
}

/// Verifies hex Ed25519 signatures against a hex public-key address
#[derive(Debug, Clone, Default)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    fn decode_key(address: &str) -> Option<VerifyingKey> {
        let hex_key = address.trim().trim_start_matches("0x");
        let bytes: [u8; 32] = hex::decode(hex_key).ok()?.try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }

    fn decode_signature(signature: &str) -> Option<Signature> {
        let hex_sig = signature.trim().trim_start_matches("0x");
        let bytes: [u8; 64] = hex::decode(hex_sig).ok()?.try_into().ok()?;
        Some(Signature::from_bytes(&bytes))
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(&self, message: &str, signature: &str, claimed_signer: &str) -> bool {
        let (Some(key), Some(sig)) = (
            Self::decode_key(claimed_signer),
            Self::decode_signature(signature),
        ) else {
            debug!("Malformed signer or signature");
            return false;
        };
        key.verify(message.as_bytes(), &sig).is_ok()
    }
}

/// Message an owner signs to register a provider
pub fn registration_message(owner: &str, name: &str, timestamp: i64) -> String {
    format!("register:{}:{}:{}", owner, name, timestamp)
}

/// Message an admin signs to authenticate one request
///
/// Covers the method and path, so a signature is valid for one route only.
pub fn admin_message(method: &str, path: &str, address: &str, timestamp: i64) -> String {
    format!(
        "admin:{}:{}:{}:{}",
        method.to_uppercase(),
        path,
        address,
        timestamp
    )
}

/// Reject stale or far-future signed timestamps
pub fn check_freshness(timestamp: i64, now: DateTime<Utc>, max_age_secs: i64) -> RegistryResult<()> {
    let age = now
        .timestamp()
        .checked_sub(timestamp)
        .ok_or_else(|| RegistryError::validation("invalid timestamp"))?;
    if age > max_age_secs {
        return Err(RegistryError::validation(format!(
            "signature expired ({}s old, max {}s)",
            age, max_age_secs
        )));
    }
    if age < -MAX_CLOCK_SKEW_SECS {
        return Err(RegistryError::validation("signature timestamp is in the future"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    ForceActivate,
    Suspend,
    Flag,
    Remove,
    ViewAnalytics,
    RunJobs,
    /// Report served usage to the points ledger
    RecordUsage,
}

pub trait AdminPolicy: Send + Sync {
    fn is_authorized(&self, actor: &str, action: AdminAction) -> bool;
}

/// Grants every admin action to a configured set of addresses
#[derive(Debug, Clone, Default)]
pub struct AllowListPolicy {
    addresses: HashSet<String>,
}

impl AllowListPolicy {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            addresses: addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl AdminPolicy for AllowListPolicy {
    fn is_authorized(&self, actor: &str, _action: AdminAction) -> bool {
        self.addresses.contains(&actor.trim().to_lowercase())
    }
}
