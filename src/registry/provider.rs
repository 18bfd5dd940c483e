//! Provider records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::crypto::EncryptedSecret;
use crate::risk::{ProviderSignals, VerificationStatus};

/// Lifecycle status driven by the health monitor and admin overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Active,
    Inactive,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Pending => "pending",
            ProviderStatus::Active => "active",
            ProviderStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProviderStatus::Pending),
            "active" => Ok(ProviderStatus::Active),
            "inactive" => Ok(ProviderStatus::Inactive),
            other => Err(format!("unknown provider status: {}", other)),
        }
    }
}

/// Display metadata supplied at registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Canonical provider record
///
/// Holds the encrypted credential and hashed signals, so it is never
/// serialized to external consumers. Use [`PublicProviderInfo`] for that.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: Uuid,
    /// Lowercased, trimmed owner address; one provider per owner
    pub owner_address: String,
    pub metadata: ProviderMetadata,

    pub encrypted_credential: EncryptedSecret,
    /// Salted hash of the trimmed plaintext credential; globally unique
    pub credential_fingerprint: String,

    pub registration_fingerprint: String,
    pub ip_hash: Option<String>,
    pub user_agent_hash: Option<String>,

    pub balance: f64,
    pub is_active: bool,
    pub status: ProviderStatus,
    pub consecutive_failures: u32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub marked_inactive_at: Option<DateTime<Utc>>,

    pub risk_score: u8,
    pub flagged_reason: Option<String>,
    pub verification_status: VerificationStatus,

    pub registered_at: DateTime<Utc>,
    pub total_prompts: u64,
    /// Exponential moving average of reported response times
    pub avg_response_time_ms: f64,
}

impl Provider {
    pub fn is_suspended(&self) -> bool {
        self.verification_status == VerificationStatus::Suspended
    }

    /// Eligible for selection by the router
    pub fn is_selectable(&self) -> bool {
        self.is_active && self.status == ProviderStatus::Active && !self.is_suspended()
    }

    pub fn activate(&mut self) {
        self.status = ProviderStatus::Active;
        self.is_active = true;
        self.consecutive_failures = 0;
        self.marked_inactive_at = None;
    }

    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.status = ProviderStatus::Inactive;
        self.is_active = false;
        self.marked_inactive_at = Some(at);
    }

    pub fn signals(&self) -> ProviderSignals {
        ProviderSignals {
            provider_id: self.id,
            owner_address: self.owner_address.clone(),
            fingerprint: self.registration_fingerprint.clone(),
            ip_hash: self.ip_hash.clone(),
            user_agent_hash: self.user_agent_hash.clone(),
            registration_day: self.registered_at.date_naive(),
            risk_score: self.risk_score,
        }
    }

    pub fn public_info(&self) -> PublicProviderInfo {
        PublicProviderInfo {
            id: self.id,
            name: self.metadata.name.clone(),
            region: self.metadata.region.clone(),
            is_active: self.is_active,
            total_prompts: self.total_prompts,
            joined_at: self.registered_at,
        }
    }
}

/// Provider view safe for public consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProviderInfo {
    pub id: Uuid,
    pub name: String,
    pub region: Option<String>,
    pub is_active: bool,
    pub total_prompts: u64,
    pub joined_at: DateTime<Utc>,
}

/// Lifecycle status a new registration starts in
///
/// Only verified registrations go live immediately; anything else waits for
/// admin review.
pub fn admission_status(verification: VerificationStatus) -> ProviderStatus {
    match verification {
        VerificationStatus::Verified => ProviderStatus::Active,
        _ => ProviderStatus::Pending,
    }
}

/// Normalize an owner address for indexing
pub fn normalize_owner(address: &str) -> String {
    address.trim().to_lowercase()
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_info_hides_secrets() {
        let provider = fixtures::provider("0xABC");
        let json = serde_json::to_string(&provider.public_info()).unwrap();
        assert!(!json.contains("cred-"));
        assert!(!json.contains("fp-"));
        assert!(!json.contains("iphash"));
        assert!(json.contains("joinedAt"));
        assert!(json.contains("totalPrompts"));
    }

    #[test]
    fn test_deactivate_then_activate() {
        let mut provider = fixtures::provider("0xabc");
        provider.consecutive_failures = 2;
        provider.deactivate(Utc::now());
        assert!(!provider.is_selectable());
        assert!(provider.marked_inactive_at.is_some());

        provider.activate();
        assert!(provider.is_selectable());
        assert_eq!(provider.consecutive_failures, 0);
        assert!(provider.marked_inactive_at.is_none());
    }

    #[test]
    fn test_owner_normalization() {
        assert_eq!(normalize_owner("  0xAbC  "), "0xabc");
    }
}
