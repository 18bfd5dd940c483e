//! Risk score types, thresholds and verification policies
//!
//! Scores are additive over independent weak signals and capped at 100.
//! Governance thresholds turn a score into a verification status.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::crypto::RegistrationSignals;

pub const MAX_RISK_SCORE: u8 = 100;

/// Rule weights and cut-offs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Added when the composite fingerprint matches an existing provider
    pub fingerprint_match_points: u32,

    /// Added when more than `shared_ip_trigger` providers share the IP hash
    pub shared_ip_points: u32,
    pub shared_ip_trigger: usize,

    /// Added when more than `shared_user_agent_trigger` providers share the UA hash
    pub shared_user_agent_points: u32,
    pub shared_user_agent_trigger: usize,

    /// Added when more than `same_day_trigger` providers registered that UTC day
    pub same_day_points: u32,
    pub same_day_trigger: usize,

    /// Score at or above which a registration is flagged
    pub flag_threshold: u32,

    /// Score at or above which a standard registration waits for review
    pub review_threshold: u32,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            fingerprint_match_points: 50,
            shared_ip_points: 30,
            shared_ip_trigger: 2,
            shared_user_agent_points: 20,
            shared_user_agent_trigger: 3,
            same_day_points: 25,
            same_day_trigger: 5,
            flag_threshold: 70,
            review_threshold: 40,
        }
    }
}

/// Why a registration scored what it did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RiskReason {
    FingerprintMatch { matches: usize },
    SharedIp { providers: usize },
    SharedUserAgent { providers: usize },
    RegistrationBurst { providers: usize },
}

impl fmt::Display for RiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskReason::FingerprintMatch { matches } => {
                write!(f, "fingerprint matches {} existing provider(s)", matches)
            }
            RiskReason::SharedIp { providers } => {
                write!(f, "{} providers share this IP", providers)
            }
            RiskReason::SharedUserAgent { providers } => {
                write!(f, "{} providers share this user agent", providers)
            }
            RiskReason::RegistrationBurst { providers } => {
                write!(f, "{} providers registered on the same day", providers)
            }
        }
    }
}

/// Outcome of scoring one registration attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: u8,
    pub reasons: Vec<RiskReason>,
    pub fingerprint: String,
    pub signals: RegistrationSignals,
}

impl RiskAssessment {
    pub fn status(
        &self,
        policy: VerificationPolicy,
        thresholds: &RiskThresholds,
    ) -> VerificationStatus {
        policy.status_for(self.score, thresholds)
    }

    /// Human-readable summary stored as the flagged reason
    pub fn summary(&self) -> Option<String> {
        if self.reasons.is_empty() {
            return None;
        }
        Some(
            self.reasons
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Signals of an already-registered provider, as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSignals {
    pub provider_id: Uuid,
    pub owner_address: String,
    pub fingerprint: String,
    pub ip_hash: Option<String>,
    pub user_agent_hash: Option<String>,
    pub registration_day: NaiveDate,
    pub risk_score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Flagged,
    Suspended,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Verified => "verified",
            VerificationStatus::Flagged => "flagged",
            VerificationStatus::Suspended => "suspended",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "verified" => Ok(VerificationStatus::Verified),
            "flagged" => Ok(VerificationStatus::Flagged),
            "suspended" => Ok(VerificationStatus::Suspended),
            other => Err(format!("unknown verification status: {}", other)),
        }
    }
}

/// Score-to-status rule for a registration path
///
/// The balance-verified path proved the credential works upstream, so it
/// never parks a registration in review: only flagging applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationPolicy {
    Standard,
    BalanceVerified,
}

impl VerificationPolicy {
    pub fn status_for(&self, score: u8, thresholds: &RiskThresholds) -> VerificationStatus {
        let score = u32::from(score);
        match self {
            VerificationPolicy::Standard => {
                if score >= thresholds.flag_threshold {
                    VerificationStatus::Flagged
                } else if score >= thresholds.review_threshold {
                    VerificationStatus::Pending
                } else {
                    VerificationStatus::Verified
                }
            }
            VerificationPolicy::BalanceVerified => {
                if score >= thresholds.flag_threshold {
                    VerificationStatus::Flagged
                } else {
                    VerificationStatus::Verified
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_policy_bands() {
        let t = RiskThresholds::default();
        let policy = VerificationPolicy::Standard;
        assert_eq!(policy.status_for(0, &t), VerificationStatus::Verified);
        assert_eq!(policy.status_for(39, &t), VerificationStatus::Verified);
        assert_eq!(policy.status_for(40, &t), VerificationStatus::Pending);
        assert_eq!(policy.status_for(69, &t), VerificationStatus::Pending);
        assert_eq!(policy.status_for(70, &t), VerificationStatus::Flagged);
        assert_eq!(policy.status_for(100, &t), VerificationStatus::Flagged);
    }

    #[test]
    fn test_balance_verified_policy_is_lenient() {
        let t = RiskThresholds::default();
        let policy = VerificationPolicy::BalanceVerified;
        assert_eq!(policy.status_for(55, &t), VerificationStatus::Verified);
        assert_eq!(policy.status_for(70, &t), VerificationStatus::Flagged);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            VerificationStatus::Pending,
            VerificationStatus::Verified,
            VerificationStatus::Flagged,
            VerificationStatus::Suspended,
        ] {
            assert_eq!(status.as_str().parse::<VerificationStatus>(), Ok(status));
        }
        assert!("banned".parse::<VerificationStatus>().is_err());
    }
}
