//! Anonymized registration signals
//!
//! IP addresses, user agents and credentials never leave this module in raw
//! form. Everything is reduced to a salted SHA-256 digest that can only be
//! compared for equality.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Coarse signals captured at registration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationSignals {
    pub user_agent_hash: Option<String>,
    pub ip_hash: Option<String>,
    /// UTC calendar day of the registration
    pub registration_day: NaiveDate,
    /// Shape of the credential (prefix + length bucket), never the credential
    pub credential_pattern: String,
}

/// Prefix + rounded length of a credential
pub fn credential_pattern(credential: &str) -> String {
    let trimmed = credential.trim();
    let prefix: String = trimmed.chars().take(4).collect();
    let bucket = trimmed.chars().count().div_ceil(8) * 8;
    format!("{}:{}", prefix, bucket)
}

#[derive(Clone)]
pub struct SignalHasher {
    salt: String,
}

impl SignalHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    fn salted(&self, domain: &str, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(domain.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.salt.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn hash_ip(&self, ip: &str) -> String {
        self.salted("ip", ip.trim())
    }

    pub fn hash_user_agent(&self, user_agent: &str) -> String {
        self.salted("ua", user_agent.trim())
    }

    /// Uniqueness key for a credential, computed from the trimmed plaintext
    pub fn credential_fingerprint(&self, credential: &str) -> String {
        self.salted("credential", credential.trim())
    }

    /// Collect the signals for a registration attempt
    pub fn signals(
        &self,
        credential: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
        at: DateTime<Utc>,
    ) -> RegistrationSignals {
        RegistrationSignals {
            user_agent_hash: user_agent
                .map(str::trim)
                .filter(|ua| !ua.is_empty())
                .map(|ua| self.hash_user_agent(ua)),
            ip_hash: ip
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
                .map(|ip| self.hash_ip(ip)),
            registration_day: at.date_naive(),
            credential_pattern: credential_pattern(credential),
        }
    }

    /// Composite token over all signals, deterministic and one-way
    pub fn fingerprint(&self, signals: &RegistrationSignals) -> String {
        let composite = format!(
            "{}|{}|{}|{}",
            signals.user_agent_hash.as_deref().unwrap_or("-"),
            signals.ip_hash.as_deref().unwrap_or("-"),
            signals.registration_day,
            signals.credential_pattern,
        );
        let digest = self.salted("fingerprint", &composite);
        digest[..32].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let hasher = SignalHasher::new("salt-for-tests-only");
        let a = hasher.signals("sk-abcdef1234567890", Some("10.0.0.1"), Some("curl/8"), at(1, 9));
        let b = hasher.signals("sk-abcdef1234567890", Some("10.0.0.1"), Some("curl/8"), at(1, 17));
        assert_eq!(hasher.fingerprint(&a), hasher.fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_changes_with_signals() {
        let hasher = SignalHasher::new("salt-for-tests-only");
        let base = hasher.signals("sk-abcdef1234567890", Some("10.0.0.1"), None, at(1, 9));
        let other_ip = hasher.signals("sk-abcdef1234567890", Some("10.0.0.2"), None, at(1, 9));
        let other_day = hasher.signals("sk-abcdef1234567890", Some("10.0.0.1"), None, at(2, 9));
        assert_ne!(hasher.fingerprint(&base), hasher.fingerprint(&other_ip));
        assert_ne!(hasher.fingerprint(&base), hasher.fingerprint(&other_day));
    }

    #[test]
    fn test_salt_changes_hashes() {
        let a = SignalHasher::new("salt-one-for-tests");
        let b = SignalHasher::new("salt-two-for-tests");
        assert_ne!(a.hash_ip("10.0.0.1"), b.hash_ip("10.0.0.1"));
    }

    #[test]
    fn test_hashes_do_not_contain_input() {
        let hasher = SignalHasher::new("salt-for-tests-only");
        let credential = "sk-abcdef1234567890";
        let fp = hasher.credential_fingerprint(credential);
        assert!(!fp.contains(credential));
        assert_eq!(fp.len(), 64);
    }

    #[test]
    fn test_credential_fingerprint_trims() {
        let hasher = SignalHasher::new("salt-for-tests-only");
        assert_eq!(
            hasher.credential_fingerprint("  sk-abcdef1234567890\n"),
            hasher.credential_fingerprint("sk-abcdef1234567890")
        );
    }

    #[test]
    fn test_blank_signals_are_absent() {
        let hasher = SignalHasher::new("salt-for-tests-only");
        let signals = hasher.signals("sk-abcdef1234567890", Some("  "), Some(""), at(1, 9));
        assert!(signals.ip_hash.is_none());
        assert!(signals.user_agent_hash.is_none());
    }

    #[test]
    fn test_credential_pattern() {
        assert_eq!(credential_pattern("sk-abcdef1234567890"), "sk-a:24");
        assert_eq!(credential_pattern("abcd"), "abcd:8");
    }
}
