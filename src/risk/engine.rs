//! Registration risk scoring
//!
//! Each rule looks at the already-registered population and adds a fixed
//! weight when a signal is shared more often than its trigger allows. The
//! sum is capped at [`MAX_RISK_SCORE`]. Adding providers to the population
//! can only fire more rules, so scores never drop as the registry grows.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::score::{
    MAX_RISK_SCORE, ProviderSignals, RiskAssessment, RiskReason, RiskThresholds,
};
use crate::crypto::{RegistrationSignals, SignalHasher};

#[derive(Clone)]
pub struct RiskEngine {
    hasher: SignalHasher,
    thresholds: RiskThresholds,
}

impl RiskEngine {
    pub fn new(hasher: SignalHasher, thresholds: RiskThresholds) -> Self {
        Self { hasher, thresholds }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn hasher(&self) -> &SignalHasher {
        &self.hasher
    }

    /// Score a registration attempt against the existing population
    pub fn assess(
        &self,
        credential: &str,
        existing: &[ProviderSignals],
        ip: Option<&str>,
        user_agent: Option<&str>,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let signals = self.hasher.signals(credential, ip, user_agent, now);
        let fingerprint = self.hasher.fingerprint(&signals);
        let (score, reasons) = self.score(&signals, &fingerprint, existing);

        debug!(
            score,
            rules = reasons.len(),
            population = existing.len(),
            "Registration risk assessed"
        );

        RiskAssessment {
            score,
            reasons,
            fingerprint,
            signals,
        }
    }

    /// Pure scoring over precomputed signals
    pub fn score(
        &self,
        signals: &RegistrationSignals,
        fingerprint: &str,
        existing: &[ProviderSignals],
    ) -> (u8, Vec<RiskReason>) {
        let t = &self.thresholds;
        let mut total: u32 = 0;
        let mut reasons = Vec::new();

        let matches = existing
            .iter()
            .filter(|p| p.fingerprint == fingerprint)
            .count();
        if matches >= 1 {
            total += t.fingerprint_match_points;
            reasons.push(RiskReason::FingerprintMatch { matches });
        }

        if let Some(ip_hash) = signals.ip_hash.as_deref() {
            let providers = existing
                .iter()
                .filter(|p| p.ip_hash.as_deref() == Some(ip_hash))
                .count();
            if providers > t.shared_ip_trigger {
                total += t.shared_ip_points;
                reasons.push(RiskReason::SharedIp { providers });
            }
        }

        if let Some(ua_hash) = signals.user_agent_hash.as_deref() {
            let providers = existing
                .iter()
                .filter(|p| p.user_agent_hash.as_deref() == Some(ua_hash))
                .count();
            if providers > t.shared_user_agent_trigger {
                total += t.shared_user_agent_points;
                reasons.push(RiskReason::SharedUserAgent { providers });
            }
        }

        let same_day = existing
            .iter()
            .filter(|p| p.registration_day == signals.registration_day)
            .count();
        if same_day > t.same_day_trigger {
            total += t.same_day_points;
            reasons.push(RiskReason::RegistrationBurst {
                providers: same_day,
            });
        }

        let score = total.min(u32::from(MAX_RISK_SCORE)) as u8;
        (score, reasons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::score::{VerificationPolicy, VerificationStatus};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn engine() -> RiskEngine {
        RiskEngine::new(
            SignalHasher::new("salt-for-tests-only"),
            RiskThresholds::default(),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    fn existing_from(
        engine: &RiskEngine,
        credential: &str,
        ip: Option<&str>,
        ua: Option<&str>,
        at: DateTime<Utc>,
    ) -> ProviderSignals {
        let a = engine.assess(credential, &[], ip, ua, at);
        ProviderSignals {
            provider_id: Uuid::new_v4(),
            owner_address: format!("0x{}", &a.fingerprint[..8]),
            fingerprint: a.fingerprint,
            ip_hash: a.signals.ip_hash,
            user_agent_hash: a.signals.user_agent_hash,
            registration_day: a.signals.registration_day,
            risk_score: a.score,
        }
    }

    #[test]
    fn test_empty_population_scores_zero() {
        let e = engine();
        let a = e.assess("sk-first-credential-000", &[], Some("1.1.1.1"), Some("ua"), now());
        assert_eq!(a.score, 0);
        assert!(a.reasons.is_empty());
        assert!(a.summary().is_none());
    }

    #[test]
    fn test_fingerprint_match_adds_fifty() {
        let e = engine();
        let prior = existing_from(&e, "sk-aaaa-1111111111", Some("1.1.1.1"), Some("ua"), now());
        let a = e.assess("sk-aaaa-2222222222", &[prior], Some("1.1.1.1"), Some("ua"), now());
        assert_eq!(a.score, 50);
        assert_eq!(a.reasons, vec![RiskReason::FingerprintMatch { matches: 1 }]);
    }

    #[test]
    fn test_shared_ip_needs_more_than_trigger() {
        let e = engine();
        let mut pop: Vec<_> = (0..2)
            .map(|i| {
                existing_from(&e, &format!("k{}xx-credential-000", i), Some("9.9.9.9"), None, now())
            })
            .collect();

        let a = e.assess("zzzz-credential-000", &pop, Some("9.9.9.9"), None, now());
        assert_eq!(a.score, 0);

        pop.push(existing_from(&e, "k9xx-credential-000", Some("9.9.9.9"), None, now()));
        let a = e.assess("zzzz-credential-000", &pop, Some("9.9.9.9"), None, now());
        assert_eq!(a.score, 30);
    }

    #[test]
    fn test_missing_signals_skip_rules() {
        let e = engine();
        let pop: Vec<_> = (0..5)
            .map(|i| existing_from(&e, &format!("k{}xx-credential-000", i), None, None, now()))
            .collect();
        let a = e.assess("zzzz-credential-000", &pop, None, None, now());
        assert!(a.reasons.is_empty());
    }

    #[test]
    fn test_score_is_capped() {
        let e = engine();
        let pop: Vec<_> = (0..8)
            .map(|_| existing_from(&e, "sk-same-credential", Some("1.1.1.1"), Some("bot/1"), now()))
            .collect();
        let a = e.assess("sk-same-credential", &pop, Some("1.1.1.1"), Some("bot/1"), now());
        // 50 + 30 + 20 + 25 = 125
        assert_eq!(a.score, MAX_RISK_SCORE);
        assert_eq!(a.reasons.len(), 4);
        assert_eq!(
            a.status(VerificationPolicy::Standard, e.thresholds()),
            VerificationStatus::Flagged
        );
    }

    #[test]
    fn test_score_monotonic_in_population() {
        let e = engine();
        let mut pop = Vec::new();
        let mut last = 0;
        for i in 0..10 {
            let a = e.assess("sk-candidate-000000", &pop, Some("2.2.2.2"), Some("ua/2"), now());
            assert!(a.score >= last, "score dropped at step {}", i);
            last = a.score;
            pop.push(existing_from(
                &e,
                &format!("p{:03}-credential-0", i),
                Some("2.2.2.2"),
                Some("ua/2"),
                now(),
            ));
        }
    }

    #[test]
    fn test_other_days_do_not_count_as_burst() {
        let e = engine();
        let yesterday = now() - chrono::Duration::days(1);
        let pop: Vec<_> = (0..7)
            .map(|i| existing_from(&e, &format!("k{}xx-credential-000", i), None, None, yesterday))
            .collect();
        let a = e.assess("zzzz-credential-000", &pop, None, None, now());
        assert_eq!(a.score, 0);
    }
}
