//! Governance overrides
//!
//! Every action is checked against the injected [`AdminPolicy`], logged at
//! warn level and recorded as a zero-point ledger entry carrying the actor,
//! reason and bypass flag.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use super::provider::Provider;
use super::store::{ChangeSet, ProviderRegistry};
use crate::auth::{AdminAction, AdminPolicy};
use crate::error::{RegistryError, RegistryResult, UpstreamError};
use crate::points::{PointsTransaction, TransactionKind};
use crate::risk::{
    RiskThresholds, SignalCluster, SuspiciousProvider, VerificationStatus, find_clusters,
    suspicious,
};
use crate::upstream::UpstreamApi;

pub struct AdminService {
    registry: Arc<ProviderRegistry>,
    upstream: Arc<dyn UpstreamApi>,
    policy: Arc<dyn AdminPolicy>,
    thresholds: RiskThresholds,
    min_credential_length: usize,
    probe_timeout_secs: u64,
}

impl AdminService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        upstream: Arc<dyn UpstreamApi>,
        policy: Arc<dyn AdminPolicy>,
        thresholds: RiskThresholds,
        min_credential_length: usize,
        probe_timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            upstream,
            policy,
            thresholds,
            min_credential_length,
            probe_timeout_secs,
        }
    }

    pub fn authorize(&self, actor: &str, action: AdminAction) -> RegistryResult<()> {
        if self.policy.is_authorized(actor, action) {
            Ok(())
        } else {
            warn!(actor = %actor, action = ?action, "Admin action denied");
            Err(RegistryError::Unauthorized(format!(
                "{} may not perform {:?}",
                actor, action
            )))
        }
    }

    /// Apply a mutation and its audit entry as one unit
    async fn override_provider<F>(
        &self,
        actor: &str,
        id: Uuid,
        action: AdminAction,
        details: serde_json::Value,
        mutate: F,
    ) -> RegistryResult<Provider>
    where
        F: FnOnce(&mut Provider),
    {
        let now = Utc::now();
        let mut state = self.registry.write().await;
        let mut provider = state.provider(id)?.clone();
        let was_active = provider.is_active;
        mutate(&mut provider);

        let entry = PointsTransaction::marker(
            TransactionKind::AdminOverride,
            provider.owner_address.clone(),
            id,
            was_active,
            json!({ "action": action, "actor": actor, "details": details }),
            now,
        );
        let updated = provider.clone();
        self.registry
            .commit(
                &mut state,
                ChangeSet::provider(provider).with_transaction(entry),
            )
            .await?;

        warn!(
            actor = %actor,
            provider_id = %id,
            action = ?action,
            details = %details,
            "Admin override applied"
        );
        Ok(updated)
    }

    /// Force a provider live
    ///
    /// The stored credential must decrypt and meet the minimum length even
    /// with `bypass_validation`. Without it a live upstream probe must pass.
    pub async fn force_activate(
        &self,
        actor: &str,
        id: Uuid,
        bypass_validation: bool,
        reason: &str,
    ) -> RegistryResult<Provider> {
        self.authorize(actor, AdminAction::ForceActivate)?;

        let provider = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(format!("provider {}", id)))?;
        if provider.encrypted_credential.is_empty() {
            return Err(RegistryError::validation("provider has no stored credential"));
        }
        let credential = self.registry.decrypt_credential(&provider)?;
        if credential.trim().len() < self.min_credential_length {
            return Err(RegistryError::validation(format!(
                "stored credential is shorter than {} characters",
                self.min_credential_length
            )));
        }

        if !bypass_validation {
            let limit = Duration::from_secs(self.probe_timeout_secs);
            tokio::time::timeout(limit, self.upstream.list_models(&credential))
                .await
                .map_err(|_| UpstreamError::Timeout(self.probe_timeout_secs))??;
        }

        self.override_provider(
            actor,
            id,
            AdminAction::ForceActivate,
            json!({ "reason": reason, "bypass_validation": bypass_validation }),
            |p| {
                p.verification_status = VerificationStatus::Verified;
                p.flagged_reason = None;
                p.activate();
            },
        )
        .await
    }

    pub async fn suspend(&self, actor: &str, id: Uuid, reason: &str) -> RegistryResult<Provider> {
        self.authorize(actor, AdminAction::Suspend)?;
        let reason_text = reason.to_string();
        self.override_provider(
            actor,
            id,
            AdminAction::Suspend,
            json!({ "reason": reason }),
            |p| {
                p.verification_status = VerificationStatus::Suspended;
                p.flagged_reason = Some(reason_text);
                p.deactivate(Utc::now());
            },
        )
        .await
    }

    /// Send a provider back to review
    pub async fn flag(&self, actor: &str, id: Uuid, reason: &str) -> RegistryResult<Provider> {
        self.authorize(actor, AdminAction::Flag)?;
        let reason_text = reason.to_string();
        self.override_provider(
            actor,
            id,
            AdminAction::Flag,
            json!({ "reason": reason }),
            |p| {
                p.verification_status = VerificationStatus::Flagged;
                p.flagged_reason = Some(reason_text);
                p.status = super::provider::ProviderStatus::Pending;
                p.is_active = false;
            },
        )
        .await
    }

    pub async fn remove(&self, actor: &str, id: Uuid, reason: &str) -> RegistryResult<Provider> {
        self.authorize(actor, AdminAction::Remove)?;
        let removed = self
            .registry
            .remove(
                id,
                json!({ "action": AdminAction::Remove, "actor": actor, "reason": reason }),
            )
            .await?;
        warn!(actor = %actor, provider_id = %id, reason = %reason, "Provider removed by admin");
        Ok(removed)
    }

    /// Providers sharing fingerprints, IP hashes or user agent hashes
    pub async fn cluster_report(&self, actor: &str) -> RegistryResult<Vec<SignalCluster>> {
        self.authorize(actor, AdminAction::ViewAnalytics)?;
        let population = self.registry.signals().await;
        Ok(find_clusters(&population, &self.thresholds))
    }

    pub async fn suspicious(
        &self,
        actor: &str,
        min_score: u8,
    ) -> RegistryResult<Vec<SuspiciousProvider>> {
        self.authorize(actor, AdminAction::ViewAnalytics)?;
        let population = self.registry.signals().await;
        Ok(suspicious(&population, min_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowListPolicy;
    use crate::crypto::EncryptedSecret;
    use crate::registry::store::test_support::{register, registry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ADMIN: &str = "0xadmin";

    /// Always healthy; counts probes
    #[derive(Default)]
    struct CountingUpstream {
        probes: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamApi for CountingUpstream {
        async fn list_models(&self, _credential: &str) -> Result<(), UpstreamError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn fetch_balance(&self, _credential: &str) -> Result<serde_json::Value, UpstreamError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn service(registry: Arc<ProviderRegistry>, upstream: Arc<CountingUpstream>) -> AdminService {
        AdminService::new(
            registry,
            upstream,
            Arc::new(AllowListPolicy::new([ADMIN])),
            RiskThresholds::default(),
            16,
            5,
        )
    }

    async fn override_entries(registry: &ProviderRegistry) -> usize {
        registry
            .read()
            .await
            .transactions
            .iter()
            .filter(|t| t.kind == TransactionKind::AdminOverride)
            .count()
    }

    #[tokio::test]
    async fn test_bypass_still_requires_credential_length() {
        let registry = Arc::new(registry());
        let upstream = Arc::new(CountingUpstream::default());
        let admin = service(registry.clone(), upstream.clone());

        // Below the 16 character minimum
        let id = register(&registry, "0xshort", "sk-short").await;
        admin.flag(ADMIN, id, "manual review").await.unwrap();
        let entries_before = override_entries(&registry).await;

        let err = admin
            .force_activate(ADMIN, id, true, "operator override")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));
        assert_eq!(override_entries(&registry).await, entries_before);
        assert_eq!(upstream.probes.load(Ordering::SeqCst), 0);
        assert!(!registry.get(id).await.unwrap().is_selectable());
    }

    #[tokio::test]
    async fn test_bypass_checks_legacy_plaintext_credential() {
        let registry = Arc::new(registry());
        let upstream = Arc::new(CountingUpstream::default());
        let admin = service(registry.clone(), upstream.clone());
        let id = register(&registry, "0xlegacy", "sk-live-0123456789abcdef").await;
        admin.flag(ADMIN, id, "manual review").await.unwrap();

        registry
            .write()
            .await
            .providers
            .get_mut(&id)
            .unwrap()
            .encrypted_credential = EncryptedSecret::unversioned("sk-short");
        let err = admin
            .force_activate(ADMIN, id, true, "operator override")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        registry
            .write()
            .await
            .providers
            .get_mut(&id)
            .unwrap()
            .encrypted_credential = EncryptedSecret::unversioned("");
        let err = admin
            .force_activate(ADMIN, id, true, "operator override")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Validation(_)));

        // Only the flag was recorded
        assert_eq!(override_entries(&registry).await, 1);
    }

    #[tokio::test]
    async fn test_bypass_skips_upstream_check_for_valid_credential() {
        let registry = Arc::new(registry());
        let upstream = Arc::new(CountingUpstream::default());
        let admin = service(registry.clone(), upstream.clone());
        let id = register(&registry, "0xvalid", "sk-live-0123456789abcdef").await;
        admin.flag(ADMIN, id, "manual review").await.unwrap();

        let provider = admin
            .force_activate(ADMIN, id, true, "operator override")
            .await
            .unwrap();
        assert!(provider.is_selectable());
        assert_eq!(upstream.probes.load(Ordering::SeqCst), 0);
        assert_eq!(override_entries(&registry).await, 2);
    }
}
