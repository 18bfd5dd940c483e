//! Provider Store
//!
//! Canonical provider records plus everything that hangs off them: points
//! records, the ledger and the health log. All of it lives behind one
//! `RwLock` so that each atomic unit (registration, removal, award, probe,
//! override) is a single write-lock acquisition. When PostgreSQL is
//! enabled every unit is written through in one SQL transaction before the
//! in-memory state changes, so a storage failure leaves memory untouched.
//! With PostgreSQL the ledger and the health log are held in memory as a
//! recent window only; the database keeps the full history.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::provider::{
    Provider, ProviderMetadata, ProviderStatus, PublicProviderInfo, admission_status,
    normalize_owner,
};
use crate::crypto::{SecretCipher, SignalHasher};
use crate::database::pool::DatabasePool;
use crate::error::{RegistryError, RegistryResult};
use crate::health::HealthCheckRecord;
use crate::points::{PointsRecord, PointsTransaction, TransactionKind};
use crate::risk::{ProviderSignals, RiskAssessment, VerificationStatus};

/// Outcome of risk review that a registration is admitted with
#[derive(Debug, Clone)]
pub struct Admission {
    pub assessment: RiskAssessment,
    pub verification: VerificationStatus,
    pub initial_balance: f64,
}

impl Admission {
    pub fn new(assessment: RiskAssessment, verification: VerificationStatus) -> Self {
        Self {
            assessment,
            verification,
            initial_balance: 0.0,
        }
    }

    pub fn with_balance(mut self, balance: f64) -> Self {
        self.initial_balance = balance;
        self
    }
}

/// One atomic unit of change
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// Inserted or replaced provider row
    pub provider: Option<Provider>,
    pub removed_provider: Option<Uuid>,
    pub points_record: Option<PointsRecord>,
    pub transaction: Option<PointsTransaction>,
    pub health_check: Option<HealthCheckRecord>,
}

impl ChangeSet {
    pub fn provider(provider: Provider) -> Self {
        Self {
            provider: Some(provider),
            ..Default::default()
        }
    }

    pub fn with_points(mut self, record: PointsRecord) -> Self {
        self.points_record = Some(record);
        self
    }

    pub fn with_transaction(mut self, transaction: PointsTransaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_health_check(mut self, check: HealthCheckRecord) -> Self {
        self.health_check = Some(check);
        self
    }
}

/// In-memory registry contents
#[derive(Debug, Default)]
pub struct RegistryState {
    pub(crate) providers: HashMap<Uuid, Provider>,
    by_owner: HashMap<String, Uuid>,
    by_credential: HashMap<String, Uuid>,
    /// Keyed by provider id; outlives the provider
    pub(crate) points: HashMap<Uuid, PointsRecord>,
    /// Oldest first; a recent window when PostgreSQL is enabled
    pub(crate) transactions: Vec<PointsTransaction>,
    pub(crate) health_checks: Vec<HealthCheckRecord>,
}

impl RegistryState {
    pub fn provider(&self, id: Uuid) -> RegistryResult<&Provider> {
        self.providers
            .get(&id)
            .ok_or_else(|| RegistryError::NotFound(format!("provider {}", id)))
    }

    pub fn owner_taken(&self, owner: &str) -> bool {
        self.by_owner.contains_key(owner)
    }

    pub fn credential_taken(&self, credential_fingerprint: &str) -> bool {
        self.by_credential.contains_key(credential_fingerprint)
    }

    fn insert_provider(&mut self, provider: Provider) {
        self.by_owner
            .insert(provider.owner_address.clone(), provider.id);
        self.by_credential
            .insert(provider.credential_fingerprint.clone(), provider.id);
        self.providers.insert(provider.id, provider);
    }

    fn remove_provider(&mut self, id: Uuid) {
        if let Some(provider) = self.providers.remove(&id) {
            self.by_owner.remove(&provider.owner_address);
            self.by_credential.remove(&provider.credential_fingerprint);
        }
    }

    fn apply(&mut self, changes: ChangeSet) {
        if let Some(provider) = changes.provider {
            self.insert_provider(provider);
        }
        if let Some(record) = changes.points_record {
            self.points.insert(record.provider_id, record);
        }
        if let Some(id) = changes.removed_provider {
            self.remove_provider(id);
        }
        if let Some(txn) = changes.transaction {
            self.transactions.push(txn);
        }
        if let Some(check) = changes.health_check {
            self.health_checks.push(check);
        }
    }
}

pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
    db: Option<Arc<DatabasePool>>,
    cipher: SecretCipher,
    hasher: SignalHasher,
}

impl ProviderRegistry {
    pub fn new(cipher: SecretCipher, hasher: SignalHasher) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            db: None,
            cipher,
            hasher,
        }
    }

    pub fn with_database(mut self, db: Arc<DatabasePool>) -> Self {
        self.db = Some(db);
        self
    }

    pub fn hasher(&self) -> &SignalHasher {
        &self.hasher
    }

    pub(crate) fn database(&self) -> Option<&Arc<DatabasePool>> {
        self.db.as_ref()
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().await
    }

    /// Persist a change set, then apply it in memory
    pub(crate) async fn commit(
        &self,
        state: &mut RegistryState,
        changes: ChangeSet,
    ) -> RegistryResult<()> {
        if let Some(db) = &self.db {
            db.apply_change_set(&changes)
                .await
                .map_err(RegistryError::Persistence)?;
        }
        state.apply(changes);
        Ok(())
    }

    /// Hydrate memory from PostgreSQL; health checks older than
    /// `health_since` and ledger entries older than `ledger_since` stay in
    /// the database only
    pub async fn load_from_database(
        &self,
        health_since: DateTime<Utc>,
        ledger_since: DateTime<Utc>,
    ) -> RegistryResult<usize> {
        let Some(db) = &self.db else {
            return Ok(0);
        };

        let providers = db
            .providers()
            .load_all()
            .await
            .map_err(RegistryError::Persistence)?;
        let records = db
            .points()
            .load_records()
            .await
            .map_err(RegistryError::Persistence)?;
        let transactions = db
            .points()
            .load_transactions_since(ledger_since)
            .await
            .map_err(RegistryError::Persistence)?;
        let checks = db
            .health()
            .load_since(health_since)
            .await
            .map_err(RegistryError::Persistence)?;

        let mut state = self.state.write().await;
        *state = RegistryState::default();
        let count = providers.len();
        for provider in providers {
            state.insert_provider(provider);
        }
        for record in records {
            state.points.insert(record.provider_id, record);
        }
        state.transactions = transactions;
        state.health_checks = checks;

        info!(
            providers = count,
            points_records = state.points.len(),
            transactions = state.transactions.len(),
            "Registry loaded from database"
        );
        Ok(count)
    }

    /// Create a provider and its zeroed points record as one unit
    pub async fn register(
        &self,
        owner_address: &str,
        credential: &str,
        metadata: ProviderMetadata,
        admission: Admission,
    ) -> RegistryResult<Uuid> {
        self.register_reviewed(owner_address, credential, metadata, |_| admission)
            .await
            .map(|(id, _)| id)
    }

    /// Like [`register`](Self::register), but `review` scores the candidate
    /// against the population while the write lock is held, so concurrent
    /// registrations always see each other
    pub async fn register_reviewed<F>(
        &self,
        owner_address: &str,
        credential: &str,
        metadata: ProviderMetadata,
        review: F,
    ) -> RegistryResult<(Uuid, Admission)>
    where
        F: FnOnce(&[ProviderSignals]) -> Admission,
    {
        let owner = normalize_owner(owner_address);
        let credential = credential.trim();
        if owner.is_empty() {
            return Err(RegistryError::validation("owner address is required"));
        }
        if credential.is_empty() {
            return Err(RegistryError::validation("credential is required"));
        }

        let credential_fingerprint = self.hasher.credential_fingerprint(credential);
        let encrypted_credential = self.cipher.encrypt(credential)?;
        let now = Utc::now();

        let mut state = self.state.write().await;
        if state.owner_taken(&owner) {
            warn!(owner = %owner, "Registration rejected: owner already registered");
            return Err(RegistryError::DuplicateOwner(owner));
        }
        if state.credential_taken(&credential_fingerprint) {
            warn!(owner = %owner, "Registration rejected: credential already registered");
            return Err(RegistryError::DuplicateCredential);
        }

        let population: Vec<ProviderSignals> =
            state.providers.values().map(Provider::signals).collect();
        let admission = review(&population);
        let reviewed = admission.clone();
        let Admission {
            assessment,
            verification,
            initial_balance,
        } = admission;
        let status = admission_status(verification);
        let is_active = status == ProviderStatus::Active;
        let flagged_reason = match verification {
            VerificationStatus::Verified => None,
            _ => assessment.summary(),
        };

        let provider = Provider {
            id: Uuid::new_v4(),
            owner_address: owner.clone(),
            metadata,
            encrypted_credential,
            credential_fingerprint,
            registration_fingerprint: assessment.fingerprint,
            ip_hash: assessment.signals.ip_hash,
            user_agent_hash: assessment.signals.user_agent_hash,
            balance: initial_balance,
            is_active,
            status,
            consecutive_failures: 0,
            last_health_check: None,
            marked_inactive_at: None,
            risk_score: assessment.score,
            flagged_reason,
            verification_status: verification,
            registered_at: now,
            total_prompts: 0,
            avg_response_time_ms: 0.0,
        };
        let id = provider.id;
        let record = PointsRecord::new(id, owner.clone(), now);

        self.commit(&mut state, ChangeSet::provider(provider).with_points(record))
            .await?;

        info!(
            provider_id = %id,
            owner = %owner,
            risk_score = assessment.score,
            verification = verification.as_str(),
            status = %status,
            "Provider registered"
        );
        Ok((id, reviewed))
    }

    /// Soft removal: the points record survives with `is_provider_active`
    /// cleared and a zero-point removal entry is appended to the ledger
    pub async fn remove(&self, id: Uuid, details: serde_json::Value) -> RegistryResult<Provider> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let provider = state.provider(id)?.clone();

        let mut record = state
            .points
            .get(&id)
            .cloned()
            .unwrap_or_else(|| PointsRecord::new(id, provider.owner_address.clone(), now));
        record.is_provider_active = false;

        let marker = PointsTransaction::marker(
            TransactionKind::ProviderRemoved,
            provider.owner_address.clone(),
            id,
            provider.is_active,
            details,
            now,
        );

        let changes = ChangeSet {
            removed_provider: Some(id),
            points_record: Some(record),
            transaction: Some(marker),
            ..Default::default()
        };
        self.commit(&mut state, changes).await?;

        info!(provider_id = %id, owner = %provider.owner_address, "Provider removed");
        Ok(provider)
    }

    /// Drop ledger entries older than `older_than` from memory
    ///
    /// Without PostgreSQL memory is the only copy of the ledger, so nothing
    /// is dropped.
    pub async fn prune_transactions(&self, older_than: DateTime<Utc>) -> usize {
        if self.db.is_none() {
            return 0;
        }
        let mut state = self.state.write().await;
        let before = state.transactions.len();
        state.transactions.retain(|t| t.timestamp >= older_than);
        let pruned = before - state.transactions.len();
        if pruned > 0 {
            debug!(pruned, "Ledger window pruned");
        }
        pruned
    }

    pub async fn get(&self, id: Uuid) -> Option<Provider> {
        self.state.read().await.providers.get(&id).cloned()
    }

    pub async fn get_by_owner(&self, owner_address: &str) -> Option<Provider> {
        let owner = normalize_owner(owner_address);
        let state = self.state.read().await;
        state
            .by_owner
            .get(&owner)
            .and_then(|id| state.providers.get(id))
            .cloned()
    }

    /// Providers eligible for routing
    pub async fn list_active(&self) -> Vec<Provider> {
        let state = self.state.read().await;
        let mut active: Vec<Provider> = state
            .providers
            .values()
            .filter(|p| p.is_selectable())
            .cloned()
            .collect();
        active.sort_by_key(|p| p.registered_at);
        active
    }

    pub async fn list_all(&self) -> Vec<Provider> {
        let state = self.state.read().await;
        let mut all: Vec<Provider> = state.providers.values().cloned().collect();
        all.sort_by_key(|p| p.registered_at);
        all
    }

    pub async fn provider_count(&self) -> usize {
        self.state.read().await.providers.len()
    }

    /// Anonymized signals of every registered provider
    pub async fn signals(&self) -> Vec<ProviderSignals> {
        let state = self.state.read().await;
        state.providers.values().map(Provider::signals).collect()
    }

    pub async fn public_info(&self, id: Uuid) -> Option<PublicProviderInfo> {
        let state = self.state.read().await;
        state.providers.get(&id).map(Provider::public_info)
    }

    pub async fn public_directory(&self) -> Vec<PublicProviderInfo> {
        let mut all: Vec<PublicProviderInfo> = {
            let state = self.state.read().await;
            state.providers.values().map(Provider::public_info).collect()
        };
        all.sort_by_key(|p| p.joined_at);
        all
    }

    /// Plaintext credential for an upstream call; never log the result
    pub fn decrypt_credential(&self, provider: &Provider) -> RegistryResult<String> {
        let secret = self.cipher.decrypt(&provider.encrypted_credential)?;
        debug!(provider_id = %provider.id, "Credential decrypted");
        Ok(secret)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::crypto::CipherKey;
    use crate::risk::{RiskEngine, RiskThresholds};

    pub fn registry() -> ProviderRegistry {
        ProviderRegistry::new(
            SecretCipher::new(CipherKey::from_bytes([7u8; 32]), None),
            SignalHasher::new("registry-test-salt"),
        )
    }

    pub fn admission(
        registry: &ProviderRegistry,
        credential: &str,
        verification: VerificationStatus,
    ) -> Admission {
        let engine = RiskEngine::new(registry.hasher().clone(), RiskThresholds::default());
        let assessment = engine.assess(credential, &[], Some("10.1.1.1"), Some("test/1"), Utc::now());
        Admission::new(assessment, verification)
    }

    pub fn metadata(name: &str) -> ProviderMetadata {
        ProviderMetadata {
            name: name.to_string(),
            description: None,
            region: Some("us-east".to_string()),
        }
    }

    pub async fn register(registry: &ProviderRegistry, owner: &str, credential: &str) -> Uuid {
        let admission = admission(registry, credential, VerificationStatus::Verified);
        registry
            .register(owner, credential, metadata("node"), admission)
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_register_creates_provider_and_points_record() {
        let registry = registry();
        let id = register(&registry, "0xOwnerA", "sk-live-aaaaaaaaaaaaaaaa").await;

        let provider = registry.get(id).await.unwrap();
        assert_eq!(provider.owner_address, "0xownera");
        assert_eq!(provider.status, ProviderStatus::Active);
        assert!(provider.is_active);
        assert_eq!(
            registry.decrypt_credential(&provider).unwrap(),
            "sk-live-aaaaaaaaaaaaaaaa"
        );

        let state = registry.read().await;
        let record = state.points.get(&id).unwrap();
        assert_eq!(record.total_points, 0);
        assert!(record.is_provider_active);
    }

    #[tokio::test]
    async fn test_duplicate_owner_rejected() {
        let registry = registry();
        register(&registry, "0xowner", "sk-live-aaaaaaaaaaaaaaaa").await;

        let admission = admission(&registry, "sk-live-bbbbbbbbbbbbbbbb", VerificationStatus::Verified);
        let err = registry
            .register("0xOWNER ", "sk-live-bbbbbbbbbbbbbbbb", metadata("dup"), admission)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOwner(_)));
    }

    #[tokio::test]
    async fn test_duplicate_credential_leaves_store_unchanged() {
        let registry = registry();
        register(&registry, "0xfirst", "sk-live-aaaaaaaaaaaaaaaa").await;

        let admission = admission(&registry, "sk-live-aaaaaaaaaaaaaaaa", VerificationStatus::Verified);
        let err = registry
            .register("0xsecond", "  sk-live-aaaaaaaaaaaaaaaa\n", metadata("dup"), admission)
            .await
            .unwrap_err();
        assert!(err.is_duplicate());

        let state = registry.read().await;
        assert_eq!(state.providers.len(), 1);
        assert_eq!(state.points.len(), 1);
        assert!(state.transactions.is_empty());
        assert!(!state.owner_taken("0xsecond"));
    }

    #[tokio::test]
    async fn test_ledger_kept_whole_without_database() {
        let registry = registry();
        let id = register(&registry, "0xkeeper", "sk-live-eeeeeeeeeeeeeeee").await;
        registry.remove(id, serde_json::Value::Null).await.unwrap();

        let pruned = registry
            .prune_transactions(Utc::now() + chrono::Duration::days(1))
            .await;
        assert_eq!(pruned, 0);
        assert_eq!(registry.read().await.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_pending_registration_is_inactive() {
        let registry = registry();
        let admission = admission(&registry, "sk-live-cccccccccccccccc", VerificationStatus::Pending);
        let id = registry
            .register("0xpending", "sk-live-cccccccccccccccc", metadata("p"), admission)
            .await
            .unwrap();

        let provider = registry.get(id).await.unwrap();
        assert_eq!(provider.status, ProviderStatus::Pending);
        assert!(!provider.is_active);
        assert!(registry.list_active().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_keeps_points_record() {
        let registry = registry();
        let id = register(&registry, "0xgone", "sk-live-dddddddddddddddd").await;

        let removed = registry
            .remove(id, serde_json::json!({ "reason": "test" }))
            .await
            .unwrap();
        assert_eq!(removed.id, id);
        assert!(registry.get(id).await.is_none());
        assert!(registry.get_by_owner("0xgone").await.is_none());

        let state = registry.read().await;
        let record = state.points.get(&id).unwrap();
        assert!(!record.is_provider_active);
        assert_eq!(state.transactions.len(), 1);
        assert_eq!(state.transactions[0].kind, TransactionKind::ProviderRemoved);
        assert_eq!(state.transactions[0].points_earned, 0);
        assert!(state.transactions[0].was_provider_active_at_time);
    }

    #[tokio::test]
    async fn test_owner_can_reregister_after_removal() {
        let registry = registry();
        let id = register(&registry, "0xback", "sk-live-eeeeeeeeeeeeeeee").await;
        registry.remove(id, serde_json::Value::Null).await.unwrap();

        let again = register(&registry, "0xback", "sk-live-eeeeeeeeeeeeeeee").await;
        assert_ne!(id, again);
        assert_eq!(registry.read().await.points.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_not_found() {
        let registry = registry();
        let err = registry
            .remove(Uuid::new_v4(), serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_public_directory() {
        let registry = registry();
        let id = register(&registry, "0xpub", "sk-live-ffffffffffffffff").await;
        let info = registry.public_info(id).await.unwrap();
        assert_eq!(info.name, "node");
        assert_eq!(registry.public_directory().await.len(), 1);
    }
}
