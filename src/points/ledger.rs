//! Points Ledger
//!
//! Awards points for served usage, keeps per-category subtotals on the
//! provider's points record and appends one transaction per award. Owner
//! totals aggregate every record the owner ever had, including records of
//! removed providers.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::record::{CategoryTotals, PointsCategory, PointsRecord, PointsTransaction, TransactionKind};
use crate::error::{RegistryError, RegistryResult};
use crate::registry::provider::normalize_owner;
use crate::registry::store::{ChangeSet, ProviderRegistry};

/// Award rates and smoothing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsPolicy {
    pub units_per_point: u64,
    pub legacy_points_per_prompt: u64,
    /// Weight of the previous average in the response-time EMA
    pub ema_old_weight: f64,
}

impl Default for PointsPolicy {
    fn default() -> Self {
        Self {
            units_per_point: 100,
            legacy_points_per_prompt: 100,
            ema_old_weight: 0.9,
        }
    }
}

impl PointsPolicy {
    /// Unit-based award when the unit count is known, else the flat
    /// per-prompt rate
    pub fn points_for(&self, units_processed: Option<u64>, prompt_count: u64) -> u64 {
        match units_processed {
            Some(units) => units / self.units_per_point.max(1),
            None => prompt_count.saturating_mul(self.legacy_points_per_prompt),
        }
    }

    /// Next response-time average; the first sample seeds it
    pub fn smooth(&self, previous: f64, samples_seen: u64, sample: f64) -> f64 {
        if samples_seen == 0 || previous <= 0.0 {
            sample
        } else {
            previous * self.ema_old_weight + sample * (1.0 - self.ema_old_weight)
        }
    }
}

/// Usage served by a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub provider_id: Uuid,
    pub category: PointsCategory,
    /// Processed units (tokens); takes precedence over `prompt_count`
    #[serde(default)]
    pub units_processed: Option<u64>,
    #[serde(default = "default_prompt_count")]
    pub prompt_count: u64,
    #[serde(default)]
    pub response_time_ms: Option<f64>,
    #[serde(default)]
    pub details: serde_json::Value,
}

fn default_prompt_count() -> u64 {
    1
}

impl UsageEvent {
    pub fn units(provider_id: Uuid, category: PointsCategory, units: u64) -> Self {
        Self {
            provider_id,
            category,
            units_processed: Some(units),
            prompt_count: 1,
            response_time_ms: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn prompts(provider_id: Uuid, category: PointsCategory, prompts: u64) -> Self {
        Self {
            provider_id,
            category,
            units_processed: None,
            prompt_count: prompts,
            response_time_ms: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_response_time(mut self, ms: f64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwardOutcome {
    pub transaction_id: Uuid,
    pub points: u64,
    pub provider_total: u64,
}

/// Lifetime points of one owner across all of its providers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerTotals {
    pub owner_address: String,
    pub total_points: u64,
    pub by_category: CategoryTotals,
    pub providers: usize,
    pub active_providers: usize,
}

impl OwnerTotals {
    fn empty(owner: &str) -> Self {
        Self {
            owner_address: owner.to_string(),
            total_points: 0,
            by_category: CategoryTotals::default(),
            providers: 0,
            active_providers: 0,
        }
    }

    fn absorb(&mut self, record: &PointsRecord) {
        self.by_category.merge(&record.totals);
        self.total_points = self.by_category.sum();
        self.providers += 1;
        if record.is_provider_active {
            self.active_providers += 1;
        }
    }
}

pub struct PointsLedger {
    registry: Arc<ProviderRegistry>,
    policy: PointsPolicy,
}

impl PointsLedger {
    pub fn new(registry: Arc<ProviderRegistry>, policy: PointsPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &PointsPolicy {
        &self.policy
    }

    /// Credit one usage event
    ///
    /// Updates the provider counters, the points record and the ledger in one
    /// unit. Replaying the same event credits it twice.
    pub async fn award(&self, event: UsageEvent) -> RegistryResult<AwardOutcome> {
        if let Some(ms) = event.response_time_ms
            && (!ms.is_finite() || ms < 0.0)
        {
            return Err(RegistryError::validation("response time must be a non-negative number"));
        }

        let points = self
            .policy
            .points_for(event.units_processed, event.prompt_count);
        let now = Utc::now();

        let mut state = self.registry.write().await;
        let mut provider = state.provider(event.provider_id)?.clone();

        if let Some(sample) = event.response_time_ms {
            provider.avg_response_time_ms =
                self.policy
                    .smooth(provider.avg_response_time_ms, provider.total_prompts, sample);
        }
        provider.total_prompts = provider.total_prompts.saturating_add(event.prompt_count);

        let mut record = state
            .points
            .get(&provider.id)
            .cloned()
            .unwrap_or_else(|| PointsRecord::new(provider.id, provider.owner_address.clone(), now));
        record.credit(event.category, points, now);
        let provider_total = record.total_points;

        let transaction = PointsTransaction {
            id: Uuid::new_v4(),
            owner_address: provider.owner_address.clone(),
            provider_id: provider.id,
            points_earned: points,
            kind: TransactionKind::Award,
            category: Some(event.category),
            details: serde_json::json!({
                "units_processed": event.units_processed,
                "prompt_count": event.prompt_count,
                "response_time_ms": event.response_time_ms,
                "context": event.details,
            }),
            timestamp: now,
            was_provider_active_at_time: provider.is_active,
        };
        let transaction_id = transaction.id;

        let changes = ChangeSet::provider(provider)
            .with_points(record)
            .with_transaction(transaction);
        self.registry.commit(&mut state, changes).await?;

        debug!(
            provider_id = %event.provider_id,
            category = %event.category,
            points,
            "Points awarded"
        );

        Ok(AwardOutcome {
            transaction_id,
            points,
            provider_total,
        })
    }

    /// Lifetime totals of an owner, including removed providers
    pub async fn totals_by_owner(&self, owner_address: &str) -> OwnerTotals {
        let owner = normalize_owner(owner_address);
        let state = self.registry.read().await;
        let mut totals = OwnerTotals::empty(&owner);
        for record in state.points.values().filter(|r| r.owner_address == owner) {
            totals.absorb(record);
        }
        totals
    }

    /// Audit path: rebuild an owner's total from the ledger alone
    ///
    /// Sums in PostgreSQL when it is enabled, since memory only holds a
    /// recent window of the ledger there.
    pub async fn reconstruct_owner_total(&self, owner_address: &str) -> RegistryResult<u64> {
        let owner = normalize_owner(owner_address);
        if let Some(db) = self.registry.database() {
            return db
                .points()
                .owner_total(&owner)
                .await
                .map_err(RegistryError::Persistence);
        }

        let state = self.registry.read().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.owner_address == owner)
            .fold(0u64, |acc, t| acc.saturating_add(t.points_earned)))
    }

    /// Owners ranked by lifetime points
    pub async fn leaderboard(&self, limit: usize) -> Vec<OwnerTotals> {
        let state = self.registry.read().await;
        let mut by_owner: HashMap<&str, OwnerTotals> = HashMap::new();
        for record in state.points.values() {
            by_owner
                .entry(record.owner_address.as_str())
                .or_insert_with(|| OwnerTotals::empty(&record.owner_address))
                .absorb(record);
        }

        let mut board: Vec<OwnerTotals> = by_owner.into_values().collect();
        board.sort_by(|a, b| {
            b.total_points
                .cmp(&a.total_points)
                .then_with(|| a.owner_address.cmp(&b.owner_address))
        });
        board.truncate(limit);
        board
    }

    /// Most recent ledger entries of an owner, from the in-memory window
    pub async fn transactions_for_owner(
        &self,
        owner_address: &str,
        limit: usize,
    ) -> Vec<PointsTransaction> {
        let owner = normalize_owner(owner_address);
        let state = self.registry.read().await;
        state
            .transactions
            .iter()
            .rev()
            .filter(|t| t.owner_address == owner)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Check the ledger against the stored records for one owner
    pub async fn audit_owner(&self, owner_address: &str) -> RegistryResult<bool> {
        let stored = self.totals_by_owner(owner_address).await.total_points;
        let rebuilt = self.reconstruct_owner_total(owner_address).await?;
        if stored != rebuilt {
            info!(
                owner = %normalize_owner(owner_address),
                stored,
                rebuilt,
                "Points ledger mismatch"
            );
        }
        Ok(stored == rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store::test_support::{register, registry};

    fn ledger() -> (Arc<ProviderRegistry>, PointsLedger) {
        let registry = Arc::new(registry());
        let ledger = PointsLedger::new(registry.clone(), PointsPolicy::default());
        (registry, ledger)
    }

    #[test]
    fn test_points_for() {
        let policy = PointsPolicy::default();
        assert_eq!(policy.points_for(Some(250), 1), 2);
        assert_eq!(policy.points_for(Some(99), 1), 0);
        assert_eq!(policy.points_for(None, 3), 300);
        // known units win over the prompt count
        assert_eq!(policy.points_for(Some(1000), 7), 10);
    }

    #[test]
    fn test_ema_smoothing() {
        let policy = PointsPolicy::default();
        assert_eq!(policy.smooth(0.0, 0, 200.0), 200.0);
        let next = policy.smooth(200.0, 1, 100.0);
        assert!((next - 190.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_award_units_and_prompts() {
        let (registry, ledger) = ledger();
        let id = register(&registry, "0xearner", "sk-live-aaaaaaaaaaaaaaaa").await;

        let first = ledger
            .award(UsageEvent::units(id, PointsCategory::Service, 250))
            .await
            .unwrap();
        assert_eq!(first.points, 2);

        let second = ledger
            .award(UsageEvent::prompts(id, PointsCategory::Service, 3))
            .await
            .unwrap();
        assert_eq!(second.points, 300);
        assert_eq!(second.provider_total, 302);

        let provider = registry.get(id).await.unwrap();
        assert_eq!(provider.total_prompts, 4);

        let totals = ledger.totals_by_owner("0xEARNER").await;
        assert_eq!(totals.total_points, 302);
        assert_eq!(totals.by_category.service, 302);
        assert!(ledger.audit_owner("0xearner").await.unwrap());
    }

    #[tokio::test]
    async fn test_award_updates_response_ema() {
        let (registry, ledger) = ledger();
        let id = register(&registry, "0xfast", "sk-live-bbbbbbbbbbbbbbbb").await;

        ledger
            .award(UsageEvent::prompts(id, PointsCategory::AgentApi, 1).with_response_time(200.0))
            .await
            .unwrap();
        ledger
            .award(UsageEvent::prompts(id, PointsCategory::AgentApi, 1).with_response_time(100.0))
            .await
            .unwrap();

        let provider = registry.get(id).await.unwrap();
        assert!((provider.avg_response_time_ms - 190.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_award_unknown_provider() {
        let (_registry, ledger) = ledger();
        let err = ledger
            .award(UsageEvent::prompts(Uuid::new_v4(), PointsCategory::Service, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_removal_preserves_owner_totals() {
        let (registry, ledger) = ledger();
        let id = register(&registry, "0xleaver", "sk-live-cccccccccccccccc").await;
        ledger
            .award(UsageEvent::units(id, PointsCategory::DeveloperApi, 1_000))
            .await
            .unwrap();

        let before = ledger.totals_by_owner("0xleaver").await.total_points;
        registry.remove(id, serde_json::Value::Null).await.unwrap();
        let after = ledger.totals_by_owner("0xleaver").await;

        assert_eq!(before, 10);
        assert_eq!(after.total_points, before);
        assert_eq!(after.active_providers, 0);
        assert_eq!(
            ledger.reconstruct_owner_total("0xleaver").await.unwrap(),
            before
        );

        let history = ledger.transactions_for_owner("0xleaver", 10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, TransactionKind::ProviderRemoved);
    }

    #[tokio::test]
    async fn test_leaderboard_order() {
        let (registry, ledger) = ledger();
        let a = register(&registry, "0xa", "sk-live-dddddddddddddddd").await;
        let b = register(&registry, "0xb", "sk-live-eeeeeeeeeeeeeeee").await;
        ledger
            .award(UsageEvent::prompts(a, PointsCategory::Service, 1))
            .await
            .unwrap();
        ledger
            .award(UsageEvent::prompts(b, PointsCategory::Service, 2))
            .await
            .unwrap();

        let board = ledger.leaderboard(10).await;
        assert_eq!(board[0].owner_address, "0xb");
        assert_eq!(board[1].owner_address, "0xa");
        assert_eq!(ledger.leaderboard(1).await.len(), 1);
    }
}
