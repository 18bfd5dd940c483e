//! Health Monitor
//!
//! Probes providers against the upstream capability listing and drives the
//! Active/Inactive state machine:
//! - Active becomes Inactive once consecutive failures reach the threshold
//! - any success resets the failure counter and restores an Inactive
//!   provider to Active
//! - Pending and suspended providers are probed and logged but never change
//!   state here
//!
//! Cadence belongs to the caller. Nothing is retried inline.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::record::{HealthCheckRecord, UptimeReport};
use crate::config::HealthConfig;
use crate::error::{RegistryResult, UpstreamError};
use crate::registry::provider::{Provider, ProviderStatus};
use crate::registry::store::{ChangeSet, ProviderRegistry};
use crate::upstream::UpstreamApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Unchanged,
    Deactivated,
    Reactivated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub provider_id: Uuid,
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
    pub consecutive_failures: u32,
    pub transition: Transition,
}

/// Summary of one sweep over all providers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSweep {
    pub total: usize,
    pub healthy: usize,
    pub failed: usize,
    pub deactivated: usize,
    pub reactivated: usize,
    /// Probes that could not be recorded (provider vanished, storage error)
    pub errored: usize,
}

/// Apply one probe result to a provider
pub fn apply_probe(
    provider: &mut Provider,
    success: bool,
    failure_threshold: u32,
    at: DateTime<Utc>,
) -> Transition {
    provider.last_health_check = Some(at);

    if success {
        provider.consecutive_failures = 0;
        if provider.status == ProviderStatus::Inactive && !provider.is_suspended() {
            provider.activate();
            return Transition::Reactivated;
        }
        return Transition::Unchanged;
    }

    provider.consecutive_failures = provider.consecutive_failures.saturating_add(1);
    if provider.status == ProviderStatus::Active
        && provider.consecutive_failures >= failure_threshold
    {
        provider.deactivate(at);
        return Transition::Deactivated;
    }
    Transition::Unchanged
}

pub struct HealthMonitor {
    registry: Arc<ProviderRegistry>,
    upstream: Arc<dyn UpstreamApi>,
    config: HealthConfig,
    /// Serializes probes of the same provider across overlapping sweeps
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        upstream: Arc<dyn UpstreamApi>,
        config: HealthConfig,
    ) -> Self {
        Self {
            registry,
            upstream,
            config,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Probe one provider and record the outcome
    pub async fn check_provider(&self, id: Uuid) -> RegistryResult<ProbeOutcome> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let provider = {
            let state = self.registry.read().await;
            state.provider(id)?.clone()
        };

        let started = Instant::now();
        let result = match self.registry.decrypt_credential(&provider) {
            Ok(credential) => self.probe(&credential).await,
            Err(e) => Err(e.to_string()),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => self.record(id, true, elapsed_ms, None).await,
            Err(reason) => self.record(id, false, elapsed_ms, Some(reason)).await,
        }
    }

    async fn probe(&self, credential: &str) -> Result<(), String> {
        let limit = Duration::from_secs(self.config.probe_timeout_secs);
        match tokio::time::timeout(limit, self.upstream.list_models(credential)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(UpstreamError::Timeout(self.config.probe_timeout_secs).to_string()),
        }
    }

    /// Failure path without a probe, used when another job learns the
    /// credential was rejected
    pub async fn record_failure(&self, id: Uuid, reason: &str) -> RegistryResult<ProbeOutcome> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.record(id, false, 0, Some(reason.to_string())).await
    }

    async fn record(
        &self,
        id: Uuid,
        success: bool,
        response_time_ms: u64,
        error: Option<String>,
    ) -> RegistryResult<ProbeOutcome> {
        let now = Utc::now();
        let mut state = self.registry.write().await;
        let mut provider = state.provider(id)?.clone();

        let transition = apply_probe(&mut provider, success, self.config.failure_threshold, now);
        let consecutive_failures = provider.consecutive_failures;

        let check = match &error {
            None => HealthCheckRecord::success(id, response_time_ms, now),
            Some(reason) => HealthCheckRecord::failure(id, response_time_ms, reason.clone(), now),
        };
        self.registry
            .commit(
                &mut state,
                ChangeSet::provider(provider).with_health_check(check),
            )
            .await?;

        match transition {
            Transition::Deactivated => warn!(
                provider_id = %id,
                consecutive_failures,
                error = error.as_deref().unwrap_or(""),
                "Provider marked inactive"
            ),
            Transition::Reactivated => info!(provider_id = %id, "Provider reactivated"),
            Transition::Unchanged => debug!(
                provider_id = %id,
                success,
                consecutive_failures,
                "Health check recorded"
            ),
        }

        Ok(ProbeOutcome {
            provider_id: id,
            success,
            response_time_ms,
            error,
            consecutive_failures,
            transition,
        })
    }

    /// Probe every non-suspended provider with bounded concurrency
    pub async fn check_all(&self) -> HealthSweep {
        let ids: Vec<Uuid> = {
            let state = self.registry.read().await;
            state
                .providers
                .values()
                .filter(|p| !p.is_suspended())
                .map(|p| p.id)
                .collect()
        };

        let mut sweep = HealthSweep {
            total: ids.len(),
            ..Default::default()
        };

        let outcomes: Vec<(Uuid, RegistryResult<ProbeOutcome>)> = stream::iter(ids)
            .map(|id| async move { (id, self.check_provider(id).await) })
            .buffer_unordered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;

        for (id, outcome) in outcomes {
            match outcome {
                Ok(outcome) => {
                    if outcome.success {
                        sweep.healthy += 1;
                    } else {
                        sweep.failed += 1;
                    }
                    match outcome.transition {
                        Transition::Deactivated => sweep.deactivated += 1,
                        Transition::Reactivated => sweep.reactivated += 1,
                        Transition::Unchanged => {}
                    }
                }
                Err(e) => {
                    sweep.errored += 1;
                    warn!(provider_id = %id, error = %e, "Health check could not be recorded");
                }
            }
        }

        info!(
            total = sweep.total,
            healthy = sweep.healthy,
            failed = sweep.failed,
            deactivated = sweep.deactivated,
            reactivated = sweep.reactivated,
            "Health sweep complete"
        );
        sweep
    }

    /// Uptime over the trailing window; an empty window reports 0% of 0 checks
    pub async fn uptime(&self, id: Uuid, window: ChronoDuration) -> UptimeReport {
        let since = Utc::now() - window;
        let state = self.registry.read().await;
        UptimeReport::from_checks(id, window.num_hours(), since, &state.health_checks)
    }

    /// Latest recorded checks of one provider, newest first
    pub async fn recent_checks(&self, id: Uuid, limit: usize) -> Vec<HealthCheckRecord> {
        let state = self.registry.read().await;
        state
            .health_checks
            .iter()
            .rev()
            .filter(|c| c.provider_id == id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop in-memory history older than `older_than`
    pub async fn prune_history(&self, older_than: DateTime<Utc>) -> usize {
        let mut state = self.registry.write().await;
        let before = state.health_checks.len();
        state.health_checks.retain(|c| c.timestamp >= older_than);
        let pruned = before - state.health_checks.len();
        if pruned > 0 {
            debug!(pruned, "Health history pruned");
        }

        let live: Vec<Uuid> = state.providers.keys().copied().collect();
        self.locks.retain(|id, _| live.contains(id));
        pruned
    }
}
