//! Balance Reconciler
//!
//! Polls the upstream balance for each provider and stores it when it moved
//! by more than the configured epsilon. A rejected credential is handed to
//! the health monitor's failure path; the stored balance is left alone.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::extract::extract_with_shape;
use crate::config::BalanceConfig;
use crate::error::{RegistryError, RegistryResult, UpstreamError};
use crate::health::HealthMonitor;
use crate::registry::store::{ChangeSet, ProviderRegistry};
use crate::upstream::UpstreamApi;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceUpdate {
    pub provider_id: Uuid,
    pub updated: bool,
    pub old_balance: f64,
    pub new_balance: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceSweep {
    pub total: usize,
    pub updated: usize,
    pub errored: usize,
}

/// Whether a balance change is large enough to store
pub fn exceeds_epsilon(old: f64, new: f64, epsilon: f64) -> bool {
    (new - old).abs() > epsilon
}

pub struct BalanceReconciler {
    registry: Arc<ProviderRegistry>,
    upstream: Arc<dyn UpstreamApi>,
    monitor: Arc<HealthMonitor>,
    config: BalanceConfig,
}

impl BalanceReconciler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        upstream: Arc<dyn UpstreamApi>,
        monitor: Arc<HealthMonitor>,
        config: BalanceConfig,
    ) -> Self {
        Self {
            registry,
            upstream,
            monitor,
            config,
        }
    }

    /// Query the upstream balance for a credential, bounded by the timeout
    pub async fn query_balance(&self, credential: &str) -> Result<f64, UpstreamError> {
        let limit = Duration::from_secs(self.config.request_timeout_secs);
        let payload = tokio::time::timeout(limit, self.upstream.fetch_balance(credential))
            .await
            .map_err(|_| UpstreamError::Timeout(self.config.request_timeout_secs))??;

        match extract_with_shape(&payload) {
            Some((shape, value)) => {
                debug!(shape, "Balance extracted");
                Ok(value)
            }
            None => {
                debug!("No known balance shape in upstream response");
                Ok(0.0)
            }
        }
    }

    pub async fn refresh_one(&self, id: Uuid) -> RegistryResult<BalanceUpdate> {
        let provider = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| RegistryError::NotFound(format!("provider {}", id)))?;
        let credential = self.registry.decrypt_credential(&provider)?;

        let new_balance = match self.query_balance(&credential).await {
            Ok(balance) => balance,
            Err(e) if e.is_invalid_credential() => {
                warn!(provider_id = %id, "Upstream rejected credential during balance refresh");
                self.monitor.record_failure(id, &e.to_string()).await?;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let mut state = self.registry.write().await;
        let mut current = state.provider(id)?.clone();
        let old_balance = current.balance;

        if !exceeds_epsilon(old_balance, new_balance, self.config.update_epsilon) {
            return Ok(BalanceUpdate {
                provider_id: id,
                updated: false,
                old_balance,
                new_balance,
            });
        }

        current.balance = new_balance;
        self.registry
            .commit(&mut state, ChangeSet::provider(current))
            .await?;

        info!(provider_id = %id, old_balance, new_balance, "Balance updated");
        Ok(BalanceUpdate {
            provider_id: id,
            updated: true,
            old_balance,
            new_balance,
        })
    }

    /// Refresh every non-suspended provider, one at a time
    pub async fn refresh_all(&self) -> BalanceSweep {
        let ids: Vec<Uuid> = self
            .registry
            .list_all()
            .await
            .into_iter()
            .filter(|p| !p.is_suspended())
            .map(|p| p.id)
            .collect();

        let mut sweep = BalanceSweep {
            total: ids.len(),
            ..Default::default()
        };

        for id in ids {
            match self.refresh_one(id).await {
                Ok(update) if update.updated => sweep.updated += 1,
                Ok(_) => {}
                Err(e) => {
                    sweep.errored += 1;
                    warn!(provider_id = %id, error = %e, "Balance refresh failed");
                }
            }
        }

        info!(
            total = sweep.total,
            updated = sweep.updated,
            errored = sweep.errored,
            "Balance sweep complete"
        );
        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsilon_hysteresis() {
        assert!(!exceeds_epsilon(10.0, 10.005, 0.01));
        assert!(!exceeds_epsilon(10.0, 9.995, 0.01));
        assert!(exceeds_epsilon(10.0, 10.02, 0.01));
        assert!(exceeds_epsilon(10.0, 9.98, 0.01));
    }
}
