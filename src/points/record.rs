//! Points records and the append-only transaction log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RegistryError;

/// Fixed reward categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointsCategory {
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "developer-api")]
    DeveloperApi,
    #[serde(rename = "agent-api")]
    AgentApi,
    #[serde(rename = "uptime-reward")]
    UptimeReward,
}

impl PointsCategory {
    pub const ALL: [PointsCategory; 4] = [
        PointsCategory::Service,
        PointsCategory::DeveloperApi,
        PointsCategory::AgentApi,
        PointsCategory::UptimeReward,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PointsCategory::Service => "service",
            PointsCategory::DeveloperApi => "developer-api",
            PointsCategory::AgentApi => "agent-api",
            PointsCategory::UptimeReward => "uptime-reward",
        }
    }
}

impl fmt::Display for PointsCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointsCategory {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PointsCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RegistryError::validation(format!("unknown points category: {}", s)))
    }
}

/// Per-category subtotals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotals {
    pub service: u64,
    pub developer_api: u64,
    pub agent_api: u64,
    pub uptime_reward: u64,
}

impl CategoryTotals {
    pub fn get(&self, category: PointsCategory) -> u64 {
        match category {
            PointsCategory::Service => self.service,
            PointsCategory::DeveloperApi => self.developer_api,
            PointsCategory::AgentApi => self.agent_api,
            PointsCategory::UptimeReward => self.uptime_reward,
        }
    }

    pub fn add(&mut self, category: PointsCategory, points: u64) {
        let slot = match category {
            PointsCategory::Service => &mut self.service,
            PointsCategory::DeveloperApi => &mut self.developer_api,
            PointsCategory::AgentApi => &mut self.agent_api,
            PointsCategory::UptimeReward => &mut self.uptime_reward,
        };
        *slot = slot.saturating_add(points);
    }

    pub fn merge(&mut self, other: &CategoryTotals) {
        for category in PointsCategory::ALL {
            self.add(category, other.get(category));
        }
    }

    pub fn sum(&self) -> u64 {
        PointsCategory::ALL
            .into_iter()
            .fold(0u64, |acc, c| acc.saturating_add(self.get(c)))
    }
}

/// Points accumulated by one provider lineage
///
/// Keyed by provider id and tagged with the owner address. Records are
/// never deleted: removing the provider only clears `is_provider_active`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsRecord {
    pub provider_id: Uuid,
    pub owner_address: String,
    pub totals: CategoryTotals,
    /// Always equal to `totals.sum()`
    pub total_points: u64,
    pub last_earned: Option<DateTime<Utc>>,
    pub is_provider_active: bool,
    pub created_at: DateTime<Utc>,
}

impl PointsRecord {
    pub fn new(provider_id: Uuid, owner_address: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            provider_id,
            owner_address: owner_address.into(),
            totals: CategoryTotals::default(),
            total_points: 0,
            last_earned: None,
            is_provider_active: true,
            created_at: now,
        }
    }

    pub fn credit(&mut self, category: PointsCategory, points: u64, at: DateTime<Utc>) {
        self.totals.add(category, points);
        self.total_points = self.totals.sum();
        self.last_earned = Some(at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Award,
    ProviderRemoved,
    AdminOverride,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Award => "award",
            TransactionKind::ProviderRemoved => "provider_removed",
            TransactionKind::AdminOverride => "admin_override",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "award" => Ok(TransactionKind::Award),
            "provider_removed" => Ok(TransactionKind::ProviderRemoved),
            "admin_override" => Ok(TransactionKind::AdminOverride),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

/// One immutable ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsTransaction {
    pub id: Uuid,
    pub owner_address: String,
    pub provider_id: Uuid,
    pub points_earned: u64,
    pub kind: TransactionKind,
    /// Present for awards only
    pub category: Option<PointsCategory>,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub was_provider_active_at_time: bool,
}

impl PointsTransaction {
    /// Zero-point entry recording a lifecycle event
    pub fn marker(
        kind: TransactionKind,
        owner_address: impl Into<String>,
        provider_id: Uuid,
        was_active: bool,
        details: serde_json::Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_address: owner_address.into(),
            provider_id,
            points_earned: 0,
            kind,
            category: None,
            details,
            timestamp: at,
            was_provider_active_at_time: was_active,
        }
    }
}
