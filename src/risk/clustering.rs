//! Sybil cluster reporting for governance review

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::score::{ProviderSignals, RiskThresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterKind {
    Fingerprint,
    IpAddress,
    UserAgent,
}

/// Providers sharing one anonymized signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalCluster {
    pub kind: ClusterKind,
    /// Hashed signal value; never a raw IP or user agent
    pub key: String,
    pub provider_ids: Vec<Uuid>,
    pub owners: Vec<String>,
}

impl SignalCluster {
    pub fn size(&self) -> usize {
        self.provider_ids.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousProvider {
    pub provider_id: Uuid,
    pub owner_address: String,
    pub risk_score: u8,
}

fn group_by<'a, F>(
    population: &'a [ProviderSignals],
    kind: ClusterKind,
    min_size: usize,
    key_of: F,
) -> Vec<SignalCluster>
where
    F: Fn(&'a ProviderSignals) -> Option<&'a str>,
{
    let mut groups: HashMap<&str, Vec<&ProviderSignals>> = HashMap::new();
    for p in population {
        if let Some(key) = key_of(p) {
            groups.entry(key).or_default().push(p);
        }
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= min_size)
        .map(|(key, members)| {
            let mut owners: Vec<String> =
                members.iter().map(|m| m.owner_address.clone()).collect();
            owners.sort();
            owners.dedup();
            SignalCluster {
                kind,
                key: key.to_string(),
                provider_ids: members.iter().map(|m| m.provider_id).collect(),
                owners,
            }
        })
        .collect()
}

/// Clusters whose size exceeds the matching scoring trigger
///
/// Fingerprint clusters need two members; IP and user agent clusters need
/// more members than their rule trigger. Largest clusters first.
pub fn find_clusters(
    population: &[ProviderSignals],
    thresholds: &RiskThresholds,
) -> Vec<SignalCluster> {
    let mut clusters = group_by(population, ClusterKind::Fingerprint, 2, |p| {
        Some(p.fingerprint.as_str())
    });
    clusters.extend(group_by(
        population,
        ClusterKind::IpAddress,
        thresholds.shared_ip_trigger + 1,
        |p| p.ip_hash.as_deref(),
    ));
    clusters.extend(group_by(
        population,
        ClusterKind::UserAgent,
        thresholds.shared_user_agent_trigger + 1,
        |p| p.user_agent_hash.as_deref(),
    ));

    clusters.sort_by(|a, b| b.size().cmp(&a.size()).then_with(|| a.key.cmp(&b.key)));
    clusters
}

/// Providers at or above `min_score`, riskiest first
pub fn suspicious(population: &[ProviderSignals], min_score: u8) -> Vec<SuspiciousProvider> {
    let mut out: Vec<SuspiciousProvider> = population
        .iter()
        .filter(|p| p.risk_score >= min_score)
        .map(|p| SuspiciousProvider {
            provider_id: p.provider_id,
            owner_address: p.owner_address.clone(),
            risk_score: p.risk_score,
        })
        .collect();
    out.sort_by(|a, b| b.risk_score.cmp(&a.risk_score));
    out
}
