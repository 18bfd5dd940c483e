//! Sybil risk assessment
//!
//! Scores registrations from anonymized signals and reports clusters of
//! providers that share them.

pub mod clustering;
pub mod engine;
pub mod score;

pub use clustering::{ClusterKind, SignalCluster, SuspiciousProvider, find_clusters, suspicious};
pub use engine::RiskEngine;
pub use score::{
    MAX_RISK_SCORE, ProviderSignals, RiskAssessment, RiskReason, RiskThresholds,
    VerificationPolicy, VerificationStatus,
};
