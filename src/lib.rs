//! Inference Provider Registry
//!
//! Trust and lifecycle registry for third-party inference providers: signed
//! registration with anti-Sybil risk scoring, encrypted credential storage,
//! health and balance monitoring, a usage points ledger and random selection
//! of live providers for the request router.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint and background sweeps
//! ├── config.rs      - Configuration management
//! ├── error.rs       - Registry and upstream error types
//! ├── auth.rs        - Signature verification and admin policy
//! ├── crypto/        - Credential cipher and salted signal hashing
//! │   ├── cipher.rs      - AES-256-GCM with legacy CBC decryption
//! │   └── fingerprint.rs - IP / user-agent / credential hashes
//! ├── risk/          - Anti-Sybil scoring and cluster analysis
//! ├── registry/      - Provider store, registration, admin, selection
//! ├── health/        - Liveness probes and uptime
//! ├── balance/       - Upstream balance reconciliation
//! ├── points/        - Points records and append-only ledger
//! ├── upstream/      - Upstream inference API client
//! ├── api/           - HTTP endpoints and security middleware
//! └── database/      - PostgreSQL persistence
//! ```

pub mod api;
pub mod auth;
pub mod balance;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod health;
pub mod points;
pub mod registry;
pub mod risk;
pub mod upstream;

pub use config::RegistryConfig;
pub use crypto::{EncryptedSecret, SecretCipher, SignalHasher};
pub use database::pool::DatabasePool;
pub use error::{RegistryError, RegistryResult, UpstreamError};

pub use registry::{
    AdminService, Provider, ProviderRegistry, ProviderStatus, PublicProviderInfo,
    RegistrationRequest, RegistrationService, SelectionService,
};

pub use risk::{RiskAssessment, RiskEngine, RiskThresholds, VerificationStatus};

pub use health::{HealthCheckRecord, HealthMonitor, UptimeReport};

pub use balance::BalanceReconciler;

pub use points::{PointsCategory, PointsLedger, PointsPolicy, PointsTransaction, UsageEvent};

pub use upstream::{HttpUpstreamClient, UpstreamApi};
