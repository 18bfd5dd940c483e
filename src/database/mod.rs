//! PostgreSQL Database Module
//!
//! Write-through persistence for providers, points records, the points
//! ledger and the health check log.

pub mod health;
pub mod points;
pub mod pool;
pub mod providers;

pub use health::HealthRepository;
pub use points::PointsRepository;
pub use pool::DatabasePool;
pub use providers::ProviderRepository;
