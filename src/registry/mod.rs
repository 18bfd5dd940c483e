//! Provider registry
//!
//! - `provider`     - provider records and their public view
//! - `store`        - canonical store, uniqueness and atomic units
//! - `registration` - validated, signed, risk-scored registration
//! - `admin`        - policy-gated governance overrides
//! - `selection`    - random active provider for the router

pub mod admin;
pub mod provider;
pub mod registration;
pub mod selection;
pub mod store;

pub use admin::AdminService;
pub use provider::{
    Provider, ProviderMetadata, ProviderStatus, PublicProviderInfo, admission_status,
    normalize_owner,
};
pub use registration::{
    ClientSignals, RegistrationReceipt, RegistrationRequest, RegistrationService,
};
pub use selection::SelectionService;
pub use store::{Admission, ChangeSet, ProviderRegistry, RegistryState};
