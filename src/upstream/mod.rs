//! Upstream inference API
//!
//! Two calls are needed from the upstream: a lightweight capability listing
//! used as a health probe and a balance / rate-limit query. Both take the
//! provider's decrypted credential.

pub mod client;

use async_trait::async_trait;

use crate::error::UpstreamError;

pub use client::{HttpUpstreamClient, UpstreamSettings, classify_status};

#[async_trait]
pub trait UpstreamApi: Send + Sync {
    /// Succeeds when the upstream accepts the credential
    async fn list_models(&self, credential: &str) -> Result<(), UpstreamError>;

    /// Raw balance payload; its shape varies between upstream versions
    async fn fetch_balance(&self, credential: &str) -> Result<serde_json::Value, UpstreamError>;
}
