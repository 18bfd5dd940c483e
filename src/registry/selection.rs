//! Provider selection for the inference router

use rand::seq::SliceRandom;
use std::sync::Arc;

use super::provider::{Provider, PublicProviderInfo};
use super::store::ProviderRegistry;

/// Uniform random pick over active providers
pub struct SelectionService {
    registry: Arc<ProviderRegistry>,
}

impl SelectionService {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn select_random_active(&self) -> Option<Provider> {
        let active = self.registry.list_active().await;
        active.choose(&mut rand::thread_rng()).cloned()
    }

    pub async fn select_random_public(&self) -> Option<PublicProviderInfo> {
        self.select_random_active()
            .await
            .map(|p| p.public_info())
    }
}
