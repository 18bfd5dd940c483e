//! HTTP client for the upstream inference API

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::UpstreamApi;
use crate::config::UpstreamConfig;
use crate::error::UpstreamError;

/// Transport settings for upstream calls
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub capability_path: String,
    pub balance_path: String,
    /// Require HTTPS for the upstream base URL
    pub require_https: bool,
    pub probe_timeout_secs: u64,
    pub balance_timeout_secs: u64,
    pub max_response_size: usize,
}

impl UpstreamSettings {
    pub fn from_config(
        upstream: &UpstreamConfig,
        require_https: bool,
        probe_timeout_secs: u64,
        balance_timeout_secs: u64,
    ) -> Self {
        Self {
            base_url: upstream.base_url.clone(),
            capability_path: upstream.capability_path.clone(),
            balance_path: upstream.balance_path.clone(),
            require_https,
            probe_timeout_secs,
            balance_timeout_secs,
            max_response_size: upstream.max_response_size,
        }
    }
}

#[derive(Clone)]
pub struct HttpUpstreamClient {
    client: Client,
    settings: UpstreamSettings,
    capability_url: Url,
    balance_url: Url,
}

impl HttpUpstreamClient {
    pub fn new(settings: UpstreamSettings) -> Result<Self, UpstreamError> {
        let base = Url::parse(&settings.base_url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{}: {}", settings.base_url, e)))?;

        if settings.require_https && base.scheme() != "https" {
            return Err(UpstreamError::InvalidUrl(format!(
                "HTTPS is required but URL uses {}",
                base.scheme()
            )));
        }
        if base.host_str().is_none() {
            return Err(UpstreamError::InvalidUrl("URL must have a host".to_string()));
        }

        let capability_url = base
            .join(&settings.capability_path)
            .map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;
        let balance_url = base
            .join(&settings.balance_path)
            .map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;

        let mut builder = Client::builder()
            .user_agent(concat!("inference-registry/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10));
        if settings.require_https {
            builder = builder.https_only(true);
            info!("HTTPS enforcement enabled for upstream calls");
        }
        let client = builder
            .build()
            .map_err(|e| UpstreamError::Network(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            capability_url,
            balance_url,
        })
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    async fn get(
        &self,
        url: &Url,
        credential: &str,
        timeout_secs: u64,
    ) -> Result<reqwest::Response, UpstreamError> {
        let response = self
            .client
            .get(url.as_str())
            .bearer_auth(credential)
            .header("Accept", "application/json")
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout(timeout_secs)
                } else {
                    UpstreamError::Network(e.without_url().to_string())
                }
            })?;

        classify_status(response.status())?;
        Ok(response)
    }
}

/// Map a non-success status to an error
pub fn classify_status(status: StatusCode) -> Result<(), UpstreamError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(UpstreamError::InvalidCredential(status.as_u16()))
        }
        other => Err(UpstreamError::Status {
            status: other.as_u16(),
            message: other.canonical_reason().unwrap_or("Unknown").to_string(),
        }),
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstreamClient {
    async fn list_models(&self, credential: &str) -> Result<(), UpstreamError> {
        let response = self
            .get(&self.capability_url, credential, self.settings.probe_timeout_secs)
            .await?;
        debug!(status = response.status().as_u16(), "Capability probe answered");
        Ok(())
    }

    async fn fetch_balance(&self, credential: &str) -> Result<serde_json::Value, UpstreamError> {
        let response = self
            .get(&self.balance_url, credential, self.settings.balance_timeout_secs)
            .await?;

        let content_length = response.content_length().unwrap_or(0);
        if content_length > self.settings.max_response_size as u64 {
            return Err(UpstreamError::InvalidResponse(format!(
                "response too large: {} bytes (max: {})",
                content_length, self.settings.max_response_size
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| UpstreamError::Network(e.without_url().to_string()))?;
        if body.len() > self.settings.max_response_size {
            return Err(UpstreamError::InvalidResponse(format!(
                "response body too large: {} bytes (max: {})",
                body.len(),
                self.settings.max_response_size
            )));
        }

        serde_json::from_slice(&body).map_err(|e| {
            warn!("Balance response was not JSON");
            UpstreamError::InvalidResponse(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base: &str) -> UpstreamSettings {
        UpstreamSettings {
            base_url: base.to_string(),
            capability_path: "/api/v1/models".to_string(),
            balance_path: "/api/v1/api_keys/rate_limits".to_string(),
            require_https: true,
            probe_timeout_secs: 30,
            balance_timeout_secs: 90,
            max_response_size: 1024,
        }
    }

    #[test]
    fn test_https_required() {
        assert!(HttpUpstreamClient::new(settings("https://api.example.com")).is_ok());
        assert!(matches!(
            HttpUpstreamClient::new(settings("http://api.example.com")),
            Err(UpstreamError::InvalidUrl(_))
        ));

        let mut plain = settings("http://localhost:9000");
        plain.require_https = false;
        assert!(HttpUpstreamClient::new(plain).is_ok());
    }

    #[test]
    fn test_endpoint_urls() {
        let client = HttpUpstreamClient::new(settings("https://api.example.com")).unwrap();
        assert_eq!(
            client.capability_url.as_str(),
            "https://api.example.com/api/v1/models"
        );
        assert_eq!(
            client.balance_url.as_str(),
            "https://api.example.com/api/v1/api_keys/rate_limits"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK).is_ok());
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            Err(UpstreamError::InvalidCredential(401))
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN),
            Err(UpstreamError::InvalidCredential(403))
        );
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            Err(UpstreamError::Status { status: 503, .. })
        ));
    }
}
