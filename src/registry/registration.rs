//! Provider registration
//!
//! Registration is the only unauthenticated write path, so every request is
//! validated, signature-checked and risk-scored before anything is stored.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::provider::{ProviderMetadata, ProviderStatus, admission_status, normalize_owner};
use super::store::{Admission, ProviderRegistry};
use crate::auth::{SignatureVerifier, check_freshness, registration_message};
use crate::balance::BalanceReconciler;
use crate::config::RegistrationConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::risk::{RiskEngine, VerificationPolicy, VerificationStatus};

/// Signed registration request
#[derive(Clone, Deserialize)]
pub struct RegistrationRequest {
    pub owner_address: String,
    pub credential: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Unix seconds the signature was produced at
    pub timestamp: i64,
    /// Hex signature over `register:{owner}:{name}:{timestamp}`
    pub signature: String,
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("owner_address", &self.owner_address)
            .field("credential", &"<redacted>")
            .field("name", &self.name)
            .field("region", &self.region)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// Transport-level signals of the caller
#[derive(Debug, Clone, Default)]
pub struct ClientSignals {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub provider_id: Uuid,
    pub risk_score: u8,
    pub reasons: Vec<String>,
    pub verification_status: VerificationStatus,
    pub status: ProviderStatus,
    pub balance: f64,
}

fn valid_credential_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

pub struct RegistrationService {
    registry: Arc<ProviderRegistry>,
    engine: RiskEngine,
    verifier: Arc<dyn SignatureVerifier>,
    balances: Arc<BalanceReconciler>,
    config: RegistrationConfig,
}

impl RegistrationService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        engine: RiskEngine,
        verifier: Arc<dyn SignatureVerifier>,
        balances: Arc<BalanceReconciler>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            registry,
            engine,
            verifier,
            balances,
            config,
        }
    }

    /// Shape checks on the request, before any crypto
    pub fn validate(&self, request: &RegistrationRequest) -> RegistryResult<()> {
        if normalize_owner(&request.owner_address).is_empty() {
            return Err(RegistryError::validation("owner address is required"));
        }

        let name = request.name.trim();
        if name.is_empty() {
            return Err(RegistryError::validation("provider name is required"));
        }
        if name.chars().count() > self.config.max_name_length {
            return Err(RegistryError::validation(format!(
                "provider name exceeds {} characters",
                self.config.max_name_length
            )));
        }

        let credential = request.credential.trim();
        if credential.len() < self.config.min_credential_length {
            return Err(RegistryError::validation(format!(
                "credential must be at least {} characters",
                self.config.min_credential_length
            )));
        }
        if !credential.chars().all(valid_credential_char) {
            return Err(RegistryError::validation(
                "credential may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(())
    }

    fn authenticate(&self, request: &RegistrationRequest) -> RegistryResult<String> {
        check_freshness(
            request.timestamp,
            Utc::now(),
            self.config.max_signature_age_secs,
        )?;

        let owner = normalize_owner(&request.owner_address);
        let message = registration_message(&owner, request.name.trim(), request.timestamp);
        if !self.verifier.verify(&message, &request.signature, &owner) {
            warn!(owner = %owner, "Registration signature rejected");
            return Err(RegistryError::validation("invalid signature"));
        }
        Ok(owner)
    }

    /// Fail fast on collisions before spending an upstream call
    async fn precheck_duplicates(&self, owner: &str, credential: &str) -> RegistryResult<()> {
        let fingerprint = self.registry.hasher().credential_fingerprint(credential);
        let state = self.registry.read().await;
        if state.owner_taken(owner) {
            return Err(RegistryError::DuplicateOwner(owner.to_string()));
        }
        if state.credential_taken(&fingerprint) {
            return Err(RegistryError::DuplicateCredential);
        }
        Ok(())
    }

    /// Standard registration path
    pub async fn register(
        &self,
        request: RegistrationRequest,
        client: ClientSignals,
    ) -> RegistryResult<RegistrationReceipt> {
        self.validate(&request)?;
        let owner = self.authenticate(&request)?;
        self.admit(request, owner, client, VerificationPolicy::Standard, 0.0)
            .await
    }

    /// Registration that proves the credential against the upstream first
    ///
    /// Upstream failures are returned to the caller as-is. A successful
    /// balance query earns the lenient verification policy.
    pub async fn register_balance_verified(
        &self,
        request: RegistrationRequest,
        client: ClientSignals,
    ) -> RegistryResult<RegistrationReceipt> {
        self.validate(&request)?;
        let owner = self.authenticate(&request)?;
        let credential = request.credential.trim().to_string();
        self.precheck_duplicates(&owner, &credential).await?;

        let balance = self.balances.query_balance(&credential).await?;
        info!(owner = %owner, balance, "Credential verified against upstream balance");

        self.admit(
            request,
            owner,
            client,
            VerificationPolicy::BalanceVerified,
            balance,
        )
        .await
    }

    async fn admit(
        &self,
        request: RegistrationRequest,
        owner: String,
        client: ClientSignals,
        policy: VerificationPolicy,
        balance: f64,
    ) -> RegistryResult<RegistrationReceipt> {
        let credential = request.credential.trim();
        let metadata = ProviderMetadata {
            name: request.name.trim().to_string(),
            description: request.description.clone(),
            region: request.region.clone(),
        };

        let engine = &self.engine;
        let now = Utc::now();
        let (provider_id, admission) = self
            .registry
            .register_reviewed(&owner, credential, metadata, |population| {
                let assessment = engine.assess(
                    credential,
                    population,
                    client.ip.as_deref(),
                    client.user_agent.as_deref(),
                    now,
                );
                let verification = assessment.status(policy, engine.thresholds());
                Admission::new(assessment, verification).with_balance(balance)
            })
            .await?;

        let verification = admission.verification;
        let risk_score = admission.assessment.score;
        let reasons: Vec<String> = admission
            .assessment
            .reasons
            .iter()
            .map(ToString::to_string)
            .collect();

        if verification != VerificationStatus::Verified {
            warn!(
                provider_id = %provider_id,
                owner = %owner,
                risk_score,
                reasons = %reasons.join("; "),
                "Registration held for review"
            );
        }

        Ok(RegistrationReceipt {
            provider_id,
            risk_score,
            reasons,
            verification_status: verification,
            status: admission_status(verification),
            balance,
        })
    }
}
