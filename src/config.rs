use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::{info, warn};

use crate::points::PointsPolicy;
use crate::risk::RiskThresholds;

/// Configuration for the provider registry service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Key material and hashing salt
    pub crypto: CryptoConfig,
    /// Upstream provider API
    pub upstream: UpstreamConfig,
    /// Health monitor tuning
    pub health: HealthConfig,
    /// Balance reconciler tuning
    pub balance: BalanceConfig,
    /// Points ledger rates
    pub points: PointsConfig,
    /// Anti-Sybil risk rules
    pub risk: RiskConfig,
    /// Registration validation
    pub registration: RegistrationConfig,
    /// Admin authorization
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host to bind to
    pub host: String,
    /// Server port to bind to
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Require HTTPS for upstream communications
    pub require_https: bool,
    /// Rate limit per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    /// Reverse proxies allowed to report the client address in headers
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string
    pub postgres_url: String,
    /// Enable PostgreSQL (if false, state lives in memory only)
    pub postgres_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Enable request/response span logging
    pub log_requests: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Key for the current credential cipher (64 hex chars, or a passphrase)
    pub encryption_key: String,
    /// Key the retired cipher used, if different from the current key
    pub legacy_encryption_key: Option<String>,
    /// Salt mixed into every IP / user-agent / credential hash
    pub fingerprint_salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream API base URL
    pub base_url: String,
    /// Lightweight capability-listing endpoint used as the health probe
    pub capability_path: String,
    /// Balance / rate-limit endpoint
    pub balance_path: String,
    /// Maximum accepted response size in bytes
    pub max_response_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Consecutive failed probes before an active provider goes inactive
    pub failure_threshold: u32,
    /// Upper bound on a single probe
    pub probe_timeout_secs: u64,
    /// Probes allowed in flight during a sweep
    pub max_concurrent_probes: usize,
    /// Scheduler cadence for health sweeps
    pub sweep_interval_secs: u64,
    /// Health records older than this are dropped from memory
    pub history_retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Minimum absolute change before a stored balance is rewritten
    pub update_epsilon: f64,
    /// Upper bound on a single balance query
    pub request_timeout_secs: u64,
    /// Scheduler cadence for balance sweeps
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsConfig {
    /// Units processed per awarded point
    pub units_per_point: u64,
    /// Flat points per prompt when no unit count is reported
    pub legacy_points_per_prompt: u64,
    /// Weight kept from the previous response-time average
    pub ema_old_weight: f64,
    /// Ledger entries kept in memory when PostgreSQL holds the full ledger
    pub ledger_retention_days: u32,
}

/// Configuration for the anti-Sybil risk engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub fingerprint_match_points: u32,
    pub shared_ip_points: u32,
    /// Rule fires when more than this many providers share the IP hash
    pub shared_ip_trigger: usize,
    pub shared_user_agent_points: u32,
    /// Rule fires when more than this many providers share the user-agent hash
    pub shared_user_agent_trigger: usize,
    pub same_day_points: u32,
    /// Rule fires when more than this many providers registered the same day
    pub same_day_trigger: usize,
    /// Score at or above which a registration is flagged
    pub flag_threshold: u32,
    /// Score at or above which a standard registration waits for review
    pub review_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Minimum trimmed credential length (also enforced on admin activation)
    pub min_credential_length: usize,
    /// Maximum age of a signed registration message
    pub max_signature_age_secs: i64,
    /// Maximum provider display name length
    pub max_name_length: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Addresses allowed to perform admin overrides
    pub addresses: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.venice.ai".to_string(),
            capability_path: "/api/v1/models".to_string(),
            balance_path: "/api/v1/api_keys/rate_limits".to_string(),
            max_response_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            probe_timeout_secs: 30,
            max_concurrent_probes: 8,
            sweep_interval_secs: 300,
            history_retention_days: 30,
        }
    }
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            update_epsilon: 0.01,
            request_timeout_secs: 90,
            sweep_interval_secs: 1800,
        }
    }
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            units_per_point: 100,
            legacy_points_per_prompt: 100,
            ema_old_weight: 0.9,
            ledger_retention_days: 30,
        }
    }
}

impl PointsConfig {
    /// Convert to PointsPolicy for use by PointsLedger
    pub fn to_policy(&self) -> PointsPolicy {
        PointsPolicy {
            units_per_point: self.units_per_point,
            legacy_points_per_prompt: self.legacy_points_per_prompt,
            ema_old_weight: self.ema_old_weight,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            fingerprint_match_points: 50,
            shared_ip_points: 30,
            shared_ip_trigger: 2,
            shared_user_agent_points: 20,
            shared_user_agent_trigger: 3,
            same_day_points: 25,
            same_day_trigger: 5,
            flag_threshold: 70,
            review_threshold: 40,
        }
    }
}

impl RiskConfig {
    /// Convert to RiskThresholds for use by RiskEngine
    pub fn to_thresholds(&self) -> RiskThresholds {
        RiskThresholds {
            fingerprint_match_points: self.fingerprint_match_points,
            shared_ip_points: self.shared_ip_points,
            shared_ip_trigger: self.shared_ip_trigger,
            shared_user_agent_points: self.shared_user_agent_points,
            shared_user_agent_trigger: self.shared_user_agent_trigger,
            same_day_points: self.same_day_points,
            same_day_trigger: self.same_day_trigger,
            flag_threshold: self.flag_threshold,
            review_threshold: self.review_threshold,
        }
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            min_credential_length: 16,
            max_signature_age_secs: 300,
            max_name_length: 64,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8780,
            },
            security: SecurityConfig {
                require_https: true,
                rate_limit_per_minute: 60,
                max_request_size: 64 * 1024, // 64KB
                trusted_proxies: Vec::new(),
            },
            database: DatabaseConfig {
                postgres_url: "postgresql://localhost:5432/inference_registry".to_string(),
                postgres_enabled: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_requests: false,
            },
            crypto: CryptoConfig {
                encryption_key: String::new(), // MUST be configured
                legacy_encryption_key: None,
                fingerprint_salt: String::new(), // MUST be configured
            },
            upstream: UpstreamConfig::default(),
            health: HealthConfig::default(),
            balance: BalanceConfig::default(),
            points: PointsConfig::default(),
            risk: RiskConfig::default(),
            registration: RegistrationConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// Parse an optional environment variable into `slot`
fn override_from_env<T>(var: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Ok(raw) = env::var(var) {
        *slot = raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {} value", var))?;
    }
    Ok(())
}

/// Comma-separated IP addresses; blanks are skipped
fn parse_ip_list(raw: &str) -> Result<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| {
            ip.parse::<IpAddr>()
                .with_context(|| format!("Invalid trusted proxy address: {}", ip))
        })
        .collect()
}

impl RegistryConfig {
    /// Load configuration from environment variables and validate it
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Server
        if let Ok(host) = env::var("REGISTRY_HOST") {
            config.server.host = host;
        }
        override_from_env("REGISTRY_PORT", &mut config.server.port)?;

        // Security
        override_from_env("REGISTRY_REQUIRE_HTTPS", &mut config.security.require_https)?;
        override_from_env(
            "REGISTRY_RATE_LIMIT_PER_MINUTE",
            &mut config.security.rate_limit_per_minute,
        )?;
        override_from_env(
            "REGISTRY_MAX_REQUEST_SIZE",
            &mut config.security.max_request_size,
        )?;
        if let Ok(proxies) = env::var("REGISTRY_TRUSTED_PROXIES") {
            config.security.trusted_proxies = parse_ip_list(&proxies)?;
        }

        // Database
        if let Ok(url) = env::var("REGISTRY_POSTGRES_URL") {
            config.database.postgres_url = url;
        }
        override_from_env(
            "REGISTRY_POSTGRES_ENABLED",
            &mut config.database.postgres_enabled,
        )?;

        // Logging
        if let Ok(level) = env::var("REGISTRY_LOG_LEVEL") {
            config.logging.level = level;
        }
        override_from_env("REGISTRY_LOG_REQUESTS", &mut config.logging.log_requests)?;

        // Crypto - SECURITY CRITICAL
        config.crypto.encryption_key = env::var("REGISTRY_ENCRYPTION_KEY")
            .context("REGISTRY_ENCRYPTION_KEY environment variable is required")?;
        config.crypto.legacy_encryption_key = env::var("REGISTRY_LEGACY_ENCRYPTION_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        config.crypto.fingerprint_salt = env::var("REGISTRY_FINGERPRINT_SALT")
            .context("REGISTRY_FINGERPRINT_SALT environment variable is required")?;

        // Upstream
        if let Ok(base_url) = env::var("REGISTRY_UPSTREAM_URL") {
            config.upstream.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Ok(path) = env::var("REGISTRY_UPSTREAM_CAPABILITY_PATH") {
            config.upstream.capability_path = path;
        }
        if let Ok(path) = env::var("REGISTRY_UPSTREAM_BALANCE_PATH") {
            config.upstream.balance_path = path;
        }

        // Health monitor
        override_from_env(
            "REGISTRY_HEALTH_FAILURE_THRESHOLD",
            &mut config.health.failure_threshold,
        )?;
        override_from_env(
            "REGISTRY_HEALTH_TIMEOUT_SECS",
            &mut config.health.probe_timeout_secs,
        )?;
        override_from_env(
            "REGISTRY_HEALTH_MAX_CONCURRENT",
            &mut config.health.max_concurrent_probes,
        )?;
        override_from_env(
            "REGISTRY_HEALTH_INTERVAL_SECS",
            &mut config.health.sweep_interval_secs,
        )?;
        override_from_env(
            "REGISTRY_HEALTH_RETENTION_DAYS",
            &mut config.health.history_retention_days,
        )?;

        // Balance reconciler
        override_from_env(
            "REGISTRY_BALANCE_EPSILON",
            &mut config.balance.update_epsilon,
        )?;
        override_from_env(
            "REGISTRY_BALANCE_TIMEOUT_SECS",
            &mut config.balance.request_timeout_secs,
        )?;
        override_from_env(
            "REGISTRY_BALANCE_INTERVAL_SECS",
            &mut config.balance.sweep_interval_secs,
        )?;

        // Points
        override_from_env(
            "REGISTRY_POINTS_UNITS_PER_POINT",
            &mut config.points.units_per_point,
        )?;
        override_from_env(
            "REGISTRY_POINTS_PER_PROMPT",
            &mut config.points.legacy_points_per_prompt,
        )?;
        override_from_env(
            "REGISTRY_POINTS_EMA_OLD_WEIGHT",
            &mut config.points.ema_old_weight,
        )?;
        override_from_env(
            "REGISTRY_LEDGER_RETENTION_DAYS",
            &mut config.points.ledger_retention_days,
        )?;

        // Risk engine
        override_from_env(
            "REGISTRY_RISK_FLAG_THRESHOLD",
            &mut config.risk.flag_threshold,
        )?;
        override_from_env(
            "REGISTRY_RISK_REVIEW_THRESHOLD",
            &mut config.risk.review_threshold,
        )?;

        // Registration
        override_from_env(
            "REGISTRY_MIN_CREDENTIAL_LENGTH",
            &mut config.registration.min_credential_length,
        )?;
        override_from_env(
            "REGISTRY_MAX_SIGNATURE_AGE_SECS",
            &mut config.registration.max_signature_age_secs,
        )?;

        // Admin allow-list
        if let Ok(addresses) = env::var("REGISTRY_ADMIN_ADDRESSES") {
            config.admin.addresses = addresses
                .split(',')
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty())
                .collect();
        }
        if config.admin.addresses.is_empty() {
            warn!("REGISTRY_ADMIN_ADDRESSES not set - admin endpoints will reject every caller");
        } else {
            info!("Configured {} admin address(es)", config.admin.addresses.len());
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration for security and consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be non-zero"));
        }

        if self.security.require_https && !self.upstream.base_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "HTTPS is required but upstream URL is not HTTPS: {}",
                self.upstream.base_url
            ));
        }

        if self.crypto.encryption_key.len() < 32 {
            return Err(anyhow::anyhow!(
                "Encryption key is too short (minimum 32 characters)"
            ));
        }

        if self.crypto.fingerprint_salt.len() < 16 {
            return Err(anyhow::anyhow!(
                "Fingerprint salt is too short (minimum 16 characters)"
            ));
        }

        if self.health.failure_threshold == 0 {
            return Err(anyhow::anyhow!("Health failure threshold must be at least 1"));
        }

        if self.health.max_concurrent_probes == 0 {
            return Err(anyhow::anyhow!("At least one concurrent probe is required"));
        }

        if !(0.0..1.0).contains(&self.points.ema_old_weight) {
            return Err(anyhow::anyhow!(
                "EMA weight must be in [0, 1): {}",
                self.points.ema_old_weight
            ));
        }

        if self.points.units_per_point == 0 {
            return Err(anyhow::anyhow!("Units per point must be non-zero"));
        }

        if self.balance.update_epsilon < 0.0 {
            return Err(anyhow::anyhow!("Balance epsilon cannot be negative"));
        }

        if self.risk.review_threshold > self.risk.flag_threshold {
            return Err(anyhow::anyhow!(
                "Review threshold ({}) must not exceed flag threshold ({})",
                self.risk.review_threshold,
                self.risk.flag_threshold
            ));
        }

        Ok(())
    }
}

/// Sanitize sensitive data for logging
pub fn sanitize_for_logging(data: &str) -> String {
    // Connection strings: hide the userinfo part
    if let Some(scheme_end) = data.find("://")
        && let Some(at) = data[scheme_end + 3..].find('@')
    {
        let host_start = scheme_end + 3 + at;
        return format!("{}***{}", &data[..scheme_end + 3], &data[host_start..]);
    }

    let chars: Vec<char> = data.chars().collect();
    if chars.len() > 20 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 2..].iter().collect();
        format!("{}***{}", head, tail)
    } else {
        "*".repeat(chars.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> RegistryConfig {
        let mut config = RegistryConfig::default();
        config.crypto.encryption_key = "0".repeat(64);
        config.crypto.fingerprint_salt = "test-fingerprint-salt".to_string();
        config
    }

    #[test]
    fn test_sanitize_for_logging() {
        assert_eq!(
            sanitize_for_logging("postgresql://user:pw@db:5432/registry"),
            "postgresql://***@db:5432/registry"
        );
        assert_eq!(sanitize_for_logging("short"), "*****");
        assert_eq!(
            sanitize_for_logging("abcdefghijklmnopqrstuvwxyz"),
            "abcd***yz"
        );
    }

    #[test]
    fn test_parse_trusted_proxies() {
        let proxies = parse_ip_list("10.0.0.2, ::1,,").unwrap();
        assert_eq!(proxies.len(), 2);
        assert!(parse_ip_list("10.0.0.2, proxy.local").is_err());
        assert!(RegistryConfig::default().security.trusted_proxies.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_key_rejected() {
        let mut config = valid_config();
        config.crypto.encryption_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_http_upstream_rejected_when_https_required() {
        let mut config = valid_config();
        config.upstream.base_url = "http://api.example.com".to_string();
        assert!(config.validate().is_err());

        config.security.require_https = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_keep_behavioral_constants() {
        let config = RegistryConfig::default();
        assert_eq!(config.health.failure_threshold, 2);
        assert_eq!(config.health.probe_timeout_secs, 30);
        assert_eq!(config.balance.request_timeout_secs, 90);
        assert!((config.balance.update_epsilon - 0.01).abs() < f64::EPSILON);
        assert!((config.points.ema_old_weight - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.risk.to_thresholds().flag_threshold, 70);
    }
}
