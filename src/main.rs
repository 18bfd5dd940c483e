use anyhow::{Context, Result};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{Level, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use inference_registry::{
    api::{RegistryApiState, SecurityMiddlewareConfig, SecurityState, create_app},
    auth::{AllowListPolicy, Ed25519Verifier, SignatureVerifier},
    balance::BalanceReconciler,
    config::{RegistryConfig, sanitize_for_logging},
    crypto::{SecretCipher, SignalHasher},
    database::DatabasePool,
    health::HealthMonitor,
    points::PointsLedger,
    registry::{AdminService, ProviderRegistry, RegistrationService, SelectionService},
    risk::RiskEngine,
    upstream::{HttpUpstreamClient, UpstreamApi, UpstreamSettings},
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Arc::new(RegistryConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        eprintln!("Please check environment variables and security settings.");
        e
    })?);

    init_secure_logging(&config)?;

    info!("Starting inference provider registry");
    info!(
        "Security settings: HTTPS required: {}, admins: {}",
        config.security.require_https,
        config.admin.addresses.len()
    );

    let cipher = SecretCipher::from_config(&config.crypto).context("Invalid encryption key")?;
    let hasher = SignalHasher::new(config.crypto.fingerprint_salt.clone());
    let mut registry = ProviderRegistry::new(cipher, hasher.clone());

    if config.database.postgres_enabled {
        info!(
            "Connecting to PostgreSQL at {}",
            sanitize_for_logging(&config.database.postgres_url)
        );
        let db = DatabasePool::new(&config.database.postgres_url)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        db.init_schema().await.map_err(|e| anyhow::anyhow!(e))?;
        registry = registry.with_database(Arc::new(db));
    } else {
        warn!("PostgreSQL disabled: registry state lives in memory only");
    }
    let registry = Arc::new(registry);

    let retention = chrono::Duration::days(config.health.history_retention_days as i64);
    let ledger_window = chrono::Duration::days(config.points.ledger_retention_days as i64);
    let loaded = registry
        .load_from_database(Utc::now() - retention, Utc::now() - ledger_window)
        .await
        .context("Failed to load registry state")?;
    info!("Loaded {} providers", loaded);

    let upstream: Arc<dyn UpstreamApi> = Arc::new(
        HttpUpstreamClient::new(UpstreamSettings::from_config(
            &config.upstream,
            config.security.require_https,
            config.health.probe_timeout_secs,
            config.balance.request_timeout_secs,
        ))
        .context("Invalid upstream configuration")?,
    );

    let verifier: Arc<dyn SignatureVerifier> = Arc::new(Ed25519Verifier);
    let admin_policy = Arc::new(AllowListPolicy::new(config.admin.addresses.iter()));
    if admin_policy.is_empty() {
        warn!("No admin addresses configured: all admin actions will be denied");
    }

    let thresholds = config.risk.to_thresholds();
    let health = Arc::new(HealthMonitor::new(
        registry.clone(),
        upstream.clone(),
        config.health.clone(),
    ));
    let balances = Arc::new(BalanceReconciler::new(
        registry.clone(),
        upstream.clone(),
        health.clone(),
        config.balance.clone(),
    ));
    let ledger = Arc::new(PointsLedger::new(registry.clone(), config.points.to_policy()));
    let registration = Arc::new(RegistrationService::new(
        registry.clone(),
        RiskEngine::new(hasher, thresholds.clone()),
        verifier.clone(),
        balances.clone(),
        config.registration.clone(),
    ));
    let admin = Arc::new(AdminService::new(
        registry.clone(),
        upstream,
        admin_policy,
        thresholds,
        config.registration.min_credential_length,
        config.health.probe_timeout_secs,
    ));
    let selection = Arc::new(SelectionService::new(registry.clone()));

    spawn_health_sweeps(health.clone(), &config);
    spawn_balance_sweeps(balances.clone(), &config);
    spawn_ledger_pruning(registry.clone(), &config);

    let security_state = SecurityState::new(SecurityMiddlewareConfig {
        rate_limit_per_minute: config.security.rate_limit_per_minute,
        max_request_size: config.security.max_request_size,
        log_requests: config.logging.log_requests,
        trusted_proxies: config.security.trusted_proxies.clone(),
    });
    if security_state.config.trusted_proxies.is_empty() {
        info!("No trusted proxies: client addresses come from the socket");
    } else {
        info!(
            "Trusting forwarding headers from {} proxy address(es)",
            security_state.config.trusted_proxies.len()
        );
    }
    spawn_rate_limit_cleanup(security_state.clone());

    let state = RegistryApiState {
        registry,
        registration,
        admin,
        selection,
        ledger,
        health,
        balances,
        verifier,
        admin_signature_max_age_secs: config.registration.max_signature_age_secs,
    };
    let app = create_app(state, security_state).layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Registry listening on {}", bind_addr);
    info!(
        "Security middleware: Rate limit={}/min, Max body={}KB",
        config.security.rate_limit_per_minute,
        config.security.max_request_size / 1024
    );

    // Connect info feeds client IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn init_secure_logging(config: &RegistryConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// Periodic health sweeps plus pruning of the in-memory check history
fn spawn_health_sweeps(health: Arc<HealthMonitor>, config: &RegistryConfig) {
    let period = Duration::from_secs(config.health.sweep_interval_secs.max(1));
    let retention = chrono::Duration::days(config.health.history_retention_days as i64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let sweep = health.check_all().await;
            let pruned = health.prune_history(Utc::now() - retention).await;
            info!(
                total = sweep.total,
                healthy = sweep.healthy,
                failed = sweep.failed,
                deactivated = sweep.deactivated,
                reactivated = sweep.reactivated,
                pruned,
                "Health sweep finished"
            );
        }
    });
}

fn spawn_balance_sweeps(balances: Arc<BalanceReconciler>, config: &RegistryConfig) {
    let period = Duration::from_secs(config.balance.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; let the first health sweep go first
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sweep = balances.refresh_all().await;
            info!(
                total = sweep.total,
                updated = sweep.updated,
                errored = sweep.errored,
                "Balance sweep finished"
            );
        }
    });
}

/// Keep only a recent window of the ledger in memory; no-op without PostgreSQL
fn spawn_ledger_pruning(registry: Arc<ProviderRegistry>, config: &RegistryConfig) {
    let window = chrono::Duration::days(config.points.ledger_retention_days as i64);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            let pruned = registry.prune_transactions(Utc::now() - window).await;
            if pruned > 0 {
                info!(pruned, "Ledger window pruned");
            }
        }
    });
}

fn spawn_rate_limit_cleanup(security: SecurityState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(300));
        loop {
            ticker.tick().await;
            security.rate_limiter.cleanup();
        }
    });
}
