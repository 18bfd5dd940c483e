//! Provider Repository - PostgreSQL persistence for provider records

use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::crypto::{CipherVersion, EncryptedSecret};
use crate::registry::provider::{Provider, ProviderMetadata};

pub struct ProviderRepository {
    pool: PgPool,
}

impl ProviderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registry.providers (
                id UUID PRIMARY KEY,
                owner_address VARCHAR(255) NOT NULL UNIQUE,
                name VARCHAR(255) NOT NULL,
                description TEXT,
                region VARCHAR(64),
                credential_ciphertext TEXT NOT NULL,
                credential_iv TEXT NOT NULL,
                credential_auth_tag TEXT NOT NULL,
                cipher_version VARCHAR(8),
                credential_fingerprint VARCHAR(64) NOT NULL UNIQUE,
                registration_fingerprint VARCHAR(64) NOT NULL,
                ip_hash VARCHAR(64),
                user_agent_hash VARCHAR(64),
                balance DOUBLE PRECISION NOT NULL DEFAULT 0,
                is_active BOOLEAN NOT NULL DEFAULT FALSE,
                status VARCHAR(16) NOT NULL,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_health_check TIMESTAMP WITH TIME ZONE,
                marked_inactive_at TIMESTAMP WITH TIME ZONE,
                risk_score SMALLINT NOT NULL DEFAULT 0,
                flagged_reason TEXT,
                verification_status VARCHAR(16) NOT NULL,
                registered_at TIMESTAMP WITH TIME ZONE NOT NULL,
                total_prompts BIGINT NOT NULL DEFAULT 0,
                avg_response_time_ms DOUBLE PRECISION NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create providers table: {}", e))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_providers_active ON registry.providers(is_active, status)",
            "CREATE INDEX IF NOT EXISTS idx_providers_ip ON registry.providers(ip_hash)",
            "CREATE INDEX IF NOT EXISTS idx_providers_fingerprint ON registry.providers(registration_fingerprint)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| format!("Failed to create providers index: {}", e))?;
        }

        info!("Providers table ready");
        Ok(())
    }

    pub async fn load_all(&self) -> Result<Vec<Provider>, String> {
        let rows = sqlx::query("SELECT * FROM registry.providers ORDER BY registered_at")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| format!("Failed to load providers: {}", e))?;

        rows.iter().map(provider_from_row).collect()
    }

    /// Insert or replace a provider row inside an open transaction
    pub async fn upsert(conn: &mut PgConnection, p: &Provider) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO registry.providers
            (id, owner_address, name, description, region,
             credential_ciphertext, credential_iv, credential_auth_tag, cipher_version,
             credential_fingerprint, registration_fingerprint, ip_hash, user_agent_hash,
             balance, is_active, status, consecutive_failures, last_health_check,
             marked_inactive_at, risk_score, flagged_reason, verification_status,
             registered_at, total_prompts, avg_response_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                    $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                region = EXCLUDED.region,
                credential_ciphertext = EXCLUDED.credential_ciphertext,
                credential_iv = EXCLUDED.credential_iv,
                credential_auth_tag = EXCLUDED.credential_auth_tag,
                cipher_version = EXCLUDED.cipher_version,
                balance = EXCLUDED.balance,
                is_active = EXCLUDED.is_active,
                status = EXCLUDED.status,
                consecutive_failures = EXCLUDED.consecutive_failures,
                last_health_check = EXCLUDED.last_health_check,
                marked_inactive_at = EXCLUDED.marked_inactive_at,
                risk_score = EXCLUDED.risk_score,
                flagged_reason = EXCLUDED.flagged_reason,
                verification_status = EXCLUDED.verification_status,
                total_prompts = EXCLUDED.total_prompts,
                avg_response_time_ms = EXCLUDED.avg_response_time_ms
            "#,
        )
        .bind(p.id)
        .bind(&p.owner_address)
        .bind(&p.metadata.name)
        .bind(&p.metadata.description)
        .bind(&p.metadata.region)
        .bind(&p.encrypted_credential.ciphertext)
        .bind(&p.encrypted_credential.iv)
        .bind(&p.encrypted_credential.auth_tag)
        .bind(p.encrypted_credential.version.map(|v| v.as_tag()))
        .bind(&p.credential_fingerprint)
        .bind(&p.registration_fingerprint)
        .bind(&p.ip_hash)
        .bind(&p.user_agent_hash)
        .bind(p.balance)
        .bind(p.is_active)
        .bind(p.status.as_str())
        .bind(p.consecutive_failures as i32)
        .bind(p.last_health_check)
        .bind(p.marked_inactive_at)
        .bind(i16::from(p.risk_score))
        .bind(&p.flagged_reason)
        .bind(p.verification_status.as_str())
        .bind(p.registered_at)
        .bind(p.total_prompts as i64)
        .bind(p.avg_response_time_ms)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to upsert provider: {}", e))?;

        debug!(provider_id = %p.id, "Provider row written");
        Ok(())
    }

    pub async fn delete(conn: &mut PgConnection, id: Uuid) -> Result<(), String> {
        sqlx::query("DELETE FROM registry.providers WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| format!("Failed to delete provider: {}", e))?;
        Ok(())
    }
}

fn provider_from_row(row: &PgRow) -> Result<Provider, String> {
    let field = |e: sqlx::Error| format!("Failed to decode provider row: {}", e);

    let cipher_version: Option<String> = row.try_get("cipher_version").map_err(field)?;
    let status: String = row.try_get("status").map_err(field)?;
    let verification: String = row.try_get("verification_status").map_err(field)?;
    let consecutive_failures: i32 = row.try_get("consecutive_failures").map_err(field)?;
    let risk_score: i16 = row.try_get("risk_score").map_err(field)?;
    let total_prompts: i64 = row.try_get("total_prompts").map_err(field)?;

    Ok(Provider {
        id: row.try_get("id").map_err(field)?,
        owner_address: row.try_get("owner_address").map_err(field)?,
        metadata: ProviderMetadata {
            name: row.try_get("name").map_err(field)?,
            description: row.try_get("description").map_err(field)?,
            region: row.try_get("region").map_err(field)?,
        },
        encrypted_credential: EncryptedSecret {
            ciphertext: row.try_get("credential_ciphertext").map_err(field)?,
            iv: row.try_get("credential_iv").map_err(field)?,
            auth_tag: row.try_get("credential_auth_tag").map_err(field)?,
            version: cipher_version.as_deref().and_then(CipherVersion::from_tag),
        },
        credential_fingerprint: row.try_get("credential_fingerprint").map_err(field)?,
        registration_fingerprint: row.try_get("registration_fingerprint").map_err(field)?,
        ip_hash: row.try_get("ip_hash").map_err(field)?,
        user_agent_hash: row.try_get("user_agent_hash").map_err(field)?,
        balance: row.try_get("balance").map_err(field)?,
        is_active: row.try_get("is_active").map_err(field)?,
        status: status.parse()?,
        consecutive_failures: consecutive_failures.max(0) as u32,
        last_health_check: row.try_get("last_health_check").map_err(field)?,
        marked_inactive_at: row.try_get("marked_inactive_at").map_err(field)?,
        risk_score: risk_score.clamp(0, 100) as u8,
        flagged_reason: row.try_get("flagged_reason").map_err(field)?,
        verification_status: verification.parse()?,
        registered_at: row.try_get("registered_at").map_err(field)?,
        total_prompts: total_prompts.max(0) as u64,
        avg_response_time_ms: row.try_get("avg_response_time_ms").map_err(field)?,
    })
}
