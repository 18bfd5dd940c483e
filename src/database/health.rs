//! Health Repository - append-only health check log

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{PgConnection, Row};
use tracing::info;

use crate::health::HealthCheckRecord;

pub struct HealthRepository {
    pool: PgPool,
}

impl HealthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registry.health_checks (
                id UUID PRIMARY KEY,
                provider_id UUID NOT NULL,
                success BOOLEAN NOT NULL,
                response_time_ms BIGINT NOT NULL,
                checked_at TIMESTAMP WITH TIME ZONE NOT NULL,
                error TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create health_checks table: {}", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_health_checks_provider ON registry.health_checks(provider_id, checked_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create health_checks index: {}", e))?;

        info!("Health checks table ready");
        Ok(())
    }

    pub async fn load_since(&self, since: DateTime<Utc>) -> Result<Vec<HealthCheckRecord>, String> {
        let rows = sqlx::query(
            r#"
            SELECT id, provider_id, success, response_time_ms, checked_at, error
            FROM registry.health_checks
            WHERE checked_at >= $1
            ORDER BY checked_at
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to load health checks: {}", e))?;

        rows.iter()
            .map(|row| -> Result<HealthCheckRecord, String> {
                let field = |e: sqlx::Error| format!("Failed to decode health check: {}", e);
                let response_time_ms: i64 = row.try_get("response_time_ms").map_err(field)?;
                Ok(HealthCheckRecord {
                    id: row.try_get("id").map_err(field)?,
                    provider_id: row.try_get("provider_id").map_err(field)?,
                    success: row.try_get("success").map_err(field)?,
                    response_time_ms: response_time_ms.max(0) as u64,
                    timestamp: row.try_get("checked_at").map_err(field)?,
                    error: row.try_get("error").map_err(field)?,
                })
            })
            .collect()
    }

    pub async fn insert_check(conn: &mut PgConnection, c: &HealthCheckRecord) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO registry.health_checks
            (id, provider_id, success, response_time_ms, checked_at, error)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(c.id)
        .bind(c.provider_id)
        .bind(c.success)
        .bind(c.response_time_ms as i64)
        .bind(c.timestamp)
        .bind(&c.error)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to insert health check: {}", e))?;
        Ok(())
    }
}
