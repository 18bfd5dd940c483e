//! Points Repository - PostgreSQL persistence for points records and the ledger
//!
//! Neither table references `registry.providers`: points outlive providers.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{PgConnection, Row};
use tracing::{debug, info};

use crate::points::{CategoryTotals, PointsCategory, PointsRecord, PointsTransaction};

pub struct PointsRepository {
    pool: PgPool,
}

impl PointsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registry.points_records (
                provider_id UUID PRIMARY KEY,
                owner_address VARCHAR(255) NOT NULL,
                service_points BIGINT NOT NULL DEFAULT 0,
                developer_api_points BIGINT NOT NULL DEFAULT 0,
                agent_api_points BIGINT NOT NULL DEFAULT 0,
                uptime_reward_points BIGINT NOT NULL DEFAULT 0,
                total_points BIGINT NOT NULL DEFAULT 0,
                last_earned TIMESTAMP WITH TIME ZONE,
                is_provider_active BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create points_records table: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS registry.points_transactions (
                id UUID PRIMARY KEY,
                owner_address VARCHAR(255) NOT NULL,
                provider_id UUID NOT NULL,
                points_earned BIGINT NOT NULL,
                kind VARCHAR(32) NOT NULL,
                category VARCHAR(32),
                details JSONB NOT NULL,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                was_provider_active BOOLEAN NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| format!("Failed to create points_transactions table: {}", e))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_points_records_owner ON registry.points_records(owner_address)",
            "CREATE INDEX IF NOT EXISTS idx_points_tx_owner ON registry.points_transactions(owner_address, created_at)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| format!("Failed to create points index: {}", e))?;
        }

        info!("Points tables ready");
        Ok(())
    }

    pub async fn load_records(&self) -> Result<Vec<PointsRecord>, String> {
        let rows = sqlx::query("SELECT * FROM registry.points_records")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| format!("Failed to load points records: {}", e))?;
        rows.iter().map(record_from_row).collect()
    }

    /// Ledger entries written at or after `since`, oldest first
    pub async fn load_transactions_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PointsTransaction>, String> {
        let rows = sqlx::query(
            "SELECT * FROM registry.points_transactions WHERE created_at >= $1 ORDER BY created_at",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| format!("Failed to load points transactions: {}", e))?;
        rows.iter().map(transaction_from_row).collect()
    }

    /// Sum of every ledger entry of an owner
    pub async fn owner_total(&self, owner_address: &str) -> Result<u64, String> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(points_earned)::BIGINT FROM registry.points_transactions WHERE owner_address = $1",
        )
        .bind(owner_address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| format!("Failed to sum points transactions: {}", e))?;
        Ok(non_negative(total.unwrap_or(0)))
    }

    pub async fn upsert_record(conn: &mut PgConnection, r: &PointsRecord) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO registry.points_records
            (provider_id, owner_address, service_points, developer_api_points,
             agent_api_points, uptime_reward_points, total_points, last_earned,
             is_provider_active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (provider_id) DO UPDATE SET
                service_points = EXCLUDED.service_points,
                developer_api_points = EXCLUDED.developer_api_points,
                agent_api_points = EXCLUDED.agent_api_points,
                uptime_reward_points = EXCLUDED.uptime_reward_points,
                total_points = EXCLUDED.total_points,
                last_earned = EXCLUDED.last_earned,
                is_provider_active = EXCLUDED.is_provider_active
            "#,
        )
        .bind(r.provider_id)
        .bind(&r.owner_address)
        .bind(r.totals.service as i64)
        .bind(r.totals.developer_api as i64)
        .bind(r.totals.agent_api as i64)
        .bind(r.totals.uptime_reward as i64)
        .bind(r.total_points as i64)
        .bind(r.last_earned)
        .bind(r.is_provider_active)
        .bind(r.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to upsert points record: {}", e))?;
        Ok(())
    }

    /// Append-only: an existing id is a bug, not an update
    pub async fn insert_transaction(
        conn: &mut PgConnection,
        t: &PointsTransaction,
    ) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO registry.points_transactions
            (id, owner_address, provider_id, points_earned, kind, category,
             details, created_at, was_provider_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(t.id)
        .bind(&t.owner_address)
        .bind(t.provider_id)
        .bind(t.points_earned as i64)
        .bind(t.kind.as_str())
        .bind(t.category.map(|c| c.as_str()))
        .bind(&t.details)
        .bind(t.timestamp)
        .bind(t.was_provider_active_at_time)
        .execute(&mut *conn)
        .await
        .map_err(|e| format!("Failed to insert points transaction: {}", e))?;

        debug!(transaction_id = %t.id, kind = t.kind.as_str(), "Ledger entry written");
        Ok(())
    }
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}

fn record_from_row(row: &PgRow) -> Result<PointsRecord, String> {
    let field = |e: sqlx::Error| format!("Failed to decode points record: {}", e);
    let totals = CategoryTotals {
        service: non_negative(row.try_get("service_points").map_err(field)?),
        developer_api: non_negative(row.try_get("developer_api_points").map_err(field)?),
        agent_api: non_negative(row.try_get("agent_api_points").map_err(field)?),
        uptime_reward: non_negative(row.try_get("uptime_reward_points").map_err(field)?),
    };
    Ok(PointsRecord {
        provider_id: row.try_get("provider_id").map_err(field)?,
        owner_address: row.try_get("owner_address").map_err(field)?,
        total_points: totals.sum(),
        totals,
        last_earned: row.try_get("last_earned").map_err(field)?,
        is_provider_active: row.try_get("is_provider_active").map_err(field)?,
        created_at: row.try_get("created_at").map_err(field)?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<PointsTransaction, String> {
    let field = |e: sqlx::Error| format!("Failed to decode points transaction: {}", e);
    let kind: String = row.try_get("kind").map_err(field)?;
    let category: Option<String> = row.try_get("category").map_err(field)?;
    let category = category
        .map(|c| c.parse::<PointsCategory>().map_err(|e| e.to_string()))
        .transpose()?;

    Ok(PointsTransaction {
        id: row.try_get("id").map_err(field)?,
        owner_address: row.try_get("owner_address").map_err(field)?,
        provider_id: row.try_get("provider_id").map_err(field)?,
        points_earned: non_negative(row.try_get("points_earned").map_err(field)?),
        kind: kind.parse()?,
        category,
        details: row.try_get("details").map_err(field)?,
        timestamp: row.try_get("created_at").map_err(field)?,
        was_provider_active_at_time: row.try_get("was_provider_active").map_err(field)?,
    })
}
