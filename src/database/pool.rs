//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::database::health::HealthRepository;
use crate::database::points::PointsRepository;
use crate::database::providers::ProviderRepository;
use crate::registry::store::ChangeSet;

pub struct DatabasePool {
    pool: PgPool,
    providers: ProviderRepository,
    points: PointsRepository,
    health: HealthRepository,
}

impl DatabasePool {
    pub async fn new(connection_string: &str) -> Result<Self, String> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await
            .map_err(|e| format!("Failed to connect to PostgreSQL: {}", e))?;

        info!("Connected to PostgreSQL");

        Ok(Self {
            providers: ProviderRepository::new(pool.clone()),
            points: PointsRepository::new(pool.clone()),
            health: HealthRepository::new(pool.clone()),
            pool,
        })
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS registry")
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create registry schema: {}", e))?;

        self.providers.init_schema().await?;
        self.points.init_schema().await?;
        self.health.init_schema().await?;

        info!("Database schema initialized");
        Ok(())
    }

    /// Write one change set in a single SQL transaction
    ///
    /// The points record and ledger entry are written before a provider row
    /// is deleted, so a removal never loses the tombstone.
    pub async fn apply_change_set(&self, changes: &ChangeSet) -> Result<(), String> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| format!("Failed to begin transaction: {}", e))?;

        if let Some(provider) = &changes.provider {
            ProviderRepository::upsert(&mut tx, provider).await?;
        }
        if let Some(record) = &changes.points_record {
            PointsRepository::upsert_record(&mut tx, record).await?;
        }
        if let Some(txn) = &changes.transaction {
            PointsRepository::insert_transaction(&mut tx, txn).await?;
        }
        if let Some(check) = &changes.health_check {
            HealthRepository::insert_check(&mut tx, check).await?;
        }
        if let Some(id) = changes.removed_provider {
            ProviderRepository::delete(&mut tx, id).await?;
        }

        tx.commit()
            .await
            .map_err(|e| format!("Failed to commit transaction: {}", e))?;
        debug!("Change set committed");
        Ok(())
    }

    pub fn providers(&self) -> &ProviderRepository {
        &self.providers
    }

    pub fn points(&self) -> &PointsRepository {
        &self.points
    }

    pub fn health(&self) -> &HealthRepository {
        &self.health
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
