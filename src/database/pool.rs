//! Database Connection Pool using sqlx

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::database::grants::GrantRepository;
use crate::database::reputation::StateRepository;
use crate::database::transactions::TransactionRepository;

pub struct DatabasePool {
    pool: PgPool,
    transactions: TransactionRepository,
    grants: GrantRepository,
    reputation: StateRepository,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, String> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .map_err(|e| format!("Failed to connect to PostgreSQL: {}", e))?;

        info!("Connected to PostgreSQL");

        let transactions = TransactionRepository::new(pool.clone());
        let grants = GrantRepository::new(pool.clone());
        let reputation = StateRepository::new(pool.clone());

        Ok(Self {
            pool,
            transactions,
            grants,
            reputation,
        })
    }

    pub async fn init_schema(&self) -> Result<(), String> {
        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS ledger")
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create ledger schema: {}", e))?;

        sqlx::query("CREATE SCHEMA IF NOT EXISTS grants")
            .execute(&self.pool)
            .await
            .map_err(|e| format!("Failed to create grants schema: {}", e))?;

        self.transactions.init_schema().await?;
        self.grants.init_schema().await?;
        self.reputation.init_schema().await?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn transactions(&self) -> &TransactionRepository {
        &self.transactions
    }

    pub fn grants(&self) -> &GrantRepository {
        &self.grants
    }

    pub fn reputation(&self) -> &StateRepository {
        &self.reputation
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
