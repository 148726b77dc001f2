//! PostgreSQL storage adapter.
//!
//! Backs both durable stores: the per-client holdings ledger (a JSONB
//! document guarded by a revision column) and the append-only pocket
//! transaction log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    HeldPocket, HoldingsRecord, PocketAction, PocketTransaction, TransactionStatus,
};
use crate::engine::{HoldingsLedger, TransactionLog};
use crate::error::{PocketError, Result};

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a PostgreSQL store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Recent transaction history for a client, newest first
    pub async fn recent_transactions(
        &self,
        client_id: &str,
        limit: i64,
    ) -> Result<Vec<PocketTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT pocket_transaction_id, client_id, pocket_id, transaction_status,
                   lot_size, action, order_completed_price, order_completed,
                   order_cancelled, created_at
            FROM pocket_transactions
            WHERE client_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(client_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut transactions = Vec::new();
        for row in rows {
            let status_code: i16 = row.get("transaction_status");
            let transaction_status = TransactionStatus::from_code(status_code).ok_or_else(|| {
                PocketError::Internal(format!("unknown transaction status code {}", status_code))
            })?;
            let action: String = row.get("action");
            let action = action
                .parse::<PocketAction>()
                .map_err(|e| PocketError::Internal(format!("unknown transaction action: {}", e)))?;

            transactions.push(PocketTransaction {
                pocket_transaction_id: row.get::<Uuid, _>("pocket_transaction_id"),
                client_id: row.get("client_id"),
                pocket_id: row.get("pocket_id"),
                transaction_status,
                lot_size: row.get("lot_size"),
                action,
                order_completed_price: row.get::<Decimal, _>("order_completed_price"),
                order_completed: serde_json::from_value(row.get("order_completed"))?,
                order_cancelled: serde_json::from_value(row.get("order_cancelled"))?,
                created_at: row.get::<DateTime<Utc>, _>("created_at"),
            });
        }

        Ok(transactions)
    }
}

#[async_trait]
impl HoldingsLedger for PostgresStore {
    async fn get(&self, client_id: &str) -> Result<Option<HoldingsRecord>> {
        let row = sqlx::query(
            r#"
            SELECT pockets, revision
            FROM pocket_holdings
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let pockets: Vec<HeldPocket> = serde_json::from_value(row.get("pockets"))?;
                Ok(Some(HoldingsRecord {
                    client_id: client_id.to_string(),
                    pockets,
                    revision: row.get("revision"),
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert(
        &self,
        client_id: &str,
        pockets: &[HeldPocket],
        expected_revision: Option<i64>,
    ) -> Result<i64> {
        let pockets_json = serde_json::to_value(pockets)?;

        match expected_revision {
            // Brand-new client document: a concurrent insert loses the race
            None => {
                let row = sqlx::query(
                    r#"
                    INSERT INTO pocket_holdings (client_id, pockets, revision)
                    VALUES ($1, $2, 1)
                    ON CONFLICT (client_id) DO NOTHING
                    RETURNING revision
                    "#,
                )
                .bind(client_id)
                .bind(&pockets_json)
                .fetch_optional(&self.pool)
                .await?;

                match row {
                    Some(row) => Ok(row.get("revision")),
                    None => Err(PocketError::LedgerConflict(client_id.to_string())),
                }
            }
            // Existing document: the write only lands on the revision we read
            Some(revision) => {
                let row = sqlx::query(
                    r#"
                    UPDATE pocket_holdings
                    SET pockets = $2, revision = revision + 1, updated_at = NOW()
                    WHERE client_id = $1 AND revision = $3
                    RETURNING revision
                    "#,
                )
                .bind(client_id)
                .bind(&pockets_json)
                .bind(revision)
                .fetch_optional(&self.pool)
                .await?;

                match row {
                    Some(row) => {
                        let revision: i64 = row.get("revision");
                        debug!(client_id, revision, "ledger updated");
                        Ok(revision)
                    }
                    None => Err(PocketError::LedgerConflict(client_id.to_string())),
                }
            }
        }
    }
}

#[async_trait]
impl TransactionLog for PostgresStore {
    async fn append(&self, transaction: &PocketTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pocket_transactions (
                pocket_transaction_id, client_id, pocket_id, transaction_status,
                lot_size, action, order_completed_price, order_completed,
                order_cancelled, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(transaction.pocket_transaction_id)
        .bind(&transaction.client_id)
        .bind(&transaction.pocket_id)
        .bind(transaction.transaction_status.code())
        .bind(transaction.lot_size)
        .bind(transaction.action.as_str())
        .bind(transaction.order_completed_price)
        .bind(serde_json::to_value(&transaction.order_completed)?)
        .bind(serde_json::to_value(&transaction.order_cancelled)?)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            transaction_id = %transaction.pocket_transaction_id,
            client_id = %transaction.client_id,
            action = %transaction.action,
            "transaction appended"
        );
        Ok(())
    }
}
