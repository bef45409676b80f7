//! `BlockchainStore`: durable persistence for `BlockchainRecord` rows,
//! mirroring the shape of `store::SagaStore` but for the blockchain
//! recorder's own table.

use async_trait::async_trait;
use sea_query::Iden;
use uuid::Uuid;

use super::{BlockchainRecord, Result, TransactionStatus};

#[derive(Iden)]
pub enum BlockchainRecords {
    Table,
    #[iden = "record_id"]
    RecordId,
    #[iden = "shipment_id"]
    ShipmentId,
    #[iden = "tx_hash"]
    TxHash,
    #[iden = "payload"]
    Payload,
    #[iden = "status"]
    Status,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "confirmed_at"]
    ConfirmedAt,
    #[iden = "block_number"]
    BlockNumber,
    #[iden = "gas_used"]
    GasUsed,
    #[iden = "error_message"]
    ErrorMessage,
    #[iden = "poll_attempts"]
    PollAttempts,
}

pub const CREATE_BLOCKCHAIN_RECORDS_TABLE_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS blockchain_records (
    record_id TEXT PRIMARY KEY,
    shipment_id TEXT NOT NULL,
    tx_hash TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    confirmed_at TEXT,
    block_number INTEGER,
    gas_used INTEGER,
    error_message TEXT,
    poll_attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_blockchain_records_status ON blockchain_records(status);
"#;

pub const CREATE_BLOCKCHAIN_RECORDS_TABLE_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS blockchain_records (
    record_id UUID PRIMARY KEY,
    shipment_id UUID NOT NULL,
    tx_hash TEXT NOT NULL,
    payload JSONB NOT NULL,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    confirmed_at TIMESTAMPTZ,
    block_number BIGINT,
    gas_used BIGINT,
    error_message TEXT,
    poll_attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_blockchain_records_status ON blockchain_records(status);
"#;

#[async_trait]
pub trait BlockchainStore: Send + Sync {
    async fn insert(&self, record: &BlockchainRecord) -> Result<()>;
    async fn update(&self, record: &BlockchainRecord) -> Result<()>;
    async fn get(&self, record_id: Uuid) -> Result<Option<BlockchainRecord>>;
    /// Records still in `Pending` status, for the confirmation monitor's
    /// poll batch.
    async fn get_pending(&self, limit: u32) -> Result<Vec<BlockchainRecord>>;
}

fn status_from_str(raw: &str) -> TransactionStatus {
    match raw {
        "confirmed" => TransactionStatus::Confirmed,
        "failed" => TransactionStatus::Failed,
        "dropped" => TransactionStatus::Dropped,
        _ => TransactionStatus::Pending,
    }
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use chrono::{DateTime, Utc};
    use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
    use sqlx::{Row, SqlitePool};

    pub struct SqliteBlockchainStore {
        pool: SqlitePool,
    }

    impl SqliteBlockchainStore {
        pub async fn connect(database_url: &str) -> Result<Self> {
            let pool = SqlitePool::connect(database_url)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            let store = Self { pool };
            store.init().await?;
            Ok(store)
        }

        pub fn new(pool: SqlitePool) -> Self {
            Self { pool }
        }

        pub async fn init(&self) -> Result<()> {
            sqlx::query(CREATE_BLOCKCHAIN_RECORDS_TABLE_SQLITE)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            Ok(())
        }

        fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<BlockchainRecord> {
            let status_str: String = row.get("status");
            Ok(BlockchainRecord {
                record_id: Uuid::parse_str(row.get("record_id"))
                    .map_err(|e| crate::store::StoreError::InvalidTimestamp(e.to_string()))?,
                shipment_id: Uuid::parse_str(row.get("shipment_id"))
                    .map_err(|e| crate::store::StoreError::InvalidTimestamp(e.to_string()))?,
                tx_hash: row.get("tx_hash"),
                payload: serde_json::from_str(row.get("payload"))?,
                status: status_from_str(&status_str),
                created_at: parse_ts(row.get("created_at"))?,
                confirmed_at: row
                    .get::<Option<String>, _>("confirmed_at")
                    .map(|s| parse_ts(&s))
                    .transpose()?,
                block_number: row.get::<Option<i64>, _>("block_number").map(|n| n as u64),
                gas_used: row.get::<Option<i64>, _>("gas_used").map(|n| n as u64),
                error_message: row.get("error_message"),
                poll_attempts: row.get::<i64, _>("poll_attempts") as u32,
            })
        }
    }

    fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| crate::store::StoreError::InvalidTimestamp(e.to_string()))
    }

    #[async_trait]
    impl BlockchainStore for SqliteBlockchainStore {
        async fn insert(&self, record: &BlockchainRecord) -> Result<()> {
            let query = Query::insert()
                .into_table(BlockchainRecords::Table)
                .columns([
                    BlockchainRecords::RecordId,
                    BlockchainRecords::ShipmentId,
                    BlockchainRecords::TxHash,
                    BlockchainRecords::Payload,
                    BlockchainRecords::Status,
                    BlockchainRecords::CreatedAt,
                    BlockchainRecords::ConfirmedAt,
                    BlockchainRecords::BlockNumber,
                    BlockchainRecords::GasUsed,
                    BlockchainRecords::ErrorMessage,
                    BlockchainRecords::PollAttempts,
                ])
                .values_panic([
                    record.record_id.to_string().into(),
                    record.shipment_id.to_string().into(),
                    record.tx_hash.clone().into(),
                    serde_json::to_string(&record.payload)?.into(),
                    record.status.as_str().into(),
                    record.created_at.to_rfc3339().into(),
                    record.confirmed_at.map(|t| t.to_rfc3339()).into(),
                    record.block_number.map(|n| n as i64).into(),
                    record.gas_used.map(|n| n as i64).into(),
                    record.error_message.clone().into(),
                    (record.poll_attempts as i64).into(),
                ])
                .to_string(SqliteQueryBuilder);

            sqlx::query(&query)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            Ok(())
        }

        async fn update(&self, record: &BlockchainRecord) -> Result<()> {
            let query = "UPDATE blockchain_records SET status = ?, confirmed_at = ?, block_number = ?, \
                gas_used = ?, error_message = ?, poll_attempts = ? WHERE record_id = ?";

            sqlx::query(query)
                .bind(record.status.as_str())
                .bind(record.confirmed_at.map(|t| t.to_rfc3339()))
                .bind(record.block_number.map(|n| n as i64))
                .bind(record.gas_used.map(|n| n as i64))
                .bind(&record.error_message)
                .bind(record.poll_attempts as i64)
                .bind(record.record_id.to_string())
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            Ok(())
        }

        async fn get(&self, record_id: Uuid) -> Result<Option<BlockchainRecord>> {
            let query = Query::select()
                .column(sea_query::Asterisk)
                .from(BlockchainRecords::Table)
                .and_where(Expr::col(BlockchainRecords::RecordId).eq(record_id.to_string()))
                .to_string(SqliteQueryBuilder);

            let row = sqlx::query(&query)
                .fetch_optional(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            row.as_ref().map(Self::row_to_record).transpose()
        }

        async fn get_pending(&self, limit: u32) -> Result<Vec<BlockchainRecord>> {
            let query = Query::select()
                .column(sea_query::Asterisk)
                .from(BlockchainRecords::Table)
                .and_where(Expr::col(BlockchainRecords::Status).eq(TransactionStatus::Pending.as_str()))
                .order_by(BlockchainRecords::CreatedAt, Order::Asc)
                .limit(limit as u64)
                .to_string(SqliteQueryBuilder);

            let rows = sqlx::query(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            rows.iter().map(Self::row_to_record).collect()
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[tokio::test]
        async fn insert_then_get_round_trips() {
            let store = SqliteBlockchainStore::connect("sqlite::memory:").await.unwrap();
            let record = BlockchainRecord::new(Uuid::new_v4(), "0xabc".to_string(), json!({"k": "v"}));
            store.insert(&record).await.unwrap();

            let fetched = store.get(record.record_id).await.unwrap().unwrap();
            assert_eq!(fetched.tx_hash, "0xabc");
            assert_eq!(fetched.status, TransactionStatus::Pending);
        }

        #[tokio::test]
        async fn get_pending_excludes_confirmed_records() {
            let store = SqliteBlockchainStore::connect("sqlite::memory:").await.unwrap();
            let pending = BlockchainRecord::new(Uuid::new_v4(), "0x1".to_string(), json!({}));
            let mut confirmed = BlockchainRecord::new(Uuid::new_v4(), "0x2".to_string(), json!({}));
            confirmed.confirm(1, 21000, Utc::now());

            store.insert(&pending).await.unwrap();
            store.insert(&confirmed).await.unwrap();
            store.update(&confirmed).await.unwrap();

            let found = store.get_pending(10).await.unwrap();
            assert_eq!(found.len(), 1);
            assert_eq!(found[0].record_id, pending.record_id);
        }
    }
}

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use chrono::{DateTime, Utc};
    use sea_query::{Expr, Order, PostgresQueryBuilder, Query};
    use sqlx::{PgPool, Row};

    pub struct PostgresBlockchainStore {
        pool: PgPool,
    }

    impl PostgresBlockchainStore {
        pub async fn connect(database_url: &str) -> Result<Self> {
            let pool = PgPool::connect(database_url)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            let store = Self { pool };
            store.init().await?;
            Ok(store)
        }

        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }

        pub async fn init(&self) -> Result<()> {
            sqlx::query(CREATE_BLOCKCHAIN_RECORDS_TABLE_POSTGRES)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            Ok(())
        }

        fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<BlockchainRecord> {
            let status_str: String = row.get("status");
            Ok(BlockchainRecord {
                record_id: row.get("record_id"),
                shipment_id: row.get("shipment_id"),
                tx_hash: row.get("tx_hash"),
                payload: row.get("payload"),
                status: status_from_str(&status_str),
                created_at: row.get("created_at"),
                confirmed_at: row.get::<Option<DateTime<Utc>>, _>("confirmed_at"),
                block_number: row.get::<Option<i64>, _>("block_number").map(|n| n as u64),
                gas_used: row.get::<Option<i64>, _>("gas_used").map(|n| n as u64),
                error_message: row.get("error_message"),
                poll_attempts: row.get::<i32, _>("poll_attempts") as u32,
            })
        }
    }

    #[async_trait]
    impl BlockchainStore for PostgresBlockchainStore {
        async fn insert(&self, record: &BlockchainRecord) -> Result<()> {
            let query = "INSERT INTO blockchain_records \
                (record_id, shipment_id, tx_hash, payload, status, created_at, confirmed_at, block_number, gas_used, error_message, poll_attempts) \
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

            sqlx::query(query)
                .bind(record.record_id)
                .bind(record.shipment_id)
                .bind(&record.tx_hash)
                .bind(&record.payload)
                .bind(record.status.as_str())
                .bind(record.created_at)
                .bind(record.confirmed_at)
                .bind(record.block_number.map(|n| n as i64))
                .bind(record.gas_used.map(|n| n as i64))
                .bind(&record.error_message)
                .bind(record.poll_attempts as i32)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            Ok(())
        }

        async fn update(&self, record: &BlockchainRecord) -> Result<()> {
            let query = "UPDATE blockchain_records SET status = $1, confirmed_at = $2, block_number = $3, \
                gas_used = $4, error_message = $5, poll_attempts = $6 WHERE record_id = $7";

            sqlx::query(query)
                .bind(record.status.as_str())
                .bind(record.confirmed_at)
                .bind(record.block_number.map(|n| n as i64))
                .bind(record.gas_used.map(|n| n as i64))
                .bind(&record.error_message)
                .bind(record.poll_attempts as i32)
                .bind(record.record_id)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            Ok(())
        }

        async fn get(&self, record_id: Uuid) -> Result<Option<BlockchainRecord>> {
            let row = sqlx::query("SELECT * FROM blockchain_records WHERE record_id = $1")
                .bind(record_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            row.as_ref().map(Self::row_to_record).transpose()
        }

        async fn get_pending(&self, limit: u32) -> Result<Vec<BlockchainRecord>> {
            let query = Query::select()
                .column(sea_query::Asterisk)
                .from(BlockchainRecords::Table)
                .and_where(Expr::col(BlockchainRecords::Status).eq(TransactionStatus::Pending.as_str()))
                .order_by(BlockchainRecords::CreatedAt, Order::Asc)
                .limit(limit as u64)
                .to_string(PostgresQueryBuilder);

            let rows = sqlx::query(&query)
                .fetch_all(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            rows.iter().map(Self::row_to_record).collect()
        }
    }
}
