//! `NonceStore`: durable write-through mirror of the Nonce Manager's
//! in-process counters, so a restarted process can recover its last known
//! nonce without a guaranteed `get_transaction_count` round trip to the
//! chain. The in-process `AtomicU64` counters remain authoritative for the
//! hot path; this store is only consulted/updated on resync.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::Iden;

use super::Result;

#[derive(Iden)]
pub enum NonceState {
    Table,
    #[iden = "address"]
    Address,
    #[iden = "network"]
    Network,
    #[iden = "current_nonce"]
    CurrentNonce,
    #[iden = "last_updated"]
    LastUpdated,
}

pub const CREATE_NONCE_STATE_TABLE_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS nonce_state (
    address TEXT NOT NULL,
    network TEXT NOT NULL,
    current_nonce INTEGER NOT NULL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (address, network)
);
"#;

pub const CREATE_NONCE_STATE_TABLE_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS nonce_state (
    address TEXT NOT NULL,
    network TEXT NOT NULL,
    current_nonce BIGINT NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (address, network)
);
"#;

#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Persists `current_nonce` for `(address, network)`, overwriting
    /// whatever was recorded before. Called on every resync.
    async fn record(&self, address: &str, network: &str, current_nonce: u64) -> Result<()>;

    /// The last nonce persisted for `(address, network)`, or `None` if this
    /// pair has never been resynced in this store.
    async fn load(&self, address: &str, network: &str) -> Result<Option<u64>>;
}

#[cfg(feature = "sqlite")]
pub mod sqlite {
    use super::*;
    use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
    use sqlx::{Row, SqlitePool};

    pub struct SqliteNonceStore {
        pool: SqlitePool,
    }

    impl SqliteNonceStore {
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
            sqlx::query(CREATE_NONCE_STATE_TABLE_SQLITE)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            Ok(())
        }
    }

    #[async_trait]
    impl NonceStore for SqliteNonceStore {
        async fn record(&self, address: &str, network: &str, current_nonce: u64) -> Result<()> {
            let query = Query::insert()
                .into_table(NonceState::Table)
                .columns([NonceState::Address, NonceState::Network, NonceState::CurrentNonce, NonceState::LastUpdated])
                .values_panic([
                    address.into(),
                    network.into(),
                    (current_nonce as i64).into(),
                    Utc::now().to_rfc3339().into(),
                ])
                .on_conflict(
                    OnConflict::columns([NonceState::Address, NonceState::Network])
                        .update_columns([NonceState::CurrentNonce, NonceState::LastUpdated])
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder);

            sqlx::query(&query)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            Ok(())
        }

        async fn load(&self, address: &str, network: &str) -> Result<Option<u64>> {
            let query = Query::select()
                .column(NonceState::CurrentNonce)
                .from(NonceState::Table)
                .and_where(Expr::col(NonceState::Address).eq(address))
                .and_where(Expr::col(NonceState::Network).eq(network))
                .to_string(SqliteQueryBuilder);

            let row = sqlx::query(&query)
                .fetch_optional(&self.pool)
                .await
                .map_err(crate::store::StoreError::Sqlite)?;
            Ok(row.map(|r| r.get::<i64, _>("current_nonce") as u64))
        }
    }

}

#[cfg(feature = "postgres")]
pub mod postgres {
    use super::*;
    use sea_query::{Expr, OnConflict, PostgresQueryBuilder, Query};
    use sqlx::{PgPool, Row};

    pub struct PostgresNonceStore {
        pool: PgPool,
    }

    impl PostgresNonceStore {
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
            sqlx::query(CREATE_NONCE_STATE_TABLE_POSTGRES)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            Ok(())
        }
    }

    #[async_trait]
    impl NonceStore for PostgresNonceStore {
        async fn record(&self, address: &str, network: &str, current_nonce: u64) -> Result<()> {
            let query = Query::insert()
                .into_table(NonceState::Table)
                .columns([NonceState::Address, NonceState::Network, NonceState::CurrentNonce, NonceState::LastUpdated])
                .values_panic([
                    address.into(),
                    network.into(),
                    (current_nonce as i64).into(),
                    Utc::now().into(),
                ])
                .on_conflict(
                    OnConflict::columns([NonceState::Address, NonceState::Network])
                        .update_columns([NonceState::CurrentNonce, NonceState::LastUpdated])
                        .to_owned(),
                )
                .to_string(PostgresQueryBuilder);

            sqlx::query(&query)
                .execute(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            Ok(())
        }

        async fn load(&self, address: &str, network: &str) -> Result<Option<u64>> {
            let query = Query::select()
                .column(NonceState::CurrentNonce)
                .from(NonceState::Table)
                .and_where(Expr::col(NonceState::Address).eq(address))
                .and_where(Expr::col(NonceState::Network).eq(network))
                .to_string(PostgresQueryBuilder);

            let row = sqlx::query(&query)
                .fetch_optional(&self.pool)
                .await
                .map_err(crate::store::StoreError::Postgres)?;
            Ok(row.map(|r| r.get::<i64, _>("current_nonce") as u64))
        }
    }
}
