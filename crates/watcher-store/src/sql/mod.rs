//! Durable multi-tenant backend over `sqlx::AnyPool`.
//!
//! Queries are written with `?` placeholders and rewritten to `$n` for Postgres.

mod configs;
mod metrics;
mod rows;
mod schema;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::{StoreError, StoreOptions};

/// SQL flavour behind the `AnyPool`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Dialect::Postgres
        } else {
            Dialect::Sqlite
        }
    }

    /// Rewrite `?` placeholders into the dialect's bind syntax.
    pub fn sql(&self, query: &str) -> String {
        match self {
            Dialect::Sqlite => query.to_string(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(query.len() + 16);
                let mut index = 0;
                for ch in query.chars() {
                    if ch == '?' {
                        index += 1;
                        out.push('$');
                        out.push_str(&index.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }

    fn id_column(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Dialect::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }
}

pub struct SqlStore {
    pool: AnyPool,
    dialect: Dialect,
    options: StoreOptions,
}

impl SqlStore {
    pub fn new(pool: AnyPool, dialect: Dialect, options: StoreOptions) -> Self {
        Self {
            pool,
            dialect,
            options,
        }
    }

    /// Connect, create missing tables, and return a ready store.
    pub async fn connect(url: &str, options: StoreOptions) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new().max_connections(5).connect(url).await?;
        let store = Self::new(pool, Dialect::from_url(url), options);
        store.init_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn history_capacity(&self) -> i64 {
        i64::try_from(self.options.history_capacity).unwrap_or(i64::MAX)
    }

    fn read_limit(&self, limit: Option<usize>) -> i64 {
        let cap = self.options.history_capacity;
        let limit = limit.map(|l| l.min(cap)).unwrap_or(cap);
        i64::try_from(limit).unwrap_or(i64::MAX)
    }
}

pub(crate) fn to_db_int(value: u64, field: &str) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} {} exceeds the storable range", field, value)))
}

pub(crate) fn from_db_int(value: i64, field: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {} {}", field, value)))
}
