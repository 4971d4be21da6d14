//! SQLite pool construction and schema bootstrap.
//!
//! The database is the sole coordination point of the system: row-level
//! write locks inside transactions plus the unique indexes declared in
//! [`schema`] resolve all cross-request races.

pub mod schema;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::error::Result;

/// Connect to a SQLite database.
pub async fn connect(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Connect to an in-memory database for tests and embedded use.
///
/// A single connection is required: every pooled connection to
/// `sqlite::memory:` would otherwise see its own private database.
pub async fn connect_memory() -> Result<SqlitePool> {
    connect("sqlite::memory:", 1).await
}

/// Initialize the database schema.
///
/// Some DDL blocks hold a table plus its indexes, so they go through
/// `raw_sql`, which runs multiple statements.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in schema::ALL_TABLES {
        sqlx::raw_sql(ddl).execute(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let pool = connect_memory().await.unwrap();
        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
