//! Connection pool and schema migrations.

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Sqlite, Transaction};
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;

/// Handle to the backing store. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

/// A transaction that reads before it writes. Only one is open at a time
/// per [`Database`], so SQLite never has to upgrade two read locks at once.
pub struct WriteTransaction {
    tx: Transaction<'static, Sqlite>,
    _writer: OwnedMutexGuard<()>,
}

impl WriteTransaction {
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

impl Deref for WriteTransaction {
    type Target = SqliteConnection;
    fn deref(&self) -> &SqliteConnection { &self.tx }
}

impl DerefMut for WriteTransaction {
    fn deref_mut(&mut self) -> &mut SqliteConnection { &mut self.tx }
}

impl Database {
    /// Opens (creating if needed) the database at `url` and applies migrations.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
        let db = Self::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// A private in-memory database. Every connection to `sqlite::memory:`
    /// is its own database, so the pool holds exactly one that never expires.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let db = Self::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    fn from_pool(pool: SqlitePool) -> Self { Self { pool, writer: Arc::new(Mutex::new(())) } }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::debug!("storefront migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool { &self.pool }

    /// Waits for any other writer on this handle, then begins.
    pub async fn begin_write(&self) -> Result<WriteTransaction> {
        let writer = self.writer.clone().lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(WriteTransaction { tx, _writer: writer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_has_schema() {
        let db = Database::in_memory().await.unwrap();
        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' AND name != 'sqlite_sequence' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(tables, ["cart_meta", "carts", "field_attributes", "fields", "item_overrides", "items", "sale_meta", "sales"]);
    }

    #[tokio::test]
    async fn test_file_database_uses_wal() {
        let path = std::env::temp_dir().join(format!("storefront-{}.db", uuid::Uuid::new_v4().simple()));
        let db = Database::connect(&format!("sqlite://{}", path.display()), 2).await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode").fetch_one(db.pool()).await.unwrap();
        assert_eq!(mode, "wal");
        db.pool().close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_write_transactions_take_turns() {
        let db = Database::in_memory().await.unwrap();
        let first = db.begin_write().await.unwrap();
        assert!(db.writer.try_lock().is_err());
        first.commit().await.unwrap();
        assert!(db.writer.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_migrate_is_repeatable() {
        let db = Database::in_memory().await.unwrap();
        db.migrate().await.unwrap();
    }
}
