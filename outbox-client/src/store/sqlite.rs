//! SQLite tier of the durable store.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;

use outbox_types::{ContextId, MessageId, MessagePayload, MessageStatus, QueuedMessage};

use super::{DurableStore, StorageUsage, StoreTier};
use crate::error::StorageError;

/// SQLite-backed message store.
///
/// Uses WAL mode so several contexts can open the same file. Clones share
/// the pool and the schema guard.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    schema: Arc<OnceCell<()>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and set up the schema.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        };
        store.init().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        };
        store.init().await?;
        Ok(store)
    }

    /// Set up the schema. Runs once per store; later calls are no-ops.
    pub async fn init(&self) -> Result<(), StorageError> {
        self.schema
            .get_or_try_init(|| self.run_migrations())
            .await?;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_messages (
                id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_attempt_at INTEGER,
                offline INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_leases (
                name TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        // Create indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_outbox_status ON outbox_messages(status)")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_outbox_created_at ON outbox_messages(created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        tracing::debug!("Outbox schema ready");
        Ok(())
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    fn tier(&self) -> StoreTier {
        StoreTier::Primary
    }

    async fn put(&self, record: &QueuedMessage) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&record.payload)?;

        sqlx::query(
            r#"
            INSERT INTO outbox_messages
                (id, payload, created_at, status, retry_count, last_attempt_at, offline, last_error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                payload = excluded.payload,
                created_at = excluded.created_at,
                status = excluded.status,
                retry_count = excluded.retry_count,
                last_attempt_at = excluded.last_attempt_at,
                offline = excluded.offline,
                last_error = excluded.last_error
            "#,
        )
        .bind(record.id.as_str())
        .bind(payload)
        .bind(record.created_at)
        .bind(record.status.as_str())
        .bind(record.retry_count as i64)
        .bind(record.last_attempt_at)
        .bind(record.offline)
        .bind(record.last_error.as_deref())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    async fn get(&self, id: &MessageId) -> Result<Option<QueuedMessage>, StorageError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, payload, created_at, status, retry_count, last_attempt_at, offline, last_error
            FROM outbox_messages
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    async fn get_all_by_status(
        &self,
        status: MessageStatus,
    ) -> Result<Vec<QueuedMessage>, StorageError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, payload, created_at, status, retry_count, last_attempt_at, offline, last_error
            FROM outbox_messages
            WHERE status = ?1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn all(&self) -> Result<Vec<QueuedMessage>, StorageError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, payload, created_at, status, retry_count, last_attempt_at, offline, last_error
            FROM outbox_messages
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.into_iter().map(|row| row.try_into()).collect()
    }

    async fn delete(&self, id: &MessageId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM outbox_messages WHERE id = ?1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM outbox_messages")
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn try_acquire_lease(
        &self,
        name: &str,
        holder: ContextId,
        now: i64,
        ttl_ms: i64,
    ) -> Result<bool, StorageError> {
        // Single upsert: the update only applies when the caller already
        // holds the lease or the current one has expired.
        let result = sqlx::query(
            r#"
            INSERT INTO outbox_leases (name, holder, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                holder = excluded.holder,
                expires_at = excluded.expires_at
            WHERE outbox_leases.holder = excluded.holder
               OR outbox_leases.expires_at <= ?4
            "#,
        )
        .bind(name)
        .bind(holder.to_string())
        .bind(now.saturating_add(ttl_ms))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_lease(&self, name: &str, holder: ContextId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM outbox_leases WHERE name = ?1 AND holder = ?2")
            .bind(name)
            .bind(holder.to_string())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        Ok(())
    }

    async fn usage(&self) -> Result<StorageUsage, StorageError> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        let max_page_count: i64 = sqlx::query_scalar("PRAGMA max_page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(StorageUsage {
            used_bytes: (page_count.max(0) as u64).saturating_mul(page_size.max(0) as u64),
            quota_bytes: Some(
                (max_page_count.max(0) as u64).saturating_mul(page_size.max(0) as u64),
            ),
        })
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: String,
    payload: String,
    created_at: i64,
    status: String,
    retry_count: i64,
    last_attempt_at: Option<i64>,
    offline: bool,
    last_error: Option<String>,
}

impl TryFrom<MessageRow> for QueuedMessage {
    type Error = StorageError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let payload: MessagePayload = serde_json::from_str(&row.payload)?;
        Ok(QueuedMessage {
            id: MessageId::new(row.id)?,
            payload,
            created_at: row.created_at,
            status: row.status.parse()?,
            retry_count: row.retry_count.clamp(0, u32::MAX as i64) as u32,
            last_attempt_at: row.last_attempt_at,
            offline: row.offline,
            last_error: row.last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, created_at: i64) -> QueuedMessage {
        QueuedMessage::new(
            MessageId::new(id).unwrap(),
            MessagePayload::chat(format!("text {}", id), created_at),
            created_at,
            true,
        )
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut rec = record("m1", 10);
        rec.last_error = Some("503".into());
        rec.last_attempt_at = Some(11);
        rec.retry_count = 2;

        store.put(&rec).await.unwrap();
        let loaded = store.get(&rec.id).await.unwrap().unwrap();

        assert_eq!(loaded, rec);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = SqliteStore::in_memory().await.unwrap();
        let missing = store.get(&MessageId::new("nope").unwrap()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn put_replaces_by_id() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut rec = record("m1", 10);
        store.put(&rec).await.unwrap();

        rec.status = MessageStatus::Sending;
        store.put(&rec).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, MessageStatus::Sending);
    }

    #[tokio::test]
    async fn get_all_by_status_orders_by_created_at() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(&record("c", 30)).await.unwrap();
        store.put(&record("a", 10)).await.unwrap();
        let mut failed = record("b", 20);
        failed.status = MessageStatus::Failed;
        store.put(&failed).await.unwrap();

        let pending = store.get_all_by_status(MessageStatus::Pending).await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let failed = store.get_all_by_status(MessageStatus::Failed).await.unwrap();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(&record("a", 1)).await.unwrap();
        store.put(&record("b", 2)).await.unwrap();

        store.delete(&MessageId::new("a").unwrap()).await.unwrap();
        store.delete(&MessageId::new("ghost").unwrap()).await.unwrap();
        assert_eq!(store.all().await.unwrap().len(), 1);

        store.clear().await.unwrap();
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(&record("a", 1)).await.unwrap();

        store.init().await.unwrap();
        store.init().await.unwrap();

        assert_eq!(store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_expiry() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = ContextId::new();
        let b = ContextId::new();

        assert!(store.try_acquire_lease("drain", a, 1_000, 30_000).await.unwrap());
        assert!(!store.try_acquire_lease("drain", b, 2_000, 30_000).await.unwrap());
        // Renewal by the holder
        assert!(store.try_acquire_lease("drain", a, 2_000, 30_000).await.unwrap());
        // Expired (a renewed until 32_000)
        assert!(store.try_acquire_lease("drain", b, 32_000, 30_000).await.unwrap());
    }

    #[tokio::test]
    async fn release_only_by_holder() {
        let store = SqliteStore::in_memory().await.unwrap();
        let a = ContextId::new();
        let b = ContextId::new();
        store.try_acquire_lease("drain", a, 0, 30_000).await.unwrap();

        store.release_lease("drain", b).await.unwrap();
        assert!(!store.try_acquire_lease("drain", b, 1, 30_000).await.unwrap());

        store.release_lease("drain", a).await.unwrap();
        assert!(store.try_acquire_lease("drain", b, 1, 30_000).await.unwrap());
    }

    #[tokio::test]
    async fn file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.put(&record("m1", 5)).await.unwrap();
        }

        let reopened = SqliteStore::open(&path).await.unwrap();
        let all = reopened.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id.as_str(), "m1");
    }

    #[tokio::test]
    async fn usage_reports_pages() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.put(&record("m1", 5)).await.unwrap();

        let usage = store.usage().await.unwrap();
        assert!(usage.used_bytes > 0);
        assert!(usage.quota_bytes.unwrap() >= usage.used_bytes);
    }
}
