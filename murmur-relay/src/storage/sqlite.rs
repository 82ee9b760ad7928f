//! SQLite storage backend for murmur-relay.

use super::{MessageStore, PublicKeyStore, StoredMessage};
use crate::error::StorageError;
use async_trait::async_trait;
use murmur_types::{MessageId, UserId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// SQLite-based message and key storage.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open (or create) the database at `path`.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection: every :memory: connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Close every pooled connection. Later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Round-trip a trivial query to check the database answers.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id INTEGER NOT NULL,
                receiver_id INTEGER NOT NULL,
                content TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS public_keys (
                user_id INTEGER PRIMARY KEY,
                public_key TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_id, is_read)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair ON messages(sender_id, receiver_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }

    fn current_timestamp() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for SqliteStorage {
    async fn save(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<MessageId, StorageError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO messages (sender_id, receiver_id, content, created_at)
            VALUES (?1, ?2, ?3, ?4)
            RETURNING id
            "#,
        )
        .bind(sender.value())
        .bind(receiver.value())
        .bind(content)
        .bind(Self::current_timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(MessageId::new(id))
    }

    async fn fetch_unread(&self, user: UserId) -> Result<Vec<StoredMessage>, StorageError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender_id, receiver_id, content, is_read, created_at
            FROM messages
            WHERE receiver_id = ?1 AND is_read = 0
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user.value())
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }

    async fn mark_read(&self, id: MessageId) -> Result<bool, StorageError> {
        let result = sqlx::query("UPDATE messages SET is_read = 1 WHERE id = ?1")
            .bind(id.value())
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn conversation(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender_id, receiver_id, content, is_read, created_at
            FROM messages
            WHERE (sender_id = ?1 AND receiver_id = ?2)
               OR (sender_id = ?2 AND receiver_id = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?3
            "#,
        )
        .bind(a.value())
        .bind(b.value())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }
}

#[async_trait]
impl PublicKeyStore for SqliteStorage {
    async fn get(&self, user: UserId) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar::<_, String>("SELECT public_key FROM public_keys WHERE user_id = ?1")
            .bind(user.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Database)
    }

    async fn put(&self, user: UserId, public_key: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO public_keys (user_id, public_key, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET public_key = ?2, updated_at = ?3
            "#,
        )
        .bind(user.value())
        .bind(public_key)
        .bind(Self::current_timestamp())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(())
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    sender_id: i64,
    receiver_id: i64,
    content: String,
    is_read: bool,
    created_at: i64,
}

impl From<MessageRow> for StoredMessage {
    fn from(row: MessageRow) -> Self {
        StoredMessage {
            id: MessageId::new(row.id),
            sender_id: UserId::new(row.sender_id),
            receiver_id: UserId::new(row.receiver_id),
            content: row.content,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}
