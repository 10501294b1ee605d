//! SQLite implementation of the durable traits.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use mnemo_common::{MnemoError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::durable::{MemoryStore, SessionRepository};
use crate::types::{MemoryRecord, SessionRecord};

fn store_err(op: &str, e: sqlx::Error) -> MnemoError {
    MnemoError::Store(format!("{op} failed: {e}"))
}

/// Fixed-width UTC timestamps so that string order matches time order in SQL.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MnemoError::Store(format!("bad timestamp {raw:?}: {e}")))
}

fn memory_from_row(row: &SqliteRow) -> Result<MemoryRecord> {
    let created: String = row.try_get("created_at").map_err(|e| store_err("decode", e))?;
    let updated: String = row.try_get("updated_at").map_err(|e| store_err("decode", e))?;
    Ok(MemoryRecord {
        id: row.try_get("id").map_err(|e| store_err("decode", e))?,
        user_id: row.try_get("user_id").map_err(|e| store_err("decode", e))?,
        key: row.try_get("key").map_err(|e| store_err("decode", e))?,
        value: row.try_get("value").map_err(|e| store_err("decode", e))?,
        created_at: decode_ts(&created)?,
        updated_at: decode_ts(&updated)?,
    })
}

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord> {
    let created: String = row.try_get("created_at").map_err(|e| store_err("decode", e))?;
    let expires: String = row.try_get("expires_at").map_err(|e| store_err("decode", e))?;
    Ok(SessionRecord {
        session_id: row.try_get("session_id").map_err(|e| store_err("decode", e))?,
        user_id: row.try_get("user_id").map_err(|e| store_err("decode", e))?,
        created_at: decode_ts(&created)?,
        expires_at: decode_ts(&expires)?,
    })
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) and migrate the database.
    ///
    /// `sqlite::memory:` URLs get a single connection that is never recycled,
    /// since every new connection would see an empty database.
    pub async fn connect(database_url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| store_err("parse database url", e))?
            .create_if_missing(true);

        let pool_options = SqlitePoolOptions::new().acquire_timeout(timeout);
        let pool_options = if database_url.contains(":memory:") {
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(max_connections.max(1))
        };

        let pool = tokio::time::timeout(timeout, pool_options.connect_with(options))
            .await
            .map_err(|_| MnemoError::Store(format!("database connect timed out after {timeout:?}")))?
            .map_err(|e| store_err("connect", e))?;

        let store = Self { pool };
        store.migrate().await?;
        info!(database_url, "Durable store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                user_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS memories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_memories_user_key ON memories(user_id, key)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| store_err("migrate", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for SqliteStore {
    async fn query_by_user(&self, user_id: i64) -> Result<Vec<MemoryRecord>> {
        let rows = sqlx::query(
            "SELECT id, user_id, key, value, created_at, updated_at
             FROM memories WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("query memories", e))?;

        rows.iter().map(memory_from_row).collect()
    }

    async fn get(&self, user_id: i64, key: &str) -> Result<Option<MemoryRecord>> {
        let row = sqlx::query(
            "SELECT id, user_id, key, value, created_at, updated_at
             FROM memories WHERE user_id = ? AND key = ? ORDER BY id LIMIT 1",
        )
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("get memory", e))?;

        row.as_ref().map(memory_from_row).transpose()
    }

    async fn upsert(&self, user_id: i64, key: &str, value: &str) -> Result<()> {
        let now = encode_ts(Utc::now());
        let mut tx = self.pool.begin().await.map_err(|e| store_err("begin", e))?;

        let existing: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM memories WHERE user_id = ? AND key = ? ORDER BY id LIMIT 1",
        )
        .bind(user_id)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| store_err("lookup memory", e))?;

        match existing {
            Some(id) => {
                sqlx::query("UPDATE memories SET value = ?, updated_at = ? WHERE id = ?")
                    .bind(value)
                    .bind(&now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| store_err("update memory", e))?;
            }
            None => {
                sqlx::query(
                    "INSERT INTO memories (user_id, key, value, created_at, updated_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(user_id)
                .bind(key)
                .bind(value)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(|e| store_err("insert memory", e))?;
            }
        }

        tx.commit().await.map_err(|e| store_err("commit", e))?;
        debug!(user_id, key, "Memory upserted");
        Ok(())
    }

    async fn delete(&self, user_id: i64, key: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM memories WHERE user_id = ? AND key = ?")
            .bind(user_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("delete memory", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM memories WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("delete memories", e))?;
        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("health check", e))?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for SqliteStore {
    async fn find_active(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            "SELECT session_id, user_id, created_at, expires_at
             FROM sessions WHERE session_id = ? AND expires_at > ?",
        )
        .bind(session_id)
        .bind(encode_ts(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("find session", e))?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn upsert_session(
        &self,
        session_id: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<SessionRecord> {
        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO sessions (session_id, user_id, created_at, expires_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                user_id = excluded.user_id,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at",
        )
        .bind(session_id)
        .bind(user_id)
        .bind(encode_ts(created_at))
        .bind(encode_ts(expires_at))
        .execute(&self.pool)
        .await
        .map_err(|e| store_err("upsert session", e))?;

        Ok(SessionRecord {
            session_id: session_id.to_string(),
            user_id,
            created_at,
            expires_at,
        })
    }

    async fn extend(&self, session_id: &str, expires_at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query("UPDATE sessions SET expires_at = ? WHERE session_id = ?")
            .bind(encode_ts(expires_at))
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("extend session", e))?;
        Ok(result.rows_affected() > 0)
    }
}
