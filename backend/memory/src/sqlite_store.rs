/// SQLite-backed durable session log.
///
/// Messages are stored one row per entry in a `messages` table and read back
/// in insertion order. Rows are never updated; the only delete is an explicit
/// per-session clear.
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use confab_core::{Message, Role, SessionStore, StoreError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS messages (
         id          INTEGER PRIMARY KEY AUTOINCREMENT,
         session_id  TEXT NOT NULL,
         role        TEXT NOT NULL,
         content     TEXT NOT NULL,
         char_count  INTEGER NOT NULL,
         timestamp   TEXT NOT NULL,
         metadata    TEXT NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, id);";

pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
}

impl SqliteSessionStore {
    /// Create or open a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .context("Failed to open SQLite session database")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL journal")?;
        Self::init_schema(&conn)?;
        info!("SqliteSessionStore opened at {:?}", path.as_ref());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for tests and `:memory:` configs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize messages schema")
    }

    /// Sum of stored character counts, computed by SQLite.
    pub async fn total_characters(&self, session_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let total: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(char_count), 0) FROM messages WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .context("Failed to sum session characters")?;
        Ok(total.max(0) as usize)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn append(&self, session_id: &str, message: &Message) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let metadata = serde_json::to_string(&message.metadata)
            .context("Failed to encode message metadata")?;
        conn.execute(
            "INSERT INTO messages (session_id, role, content, char_count, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                message.role.as_str(),
                message.content,
                message.char_count as i64,
                message.timestamp.to_rfc3339(),
                metadata,
            ],
        )
        .context("Failed to append message")?;
        debug!(session_id, role = %message.role, chars = message.char_count, "Appended message");
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT role, content, char_count, timestamp, metadata
                 FROM messages WHERE session_id = ?1 ORDER BY id ASC",
            )
            .context("Failed to prepare history query")?;
        let rows = stmt
            .query_map(params![session_id], row_to_message)
            .context("Failed to query history")?;
        let messages = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to decode stored message")?;
        Ok(messages)
    }

    async fn clear(&self, session_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock().await;
        let deleted = conn
            .execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])
            .context("Failed to clear session")?;
        info!(session_id, deleted, "Cleared session log");
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Row deserialization helper
// ---------------------------------------------------------------------------

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role: String = row.get(0)?;
    let content: String = row.get(1)?;
    let char_count: i64 = row.get(2)?;
    let timestamp: String = row.get(3)?;
    let metadata: String = row.get(4)?;

    let role = Role::parse(&role).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, format!("unknown role '{role}'").into())
    })?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
    let metadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;

    Ok(Message {
        role,
        content,
        char_count: char_count.max(0) as usize,
        timestamp,
        metadata,
    })
}
