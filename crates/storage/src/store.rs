//! SQLite stores for the call log and the tool descriptor cache.

use crate::{CallRecord, CallStatus, Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use uuid::Uuid;

fn open(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

/// Per-conversation totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub calls: u64,
    pub failures: u64,
    pub first_call: DateTime<Utc>,
    pub last_call: DateTime<Utc>,
}

/// Append-only log of tool calls.
pub struct CallLogStore {
    conn: Connection,
}

impl CallLogStore {
    /// Open or create a call log at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self { conn: open(path)? };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS call_log (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                service TEXT,
                tool TEXT NOT NULL,
                request_payload TEXT NOT NULL,
                response_payload TEXT,
                status INTEGER NOT NULL,
                error_message TEXT,
                duration_ms INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_call_log_conversation
                ON call_log(conversation_id, created_at);
            "#,
        )?;
        Ok(())
    }

    pub fn append(&self, record: &CallRecord) -> Result<()> {
        self.conn.execute(
            "INSERT INTO call_log (id, conversation_id, service, tool, request_payload,
                response_payload, status, error_message, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id.to_string(),
                record.conversation_id,
                record.service,
                record.tool,
                record.request_payload,
                record.response_payload,
                record.status.code(),
                record.error_message,
                i64::try_from(record.duration_ms).unwrap_or(i64::MAX),
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All calls of one conversation, oldest first.
    pub fn load_conversation(&self, conversation_id: &str) -> Result<Vec<CallRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, service, tool, request_payload, response_payload,
                    status, error_message, duration_ms, created_at
             FROM call_log WHERE conversation_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([conversation_id], RawRecord::from_row)?;
        rows.map(|row| row?.into_record()).collect()
    }

    /// Most recent calls across all conversations, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<CallRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, conversation_id, service, tool, request_payload, response_payload,
                    status, error_message, duration_ms, created_at
             FROM call_log ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map([limit], RawRecord::from_row)?;
        rows.map(|row| row?.into_record()).collect()
    }

    /// One summary per conversation, most recently active first.
    pub fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT conversation_id, COUNT(*), SUM(CASE WHEN status = 1 THEN 0 ELSE 1 END),
                    MIN(created_at), MAX(created_at)
             FROM call_log GROUP BY conversation_id ORDER BY MAX(created_at) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        rows.map(|row| {
            let (conversation_id, calls, failures, first, last) = row?;
            Ok(ConversationSummary {
                conversation_id,
                calls: calls.max(0) as u64,
                failures: failures.max(0) as u64,
                first_call: parse_time("call_log", &first)?,
                last_call: parse_time("call_log", &last)?,
            })
        })
        .collect()
    }
}

struct RawRecord {
    id: String,
    conversation_id: String,
    service: Option<String>,
    tool: String,
    request_payload: String,
    response_payload: Option<String>,
    status: i64,
    error_message: Option<String>,
    duration_ms: i64,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            service: row.get(2)?,
            tool: row.get(3)?,
            request_payload: row.get(4)?,
            response_payload: row.get(5)?,
            status: row.get(6)?,
            error_message: row.get(7)?,
            duration_ms: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<CallRecord> {
        let corrupt = |reason: String| Error::Corrupt {
            table: "call_log",
            reason,
        };
        Ok(CallRecord {
            id: Uuid::parse_str(&self.id).map_err(|e| corrupt(format!("id {}: {e}", self.id)))?,
            status: CallStatus::from_code(self.status)
                .ok_or_else(|| corrupt(format!("unknown status {}", self.status)))?,
            created_at: parse_time("call_log", &self.created_at)?,
            conversation_id: self.conversation_id,
            service: self.service,
            tool: self.tool,
            request_payload: self.request_payload,
            response_payload: self.response_payload,
            error_message: self.error_message,
            duration_ms: self.duration_ms.max(0) as u64,
        })
    }
}

fn parse_time(table: &'static str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Corrupt {
            table,
            reason: format!("timestamp {value}: {e}"),
        })
}

/// Tool descriptors last fetched from each service, stored as JSON.
pub struct ToolCacheStore {
    conn: Connection,
}

impl ToolCacheStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = Self { conn: open(path)? };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tool_cache (
                service TEXT PRIMARY KEY,
                tools TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Cached descriptors for `service`, if any were stored.
    pub fn get(&self, service: &str) -> Result<Option<serde_json::Value>> {
        let tools: Option<String> = self
            .conn
            .query_row(
                "SELECT tools FROM tool_cache WHERE service = ?1",
                [service],
                |row| row.get(0),
            )
            .optional()?;
        match tools {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Replace the cached descriptors for `service`.
    pub fn put(&self, service: &str, tools: &serde_json::Value) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tool_cache (service, tools, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(service) DO UPDATE SET tools = excluded.tools,
                                                updated_at = excluded.updated_at",
            params![service, serde_json::to_string(tools)?, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Forget `service`. Returns whether anything was cached.
    pub fn clear(&self, service: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM tool_cache WHERE service = ?1", [service])?;
        Ok(removed > 0)
    }
}
