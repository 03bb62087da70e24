//! SQLite clip store, the persistence sink behind the dispatcher.
//!
//! Connections are opened per operation inside `spawn_blocking`; write
//! volume is one row per dispatched clip, so connection reuse buys nothing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cm_core::ClipAction;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Clone)]
pub struct ClipStore {
    db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipRecord {
    pub id: String,
    pub stream_id: String,
    pub message_id: String,
    pub moderator: String,
    pub command: String,
    pub event_time: DateTime<Utc>,
    pub target_time: DateTime<Utc>,
    pub channel_name: String,
    pub sheet_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ClipStore {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create data dir {}", parent.display()))?;
        }
        let store = Self { db_path };
        let path = store.db_path.clone();
        tokio::task::spawn_blocking(move || ensure_schema(&path)).await??;
        Ok(store)
    }

    /// Insert one dispatched clip. Keyed on the upstream message id, so a
    /// replayed dispatch of the same command is a no-op; returns whether a
    /// row was actually written.
    pub async fn insert_clip(&self, action: &ClipAction) -> Result<bool> {
        let path = self.db_path.clone();
        let action = action.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            let changed = conn.execute(
                r#"
INSERT OR IGNORE INTO clips (
    id,
    stream_id,
    message_id,
    moderator,
    command,
    event_time,
    target_time,
    channel_name,
    sheet_id,
    created_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
"#,
                params![
                    action.id.to_string(),
                    action.stream_id.as_str(),
                    action.message_id.as_str(),
                    action.moderator,
                    action.command,
                    action.event_time.to_rfc3339(),
                    action.target_time.to_rfc3339(),
                    action.routing.channel_name,
                    action.routing.sheet_id,
                    action.created_at.to_rfc3339(),
                ],
            )?;
            Ok::<_, anyhow::Error>(changed > 0)
        })
        .await?
    }

    pub async fn recent_clips(&self, limit: usize) -> Result<Vec<ClipRecord>> {
        let path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)?;
            let mut stmt = conn.prepare(
                r#"
SELECT id, stream_id, message_id, moderator, command,
       event_time, target_time, channel_name, sheet_id, created_at
  FROM clips
 ORDER BY created_at DESC
 LIMIT ?1
"#,
            )?;
            let rows = stmt.query_map(params![limit as i64], |row| {
                Ok(RawClipRow {
                    id: row.get(0)?,
                    stream_id: row.get(1)?,
                    message_id: row.get(2)?,
                    moderator: row.get(3)?,
                    command: row.get(4)?,
                    event_time: row.get(5)?,
                    target_time: row.get(6)?,
                    channel_name: row.get(7)?,
                    sheet_id: row.get(8)?,
                    created_at: row.get(9)?,
                })
            })?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row?.into_record()?);
            }
            Ok::<_, anyhow::Error>(out)
        })
        .await?
    }
}

struct RawClipRow {
    id: String,
    stream_id: String,
    message_id: String,
    moderator: String,
    command: String,
    event_time: String,
    target_time: String,
    channel_name: String,
    sheet_id: Option<String>,
    created_at: String,
}

impl RawClipRow {
    fn into_record(self) -> Result<ClipRecord> {
        Ok(ClipRecord {
            id: self.id,
            stream_id: self.stream_id,
            message_id: self.message_id,
            moderator: self.moderator,
            command: self.command,
            event_time: parse_stored_time(&self.event_time)?,
            target_time: parse_stored_time(&self.target_time)?,
            channel_name: self.channel_name,
            sheet_id: self.sheet_id,
            created_at: parse_stored_time(&self.created_at)?,
        })
    }
}

fn parse_stored_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("malformed stored timestamp {value:?}"))
}

fn ensure_schema(path: &Path) -> Result<()> {
    let conn = Connection::open(path)?;
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS clips (
    id TEXT PRIMARY KEY,
    stream_id TEXT NOT NULL,
    message_id TEXT NOT NULL UNIQUE,
    moderator TEXT NOT NULL,
    command TEXT NOT NULL,
    event_time TEXT NOT NULL,
    target_time TEXT NOT NULL,
    channel_name TEXT NOT NULL,
    sheet_id TEXT,
    created_at TEXT NOT NULL
)
"#,
        [],
    )?;
    Ok(())
}
