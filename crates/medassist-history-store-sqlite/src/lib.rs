#![allow(clippy::missing_errors_doc)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use medassist_history_core::{
    format_rfc3339_millis, now_millis, EntryDraft, EntryStatus, HistoryEntry, ModuleKind,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

mod autosave;
pub mod service;

pub use autosave::{AutosavePolicy, AUTOSAVE_PREFERENCE_KEY};
pub use service::{
    HistoryConfig, HistoryService, Notification, NotificationLevel, Notifier, RecordOutcome,
    SubscriptionId, TracingNotifier,
};

const HISTORY_MIGRATION_VERSION: i64 = 1;

const SCHEMA_HISTORY_V1: &str = r"
CREATE TABLE IF NOT EXISTS history_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  timestamp INTEGER NOT NULL,
  module TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('pending', 'completed', 'error')),
  input_type TEXT NOT NULL DEFAULT '',
  input_summary TEXT NOT NULL DEFAULT '',
  output_summary TEXT NOT NULL DEFAULT '',
  full_input TEXT NOT NULL DEFAULT 'null',
  full_output TEXT NOT NULL DEFAULT 'null',
  error_details TEXT,
  CHECK ((status = 'error') = (error_details IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_history_entries_timestamp
  ON history_entries(timestamp DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_history_entries_module
  ON history_entries(module, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_history_entries_status
  ON history_entries(status, timestamp DESC);

CREATE TABLE IF NOT EXISTS preferences (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
";

const ENTRY_COLUMNS: &str = "id, timestamp, module, status, input_type, input_summary,
    output_summary, full_input, full_output, error_details";

/// Append-only log of module operations plus the key/value preference slot.
pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_HISTORY_V1)
            .context("failed to apply history schema")?;

        let now = format_rfc3339_millis(now_millis()).map_err(|err| anyhow!(err.to_string()))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![HISTORY_MIGRATION_VERSION, now],
            )
            .context("failed to register history schema migration")?;

        Ok(())
    }

    /// Validates `draft`, stamps it with the current time and stores it.
    pub fn append(&self, draft: &EntryDraft) -> Result<HistoryEntry> {
        draft
            .validate()
            .map_err(|err| anyhow!("entry validation failed: {err}"))?;

        let mut entry = HistoryEntry::from_draft(draft.clone(), now_millis());
        let id = insert_entry(&self.conn, &entry)?;
        entry.id = Some(id);

        tracing::debug!(id, module = %entry.module, status = entry.status.as_str(), "history entry appended");
        Ok(entry)
    }

    /// Newest first, at most `limit` entries.
    pub fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM history_entries
             ORDER BY timestamp DESC, id DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![sql_limit(limit)], parse_entry_row)?;
        collect_rows(rows)
    }

    /// The whole log, newest first.
    pub fn list_all(&self) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM history_entries
             ORDER BY timestamp DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], parse_entry_row)?;
        collect_rows(rows)
    }

    pub fn list_by_module(&self, module: ModuleKind, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM history_entries
             WHERE module = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![module.as_str(), sql_limit(limit)],
            parse_entry_row,
        )?;
        collect_rows(rows)
    }

    pub fn list_by_status(&self, status: EntryStatus, limit: usize) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM history_entries
             WHERE status = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            params![status.as_str(), sql_limit(limit)],
            parse_entry_row,
        )?;
        collect_rows(rows)
    }

    /// Both filters go into one query so `limit` counts only matching rows.
    pub fn list_by_module_and_status(
        &self,
        module: ModuleKind,
        status: EntryStatus,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM history_entries
             WHERE module = ?1 AND status = ?2
             ORDER BY timestamp DESC, id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(
            params![module.as_str(), status.as_str(), sql_limit(limit)],
            parse_entry_row,
        )?;
        collect_rows(rows)
    }

    pub fn get(&self, id: i64) -> Result<Option<HistoryEntry>> {
        self.conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM history_entries WHERE id = ?1"),
                params![id],
                parse_entry_row,
            )
            .optional()
            .with_context(|| format!("failed to load history entry {id}"))
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM history_entries", [], |row| row.get(0))
            .context("failed to count history entries")?;
        usize::try_from(count).with_context(|| format!("invalid history entry count: {count}"))
    }

    /// Deletes one entry. Missing ids are not an error; returns whether a row
    /// was removed.
    pub fn delete_one(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM history_entries WHERE id = ?1", params![id])
            .with_context(|| format!("failed to delete history entry {id}"))?;

        tracing::debug!(id, deleted, "history entry delete");
        Ok(deleted > 0)
    }

    /// Removes every entry. Returns the number of removed entries; later
    /// appends keep getting ids above every id ever issued.
    pub fn clear_all(&mut self) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start clear transaction")?;
        let removed = clear_entries(&tx)?;
        tx.commit().context("failed to commit clear transaction")?;

        tracing::info!(removed, "history cleared");
        Ok(removed)
    }

    /// Inserts imported entries (newest first) with their own timestamps.
    /// Incoming ids are ignored and nothing is de-duplicated.
    pub fn bulk_append(&mut self, entries: &[HistoryEntry]) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start import transaction")?;
        insert_newest_first(&tx, entries)?;
        tx.commit().context("failed to commit import transaction")?;

        tracing::info!(added = entries.len(), "history entries imported");
        Ok(entries.len())
    }

    /// Clears the log and inserts `entries` in one transaction; on failure the
    /// previous log is kept.
    pub fn replace_all(&mut self, entries: &[HistoryEntry]) -> Result<usize> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start replace transaction")?;
        let removed = clear_entries(&tx)?;
        insert_newest_first(&tx, entries)?;
        tx.commit().context("failed to commit replace transaction")?;

        tracing::info!(removed, inserted = entries.len(), "history replaced");
        Ok(entries.len())
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM preferences WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to read preference {key}"))
    }

    pub fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO preferences(key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   value = excluded.value,
                   updated_at = excluded.updated_at",
                params![key, value, now_millis()],
            )
            .with_context(|| format!("failed to write preference {key}"))?;
        Ok(())
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn insert_entry(conn: &Connection, entry: &HistoryEntry) -> Result<i64> {
    entry
        .to_draft()
        .validate()
        .map_err(|err| anyhow!("entry validation failed: {err}"))?;

    conn.execute(
        "INSERT INTO history_entries(
            timestamp, module, status, input_type, input_summary,
            output_summary, full_input, full_output, error_details
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.timestamp,
            entry.module.as_str(),
            entry.status.as_str(),
            entry.input_type,
            entry.input_summary,
            entry.output_summary,
            serde_json::to_string(&entry.full_input).context("failed to serialize full_input")?,
            serde_json::to_string(&entry.full_output)
                .context("failed to serialize full_output")?,
            entry.error_details,
        ],
    )
    .context("failed to insert history entry")?;

    Ok(conn.last_insert_rowid())
}

/// Documents list entries newest first. Inserting them in reverse keeps the
/// document order among equal timestamps, since ties are listed by id.
fn insert_newest_first(conn: &Connection, entries: &[HistoryEntry]) -> Result<()> {
    for entry in entries.iter().rev() {
        insert_entry(conn, entry)?;
    }
    Ok(())
}

/// Ids are never reused, so the AUTOINCREMENT sequence is left untouched.
fn clear_entries(conn: &Connection) -> Result<usize> {
    conn.execute("DELETE FROM history_entries", [])
        .context("failed to clear history entries")
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn invalid_column(
    index: usize,
    kind: rusqlite::types::Type,
    message: String,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        kind,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_json_column(index: usize, raw: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(raw).map_err(|err| {
        invalid_column(
            index,
            rusqlite::types::Type::Text,
            format!("invalid stored JSON: {err}"),
        )
    })
}

fn parse_entry_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<HistoryEntry> {
    let module_raw: String = row.get(2)?;
    let status_raw: String = row.get(3)?;
    let full_input_raw: String = row.get(7)?;
    let full_output_raw: String = row.get(8)?;

    let module = ModuleKind::parse(&module_raw).ok_or_else(|| {
        invalid_column(
            2,
            rusqlite::types::Type::Text,
            format!("invalid module: {module_raw}"),
        )
    })?;
    let status = EntryStatus::parse(&status_raw).ok_or_else(|| {
        invalid_column(
            3,
            rusqlite::types::Type::Text,
            format!("invalid status: {status_raw}"),
        )
    })?;

    Ok(HistoryEntry {
        id: Some(row.get(0)?),
        timestamp: row.get(1)?,
        module,
        input_type: row.get(4)?,
        input_summary: row.get(5)?,
        output_summary: row.get(6)?,
        full_input: parse_json_column(7, &full_input_raw)?,
        full_output: parse_json_column(8, &full_output_raw)?,
        status,
        error_details: row.get(9)?,
    })
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}
