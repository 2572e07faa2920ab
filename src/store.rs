//! Result persistence: raw block dumps and aggregated events.
//!
//! The pipeline only needs three operations ([`ResultStore`]): clear a
//! document's previous results, store one raw dump per run, and store each
//! event. [`SqliteResultStore`] implements them on SQLite and adds the read
//! and correction queries used by the CLI and by anything browsing the
//! events table.

use crate::error::EtlError;
use crate::output::{Block, Event, EventRecord, RawResult};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Destination of a run's results.
///
/// Rows are only ever appended, except for [`ResultStore::clear_prior_results`],
/// which the driver calls before writing so a rerun replaces the previous run.
pub trait ResultStore: Send + Sync {
    /// Delete every raw result and event stored for `source_id`.
    fn clear_prior_results(&self, source_id: &str) -> Result<(), EtlError>;

    fn save_raw_result(
        &self,
        source_id: &str,
        range_tag: &str,
        blocks: &[Block],
    ) -> Result<(), EtlError>;

    fn save_event(&self, event: &Event) -> Result<(), EtlError>;

    /// Swap the document's stored results for a new raw dump and event set.
    ///
    /// Implementations should make this all-or-nothing; the default runs
    /// the three steps in sequence.
    fn replace_results(
        &self,
        source_id: &str,
        range_tag: &str,
        blocks: &[Block],
        events: &[Event],
    ) -> Result<(), EtlError> {
        self.clear_prior_results(source_id)?;
        self.save_raw_result(source_id, range_tag, blocks)?;
        for event in events {
            self.save_event(event)?;
        }
        Ok(())
    }
}

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS raw_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id TEXT NOT NULL,
        range_tag TEXT NOT NULL,
        blocks_json TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        text TEXT NOT NULL,
        source_id TEXT NOT NULL,
        range_tag TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_raw_results_source ON raw_results (source_id);
    CREATE INDEX IF NOT EXISTS idx_events_source ON events (source_id);
    CREATE INDEX IF NOT EXISTS idx_events_date ON events (date);
"#;

/// Filter for [`SqliteResultStore::events`]. Unset fields match everything.
///
/// Date bounds are inclusive and compared as strings, which orders
/// normalised `YYYY/MM/DD` dates chronologically.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub source_id: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
}

/// [`ResultStore`] backed by a SQLite database.
///
/// `rusqlite` is synchronous; each call is a short statement, so the driver
/// calls it inline rather than through `spawn_blocking`.
pub struct SqliteResultStore {
    conn: Mutex<Connection>,
}

impl SqliteResultStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EtlError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EtlError::Store(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        // WAL lets a browsing UI read while a run writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(CREATE_TABLES_SQL)?;
        info!("Result store opened: {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory() -> Result<Self, EtlError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(CREATE_TABLES_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, EtlError> {
        self.conn
            .lock()
            .map_err(|_| EtlError::Store("connection lock poisoned".into()))
    }

    /// Stored events matching `query`, in insertion order.
    pub fn events(&self, query: &EventQuery) -> Result<Vec<EventRecord>, EtlError> {
        let mut sql =
            String::from("SELECT id, date, text, source_id, range_tag FROM events WHERE 1=1");
        let mut args: Vec<&str> = Vec::new();
        if let Some(ref s) = query.source_id {
            sql.push_str(" AND source_id = ?");
            args.push(s);
        }
        if let Some(ref d) = query.from_date {
            sql.push_str(" AND date >= ?");
            args.push(d);
        }
        if let Some(ref d) = query.to_date {
            sql.push_str(" AND date <= ?");
            args.push(d);
        }
        sql.push_str(" ORDER BY id");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_record)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn event_by_id(&self, id: i64) -> Result<Option<EventRecord>, EtlError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, date, text, source_id, range_tag FROM events WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?)
    }

    /// Replace an event's text (manual OCR correction). `false` if no such id.
    pub fn update_event_text(&self, id: i64, text: &str) -> Result<bool, EtlError> {
        let conn = self.conn()?;
        let changed = conn.execute("UPDATE events SET text = ?1 WHERE id = ?2", params![text, id])?;
        Ok(changed > 0)
    }

    /// Raw dumps stored for `source_id`, oldest first.
    pub fn raw_results(&self, source_id: &str) -> Result<Vec<RawResult>, EtlError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT source_id, range_tag, blocks_json FROM raw_results WHERE source_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![source_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (source_id, range_tag, json) = row?;
            let blocks = serde_json::from_str(&json)
                .map_err(|e| EtlError::Store(format!("raw result for {source_id}: {e}")))?;
            out.push(RawResult {
                source_id,
                range_tag,
                blocks,
            });
        }
        Ok(out)
    }
}

impl ResultStore for SqliteResultStore {
    fn clear_prior_results(&self, source_id: &str) -> Result<(), EtlError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_source(&tx, source_id)?;
        tx.commit()?;
        Ok(())
    }

    fn save_raw_result(
        &self,
        source_id: &str,
        range_tag: &str,
        blocks: &[Block],
    ) -> Result<(), EtlError> {
        insert_raw_result(&*self.conn()?, source_id, range_tag, blocks)
    }

    fn save_event(&self, event: &Event) -> Result<(), EtlError> {
        insert_event(&*self.conn()?, event)
    }

    fn replace_results(
        &self,
        source_id: &str,
        range_tag: &str,
        blocks: &[Block],
        events: &[Event],
    ) -> Result<(), EtlError> {
        let mut conn = self.conn()?;
        // Dropping the transaction on an early return rolls it back.
        let tx = conn.transaction()?;
        delete_source(&tx, source_id)?;
        insert_raw_result(&tx, source_id, range_tag, blocks)?;
        for event in events {
            insert_event(&tx, event)?;
        }
        tx.commit()?;
        info!(
            "Stored {} event(s) for {} ({})",
            events.len(),
            source_id,
            range_tag
        );
        Ok(())
    }
}

fn delete_source(conn: &Connection, source_id: &str) -> Result<(), EtlError> {
    let raw = conn.execute("DELETE FROM raw_results WHERE source_id = ?1", params![source_id])?;
    let events = conn.execute("DELETE FROM events WHERE source_id = ?1", params![source_id])?;
    debug!(
        "Cleared {} raw result(s) and {} event(s) for {}",
        raw, events, source_id
    );
    Ok(())
}

fn insert_raw_result(
    conn: &Connection,
    source_id: &str,
    range_tag: &str,
    blocks: &[Block],
) -> Result<(), EtlError> {
    let json = serde_json::to_string(blocks)
        .map_err(|e| EtlError::Internal(format!("serialise raw result: {e}")))?;
    conn.execute(
        "INSERT INTO raw_results (source_id, range_tag, blocks_json) VALUES (?1, ?2, ?3)",
        params![source_id, range_tag, json],
    )?;
    Ok(())
}

fn insert_event(conn: &Connection, event: &Event) -> Result<(), EtlError> {
    conn.execute(
        "INSERT INTO events (date, text, source_id, range_tag) VALUES (?1, ?2, ?3, ?4)",
        params![event.date, event.text, event.source_id, event.range_tag],
    )?;
    Ok(())
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    Ok(EventRecord {
        id: row.get(0)?,
        event: Event {
            date: row.get(1)?,
            text: row.get(2)?,
            source_id: row.get(3)?,
            range_tag: row.get(4)?,
        },
    })
}
