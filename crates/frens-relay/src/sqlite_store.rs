//! SQLite-backed event store.
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use frens_core::{Event, Filter};
use rusqlite::{params, Connection, OptionalExtension};

use crate::event_store::{finish_query, replacement_slot, EventStore, SaveOutcome};

#[derive(Debug)]
pub struct SqliteEventStore {
    path: PathBuf,
    connection: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = open_event_sqlite_connection(path)?;
        initialize_event_sqlite_schema(&connection)?;
        Ok(Self {
            path: path.to_path_buf(),
            connection: Mutex::new(connection),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open_event_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create event store directory {}", parent.display())
            })?;
        }
    }
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open sqlite event store {}", path.display()))?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(connection)
}

fn initialize_event_sqlite_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS frens_events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                kind INTEGER NOT NULL,
                replace_slot TEXT NULL,
                event_json TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_frens_events_created_at
                ON frens_events(created_at);
            CREATE INDEX IF NOT EXISTS idx_frens_events_replace_slot
                ON frens_events(replace_slot);
            "#,
        )
        .context("failed to initialize sqlite event schema")?;
    Ok(())
}

fn decode_stored_event(id: &str, raw: &str) -> Result<Event> {
    serde_json::from_str::<Event>(raw)
        .with_context(|| format!("failed to decode stored event {id}"))
}

fn to_sql_timestamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl EventStore for SqliteEventStore {
    fn label(&self) -> &'static str {
        "sqlite"
    }

    fn save_event(&self, event: &Event) -> Result<SaveOutcome> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("sqlite event store lock poisoned"))?;
        let transaction = connection.transaction()?;
        let existing = transaction
            .query_row(
                "SELECT 1 FROM frens_events WHERE id = ?1",
                params![event.id],
                |_| Ok(()),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(SaveOutcome::Duplicate);
        }

        let slot = replacement_slot(event);
        if let Some(slot) = slot.as_deref() {
            let mut statement = transaction
                .prepare("SELECT id, event_json FROM frens_events WHERE replace_slot = ?1")?;
            let mut rows = statement.query(params![slot])?;
            while let Some(row) = rows.next()? {
                let id: String = row.get(0)?;
                let raw: String = row.get(1)?;
                let stored = decode_stored_event(&id, &raw)?;
                if !event.supersedes(&stored) {
                    return Ok(SaveOutcome::Stale);
                }
            }
            drop(rows);
            drop(statement);
            transaction.execute(
                "DELETE FROM frens_events WHERE replace_slot = ?1",
                params![slot],
            )?;
        }

        let event_json = serde_json::to_string(event).context("failed to encode event")?;
        transaction.execute(
            r#"
            INSERT INTO frens_events (id, pubkey, created_at, kind, replace_slot, event_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.id,
                event.pubkey,
                to_sql_timestamp(event.created_at),
                i64::from(event.kind),
                slot,
                event_json
            ],
        )?;
        transaction.commit()?;
        Ok(SaveOutcome::Stored)
    }

    fn query_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| anyhow!("sqlite event store lock poisoned"))?;
        let mut statement = connection.prepare(
            r#"
            SELECT id, event_json
            FROM frens_events
            WHERE created_at >= ?1 AND created_at <= ?2
            ORDER BY created_at DESC, id ASC
            "#,
        )?;
        let since = to_sql_timestamp(filter.since.unwrap_or(0));
        let until = to_sql_timestamp(filter.until.unwrap_or(u64::MAX));
        let mut rows = statement.query(params![since, until])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let raw: String = row.get(1)?;
            let event = decode_stored_event(&id, &raw)?;
            if filter.matches(&event) {
                events.push(event);
            }
            if filter.limit.is_some_and(|limit| events.len() >= limit) {
                break;
            }
        }
        Ok(finish_query(events, filter))
    }
}
