//! Event persistence behind the relay's EVENT and REQ handling.
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use frens_core::{sort_newest_first, Event, Filter};

use crate::postgres_store::{PostgresConnectParams, PostgresEventStore};
use crate::sqlite_store::SqliteEventStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Stored,
    /// An event with the same id is already stored.
    Duplicate,
    /// A newer event already occupies the replaceable slot.
    Stale,
}

/// Storage collaborator. Calls block, so the relay runs them on the
/// blocking pool.
pub trait EventStore: Send + Sync {
    fn label(&self) -> &'static str;
    fn save_event(&self, event: &Event) -> Result<SaveOutcome>;
    /// Stored matches for `filter`, newest first, truncated to its limit.
    fn query_events(&self, filter: &Filter) -> Result<Vec<Event>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStoreConfig {
    Memory,
    Sqlite { path: PathBuf },
    Postgres(PostgresConnectParams),
}

impl EventStoreConfig {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite { .. } => "sqlite",
            Self::Postgres(_) => "postgres",
        }
    }
}

/// Opens the configured store and prepares its schema. Blocking.
pub fn open_event_store(config: &EventStoreConfig) -> Result<Arc<dyn EventStore>> {
    Ok(match config {
        EventStoreConfig::Memory => Arc::new(MemoryEventStore::default()),
        EventStoreConfig::Sqlite { path } => Arc::new(SqliteEventStore::open(path)?),
        EventStoreConfig::Postgres(params) => Arc::new(PostgresEventStore::open(params.clone())?),
    })
}

/// Column value for the replaceable slot an event occupies, if any.
pub(crate) fn replacement_slot(event: &Event) -> Option<String> {
    event.replacement_key().map(|key| {
        format!(
            "{}:{}:{}",
            key.kind,
            key.pubkey,
            key.d_tag.as_deref().unwrap_or_default()
        )
    })
}

pub(crate) fn finish_query(mut events: Vec<Event>, filter: &Filter) -> Vec<Event> {
    events.retain(|event| filter.matches(event));
    sort_newest_first(&mut events);
    if let Some(limit) = filter.limit {
        events.truncate(limit);
    }
    events
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventStore {
    pub fn len(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for MemoryEventStore {
    fn label(&self) -> &'static str {
        "memory"
    }

    fn save_event(&self, event: &Event) -> Result<SaveOutcome> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| anyhow!("memory event store lock poisoned"))?;
        if events.iter().any(|stored| stored.id == event.id) {
            return Ok(SaveOutcome::Duplicate);
        }
        if let Some(key) = event.replacement_key() {
            let occupant = events
                .iter()
                .filter(|stored| stored.replacement_key().as_ref() == Some(&key))
                .any(|stored| !event.supersedes(stored));
            if occupant {
                return Ok(SaveOutcome::Stale);
            }
            events.retain(|stored| stored.replacement_key().as_ref() != Some(&key));
        }
        events.push(event.clone());
        Ok(SaveOutcome::Stored)
    }

    fn query_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        let events = self
            .events
            .lock()
            .map_err(|_| anyhow!("memory event store lock poisoned"))?;
        let candidates = events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect::<Vec<_>>();
        Ok(finish_query(candidates, filter))
    }
}
