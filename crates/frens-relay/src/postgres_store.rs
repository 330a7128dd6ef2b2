//! PostgreSQL-backed event store.
//!
//! Uses the blocking `postgres` client and opens one connection per call,
//! so every method must run on a blocking thread.
use std::fmt;

use anyhow::{Context, Result};
use frens_core::{Event, Filter};
use postgres::config::SslMode;
use postgres::{Client, Config, NoTls};

use crate::event_store::{finish_query, replacement_slot, EventStore, SaveOutcome};

#[derive(Clone, PartialEq, Eq)]
pub struct PostgresConnectParams {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl PostgresConnectParams {
    /// Client configuration built field by field, so credentials never pass
    /// through URL parsing.
    pub fn client_config(&self) -> Config {
        let mut config = Config::new();
        config
            .user(&self.user)
            .password(&self.password)
            .host(&self.host)
            .port(self.port)
            .dbname(&self.database)
            .ssl_mode(SslMode::Disable);
        config
    }

    /// Connection string for logs; the password is masked.
    pub fn redacted_dsn(&self) -> String {
        format!(
            "postgres://{}:<redacted>@{}:{}/{}?sslmode=disable",
            self.user, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for PostgresConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConnectParams")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PostgresEventStore {
    config: Config,
    target: String,
}

impl PostgresEventStore {
    /// Connects once to create the schema.
    pub fn open(params: PostgresConnectParams) -> Result<Self> {
        Self::open_with_config(params.client_config())
    }

    pub fn open_with_config(config: Config) -> Result<Self> {
        let target = describe_target(&config);
        let store = Self { config, target };
        let mut client = store.connect()?;
        initialize_event_postgres_schema(&mut client)?;
        Ok(store)
    }

    fn connect(&self) -> Result<Client> {
        self.config
            .connect(NoTls)
            .with_context(|| format!("failed to connect to postgres event store {}", self.target))
    }
}

fn describe_target(config: &Config) -> String {
    let host = config
        .get_hosts()
        .first()
        .map(|host| match host {
            postgres::config::Host::Tcp(host) => host.clone(),
            #[cfg(unix)]
            postgres::config::Host::Unix(path) => path.display().to_string(),
        })
        .unwrap_or_default();
    let port = config.get_ports().first().copied().unwrap_or(5432);
    let database = config.get_dbname().unwrap_or_default();
    format!("{host}:{port}/{database}")
}

/// Serializes writers on one replaceable slot for the rest of the
/// transaction, including when the slot is still empty.
const SLOT_LOCK_SQL: &str = "SELECT pg_advisory_xact_lock(hashtext($1))";

fn initialize_event_postgres_schema(client: &mut Client) -> Result<()> {
    client
        .batch_execute(
            r#"
            CREATE TABLE IF NOT EXISTS frens_events (
                id TEXT PRIMARY KEY,
                pubkey TEXT NOT NULL,
                created_at BIGINT NOT NULL,
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
        .context("failed to initialize postgres event schema")?;
    Ok(())
}

fn to_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl EventStore for PostgresEventStore {
    fn label(&self) -> &'static str {
        "postgres"
    }

    fn save_event(&self, event: &Event) -> Result<SaveOutcome> {
        let mut client = self.connect()?;
        let mut transaction = client
            .transaction()
            .context("failed to start postgres event transaction")?;
        let slot = replacement_slot(event);
        if let Some(slot) = slot.as_deref() {
            transaction
                .execute(SLOT_LOCK_SQL, &[&slot])
                .context("failed to lock postgres replaceable slot")?;
        }

        let existing = transaction
            .query_opt("SELECT 1 FROM frens_events WHERE id = $1", &[&event.id])
            .context("failed to look up postgres event id")?;
        if existing.is_some() {
            return Ok(SaveOutcome::Duplicate);
        }

        if let Some(slot) = slot.as_deref() {
            let rows = transaction
                .query(
                    "SELECT id, event_json FROM frens_events WHERE replace_slot = $1 FOR UPDATE",
                    &[&slot],
                )
                .context("failed to query postgres replaceable slot")?;
            for row in rows {
                let id: String = row.get(0);
                let raw: String = row.get(1);
                let stored = serde_json::from_str::<Event>(&raw)
                    .with_context(|| format!("failed to decode stored event {id}"))?;
                if !event.supersedes(&stored) {
                    return Ok(SaveOutcome::Stale);
                }
            }
            transaction
                .execute("DELETE FROM frens_events WHERE replace_slot = $1", &[&slot])
                .context("failed to clear postgres replaceable slot")?;
        }

        let event_json = serde_json::to_string(event).context("failed to encode event")?;
        let created_at = to_bigint(event.created_at);
        let kind = i32::from(event.kind);
        let inserted = transaction
            .execute(
                r#"
                INSERT INTO frens_events (id, pubkey, created_at, kind, replace_slot, event_json)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[
                    &event.id,
                    &event.pubkey,
                    &created_at,
                    &kind,
                    &slot,
                    &event_json,
                ],
            )
            .context("failed to write postgres event")?;
        transaction
            .commit()
            .context("failed to commit postgres event")?;
        if inserted == 0 {
            return Ok(SaveOutcome::Duplicate);
        }
        Ok(SaveOutcome::Stored)
    }

    fn query_events(&self, filter: &Filter) -> Result<Vec<Event>> {
        let mut client = self.connect()?;
        let since = to_bigint(filter.since.unwrap_or(0));
        let until = to_bigint(filter.until.unwrap_or(u64::MAX));
        let rows = client
            .query(
                r#"
                SELECT id, event_json
                FROM frens_events
                WHERE created_at >= $1 AND created_at <= $2
                ORDER BY created_at DESC, id ASC
                "#,
                &[&since, &until],
            )
            .context("failed to query postgres events")?;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get(0);
            let raw: String = row.get(1);
            events.push(
                serde_json::from_str::<Event>(&raw)
                    .with_context(|| format!("failed to decode stored event {id}"))?,
            );
        }
        Ok(finish_query(events, filter))
    }
}
