use std::path::PathBuf;

use clap::Parser;

use crate::cli_types::{CliAllowListSource, CliEventStore, CliTimeoutPolicy};

pub(crate) const DEFAULT_ENV_FILE: &str = ".env";

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_non_empty(value: &str) -> Result<String, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("value must not be empty".to_string());
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "frens-relay",
    about = "Members-only Nostr relay gated by a curated or social-graph allow-list",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "RELAY_NAME",
        value_parser = parse_non_empty,
        help = "Relay display name published in the NIP-11 document"
    )]
    pub relay_name: String,

    #[arg(
        long,
        env = "RELAY_PUBKEY",
        value_parser = parse_non_empty,
        help = "Relay operator public key published in the NIP-11 document"
    )]
    pub relay_pubkey: String,

    #[arg(
        long,
        env = "RELAY_DESCRIPTION",
        help = "Relay description published in the NIP-11 document"
    )]
    pub relay_description: String,

    #[arg(
        long,
        env = "RELAY_BIND",
        default_value = "0.0.0.0:3334",
        help = "Socket address the relay listens on"
    )]
    pub relay_bind: String,

    #[arg(
        long,
        env = "RELAY_SERVICE_URL",
        help = "Public relay URL; when set, AUTH events must carry a matching relay tag"
    )]
    pub relay_service_url: Option<String>,

    #[arg(
        long,
        env = "FRENS_ALLOWLIST_SOURCE",
        value_enum,
        default_value = "static",
        help = "Where member identities come from"
    )]
    pub allowlist_source: CliAllowListSource,

    #[arg(
        long,
        env = "FRENS_PATH",
        default_value = "users.json",
        help = "Membership document for --allowlist-source=static"
    )]
    pub frens_path: PathBuf,

    #[arg(
        long,
        env = "FRENS_OPERATOR_PUBKEY",
        help = "Operator whose contact list defines membership for --allowlist-source=social-graph"
    )]
    pub operator_pubkey: Option<String>,

    #[arg(
        long,
        env = "FRENS_UPSTREAM_RELAY",
        help = "Relay URL the operator's contact list is fetched from"
    )]
    pub upstream_relay: Option<String>,

    #[arg(
        long,
        env = "FRENS_WELL_KNOWN_DOMAIN",
        help = "Domain serving /.well-known/nostr.json for --allowlist-source=well-known"
    )]
    pub well_known_domain: Option<String>,

    #[arg(
        long,
        env = "FRENS_UPSTREAM_TIMEOUT_MS",
        default_value_t = 3_000,
        value_parser = parse_positive_u64,
        help = "Time budget for the upstream allow-list fetch"
    )]
    pub upstream_timeout_ms: u64,

    #[arg(
        long,
        env = "FRENS_UPSTREAM_TIMEOUT_POLICY",
        value_enum,
        default_value = "degrade",
        help = "On upstream timeout: degrade to an empty allow-list or fail startup"
    )]
    pub upstream_timeout_policy: CliTimeoutPolicy,

    #[arg(
        long,
        env = "FRENS_ALLOWLIST_REFRESH_SECONDS",
        value_parser = parse_positive_u64,
        help = "Re-resolve the allow-list on this cadence; omitted means resolve once at startup"
    )]
    pub allowlist_refresh_seconds: Option<u64>,

    #[arg(
        long,
        env = "RELAY_EVENT_STORE",
        value_enum,
        default_value = "memory",
        help = "Event storage backend"
    )]
    pub event_store: CliEventStore,

    #[arg(
        long,
        env = "RELAY_SQLITE_PATH",
        default_value = "frens-relay.sqlite",
        help = "Database file for --event-store=sqlite"
    )]
    pub sqlite_path: PathBuf,

    #[arg(long, env = "POSTGRES_USER", help = "User for --event-store=postgres")]
    pub postgres_user: Option<String>,

    #[arg(
        long,
        env = "POSTGRES_PASSWORD",
        hide_env_values = true,
        help = "Password for --event-store=postgres"
    )]
    pub postgres_password: Option<String>,

    #[arg(long, env = "POSTGRES_HOST", help = "Host for --event-store=postgres")]
    pub postgres_host: Option<String>,

    #[arg(long, env = "POSTGRES_PORT", help = "Port for --event-store=postgres")]
    pub postgres_port: Option<u16>,

    #[arg(
        long = "postgres-db",
        env = "POSTGRES_DB",
        help = "Database name for --event-store=postgres"
    )]
    pub postgres_db: Option<String>,

    #[arg(
        long,
        env = "FRENS_ENV_FILE",
        default_value = DEFAULT_ENV_FILE,
        help = "Dotenv file loaded before configuration is read; a missing default file is ignored"
    )]
    pub env_file: PathBuf,
}
