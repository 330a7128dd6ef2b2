use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use frens_access::{
    AllowList, AllowListHandle, AllowListSource, AuthorizationGate, Identity, SocialGraphConfig,
    TimeoutPolicy, WellKnownConfig,
};
use frens_relay::{
    open_event_store, run_relay_server, EventStoreConfig, PostgresConnectParams, RelayInfo,
    RelayServerConfig,
};
use tracing::{info, warn};

use crate::cli_args::Cli;
use crate::cli_types::{CliAllowListSource, CliEventStore};

fn required_option<'a>(value: &'a Option<String>, flag: &str, mode: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => bail!("{flag} is required when {mode}"),
    }
}

pub(crate) fn build_allowlist_source(cli: &Cli) -> Result<AllowListSource> {
    let timeout = Duration::from_millis(cli.upstream_timeout_ms);
    let timeout_policy: TimeoutPolicy = cli.upstream_timeout_policy.into();
    Ok(match cli.allowlist_source {
        CliAllowListSource::Static => AllowListSource::Static {
            path: cli.frens_path.clone(),
        },
        CliAllowListSource::SocialGraph => {
            let mode = "--allowlist-source=social-graph";
            let operator = required_option(&cli.operator_pubkey, "--operator-pubkey", mode)?;
            let upstream = required_option(&cli.upstream_relay, "--upstream-relay", mode)?;
            if !(upstream.starts_with("ws://") || upstream.starts_with("wss://")) {
                bail!("--upstream-relay must be a ws:// or wss:// URL, found '{upstream}'");
            }
            let mut config = SocialGraphConfig::new(Identity::new(operator), upstream);
            config.timeout = timeout;
            config.timeout_policy = timeout_policy;
            AllowListSource::SocialGraph(config)
        }
        CliAllowListSource::WellKnown => {
            let domain = required_option(
                &cli.well_known_domain,
                "--well-known-domain",
                "--allowlist-source=well-known",
            )?;
            let mut config = WellKnownConfig::for_domain(domain);
            config.timeout = timeout;
            config.timeout_policy = timeout_policy;
            AllowListSource::WellKnown(config)
        }
    })
}

pub(crate) fn build_event_store_config(cli: &Cli) -> Result<EventStoreConfig> {
    Ok(match cli.event_store {
        CliEventStore::Memory => EventStoreConfig::Memory,
        CliEventStore::Sqlite => EventStoreConfig::Sqlite {
            path: cli.sqlite_path.clone(),
        },
        CliEventStore::Postgres => {
            let mode = "--event-store=postgres";
            let Some(port) = cli.postgres_port else {
                bail!("--postgres-port is required when {mode}");
            };
            EventStoreConfig::Postgres(PostgresConnectParams {
                user: required_option(&cli.postgres_user, "--postgres-user", mode)?.to_string(),
                password: cli.postgres_password.clone().unwrap_or_default(),
                host: required_option(&cli.postgres_host, "--postgres-host", mode)?.to_string(),
                port,
                database: required_option(&cli.postgres_db, "--postgres-db", mode)?.to_string(),
            })
        }
    })
}

fn warn_on_non_canonical_members(source: &AllowListSource, allowlist: &AllowList) {
    let non_canonical = allowlist
        .iter()
        .filter(|identity| !identity.is_canonical_hex())
        .count();
    if non_canonical > 0 {
        warn!(
            source = source.label(),
            non_canonical,
            "allow-list contains identities that are not 64-char lowercase hex; they can never match an authenticated pubkey"
        );
    }
}

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    let source = Arc::new(build_allowlist_source(&cli)?);
    let store_config = build_event_store_config(&cli)?;

    let allowlist = source
        .resolve()
        .await
        .with_context(|| format!("failed to resolve {} allow-list", source.label()))?;
    warn_on_non_canonical_members(&source, &allowlist);
    let gate = AuthorizationGate::new(AllowListHandle::new(allowlist));

    let store = tokio::task::spawn_blocking(move || open_event_store(&store_config))
        .await
        .context("event store open task failed")??;
    info!(store = store.label(), "event store ready");

    run_relay_server(RelayServerConfig {
        bind: cli.relay_bind,
        info: RelayInfo {
            name: cli.relay_name,
            pubkey: cli.relay_pubkey,
            description: cli.relay_description,
        },
        service_url: cli.relay_service_url,
        gate,
        allowlist_source: source,
        allowlist_refresh_interval: cli.allowlist_refresh_seconds.map(Duration::from_secs),
        store,
    })
    .await
}
