//! Allow-list source backed by a NIP-05 `/.well-known/nostr.json` document.
use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{AllowList, AllowListError, Identity, TimeoutPolicy, DEFAULT_UPSTREAM_TIMEOUT};

const WELL_KNOWN_PATH: &str = "/.well-known/nostr.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WellKnownConfig {
    pub document_url: String,
    pub timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
}

impl WellKnownConfig {
    /// Targets `https://<domain>/.well-known/nostr.json`.
    pub fn for_domain(domain: &str) -> Self {
        Self::for_url(format!(
            "https://{}{WELL_KNOWN_PATH}",
            domain.trim().trim_end_matches('/')
        ))
    }

    pub fn for_url(document_url: impl Into<String>) -> Self {
        Self {
            document_url: document_url.into(),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
/// NIP-05 document: names to pubkeys plus optional relay hints.
pub struct WellKnownDocument {
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    #[serde(default)]
    pub relays: BTreeMap<String, Vec<String>>,
}

impl WellKnownDocument {
    /// Every named pubkey, ordered by name.
    pub fn allowlist(&self) -> AllowList {
        self.names
            .values()
            .filter(|pubkey| !pubkey.is_empty())
            .map(|pubkey| Identity::new(pubkey.clone()))
            .collect()
    }
}

pub fn parse_well_known_document(raw: &str) -> Result<WellKnownDocument, AllowListError> {
    serde_json::from_str::<WellKnownDocument>(raw).map_err(|error| {
        AllowListError::configuration(format!("failed to parse nostr.json document: {error}"))
    })
}

fn classify_transport_error(config: &WellKnownConfig, error: reqwest::Error) -> AllowListError {
    if error.is_timeout() {
        return AllowListError::UpstreamTimeout {
            upstream: config.document_url.clone(),
            timeout_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
        };
    }
    AllowListError::upstream_unavailable(config.document_url.as_str(), error.to_string())
}

pub async fn fetch_well_known_allowlist(
    config: &WellKnownConfig,
) -> Result<AllowList, AllowListError> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|error| {
            AllowListError::configuration(format!("failed to build HTTP client: {error}"))
        })?;
    let response = client
        .get(config.document_url.as_str())
        .send()
        .await
        .map_err(|error| classify_transport_error(config, error))?;
    let status = response.status();
    if !status.is_success() {
        return Err(AllowListError::upstream_unavailable(
            config.document_url.as_str(),
            format!("unexpected HTTP status {status}"),
        ));
    }
    let body = response
        .text()
        .await
        .map_err(|error| classify_transport_error(config, error))?;
    let document = parse_well_known_document(&body)?;
    let allowlist = document.allowlist();
    info!(
        url = %config.document_url,
        names = document.names.len(),
        relays = document.relays.len(),
        "fetched well-known nostr.json"
    );
    Ok(allowlist)
}
