use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use frens_access::{
    start_allowlist_refresh_runtime, AdmissionHooks, AllowListSource, AuthorizationGate, Identity,
    SessionContext,
};
use frens_core::{
    classify_client_message_error, current_unix_timestamp, parse_client_message,
    sort_newest_first, ClientMessage, Event, Filter, RelayMessage,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::event_store::{EventStore, SaveOutcome};
use crate::relay_info::{accepts_relay_info, RelayInfo, NIP11_CONTENT_TYPE};

mod auth_runtime;
mod server_bootstrap;
#[cfg(test)]
mod tests;
mod websocket;

use auth_runtime::{apply_auth_event, issue_auth_challenge};
#[cfg(test)]
use server_bootstrap::build_relay_router;
pub use server_bootstrap::{run_relay_server, serve_relay};
use websocket::run_relay_ws_connection;

const RELAY_ROOT_ENDPOINT: &str = "/";
const RELAY_WS_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;
const RELAY_LIVE_EVENT_CAPACITY: usize = 1024;
const DUPLICATE_EVENT_MESSAGE: &str = "duplicate: already have this event";
const STALE_EVENT_MESSAGE: &str = "duplicate: a newer version of this event is already stored";
const STORE_FAILURE_MESSAGE: &str = "error: could not store event";
const QUERY_FAILURE_MESSAGE: &str = "error: could not run query";
const ALREADY_AUTHENTICATED_MESSAGE: &str = "restricted: connection already authenticated";

#[derive(Clone)]
/// Everything the relay needs at startup.
pub struct RelayServerConfig {
    pub bind: String,
    pub info: RelayInfo,
    /// Public URL of this relay; when set, AUTH events must name its host.
    pub service_url: Option<String>,
    pub gate: AuthorizationGate,
    pub allowlist_source: Arc<AllowListSource>,
    pub allowlist_refresh_interval: Option<Duration>,
    pub store: Arc<dyn EventStore>,
}

struct RelayServerState {
    config: RelayServerConfig,
    hooks: Arc<dyn AdmissionHooks>,
    live_events: broadcast::Sender<Arc<Event>>,
    connection_sequence: AtomicU64,
}

impl RelayServerState {
    fn new(config: RelayServerConfig) -> Self {
        let (live_events, _) = broadcast::channel(RELAY_LIVE_EVENT_CAPACITY);
        Self {
            hooks: Arc::new(config.gate.clone()),
            config,
            live_events,
            connection_sequence: AtomicU64::new(0),
        }
    }

    fn next_connection_id(&self) -> u64 {
        self.connection_sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Per-connection state: the issued challenge, the identity bound by AUTH
/// and the live subscriptions.
struct RelayConnectionSession {
    connection_id: u64,
    peer: SocketAddr,
    challenge: String,
    authenticated: Option<Identity>,
    subscriptions: BTreeMap<String, Vec<Filter>>,
}

impl RelayConnectionSession {
    fn new(connection_id: u64, peer: SocketAddr) -> Self {
        Self {
            connection_id,
            peer,
            challenge: issue_auth_challenge(),
            authenticated: None,
            subscriptions: BTreeMap::new(),
        }
    }

    /// Subscriptions with at least one filter matching `event`.
    fn matching_subscriptions(&self, event: &Event) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|(_, filters)| filters.iter().any(|filter| filter.matches(event)))
            .map(|(subscription_id, _)| subscription_id.clone())
            .collect()
    }
}

impl SessionContext for RelayConnectionSession {
    fn authenticated_identity(&self) -> Option<&Identity> {
        self.authenticated.as_ref()
    }
}

async fn handle_relay_root(
    State(state): State<Arc<RelayServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    websocket: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Ok(websocket) = websocket {
        let connection_id = state.next_connection_id();
        return websocket
            .on_upgrade(move |socket| run_relay_ws_connection(state, socket, connection_id, peer))
            .into_response();
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok());
    if accepts_relay_info(accept) {
        let document = state.config.info.document();
        return match serde_json::to_string(&document) {
            Ok(body) => (
                [
                    (
                        header::CONTENT_TYPE,
                        HeaderValue::from_static(NIP11_CONTENT_TYPE),
                    ),
                    (
                        header::ACCESS_CONTROL_ALLOW_ORIGIN,
                        HeaderValue::from_static("*"),
                    ),
                ],
                body,
            )
                .into_response(),
            Err(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode relay information: {error}"),
            )
                .into_response(),
        };
    }

    (
        StatusCode::OK,
        format!(
            "{} is a members-only Nostr relay; connect with a websocket client.",
            state.config.info.name
        ),
    )
        .into_response()
}
