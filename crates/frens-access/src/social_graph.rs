//! Allow-list source backed by the operator's contact list on an upstream relay.
use std::time::Duration;

use frens_core::{
    parse_relay_message, ClientMessage, Event, Filter, RelayMessage, KIND_CONTACT_LIST,
};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::{AllowList, AllowListError, Identity, TimeoutPolicy, DEFAULT_UPSTREAM_TIMEOUT};

const CONTACT_LIST_SUBSCRIPTION_ID: &str = "frens-contact-list";

#[derive(Debug, Clone, PartialEq, Eq)]
/// Settings for the one-shot contact-list fetch.
pub struct SocialGraphConfig {
    pub operator: Identity,
    pub upstream_url: String,
    pub timeout: Duration,
    pub timeout_policy: TimeoutPolicy,
}

impl SocialGraphConfig {
    pub fn new(operator: Identity, upstream_url: impl Into<String>) -> Self {
        Self {
            operator,
            upstream_url: upstream_url.into(),
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

/// Identities referenced by the `p` tags of a contact list, in tag order.
pub fn extract_follows(contact_list: &Event) -> AllowList {
    contact_list
        .tag_values("p")
        .map(Identity::from)
        .collect()
}

fn is_operator_contact_list(event: &Event, operator: &Identity) -> bool {
    event.kind == KIND_CONTACT_LIST && event.pubkey == operator.as_str()
}

fn timeout_error(config: &SocialGraphConfig) -> AllowListError {
    AllowListError::UpstreamTimeout {
        upstream: config.upstream_url.clone(),
        timeout_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
    }
}

/// Fetches the operator's newest contact list from the upstream relay.
///
/// Returns `Ok(None)` when the relay reports end of stored events (or closes
/// the subscription) without a matching record. A connection that drops
/// before either is `UpstreamUnavailable`.
pub async fn fetch_contact_list(
    config: &SocialGraphConfig,
) -> Result<Option<Event>, AllowListError> {
    let connect = tokio::time::timeout(config.timeout, connect_async(config.upstream_url.as_str()));
    let (stream, _response) = match connect.await {
        Ok(Ok(connected)) => connected,
        Ok(Err(error)) => {
            return Err(AllowListError::upstream_unavailable(
                config.upstream_url.as_str(),
                error.to_string(),
            ))
        }
        Err(_) => {
            return Err(AllowListError::upstream_unavailable(
                config.upstream_url.as_str(),
                format!(
                    "connection not established within {}ms",
                    config.timeout.as_millis()
                ),
            ))
        }
    };
    let (mut sink, mut source) = stream.split();

    let request = ClientMessage::Req {
        subscription_id: CONTACT_LIST_SUBSCRIPTION_ID.to_string(),
        filters: vec![Filter::contact_list_of(config.operator.as_str())],
    };
    sink.send(WsMessage::Text(request.to_json().into()))
        .await
        .map_err(|error| {
            AllowListError::upstream_unavailable(
                config.upstream_url.as_str(),
                format!("failed to send contact-list request: {error}"),
            )
        })?;

    let dropped = |detail: String| {
        AllowListError::upstream_unavailable(config.upstream_url.as_str(), detail)
    };
    let wait = async {
        while let Some(message) = source.next().await {
            let text = match message {
                Ok(WsMessage::Text(text)) => text.as_str().to_string(),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => continue,
                },
                Ok(WsMessage::Close(_)) => {
                    return Err(dropped(
                        "upstream closed the connection before answering the contact-list request"
                            .to_string(),
                    ))
                }
                Ok(_) => continue,
                Err(error) => {
                    return Err(dropped(format!("contact-list stream failed: {error}")));
                }
            };
            match parse_relay_message(&text) {
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                }) if subscription_id == CONTACT_LIST_SUBSCRIPTION_ID => {
                    if !is_operator_contact_list(&event, &config.operator) {
                        debug!(event_id = %event.id, kind = event.kind, "skipping non-matching upstream event");
                        continue;
                    }
                    if let Err(error) = event.verify() {
                        warn!(event_id = %event.id, %error, "skipping contact list with invalid signature");
                        continue;
                    }
                    return Ok(Some(event));
                }
                Ok(RelayMessage::Eose { subscription_id })
                | Ok(RelayMessage::Closed {
                    subscription_id, ..
                }) if subscription_id == CONTACT_LIST_SUBSCRIPTION_ID => return Ok(None),
                Ok(RelayMessage::Notice { message }) => {
                    debug!(upstream = %config.upstream_url, %message, "upstream notice");
                }
                Ok(_) => {}
                Err(error) => {
                    debug!(upstream = %config.upstream_url, %error, "ignoring unparseable upstream frame");
                }
            }
        }
        Err(dropped(
            "upstream stream ended before answering the contact-list request".to_string(),
        ))
    };

    let outcome = tokio::time::timeout(config.timeout, wait).await;

    let close = ClientMessage::Close {
        subscription_id: CONTACT_LIST_SUBSCRIPTION_ID.to_string(),
    };
    let _ = sink.send(WsMessage::Text(close.to_json().into())).await;
    let _ = sink.close().await;

    outcome.map_err(|_| timeout_error(config))?
}

/// Resolves the allow-list from the operator's follows.
pub async fn fetch_social_graph_allowlist(
    config: &SocialGraphConfig,
) -> Result<AllowList, AllowListError> {
    match fetch_contact_list(config).await? {
        Some(contact_list) => {
            let allowlist = extract_follows(&contact_list);
            info!(
                upstream = %config.upstream_url,
                operator = config.operator.short(),
                follows = allowlist.len(),
                created_at = contact_list.created_at,
                "fetched operator contact list"
            );
            Ok(allowlist)
        }
        None => {
            warn!(
                upstream = %config.upstream_url,
                operator = config.operator.short(),
                "upstream has no contact list for the operator; allow-list is empty"
            );
            Ok(AllowList::empty())
        }
    }
}
