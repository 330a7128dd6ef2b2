//! WebSocket message loop for relay connections.
use super::*;

fn relay_ws_message(message: &RelayMessage) -> WsMessage {
    WsMessage::Text(message.to_json().into())
}

fn notice(message: impl Into<String>) -> RelayMessage {
    RelayMessage::Notice {
        message: message.into(),
    }
}

fn ok_reply(event: &Event, accepted: bool, message: impl Into<String>) -> RelayMessage {
    RelayMessage::Ok {
        event_id: event.id.clone(),
        accepted,
        message: message.into(),
    }
}

/// Runs every filter against the store on the blocking pool and merges the
/// results newest first without duplicates.
async fn query_stored_events(
    store: Arc<dyn EventStore>,
    filters: Vec<Filter>,
) -> Result<Vec<Event>> {
    tokio::task::spawn_blocking(move || {
        let mut seen = BTreeSet::new();
        let mut events = Vec::new();
        for filter in &filters {
            for event in store.query_events(filter)? {
                if seen.insert(event.id.clone()) {
                    events.push(event);
                }
            }
        }
        sort_newest_first(&mut events);
        Ok(events)
    })
    .await
    .context("event store query task failed")?
}

async fn save_stored_event(store: Arc<dyn EventStore>, event: Event) -> Result<SaveOutcome> {
    tokio::task::spawn_blocking(move || store.save_event(&event))
        .await
        .context("event store save task failed")?
}

async fn handle_req_frame(
    state: &RelayServerState,
    session: &mut RelayConnectionSession,
    subscription_id: String,
    filters: Vec<Filter>,
) -> Vec<RelayMessage> {
    for filter in &filters {
        let admission = state.hooks.query_admission(&*session, filter);
        if admission.deny {
            session.subscriptions.remove(&subscription_id);
            debug!(
                connection_id = session.connection_id,
                peer = %session.peer,
                subscription_id = subscription_id.as_str(),
                reason = admission.reason.as_str(),
                "query denied"
            );
            return vec![RelayMessage::Closed {
                subscription_id,
                message: admission.reason,
            }];
        }
    }

    let events = match query_stored_events(Arc::clone(&state.config.store), filters.clone()).await
    {
        Ok(events) => events,
        Err(error) => {
            warn!(
                connection_id = session.connection_id,
                store = state.config.store.label(),
                subscription_id = subscription_id.as_str(),
                %error,
                "event store query failed"
            );
            return vec![RelayMessage::Closed {
                subscription_id,
                message: QUERY_FAILURE_MESSAGE.to_string(),
            }];
        }
    };

    let mut replies = Vec::with_capacity(events.len() + 1);
    replies.extend(events.into_iter().map(|event| RelayMessage::Event {
        subscription_id: subscription_id.clone(),
        event,
    }));
    replies.push(RelayMessage::Eose {
        subscription_id: subscription_id.clone(),
    });
    session.subscriptions.insert(subscription_id, filters);
    replies
}

async fn handle_event_frame(
    state: &RelayServerState,
    session: &RelayConnectionSession,
    event: Event,
) -> RelayMessage {
    if let Err(error) = event.verify() {
        return ok_reply(&event, false, format!("invalid: {error}"));
    }

    let admission = state.hooks.write_admission(session, &event);
    if admission.deny {
        debug!(
            connection_id = session.connection_id,
            peer = %session.peer,
            event_id = event.id.as_str(),
            reason = admission.reason.as_str(),
            "write denied"
        );
        return ok_reply(&event, false, admission.reason);
    }

    if event.is_ephemeral() {
        let reply = ok_reply(&event, true, "");
        let _ = state.live_events.send(Arc::new(event));
        return reply;
    }

    match save_stored_event(Arc::clone(&state.config.store), event.clone()).await {
        Ok(SaveOutcome::Stored) => {
            let reply = ok_reply(&event, true, "");
            let _ = state.live_events.send(Arc::new(event));
            reply
        }
        Ok(SaveOutcome::Duplicate) => ok_reply(&event, true, DUPLICATE_EVENT_MESSAGE),
        Ok(SaveOutcome::Stale) => ok_reply(&event, false, STALE_EVENT_MESSAGE),
        Err(error) => {
            warn!(
                connection_id = session.connection_id,
                store = state.config.store.label(),
                event_id = event.id.as_str(),
                %error,
                "event store save failed"
            );
            ok_reply(&event, false, STORE_FAILURE_MESSAGE)
        }
    }
}

pub(super) async fn dispatch_relay_text_frame(
    state: &RelayServerState,
    session: &mut RelayConnectionSession,
    raw: &str,
) -> Vec<RelayMessage> {
    let message = match parse_client_message(raw) {
        Ok(message) => message,
        Err(error) => {
            let message = format!("{error:#}");
            debug!(
                connection_id = session.connection_id,
                code = classify_client_message_error(message.as_str()),
                error = message.as_str(),
                "malformed client frame"
            );
            return vec![notice(format!("error: {message}"))];
        }
    };

    match message {
        ClientMessage::Event(event) => vec![handle_event_frame(state, session, event).await],
        ClientMessage::Req {
            subscription_id,
            filters,
        } => handle_req_frame(state, session, subscription_id, filters).await,
        ClientMessage::Close { subscription_id } => {
            session.subscriptions.remove(&subscription_id);
            Vec::new()
        }
        ClientMessage::Auth(event) => vec![apply_auth_event(state, session, &event)],
    }
}

/// Live events for `session`, re-checking admission so a member removed by
/// an allow-list refresh stops receiving them.
fn live_event_deliveries(
    state: &RelayServerState,
    session: &RelayConnectionSession,
    event: &Event,
) -> Vec<RelayMessage> {
    session
        .matching_subscriptions(event)
        .into_iter()
        .filter(|subscription_id| {
            session
                .subscriptions
                .get(subscription_id)
                .and_then(|filters| filters.iter().find(|filter| filter.matches(event)))
                .is_some_and(|filter| !state.hooks.query_admission(session, filter).deny)
        })
        .map(|subscription_id| RelayMessage::Event {
            subscription_id,
            event: event.clone(),
        })
        .collect()
}

pub(super) async fn run_relay_ws_connection(
    state: Arc<RelayServerState>,
    socket: WebSocket,
    connection_id: u64,
    peer: SocketAddr,
) {
    let mut session = RelayConnectionSession::new(connection_id, peer);
    let mut live_events = state.live_events.subscribe();
    let (mut sender, mut receiver) = socket.split();
    info!(connection_id, peer = %peer, "relay connection opened");

    let challenge = RelayMessage::Auth {
        challenge: session.challenge.clone(),
    };
    if sender.send(relay_ws_message(&challenge)).await.is_err() {
        return;
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(
        RELAY_WS_HEARTBEAT_INTERVAL_SECONDS.max(1),
    ));
    heartbeat.tick().await;

    'connection: loop {
        tokio::select! {
            inbound = receiver.next() => {
                let Some(inbound) = inbound else {
                    break;
                };
                let message = match inbound {
                    Ok(message) => message,
                    Err(_) => break,
                };

                let replies = match message {
                    WsMessage::Text(text) => {
                        dispatch_relay_text_frame(&state, &mut session, text.as_str()).await
                    }
                    WsMessage::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => dispatch_relay_text_frame(&state, &mut session, text.as_str()).await,
                        Err(_) => vec![notice("error: binary frames must be UTF-8 encoded JSON text")],
                    },
                    WsMessage::Ping(payload) => {
                        if sender.send(WsMessage::Pong(payload)).await.is_err() {
                            break;
                        }
                        Vec::new()
                    }
                    WsMessage::Pong(_) => Vec::new(),
                    WsMessage::Close(_) => break,
                };
                for reply in &replies {
                    if sender.send(relay_ws_message(reply)).await.is_err() {
                        break 'connection;
                    }
                }
            }
            live = live_events.recv() => {
                let event = match live {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(connection_id, skipped, "connection lagged behind live events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                for delivery in live_event_deliveries(&state, &session, &event) {
                    if sender.send(relay_ws_message(&delivery)).await.is_err() {
                        break 'connection;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!(
        connection_id,
        peer = %peer,
        authenticated = session.authenticated.is_some(),
        subscriptions = session.subscriptions.len(),
        "relay connection closed"
    );
}
