//! Relay server tests over a real websocket.
use super::*;
use crate::event_store::MemoryEventStore;
use frens_access::{AllowList, QUERY_AUTH_REQUIRED_REASON, WRITE_AUTH_REQUIRED_REASON};
use frens_core::{keypair_from_secret_hex, parse_relay_message, KIND_CLIENT_AUTH, KIND_TEXT_NOTE};
use reqwest::Client;
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientWsMessage};

type TestSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const MEMBER_SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000003";
const SECOND_MEMBER_SECRET: &str =
    "0000000000000000000000000000000000000000000000000000000000000009";
const STRANGER_SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000005";

fn pubkey_of(secret: &str) -> String {
    signed_note(secret, "probe").pubkey
}

fn signed_note(secret: &str, content: &str) -> Event {
    let keypair = keypair_from_secret_hex(secret).expect("fixture keypair");
    Event::sign(
        &keypair,
        current_unix_timestamp(),
        KIND_TEXT_NOTE,
        Vec::new(),
        content,
    )
}

fn signed_auth(secret: &str, challenge: &str) -> Event {
    let keypair = keypair_from_secret_hex(secret).expect("fixture keypair");
    Event::sign(
        &keypair,
        current_unix_timestamp(),
        KIND_CLIENT_AUTH,
        vec![
            vec!["relay".to_string(), "ws://127.0.0.1/".to_string()],
            vec!["challenge".to_string(), challenge.to_string()],
        ],
        "",
    )
}

fn test_state(store: Arc<dyn EventStore>) -> Arc<RelayServerState> {
    let members = AllowList::new(vec![
        Identity::new(pubkey_of(MEMBER_SECRET)),
        Identity::new(pubkey_of(SECOND_MEMBER_SECRET)),
    ]);
    Arc::new(RelayServerState::new(RelayServerConfig {
        bind: "127.0.0.1:0".to_string(),
        info: RelayInfo {
            name: "frens test relay".to_string(),
            pubkey: pubkey_of(MEMBER_SECRET),
            description: "relay under test".to_string(),
        },
        service_url: None,
        gate: AuthorizationGate::from_allowlist(members),
        allowlist_source: Arc::new(AllowListSource::Static {
            path: "users.json".into(),
        }),
        allowlist_refresh_interval: None,
        store,
    }))
}

async fn spawn_test_server(
    state: Arc<RelayServerState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral listener")?;
    let addr = listener.local_addr().context("resolve listener addr")?;
    let app = build_relay_router(state);
    let handle = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    Ok((addr, handle))
}

async fn next_relay_message(socket: &mut TestSocket) -> RelayMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("relay reply before timeout")
            .expect("socket still open")
            .expect("websocket frame");
        match frame {
            ClientWsMessage::Text(text) => {
                return parse_relay_message(text.as_str()).expect("relay frame parses");
            }
            ClientWsMessage::Ping(_) | ClientWsMessage::Pong(_) => continue,
            other => panic!("unexpected websocket frame: {other:?}"),
        }
    }
}

async fn send_frame(socket: &mut TestSocket, frame: serde_json::Value) {
    socket
        .send(ClientWsMessage::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Connects and returns the socket with the challenge the relay issued.
async fn connect_client(addr: SocketAddr) -> (TestSocket, String) {
    let (mut socket, _) = connect_async(format!("ws://{addr}/"))
        .await
        .expect("connect websocket");
    match next_relay_message(&mut socket).await {
        RelayMessage::Auth { challenge } => (socket, challenge),
        other => panic!("expected AUTH challenge first, got {other:?}"),
    }
}

async fn authenticate(socket: &mut TestSocket, secret: &str, challenge: &str) {
    let auth = signed_auth(secret, challenge);
    send_frame(socket, serde_json::json!(["AUTH", auth])).await;
    assert_eq!(
        next_relay_message(socket).await,
        RelayMessage::Ok {
            event_id: auth.id.clone(),
            accepted: true,
            message: String::new(),
        }
    );
}

#[tokio::test]
async fn integration_unauthenticated_req_is_closed_with_query_reason() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let (mut socket, _challenge) = connect_client(addr).await;

    send_frame(&mut socket, serde_json::json!(["REQ", "feed", {"kinds": [1]}])).await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Closed {
            subscription_id: "feed".to_string(),
            message: QUERY_AUTH_REQUIRED_REASON.to_string(),
        }
    );
    handle.abort();
}

#[tokio::test]
async fn functional_unauthenticated_event_is_rejected_with_write_reason() {
    let store = Arc::new(MemoryEventStore::default());
    let state = test_state(store.clone());
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let (mut socket, _challenge) = connect_client(addr).await;

    let note = signed_note(MEMBER_SECRET, "not yet authenticated");
    send_frame(&mut socket, serde_json::json!(["EVENT", note])).await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Ok {
            event_id: note.id.clone(),
            accepted: false,
            message: WRITE_AUTH_REQUIRED_REASON.to_string(),
        }
    );
    assert!(store.is_empty());
    handle.abort();
}

#[tokio::test]
async fn integration_member_can_publish_and_query_after_auth() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let (mut socket, challenge) = connect_client(addr).await;
    authenticate(&mut socket, MEMBER_SECRET, &challenge).await;

    let note = signed_note(MEMBER_SECRET, "hello frens");
    send_frame(&mut socket, serde_json::json!(["EVENT", note])).await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Ok {
            event_id: note.id.clone(),
            accepted: true,
            message: String::new(),
        }
    );

    send_frame(&mut socket, serde_json::json!(["EVENT", note])).await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Ok {
            event_id: note.id.clone(),
            accepted: true,
            message: DUPLICATE_EVENT_MESSAGE.to_string(),
        }
    );

    send_frame(
        &mut socket,
        serde_json::json!(["REQ", "feed", {"kinds": [1]}, {"authors": [note.pubkey]}]),
    )
    .await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Event {
            subscription_id: "feed".to_string(),
            event: note.clone(),
        }
    );
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Eose {
            subscription_id: "feed".to_string(),
        }
    );
    handle.abort();
}

#[tokio::test]
async fn functional_authenticated_non_member_is_still_denied() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let (mut socket, challenge) = connect_client(addr).await;
    authenticate(&mut socket, STRANGER_SECRET, &challenge).await;

    send_frame(&mut socket, serde_json::json!(["REQ", "peek", {}])).await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Closed {
            subscription_id: "peek".to_string(),
            message: QUERY_AUTH_REQUIRED_REASON.to_string(),
        }
    );

    let note = signed_note(STRANGER_SECRET, "let me in");
    send_frame(&mut socket, serde_json::json!(["EVENT", note])).await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Ok {
            event_id: note.id.clone(),
            accepted: false,
            message: WRITE_AUTH_REQUIRED_REASON.to_string(),
        }
    );
    handle.abort();
}

#[tokio::test]
async fn regression_second_auth_identity_is_refused() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let (mut socket, challenge) = connect_client(addr).await;
    authenticate(&mut socket, STRANGER_SECRET, &challenge).await;

    let switch = signed_auth(MEMBER_SECRET, &challenge);
    send_frame(&mut socket, serde_json::json!(["AUTH", switch])).await;
    assert_eq!(
        next_relay_message(&mut socket).await,
        RelayMessage::Ok {
            event_id: switch.id.clone(),
            accepted: false,
            message: ALREADY_AUTHENTICATED_MESSAGE.to_string(),
        }
    );

    send_frame(&mut socket, serde_json::json!(["REQ", "still-denied", {}])).await;
    assert!(matches!(
        next_relay_message(&mut socket).await,
        RelayMessage::Closed { .. }
    ));
    handle.abort();
}

#[tokio::test]
async fn regression_auth_with_wrong_challenge_leaves_connection_unauthenticated() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let (mut socket, _challenge) = connect_client(addr).await;

    let auth = signed_auth(MEMBER_SECRET, "not-the-challenge");
    send_frame(&mut socket, serde_json::json!(["AUTH", auth])).await;
    match next_relay_message(&mut socket).await {
        RelayMessage::Ok {
            accepted, message, ..
        } => {
            assert!(!accepted);
            assert!(message.starts_with("invalid: "), "{message}");
        }
        other => panic!("expected OK, got {other:?}"),
    }

    send_frame(&mut socket, serde_json::json!(["REQ", "feed", {}])).await;
    assert!(matches!(
        next_relay_message(&mut socket).await,
        RelayMessage::Closed { .. }
    ));
    handle.abort();
}

#[tokio::test]
async fn functional_live_subscription_receives_events_from_other_connections() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");

    let (mut reader, reader_challenge) = connect_client(addr).await;
    authenticate(&mut reader, MEMBER_SECRET, &reader_challenge).await;
    send_frame(&mut reader, serde_json::json!(["REQ", "live", {"kinds": [1]}])).await;
    assert!(matches!(
        next_relay_message(&mut reader).await,
        RelayMessage::Eose { .. }
    ));

    let (mut writer, writer_challenge) = connect_client(addr).await;
    authenticate(&mut writer, SECOND_MEMBER_SECRET, &writer_challenge).await;
    let note = signed_note(SECOND_MEMBER_SECRET, "live update");
    send_frame(&mut writer, serde_json::json!(["EVENT", note])).await;
    assert!(matches!(
        next_relay_message(&mut writer).await,
        RelayMessage::Ok { accepted: true, .. }
    ));

    assert_eq!(
        next_relay_message(&mut reader).await,
        RelayMessage::Event {
            subscription_id: "live".to_string(),
            event: note,
        }
    );

    send_frame(&mut reader, serde_json::json!(["CLOSE", "live"])).await;
    // Frames are handled in order, so the NOTICE proves the CLOSE landed.
    send_frame(&mut reader, serde_json::json!(["SYNC"])).await;
    assert!(matches!(
        next_relay_message(&mut reader).await,
        RelayMessage::Notice { .. }
    ));
    let late_note = signed_note(SECOND_MEMBER_SECRET, "after close");
    send_frame(&mut writer, serde_json::json!(["EVENT", late_note])).await;
    assert!(matches!(
        next_relay_message(&mut writer).await,
        RelayMessage::Ok { accepted: true, .. }
    ));
    let quiet = tokio::time::timeout(Duration::from_millis(200), reader.next()).await;
    assert!(quiet.is_err(), "closed subscription must not deliver events");
    handle.abort();
}

#[tokio::test]
async fn regression_malformed_frames_get_notice_and_connection_survives() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");
    let (mut socket, _challenge) = connect_client(addr).await;

    socket
        .send(ClientWsMessage::Text("[\"REQ\"".to_string().into()))
        .await
        .expect("send garbage");
    match next_relay_message(&mut socket).await {
        RelayMessage::Notice { message } => assert!(message.starts_with("error: ")),
        other => panic!("expected NOTICE, got {other:?}"),
    }

    send_frame(&mut socket, serde_json::json!(["SUBSCRIBE", "x"])).await;
    assert!(matches!(
        next_relay_message(&mut socket).await,
        RelayMessage::Notice { .. }
    ));

    let mut forged = signed_note(MEMBER_SECRET, "original");
    forged.content = "forged".to_string();
    send_frame(&mut socket, serde_json::json!(["EVENT", forged])).await;
    match next_relay_message(&mut socket).await {
        RelayMessage::Ok {
            accepted, message, ..
        } => {
            assert!(!accepted);
            assert!(message.starts_with("invalid: "), "{message}");
        }
        other => panic!("expected OK, got {other:?}"),
    }
    handle.abort();
}

#[tokio::test]
async fn functional_root_serves_nip11_document_to_http_clients() {
    let state = test_state(Arc::new(MemoryEventStore::default()));
    let (addr, handle) = spawn_test_server(state).await.expect("spawn server");

    let client = Client::new();
    let response = client
        .get(format!("http://{addr}/"))
        .header("accept", NIP11_CONTENT_TYPE)
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some(NIP11_CONTENT_TYPE)
    );
    let document = response
        .json::<serde_json::Value>()
        .await
        .expect("parse document");
    assert_eq!(document["name"], "frens test relay");
    assert_eq!(document["supported_nips"], serde_json::json!([1, 11, 42]));

    let plain = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .expect("send plain request");
    assert_eq!(plain.status(), StatusCode::OK);
    assert!(plain
        .text()
        .await
        .expect("read body")
        .contains("members-only"));
    handle.abort();
}
