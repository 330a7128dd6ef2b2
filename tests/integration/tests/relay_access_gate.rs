use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use frens_access::{
    AllowListHandle, AllowListSource, AuthorizationGate, QUERY_AUTH_REQUIRED_REASON,
    WRITE_AUTH_REQUIRED_REASON,
};
use frens_core::{
    current_unix_timestamp, keypair_from_secret_hex, parse_relay_message, Event, RelayMessage,
    KIND_CLIENT_AUTH, KIND_TEXT_NOTE,
};
use frens_relay::{serve_relay, MemoryEventStore, RelayInfo, RelayServerConfig, SqliteEventStore};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as ClientWsMessage};

type TestSocket =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

const MEMBER_SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000003";
const LATE_MEMBER_SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000007";
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

fn write_members(path: &Path, secrets: &[&str]) {
    let frens = secrets
        .iter()
        .enumerate()
        .map(|(index, secret)| json!({"username": format!("fren{index}"), "pubkey": pubkey_of(secret)}))
        .collect::<Vec<_>>();
    std::fs::write(path, json!({ "frens": frens }).to_string()).expect("write users.json");
}

struct RunningRelay {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl RunningRelay {
    fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("relay stops before timeout")
            .expect("relay task joins")
            .expect("relay exits cleanly");
    }
}

async fn start_relay(
    workspace: &TempDir,
    refresh: Option<Duration>,
    store: Arc<dyn frens_relay::EventStore>,
) -> Result<RunningRelay> {
    let source = Arc::new(AllowListSource::Static {
        path: workspace.path().join("users.json"),
    });
    let allowlist = source.resolve().await.context("resolve static allow-list")?;
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind ephemeral listener")?;
    let addr = listener.local_addr().context("resolve listener addr")?;
    let config = RelayServerConfig {
        bind: addr.to_string(),
        info: RelayInfo {
            name: "frens integration relay".to_string(),
            pubkey: pubkey_of(MEMBER_SECRET),
            description: "members only".to_string(),
        },
        service_url: Some(format!("ws://{addr}/")),
        gate: AuthorizationGate::new(AllowListHandle::new(allowlist)),
        allowlist_source: source,
        allowlist_refresh_interval: refresh,
        store,
    };
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(serve_relay(listener, config, async move {
        let _ = shutdown_rx.await;
    }));
    Ok(RunningRelay {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    })
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

async fn connect_client(relay: &RunningRelay) -> (TestSocket, String) {
    let (mut socket, _) = connect_async(relay.url()).await.expect("connect websocket");
    match next_relay_message(&mut socket).await {
        RelayMessage::Auth { challenge } => (socket, challenge),
        other => panic!("expected AUTH challenge first, got {other:?}"),
    }
}

async fn authenticate(socket: &mut TestSocket, relay: &RunningRelay, secret: &str, challenge: &str) {
    let keypair = keypair_from_secret_hex(secret).expect("fixture keypair");
    let auth = Event::sign(
        &keypair,
        current_unix_timestamp(),
        KIND_CLIENT_AUTH,
        vec![
            vec!["relay".to_string(), relay.url()],
            vec!["challenge".to_string(), challenge.to_string()],
        ],
        "",
    );
    send_frame(socket, json!(["AUTH", auth])).await;
    match next_relay_message(socket).await {
        RelayMessage::Ok {
            event_id, accepted, ..
        } => {
            assert_eq!(event_id, auth.id);
            assert!(accepted, "AUTH should be accepted");
        }
        other => panic!("expected OK for AUTH, got {other:?}"),
    }
}

/// Sends a REQ and reports whether the relay admitted it.
async fn query_admitted(socket: &mut TestSocket, subscription: &str) -> bool {
    send_frame(socket, json!(["REQ", subscription, {"kinds": [KIND_TEXT_NOTE]}])).await;
    loop {
        match next_relay_message(socket).await {
            RelayMessage::Eose { subscription_id } if subscription_id == subscription => {
                return true
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } if subscription_id == subscription => {
                assert_eq!(message, QUERY_AUTH_REQUIRED_REASON);
                return false;
            }
            RelayMessage::Event { .. } => continue,
            other => panic!("unexpected reply to REQ: {other:?}"),
        }
    }
}

#[tokio::test]
async fn integration_static_allowlist_gates_queries_and_writes_end_to_end() {
    let workspace = tempdir().expect("tempdir");
    write_members(&workspace.path().join("users.json"), &[MEMBER_SECRET]);
    let relay = start_relay(&workspace, None, Arc::new(MemoryEventStore::default()))
        .await
        .expect("start relay");

    let (mut anonymous, _) = connect_client(&relay).await;
    assert!(!query_admitted(&mut anonymous, "anon").await);
    let note = signed_note(MEMBER_SECRET, "unauthenticated attempt");
    send_frame(&mut anonymous, json!(["EVENT", note])).await;
    assert_eq!(
        next_relay_message(&mut anonymous).await,
        RelayMessage::Ok {
            event_id: note.id.clone(),
            accepted: false,
            message: WRITE_AUTH_REQUIRED_REASON.to_string(),
        }
    );

    let (mut member, challenge) = connect_client(&relay).await;
    authenticate(&mut member, &relay, MEMBER_SECRET, &challenge).await;
    let note = signed_note(MEMBER_SECRET, "hello frens");
    send_frame(&mut member, json!(["EVENT", note])).await;
    assert_eq!(
        next_relay_message(&mut member).await,
        RelayMessage::Ok {
            event_id: note.id.clone(),
            accepted: true,
            message: String::new(),
        }
    );
    send_frame(&mut member, json!(["REQ", "feed", {"kinds": [KIND_TEXT_NOTE]}])).await;
    assert_eq!(
        next_relay_message(&mut member).await,
        RelayMessage::Event {
            subscription_id: "feed".to_string(),
            event: note.clone(),
        }
    );
    assert_eq!(
        next_relay_message(&mut member).await,
        RelayMessage::Eose {
            subscription_id: "feed".to_string(),
        }
    );

    let (mut stranger, challenge) = connect_client(&relay).await;
    authenticate(&mut stranger, &relay, STRANGER_SECRET, &challenge).await;
    assert!(!query_admitted(&mut stranger, "peek").await);

    drop((anonymous, member, stranger));
    relay.stop().await;
}

#[tokio::test]
async fn integration_refresh_runtime_admits_members_added_after_startup() {
    let workspace = tempdir().expect("tempdir");
    let users = workspace.path().join("users.json");
    write_members(&users, &[MEMBER_SECRET]);
    let relay = start_relay(
        &workspace,
        Some(Duration::from_millis(100)),
        Arc::new(MemoryEventStore::default()),
    )
    .await
    .expect("start relay");

    let (mut late, challenge) = connect_client(&relay).await;
    authenticate(&mut late, &relay, LATE_MEMBER_SECRET, &challenge).await;
    assert!(!query_admitted(&mut late, "before").await);

    write_members(&users, &[MEMBER_SECRET, LATE_MEMBER_SECRET]);
    let mut admitted = false;
    for attempt in 0..50 {
        if query_admitted(&mut late, &format!("after-{attempt}")).await {
            admitted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(admitted, "refreshed allow-list should admit the new member");

    drop(late);
    relay.stop().await;
}

#[tokio::test]
async fn integration_sqlite_store_survives_relay_restart() {
    let workspace = tempdir().expect("tempdir");
    write_members(&workspace.path().join("users.json"), &[MEMBER_SECRET]);
    let db_path = workspace.path().join("relay.sqlite");

    let store = SqliteEventStore::open(&db_path).expect("open sqlite store");
    let relay = start_relay(&workspace, None, Arc::new(store))
        .await
        .expect("start relay");
    let (mut member, challenge) = connect_client(&relay).await;
    authenticate(&mut member, &relay, MEMBER_SECRET, &challenge).await;
    let note = signed_note(MEMBER_SECRET, "persisted");
    send_frame(&mut member, json!(["EVENT", note])).await;
    assert!(matches!(
        next_relay_message(&mut member).await,
        RelayMessage::Ok { accepted: true, .. }
    ));
    drop(member);
    relay.stop().await;

    let store = SqliteEventStore::open(&db_path).expect("reopen sqlite store");
    let relay = start_relay(&workspace, None, Arc::new(store))
        .await
        .expect("restart relay");
    let (mut member, challenge) = connect_client(&relay).await;
    authenticate(&mut member, &relay, MEMBER_SECRET, &challenge).await;
    send_frame(&mut member, json!(["REQ", "history", {"authors": [note.pubkey]}])).await;
    assert_eq!(
        next_relay_message(&mut member).await,
        RelayMessage::Event {
            subscription_id: "history".to_string(),
            event: note,
        }
    );
    assert_eq!(
        next_relay_message(&mut member).await,
        RelayMessage::Eose {
            subscription_id: "history".to_string(),
        }
    );
    drop(member);
    relay.stop().await;
}
