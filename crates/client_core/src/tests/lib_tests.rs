use std::time::Duration;

use axum::{
    extract::{
        ws::{Message as AxumWsMessage, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use shared::domain::{Role, StructureId, SystemTag, ViewerState};
use shared::command::{CommandAction, CommandSource};
use tokio::{net::TcpListener, time::timeout};

use super::*;

const WAIT: Duration = Duration::from_secs(5);

/// Stub sync server: replies to the first inbound frame with a scripted
/// sequence of messages and forwards everything the client sends into an
/// inspection channel.
#[derive(Clone)]
struct StubState {
    greetings: Vec<SyncMessage>,
    inbound: mpsc::UnboundedSender<SyncMessage>,
    session: Session,
}

async fn stub_ws(ws: WebSocketUpgrade, State(state): State<StubState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stub_ws_connection(socket, state))
}

async fn stub_ws_connection(mut socket: WebSocket, state: StubState) {
    let mut greeted = false;
    while let Some(Ok(frame)) = socket.recv().await {
        let AxumWsMessage::Text(text) = frame else {
            continue;
        };
        if let Ok(message) = serde_json::from_str::<SyncMessage>(&text) {
            let _ = state.inbound.send(message);
        }
        if !greeted {
            greeted = true;
            for greeting in &state.greetings {
                let text = serde_json::to_string(greeting).expect("serialize greeting");
                if socket.send(AxumWsMessage::Text(text)).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn stub_session(
    State(state): State<StubState>,
    Path(_code): Path<String>,
) -> Json<Session> {
    Json(state.session.clone())
}

fn sample_session() -> Session {
    let mut viewer_state = ViewerState::default();
    viewer_state.visible_systems.insert(SystemTag::Cardiovascular);
    Session {
        id: SessionId(7),
        code: "ABCDEF".to_string(),
        title: "Thorax".to_string(),
        owner_id: UserId(1),
        is_active: true,
        viewer_state,
    }
}

async fn spawn_stub(greetings: Vec<SyncMessage>) -> (String, mpsc::UnboundedReceiver<SyncMessage>) {
    let (inbound, inbound_rx) = mpsc::unbounded_channel();
    let state = StubState {
        greetings,
        inbound,
        session: sample_session(),
    };
    let app = Router::new()
        .route("/ws", get(stub_ws))
        .route("/sessions/:code", get(stub_session))
        .with_state(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://127.0.0.1:{}", addr.port()), inbound_rx)
}

fn join_as(role: Role) -> JoinRequest {
    JoinRequest {
        session_id: SessionId(7),
        user_id: UserId(1),
        role,
    }
}

async fn wait_until(check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached before timeout"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn typed_subscriptions_receive_messages_in_arrival_order() {
    let greetings = vec![
        SyncMessage::new(SessionId(7), SyncPayload::StudentJoined { user_id: UserId(2) }),
        SyncMessage::new(
            SessionId(7),
            SyncPayload::ViewerStateChange(ViewerState::default()),
        ),
        SyncMessage::new(SessionId(7), SyncPayload::StudentJoined { user_id: UserId(3) }),
    ];
    let (server_url, _inbound_rx) = spawn_stub(greetings).await;
    let client = SessionClient::connect(&server_url, join_as(Role::Viewer))
        .await
        .expect("connect");

    let joined = Arc::new(std::sync::Mutex::new(Vec::<i64>::new()));
    let joined_sink = Arc::clone(&joined);
    client
        .on(MessageType::StudentJoined, move |message| {
            if let SyncPayload::StudentJoined { user_id } = &message.payload {
                joined_sink.lock().expect("lock").push(user_id.0);
            }
        })
        .await;
    let states = Arc::new(std::sync::Mutex::new(0usize));
    let states_sink = Arc::clone(&states);
    client
        .on(MessageType::ViewerStateChange, move |_| {
            *states_sink.lock().expect("lock") += 1;
        })
        .await;

    // First outbound frame triggers the scripted replies.
    client
        .update_viewer_state(ViewerState::default())
        .expect("enqueue");

    wait_until(|| joined.lock().expect("lock").len() == 2).await;
    assert_eq!(*joined.lock().expect("lock"), vec![2, 3]);
    assert_eq!(*states.lock().expect("lock"), 1);

    client.close().await;
}

#[tokio::test]
async fn off_stops_delivery() {
    let greetings = vec![SyncMessage::new(
        SessionId(7),
        SyncPayload::StudentJoined { user_id: UserId(2) },
    )];
    let (server_url, _inbound_rx) = spawn_stub(greetings).await;
    let client = SessionClient::connect(&server_url, join_as(Role::Viewer))
        .await
        .expect("connect");

    let seen = Arc::new(std::sync::Mutex::new(0usize));
    let seen_sink = Arc::clone(&seen);
    let subscription = client
        .on(MessageType::StudentJoined, move |_| {
            *seen_sink.lock().expect("lock") += 1;
        })
        .await;
    assert!(client.off(subscription).await);
    assert!(!client.off(subscription).await);

    client
        .update_viewer_state(ViewerState::default())
        .expect("enqueue");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*seen.lock().expect("lock"), 0);

    client.close().await;
}

#[tokio::test]
async fn outbound_messages_keep_enqueue_order() {
    let (server_url, mut inbound_rx) = spawn_stub(Vec::new()).await;
    let client = SessionClient::connect(&server_url, join_as(Role::Presenter))
        .await
        .expect("connect");

    let mut state = ViewerState::default();
    state.highlighted_id = Some(StructureId::from("heart"));
    client.update_viewer_state(state.clone()).expect("state");
    let command = Command::new(CommandSource::Voice, CommandAction::Show, "heart");
    client
        .send_command_executed(UserId(1), &command, true)
        .expect("command");

    let first = timeout(WAIT, inbound_rx.recv())
        .await
        .expect("first in time")
        .expect("first");
    assert_eq!(first.session_id, SessionId(7));
    assert_eq!(first.payload, SyncPayload::ViewerStateChange(state));

    let second = timeout(WAIT, inbound_rx.recv())
        .await
        .expect("second in time")
        .expect("second");
    match second.payload {
        SyncPayload::CommandExecuted {
            user_id,
            command: mirrored,
            success,
        } => {
            assert_eq!(user_id, UserId(1));
            assert_eq!(mirrored.id, command.id);
            assert!(success);
        }
        other => panic!("expected CommandExecuted, got {other:?}"),
    }

    client.close().await;
}

#[tokio::test]
async fn fetch_session_reads_last_persisted_state() {
    let (server_url, _inbound_rx) = spawn_stub(Vec::new()).await;
    let client = SessionClient::connect(&server_url, join_as(Role::Viewer))
        .await
        .expect("connect");

    let session = client.fetch_session("ABCDEF").await.expect("fetch");
    assert_eq!(session, sample_session());
    assert!(session
        .viewer_state
        .visible_systems
        .contains(&SystemTag::Cardiovascular));

    client.close().await;
}

#[tokio::test]
async fn remote_mirror_adapter_forwards_executions() {
    let (server_url, mut inbound_rx) = spawn_stub(Vec::new()).await;
    let client = SessionClient::connect(&server_url, join_as(Role::Presenter))
        .await
        .expect("connect");
    let adapter = RemoteMirrorAdapter::new(Arc::clone(&client), UserId(1));

    assert!(adapter.is_ready().await);
    let command = Command::new(CommandSource::Nlp, CommandAction::Highlight, "heart");
    adapter.execute(&command).await.expect("forwarded");

    let mirrored = timeout(WAIT, inbound_rx.recv())
        .await
        .expect("in time")
        .expect("message");
    assert!(matches!(
        mirrored.payload,
        SyncPayload::CommandExecuted { command: ref c, .. } if c.id == command.id
    ));

    client.close().await;
    assert!(!adapter.is_ready().await);
    assert!(adapter.execute(&command).await.is_err());
}

#[tokio::test]
async fn rejects_unparseable_server_url() {
    let err = SessionClient::connect("ftp://nope", join_as(Role::Viewer))
        .await
        .expect_err("bad scheme");
    assert!(err.to_string().contains("http"));
}
