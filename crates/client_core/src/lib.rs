use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use broker::ViewerAdapter;
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use shared::{
    command::Command,
    domain::{Session, SessionId, UserId},
    protocol::{JoinRequest, MessageType, SyncMessage, SyncPayload},
};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

type Handler = Arc<dyn Fn(&SyncMessage) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// One logical connection into a session room: a websocket for the live
/// sync stream plus plain HTTP for point-in-time reads.
///
/// Inbound messages are dispatched to typed subscribers in arrival order,
/// which is the only ordering the protocol guarantees (per connection, not
/// across publishers). Outbound messages are flushed in the order this
/// client enqueued them.
pub struct SessionClient {
    session_id: SessionId,
    server_url: String,
    http: Client,
    outbound: mpsc::UnboundedSender<SyncMessage>,
    subscriptions: Mutex<HashMap<MessageType, Vec<(SubscriptionId, Handler)>>>,
    next_subscription: AtomicU64,
    connected: Arc<AtomicBool>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("session_id", &self.session_id)
            .field("server_url", &self.server_url)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Connects and joins the session room. `server_url` is the http(s)
    /// base URL of the sync server; the handshake travels as query
    /// parameters, so a rejected join surfaces here as a connect error.
    pub async fn connect(server_url: &str, join: JoinRequest) -> Result<Arc<Self>> {
        let ws_url = websocket_url(server_url, &join)?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SyncMessage>();
        let connected = Arc::new(AtomicBool::new(true));

        let client = Arc::new(Self {
            session_id: join.session_id,
            server_url: server_url.trim_end_matches('/').to_string(),
            http: Client::new(),
            outbound,
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            connected: Arc::clone(&connected),
            reader_task: Mutex::new(None),
            writer_task: Mutex::new(None),
        });

        // Weak, so an abandoned client can actually be dropped.
        let reader_client = Arc::downgrade(&client);
        let reader_connected = Arc::clone(&connected);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                let Ok(Message::Text(text)) = frame else {
                    continue;
                };
                let Some(client) = reader_client.upgrade() else {
                    break;
                };
                match serde_json::from_str::<SyncMessage>(&text) {
                    Ok(message) => client.dispatch(&message).await,
                    Err(error) => {
                        warn!(%error, "dropping undecodable sync frame");
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
        });

        let writer_connected = Arc::clone(&connected);
        let writer_task = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            writer_connected.store(false, Ordering::SeqCst);
        });

        *client.reader_task.lock().await = Some(reader_task);
        *client.writer_task.lock().await = Some(writer_task);
        Ok(client)
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Subscribes a handler to one message type. Handlers for the same
    /// type run in registration order, one message at a time.
    pub async fn on(
        &self,
        message_type: MessageType,
        handler: impl Fn(&SyncMessage) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.subscriptions
            .lock()
            .await
            .entry(message_type)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription; returns whether it existed.
    pub async fn off(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.lock().await;
        for handlers in subscriptions.values_mut() {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            if handlers.len() < before {
                return true;
            }
        }
        false
    }

    /// Presenter-side: push a new viewer state to the room. The server
    /// drops this silently unless this connection joined as presenter.
    pub fn update_viewer_state(&self, state: shared::domain::ViewerState) -> Result<()> {
        self.enqueue(SyncPayload::ViewerStateChange(state))
    }

    /// Mirror a locally executed command to the rest of the room.
    pub fn send_command_executed(
        &self,
        user_id: UserId,
        command: &Command,
        success: bool,
    ) -> Result<()> {
        self.enqueue(SyncPayload::CommandExecuted {
            user_id,
            command: command.clone(),
            success,
        })
    }

    /// Point-in-time session read by join code: the late-joiner catch-up
    /// path. Local state built from this equals the presenter's
    /// last-persisted state, not the full event history.
    pub async fn fetch_session(&self, code: &str) -> Result<Session> {
        let url = format!("{}/sessions/{code}", self.server_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch session from {url}"))?;
        if !response.status().is_success() {
            return Err(anyhow!("session fetch returned {}", response.status()));
        }
        response.json().await.context("failed to decode session")
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.lock().await.take() {
            task.abort();
        }
    }

    fn enqueue(&self, payload: SyncPayload) -> Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("session connection is closed"));
        }
        self.outbound
            .send(SyncMessage::new(self.session_id, payload))
            .map_err(|_| anyhow!("session connection is closed"))
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.reader_task.get_mut().take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.get_mut().take() {
            task.abort();
        }
    }

    async fn dispatch(&self, message: &SyncMessage) {
        let handlers: Vec<Handler> = {
            let subscriptions = self.subscriptions.lock().await;
            subscriptions
                .get(&message.message_type())
                .map(|handlers| handlers.iter().map(|(_, handler)| handler.clone()).collect())
                .unwrap_or_default()
        };
        if handlers.is_empty() {
            debug!(message_type = ?message.message_type(), "no subscriber for message");
        }
        for handler in handlers {
            handler(message);
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.abort_tasks();
    }
}

/// Outbound network mirror: registered on a broker next to the local
/// rendering adapter, it forwards every executed command into the session
/// room so remote participants replay it.
pub struct RemoteMirrorAdapter {
    client: Arc<SessionClient>,
    user_id: UserId,
}

impl RemoteMirrorAdapter {
    pub fn new(client: Arc<SessionClient>, user_id: UserId) -> Self {
        Self { client, user_id }
    }
}

#[async_trait]
impl ViewerAdapter for RemoteMirrorAdapter {
    fn name(&self) -> &str {
        "remote-mirror"
    }

    async fn is_ready(&self) -> bool {
        self.client.is_connected()
    }

    async fn execute(&self, command: &Command) -> Result<()> {
        self.client.send_command_executed(self.user_id, command, true)
    }
}

fn websocket_url(server_url: &str, join: &JoinRequest) -> Result<String> {
    let base = if let Some(rest) = server_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(anyhow!("server_url must start with http:// or https://"));
    };
    let base = base.trim_end_matches('/');
    Ok(format!(
        "{base}/ws?sessionId={}&userId={}&role={}",
        join.session_id, join.user_id, join.role.as_str()
    ))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
