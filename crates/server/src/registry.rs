use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use shared::{
    domain::{ConnectionId, Role, Session, SessionId, UserId},
    protocol::{SyncMessage, SyncPayload},
};
use storage::Storage;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

const ROOM_CHANNEL_CAPACITY: usize = 256;

/// A connection's delivery of a room broadcast skips events it originated
/// itself, so `origin` travels alongside every message.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub origin: ConnectionId,
    pub message: SyncMessage,
}

#[derive(Debug, Clone, Copy)]
struct Member {
    user_id: UserId,
    role: Role,
}

struct Room {
    tx: broadcast::Sender<RoomEvent>,
    members: HashMap<ConnectionId, Member>,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(ROOM_CHANNEL_CAPACITY);
        Self {
            tx,
            members: HashMap::new(),
        }
    }
}

pub struct JoinedRoom {
    pub connection_id: ConnectionId,
    pub receiver: broadcast::Receiver<RoomEvent>,
}

/// Server-side room bookkeeping: which connections belong to which session,
/// who is the presenter, and fan-out of sync messages to the room. Rooms
/// are runtime-only; the durable session record lives in storage.
pub struct SessionRegistry {
    storage: Storage,
    rooms: Mutex<HashMap<SessionId, Room>>,
}

impl SessionRegistry {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Admits a connection into a session room. Joins to unknown or ended
    /// sessions are refused, which the socket layer turns into an immediate
    /// disconnect. A joining viewer is announced to the rest of the room.
    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: UserId,
        role: Role,
    ) -> Result<JoinedRoom> {
        let session = self
            .storage
            .get_session(session_id)
            .await?
            .with_context(|| format!("session {session_id} does not exist"))?;
        if !session.is_active {
            bail!("session {session_id} has ended");
        }

        let connection_id = ConnectionId::new();
        let mut rooms = self.rooms.lock().await;
        let room = rooms.entry(session_id).or_insert_with(Room::new);
        let receiver = room.tx.subscribe();
        room.members.insert(connection_id, Member { user_id, role });
        info!(%session_id, %user_id, ?role, members = room.members.len(), "connection joined session");

        if role == Role::Viewer {
            let _ = room.tx.send(RoomEvent {
                origin: connection_id,
                message: SyncMessage::new(session_id, SyncPayload::StudentJoined { user_id }),
            });
        }

        Ok(JoinedRoom {
            connection_id,
            receiver,
        })
    }

    /// Routes one inbound sync message. State writes are accepted from the
    /// presenter only; a viewer's attempt is dropped without a reply to the
    /// sender, but traced so the drop is observable server-side.
    pub async fn handle_message(
        &self,
        session_id: SessionId,
        connection_id: ConnectionId,
        message: SyncMessage,
    ) -> Result<()> {
        let (sender, tx) = {
            let rooms = self.rooms.lock().await;
            let room = rooms
                .get(&session_id)
                .with_context(|| format!("no room for session {session_id}"))?;
            let member = room
                .members
                .get(&connection_id)
                .context("connection is not a member of this room")?;
            (*member, room.tx.clone())
        };

        match &message.payload {
            SyncPayload::ViewerStateChange(state) => {
                if sender.role != Role::Presenter {
                    warn!(%session_id, user_id = %sender.user_id, "dropping viewer state write from non-presenter");
                    return Ok(());
                }
                self.storage.update_viewer_state(session_id, state).await?;
                let _ = tx.send(RoomEvent {
                    origin: connection_id,
                    message,
                });
            }
            SyncPayload::CommandExecuted {
                user_id,
                command,
                success,
            } => {
                // Any participant's execution is auditable and mirrored.
                self.storage
                    .record_command_execution(session_id, *user_id, command, *success)
                    .await?;
                let _ = tx.send(RoomEvent {
                    origin: connection_id,
                    message,
                });
            }
            SyncPayload::SessionUpdate(_)
            | SyncPayload::StudentJoined { .. }
            | SyncPayload::StudentLeft { .. } => {
                // Server-originated types; clients do not get to forge them.
                warn!(%session_id, message_type = ?message.message_type(), "dropping server-only message from client");
            }
        }
        Ok(())
    }

    /// Pushes a session-level update (e.g. the session ending) to the room.
    pub async fn broadcast_session_update(&self, session: &Session) {
        let rooms = self.rooms.lock().await;
        if let Some(room) = rooms.get(&session.id) {
            let _ = room.tx.send(RoomEvent {
                origin: ConnectionId::new(),
                message: SyncMessage::new(
                    session.id,
                    SyncPayload::SessionUpdate(session.clone()),
                ),
            });
        }
    }

    /// Removes a connection; announces departing viewers and drops the room
    /// entry once it is empty.
    pub async fn leave(&self, session_id: SessionId, connection_id: ConnectionId) {
        let mut rooms = self.rooms.lock().await;
        let Some(room) = rooms.get_mut(&session_id) else {
            return;
        };
        let Some(member) = room.members.remove(&connection_id) else {
            return;
        };
        debug!(%session_id, user_id = %member.user_id, members = room.members.len(), "connection left session");

        if room.members.is_empty() {
            rooms.remove(&session_id);
            return;
        }
        if member.role == Role::Viewer {
            let _ = room.tx.send(RoomEvent {
                origin: connection_id,
                message: SyncMessage::new(
                    session_id,
                    SyncPayload::StudentLeft {
                        user_id: member.user_id,
                    },
                ),
            });
        }
    }

    pub async fn room_size(&self, session_id: SessionId) -> usize {
        self.rooms
            .lock()
            .await
            .get(&session_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
