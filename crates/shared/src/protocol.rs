use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    command::Command,
    domain::{Role, Session, SessionId, UserId, ViewerState},
};

/// Connection handshake. All three fields are required; a join attempt
/// missing any of them is rejected before the socket upgrade (fail closed).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    ViewerStateChange,
    CommandExecuted,
    SessionUpdate,
    StudentJoined,
    StudentLeft,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPayload {
    ViewerStateChange(ViewerState),
    CommandExecuted {
        #[serde(rename = "userId")]
        user_id: UserId,
        command: Command,
        success: bool,
    },
    SessionUpdate(Session),
    StudentJoined {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    StudentLeft {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
}

impl SyncPayload {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ViewerStateChange(_) => MessageType::ViewerStateChange,
            Self::CommandExecuted { .. } => MessageType::CommandExecuted,
            Self::SessionUpdate(_) => MessageType::SessionUpdate,
            Self::StudentJoined { .. } => MessageType::StudentJoined,
            Self::StudentLeft { .. } => MessageType::StudentLeft,
        }
    }
}

/// Wire envelope: `{type, sessionId, data, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: SyncPayload,
}

impl SyncMessage {
    pub fn new(session_id: SessionId, payload: SyncPayload) -> Self {
        Self {
            session_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.payload.message_type()
    }
}
