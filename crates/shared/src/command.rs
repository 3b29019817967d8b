use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandSource {
    Voice,
    Ui,
    Nlp,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandAction {
    Show,
    Hide,
    Highlight,
    Isolate,
    Reset,
    Rotate,
    Zoom,
    SetTransparency,
}

impl CommandAction {
    /// Actions directed at a specific structure need a non-empty target;
    /// view controls operate on the scene as a whole.
    pub fn requires_target(self) -> bool {
        !matches!(self, Self::Reset | Self::Rotate | Self::Zoom)
    }
}

/// A discrete, validated intent against the visualization. Immutable once
/// built; processors that rewrite the target produce a new command via
/// [`Command::with_target`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub id: Uuid,
    pub source: CommandSource,
    pub action: CommandAction,
    /// Free text until a processor resolves it to a canonical identifier.
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Command {
    pub fn new(source: CommandSource, action: CommandAction, target: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            action,
            target: target.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Copy of this command with the target replaced, keeping id and
    /// provenance so results still correlate with the original intent.
    pub fn with_target(&self, target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandFailure {
    #[error("command validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },
    #[error("no processor registered for action {action:?}")]
    NoProcessor { action: CommandAction },
    #[error("processor failed: {message}")]
    Processor { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub command: Command,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn ok(command: Command) -> Self {
        Self {
            success: true,
            command,
            error: None,
            metadata: None,
        }
    }

    pub fn failed(command: Command, error: CommandFailure) -> Self {
        Self {
            success: false,
            command,
            error: Some(error),
            metadata: None,
        }
    }
}
