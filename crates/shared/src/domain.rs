use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(SessionId);
id_newtype!(ExecutionId);

/// Per-socket identity, minted server-side at join time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical identifier for an anatomical structure. Stable and
/// language-independent, distinct from any display name or synonym.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureId(pub String);

impl StructureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StructureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StructureId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemTag {
    Skeletal,
    Muscular,
    Nervous,
    Cardiovascular,
    Respiratory,
    Digestive,
    Urinary,
    Lymphatic,
    Integumentary,
}

impl SystemTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skeletal => "SKELETAL",
            Self::Muscular => "MUSCULAR",
            Self::Nervous => "NERVOUS",
            Self::Cardiovascular => "CARDIOVASCULAR",
            Self::Respiratory => "RESPIRATORY",
            Self::Digestive => "DIGESTIVE",
            Self::Urinary => "URINARY",
            Self::Lymphatic => "LYMPHATIC",
            Self::Integumentary => "INTEGUMENTARY",
        }
    }
}

impl std::str::FromStr for SystemTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SKELETAL" => Ok(Self::Skeletal),
            "MUSCULAR" => Ok(Self::Muscular),
            "NERVOUS" => Ok(Self::Nervous),
            "CARDIOVASCULAR" => Ok(Self::Cardiovascular),
            "RESPIRATORY" => Ok(Self::Respiratory),
            "DIGESTIVE" => Ok(Self::Digestive),
            "URINARY" => Ok(Self::Urinary),
            "LYMPHATIC" => Ok(Self::Lymphatic),
            "INTEGUMENTARY" => Ok(Self::Integumentary),
            other => Err(format!("unknown system tag '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Presenter,
    Viewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Presenter => "presenter",
            Self::Viewer => "viewer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureRecord {
    pub id: StructureId,
    pub canonical_id: StructureId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternate_name: Option<String>,
    pub system: SystemTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<StructureId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynonymEntry {
    pub term: String,
    /// BCP-47-style language tag, e.g. "en" or "la".
    pub language: String,
    pub priority: i32,
    pub canonical_id: StructureId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraTransform {
    pub position: [f64; 3],
    pub target: [f64; 3],
    pub zoom: f64,
}

impl Default for CameraTransform {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 5.0],
            target: [0.0, 0.0, 0.0],
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceAxis {
    X,
    Y,
    Z,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceState {
    pub axis: SliceAxis,
    pub offset: f64,
}

/// Mirrored visualization state. Owned by the presenter connection;
/// every other connection holds a read-only copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlighted_id: Option<StructureId>,
    pub camera: CameraTransform,
    pub visible_systems: BTreeSet<SystemTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<SliceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolated_id: Option<StructureId>,
}

impl Default for ViewerState {
    fn default() -> Self {
        Self {
            highlighted_id: None,
            camera: CameraTransform::default(),
            visible_systems: BTreeSet::from([SystemTag::Skeletal]),
            slice: None,
            isolated_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Short human-shareable join token, unique among active sessions.
    pub code: String,
    pub title: String,
    pub owner_id: UserId,
    pub is_active: bool,
    pub viewer_state: ViewerState,
}
