//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be returned
//! directly as a JSON response body.

use chrono::{DateTime, Utc};
use mockup_shared::protocol::FrameDraft;
use mockup_shared::types::{DeviceMode, FrameId, MessageKind, Role, Tier};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A user account.  The identifier is issued by the external auth provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub email: Option<String>,
    pub tier: Tier,
    /// Remaining credit balance; never negative.
    pub credits: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A design project: one transcript and one set of frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub project_id: Uuid,
    pub role: Role,
    pub content: String,
    /// Reference image attached to a user turn, as a `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message stamped with a fresh id and the current time.
    pub fn new(project_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            role,
            content: content.into(),
            image: None,
            kind: MessageKind::Normal,
            created_at: crate::convert::now(),
        }
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One generated screen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub id: FrameId,
    pub project_id: Uuid,
    /// Self-contained markup document.
    pub content: String,
    #[serde(rename = "type")]
    pub device: DeviceMode,
    pub created_at: DateTime<Utc>,
}

impl Frame {
    pub fn from_draft(project_id: Uuid, draft: FrameDraft) -> Self {
        Self {
            id: draft.id,
            project_id,
            content: draft.content,
            device: draft.device,
            created_at: draft.created_at,
        }
    }
}

impl From<Frame> for FrameDraft {
    fn from(frame: Frame) -> Self {
        Self {
            id: frame.id,
            content: frame.content,
            device: frame.device,
            created_at: frame.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything the editor needs to open a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub project: Project,
    /// Oldest first.
    pub messages: Vec<Message>,
    /// Oldest first.
    pub frames: Vec<Frame>,
}
