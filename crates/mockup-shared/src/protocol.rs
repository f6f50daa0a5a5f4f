//! Request and response bodies exchanged between the editor client and
//! the HTTP service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::PROMPT_ECHO_CHARS;
use crate::types::{DeviceMode, FrameId};

/// One chat turn asking for a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub project_id: Uuid,
    pub message: String,
    /// Optional reference image as a `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub device_mode: DeviceMode,
    /// Existing frame to rewrite; absent for a fresh flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_frame_id: Option<FrameId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenameProjectRequest {
    pub name: String,
}

/// A frame as the client holds it, used to replace a project's frame set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDraft {
    pub id: FrameId,
    pub content: String,
    #[serde(rename = "type")]
    pub device: DeviceMode,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceFramesRequest {
    pub frames: Vec<FrameDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceFramesResponse {
    pub kept: usize,
    pub removed: usize,
}

/// JSON error body returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Assistant transcript entry for a finished generation, quoting the start
/// of the prompt.
pub fn reply_summary(prompt: &str) -> String {
    let mut quoted: String = prompt.chars().take(PROMPT_ECHO_CHARS).collect();
    if prompt.chars().count() > PROMPT_ECHO_CHARS {
        quoted.push_str("...");
    }
    format!(
        "I've created the design based on your request: \"{quoted}\". \
         Feel free to click on the frame to make edits!"
    )
}
