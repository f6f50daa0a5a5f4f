use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedError;

// Frame identity = opaque string, stable for the lifetime of the frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct FrameId(pub String);

impl FrameId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Prefix shared by the frame ids of one generation: the start time in
/// milliseconds plus a random component. Frame ids are a global key, so two
/// generations starting in the same millisecond must still differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSeed(String);

impl FrameSeed {
    pub fn new(started_at_ms: i64) -> Self {
        Self(format!("{started_at_ms}-{}", Uuid::new_v4().simple()))
    }

    /// A caller-chosen seed, for replaying a stream with known ids.
    pub fn fixed(seed: impl Into<String>) -> Self {
        Self(seed.into())
    }

    /// Identifier of the `index`-th frame of the generation.
    pub fn frame(&self, index: usize) -> FrameId {
        FrameId(format!("{}-{index}", self.0))
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FrameId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    #[default]
    Mobile,
    Desktop,
}

impl DeviceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Starter,
    Pro,
    Ultimate,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Starter => "starter",
            Self::Pro => "pro",
            Self::Ultimate => "ultimate",
        }
    }

    /// Number of screens a fresh (non-edit) generation asks the model for.
    pub fn screens_per_flow(&self) -> usize {
        match self {
            Self::Free => 3,
            _ => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// Presentation hint for a transcript entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Normal,
    Status,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Status => "status",
        }
    }
}

macro_rules! impl_str_enum {
    ($ty:ty, $kind:literal, [$($variant:ident),+]) => {
        impl FromStr for $ty {
            type Err = SharedError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == <$ty>::$variant.as_str() {
                        return Ok(<$ty>::$variant);
                    }
                )+
                Err(SharedError::UnknownVariant {
                    kind: $kind,
                    value: s.to_string(),
                })
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_str_enum!(DeviceMode, "device mode", [Mobile, Desktop]);
impl_str_enum!(Tier, "tier", [Free, Starter, Pro, Ultimate]);
impl_str_enum!(Role, "role", [User, Assistant, System]);
impl_str_enum!(MessageKind, "message kind", [Normal, Status]);

/// An image attached to a prompt, split out of a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload, passed through untouched.
    pub data: String,
}

impl InlineImage {
    /// Parse `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Result<Self, SharedError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| SharedError::InvalidDataUrl("missing data: scheme".into()))?;
        let (meta, data) = rest
            .split_once(',')
            .ok_or_else(|| SharedError::InvalidDataUrl("missing payload".into()))?;
        let mime_type = meta
            .split(';')
            .next()
            .filter(|m| !m.is_empty())
            .ok_or_else(|| SharedError::InvalidDataUrl("missing mime type".into()))?;

        Ok(Self {
            mime_type: mime_type.to_string(),
            data: data.to_string(),
        })
    }
}
