//! `hearth-types` – shared vocabulary for the Hearth anchor stack.
//!
//! Identity and handle newtypes, world-space geometry, the anchor event
//! envelope consumed by the rendering layer, and the umbrella error type.

pub mod geometry;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use geometry::{Pose, Quaternion, Vec3};

/// Platform-assigned, globally unique token for a realized anchor.
///
/// Only known once the platform confirms creation.  Formats as a lowercase
/// hyphenated UUID, which is also its durable on-disk representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorIdentity(Uuid);

impl AnchorIdentity {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// A fresh random identity.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AnchorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for AnchorIdentity {
    type Err = HearthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| HearthError::InvalidIdentity(format!("{s:?}: {e}")))
    }
}

/// Live in-process reference to an anchor, valid from the instantiation
/// request onward (before its [`AnchorIdentity`] is known).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnchorHandle(pub u64);

impl fmt::Display for AnchorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque reference to the UI element presenting an anchor's label.
///
/// `text` is whatever the label component currently shows; it is the
/// second-to-last fallback when resolving an anchor's name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresentationTarget {
    pub id: String,
    pub text: Option<String>,
}

impl PresentationTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Envelope published on the anchor event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"hearth-registry::coordinator"`
    pub source: String,
    pub payload: AnchorEventPayload,
}

impl AnchorEvent {
    pub fn new(source: impl Into<String>, payload: AnchorEventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Lifecycle transitions the rendering and voice layers react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum AnchorEventPayload {
    /// A new anchor was realized and entered the live indices.
    Registered {
        handle: AnchorHandle,
        identity: AnchorIdentity,
        label: String,
    },
    /// An existing anchor absorbed a duplicate detection.
    Reobserved {
        handle: AnchorHandle,
        identity: AnchorIdentity,
        seen_count: u32,
        display_label: String,
    },
    /// The platform confirmed a save and the durable record exists.
    Persisted { identity: AnchorIdentity },
    /// The platform rejected a save; the anchor is live but not durable.
    PersistFailed {
        identity: AnchorIdentity,
        reason: String,
    },
    Erased { identity: AnchorIdentity },
    EraseFailed {
        identity: AnchorIdentity,
        reason: String,
    },
    /// A pending creation was given up on (readiness timeout or rejection).
    Abandoned { handle: AnchorHandle },
    Renamed {
        identity: AnchorIdentity,
        label: String,
    },
    /// Every live anchor and durable record was cleared.
    Cleared { erased: usize },
}

/// Umbrella error for the Hearth stack.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HearthError {
    #[error("Invalid anchor identity {0}")]
    InvalidIdentity(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Platform failure on {operation}: {details}")]
    Platform { operation: String, details: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display_is_lowercase_hyphenated() {
        let id: AnchorIdentity = "6F9619FF-8B86-D011-B42D-00C04FC964FF".parse().unwrap();
        assert_eq!(id.to_string(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[test]
    fn identity_parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<AnchorIdentity>().unwrap_err();
        assert!(matches!(err, HearthError::InvalidIdentity(_)));
    }

    #[test]
    fn identity_serializes_as_plain_string() {
        let id = AnchorIdentity::new_v4();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn event_roundtrip() {
        let identity = AnchorIdentity::new_v4();
        let event = AnchorEvent::new(
            "hearth-registry::coordinator",
            AnchorEventPayload::Registered {
                handle: AnchorHandle(7),
                identity,
                label: "Lamp".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: AnchorEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.payload, event.payload);
    }

    #[test]
    fn hearth_error_display() {
        let err = HearthError::Platform {
            operation: "save".to_string(),
            details: "not localized".to_string(),
        };
        assert!(err.to_string().contains("save"));
        assert!(err.to_string().contains("not localized"));
    }
}
