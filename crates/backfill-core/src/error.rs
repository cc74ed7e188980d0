use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RoomBackfillState;

/// Broad failure class of a page fetch, used for logging and event reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackfillErrorKind {
    /// Network or HTTP failure while talking to the homeserver.
    Transport,
    /// The server answered but the page payload was malformed.
    Decode,
    /// The cursor store could not be read or written.
    Storage,
    /// Anything else, including broken coordinator invariants.
    Unknown,
}

/// Stable backfill error payload, reported through logs and the event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{kind:?}:{code}: {message}")]
pub struct BackfillError {
    /// High-level error kind.
    pub kind: BackfillErrorKind,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl BackfillError {
    /// Construct a new backfill error.
    pub fn new(
        kind: BackfillErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transport failure shorthand used by history API adapters.
    pub fn transport(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(BackfillErrorKind::Transport, code, message)
    }

    /// Malformed payload shorthand used by history API adapters.
    pub fn decode(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(BackfillErrorKind::Decode, code, message)
    }

    /// Build a standard invalid-state-transition error for one room.
    pub fn invalid_state(
        room_id: &str,
        current: RoomBackfillState,
        action: impl Into<String>,
    ) -> Self {
        let action = action.into();
        Self::new(
            BackfillErrorKind::Unknown,
            "invalid_state_transition",
            format!("cannot run '{action}' for room {room_id} while it is {current:?}"),
        )
    }
}

/// Map HTTP status codes to backfill error kinds.
pub fn classify_http_status(status: u16) -> BackfillErrorKind {
    match status {
        400..=599 => BackfillErrorKind::Transport,
        _ => BackfillErrorKind::Unknown,
    }
}
