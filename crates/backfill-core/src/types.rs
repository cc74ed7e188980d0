use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackfillErrorKind;

/// Direction of a history page request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaginationDirection {
    /// Walk toward older events (backfill).
    Backward,
    /// Walk toward newer events.
    Forward,
}

/// Per-room backfill lifecycle as tracked by the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RoomBackfillState {
    /// No fetch is queued, running or cooling down.
    Idle,
    /// A page fetch is queued on or running in the worker pool.
    InFlight,
    /// The last fetch finished and the inter-fetch delay is running.
    CoolingDown,
}

/// One scheduling request as received by `enqueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    /// Target room ID.
    pub room_id: String,
    /// Requested page size, already clamped to `1..=limit_cap`.
    pub limit: u16,
}

/// Canonical timeline item payload carried by history pages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineItem {
    /// Event ID when available.
    pub event_id: Option<String>,
    /// Sender user ID.
    pub sender: String,
    /// Display-ready text body.
    pub body: String,
    /// Event timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

/// Result of one history fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryPage {
    /// Events in server order (newest first for backward pages).
    pub events: Vec<TimelineItem>,
    /// Token to resume from on the next request, absent at the start of history.
    pub end: Option<String>,
}

/// Summary of a successful page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageProgress {
    /// Number of events handed to the repository.
    pub event_count: usize,
    /// Cursor persisted by this fetch, if it advanced.
    pub next_cursor: Option<String>,
    /// `true` when the server reported no older history.
    pub reached_start: bool,
}

/// Observability events emitted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackfillEvent {
    /// A page fetch was submitted to the worker pool.
    Scheduled {
        /// Target room ID.
        room_id: String,
        /// Identifier correlating this fetch with its outcome event.
        fetch_id: Uuid,
        /// Page size requested from the server.
        limit: u16,
        /// `true` when the fetch replays a coalesced request.
        resumed: bool,
    },
    /// A request for a busy room was folded into its pending follow-up.
    Coalesced {
        /// Target room ID.
        room_id: String,
        /// Limit that will be used for the follow-up fetch.
        limit: u16,
        /// Previously pending limit that was overwritten.
        replaced: Option<u16>,
    },
    /// A fetched page was handed to the repository.
    PageApplied {
        /// Target room ID.
        room_id: String,
        /// Fetch identifier from the matching `Scheduled` event.
        fetch_id: Uuid,
        /// Number of events in the page.
        event_count: usize,
        /// Cursor stored for the next fetch, if it advanced.
        next_cursor: Option<String>,
        /// `true` when the start of the room history was reached.
        reached_start: bool,
    },
    /// A page fetch failed; nothing was applied.
    FetchFailed {
        /// Target room ID.
        room_id: String,
        /// Fetch identifier from the matching `Scheduled` event.
        fetch_id: Uuid,
        /// Failure class.
        kind: BackfillErrorKind,
        /// Stable backfill error code.
        code: String,
        /// Human-readable error message.
        message: String,
    },
    /// The room finished its cool-down without pending work.
    Released {
        /// Target room ID.
        room_id: String,
    },
}
