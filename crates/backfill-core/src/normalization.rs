use uuid::Uuid;

use crate::{
    error::BackfillError,
    types::{BackfillEvent, PageProgress},
};

/// Convert a page fetch outcome to a stable `PageApplied`/`FetchFailed` event.
pub fn normalize_fetch_outcome(
    room_id: impl Into<String>,
    fetch_id: Uuid,
    outcome: Result<PageProgress, BackfillError>,
) -> BackfillEvent {
    let room_id = room_id.into();
    match outcome {
        Ok(progress) => BackfillEvent::PageApplied {
            room_id,
            fetch_id,
            event_count: progress.event_count,
            next_cursor: progress.next_cursor,
            reached_start: progress.reached_start,
        },
        Err(error) => BackfillEvent::FetchFailed {
            room_id,
            fetch_id,
            kind: error.kind,
            code: error.code,
            message: error.message,
        },
    }
}
