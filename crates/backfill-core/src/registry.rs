use std::collections::HashMap;

use crate::{error::BackfillError, types::RoomBackfillState};

/// Outcome of admitting a request into the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The room was idle and is now in flight; the caller must start a fetch.
    Start,
    /// The room was busy; the request replaced its pending follow-up.
    Coalesced {
        /// Pending limit that was overwritten, if any.
        replaced: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy)]
struct RoomEntry {
    state: RoomBackfillState,
    pending: Option<u16>,
}

/// In-flight set and pending map for every room with backfill activity.
///
/// Rooms absent from the map are `Idle`. A room in the map is either
/// `InFlight` or `CoolingDown` and owns at most one pending limit.
#[derive(Debug, Default)]
pub struct BackfillRegistry {
    rooms: HashMap<String, RoomEntry>,
}

impl BackfillRegistry {
    pub fn state(&self, room_id: &str) -> RoomBackfillState {
        self.rooms
            .get(room_id)
            .map_or(RoomBackfillState::Idle, |entry| entry.state)
    }

    pub fn pending(&self, room_id: &str) -> Option<u16> {
        self.rooms.get(room_id).and_then(|entry| entry.pending)
    }

    /// Number of rooms that are in flight or cooling down.
    pub fn busy_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Admit a request: start it when the room is idle, otherwise coalesce it
    /// into the room's pending slot (last write wins).
    pub fn admit(&mut self, room_id: &str, limit: u16) -> Admission {
        if let Some(entry) = self.rooms.get_mut(room_id) {
            let replaced = entry.pending.replace(limit);
            return Admission::Coalesced { replaced };
        }

        self.rooms.insert(
            room_id.to_owned(),
            RoomEntry {
                state: RoomBackfillState::InFlight,
                pending: None,
            },
        );
        Admission::Start
    }

    /// Move a room from `InFlight` to `CoolingDown` once its fetch ended.
    pub fn begin_cooldown(&mut self, room_id: &str) -> Result<(), BackfillError> {
        let current = self.state(room_id);
        match self.rooms.get_mut(room_id) {
            Some(entry) if entry.state == RoomBackfillState::InFlight => {
                entry.state = RoomBackfillState::CoolingDown;
                Ok(())
            }
            _ => Err(BackfillError::invalid_state(
                room_id,
                current,
                "begin_cooldown",
            )),
        }
    }

    /// End a room's cool-down.
    ///
    /// Clearing the in-flight mark and taking the pending limit is one step:
    /// with a pending limit the room goes straight back to `InFlight` and the
    /// limit is returned for the caller to start; without one it becomes
    /// `Idle`.
    pub fn finish(&mut self, room_id: &str) -> Result<Option<u16>, BackfillError> {
        let current = self.state(room_id);
        let Some(entry) = self.rooms.get_mut(room_id) else {
            return Err(BackfillError::invalid_state(room_id, current, "finish"));
        };
        if entry.state != RoomBackfillState::CoolingDown {
            return Err(BackfillError::invalid_state(room_id, current, "finish"));
        }

        match entry.pending.take() {
            Some(limit) => {
                entry.state = RoomBackfillState::InFlight;
                Ok(Some(limit))
            }
            None => {
                self.rooms.remove(room_id);
                Ok(None)
            }
        }
    }
}
