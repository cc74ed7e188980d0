use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;

use crate::{
    collaborators::TimelineRepository,
    types::{HistoryPage, PaginationDirection, TimelineItem},
};

/// In-memory timeline buffer with bounded item retention.
///
/// Items are kept in display order, oldest first.
#[derive(Debug, Clone)]
pub struct TimelineBuffer {
    items: Vec<TimelineItem>,
    max_items: usize,
}

impl TimelineBuffer {
    /// Create a timeline buffer with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            items: Vec::new(),
            max_items: max_items.max(1),
        }
    }

    /// Current timeline items in display order.
    pub fn items(&self) -> &[TimelineItem] {
        &self.items
    }

    /// Merge one fetched page, skipping events that are already present.
    ///
    /// Backward pages arrive newest first and are prepended; forward pages are
    /// appended. Returns the number of newly inserted items.
    pub fn merge_page(&mut self, events: &[TimelineItem], direction: PaginationDirection) -> usize {
        let mut inserted = 0;
        for event in events {
            if self.contains(event) {
                continue;
            }
            match direction {
                PaginationDirection::Backward => self.items.insert(0, event.clone()),
                PaginationDirection::Forward => self.items.push(event.clone()),
            }
            inserted += 1;
        }
        self.trim_to_max(direction);
        inserted
    }

    fn contains(&self, event: &TimelineItem) -> bool {
        let Some(event_id) = event.event_id.as_deref() else {
            return false;
        };
        self.items
            .iter()
            .any(|it| it.event_id.as_deref() == Some(event_id))
    }

    // Trim from the side opposite to where the page was merged.
    fn trim_to_max(&mut self, direction: PaginationDirection) {
        if self.items.len() <= self.max_items {
            return;
        }

        match direction {
            PaginationDirection::Backward => self.items.truncate(self.max_items),
            PaginationDirection::Forward => {
                let excess = self.items.len() - self.max_items;
                self.items.drain(0..excess);
            }
        }
    }
}

/// Clamp a requested pagination limit against safety and server caps.
///
/// The result is always in `1..=100`.
pub fn bounded_paginate_limit(requested: u16, server_cap: u16) -> u16 {
    let safe_requested = requested.max(1);
    let safe_cap = server_cap.max(1);
    safe_requested.min(safe_cap).min(100)
}

/// Repository keeping one `TimelineBuffer` per room.
#[derive(Debug)]
pub struct InMemoryTimelineRepository {
    rooms: Mutex<HashMap<String, TimelineBuffer>>,
    max_items_per_room: usize,
}

impl InMemoryTimelineRepository {
    pub fn new(max_items_per_room: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            max_items_per_room,
        }
    }

    /// Snapshot of a room's items in display order.
    pub fn items(&self, room_id: &str) -> Vec<TimelineItem> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms
            .get(room_id)
            .map(|buffer| buffer.items().to_vec())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TimelineRepository for InMemoryTimelineRepository {
    async fn handle_page(&self, room_id: &str, page: HistoryPage, direction: PaginationDirection) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let buffer = rooms
            .entry(room_id.to_owned())
            .or_insert_with(|| TimelineBuffer::new(self.max_items_per_room));
        let inserted = buffer.merge_page(&page.events, direction);
        tracing::trace!(
            %room_id,
            received = page.events.len(),
            inserted,
            "merged history page"
        );
    }
}
