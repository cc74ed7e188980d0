//! Core of the message history backfill coordinator.
//!
//! This crate owns per-room scheduling (coalescing, cool-down, the bounded
//! worker pool), the collaborator traits the coordinator talks to, and the
//! shared error/event types consumed by adapters and apps.

/// Broadcast channel for coordinator events.
pub mod channel;
/// Collaborator traits: history API, timeline repository, cursor store.
pub mod collaborators;
/// Coordinator tuning and env parsing.
pub mod config;
/// The backfill coordinator and its page fetch operation.
pub mod coordinator;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Conversion of fetch outcomes into events.
pub mod normalization;
/// Bounded-concurrency task pool.
pub mod pool;
/// Per-room state and pending-request bookkeeping.
pub mod registry;
/// Timeline merge buffer and in-memory repository.
pub mod timeline;
/// Shared data types (requests, pages, events).
pub mod types;

pub use channel::{BackfillChannels, BackfillEventStream};
pub use collaborators::{
    BackfillCollaborators, CursorStore, CursorStoreError, HistoryApi, TimelineRepository,
};
pub use config::{BackfillConfig, ConfigError};
pub use coordinator::BackfillCoordinator;
pub use error::{BackfillError, BackfillErrorKind, classify_http_status};
pub use normalization::normalize_fetch_outcome;
pub use pool::WorkerPool;
pub use registry::{Admission, BackfillRegistry};
pub use timeline::{InMemoryTimelineRepository, TimelineBuffer, bounded_paginate_limit};
pub use types::{
    BackfillEvent, BackfillRequest, HistoryPage, PageProgress, PaginationDirection,
    RoomBackfillState, TimelineItem,
};
