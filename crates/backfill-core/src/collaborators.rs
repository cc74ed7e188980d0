//! Seams to the network, the message store and cursor persistence.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    error::BackfillError,
    types::{HistoryPage, PaginationDirection},
};

/// Errors returned by cursor store implementations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CursorStoreError {
    #[error("cursor store unavailable: {0}")]
    Unavailable(String),
    #[error("cursor store backend failure: {0}")]
    Backend(String),
}

/// Persisted room → pagination cursor mapping.
///
/// Implementations must tolerate concurrent calls for different rooms.
pub trait CursorStore: Send + Sync {
    fn get(&self, room_id: &str) -> Result<Option<String>, CursorStoreError>;

    fn set(&self, room_id: &str, cursor: &str) -> Result<(), CursorStoreError>;
}

/// Remote history endpoint. One call fetches exactly one page.
#[async_trait]
pub trait HistoryApi: Send + Sync {
    async fn fetch_page(
        &self,
        room_id: &str,
        from: Option<&str>,
        limit: u16,
        direction: PaginationDirection,
    ) -> Result<HistoryPage, BackfillError>;
}

/// Local message store receiving fetched pages.
///
/// `handle_page` must be idempotent: the same events may arrive more than once.
#[async_trait]
pub trait TimelineRepository: Send + Sync {
    async fn handle_page(&self, room_id: &str, page: HistoryPage, direction: PaginationDirection);
}

/// Collaborators injected into a `BackfillCoordinator`.
#[derive(Clone)]
pub struct BackfillCollaborators {
    pub history: Arc<dyn HistoryApi>,
    pub repository: Arc<dyn TimelineRepository>,
    pub cursors: Arc<dyn CursorStore>,
}

impl BackfillCollaborators {
    pub fn new(
        history: Arc<dyn HistoryApi>,
        repository: Arc<dyn TimelineRepository>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            history,
            repository,
            cursors,
        }
    }
}
