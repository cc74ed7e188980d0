//! Per-room history backfill scheduling.
//!
//! `enqueue` either starts a page fetch for an idle room or folds the request
//! into the room's pending slot. Fetches run on a bounded `WorkerPool`; after
//! each fetch the room cools down off-pool and then either returns to idle or
//! replays its pending request.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    channel::{BackfillChannels, BackfillEventStream},
    collaborators::{BackfillCollaborators, CursorStore, CursorStoreError, HistoryApi, TimelineRepository},
    config::BackfillConfig,
    error::{BackfillError, BackfillErrorKind},
    normalization::normalize_fetch_outcome,
    pool::WorkerPool,
    registry::{Admission, BackfillRegistry},
    types::{
        BackfillEvent, BackfillRequest, HistoryPage, PageProgress, PaginationDirection,
        RoomBackfillState,
    },
};

/// Schedules backward history fetches, one room at a time.
///
/// Cheap to clone; all clones share the same registry and worker pool.
#[derive(Clone)]
pub struct BackfillCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    history: Arc<dyn HistoryApi>,
    repository: Arc<dyn TimelineRepository>,
    cursors: Arc<dyn CursorStore>,
    registry: Mutex<BackfillRegistry>,
    pool: WorkerPool,
    channels: BackfillChannels,
    config: BackfillConfig,
    runtime: Handle,
}

impl BackfillCoordinator {
    /// Build a coordinator on the current Tokio runtime.
    pub fn new(
        collaborators: BackfillCollaborators,
        config: BackfillConfig,
    ) -> Result<Self, BackfillError> {
        let runtime = Handle::try_current().map_err(|err| {
            BackfillError::new(
                BackfillErrorKind::Unknown,
                "runtime_unavailable",
                err.to_string(),
            )
        })?;
        Ok(Self::with_runtime(collaborators, config, runtime))
    }

    /// Build a coordinator that spawns its work on `runtime`.
    pub fn with_runtime(
        collaborators: BackfillCollaborators,
        config: BackfillConfig,
        runtime: Handle,
    ) -> Self {
        let BackfillCollaborators {
            history,
            repository,
            cursors,
        } = collaborators;

        Self {
            inner: Arc::new(CoordinatorInner {
                history,
                repository,
                cursors,
                registry: Mutex::new(BackfillRegistry::default()),
                pool: WorkerPool::new(config.max_concurrency, runtime.clone()),
                channels: BackfillChannels::new(config.event_buffer),
                config,
                runtime,
            }),
        }
    }

    /// Request one more page of history for `room_id`.
    ///
    /// Never blocks on network work and may be called from any thread. The
    /// limit is clamped into `1..=limit_cap`. When the room already has a fetch
    /// running or cooling down, the request replaces the room's pending
    /// follow-up instead of starting a second fetch.
    pub fn enqueue(&self, room_id: &str, limit: u16) {
        let request = BackfillRequest {
            room_id: room_id.to_owned(),
            limit: self.inner.config.clamp_limit(limit),
        };
        if request.limit != limit {
            debug!(%room_id, requested = limit, limit = request.limit, "clamped backfill limit");
        }

        let mut registry = self.inner.lock_registry();
        self.inner.schedule(&mut registry, request);
    }

    /// `enqueue` with the configured default page size.
    pub fn enqueue_default(&self, room_id: &str) {
        self.enqueue(room_id, self.inner.config.default_limit);
    }

    pub fn room_state(&self, room_id: &str) -> RoomBackfillState {
        self.inner.lock_registry().state(room_id)
    }

    pub fn pending_limit(&self, room_id: &str) -> Option<u16> {
        self.inner.lock_registry().pending(room_id)
    }

    /// Page fetches currently holding a worker pool slot.
    pub fn active_fetches(&self) -> usize {
        self.inner.pool.active()
    }

    pub fn subscribe(&self) -> BackfillEventStream {
        self.inner.channels.subscribe()
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.inner.config
    }
}

impl CoordinatorInner {
    fn lock_registry(&self) -> MutexGuard<'_, BackfillRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Runs with the registry lock held so admission and submission are atomic.
    fn schedule(self: &Arc<Self>, registry: &mut BackfillRegistry, request: BackfillRequest) {
        match registry.admit(&request.room_id, request.limit) {
            Admission::Start => self.submit_fetch(request, false),
            Admission::Coalesced { replaced } => {
                debug!(
                    room_id = %request.room_id,
                    limit = request.limit,
                    ?replaced,
                    "coalesced backfill request into pending follow-up"
                );
                self.channels.emit(BackfillEvent::Coalesced {
                    room_id: request.room_id,
                    limit: request.limit,
                    replaced,
                });
            }
        }
    }

    fn submit_fetch(self: &Arc<Self>, request: BackfillRequest, resumed: bool) {
        let fetch_id = Uuid::new_v4();
        debug!(
            room_id = %request.room_id,
            %fetch_id,
            limit = request.limit,
            resumed,
            "scheduling history page fetch"
        );
        self.channels.emit(BackfillEvent::Scheduled {
            room_id: request.room_id.clone(),
            fetch_id,
            limit: request.limit,
            resumed,
        });

        let completion = CompletionGuard {
            inner: Arc::clone(self),
            room_id: request.room_id.clone(),
            fetch_id,
            reported: false,
        };
        let inner = Arc::clone(self);
        self.pool.submit(async move {
            let mut completion = completion;
            let outcome = inner.fetch_page(&request.room_id, request.limit).await;
            inner.report(&request.room_id, fetch_id, outcome);
            completion.reported = true;
        });
    }

    /// One page for one room: cursor read, fetch, repository hand-off, cursor
    /// write. The caller's pool slot stays occupied for the whole sequence.
    async fn fetch_page(&self, room_id: &str, limit: u16) -> Result<PageProgress, BackfillError> {
        let from = self
            .cursors
            .get(room_id)
            .map_err(|err| map_cursor_store_error("get", room_id, err))?;

        let page = self
            .history
            .fetch_page(room_id, from.as_deref(), limit, PaginationDirection::Backward)
            .await?;
        let end = validated_end_token(&page)?;
        let event_count = page.events.len();

        self.repository
            .handle_page(room_id, page, PaginationDirection::Backward)
            .await;

        let reached_start = end.is_none();
        let next_cursor = end.filter(|token| from.as_deref() != Some(token.as_str()));
        match next_cursor.as_deref() {
            Some(token) => self
                .cursors
                .set(room_id, token)
                .map_err(|err| map_cursor_store_error("set", room_id, err))?,
            None if !reached_start => {
                debug!(%room_id, "server returned the consumed cursor; keeping it");
            }
            None => {}
        }

        Ok(PageProgress {
            event_count,
            next_cursor,
            reached_start,
        })
    }

    fn report(&self, room_id: &str, fetch_id: Uuid, outcome: Result<PageProgress, BackfillError>) {
        match &outcome {
            Ok(progress) => debug!(
                %room_id,
                %fetch_id,
                events = progress.event_count,
                next_cursor = ?progress.next_cursor,
                reached_start = progress.reached_start,
                "applied history page"
            ),
            Err(err) => warn!(
                %room_id,
                %fetch_id,
                kind = ?err.kind,
                code = %err.code,
                message = %err.message,
                "history page fetch failed"
            ),
        }
        self.channels
            .emit(normalize_fetch_outcome(room_id, fetch_id, outcome));
    }

    fn begin_cooldown(&self, room_id: &str) -> bool {
        match self.lock_registry().begin_cooldown(room_id) {
            Ok(()) => true,
            Err(err) => {
                warn!(%room_id, code = %err.code, "{}", err.message);
                false
            }
        }
    }

    fn finish(self: &Arc<Self>, room_id: &str) {
        let mut registry = self.lock_registry();
        match registry.finish(room_id) {
            Ok(Some(limit)) => {
                debug!(%room_id, limit, "replaying coalesced backfill request");
                let request = BackfillRequest {
                    room_id: room_id.to_owned(),
                    limit,
                };
                self.submit_fetch(request, true);
            }
            Ok(None) => {
                debug!(%room_id, "room backfill released");
                self.channels.emit(BackfillEvent::Released {
                    room_id: room_id.to_owned(),
                });
            }
            Err(err) => warn!(%room_id, code = %err.code, "{}", err.message),
        }
    }
}

/// Starts the cool-down when a fetch job ends, on every path including a
/// panicking collaborator or a job dropped before it ran.
struct CompletionGuard {
    inner: Arc<CoordinatorInner>,
    room_id: String,
    fetch_id: Uuid,
    reported: bool,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let room_id = std::mem::take(&mut self.room_id);
        if !self.reported {
            let error = BackfillError::new(
                BackfillErrorKind::Unknown,
                if std::thread::panicking() {
                    "fetch_panicked"
                } else {
                    "fetch_abandoned"
                },
                "page fetch ended without producing a result",
            );
            self.inner.report(&room_id, self.fetch_id, Err(error));
        }

        // Runs off the pool: the job's permit is released right after this.
        let inner = Arc::clone(&self.inner);
        let cooldown = inner.config.cooldown();
        self.inner.runtime.spawn(async move {
            if !inner.begin_cooldown(&room_id) {
                return;
            }
            tokio::time::sleep(cooldown).await;
            inner.finish(&room_id);
        });
    }
}

fn validated_end_token(page: &HistoryPage) -> Result<Option<String>, BackfillError> {
    match page.end.as_deref() {
        Some(token) if token.trim().is_empty() => Err(BackfillError::decode(
            "empty_pagination_token",
            "history page carried an empty end token",
        )),
        _ => Ok(page.end.clone()),
    }
}

fn map_cursor_store_error(operation: &str, room_id: &str, err: CursorStoreError) -> BackfillError {
    BackfillError::new(
        BackfillErrorKind::Storage,
        "cursor_store_error",
        format!("cursor {operation} failed for {room_id}: {err}"),
    )
}
