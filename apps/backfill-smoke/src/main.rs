mod config;
mod logging;

use std::{sync::Arc, time::Duration};

use backfill_core::{
    BackfillCollaborators, BackfillCoordinator, BackfillError, BackfillEvent,
    BackfillEventStream, ConfigError, InMemoryTimelineRepository,
};
use backfill_matrix::{MatrixHistoryClient, MatrixHistoryConfig};
use backfill_platform::{CursorStoreError, JsonFileCursorStore, ScopedCursorStore};
use thiserror::Error;
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{error, info, warn};

use crate::config::{LiveTarget, SmokeConfig};

const DEVICE_DISPLAY_NAME: &str = "Backfill Smoke";
const TIMELINE_MAX_ITEMS: usize = 1_200;
const RUN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
enum SmokeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backfill error: {0}")]
    Backfill(#[from] BackfillError),
    #[error("cursor store error: {0}")]
    CursorStore(#[from] CursorStoreError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("backfill event stream closed")]
    EventsClosed,
}

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(err) = run().await {
        error!(error = %err, "backfill smoke failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), SmokeError> {
    let config = SmokeConfig::from_env()?;
    let client = MatrixHistoryClient::new(MatrixHistoryConfig::new(
        config.homeserver.clone(),
        config.matrix_store_dir(),
        None,
    ))
    .await?;

    let Some(target) = config.live.clone() else {
        info!(homeserver = %config.homeserver, "matrix client initialized");
        info!("set BACKFILL_USER, BACKFILL_PASSWORD and BACKFILL_ROOM_ID to run live backfill");
        return Ok(());
    };

    client
        .login_password(&target.user, &target.password, DEVICE_DISPLAY_NAME)
        .await?;
    client.sync_once().await?;
    info!(user = %target.user, "logged in and synced");

    backfill_room(&config, client, &target).await
}

async fn backfill_room(
    config: &SmokeConfig,
    client: MatrixHistoryClient,
    target: &LiveTarget,
) -> Result<(), SmokeError> {
    let cursors = ScopedCursorStore::new(
        JsonFileCursorStore::open(config.cursor_file())?,
        target.user.clone(),
    );
    let repository = Arc::new(InMemoryTimelineRepository::new(TIMELINE_MAX_ITEMS));
    let coordinator = BackfillCoordinator::new(
        BackfillCollaborators::new(Arc::new(client), repository.clone(), Arc::new(cursors)),
        config.backfill.clone(),
    )?;
    let mut events = coordinator.subscribe();

    // A burst of scroll-triggered requests: one fetch now, one coalesced follow-up.
    let default_limit = coordinator.config().default_limit;
    coordinator.enqueue(&target.room_id, default_limit);
    coordinator.enqueue(&target.room_id, default_limit);
    coordinator.enqueue(&target.room_id, default_limit.saturating_mul(2));

    timeout(RUN_TIMEOUT, wait_for_release(&mut events, &target.room_id))
        .await
        .map_err(|_| SmokeError::Timeout("room backfill to settle"))??;

    info!(
        room_id = %target.room_id,
        items = repository.items(&target.room_id).len(),
        "backfill smoke finished"
    );
    Ok(())
}

/// Log events until `room_id` is released. Lagging only skips events.
async fn wait_for_release(
    events: &mut BackfillEventStream,
    room_id: &str,
) -> Result<(), SmokeError> {
    loop {
        match events.recv().await {
            Ok(event) => {
                log_event(&event);
                if is_release_of(&event, room_id) {
                    return Ok(());
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber lagged; continuing");
            }
            Err(RecvError::Closed) => return Err(SmokeError::EventsClosed),
        }
    }
}

fn is_release_of(event: &BackfillEvent, room_id: &str) -> bool {
    matches!(event, BackfillEvent::Released { room_id: released } if released == room_id)
}

fn log_event(event: &BackfillEvent) {
    match event {
        BackfillEvent::FetchFailed {
            room_id,
            kind,
            code,
            message,
            ..
        } => warn!(%room_id, ?kind, %code, %message, "page fetch failed"),
        other => info!(event = ?other, "backfill event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backfill_core::BackfillChannels;

    const ROOM: &str = "!room:example.org";

    fn coalesced(limit: u16) -> BackfillEvent {
        BackfillEvent::Coalesced {
            room_id: ROOM.to_owned(),
            limit,
            replaced: None,
        }
    }

    #[tokio::test]
    async fn lagged_subscriber_still_sees_release() {
        let channels = BackfillChannels::new(2);
        let mut events = channels.subscribe();

        for limit in 1..=4 {
            channels.emit(coalesced(limit));
        }
        channels.emit(BackfillEvent::Released {
            room_id: ROOM.to_owned(),
        });

        timeout(Duration::from_secs(2), wait_for_release(&mut events, ROOM))
            .await
            .expect("wait timeout")
            .expect("release should be observed after lag");
    }

    #[tokio::test]
    async fn release_of_another_room_does_not_end_the_wait() {
        let channels = BackfillChannels::new(8);
        let mut events = channels.subscribe();

        channels.emit(BackfillEvent::Released {
            room_id: "!other:example.org".to_owned(),
        });
        drop(channels);

        let err = timeout(Duration::from_secs(2), wait_for_release(&mut events, ROOM))
            .await
            .expect("wait timeout")
            .expect_err("closed stream without release must fail");
        assert!(matches!(err, SmokeError::EventsClosed));
    }
}
