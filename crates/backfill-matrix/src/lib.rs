use std::path::PathBuf;

use async_trait::async_trait;
use backfill_core::{
    BackfillError, BackfillErrorKind, HistoryApi, HistoryPage, PaginationDirection, TimelineItem,
    bounded_paginate_limit, classify_http_status,
};
use matrix_sdk::{
    Client, ClientBuildError, HttpError,
    config::SyncSettings,
    room::MessagesOptions,
    ruma::{OwnedRoomId, UInt},
};
use tracing::debug;

const SERVER_PAGINATION_LIMIT_CAP: u16 = 100;

#[derive(Debug, Clone)]
pub struct MatrixHistoryConfig {
    pub homeserver: String,
    pub data_dir: PathBuf,
    pub store_passphrase: Option<String>,
}

impl MatrixHistoryConfig {
    pub fn new(
        homeserver: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        store_passphrase: Option<String>,
    ) -> Self {
        Self {
            homeserver: homeserver.into(),
            data_dir: data_dir.into(),
            store_passphrase,
        }
    }
}

/// `HistoryApi` backed by a Matrix homeserver's `/messages` endpoint.
#[derive(Debug, Clone)]
pub struct MatrixHistoryClient {
    client: Client,
}

impl MatrixHistoryClient {
    pub async fn new(config: MatrixHistoryConfig) -> Result<Self, BackfillError> {
        let client = Client::builder()
            .homeserver_url(&config.homeserver)
            .sqlite_store(&config.data_dir, config.store_passphrase.as_deref())
            .build()
            .await
            .map_err(map_client_build_error)?;

        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn login_password(
        &self,
        user_id_or_localpart: &str,
        password: &str,
        device_display_name: &str,
    ) -> Result<(), BackfillError> {
        self.client
            .matrix_auth()
            .login_username(user_id_or_localpart, password)
            .initial_device_display_name(device_display_name)
            .send()
            .await
            .map(|_| ())
            .map_err(map_matrix_error)
    }

    /// One sync round so joined rooms are known locally.
    pub async fn sync_once(&self) -> Result<(), BackfillError> {
        self.client
            .sync_once(SyncSettings::default())
            .await
            .map(|_| ())
            .map_err(map_matrix_error)
    }

    fn lookup_room(&self, room_id: &str) -> Result<matrix_sdk::Room, BackfillError> {
        let room_id = parse_room_id(room_id)?;
        self.client.get_room(&room_id).ok_or_else(|| {
            BackfillError::new(
                BackfillErrorKind::Unknown,
                "room_not_found",
                format!("room not found: {room_id}"),
            )
        })
    }
}

#[async_trait]
impl HistoryApi for MatrixHistoryClient {
    async fn fetch_page(
        &self,
        room_id: &str,
        from: Option<&str>,
        limit: u16,
        direction: PaginationDirection,
    ) -> Result<HistoryPage, BackfillError> {
        let room = self.lookup_room(room_id)?;
        let limit = bounded_paginate_limit(limit, SERVER_PAGINATION_LIMIT_CAP);
        let messages = room
            .messages(messages_options(from, limit, direction)?)
            .await
            .map_err(map_matrix_error)?;

        let events: Vec<TimelineItem> = messages
            .chunk
            .iter()
            .filter_map(timeline_item_from_event)
            .collect();
        debug!(
            %room_id,
            requested = limit,
            received = messages.chunk.len(),
            kept = events.len(),
            end = ?messages.end,
            "fetched matrix history page"
        );

        Ok(HistoryPage {
            events,
            end: messages.end,
        })
    }
}

fn parse_room_id(value: &str) -> Result<OwnedRoomId, BackfillError> {
    value.parse::<OwnedRoomId>().map_err(|err| {
        BackfillError::new(
            BackfillErrorKind::Unknown,
            "invalid_room_id",
            format!("invalid room id '{value}': {err}"),
        )
    })
}

fn messages_options(
    from_token: Option<&str>,
    limit: u16,
    direction: PaginationDirection,
) -> Result<MessagesOptions, BackfillError> {
    let mut options = match direction {
        PaginationDirection::Backward => MessagesOptions::backward(),
        PaginationDirection::Forward => MessagesOptions::forward(),
    };
    options.from = from_token.map(ToOwned::to_owned);
    options.limit = UInt::new(u64::from(limit)).ok_or_else(|| {
        BackfillError::new(
            BackfillErrorKind::Unknown,
            "invalid_pagination_limit",
            format!("invalid pagination limit: {limit}"),
        )
    })?;
    Ok(options)
}

fn timeline_item_from_event(
    event: &matrix_sdk::deserialized_responses::TimelineEvent,
) -> Option<TimelineItem> {
    let raw = event.raw();

    let sender = raw.get_field::<String>("sender").ok().flatten()?;
    let body = raw
        .get_field::<serde_json::Value>("content")
        .ok()
        .flatten()
        .and_then(|content| {
            content
                .get("body")
                .and_then(|body| body.as_str())
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| "[non-text event]".to_owned());
    let timestamp_ms = event
        .timestamp_raw()
        .map(|ts| u64::from(ts.get()))
        .unwrap_or(0);

    Some(TimelineItem {
        event_id: event.event_id().map(|event_id| event_id.to_string()),
        sender,
        body,
        timestamp_ms,
    })
}

fn map_matrix_http_error(err: HttpError) -> BackfillError {
    if let Some(client_err) = err.as_client_api_error() {
        let status = client_err.status_code.as_u16();
        BackfillError::new(
            classify_http_status(status),
            "matrix_http_error",
            client_err.to_string(),
        )
    } else {
        BackfillError::transport("matrix_http_error", err.to_string())
    }
}

fn map_matrix_error(err: matrix_sdk::Error) -> BackfillError {
    use matrix_sdk::Error;

    match err {
        Error::Http(http_err) => map_matrix_http_error(*http_err),
        Error::AuthenticationRequired => BackfillError::transport("auth_required", err.to_string()),
        Error::StateStore(_) | Error::EventCacheStore(_) | Error::MediaStore(_) | Error::Io(_) => {
            BackfillError::new(
                BackfillErrorKind::Storage,
                "storage_error",
                err.to_string(),
            )
        }
        Error::SerdeJson(_) => BackfillError::decode("serde_json_error", err.to_string()),
        _ => BackfillError::new(
            BackfillErrorKind::Unknown,
            "matrix_error",
            err.to_string(),
        ),
    }
}

fn map_client_build_error(err: ClientBuildError) -> BackfillError {
    BackfillError::new(
        BackfillErrorKind::Unknown,
        "client_build_error",
        err.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn rejects_invalid_room_id() {
        let err = parse_room_id("not-a-room-id").expect_err("invalid room id must fail");
        assert_eq!(err.code, "invalid_room_id");
        assert_eq!(err.kind, BackfillErrorKind::Unknown);
    }

    #[test]
    fn accepts_well_formed_room_id() {
        let room_id = parse_room_id("!abc:example.org").expect("valid room id");
        assert_eq!(room_id.as_str(), "!abc:example.org");
    }

    #[test]
    fn messages_options_carry_token_and_limit() {
        let options = messages_options(Some("t42"), 20, PaginationDirection::Backward)
            .expect("options should build");
        assert_eq!(options.from.as_deref(), Some("t42"));
        assert_eq!(options.limit, UInt::from(20_u32));

        let first = messages_options(None, 1, PaginationDirection::Forward)
            .expect("options should build");
        assert_eq!(first.from, None);
        assert_eq!(first.limit, UInt::from(1_u32));
    }

    #[tokio::test]
    #[ignore = "runs against live homeserver, requires env vars"]
    async fn live_login_sync_and_fetch_history_page() {
        let homeserver = env::var("BACKFILL_HOMESERVER").expect("BACKFILL_HOMESERVER must be set");
        let user = env::var("BACKFILL_USER").expect("BACKFILL_USER must be set");
        let password = env::var("BACKFILL_PASSWORD").expect("BACKFILL_PASSWORD must be set");
        let room_id = env::var("BACKFILL_ROOM_ID").expect("BACKFILL_ROOM_ID must be set");

        let unique = format!(
            ".backfill-live-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_secs()
        );
        let data_dir = std::path::PathBuf::from(unique);

        let client =
            MatrixHistoryClient::new(MatrixHistoryConfig::new(homeserver, data_dir, None))
                .await
                .expect("client init");
        client
            .login_password(&user, &password, "Backfill CI Smoke")
            .await
            .expect("login");
        client.sync_once().await.expect("sync once");

        let page = client
            .fetch_page(&room_id, None, 10, PaginationDirection::Backward)
            .await
            .expect("history page");
        assert!(page.events.len() <= 10);
        assert_ne!(page.end.as_deref(), Some(""));
    }
}
