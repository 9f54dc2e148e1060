//! REST and realtime routes.
//!
//! Status mapping: 401 for a missing or unknown key, 403 without a caregiver
//! relationship, 404 for missing or tombstoned rows, 400 for malformed input.

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::WebSocketUpgrade,
        Path, Query, State,
    },
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use babytrack_core::export::{self, entries_to_csv, DateRange};
use babytrack_core::feed::ChangeKind;
use babytrack_core::identity::MeResponse;
use babytrack_core::remote::{BabyRow, EntryRow, ErrorBody};
use babytrack_core::{Baby, BabyUpdate, Entry, EntryQuery, EntryUpdate, NewBaby, NewEntry};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::auth::{auth_middleware, unauthorized, AuthUser};
use super::realtime;
use super::storage::ServerStorageError;
use super::ServerState;

pub fn router(state: ServerState) -> Router {
    // Public routes (no auth). The realtime socket checks its `key` query
    // parameter itself.
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/realtime/{baby_id}", get(realtime_socket));

    let protected_routes = Router::new()
        .route("/me", get(me))
        .route("/babies", get(list_babies).post(create_baby))
        .route(
            "/babies/{id}",
            get(get_baby)
                .put(upsert_baby)
                .patch(update_baby)
                .delete(delete_baby),
        )
        .route("/babies/{id}/entries", get(list_entries))
        .route("/babies/{id}/export.csv", get(export_csv))
        .route("/entries", post(create_entry))
        .route(
            "/entries/{id}",
            get(get_entry)
                .put(upsert_entry)
                .patch(update_entry)
                .delete(delete_entry),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Errors
// ============================================================================

enum ApiError {
    Storage(ServerStorageError),
    BadRequest(String),
    Internal(String),
}

impl From<ServerStorageError> for ApiError {
    fn from(e: ServerStorageError) -> Self {
        ApiError::Storage(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Storage(e @ ServerStorageError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Storage(e @ ServerStorageError::Forbidden(_)) => {
                (StatusCode::FORBIDDEN, e.to_string())
            }
            ApiError::Storage(e @ ServerStorageError::Invalid(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            ApiError::Storage(e) => {
                tracing::error!("Storage failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Internal(message) => {
                tracing::error!("Request failed: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn baby_json(baby: &Baby) -> Json<BabyRow> {
    Json(BabyRow::from(baby))
}

fn entry_json(entry: &Entry) -> Json<EntryRow> {
    Json(EntryRow::from(entry))
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: user.user_id,
        email: user.email,
    })
}

async fn list_babies(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<BabyRow>>> {
    let babies = state.storage.list_babies(&user.user_id).await?;
    Ok(Json(babies.iter().map(BabyRow::from).collect()))
}

async fn get_baby(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BabyRow>> {
    let baby = state.storage.get_baby(&user.user_id, id).await?;
    Ok(baby_json(&baby))
}

async fn create_baby(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<NewBaby>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BabyRow>)> {
    let Json(new) = payload?;
    let baby = state.storage.create_baby(&user.user_id, new).await?;
    Ok((StatusCode::CREATED, baby_json(&baby)))
}

async fn update_baby(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    payload: Result<Json<BabyUpdate>, JsonRejection>,
) -> ApiResult<Json<BabyRow>> {
    let Json(update) = payload?;
    let baby = state.storage.update_baby(&user.user_id, id, &update).await?;
    Ok(baby_json(&baby))
}

async fn upsert_baby(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    payload: Result<Json<BabyRow>, JsonRejection>,
) -> ApiResult<Json<BabyRow>> {
    let Json(row) = payload?;
    if row.id != id {
        return Err(ApiError::BadRequest(format!(
            "body id {} does not match path id {}",
            row.id, id
        )));
    }
    let baby = state
        .storage
        .upsert_baby(&user.user_id, &Baby::from(row))
        .await?;
    Ok(baby_json(&baby))
}

async fn delete_baby(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.storage.delete_baby(&user.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_entries(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(baby_id): Path<Uuid>,
    Query(query): Query<EntryQuery>,
) -> ApiResult<Json<Vec<EntryRow>>> {
    let entries = state
        .storage
        .list_entries(&user.user_id, baby_id, &query)
        .await?;
    Ok(Json(entries.iter().map(EntryRow::from).collect()))
}

async fn export_csv(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(baby_id): Path<Uuid>,
    Query(range): Query<DateRange>,
) -> ApiResult<Response> {
    let entries = state
        .storage
        .export_entries(&user.user_id, baby_id, &range)
        .await?;
    let csv = entries_to_csv(&entries, &range).map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", export::file_name(baby_id)),
            ),
        ],
        csv,
    )
        .into_response())
}

async fn get_entry(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EntryRow>> {
    let entry = state.storage.get_entry(&user.user_id, id).await?;
    Ok(entry_json(&entry))
}

async fn create_entry(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<NewEntry>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<EntryRow>)> {
    let Json(new) = payload?;
    let entry = state.storage.create_entry(&user.user_id, new).await?;
    state.hub.publish_change(ChangeKind::Inserted, &entry).await;
    Ok((StatusCode::CREATED, entry_json(&entry)))
}

async fn update_entry(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    payload: Result<Json<EntryUpdate>, JsonRejection>,
) -> ApiResult<Json<EntryRow>> {
    let Json(update) = payload?;
    let entry = state
        .storage
        .update_entry(&user.user_id, id, &update)
        .await?;
    state.hub.publish_change(ChangeKind::Updated, &entry).await;
    Ok(entry_json(&entry))
}

async fn upsert_entry(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    payload: Result<Json<EntryRow>, JsonRejection>,
) -> ApiResult<Json<EntryRow>> {
    let Json(row) = payload?;
    if row.id != id {
        return Err(ApiError::BadRequest(format!(
            "body id {} does not match path id {}",
            row.id, id
        )));
    }
    let entry = Entry::try_from(row).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let (kept, kind) = state.storage.upsert_entry(&user.user_id, &entry).await?;
    if let Some(kind) = kind {
        state.hub.publish_change(kind, &kept).await;
    }
    Ok(entry_json(&kept))
}

async fn delete_entry(
    State(state): State<ServerState>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let entry = state.storage.delete_entry(&user.user_id, id).await?;
    state.hub.publish_change(ChangeKind::Deleted, &entry).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RealtimeParams {
    #[serde(default)]
    key: Option<String>,
}

async fn realtime_socket(
    State(state): State<ServerState>,
    Path(baby_id): Path<Uuid>,
    Query(params): Query<RealtimeParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(key) = params.key else {
        return unauthorized("missing_auth", "key query parameter required");
    };
    let Some(user) = state.api_keys.validate(&key) else {
        return unauthorized("invalid_key", "Invalid API key");
    };
    if let Err(e) = state.storage.get_baby(&user.user_id, baby_id).await {
        return ApiError::from(e).into_response();
    }

    ws.on_upgrade(move |socket| async move {
        realtime::serve_connection(socket, &state.hub, baby_id, user.user_id).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStore;
    use crate::server::{ApiKeyEntry, ApiKeyStore, RealtimeHub, ServerStorage};
    use crate::sync::{Connectivity, DataService};
    use babytrack_core::feed::WsTransport;
    use babytrack_core::models::{DiaperPayload, DiaperType, FeedPayload, FeedSource, VolumeUnit};
    use babytrack_core::{
        check_server, timefmt, Caregiver, ChangeFeed, EntryPayload, EntryType, FeedEvent,
        HttpRemoteStore, RemoteError, RemoteStore, Subscription,
    };
    use chrono::{Duration, NaiveDate};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;
    use tempfile::TempDir;

    struct TestServer {
        url: String,
        remote: HttpRemoteStore,
        _temp_dir: TempDir,
    }

    fn alice() -> Caregiver {
        Caregiver::new("alice", "alice-key")
    }

    fn bob() -> Caregiver {
        Caregiver::new("bob", "bob-key")
    }

    fn key(key: &str, user_id: &str) -> ApiKeyEntry {
        ApiKeyEntry {
            key: key.to_string(),
            user_id: user_id.to_string(),
            email: Some(format!("{}@example.com", user_id)),
        }
    }

    async fn spawn_server() -> TestServer {
        let temp_dir = TempDir::new().unwrap();
        let storage = ServerStorage::open(&temp_dir.path().join("server.db"))
            .await
            .unwrap();
        let state = ServerState {
            storage: Arc::new(storage),
            hub: Arc::new(RealtimeHub::new(StdDuration::from_secs(90))),
            api_keys: Arc::new(ApiKeyStore::from_entries(vec![
                key("alice-key", "alice"),
                key("bob-key", "bob"),
            ])),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        TestServer {
            remote: HttpRemoteStore::new(url.clone()),
            url,
            _temp_dir: temp_dir,
        }
    }

    fn new_baby() -> NewBaby {
        NewBaby::new("Test Baby", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
    }

    fn diaper(baby_id: Uuid) -> NewEntry {
        NewEntry::new(
            baby_id,
            EntryPayload::Diaper(DiaperPayload::new(DiaperType::Wet)),
        )
    }

    #[tokio::test]
    async fn test_health_and_me() {
        let server = spawn_server().await;
        assert!(check_server(&server.url).await);

        let me = server.remote.me(&alice()).await.unwrap();
        assert_eq!(me.user_id, "alice");
        assert_eq!(me.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = spawn_server().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("{}/babies", server.url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let result = server
            .remote
            .list_babies(&Caregiver::new("mallory", "wrong"))
            .await;
        assert!(matches!(
            result,
            Err(RemoteError::PolicyRejected { status: 401, .. })
        ));

        let baby = server.remote.create_baby(&alice(), &new_baby()).await.unwrap();
        let result = server.remote.get_baby(&bob(), baby.id).await;
        assert!(matches!(
            result,
            Err(RemoteError::PolicyRejected { status: 403, .. })
        ));

        let result = server.remote.get_baby(&alice(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(RemoteError::NotFound(_))));

        let response = client
            .post(format!("{}/babies", server.url))
            .bearer_auth("alice-key")
            .header(header::CONTENT_TYPE, "application/json")
            .body("{\"name\": 42}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_entry_lifecycle() {
        let server = spawn_server().await;
        let who = alice();
        let baby = server.remote.create_baby(&who, &new_baby()).await.unwrap();

        let base = timefmt::now() - Duration::hours(3);
        let first = server
            .remote
            .create_entry(&who, &diaper(baby.id).at(base))
            .await
            .unwrap();
        assert_eq!(first.created_by.as_deref(), Some("alice"));
        let feed = NewEntry::new(
            baby.id,
            EntryPayload::Feed(FeedPayload::new(FeedSource::Bottle, VolumeUnit::Ml).with_volume(120.0)),
        )
        .at(base + Duration::hours(1));
        let second = server.remote.create_entry(&who, &feed).await.unwrap();

        let listed = server
            .remote
            .list_entries(&who, baby.id, &EntryQuery::default())
            .await
            .unwrap();
        assert_eq!(
            listed.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        let feeds = server
            .remote
            .list_entries(&who, baby.id, &EntryQuery::default().with_type(EntryType::Feed))
            .await
            .unwrap();
        assert_eq!(feeds, vec![second.clone()]);

        let updated = server
            .remote
            .update_entry(&who, first.id, &EntryUpdate::notes(Some("leaky".into())))
            .await
            .unwrap();
        assert_eq!(updated.notes.as_deref(), Some("leaky"));
        assert!(updated.updated_at >= first.updated_at);

        // A stale copy is answered with the stored row.
        let mut stale = updated.clone();
        stale.notes = None;
        stale.updated_at = updated.updated_at - Duration::minutes(1);
        let kept = server.remote.upsert_entry(&who, &stale).await.unwrap();
        assert_eq!(kept, updated);

        server.remote.delete_entry(&who, first.id).await.unwrap();
        assert!(matches!(
            server.remote.get_entry(&who, first.id).await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(
            server.remote.delete_entry(&who, first.id).await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_export_csv() {
        let server = spawn_server().await;
        let who = alice();
        let baby = server.remote.create_baby(&who, &new_baby()).await.unwrap();
        server
            .remote
            .create_entry(&who, &diaper(baby.id))
            .await
            .unwrap();

        let csv = server
            .remote
            .export_csv(&who, baby.id, &DateRange::all())
            .await
            .unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("\"Date\",\"Type\",\"Details\""));
        assert!(lines.next().unwrap().contains("\"diaper\""));
        assert!(lines.next().is_none());

        let result = server.remote.export_csv(&bob(), baby.id, &DateRange::all()).await;
        assert!(matches!(
            result,
            Err(RemoteError::PolicyRejected { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_offline_records_pushed_on_reconnect() {
        let server = spawn_server().await;
        let temp_dir = TempDir::new().unwrap();
        let local = LocalStore::open(Some(temp_dir.path().join("client.db")))
            .await
            .unwrap();
        let service = DataService::new(local, server.remote.clone(), Connectivity::new(false))
            .with_identity(Some(alice()));

        let baby = service.create_baby(new_baby()).await.unwrap();
        let entry = service.create_entry(diaper(baby.id)).await.unwrap();
        assert!(matches!(
            server.remote.get_baby(&alice(), baby.id).await,
            Err(RemoteError::NotFound(_))
        ));

        service.connectivity().set_online(true);
        let report = service.sync().await.unwrap();
        assert_eq!(report.babies_pushed, 1);
        assert_eq!(report.entries_pushed, 1);

        assert_eq!(server.remote.get_baby(&alice(), baby.id).await.unwrap().id, baby.id);
        assert_eq!(server.remote.get_entry(&alice(), entry.id).await.unwrap(), entry);
    }

    async fn next_event(events: &mut Subscription) -> Option<FeedEvent> {
        tokio::time::timeout(StdDuration::from_secs(5), events.recv())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_realtime_change_delivered() {
        let server = spawn_server().await;
        let who = alice();
        let baby = server.remote.create_baby(&who, &new_baby()).await.unwrap();

        let feed = ChangeFeed::new(WsTransport::new(server.url.clone()));
        let mut events = feed.listen(baby.id);
        feed.subscribe(baby.id, &who).await.unwrap();

        // The join is confirmed once the server relays to this connection.
        loop {
            match next_event(&mut events).await {
                Some(FeedEvent::Presence { .. }) => break,
                Some(_) => continue,
                None => panic!("feed closed"),
            }
        }

        let written = server.remote.create_entry(&who, &diaper(baby.id)).await.unwrap();
        loop {
            match next_event(&mut events).await {
                Some(FeedEvent::Change { kind, entry, .. }) => {
                    assert_eq!(kind, ChangeKind::Inserted);
                    assert_eq!(entry, written);
                    break;
                }
                Some(_) => continue,
                None => panic!("feed closed"),
            }
        }

        feed.unsubscribe(baby.id).await;
    }

    #[tokio::test]
    async fn test_realtime_requires_access() {
        let server = spawn_server().await;
        let baby = server.remote.create_baby(&alice(), &new_baby()).await.unwrap();

        let feed = ChangeFeed::new(WsTransport::new(server.url.clone()));
        assert!(feed.subscribe(baby.id, &bob()).await.is_err());
        assert!(!feed.is_subscribed(baby.id).await);
    }
}
