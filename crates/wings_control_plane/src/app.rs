use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use futures::stream::StreamExt;
use http::{header, HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info};
use wings_contract::{Destination, ShareId, ShareState};
use wings_worker::{BroadcastNotifier, Wings};

#[derive(Debug, Deserialize)]
struct CreateShareRequest {
    file_path: PathBuf,
    endpoint_id: u16,
    destination_id: u16,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EndpointView {
    endpoint_id: u16,
    name: String,
    linked: bool,
    account: Option<String>,
    destinations: Vec<DestinationView>,
}

#[derive(Debug, Serialize)]
struct DestinationView {
    destination_id: u16,
    description: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub wings: Arc<Wings>,
    pub notifications: BroadcastNotifier,
    pub auth_token: Option<String>,
    pub require_bearer: bool,
}

impl AppState {
    pub fn new(
        wings: Arc<Wings>,
        notifications: BroadcastNotifier,
        auth_token: Option<String>,
        require_bearer: bool,
    ) -> Self {
        Self {
            wings,
            notifications,
            auth_token,
            require_bearer,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(health_live))
        .route("/health/ready", get(health_ready))
        .route("/v1/shares", get(list_shares).post(create_share))
        .route("/v1/shares/{id}", get(get_share))
        .route("/v1/queue", get(queue_status))
        .route("/v1/queue/drain", post(drain_queue))
        .route("/v1/endpoints", get(list_endpoints))
        .route(
            "/v1/destinations/{endpoint_id}/{destination_id}",
            delete(unlink_destination),
        )
        .route("/v1/notifications/stream", get(stream_notifications))
        .with_state(state)
}

async fn health_live() -> impl IntoResponse {
    Json(json!({
        "status": "live",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn health_ready(State(state): State<AppState>) -> impl IntoResponse {
    let ready = state.wings.store().ping().await;
    let payload = Json(json!({
        "status": if ready { "ready" } else { "degraded" },
        "timestamp": Utc::now().to_rfc3339()
    }));

    if ready {
        (StatusCode::OK, payload).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, payload).into_response()
    }
}

async fn create_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateShareRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;

    if state.wings.processor().endpoint(payload.endpoint_id).is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error":"endpoint_not_found"})),
        ));
    }

    let destination = Destination::new(payload.endpoint_id, payload.destination_id);
    if !state.wings.enqueue(&payload.file_path, destination).await {
        return Err(internal_error(anyhow!(
            "share request for {} was not stored",
            payload.file_path.display()
        )));
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "accepted": true,
            "destination": destination.to_string()
        })),
    ))
}

async fn get_share(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    match state.wings.store().get(ShareId(id)).await {
        Some(record) => Ok((StatusCode::OK, Json(record))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error":"share_not_found"})),
        )),
    }
}

async fn list_shares(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    let filter = query
        .state
        .as_deref()
        .map(str::parse::<ShareState>)
        .transpose()
        .map_err(|detail| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error":"invalid_state", "detail": detail})),
            )
        })?;
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);

    let items = state.wings.store().list(filter, limit).await;
    Ok((StatusCode::OK, Json(json!({ "items": items }))))
}

async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.wings.store();
    let counts = store.counts().await;
    let retry = store.load_retry_state().await;
    let purge = store.purge_policy();
    let next_delay = state
        .wings
        .processor()
        .policy()
        .delay_for(retry.consecutive_failures);

    Json(json!({
        "counts": counts,
        "total": counts.total(),
        "retry": retry,
        "next_delay_secs": next_delay.as_secs(),
        "purge": {
            "expiry_hours": purge.expiry.num_hours(),
            "max_fails": purge.max_fails
        }
    }))
}

async fn drain_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;
    let queued = state.wings.kick();
    info!(queued, "drain requested over http");
    Ok((StatusCode::ACCEPTED, Json(json!({ "queued": queued }))))
}

async fn list_endpoints(State(state): State<AppState>) -> impl IntoResponse {
    let mut views = Vec::new();
    for endpoint in state.wings.processor().endpoints() {
        let mut destinations = Vec::new();
        for destination_id in endpoint.destination_ids() {
            destinations.push(DestinationView {
                destination_id,
                description: endpoint.destination_description(destination_id).await,
            });
        }

        views.push(EndpointView {
            endpoint_id: endpoint.endpoint_id(),
            name: endpoint.name().to_string(),
            linked: endpoint.is_linked().await,
            account: endpoint.linked_account_name().await,
            destinations,
        });
    }
    Json(json!({ "endpoints": views }))
}

async fn unlink_destination(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((endpoint_id, destination_id)): Path<(u16, u16)>,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    authorize(&state, &headers)?;

    if state.wings.processor().endpoint(endpoint_id).is_none() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error":"endpoint_not_found"})),
        ));
    }

    let destination = Destination::new(endpoint_id, destination_id);
    let deleted = state.wings.unlink_destination(destination).await;
    info!(destination = %destination, deleted, "destination unlinked over http");
    Ok(StatusCode::NO_CONTENT)
}

async fn stream_notifications(
    State(state): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, std::convert::Infallible>>> {
    let receiver = state.notifications.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|item| async move {
        match item {
            Ok(notification) => {
                let data =
                    serde_json::to_string(&notification).unwrap_or_else(|_| "{}".to_string());
                Some(Ok(SseEvent::default().event("share.delivered").data(data)))
            }
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15)))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), (StatusCode, Json<Value>)> {
    if !state.require_bearer {
        return Ok(());
    }

    let token = state.auth_token.as_deref().ok_or_else(|| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"auth_token_required_but_not_configured"})),
        )
    })?;

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if provided == format!("Bearer {token}") {
        Ok(())
    } else {
        Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error":"invalid_or_missing_bearer_token"})),
        ))
    }
}

fn internal_error(error: anyhow::Error) -> (StatusCode, Json<Value>) {
    error!(error = %error, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal_error", "detail": error.to_string() })),
    )
}
