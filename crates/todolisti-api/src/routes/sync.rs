use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use todolisti_core::models::{
    Changes, ConflictData, NewSyncQueueItem, QueueProcessOutcome, SyncQueueId, SyncQueueItem,
    SyncRequest, SyncResult,
};

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::rate_limit::ProtectedEndpoint;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync", post(sync))
        .route("/sync/changes", get(changes))
        .route("/sync/pending", get(pending))
        .route("/sync/queue", post(queue))
        .route("/sync/queue/process", post(process_queue))
        .route("/sync/queue/{id}", patch(mark_queue_item))
}

#[derive(Debug, Deserialize)]
struct ChangesQuery {
    since: Option<DateTime<Utc>>,
}

/// Client-driven queue transition
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum QueueTransition {
    Processing,
    Completed,
    Failed { error: String },
    Conflict {
        #[serde(rename = "conflictData")]
        conflict_data: ConflictData,
    },
}

async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResult>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sync, &user.user_id)
        .await?;

    let result = state.services.sync.sync(&user.user_id, &request).await?;
    Ok(Json(result))
}

async fn changes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<Changes>, AppError> {
    let changes = state
        .services
        .sync
        .changes_since(&user.user_id, query.since)
        .await?;
    Ok(Json(changes))
}

async fn pending(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<SyncQueueItem>>, AppError> {
    Ok(Json(
        state
            .services
            .sync
            .get_pending_operations(&user.user_id)
            .await?,
    ))
}

async fn queue(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(input): Json<NewSyncQueueItem>,
) -> Result<(StatusCode, Json<SyncQueueItem>), AppError> {
    let item = state
        .services
        .sync
        .queue_operation(&user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn process_queue(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<QueueProcessOutcome>>, AppError> {
    Ok(Json(state.services.sync.process_queue(&user.user_id).await?))
}

async fn mark_queue_item(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<SyncQueueId>,
    Json(transition): Json<QueueTransition>,
) -> Result<Json<SyncQueueItem>, AppError> {
    let sync = &state.services.sync;
    let item = match transition {
        QueueTransition::Processing => sync.mark_processing(&user.user_id, &id).await?,
        QueueTransition::Completed => sync.mark_completed(&user.user_id, &id).await?,
        QueueTransition::Failed { error } => sync.mark_failed(&user.user_id, &id, &error).await?,
        QueueTransition::Conflict { conflict_data } => {
            sync.mark_conflict(&user.user_id, &id, &conflict_data).await?
        }
    };
    Ok(Json(item))
}
