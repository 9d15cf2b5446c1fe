use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::{Extension, Json, Router};
use todolisti_core::models::{NewTag, Tag, TagChanges, TagId};

use super::{ActingFor, AppState};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/tags", post(create_tag).get(list_tags))
        .route("/tags/{id}", patch(update_tag).delete(delete_tag))
}

async fn create_tag(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Json(input): Json<NewTag>,
) -> Result<(StatusCode, Json<Tag>), AppError> {
    let tag = state.services.tags.create(acting.access(&user), input).await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn list_tags(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
) -> Result<Json<Vec<Tag>>, AppError> {
    Ok(Json(state.services.tags.list(acting.access(&user)).await?))
}

async fn update_tag(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<TagId>,
    Json(changes): Json<TagChanges>,
) -> Result<Json<Tag>, AppError> {
    let tag = state
        .services
        .tags
        .update(acting.access(&user), &id, changes)
        .await?;
    Ok(Json(tag))
}

async fn delete_tag(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<TagId>,
) -> Result<StatusCode, AppError> {
    state.services.tags.delete(acting.access(&user), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
