use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use todolisti_core::models::{NewTask, ProjectId, Task, TaskChanges, TaskFilter, TaskId, TaskPriority};

use super::{ActingFor, AppState};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/tasks", post(create_task).get(list_tasks))
        .route(
            "/tasks/{id}",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/tasks/{id}/complete", post(complete_task))
        .route("/tasks/{id}/uncomplete", post(uncomplete_task))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskListQuery {
    project_id: Option<ProjectId>,
    completed: Option<bool>,
    priority: Option<u8>,
    due_from: Option<DateTime<Utc>>,
    due_to: Option<DateTime<Utc>>,
    parent_id: Option<TaskId>,
    /// Only tasks without a parent; ignored when `parentId` is given
    top_level: Option<bool>,
}

impl TryFrom<TaskListQuery> for TaskFilter {
    type Error = AppError;

    fn try_from(query: TaskListQuery) -> Result<Self, Self::Error> {
        let priority = query
            .priority
            .map(TaskPriority::try_from)
            .transpose()
            .map_err(AppError::bad_request)?;
        let parent_id = match (query.parent_id, query.top_level) {
            (Some(parent), _) => Some(Some(parent)),
            (None, Some(true)) => Some(None),
            (None, _) => None,
        };
        Ok(Self {
            project_id: query.project_id,
            completed: query.completed,
            priority,
            due_from: query.due_from,
            due_to: query.due_to,
            parent_id,
        })
    }
}

async fn create_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Json(input): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let task = state.services.tasks.create(acting.access(&user), input).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<Task>>, AppError> {
    let filter = TaskFilter::try_from(query)?;
    let tasks = state.services.tasks.list(acting.access(&user), &filter).await?;
    Ok(Json(tasks))
}

async fn get_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<TaskId>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(state.services.tasks.get(acting.access(&user), &id).await?))
}

async fn update_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<TaskId>,
    Json(changes): Json<TaskChanges>,
) -> Result<Json<Task>, AppError> {
    let task = state
        .services
        .tasks
        .update(acting.access(&user), &id, changes)
        .await?;
    Ok(Json(task))
}

async fn complete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<TaskId>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(
        state.services.tasks.complete(acting.access(&user), &id).await?,
    ))
}

async fn uncomplete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<TaskId>,
) -> Result<Json<Task>, AppError> {
    Ok(Json(
        state.services.tasks.uncomplete(acting.access(&user), &id).await?,
    ))
}

async fn delete_task(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<TaskId>,
) -> Result<StatusCode, AppError> {
    state.services.tasks.delete(acting.access(&user), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use todolisti_core::models::{PermissionLevel, UserId};

    use super::super::test_support::TestApp;

    #[tokio::test(flavor = "multi_thread")]
    async fn task_lifecycle_over_http() {
        let app = TestApp::new().await;
        let me = (UserId::new(), "me@example.com");

        let (status, task) = app
            .request(
                Method::POST,
                "/v1/tasks",
                Some(me),
                Some(json!({ "title": "Write report", "priority": 3 })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task["syncVersion"], 1);
        let id = task["id"].as_str().unwrap().to_string();

        let (status, task) = app
            .request(Method::POST, &format!("/v1/tasks/{id}/complete"), Some(me), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(task["completedAt"].is_string());
        assert_eq!(task["syncVersion"], 2);

        let (status, tasks) = app
            .request(Method::GET, "/v1/tasks?completed=true&priority=3", Some(me), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tasks.as_array().unwrap().len(), 1);

        let (status, _) = app
            .request(Method::DELETE, &format!("/v1/tasks/{id}"), Some(me), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .request(Method::GET, &format!("/v1/tasks/{id}"), Some(me), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stale_update_is_a_conflict() {
        let app = TestApp::new().await;
        let me = (UserId::new(), "me@example.com");
        let (_, task) = app
            .request(Method::POST, "/v1/tasks", Some(me), Some(json!({ "title": "A" })))
            .await;
        let id = task["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .request(
                Method::PATCH,
                &format!("/v1/tasks/{id}"),
                Some(me),
                Some(json!({ "title": "B", "syncVersion": 1 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .request(
                Method::PATCH,
                &format!("/v1/tasks/{id}"),
                Some(me),
                Some(json!({ "title": "C", "syncVersion": 1 })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delegated_access_follows_granted_level() {
        let app = TestApp::new().await;
        let owner = (UserId::new(), "owner@example.com");
        let assistant = (UserId::new(), "assistant@example.com");
        app.grant(owner, assistant, PermissionLevel::Edit).await;

        let (status, task) = app
            .request(
                Method::POST,
                &format!("/v1/tasks?forUserId={}", owner.0),
                Some(assistant),
                Some(json!({ "title": "Book flights" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(task["userId"], owner.0.to_string());
        let id = task["id"].as_str().unwrap().to_string();

        let (status, _) = app
            .request(
                Method::DELETE,
                &format!("/v1/tasks/{id}?forUserId={}", owner.0),
                Some(assistant),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let stranger = (UserId::new(), "stranger@example.com");
        let (status, _) = app
            .request(
                Method::GET,
                &format!("/v1/tasks?forUserId={}", owner.0),
                Some(stranger),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_priority_filter_is_rejected() {
        let app = TestApp::new().await;
        let (status, _) = app
            .request(
                Method::GET,
                "/v1/tasks?priority=9",
                Some((UserId::new(), "me@example.com")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
