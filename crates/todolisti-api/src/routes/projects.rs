use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use todolisti_core::models::{NewProject, Project, ProjectChanges, ProjectId};

use super::{ActingFor, AppState};
use crate::auth::AuthenticatedUser;
use crate::error::AppError;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route(
            "/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/projects/{id}/archive", post(archive_project))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectListQuery {
    #[serde(default)]
    include_archived: bool,
}

async fn create_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Json(input): Json<NewProject>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    let project = state
        .services
        .projects
        .create(acting.access(&user), input)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_projects(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Query(query): Query<ProjectListQuery>,
) -> Result<Json<Vec<Project>>, AppError> {
    let projects = state
        .services
        .projects
        .list(acting.access(&user), query.include_archived)
        .await?;
    Ok(Json(projects))
}

async fn get_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<ProjectId>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(
        state.services.projects.get(acting.access(&user), &id).await?,
    ))
}

async fn update_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<ProjectId>,
    Json(changes): Json<ProjectChanges>,
) -> Result<Json<Project>, AppError> {
    let project = state
        .services
        .projects
        .update(acting.access(&user), &id, changes)
        .await?;
    Ok(Json(project))
}

async fn archive_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<ProjectId>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(
        state.services.projects.archive(acting.access(&user), &id).await?,
    ))
}

async fn delete_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(acting): Query<ActingFor>,
    Path(id): Path<ProjectId>,
) -> Result<StatusCode, AppError> {
    state
        .services
        .projects
        .delete(acting.access(&user), &id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use todolisti_core::models::UserId;

    use super::super::test_support::TestApp;

    #[tokio::test(flavor = "multi_thread")]
    async fn archived_projects_are_hidden_by_default() {
        let app = TestApp::new().await;
        let me = (UserId::new(), "me@example.com");

        let (status, project) = app
            .request(
                Method::POST,
                "/v1/projects",
                Some(me),
                Some(json!({ "name": "Garden" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = project["id"].as_str().unwrap().to_string();

        let (status, project) = app
            .request(Method::POST, &format!("/v1/projects/{id}/archive"), Some(me), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(project["isArchived"], true);

        let (_, projects) = app.request(Method::GET, "/v1/projects", Some(me), None).await;
        assert_eq!(projects.as_array().unwrap().len(), 0);

        let (_, projects) = app
            .request(Method::GET, "/v1/projects?includeArchived=true", Some(me), None)
            .await;
        assert_eq!(projects.as_array().unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_id_is_a_bad_request() {
        let app = TestApp::new().await;
        let (status, _) = app
            .request(
                Method::GET,
                "/v1/projects/not-a-uuid",
                Some((UserId::new(), "me@example.com")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
