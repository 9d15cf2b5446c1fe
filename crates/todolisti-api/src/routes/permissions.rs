use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use todolisti_core::models::{
    NewInvitation, Permission, PermissionId, PermissionInvitation, PermissionLevel,
};

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;
use crate::rate_limit::ProtectedEndpoint;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/permissions/invite", post(invite))
        .route("/permissions/accept/{token}", post(accept))
        .route("/permissions/decline/{token}", post(decline))
        .route("/permissions/pending", get(pending))
        .route("/permissions/assistants", get(assistants))
        .route("/permissions/delegators", get(delegators))
        .route("/permissions/{id}", patch(update).delete(revoke))
}

#[derive(Debug, Deserialize)]
struct LevelChange {
    level: PermissionLevel,
}

async fn invite(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(input): Json<NewInvitation>,
) -> Result<(StatusCode, Json<PermissionInvitation>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Invite, &user.user_id)
        .await?;

    let invitation = state
        .services
        .permissions
        .create_invitation(&user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(invitation)))
}

async fn accept(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token): Path<String>,
) -> Result<Json<Permission>, AppError> {
    let permission = state
        .services
        .permissions
        .accept_invitation(&user.user_id, &token)
        .await?;
    Ok(Json(permission))
}

async fn decline(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(token): Path<String>,
) -> Result<Json<PermissionInvitation>, AppError> {
    let invitation = state
        .services
        .permissions
        .decline_invitation(&user.user_id, &token)
        .await?;
    Ok(Json(invitation))
}

async fn pending(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<PermissionInvitation>>, AppError> {
    Ok(Json(
        state
            .services
            .permissions
            .find_pending_invitations(&user.email)
            .await?,
    ))
}

async fn assistants(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Permission>>, AppError> {
    Ok(Json(
        state.services.permissions.find_assistants(&user.user_id).await?,
    ))
}

async fn delegators(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Permission>>, AppError> {
    Ok(Json(
        state.services.permissions.find_delegators(&user.user_id).await?,
    ))
}

async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<PermissionId>,
    Json(change): Json<LevelChange>,
) -> Result<Json<Permission>, AppError> {
    let permission = state
        .services
        .permissions
        .update_permission(&user.user_id, &id, change.level)
        .await?;
    Ok(Json(permission))
}

async fn revoke(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<PermissionId>,
) -> Result<StatusCode, AppError> {
    state
        .services
        .permissions
        .revoke_permission(&user.user_id, &id)
        .await?;
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
    async fn invitation_flow_creates_visible_grant() {
        let app = TestApp::new().await;
        let owner = (UserId::new(), "owner@example.com");
        let assistant = (UserId::new(), "assistant@example.com");

        let (status, invitation) = app
            .request(
                Method::POST,
                "/v1/permissions/invite",
                Some(owner),
                Some(json!({ "assistantEmail": "Assistant@Example.com", "level": "view" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(invitation["status"], "pending");

        let (_, pending) = app
            .request(Method::GET, "/v1/permissions/pending", Some(assistant), None)
            .await;
        assert_eq!(pending.as_array().unwrap().len(), 1);

        let token = invitation["token"].as_str().unwrap();
        let (status, permission) = app
            .request(
                Method::POST,
                &format!("/v1/permissions/accept/{token}"),
                Some(assistant),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(permission["level"], "view");
        assert_eq!(permission["isActive"], true);

        let (status, _) = app
            .request(
                Method::POST,
                &format!("/v1/permissions/accept/{token}"),
                Some(assistant),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, assistants) = app
            .request(Method::GET, "/v1/permissions/assistants", Some(owner), None)
            .await;
        assert_eq!(assistants[0]["assistantId"], assistant.0.to_string());
        let (_, delegators) = app
            .request(Method::GET, "/v1/permissions/delegators", Some(assistant), None)
            .await;
        assert_eq!(delegators[0]["ownerId"], owner.0.to_string());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_token_is_not_found() {
        let app = TestApp::new().await;
        let (status, _) = app
            .request(
                Method::POST,
                "/v1/permissions/decline/nope",
                Some((UserId::new(), "me@example.com")),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn owner_updates_then_revokes_grant() {
        let app = TestApp::new().await;
        let owner = (UserId::new(), "owner@example.com");
        let assistant = (UserId::new(), "assistant@example.com");
        let permission = app.grant(owner, assistant, PermissionLevel::View).await;
        let uri = format!("/v1/permissions/{}", permission["id"].as_str().unwrap());

        let (status, _) = app
            .request(Method::PATCH, &uri, Some(assistant), Some(json!({ "level": "full" })))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, updated) = app
            .request(Method::PATCH, &uri, Some(owner), Some(json!({ "level": "full" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["level"], "full");

        let (status, _) = app.request(Method::DELETE, &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app.request(Method::DELETE, &uri, Some(owner), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invitations_are_rate_limited() {
        let app = TestApp::with_config(&[("INVITE_RATE_LIMIT_PER_WINDOW", "1")]).await;
        let owner = (UserId::new(), "owner@example.com");
        let body = |email: &str| Some(json!({ "assistantEmail": email, "level": "edit" }));

        let (status, _) = app
            .request(Method::POST, "/v1/permissions/invite", Some(owner), body("a@example.com"))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = app
            .request(Method::POST, "/v1/permissions/invite", Some(owner), body("b@example.com"))
            .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }
}
