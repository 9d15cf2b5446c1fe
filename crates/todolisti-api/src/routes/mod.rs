mod audit;
mod permissions;
mod projects;
mod sync;
mod tags;
mod tasks;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use todolisti_core::models::UserId;
use todolisti_core::{Access, Services};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{user_fingerprint, EndpointRateLimiter, RateLimitMetricsSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    jwt_verifier: Arc<JwtVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, services: Services) -> Self {
        Self {
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            jwt_verifier: Arc::new(JwtVerifier::new(config)),
            services,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .merge(sync::routes())
        .merge(permissions::routes())
        .merge(tasks::routes())
        .merge(projects::routes())
        .merge(tags::routes())
        .merge(audit::routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    database: &'static str,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = match state.services.database.ping().await {
        Ok(()) => "ok",
        Err(error) => {
            tracing::warn!("Health check database ping failed: {error}");
            "unavailable"
        }
    };
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        database,
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

/// Verify the bearer token, provision the account on first sight, and
/// reject deactivated users.
async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;

    let account = state
        .services
        .users
        .provision(user.user_id, &user.email, user.name.clone())
        .await?;
    if !account.is_active {
        tracing::info!(user = user_fingerprint(&user.user_id), "Rejected deactivated account");
        return Err(AppError::unauthorized("Account is deactivated"));
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// `?forUserId=` selects a delegator's data instead of the caller's own
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActingFor {
    for_user_id: Option<UserId>,
}

impl ActingFor {
    fn access(&self, user: &AuthenticatedUser) -> Access {
        self.for_user_id.map_or_else(
            || Access::own(user.user_id),
            |owner| Access::delegated(user.user_id, owner),
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use todolisti_core::models::PermissionLevel;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::{issue_test_token, test_claims};
    use crate::config::tests::{config_with, TEST_SECRET};

    pub struct TestApp {
        pub router: Router,
        pub services: Services,
    }

    impl TestApp {
        pub async fn new() -> Self {
            Self::with_config(&[]).await
        }

        pub async fn with_config(pairs: &[(&str, &str)]) -> Self {
            let config = Arc::new(config_with(pairs).unwrap());
            let services = Services::in_memory().await.unwrap();
            let router = app_router(AppState::new(config, services.clone()));
            Self { router, services }
        }

        pub async fn request(
            &self,
            method: Method,
            uri: &str,
            user: Option<(UserId, &str)>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some((user_id, email)) = user {
                let token = issue_test_token(TEST_SECRET, &test_claims(user_id, email));
                builder = builder.header("authorization", format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        /// Invite `assistant` by email and accept as them
        pub async fn grant(
            &self,
            owner: (UserId, &str),
            assistant: (UserId, &str),
            level: PermissionLevel,
        ) -> Value {
            let (status, invitation) = self
                .request(
                    Method::POST,
                    "/v1/permissions/invite",
                    Some(owner),
                    Some(json!({ "assistantEmail": assistant.1, "level": level })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let token = invitation["token"].as_str().unwrap();
            let (status, permission) = self
                .request(
                    Method::POST,
                    &format!("/v1/permissions/accept/{token}"),
                    Some(assistant),
                    None,
                )
                .await;
            assert_eq!(status, StatusCode::OK);
            permission
        }
    }
}
