use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use todolisti_core::models::{AuditLog, AuditQuery, AuditStat};

use super::AppState;
use crate::auth::AuthenticatedUser;
use crate::error::AppError;

const MAX_AUDIT_PAGE: u32 = 500;

pub(super) fn routes() -> Router<AppState> {
    Router::new()
        .route("/audit", get(own_entries))
        .route("/audit/stats", get(own_stats))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsQuery {
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
}

async fn own_entries(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLog>>, AppError> {
    if query.limit() > MAX_AUDIT_PAGE {
        return Err(AppError::bad_request(format!(
            "limit must be at most {MAX_AUDIT_PAGE}"
        )));
    }
    let entries = state
        .services
        .audit
        .find_by_user(&user.user_id, &query)
        .await?;
    Ok(Json(entries))
}

async fn own_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<AuditStat>>, AppError> {
    let stats = state
        .services
        .audit
        .stats(&user.user_id, query.start_date, query.end_date)
        .await?;
    Ok(Json(stats))
}
