mod auth;
mod config;
mod error;
mod rate_limit;
mod routes;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use config::AppConfig;
use routes::{app_router, AppState};
use todolisti_core::services::{AuditService, DatabaseService};
use todolisti_core::Services;

const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("todolisti_api=info".parse().expect("valid directive"))
                .add_directive("todolisti_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting todolisti-api with config: {:?}", config);

    let database = DatabaseService::open_path(config.database_path.as_str()).await?;
    let services = Services::new(database);

    if let Some(days) = config.audit_retention_days {
        spawn_audit_retention(services.audit.clone(), days);
    }

    let bind_addr = config.bind_addr.clone();
    let router = app_router(AppState::new(config, services));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("todolisti-api listening on {}", bind_addr);
    axum::serve(listener, router).await?;
    Ok(())
}

/// Delete audit entries older than `days`, once at startup and then daily.
fn spawn_audit_retention(audit: AuditService, days: u32) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
            if let Err(error) = audit.cleanup(cutoff).await {
                tracing::warn!("Audit retention sweep failed: {error}");
            }
        }
    });
}
