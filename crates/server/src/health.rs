use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use coachdesk_core::domain::job::JobState;
use coachdesk_db::repositories::JobQueueRepository;
use coachdesk_db::DbPool;
use serde::Serialize;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    jobs: Arc<dyn JobQueueRepository>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, jobs: Arc<dyn JobQueueRepository>) -> Self {
        Self { db_pool, jobs }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub queue: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn spawn(bind_address: &str, port: u16, state: HealthState) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(state)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let queue = queue_check(state.jobs.as_ref()).await;
    let ready = database.status == "ready" && queue.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "coachdesk workers and scheduler running".to_string(),
        },
        database,
        queue,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn queue_check(jobs: &dyn JobQueueRepository) -> HealthCheck {
    let queued = jobs.list_by_state(JobState::Queued).await;
    let dead = jobs.list_by_state(JobState::FailedTerminal).await;
    match (queued, dead) {
        (Ok(queued), Ok(dead)) => HealthCheck {
            status: "ready",
            detail: format!("{} queued, {} failed terminally", queued.len(), dead.len()),
        },
        (Err(error), _) | (_, Err(error)) => {
            HealthCheck { status: "degraded", detail: format!("job queue unreadable: {error}") }
        }
    }
}
