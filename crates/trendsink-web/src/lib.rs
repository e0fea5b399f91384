//! HTTP trigger: `GET /` runs the pipeline once and reports the outcome as JSON.

use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tokio::net::TcpListener;
use tracing::info;
use trendsink_core::RunOutcome;
use trendsink_sync::{maybe_build_scheduler, Pipeline};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(run_handler))
        .with_state(state)
}

/// Bind `0.0.0.0:$PORT`, start the cron job when one is configured, and serve until shutdown.
pub async fn serve(pipeline: Arc<Pipeline>) -> anyhow::Result<()> {
    let port = pipeline.config().port;

    let scheduler = maybe_build_scheduler(pipeline.clone()).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(
            schedule = pipeline.config().schedule.as_deref().unwrap_or_default(),
            "scheduled runs enabled"
        );
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "listening");
    axum::serve(listener, app(AppState::new(pipeline))).await?;
    Ok(())
}

async fn run_handler(State(state): State<AppState>) -> impl IntoResponse {
    let outcome = state.pipeline.run_today().await;
    (status_for(&outcome), Json(outcome))
}

fn status_for(outcome: &RunOutcome) -> StatusCode {
    if outcome.is_error() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}
