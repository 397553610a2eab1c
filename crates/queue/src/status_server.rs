//! Status HTTP server.
//!
//! Serves the current [`QueueSnapshot`] as JSON for dashboards and scripts.

use axum::{extract::State, routing::get, Json, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::info;

use crate::status::{QueueSnapshot, SharedStatus};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Handler for GET /status
async fn get_status(State(status): State<SharedStatus>) -> Json<QueueSnapshot> {
    let snapshot = status.read().await.clone();
    Json(snapshot)
}

pub fn create_status_router(status: SharedStatus) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .with_state(status)
}

/// Serve the status endpoint on `127.0.0.1:<port>` until the task is dropped.
pub async fn run_status_server(status: SharedStatus, port: u16) -> Result<(), ServerError> {
    let app = create_status_router(status);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "status server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
