use std::net::SocketAddr;

use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tokio::{net::TcpListener, sync::watch};
use tracing::info;

use climate_common::ControllerSnapshot;

pub fn router(snapshots: watch::Receiver<ControllerSnapshot>) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .with_state(snapshots)
}

pub async fn serve(port: u16, snapshots: watch::Receiver<ControllerSnapshot>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status endpoint on http://{addr}/api/status");
    axum::serve(listener, router(snapshots))
        .await
        .context("status server failed")?;
    Ok(())
}

async fn handle_get_status(
    State(snapshots): State<watch::Receiver<ControllerSnapshot>>,
) -> impl IntoResponse {
    let snapshot = snapshots.borrow().clone();
    Json(snapshot)
}
