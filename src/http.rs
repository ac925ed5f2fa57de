//! Local control surface (§4.10): a thin axum API over the `Supervisor`.
//! Owns no pipeline logic of its own.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use wasabi_scan_oplog::OperationLog;
use wasabi_scan_pipeline::Supervisor;

#[derive(Clone)]
pub struct ControlState {
    pub supervisor: Arc<Supervisor>,
    pub oplog: Arc<OperationLog>,
}

pub fn router(state: ControlState) -> Router {
    Router::new()
        .route("/scan/start", post(start))
        .route("/scan/stop", post(stop))
        .route("/scan/status", get(status))
        .route("/scan/log", get(log))
        .route("/scan/log/clear", post(clear_log))
        .route("/health", get(health))
        .with_state(state)
}

async fn start(State(state): State<ControlState>) -> Json<Value> {
    let started = state.supervisor.start().await;
    Json(json!({ "started": started }))
}

async fn stop(State(state): State<ControlState>) -> Json<Value> {
    let stopped = state.supervisor.stop().await;
    Json(json!({ "stopped": stopped }))
}

async fn status(State(state): State<ControlState>) -> Json<Value> {
    let scanning = state.supervisor.is_running().await;
    Json(json!({ "scanning": scanning }))
}

async fn log(State(state): State<ControlState>) -> Json<Value> {
    Json(serde_json::to_value(state.oplog.snapshot()).unwrap_or_else(|_| json!({})))
}

async fn clear_log(State(state): State<ControlState>) -> Json<Value> {
    let cleared = state.oplog.clear_current().is_ok();
    Json(json!({ "cleared": cleared }))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
