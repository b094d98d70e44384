#![forbid(unsafe_code)]

use crate::persist::PersistHandle;
use crate::sse::EventHub;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use forge_core::change::ChangeSet;
use forge_core::op::Operation;
use forge_engine::{Engine, EngineError, EngineEvent};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};

const KEEPALIVE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RwLock<Engine>>,
    pub hub: Arc<EventHub>,
    pub persister: PersistHandle,
    pub log_state_updates: bool,
}

/// The HTTP surface. State names may contain `/`; clients URL-encode them
/// (`ws%2Falice`) so each fits one path segment.
pub fn router(app: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(get_health))
        .route("/v1/states", get(get_states).post(post_states))
        .route("/v1/states/{state}", get(get_state))
        .route("/v1/states/{state}/conflicts", get(get_state_conflicts))
        .route("/v1/states/{state}/promote", post(post_promote))
        .route("/v1/change-sets", get(get_change_sets).post(post_change_sets))
        .route("/v1/change-sets/{id}", get(get_change_set))
        .route("/v1/ops", post(post_ops))
        .route("/v1/ops/{id}", get(get_op))
        .route("/v1/conflicts/{id}", get(get_conflict))
        .route("/v1/conflicts/{id}/resolve", post(post_resolve))
        .route("/v1/stream/states/{state}", get(stream_state))
        .layer(cors)
        .with_state(app)
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"ok": false, "error": message.into()})),
    )
        .into_response()
}

fn not_found(message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"ok": false, "error": message.into()})),
    )
        .into_response()
}

fn engine_error(err: EngineError) -> Response {
    bad_request(err.to_string())
}

/// Publishes snapshots for `state_update` events, logs the rest, and
/// schedules a snapshot write. Runs while the caller still holds the
/// engine guard, so the published snapshot matches the commit it follows.
fn fan_out(app: &AppState, engine: &Engine, events: &[EngineEvent]) {
    for event in events {
        match event {
            EngineEvent::StateUpdate { state } => {
                if let Some(snapshot) = engine.state_snapshot(state) {
                    app.hub.publish(state, snapshot.to_string());
                    if app.log_state_updates {
                        tracing::info!(state = %state, "state update");
                    }
                }
            }
            EngineEvent::OpAccepted { state, op_id } => {
                tracing::debug!(state = %state, op = %op_id, "op accepted");
            }
            EngineEvent::ChangeSet {
                state,
                change_set_id,
                status,
            } => {
                tracing::debug!(
                    state = %state,
                    change_set = %change_set_id,
                    status = status.as_str(),
                    "change set recorded"
                );
            }
            EngineEvent::Conflict {
                state,
                conflict_id,
                status,
            } => {
                tracing::info!(
                    state = %state,
                    conflict = %conflict_id,
                    status = ?status,
                    "conflict"
                );
            }
        }
    }
    if !events.is_empty() {
        app.persister.nudge();
    }
}

async fn get_health() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn get_states(State(app): State<AppState>) -> Json<Value> {
    let engine = app.engine.read().await;
    let states: Vec<Value> = engine
        .states()
        .map(|meta| engine.state_summary(meta))
        .collect();
    Json(json!({"states": states}))
}

async fn post_states(State(app): State<AppState>, Json(body): Json<Value>) -> Response {
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return bad_request("name is required");
    };
    let from_state = body.get("from_state").and_then(Value::as_str);

    let mut engine = app.engine.write().await;
    match engine.create_state(name, from_state) {
        Ok((meta, events)) => {
            let summary = engine.state_summary(&meta);
            fan_out(&app, &engine, &events);
            (
                StatusCode::CREATED,
                Json(json!({"ok": true, "state": summary})),
            )
                .into_response()
        }
        Err(err) => engine_error(err),
    }
}

async fn get_state(State(app): State<AppState>, Path(state): Path<String>) -> Response {
    let engine = app.engine.read().await;
    match engine.state_snapshot(&state) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found(format!("unknown state: {state}")),
    }
}

async fn get_state_conflicts(
    State(app): State<AppState>,
    Path(state): Path<String>,
) -> Json<Value> {
    let engine = app.engine.read().await;
    Json(json!({"conflicts": engine.conflicts_for_state(&state)}))
}

async fn post_promote(
    State(app): State<AppState>,
    Path(source): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let Some(target) = body.get("target_state").and_then(Value::as_str) else {
        return bad_request("target_state is required");
    };
    let author = body
        .get("author")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    let mut engine = app.engine.write().await;
    match engine.promote(&source, target, author) {
        Ok((outcome, events)) => {
            fan_out(&app, &engine, &events);
            Json(outcome).into_response()
        }
        Err(err) => engine_error(err),
    }
}

async fn post_change_sets(State(app): State<AppState>, Json(body): Json<Value>) -> Response {
    let payload = body.get("change_set").cloned().unwrap_or(body);
    let change: ChangeSet = match serde_json::from_value(payload) {
        Ok(change) => change,
        Err(err) => return bad_request(format!("invalid change set: {err}")),
    };

    let mut engine = app.engine.write().await;
    match engine.submit(change) {
        Ok((outcome, events)) => {
            fan_out(&app, &engine, &events);
            Json(outcome).into_response()
        }
        Err(err) => engine_error(err),
    }
}

async fn get_change_sets(
    State(app): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Value> {
    let engine = app.engine.read().await;
    let records = engine.change_sets(query.get("state").map(String::as_str));
    Json(json!({"change_sets": records}))
}

async fn get_change_set(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let engine = app.engine.read().await;
    match engine.change_set(&id) {
        Some(record) => Json(record).into_response(),
        None => not_found(format!("unknown change set: {id}")),
    }
}

async fn post_ops(State(app): State<AppState>, Json(body): Json<Value>) -> Response {
    let payload = if let Some(ops) = body.get("ops") {
        ops.clone()
    } else if let Some(op) = body.get("op") {
        Value::Array(vec![op.clone()])
    } else {
        Value::Array(vec![body])
    };
    let ops: Vec<Operation> = match serde_json::from_value(payload) {
        Ok(ops) => ops,
        Err(err) => return bad_request(format!("invalid op payload: {err}")),
    };

    let mut engine = app.engine.write().await;
    match engine.submit_ops(ops) {
        Ok((outcome, events)) => {
            fan_out(&app, &engine, &events);
            Json(outcome).into_response()
        }
        Err(err) => engine_error(err),
    }
}

async fn get_op(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let engine = app.engine.read().await;
    match engine.op(&id) {
        Some(op) => Json(op).into_response(),
        None => not_found(format!("unknown op: {id}")),
    }
}

async fn get_conflict(State(app): State<AppState>, Path(id): Path<String>) -> Response {
    let engine = app.engine.read().await;
    match engine.conflict(&id) {
        Some(conflict) => Json(conflict).into_response(),
        None => not_found(format!("unknown conflict: {id}")),
    }
}

async fn post_resolve(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let payload = body.get("op").cloned().unwrap_or(body);
    let op: Operation = match serde_json::from_value(payload) {
        Ok(op) => op,
        Err(err) => return bad_request(format!("invalid op: {err}")),
    };

    let mut engine = app.engine.write().await;
    match engine.resolve(&id, op) {
        Ok((outcome, events)) => {
            fan_out(&app, &engine, &events);
            Json(json!({
                "ok": true,
                "conflict": outcome.conflict,
                "submit_result": outcome.submit,
            }))
            .into_response()
        }
        Err(err) => engine_error(err),
    }
}

/// SSE stream of snapshot-valued `state_update` events: initial snapshot on
/// connect, then one event per change, keepalive comments in between.
async fn stream_state(State(app): State<AppState>, Path(state): Path<String>) -> Response {
    let initial = {
        let engine = app.engine.read().await;
        engine.state_snapshot(&state)
    };
    let Some(initial) = initial else {
        return not_found(format!("unknown state: {state}"));
    };

    let updates = BroadcastStream::new(app.hub.subscribe(&state))
        .filter_map(|payload| payload.ok())
        .map(|payload| {
            Ok::<Event, Infallible>(Event::default().event("state_update").data(payload))
        });
    let stream = tokio_stream::once(Ok::<Event, Infallible>(
        Event::default()
            .event("state_update")
            .data(initial.to_string()),
    ))
    .chain(updates);

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEPALIVE).text("keepalive"))
        .into_response()
}
