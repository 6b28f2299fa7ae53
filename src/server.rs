//! ==============================================================================
//! server.rs - http transport over the storage core
//! ==============================================================================
//!
//! purpose:
//!     maps requests onto store operations. every store call runs on the
//!     blocking pool, since settings and fallback reads touch the disk.
//!
//! routes:
//!
//!     GET    /                          html list of sensors
//!     GET    /sensor/:id                latest payload, 404 if unknown
//!     GET    /saveSensorInformation     ?sensor|id=&temp=&hum=&batt=
//!     GET    /sensors, /allSensors      { id: payload, ... }
//!     GET    /settings                  settings document verbatim
//!     GET    /settings/:room            one room, 404 if unknown
//!     DELETE /settings/:room
//!     POST   /settings/:room/desired    ?value=
//!     POST   /settings/:room/trigger    ?type=high|low&url=
//!     GET    /triggers                  fired callbacks, oldest first
//!     DELETE /triggers
//!     POST   /triggerAllHigh, /triggerAllLow
//!     POST   /flush
//!
//!     any other path is a 404. requests are traced at debug level.
//!
//! ==============================================================================

use crate::callback::CallbackClient;
use crate::domain::{timestamp_now, TriggerKind};
use crate::error::StoreError;
use crate::flusher::Flusher;
use crate::storage::Storage;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// ==============================================================================
// shared state
// ==============================================================================

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub flusher: Arc<Flusher>,
    pub callbacks: CallbackClient,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/sensor/:id", get(sensor_handler))
        .route("/saveSensorInformation", get(save_handler))
        .route("/sensors", get(all_sensors_handler))
        .route("/allSensors", get(all_sensors_handler))
        .route("/settings", get(all_settings_handler))
        .route("/settings/:room", get(room_handler).delete(delete_room_handler))
        .route("/settings/:room/desired", post(desired_handler))
        .route("/settings/:room/trigger", post(trigger_url_handler))
        .route("/triggers", get(triggers_handler).delete(clear_triggers_handler))
        .route("/triggerAllHigh", post(fire_high_handler))
        .route("/triggerAllLow", post(fire_low_handler))
        .route("/flush", post(flush_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// serve until `shutdown` resolves
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ==============================================================================
// errors
// ==============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{e:#}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::Internal(message) => {
                tracing::warn!("[HTTP] internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}

/// run a store operation on the blocking pool
async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&Storage) -> T + Send + 'static,
    T: Send + 'static,
{
    let storage = Arc::clone(&state.storage);
    tokio::task::spawn_blocking(move || op(&storage))
        .await
        .map_err(|e| ApiError::Internal(format!("store task failed: {e}")))
}

fn json_text(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

// ==============================================================================
// readings
// ==============================================================================

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let sensors = blocking(&state, |s| s.readings().list_all()).await?;

    let mut html = String::from("<html><body><h1>Sensors</h1><ul>");
    for (id, payload) in &sensors {
        let id = html_escape(id);
        html.push_str(&format!(
            "<li><a href=\"/sensor/{id}\">{id}</a><pre>{}</pre></li>",
            html_escape(payload)
        ));
    }
    html.push_str("</ul></body></html>");
    Ok(Html(html))
}

async fn sensor_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    match blocking(&state, move |s| s.readings().get(&id)).await? {
        Some(payload) => Ok(json_text(payload)),
        None => Err(ApiError::NotFound),
    }
}

async fn save_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<String, ApiError> {
    let sensor = params
        .get("sensor")
        .or_else(|| params.get("id"))
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());
    let payload = build_reading_payload(&sensor, &params)?;

    let key = blocking(&state, move |s| s.readings().put(&sensor, payload)).await?;
    Ok(format!("Stored sensor data for: {key}"))
}

/// json payload stored for a reported reading; empty fields are omitted
#[derive(Serialize)]
struct ReadingPayload<'a> {
    timestamp: String,
    sensor: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temp: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hum: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batt: Option<&'a str>,
}

pub fn build_reading_payload(
    sensor: &str,
    params: &HashMap<String, String>,
) -> Result<String, ApiError> {
    let field = |name: &str| params.get(name).map(String::as_str).filter(|v| !v.is_empty());
    let payload = ReadingPayload {
        timestamp: timestamp_now(),
        sensor,
        temp: field("temp"),
        hum: field("hum"),
        batt: field("batt"),
    };
    serde_json::to_string(&payload).map_err(|e| ApiError::Internal(e.to_string()))
}

async fn all_sensors_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = blocking(&state, |s| s.readings().list_all_json()).await??;
    Ok(json_text(body))
}

// ==============================================================================
// settings
// ==============================================================================

async fn all_settings_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = blocking(&state, |s| s.settings().get_all()).await?;
    Ok(json_text(body))
}

#[derive(Serialize)]
struct RoomView {
    room: String,
    desired: Option<f64>,
    high: String,
    low: String,
}

async fn room_handler(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<RoomView>, ApiError> {
    let settings = blocking(&state, move |s| s.settings().get(&room))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(RoomView {
        room: settings.room,
        desired: settings.desired,
        high: settings.high_url,
        low: settings.low_url,
    }))
}

async fn delete_room_handler(
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<StatusCode, ApiError> {
    blocking(&state, move |s| s.settings().delete(&room)).await??;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct DesiredParams {
    value: String,
}

async fn desired_handler(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(params): Query<DesiredParams>,
) -> Result<StatusCode, ApiError> {
    let value: f64 = params
        .value
        .trim()
        .parse()
        .ok()
        .filter(|v: &f64| v.is_finite())
        .ok_or_else(|| ApiError::BadRequest(format!("invalid desired value: {}", params.value)))?;

    blocking(&state, move |s| s.settings().set_desired(&room, value)).await??;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct TriggerUrlParams {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
}

async fn trigger_url_handler(
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(params): Query<TriggerUrlParams>,
) -> Result<StatusCode, ApiError> {
    let kind: TriggerKind = params.kind.parse().map_err(ApiError::BadRequest)?;
    let url = params.url;

    blocking(&state, move |s| s.settings().set_trigger(&room, kind, &url)).await??;
    Ok(StatusCode::NO_CONTENT)
}

// ==============================================================================
// triggers
// ==============================================================================

async fn triggers_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let events = blocking(&state, |s| s.triggers().list_all()).await?;
    Ok(Json(events).into_response())
}

async fn clear_triggers_handler(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    blocking(&state, |s| s.triggers().clear()).await??;
    Ok(StatusCode::NO_CONTENT)
}

async fn fire_high_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let outcomes = state.callbacks.fire_all(TriggerKind::High).await?;
    Ok(Json(outcomes).into_response())
}

async fn fire_low_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let outcomes = state.callbacks.fire_all(TriggerKind::Low).await?;
    Ok(Json(outcomes).into_response())
}

async fn flush_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let report = state.flusher.flush_now().await?;
    Ok(Json(serde_json::json!({
        "sensors": report.sensors,
        "events": report.events,
    }))
    .into_response())
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
