//! HTTP adapter for the engine entry points.
//!
//! The core is framework-agnostic; this module adapts it to JSON routes
//! for the surrounding platform (camera pipeline, med intake form, habit
//! emitters, and the delivery service's fired-reminder callback).
//!
//! # Routes
//!
//! ```text
//! GET  /health                          liveness + version
//! POST /ingest/cam                      posture report
//! POST /ingest/habit                    habit event
//! POST /sedentary                       open a session explicitly
//! POST /meds/upload                     store med + schedule doses
//! POST /meds/confirm                    adherence confirmation
//! GET  /habits/{user_id}/{event_type}   profile snapshot
//! POST /reminders/callback              delivery-service fired callback
//! GET  /users/{user_id}/settings        opt-out switches
//! POST /users/{user_id}/settings
//! GET  /stats                           engine counters
//! ```

use crate::engine::{Orchestrator, UserSettings, UserSettingsUpdate};
use crate::error::EngineError;
use crate::events::{CamReport, HabitEvent, Posture};
use crate::reminders::HttpDeliveryClient;
use crate::stats::StatsSnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

/// Shared engine handle for the routes.
pub type SharedEngine = Arc<Orchestrator<HttpDeliveryClient>>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn to_api_error(err: EngineError) -> ApiError {
    let (status, code) = match &err {
        EngineError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        EngineError::ScheduleParse(_) => (StatusCode::BAD_REQUEST, "SCHEDULE_PARSE"),
        EngineError::DownstreamUnavailable(_) => (StatusCode::BAD_GATEWAY, "DOWNSTREAM"),
        EngineError::Storage(_) | EngineError::JsonError(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            code: code.to_string(),
        }),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Posture report body. The envelope is validated here: a missing
/// user_id or timestamp is rejected before the engine sees the event.
#[derive(Debug, Deserialize)]
pub struct CamReportDto {
    pub user_id: Option<String>,
    pub face_id: Option<String>,
    pub posture: Posture,
    pub timestamp: Option<DateTime<Utc>>,
    pub location_hash: Option<String>,
    pub image_id: Option<String>,
}

/// POST /ingest/cam
async fn ingest_cam(
    State(engine): State<SharedEngine>,
    Json(dto): Json<CamReportDto>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = dto
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| to_api_error(EngineError::Validation("missing user_id".to_string())))?;
    let timestamp = dto
        .timestamp
        .ok_or_else(|| to_api_error(EngineError::Validation("missing timestamp".to_string())))?;

    let report = CamReport {
        user_id,
        face_id: dto.face_id,
        posture: dto.posture,
        timestamp,
        location_hash: dto.location_hash,
        image_id: dto.image_id,
    };

    let outcome = engine.ingest_cam_report(report).await.map_err(to_api_error)?;
    Ok(Json(serde_json::json!({ "status": "ok", "result": outcome })))
}

/// Habit event body.
#[derive(Debug, Deserialize)]
pub struct HabitEventDto {
    pub user_id: Option<String>,
    pub event_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// POST /ingest/habit
async fn ingest_habit(
    State(engine): State<SharedEngine>,
    Json(dto): Json<HabitEventDto>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = dto
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| to_api_error(EngineError::Validation("missing user_id".to_string())))?;
    let event_type = dto
        .event_type
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| to_api_error(EngineError::Validation("missing event_type".to_string())))?;
    let timestamp = dto
        .timestamp
        .ok_or_else(|| to_api_error(EngineError::Validation("missing timestamp".to_string())))?;

    let outcome = engine
        .ingest_habit_event(HabitEvent::new(user_id, event_type, timestamp))
        .map_err(to_api_error)?;
    Ok(Json(serde_json::json!({ "status": "ok", "result": outcome })))
}

#[derive(Debug, Deserialize)]
pub struct SedentaryCreateDto {
    pub user_id: String,
}

/// POST /sedentary
async fn create_sedentary(
    State(engine): State<SharedEngine>,
    Json(dto): Json<SedentaryCreateDto>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = engine
        .create_sedentary_session(&dto.user_id)
        .await
        .map_err(to_api_error)?;
    Ok(Json(serde_json::json!({ "status": "ok", "result": outcome })))
}

#[derive(Debug, Deserialize)]
pub struct MedUploadDto {
    pub user_id: String,
    pub med_name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub schedule_text: String,
}

/// POST /meds/upload
///
/// Unparseable schedule text is not a failure: the med record is stored
/// and the response carries a warning with zero scheduled reminders.
async fn meds_upload(
    State(engine): State<SharedEngine>,
    Json(dto): Json<MedUploadDto>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let upload = engine
        .upload_medication(&dto.user_id, &dto.med_name, &dto.dosage, &dto.schedule_text)
        .await
        .map_err(to_api_error)?;
    Ok(Json(serde_json::json!({
        "status": if upload.parse_warning.is_some() { "warning" } else { "ok" },
        "result": upload,
    })))
}

#[derive(Debug, Deserialize)]
pub struct MedConfirmDto {
    pub user_id: String,
    pub med_id: Uuid,
    pub taken: bool,
}

/// POST /meds/confirm
async fn meds_confirm(
    State(engine): State<SharedEngine>,
    Json(dto): Json<MedConfirmDto>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = engine
        .confirm_medication(&dto.user_id, dto.med_id, dto.taken)
        .await
        .map_err(to_api_error)?;
    Ok(Json(serde_json::json!({ "status": "ok", "result": record })))
}

/// GET /habits/{user_id}/{event_type}
async fn get_habit_profile(
    State(engine): State<SharedEngine>,
    Path((user_id, event_type)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = engine
        .get_habit_profile(&user_id, &event_type)
        .map_err(to_api_error)?;
    Ok(Json(serde_json::json!({ "status": "ok", "result": profile })))
}

#[derive(Debug, Deserialize)]
pub struct ReminderCallbackDto {
    pub reminder_id: String,
}

/// POST /reminders/callback
///
/// The delivery collaborator reports a reminder it fired; the engine
/// settles the timer and updates the owning record. An unknown id is not
/// an error — the timer may have been replaced or already settled.
async fn reminder_callback(
    State(engine): State<SharedEngine>,
    Json(dto): Json<ReminderCallbackDto>,
) -> Json<serde_json::Value> {
    match engine.reminder_delivered(&dto.reminder_id) {
        Some(fired) => Json(serde_json::json!({ "status": "ok", "key": fired.key.wire_key() })),
        None => Json(serde_json::json!({ "status": "unknown_reminder" })),
    }
}

/// GET /users/{user_id}/settings
async fn get_settings(
    State(engine): State<SharedEngine>,
    Path(user_id): Path<String>,
) -> Json<UserSettings> {
    Json(engine.user_settings(&user_id))
}

/// POST /users/{user_id}/settings
async fn set_settings(
    State(engine): State<SharedEngine>,
    Path(user_id): Path<String>,
    Json(update): Json<UserSettingsUpdate>,
) -> Json<UserSettings> {
    Json(engine.set_user_settings(&user_id, update))
}

/// GET /stats
async fn stats(State(engine): State<SharedEngine>) -> Json<StatsSnapshot> {
    Json(engine.stats().snapshot())
}

/// Build the router over a shared engine.
pub fn router(engine: SharedEngine) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest/cam", post(ingest_cam))
        .route("/ingest/habit", post(ingest_habit))
        .route("/sedentary", post(create_sedentary))
        .route("/meds/upload", post(meds_upload))
        .route("/meds/confirm", post(meds_confirm))
        .route("/habits/:user_id/:event_type", get(get_habit_profile))
        .route("/reminders/callback", post(reminder_callback))
        .route(
            "/users/:user_id/settings",
            get(get_settings).post(set_settings),
        )
        .route("/stats", get(stats))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(engine)
}

/// Run the HTTP server.
///
/// Binds on 127.0.0.1 (port 0 picks a free one), serves until the
/// returned sender fires, and reports the bound address.
pub async fn run(
    engine: SharedEngine,
    port: u16,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(engine);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("caremind server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("server shutdown signal received");
            })
            .await
        {
            tracing::error!("server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
