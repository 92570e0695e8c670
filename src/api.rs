use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::detector;
use crate::orchestrator::{RunSummary, StartError};
use crate::run_state::RunPhase;
use crate::settings::{RunConfig, Settings};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start_run))
        .route("/stop", post(stop_run))
        .route("/status", get(get_status))
        .route("/templates/reload", post(reload_templates))
        .route("/settings/reload", post(reload_settings))
        .route("/identify", get(identify))
        .with_state(state)
}

fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), StatusCode> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if let Some(token) = auth.strip_prefix("Bearer ")
        && token == expected_token
    {
        return Ok(());
    }

    Err(StatusCode::UNAUTHORIZED)
}

/// Starts a run. An empty body runs the manual defaults; a JSON body
/// overrides the feature set for this run only.
async fn start_run(
    State(app): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    let mut state = app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    let config = if body.is_empty() {
        RunConfig::manual()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!("rejected run config: {e}");
            StatusCode::BAD_REQUEST
        })?
    };

    state.reap().await;
    match state.start(config) {
        Ok(()) => Ok(Json(json!({"status": "started", "config": config}))),
        Err(StartError::AlreadyRunning) => Err(StatusCode::CONFLICT),
        Err(StartError::NoValidTargets) => Err(StatusCode::PRECONDITION_FAILED),
    }
}

async fn stop_run(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let state = app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    if !state.run.request_cancel() {
        return Err(StatusCode::CONFLICT);
    }

    tracing::info!("stop requested");
    Ok(Json(json!({"status": "stopping"})))
}

#[derive(Serialize)]
struct StatusResponse {
    phase: RunPhase,
    timer_enabled: bool,
    windows: Vec<WindowStatus>,
    scheduled: Vec<String>,
    templates: TemplateCounts,
    last_run: Option<RunSummary>,
}

#[derive(Serialize)]
struct WindowStatus {
    title: String,
    valid: bool,
}

#[derive(Serialize)]
struct TemplateCounts {
    positions: usize,
    ready: usize,
    roster: usize,
}

async fn get_status(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let mut state = app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    let last_run = state.reap().await;
    let templates = state.templates.snapshot();

    Ok(Json(StatusResponse {
        phase: state.run.phase(),
        timer_enabled: state.settings.timer_enabled,
        windows: state
            .targets
            .iter()
            .map(|t| WindowStatus {
                title: t.title.clone(),
                valid: t.is_valid(),
            })
            .collect(),
        scheduled: state
            .settings
            .scheduled_tasks
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.key())
            .collect(),
        templates: TemplateCounts {
            positions: templates.position_count(),
            ready: templates.notice_count(),
            roster: templates.roster_count(),
        },
        last_run,
    }))
}

async fn reload_templates(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let library = {
        let state = app.lock().await;
        check_auth(&headers, &state.config.auth_token)?;
        state.templates.clone()
    };

    let templates = tokio::task::spawn_blocking(move || library.reload())
        .await
        .map_err(|e| {
            tracing::error!("template reload task failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            tracing::error!("template reload failed, keeping previous set: {e:#}");
            StatusCode::UNPROCESSABLE_ENTITY
        })?;

    Ok(Json(json!({
        "status": "reloaded",
        "positions": templates.position_count(),
        "ready": templates.notice_count(),
        "roster": templates.roster_count(),
    })))
}

async fn reload_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    let mut state = app.lock().await;
    check_auth(&headers, &state.config.auth_token)?;

    let settings = Settings::load(&state.config.settings_path).map_err(|e| {
        tracing::error!("{e}");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;
    settings.log_summary();

    state.apply_settings(settings);

    Ok(Json(json!({
        "status": "reloaded",
        "windows": state.targets.len(),
        "valid": state.valid_target_count(),
    })))
}

#[derive(Deserialize)]
struct IdentifyParams {
    window: usize,
    label: String,
}

#[derive(Serialize)]
struct IdentifyResponse {
    window: String,
    label: String,
    matched: bool,
}

/// One-off screen check against the live template set.
async fn identify(
    State(app): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<IdentifyParams>,
) -> Result<impl IntoResponse, StatusCode> {
    let (target, templates) = {
        let state = app.lock().await;
        check_auth(&headers, &state.config.auth_token)?;
        let target = state.targets.get(params.window).cloned().ok_or(StatusCode::NOT_FOUND)?;
        (target, state.templates.snapshot())
    };

    let window = target.title.clone();
    let label = params.label;
    let lookup = label.clone();
    let matched = tokio::task::spawn_blocking(move || -> anyhow::Result<bool> {
        let frame = target.capture()?;
        Ok(detector::identify_position(&frame, &lookup, &templates).is_some())
    })
    .await
    .map_err(|e| {
        tracing::error!("identify task failed: {e}");
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        tracing::warn!("[{window}] capture failed: {e:#}");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(IdentifyResponse { window, label, matched }))
}
