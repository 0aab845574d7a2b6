use std::{path::Path, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use lamp_common::{
    ControllerStatus, LampStatePayload, NextEventsPayload, TimerSchedule, TimerTimesPayload,
};
use serde::Serialize;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::{clock::Clock, relay::RelayController, timer::Timer};

#[derive(Clone)]
pub struct ApiState {
    pub relay: Arc<RelayController>,
    pub timer: Arc<Timer>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn router(state: ApiState, web_root: impl AsRef<Path>) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route(
            "/api/lamp/state",
            get(handle_get_lamp_state).post(handle_post_lamp_state),
        )
        .route("/api/lamp/toggle", post(handle_toggle_lamp))
        .route("/api/timer", get(handle_get_timer).put(handle_put_timer))
        .route("/api/timer/next", get(handle_get_timer_next))
        .fallback_service(ServeDir::new(web_root.as_ref()))
        .with_state(state)
}

async fn handle_get_status(State(state): State<ApiState>) -> impl IntoResponse {
    let on = state.relay.is_on().await;
    let schedule = state.timer.get_times().await;
    let next = state.timer.next_events().await;

    Json(ControllerStatus {
        on,
        turn_on: schedule.turn_on_times,
        turn_off: schedule.turn_off_times,
        next_on: next.turn_on.map(|at| at.timestamp()),
        next_off: next.turn_off.map(|at| at.timestamp()),
        timezone: state.timer.timezone().name().to_string(),
        now_epoch: state.clock.now().timestamp(),
    })
}

async fn handle_get_lamp_state(State(state): State<ApiState>) -> impl IntoResponse {
    Json(LampStatePayload {
        value: state.relay.is_on().await,
    })
}

async fn handle_post_lamp_state(
    State(state): State<ApiState>,
    payload: Result<Json<LampStatePayload>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };

    let value = state.relay.set_on(request.value).await;
    info!(requested = request.value, on = value, "lamp state set over http");
    Json(LampStatePayload { value }).into_response()
}

async fn handle_toggle_lamp(State(state): State<ApiState>) -> impl IntoResponse {
    let value = state.relay.toggle().await;
    info!(on = value, "lamp toggled over http");
    Json(LampStatePayload { value })
}

async fn handle_get_timer(State(state): State<ApiState>) -> impl IntoResponse {
    Json(TimerTimesPayload::from(state.timer.get_times().await))
}

async fn handle_put_timer(
    State(state): State<ApiState>,
    payload: Result<Json<TimerTimesPayload>, JsonRejection>,
) -> impl IntoResponse {
    let Json(times) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, &rejection.body_text()),
    };

    let schedule = TimerSchedule::from(times);
    let invalid = schedule
        .turn_on_times
        .iter()
        .chain(&schedule.turn_off_times)
        .filter(|entry| entry.parse::<lamp_common::ClockTime>().is_err())
        .count();
    if invalid > 0 {
        warn!(invalid, "timer update contains entries that will be skipped");
    }

    state.timer.set_times(schedule).await;
    handle_get_timer(State(state)).await.into_response()
}

async fn handle_get_timer_next(State(state): State<ApiState>) -> impl IntoResponse {
    let next = state.timer.next_events().await;
    Json(NextEventsPayload {
        next_on: next.turn_on.map(|at| at.timestamp()),
        next_off: next.turn_off.map(|at| at.timestamp()),
        timezone: state.timer.timezone().name().to_string(),
    })
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
