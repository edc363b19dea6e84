use std::collections::HashMap;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admin::AdminState;
use crate::governance::concurrency::GateSnapshot;
use crate::governance::{
    AlarmEvent, InterceptorEntry, MockEntry, RefreshError, RefreshReport, RequestLimitStatus,
};

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub refreshing: bool,
    pub refresh_interval_secs: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub mock_time: Option<DateTime<Utc>>,
    pub signing_keys: usize,
    pub last_report: Option<RefreshReport>,
}

#[derive(Serialize)]
pub struct ConcurrencyView {
    /// Route key → in-flight count.
    pub stats: HashMap<String, u32>,
    pub gates: Vec<GateSnapshot>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let refresher = &state.refresher;
    let controller = refresher.controller();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        refreshing: refresher.is_running(),
        refresh_interval_secs: refresher.interval().as_secs(),
        refreshed_at: controller.refreshed_at(),
        mock_time: controller.clock.mocked(),
        signing_keys: controller.signing_keys.keys().len(),
        last_report: refresher.last_report().map(|r| (*r).clone()),
    })
}

pub async fn get_concurrency(State(state): State<AdminState>) -> Json<ConcurrencyView> {
    let registry = &state.refresher.controller().concurrency;
    Json(ConcurrencyView {
        stats: registry.stats(),
        gates: registry.snapshot(),
    })
}

pub async fn get_blocked_ips(State(state): State<AdminState>) -> Json<Vec<String>> {
    Json(state.refresher.controller().blocked_ips.entries())
}

pub async fn get_mocks(State(state): State<AdminState>) -> Json<Vec<MockEntry>> {
    Json(state.refresher.controller().mocks.list())
}

pub async fn get_interceptors(
    State(state): State<AdminState>,
) -> Json<HashMap<String, InterceptorEntry>> {
    Json(state.refresher.controller().interceptors.list())
}

pub async fn get_request_limits(State(state): State<AdminState>) -> Json<Vec<RequestLimitStatus>> {
    Json(state.refresher.controller().request_limits.status())
}

pub async fn get_alarms(State(state): State<AdminState>) -> Json<Vec<AlarmEvent>> {
    Json(state.alarms.recent())
}

pub async fn post_refresh(State(state): State<AdminState>) -> Response {
    match state.refresher.refresh().await {
        Ok(report) => Json(report).into_response(),
        Err(e @ RefreshError::InProgress) => error_response(StatusCode::CONFLICT, &e),
        Err(e @ RefreshError::Store(_)) => error_response(StatusCode::SERVICE_UNAVAILABLE, &e),
    }
}

fn error_response(status: StatusCode, error: &RefreshError) -> Response {
    (status, Json(serde_json::json!({ "error": error.to_string() }))).into_response()
}
