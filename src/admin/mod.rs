//! Operator API.
//!
//! # Data Flow
//! ```text
//! governor-cli / curl
//!     → auth.rs (bearer token)
//!     → handlers.rs (read-only snapshots, manual refresh)
//!     → PolicyRefresher / GovernanceController / AlarmCenter
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::governance::{AlarmCenter, PolicyRefresher};

use self::auth::admin_auth_middleware;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub refresher: Arc<PolicyRefresher>,
    pub alarms: Arc<AlarmCenter>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/concurrency", get(get_concurrency))
        .route("/admin/blocked-ips", get(get_blocked_ips))
        .route("/admin/mocks", get(get_mocks))
        .route("/admin/interceptors", get(get_interceptors))
        .route("/admin/request-limits", get(get_request_limits))
        .route("/admin/alarms", get(get_alarms))
        .route("/admin/refresh", post(post_refresh))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
