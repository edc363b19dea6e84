//! Per-request governance.
//!
//! # Responsibilities
//! - Refuse blocked client addresses (403)
//! - Short-circuit mocked routes with their canned response
//! - Count the request against its route's concurrency gate (429 over the
//!   ceiling, otherwise wait for a rate-limiter token)
//! - Run interceptor scripts around the handler
//!
//! # Design Decisions
//! - Installed per route when the router is built; the [`RouteKey`] is
//!   built once at mount and carried in the layer state, so a request never
//!   formats or allocates its key
//! - The concurrency slot lives in an RAII guard held across the handler;
//!   it is released on every exit path, including cancellation
//! - Script failures are logged and never fail the request

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, request, response, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::governance::{GovernanceController, MockEntry, RouteKey};
use crate::observability::metrics;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Why a request was refused before reaching its handler.
#[derive(Debug, Error)]
pub enum Rejection {
    #[error("client address {0} is blocked")]
    BlockedIp(IpAddr),

    #[error("route {route} is over its concurrency limit ({current} > {ceiling})")]
    OverLimit {
        route: String,
        current: u32,
        ceiling: u32,
    },
}

impl Rejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::BlockedIp(_) => "blocked_ip",
            Rejection::OverLimit { .. } => "over_limit",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::BlockedIp(_) => StatusCode::FORBIDDEN,
            Rejection::OverLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Debug, Error)]
#[error("interceptor script failed: {0}")]
pub struct ScriptError(pub String);

/// Executes interceptor scripts. The governor only stores script text; the
/// embedding application decides what a script means.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn before(&self, script: &str, parts: &mut request::Parts) -> Result<(), ScriptError>;

    async fn after(&self, script: &str, parts: &mut response::Parts) -> Result<(), ScriptError>;
}

/// Runs nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughRunner;

#[async_trait]
impl ScriptRunner for PassthroughRunner {
    async fn before(&self, script: &str, _parts: &mut request::Parts) -> Result<(), ScriptError> {
        tracing::trace!(len = script.len(), "Skipping before-script");
        Ok(())
    }

    async fn after(&self, script: &str, _parts: &mut response::Parts) -> Result<(), ScriptError> {
        tracing::trace!(len = script.len(), "Skipping after-script");
        Ok(())
    }
}

/// State for [`governance_middleware`].
#[derive(Clone)]
pub struct AdmissionState {
    pub controller: Arc<GovernanceController>,
    pub runner: Arc<dyn ScriptRunner>,
    pub trust_forwarded_for: bool,
}

impl AdmissionState {
    pub fn new(controller: Arc<GovernanceController>) -> Self {
        Self {
            controller,
            runner: Arc::new(PassthroughRunner),
            trust_forwarded_for: false,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    /// Bind the shared state to one mounted route.
    pub fn for_route(&self, route: RouteKey) -> RouteAdmission {
        RouteAdmission {
            route: Arc::new(route),
            shared: self.clone(),
        }
    }
}

/// Layer state for one mounted route.
#[derive(Clone)]
pub struct RouteAdmission {
    pub route: Arc<RouteKey>,
    pub shared: AdmissionState,
}

/// Client address: the first `X-Forwarded-For` hop when trusted, else the
/// socket peer.
pub fn client_ip<B>(request: &Request<B>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        let forwarded = request
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

pub async fn governance_middleware(
    State(RouteAdmission { route, shared: state }): State<RouteAdmission>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let controller = &state.controller;
    let key = route.as_str();

    if let Some(ip) = client_ip(&request, state.trust_forwarded_for) {
        if controller.blocked_ips.contains_addr(ip) {
            tracing::warn!(client = %ip, route = %route, "Blocked client address");
            metrics::record_rejection("blocked_ip", key);
            return Rejection::BlockedIp(ip).into_response();
        }
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| request.uri().path());
    if let Some(mock) = controller.mocks.lookup_key(key, path_and_query) {
        tracing::debug!(
            route = %route,
            status = mock.status,
            delay_secs = mock.delay_seconds,
            "Serving mocked response"
        );
        if mock.delay_seconds > 0 {
            tokio::time::sleep(mock.delay()).await;
        }
        metrics::record_mock_response(key);
        return mock_response(&mock);
    }

    let admission = controller.concurrency.admit(key).await;
    if admission.is_over_limit() {
        tracing::warn!(
            route = %route,
            current = admission.current,
            ceiling = admission.ceiling,
            "Concurrency ceiling exceeded"
        );
        metrics::record_rejection("over_limit", key);
        return Rejection::OverLimit {
            route: key.to_string(),
            current: admission.current,
            ceiling: admission.ceiling,
        }
        .into_response();
    }

    let interceptor = controller.interceptors.get_key(key);

    let request = match interceptor.as_deref() {
        Some(entry) if !entry.before.trim().is_empty() => {
            let (mut parts, body) = request.into_parts();
            if let Err(e) = state.runner.before(&entry.before, &mut parts).await {
                tracing::warn!(route = %route, error = %e, "Before-script failed, continuing");
            }
            Request::from_parts(parts, body)
        }
        _ => request,
    };

    let response = next.run(request).await;

    let response = match interceptor.as_deref() {
        Some(entry) if !entry.after.trim().is_empty() => {
            let (mut parts, body) = response.into_parts();
            if let Err(e) = state.runner.after(&entry.after, &mut parts).await {
                tracing::warn!(route = %route, error = %e, "After-script failed, continuing");
            }
            Response::from_parts(parts, body)
        }
        _ => response,
    };

    drop(admission);
    response
}

fn mock_response(mock: &MockEntry) -> Response {
    let mut response = Response::new(Body::from(mock.response.clone()));
    *response.status_mut() = StatusCode::from_u16(mock.status).unwrap_or(StatusCode::OK);
    match HeaderValue::from_str(&mock.content_type) {
        Ok(value) => {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        Err(_) => {
            tracing::warn!(
                route = %mock.route,
                content_type = %mock.content_type,
                "Invalid mock content type"
            );
        }
    }
    response
}
