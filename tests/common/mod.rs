//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{request, response, Method, Request};
use axum::Router;
use chrono::Utc;

use route_governor::config::{GovernorConfig, RouteConfig};
use route_governor::governance::{Alarm, AlarmEvent, GovernanceController, PolicyRefresher};
use route_governor::http::{build_router, AdmissionState, ScriptError, ScriptRunner};
use route_governor::store::{Category, ConfigurationRecord, MemoryStore, Status};

/// An enabled row valid for the next hour, updated `age_secs` ago.
pub fn row(name: &str, category: Category, data: &str, age_secs: i64) -> ConfigurationRecord {
    let now = Utc::now();
    ConfigurationRecord {
        name: name.to_string(),
        category,
        status: Status::Enabled,
        data: data.to_string(),
        started_at: now - chrono::Duration::hours(1),
        ended_at: now + chrono::Duration::hours(1),
        updated_at: now - chrono::Duration::seconds(age_secs),
    }
}

pub fn config_with_routes(routes: &[(&str, &str)]) -> GovernorConfig {
    let mut config = GovernorConfig::default();
    config.routes = routes.iter().map(|(m, p)| RouteConfig::new(m, p)).collect();
    config
}

pub fn controller_for(config: &GovernorConfig) -> Arc<GovernanceController> {
    Arc::new(GovernanceController::new(
        config.route_keys().unwrap(),
        config.signing.default_keys.clone(),
    ))
}

/// Collects alarms instead of logging them.
#[derive(Default)]
pub struct RecordingAlarm {
    pub events: Mutex<Vec<AlarmEvent>>,
}

impl RecordingAlarm {
    pub fn events(&self) -> Vec<AlarmEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Alarm for RecordingAlarm {
    fn raise(&self, event: AlarmEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Records every script it is asked to run and tags the messages it sees.
#[derive(Default)]
pub struct RecordingRunner {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScriptRunner for RecordingRunner {
    async fn before(&self, script: &str, parts: &mut request::Parts) -> Result<(), ScriptError> {
        self.calls.lock().unwrap().push(format!("before:{script}"));
        parts.headers.insert("x-intercepted", "yes".parse().unwrap());
        Ok(())
    }

    async fn after(&self, script: &str, parts: &mut response::Parts) -> Result<(), ScriptError> {
        self.calls.lock().unwrap().push(format!("after:{script}"));
        if script == "fail" {
            return Err(ScriptError("boom".into()));
        }
        parts.headers.insert("x-after", script.parse().unwrap());
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub alarm: Arc<RecordingAlarm>,
    pub refresher: Arc<PolicyRefresher>,
    pub app: Router,
}

impl Harness {
    pub fn controller(&self) -> &Arc<GovernanceController> {
        self.refresher.controller()
    }
}

/// App plus in-memory store for the given routes.
pub fn harness(routes: &[(&str, &str)], runner: Arc<dyn ScriptRunner>) -> Harness {
    let config = config_with_routes(routes);
    let controller = controller_for(&config);
    let store = Arc::new(MemoryStore::new());
    let alarm = Arc::new(RecordingAlarm::default());
    let refresher = Arc::new(PolicyRefresher::new(
        store.clone(),
        controller.clone(),
        alarm.clone(),
        Duration::from_secs(60),
    ));
    let state = AdmissionState::new(controller).with_runner(runner);
    let app = build_router(&config, state).unwrap();
    Harness {
        store,
        alarm,
        refresher,
        app,
    }
}

/// A request as seen from `peer`.
pub fn request_from(method: Method, uri: &str, peer: [u8; 4]) -> Request<Body> {
    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
    request
}

pub async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
