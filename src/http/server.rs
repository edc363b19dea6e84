//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with one echo handler per configured route
//! - Bind each route's admission layer to its key at mount time
//! - Wire up the shared middleware (request ID, tracing, timeout)
//! - Bind server to listener and stop on shutdown

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::MatchedPath,
    http::{Method, Uri},
    middleware,
    routing::{on, MethodFilter},
    Extension, Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GovernorConfig;
use crate::governance::PolicyError;
use crate::http::admission::{governance_middleware, AdmissionState};
use crate::http::request::{propagate_request_id, request_id_str, set_request_id, RequestId};

/// HTTP server for the governed routes.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GovernorConfig, state: AdmissionState) -> Result<Self, PolicyError> {
        Ok(Self {
            router: build_router(config, state)?,
        })
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` resolves.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &GovernorConfig, state: AdmissionState) -> Result<Router, PolicyError> {
    let mut router = Router::new();
    for route in &config.routes {
        let key = route.key()?;
        let method: Method = key
            .method()
            .parse()
            .map_err(|_| PolicyError::InvalidRouter(key.to_string()))?;
        let filter = MethodFilter::try_from(method)
            .map_err(|_| PolicyError::InvalidRouter(key.to_string()))?;
        let pattern = key.pattern().to_string();
        let governed = middleware::from_fn_with_state(state.for_route(key), governance_middleware);
        router = router.route(&pattern, on(filter, echo_handler).route_layer(governed));
    }

    Ok(router.layer(
        ServiceBuilder::new()
            .layer(set_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(propagate_request_id())
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
    ))
}

#[derive(Debug, Serialize)]
pub struct Echo {
    pub method: String,
    pub route: String,
    pub uri: String,
    pub request_id: Option<String>,
}

async fn echo_handler(
    method: Method,
    matched: MatchedPath,
    uri: Uri,
    request_id: Option<Extension<RequestId>>,
) -> Json<Echo> {
    Json(Echo {
        method: method.to_string(),
        route: matched.as_str().to_string(),
        uri: uri.to_string(),
        request_id: request_id
            .as_ref()
            .and_then(|Extension(id)| request_id_str(id))
            .map(str::to_owned),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use crate::config::RouteConfig;
    use crate::governance::GovernanceController;

    #[tokio::test]
    async fn test_empty_route_table_builds() {
        let mut config = GovernorConfig::default();
        config.routes.clear();
        let controller = Arc::new(GovernanceController::new(Vec::new(), vec!["k".into()]));

        let router = build_router(&config, AdmissionState::new(controller)).unwrap();
        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_methods_share_a_pattern() {
        let mut config = GovernorConfig::default();
        config.routes = vec![
            RouteConfig::new("GET", "/users/{id}"),
            RouteConfig::new("delete", "/users/{id}"),
        ];
        let controller = Arc::new(GovernanceController::new(
            config.route_keys().unwrap(),
            vec!["k".into()],
        ));
        let router = build_router(&config, AdmissionState::new(controller.clone())).unwrap();

        for method in [Method::GET, Method::DELETE] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri("/users/5")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(controller.concurrency.stats()["DELETE /users/{id}"], 0);
    }
}
