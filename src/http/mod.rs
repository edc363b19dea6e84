//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (assign request ID)
//!     → server.rs (Axum setup, tracing, timeout)
//!     → admission.rs (per-route: block list, mock, concurrency, interceptors)
//!     → route handler
//!     → Send to client
//! ```

pub mod admission;
pub mod request;
pub mod server;

pub use admission::{
    client_ip, governance_middleware, AdmissionState, PassthroughRunner, Rejection, RouteAdmission,
    ScriptError, ScriptRunner,
};
pub use request::{propagate_request_id, request_id_str, set_request_id, RequestId, X_REQUEST_ID};
pub use server::{build_router, HttpServer};
