//! Request identification.
//!
//! # Responsibilities
//! - Reuse an inbound `x-request-id` or generate a UUID v4
//! - Expose it to handlers as a [`RequestId`] extension
//! - Echo it on the response for correlation
//!
//! # Design Decisions
//! - Built on tower-http's request-id layers; the set layer must wrap the
//!   propagate layer so the response sees the id it assigned

use axum::http::HeaderName;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub use tower_http::request_id::RequestId;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Assigns an id to requests that arrive without one.
pub fn set_request_id() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Copies the request's id onto its response.
pub fn propagate_request_id() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// The id as text, if it is printable.
pub fn request_id_str(id: &RequestId) -> Option<&str> {
    id.header_value().to_str().ok()
}
