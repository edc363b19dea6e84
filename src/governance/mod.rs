//! Request-governance control plane.
//!
//! # Data Flow
//! ```text
//! PolicyStore (active rows, newest first)
//!     → refresher.rs (partition by category, parse per row)
//!     → registries (publish new snapshots / update gates in place)
//!
//! Per request (http::admission):
//!     → IpBlockSet::contains        reject 403
//!     → MockRegistry::lookup        canned response after delay
//!     → ConcurrencyRegistry::admit  reject 429 over ceiling, else wait for a token
//!     → InterceptorRegistry::get    before/after scripts around the handler
//! ```
//!
//! # Design Decisions
//! - Registries are owned by one [`GovernanceController`] built at startup
//!   and shared through `Arc`; there are no globals.
//! - Readers never lock: map registries publish immutable snapshots through
//!   `ArcSwap`, concurrency gates swap their ceiling/limiter pair atomically.
//! - A bad row never poisons a batch; a store failure leaves the last good
//!   policy in force.

pub mod alarm;
pub mod concurrency;
pub mod error;
pub mod interceptor;
pub mod ip_block;
pub mod mock;
pub mod refresher;
pub mod request_limits;
pub mod route_key;
pub mod settings;
pub mod token_bucket;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use alarm::{Alarm, AlarmCenter, AlarmEvent, AlarmKind};
pub use concurrency::{Admission, ConcurrencyRegistry, ConcurrencySpec};
pub use error::{OverLimit, PolicyError, RefreshError, StoreError};
pub use interceptor::{InterceptorEntry, InterceptorRegistry};
pub use ip_block::IpBlockSet;
pub use mock::{MockEntry, MockRegistry};
pub use refresher::{PolicyRefresher, RefreshReport};
pub use request_limits::{RequestLimit, RequestLimitStatus, RequestLimits, RequestPermit};
pub use route_key::RouteKey;
pub use settings::{EmailGroups, MockClock, SigningKeys};

/// Outcome of parsing a batch of rows into one registry.
#[derive(Debug, Default)]
pub struct RowOutcome {
    pub applied: usize,
    /// Index into the input rows, and why that row was dropped.
    pub rejected: Vec<(usize, PolicyError)>,
}

/// Every registry the request path and the refresher share.
#[derive(Debug)]
pub struct GovernanceController {
    pub concurrency: ConcurrencyRegistry,
    pub mocks: MockRegistry,
    pub blocked_ips: IpBlockSet,
    pub interceptors: InterceptorRegistry,
    pub request_limits: RequestLimits,
    pub clock: MockClock,
    pub signing_keys: SigningKeys,
    pub emails: Arc<EmailGroups>,
    refreshed_at_ms: AtomicI64,
}

impl GovernanceController {
    /// Build the controller for a fixed set of registered routes.
    pub fn new(
        routes: impl IntoIterator<Item = RouteKey>,
        default_signing_keys: Vec<String>,
    ) -> Self {
        Self {
            concurrency: ConcurrencyRegistry::new(routes),
            mocks: MockRegistry::new(),
            blocked_ips: IpBlockSet::new(),
            interceptors: InterceptorRegistry::new(),
            request_limits: RequestLimits::new(),
            clock: MockClock::new(),
            signing_keys: SigningKeys::new(default_signing_keys),
            emails: Arc::new(EmailGroups::new()),
            refreshed_at_ms: AtomicI64::new(0),
        }
    }

    /// When the last successful refresh cycle finished.
    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        match self.refreshed_at_ms.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub(crate) fn mark_refreshed(&self, at: DateTime<Utc>) {
        self.refreshed_at_ms.store(at.timestamp_millis(), Ordering::Release);
    }
}
