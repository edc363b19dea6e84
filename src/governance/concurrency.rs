//! Per-route concurrency gates.
//!
//! # Design Decisions
//! - The key set is fixed when the registry is built (one gate per
//!   registered route); updates mutate gates in place, so lookups read a
//!   plain `HashMap` with no lock.
//! - A gate's in-flight count is its own atomic. Its ceiling, rate
//!   descriptor and limiter live in one immutable [`GatePolicy`] published
//!   through `ArcSwap`, so a reader sees either the old pair or the new pair.
//! - The limiter is rebuilt only when the `(rate, interval)` descriptor
//!   changes, which keeps token state across refresh cycles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::governance::error::PolicyError;
use crate::governance::route_key::RouteKey;
use crate::governance::token_bucket::Limiter;

/// One `routerConcurrency` row: `{router, max, rate?, interval?}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConcurrencySpec {
    /// Maximum in-flight requests; `0` means unlimited.
    pub max: u32,
    /// Tokens per `interval`; `<= 0` means no rate limit.
    pub rate: i64,
    /// Duration string such as `"1s"` or `"500ms"`.
    pub interval: String,
}

impl ConcurrencySpec {
    fn descriptor(&self) -> String {
        format!("{}/{}", self.rate, self.interval)
    }
}

#[derive(Debug, Deserialize)]
struct RouterConcurrencyRow {
    router: String,
    #[serde(flatten)]
    spec: ConcurrencySpec,
}

/// Parse a `routerConcurrency` row.
pub fn parse_router_concurrency(data: &str) -> Result<(RouteKey, ConcurrencySpec), PolicyError> {
    let row: RouterConcurrencyRow = serde_json::from_str(data)?;
    let key = row.router.parse()?;
    Ok((key, row.spec))
}

/// Ceiling and limiter, always replaced together.
#[derive(Debug)]
pub struct GatePolicy {
    pub ceiling: u32,
    pub descriptor: String,
    pub limiter: Arc<Limiter>,
}

impl GatePolicy {
    fn ungoverned() -> Self {
        Self {
            ceiling: 0,
            descriptor: String::new(),
            limiter: Arc::new(Limiter::Unlimited),
        }
    }
}

/// Admission primitive for one route.
#[derive(Debug)]
pub struct ConcurrencyGate {
    current: AtomicU32,
    policy: ArcSwap<GatePolicy>,
}

impl ConcurrencyGate {
    fn new() -> Self {
        Self {
            current: AtomicU32::new(0),
            policy: ArcSwap::from_pointee(GatePolicy::ungoverned()),
        }
    }

    pub fn current(&self) -> u32 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn ceiling(&self) -> u32 {
        self.policy.load().ceiling
    }

    /// The currently published ceiling/limiter pair.
    pub fn policy(&self) -> Arc<GatePolicy> {
        self.policy.load_full()
    }

    fn increment(&self) -> u32 {
        self.current.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    fn decrement(&self) {
        // Never wrap below zero, even on an unmatched decrement.
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Install a new ceiling; rebuild the limiter only if the rate descriptor changed.
    pub fn update(&self, spec: &ConcurrencySpec) {
        let old = self.policy.load();
        let descriptor = spec.descriptor();
        let limiter = if old.descriptor == descriptor {
            old.limiter.clone()
        } else {
            Arc::new(Limiter::from_spec(spec.rate, &spec.interval))
        };
        self.policy.store(Arc::new(GatePolicy {
            ceiling: spec.max,
            descriptor,
            limiter,
        }));
    }

    /// Drop back to "no policy": no ceiling and no rate limit.
    pub fn reset(&self) {
        let old = self.policy.load();
        if old.ceiling == 0 && old.limiter.is_unlimited() {
            return;
        }
        self.policy.store(Arc::new(GatePolicy::ungoverned()));
    }
}

/// Result of an admission attempt on a gate.
///
/// Holds the in-flight slot until dropped, so the matching decrement runs on
/// every exit path, including cancellation while waiting on the limiter.
#[derive(Debug)]
#[must_use = "dropping the admission releases the concurrency slot"]
pub struct Admission {
    pub current: u32,
    pub ceiling: u32,
    guard: Option<ConcurrencyGuard>,
}

impl Admission {
    fn ungoverned() -> Self {
        Self {
            current: 0,
            ceiling: 0,
            guard: None,
        }
    }

    /// `true` when the ceiling is set and this request pushed the route over it.
    pub fn is_over_limit(&self) -> bool {
        self.ceiling > 0 && self.current > self.ceiling
    }

    /// Keep the slot occupied past this value; the caller becomes responsible
    /// for calling [`ConcurrencyRegistry::dec_concurrency`].
    pub fn into_counts(mut self) -> (u32, u32) {
        if let Some(guard) = self.guard.as_mut() {
            guard.armed = false;
        }
        (self.current, self.ceiling)
    }
}

/// Decrements the gate's in-flight count on drop.
#[derive(Debug)]
struct ConcurrencyGuard {
    gate: Arc<ConcurrencyGate>,
    armed: bool,
}

impl Drop for ConcurrencyGuard {
    fn drop(&mut self) {
        if self.armed {
            self.gate.decrement();
        }
    }
}

/// Live state of one route, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct GateSnapshot {
    pub route: RouteKey,
    pub current: u32,
    pub ceiling: u32,
    pub rate: String,
}

/// Fixed set of gates, one per registered route.
#[derive(Debug, Default)]
pub struct ConcurrencyRegistry {
    gates: HashMap<RouteKey, Arc<ConcurrencyGate>>,
}

impl ConcurrencyRegistry {
    /// Build one gate per route. The key set never changes afterwards.
    pub fn new(routes: impl IntoIterator<Item = RouteKey>) -> Self {
        let gates = routes
            .into_iter()
            .map(|key| (key, Arc::new(ConcurrencyGate::new())))
            .collect();
        Self { gates }
    }

    pub fn gate(&self, key: &str) -> Option<&Arc<ConcurrencyGate>> {
        self.gates.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.gates.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Count one request in and, unless it is over the ceiling, wait for a
    /// rate-limiter token. Unknown routes are never governed.
    pub async fn admit(&self, key: &str) -> Admission {
        let Some(gate) = self.gates.get(key) else {
            return Admission::ungoverned();
        };

        let current = gate.increment();
        let guard = ConcurrencyGuard {
            gate: gate.clone(),
            armed: true,
        };
        let policy = gate.policy.load_full();
        let admission = Admission {
            current,
            ceiling: policy.ceiling,
            guard: Some(guard),
        };
        if !admission.is_over_limit() {
            policy.limiter.take().await;
        }
        admission
    }

    /// Returns `(current, ceiling)`; `(0, 0)` for an unknown route. The
    /// caller must pair it with [`Self::dec_concurrency`].
    pub async fn inc_concurrency(&self, key: &str) -> (u32, u32) {
        self.admit(key).await.into_counts()
    }

    pub fn dec_concurrency(&self, key: &str) {
        if let Some(gate) = self.gates.get(key) {
            gate.decrement();
        }
    }

    /// Apply one spec to one route. Returns `false` if the route is not registered.
    pub fn update(&self, key: &str, spec: &ConcurrencySpec) -> bool {
        match self.gates.get(key) {
            Some(gate) => {
                gate.update(spec);
                true
            }
            None => false,
        }
    }

    /// Apply a whole refresh batch. Registered routes missing from the batch
    /// are reset to ungoverned; batch entries for unknown routes are returned.
    pub fn apply(&self, batch: &HashMap<RouteKey, ConcurrencySpec>) -> Vec<RouteKey> {
        for (key, gate) in &self.gates {
            match batch.get(key) {
                Some(spec) => gate.update(spec),
                None => gate.reset(),
            }
        }
        batch
            .keys()
            .filter(|key| !self.gates.contains_key(*key))
            .cloned()
            .collect()
    }

    /// In-flight count per route.
    pub fn stats(&self) -> HashMap<String, u32> {
        self.gates
            .iter()
            .map(|(key, gate)| (key.to_string(), gate.current()))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<GateSnapshot> {
        let mut gates: Vec<_> = self
            .gates
            .iter()
            .map(|(key, gate)| {
                let policy = gate.policy.load();
                GateSnapshot {
                    route: key.clone(),
                    current: gate.current(),
                    ceiling: policy.ceiling,
                    rate: policy.descriptor.clone(),
                }
            })
            .collect();
        gates.sort_by(|a, b| a.route.cmp(&b.route));
        gates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::Instant;

    fn registry() -> ConcurrencyRegistry {
        ConcurrencyRegistry::new(vec![RouteKey::new("GET", "/"), RouteKey::new("GET", "/users/me")])
    }

    fn spec(max: u32, rate: i64, interval: &str) -> ConcurrencySpec {
        ConcurrencySpec {
            max,
            rate,
            interval: interval.to_string(),
        }
    }

    #[tokio::test]
    async fn test_unknown_route_fails_open() {
        let registry = registry();
        assert_eq!(registry.inc_concurrency("POST /nowhere").await, (0, 0));
        registry.dec_concurrency("POST /nowhere");
        assert!(!registry.stats().contains_key("POST /nowhere"));
    }

    #[tokio::test]
    async fn test_ceiling_reported_when_exceeded() {
        let registry = registry();
        registry.update("GET /", &spec(3, 0, ""));

        let mut held = Vec::new();
        for n in 1..=3 {
            let admission = registry.admit("GET /").await;
            assert_eq!((admission.current, admission.ceiling), (n, 3));
            assert!(!admission.is_over_limit());
            held.push(admission);
        }
        let fourth = registry.admit("GET /").await;
        assert_eq!((fourth.current, fourth.ceiling), (4, 3));
        assert!(fourth.is_over_limit());
    }

    #[tokio::test]
    async fn test_decrement_restores_capacity() {
        let registry = registry();
        for _ in 0..100 {
            let (current, _) = registry.inc_concurrency("GET /").await;
            assert_eq!(current, 1);
            registry.dec_concurrency("GET /");
        }
        assert_eq!(registry.stats()["GET /"], 0);

        for _ in 0..10 {
            let _admission = registry.admit("GET /users/me").await;
        }
        assert_eq!(registry.stats()["GET /users/me"], 0);
    }

    #[tokio::test]
    async fn test_unmatched_decrement_does_not_wrap() {
        let registry = registry();
        registry.dec_concurrency("GET /");
        assert_eq!(registry.stats()["GET /"], 0);
    }

    #[tokio::test]
    async fn test_same_descriptor_keeps_limiter() {
        let registry = registry();
        let gate = registry.gate("GET /").unwrap().clone();

        registry.update("GET /", &spec(10, 100, "1s"));
        let first = gate.policy().limiter.clone();

        registry.update("GET /", &spec(20, 100, "1s"));
        let second = gate.policy();
        assert!(Arc::ptr_eq(&first, &second.limiter));
        assert_eq!(second.ceiling, 20);

        registry.update("GET /", &spec(20, 50, "1s"));
        assert!(!Arc::ptr_eq(&first, &gate.policy().limiter));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_state_survives_identical_update() {
        let registry = registry();
        registry.update("GET /", &spec(0, 2, "1s"));

        let start = Instant::now();
        registry.inc_concurrency("GET /").await;
        registry.inc_concurrency("GET /").await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // A rebuilt bucket would hand out a fresh burst here.
        registry.update("GET /", &spec(0, 2, "1s"));
        registry.inc_concurrency("GET /").await;
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_apply_resets_absent_routes() {
        let registry = registry();
        let mut batch = HashMap::new();
        batch.insert(RouteKey::new("GET", "/"), spec(10, 100, "1s"));
        assert!(registry.apply(&batch).is_empty());
        assert_eq!(registry.gate("GET /").unwrap().ceiling(), 10);

        let missing = HashMap::from([(RouteKey::new("GET", "/missing"), spec(1, 0, ""))]);
        let unknown = registry.apply(&missing);
        assert_eq!(unknown, vec![RouteKey::new("GET", "/missing")]);

        let policy = registry.gate("GET /").unwrap().policy();
        assert_eq!(policy.ceiling, 0);
        assert!(policy.limiter.is_unlimited());
    }

    #[tokio::test]
    async fn test_invalid_interval_installs_unlimited() {
        let registry = registry();
        registry.update("GET /", &spec(5, 10, "every so often"));
        let policy = registry.gate("GET /").unwrap().policy();
        assert_eq!(policy.ceiling, 5);
        assert!(policy.limiter.is_unlimited());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_releases_slot() {
        let registry = Arc::new(registry());
        registry.update("GET /", &spec(0, 1, "1h"));
        let _first = registry.admit("GET /").await;

        let waiting = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _second = registry.admit("GET /").await;
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(registry.stats()["GET /"], 2);

        waiting.abort();
        let _ = waiting.await;
        assert_eq!(registry.stats()["GET /"], 1);
    }

    #[test]
    fn test_parse_router_concurrency() {
        let (key, spec) =
            parse_router_concurrency(r#"{"router":"GET /","max":10,"rate":100,"interval":"1s"}"#)
                .unwrap();
        assert_eq!(key.as_str(), "GET /");
        assert_eq!(spec, ConcurrencySpec { max: 10, rate: 100, interval: "1s".into() });

        let (_, spec) = parse_router_concurrency(r#"{"router":"POST /orders","max":2}"#).unwrap();
        assert_eq!(spec.rate, 0);

        assert!(parse_router_concurrency("{not json").is_err());
        assert!(parse_router_concurrency(r#"{"router":"nope","max":1}"#).is_err());
    }
}
