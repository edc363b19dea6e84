//! Periodic policy resolution.
//!
//! # Responsibilities
//! - Fetch active rows from the store (at boot, on a timer, on demand)
//! - Partition them by category in one pass, newest row first
//! - Parse each row and push every category into its registry
//! - Isolate bad rows: log, alarm, skip, keep going
//!
//! # Design Decisions
//! - A store failure aborts the cycle before anything is touched, so the
//!   process keeps its last good policy instead of dropping to none
//! - At most one cycle runs at a time; an overlapping request is skipped
//! - The timer never catches up on missed ticks

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::time::{self, MissedTickBehavior};

use crate::governance::alarm::{Alarm, AlarmEvent, AlarmKind};
use crate::governance::concurrency::parse_router_concurrency;
use crate::governance::error::{PolicyError, RefreshError};
use crate::governance::request_limits::RequestLimit;
use crate::governance::settings::{EmailGroup, MockClock, SigningKeys};
use crate::governance::{GovernanceController, RowOutcome};
use crate::observability::metrics;
use crate::store::record::sort_newest_first;
use crate::store::{Category, ConfigurationRecord, PolicyStore};

/// Rows of one cycle grouped by category.
///
/// Singleton categories keep only the newest row; list categories keep
/// every row in newest-first order.
#[derive(Debug, Default)]
pub struct PolicyBatch<'a> {
    pub mock_time: Option<&'a ConfigurationRecord>,
    pub signed_key: Option<&'a ConfigurationRecord>,
    pub block_ip: Vec<&'a ConfigurationRecord>,
    pub router_concurrency: Vec<&'a ConfigurationRecord>,
    pub router: Vec<&'a ConfigurationRecord>,
    pub request_concurrency: Vec<&'a ConfigurationRecord>,
    pub email: Vec<&'a ConfigurationRecord>,
    pub interceptor: Vec<&'a ConfigurationRecord>,
}

impl<'a> PolicyBatch<'a> {
    /// Expects `rows` ordered newest first.
    pub fn partition(rows: &'a [ConfigurationRecord]) -> Self {
        let mut batch = PolicyBatch::default();
        for row in rows {
            match row.category {
                Category::MockTime => {
                    batch.mock_time.get_or_insert(row);
                }
                Category::SignedKey => {
                    batch.signed_key.get_or_insert(row);
                }
                Category::BlockIp => batch.block_ip.push(row),
                Category::RouterConcurrency => batch.router_concurrency.push(row),
                Category::Router => batch.router.push(row),
                Category::RequestConcurrency => batch.request_concurrency.push(row),
                Category::Email => batch.email.push(row),
                Category::HttpServerInterceptor => batch.interceptor.push(row),
                Category::Unknown => {
                    tracing::debug!(row = %row.name, "Row with unknown category ignored");
                }
            }
        }
        batch
    }
}

/// A row that was dropped during a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedRow {
    pub name: String,
    pub category: &'static str,
    pub error: String,
}

/// What one successful cycle applied.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub rows: usize,
    pub concurrency: usize,
    pub mocks: usize,
    pub blocked_ips: usize,
    pub interceptors: usize,
    pub request_limits: usize,
    pub email_groups: usize,
    pub mock_time: Option<DateTime<Utc>>,
    pub signing_keys: usize,
    pub default_signing_keys: bool,
    pub rejected: Vec<RejectedRow>,
    pub refreshed_at: DateTime<Utc>,
    pub duration_ms: u128,
}

impl RefreshReport {
    fn new(rows: usize) -> Self {
        Self {
            rows,
            concurrency: 0,
            mocks: 0,
            blocked_ips: 0,
            interceptors: 0,
            request_limits: 0,
            email_groups: 0,
            mock_time: None,
            signing_keys: 0,
            default_signing_keys: false,
            rejected: Vec::new(),
            refreshed_at: Utc::now(),
            duration_ms: 0,
        }
    }
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pulls policy from a [`PolicyStore`] into a [`GovernanceController`].
pub struct PolicyRefresher {
    store: Arc<dyn PolicyStore>,
    controller: Arc<GovernanceController>,
    alarm: Arc<dyn Alarm>,
    interval: Duration,
    running: AtomicBool,
    trigger: Notify,
    last_report: ArcSwapOption<RefreshReport>,
}

impl PolicyRefresher {
    pub fn new(
        store: Arc<dyn PolicyStore>,
        controller: Arc<GovernanceController>,
        alarm: Arc<dyn Alarm>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            controller,
            alarm,
            interval,
            running: AtomicBool::new(false),
            trigger: Notify::new(),
            last_report: ArcSwapOption::empty(),
        }
    }

    pub fn controller(&self) -> &Arc<GovernanceController> {
        &self.controller
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_report(&self) -> Option<Arc<RefreshReport>> {
        self.last_report.load_full()
    }

    /// Ask the background loop to refresh as soon as possible.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Run the background loop until shutdown. The boot-time refresh is the
    /// caller's job; the first tick fires one interval from now.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Policy refresher starting");

        let mut ticker = time::interval_at(time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    tracing::debug!("Manual policy refresh requested");
                }
                _ = shutdown.recv() => {
                    tracing::info!("Policy refresher received shutdown signal, exiting loop");
                    break;
                }
            }

            if let Err(RefreshError::InProgress) = self.refresh().await {
                tracing::debug!("Policy refresh skipped, previous cycle still running");
            }
        }
    }

    /// Run one cycle now.
    pub async fn refresh(&self) -> Result<RefreshReport, RefreshError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RefreshError::InProgress);
        }
        let _cycle = CycleGuard(&self.running);
        let started = Instant::now();

        let mut rows = match self.store.fetch_active(Utc::now()).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "Policy refresh aborted, keeping last known policy");
                self.alarm
                    .raise(AlarmEvent::new(AlarmKind::StoreUnavailable, "store", e.to_string()));
                metrics::record_refresh("store_error", started.elapsed());
                return Err(e.into());
            }
        };
        sort_newest_first(&mut rows);

        let batch = PolicyBatch::partition(&rows);
        let mut report = RefreshReport::new(rows.len());

        self.apply_concurrency(&batch.router_concurrency, &mut report);
        self.apply_mocks(&batch.router, &mut report);
        self.apply_block_list(&batch.block_ip, &mut report);
        self.apply_interceptors(&batch.interceptor, &mut report);
        self.apply_request_limits(&batch.request_concurrency, &mut report);
        self.apply_emails(&batch.email, &mut report);
        self.apply_mock_time(batch.mock_time, &mut report);
        self.apply_signing_keys(batch.signed_key, &mut report);

        let finished = Utc::now();
        self.controller.mark_refreshed(finished);
        report.refreshed_at = finished;
        report.duration_ms = started.elapsed().as_millis();

        let outcome = if report.rejected.is_empty() { "ok" } else { "partial" };
        metrics::record_refresh(outcome, started.elapsed());
        tracing::info!(
            rows = report.rows,
            concurrency = report.concurrency,
            mocks = report.mocks,
            blocked_ips = report.blocked_ips,
            interceptors = report.interceptors,
            rejected = report.rejected.len(),
            "Policy refreshed"
        );

        self.last_report.store(Some(Arc::new(report.clone())));
        Ok(report)
    }

    fn reject(&self, row: &ConfigurationRecord, error: &PolicyError, report: &mut RefreshReport) {
        let category = row.category.as_str();
        tracing::warn!(row = %row.name, category, error = %error, "Skipping malformed policy row");
        metrics::record_rejected_row(category);
        self.alarm.raise(AlarmEvent::new(
            AlarmKind::MalformedRow,
            row.name.clone(),
            format!("{category}: {error}"),
        ));
        report.rejected.push(RejectedRow {
            name: row.name.clone(),
            category,
            error: error.to_string(),
        });
    }

    fn reject_outcome(
        &self,
        rows: &[&ConfigurationRecord],
        outcome: &RowOutcome,
        report: &mut RefreshReport,
    ) {
        for (index, error) in &outcome.rejected {
            if let Some(row) = rows.get(*index) {
                self.reject(row, error, report);
            }
        }
    }

    fn apply_concurrency(&self, rows: &[&ConfigurationRecord], report: &mut RefreshReport) {
        let mut specs = HashMap::new();
        for row in rows {
            match parse_router_concurrency(&row.data) {
                Ok((key, spec)) => {
                    specs.entry(key).or_insert(spec);
                }
                Err(e) => self.reject(row, &e, report),
            }
        }

        let unknown = self.controller.concurrency.apply(&specs);
        for route in &unknown {
            tracing::warn!(route = %route, "Concurrency policy for unregistered route ignored");
        }
        report.concurrency = specs.len() - unknown.len();
    }

    fn apply_mocks(&self, rows: &[&ConfigurationRecord], report: &mut RefreshReport) {
        let outcome = self.controller.mocks.update(rows.iter().map(|r| r.data.as_str()));
        self.reject_outcome(rows, &outcome, report);
        report.mocks = self.controller.mocks.len();
    }

    fn apply_interceptors(&self, rows: &[&ConfigurationRecord], report: &mut RefreshReport) {
        let outcome = self.controller.interceptors.update(rows.iter().map(|r| r.data.as_str()));
        self.reject_outcome(rows, &outcome, report);
        report.interceptors = self.controller.interceptors.len();
    }

    fn apply_block_list(&self, rows: &[&ConfigurationRecord], report: &mut RefreshReport) {
        // A row may carry a comma list; remember which row each entry came from.
        let entries: Vec<(&ConfigurationRecord, &str)> = rows
            .iter()
            .flat_map(|row| row.data.split(',').map(move |ip| (*row, ip.trim())))
            .filter(|(_, ip)| !ip.is_empty())
            .collect();

        let outcome = self.controller.blocked_ips.replace(entries.iter().map(|(_, ip)| *ip));
        for (index, error) in &outcome.rejected {
            if let Some((row, _)) = entries.get(*index) {
                self.reject(row, error, report);
            }
        }
        report.blocked_ips = outcome.applied;
    }

    fn apply_request_limits(&self, rows: &[&ConfigurationRecord], report: &mut RefreshReport) {
        let mut limits = Vec::with_capacity(rows.len());
        for row in rows {
            match RequestLimit::parse(&row.data) {
                Ok(limit) => limits.push(limit),
                Err(e) => self.reject(row, &e, report),
            }
        }
        report.request_limits = limits.len();
        self.controller.request_limits.replace(limits);
    }

    fn apply_emails(&self, rows: &[&ConfigurationRecord], report: &mut RefreshReport) {
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows {
            match EmailGroup::parse(&row.data) {
                Ok(group) => groups.push(group),
                Err(e) => self.reject(row, &e, report),
            }
        }
        report.email_groups = groups.len();
        self.controller.emails.replace(groups);
    }

    fn apply_mock_time(&self, row: Option<&ConfigurationRecord>, report: &mut RefreshReport) {
        let clock = &self.controller.clock;
        match row.map(|r| (r, MockClock::parse(&r.data))) {
            Some((_, Ok(at))) => {
                clock.set(at);
                report.mock_time = Some(at);
            }
            Some((row, Err(e))) => {
                self.reject(row, &e, report);
                clock.clear();
            }
            None => clock.clear(),
        }
    }

    fn apply_signing_keys(&self, row: Option<&ConfigurationRecord>, report: &mut RefreshReport) {
        let keys = row.map(|r| SigningKeys::parse(&r.data));
        report.default_signing_keys = self.controller.signing_keys.apply(keys);
        report.signing_keys = self.controller.signing_keys.keys().len();
        if report.default_signing_keys {
            tracing::debug!("No signed key configured, using default signing keys");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::alarm::AlarmCenter;
    use crate::governance::route_key::RouteKey;
    use crate::governance::settings::EmailGroups;
    use crate::store::{MemoryStore, Status};
    use chrono::Duration as ChronoDuration;

    fn row(name: &str, category: Category, data: &str, age_secs: i64) -> ConfigurationRecord {
        let now = Utc::now();
        ConfigurationRecord {
            name: name.into(),
            category,
            status: Status::Enabled,
            data: data.into(),
            started_at: now - ChronoDuration::hours(1),
            ended_at: now + ChronoDuration::hours(1),
            updated_at: now - ChronoDuration::seconds(age_secs),
        }
    }

    fn build_refresher(store: Arc<MemoryStore>) -> (PolicyRefresher, Arc<AlarmCenter>) {
        let controller = Arc::new(GovernanceController::new(
            [RouteKey::new("GET", "/"), RouteKey::new("GET", "/users/me")],
            vec!["default-key".into()],
        ));
        let alarm = Arc::new(AlarmCenter::new(Arc::new(EmailGroups::new()), "alarm", 16));
        let refresher =
            PolicyRefresher::new(store, controller, alarm.clone(), Duration::from_secs(60));
        (refresher, alarm)
    }

    #[test]
    fn test_partition_keeps_newest_singleton() {
        let mut rows = vec![
            row("old-time", Category::MockTime, "2020-01-01T00:00:00Z", 100),
            row("ip-1", Category::BlockIp, "1.1.1.1", 50),
            row("new-time", Category::MockTime, "2021-01-01T00:00:00Z", 1),
            row("ip-2", Category::BlockIp, "2.2.2.2", 10),
            row("mystery", Category::Unknown, "", 5),
        ];
        sort_newest_first(&mut rows);

        let batch = PolicyBatch::partition(&rows);
        assert_eq!(batch.mock_time.unwrap().name, "new-time");
        let ips: Vec<_> = batch.block_ip.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(ips, vec!["ip-2", "ip-1"]);
        assert!(batch.signed_key.is_none());
    }

    #[tokio::test]
    async fn test_mock_time_and_signing_fallback() {
        let store = Arc::new(MemoryStore::with_records([
            row("t", Category::MockTime, "2022-05-01T10:00:00Z", 1),
            row("k", Category::SignedKey, "k1,k2", 1),
        ]));
        let (refresher, _) = build_refresher(store.clone());
        let controller = refresher.controller().clone();

        let report = refresher.refresh().await.unwrap();
        assert!(report.mock_time.is_some());
        assert_eq!(*controller.signing_keys.keys(), vec!["k1", "k2"]);

        store.clear();
        let report = refresher.refresh().await.unwrap();
        assert!(controller.clock.mocked().is_none());
        assert!(report.default_signing_keys);
        assert_eq!(*controller.signing_keys.keys(), vec!["default-key"]);
    }

    #[tokio::test]
    async fn test_block_list_rows_with_comma_lists() {
        let store = Arc::new(MemoryStore::with_records([
            row("office", Category::BlockIp, "10.0.0.0/8, 1.1.1.1", 1),
            row("typo", Category::BlockIp, "1.1.1.x", 2),
        ]));
        let (refresher, alarm) = build_refresher(store);
        let report = refresher.refresh().await.unwrap();

        assert_eq!(report.blocked_ips, 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].name, "typo");
        assert_eq!(alarm.recent()[0].source, "typo");
        assert!(refresher.controller().blocked_ips.contains("10.1.2.3"));
    }

    #[tokio::test]
    async fn test_request_limits_and_emails() {
        let store = Arc::new(MemoryStore::with_records([
            row("geo", Category::RequestConcurrency, r#"{"name":"geo","max":3}"#, 1),
            row("broken", Category::RequestConcurrency, r#"{"name":"geo","max":"#, 2),
            row("ops", Category::Email, r#"{"name":"alarm","list":["ops@example.com"]}"#, 1),
        ]));
        let (refresher, alarm) = build_refresher(store);
        let report = refresher.refresh().await.unwrap();
        let controller = refresher.controller();

        assert_eq!(report.request_limits, 1);
        assert_eq!(controller.request_limits.limit("geo"), Some(3));
        assert_eq!(controller.emails.get("alarm"), vec!["ops@example.com"]);
        assert_eq!(alarm.recent().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_cycle_is_skipped() {
        let (refresher, _) = build_refresher(Arc::new(MemoryStore::new()));
        refresher.running.store(true, Ordering::Release);
        assert!(matches!(refresher.refresh().await, Err(RefreshError::InProgress)));

        refresher.running.store(false, Ordering::Release);
        assert!(refresher.refresh().await.is_ok());
        assert!(!refresher.is_running());
        assert!(refresher.controller().refreshed_at().is_some());
    }
}
