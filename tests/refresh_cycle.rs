//! Refresh cycles end to end: store → refresher → registries.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use route_governor::governance::{
    AlarmKind, GovernanceController, PolicyRefresher, RefreshError, RouteKey,
};
use route_governor::store::{
    Category, ConfigurationRecord, FileStore, MemoryStore, PolicyStore, StoreError,
};

mod common;

use common::{row, RecordingAlarm};

fn controller() -> Arc<GovernanceController> {
    Arc::new(GovernanceController::new(
        [RouteKey::new("GET", "/"), RouteKey::new("GET", "/users/me")],
        vec!["default-key".into()],
    ))
}

fn refresher(store: Arc<dyn PolicyStore>, alarm: Arc<RecordingAlarm>) -> Arc<PolicyRefresher> {
    Arc::new(PolicyRefresher::new(store, controller(), alarm, Duration::from_secs(60)))
}

#[tokio::test]
async fn test_boot_then_ceiling_applied() {
    let store = Arc::new(MemoryStore::new());
    let refresher = refresher(store.clone(), Arc::new(RecordingAlarm::default()));
    let concurrency = &refresher.controller().concurrency;

    refresher.refresh().await.unwrap();
    assert_eq!(concurrency.inc_concurrency("GET /").await, (1, 0));
    concurrency.dec_concurrency("GET /");

    store.upsert(row(
        "root",
        Category::RouterConcurrency,
        r#"{"router":"GET /","max":10,"rate":100,"interval":"1s"}"#,
        0,
    ));
    let report = refresher.refresh().await.unwrap();
    assert_eq!(report.concurrency, 1);

    assert_eq!(concurrency.inc_concurrency("GET /").await, (1, 10));
    assert_eq!(concurrency.inc_concurrency("GET /").await, (2, 10));
    concurrency.dec_concurrency("GET /");
    concurrency.dec_concurrency("GET /");
    assert_eq!(concurrency.stats()["GET /"], 0);
}

#[tokio::test]
async fn test_route_dropped_from_batch_is_reset() {
    let store = Arc::new(MemoryStore::new());
    let refresher = refresher(store.clone(), Arc::new(RecordingAlarm::default()));
    let concurrency = &refresher.controller().concurrency;

    store.upsert(row(
        "me",
        Category::RouterConcurrency,
        r#"{"router":"GET /users/me","max":10}"#,
        0,
    ));
    refresher.refresh().await.unwrap();
    assert_eq!(concurrency.gate("GET /users/me").unwrap().ceiling(), 10);

    store.remove("me");
    refresher.refresh().await.unwrap();
    assert_eq!(concurrency.gate("GET /users/me").unwrap().ceiling(), 0);
}

#[tokio::test]
async fn test_malformed_row_is_isolated() {
    let store = Arc::new(MemoryStore::with_records([
        row("b1", Category::BlockIp, "1.1.1.1", 50),
        row("b2", Category::BlockIp, "2.2.2.2", 40),
        row("b3", Category::BlockIp, "not-an-ip", 30),
        row("b4", Category::BlockIp, "4.4.4.4", 20),
        row("b5", Category::BlockIp, "5.5.5.5", 10),
    ]));
    let alarm = Arc::new(RecordingAlarm::default());
    let refresher = refresher(store, alarm.clone());

    let report = refresher.refresh().await.unwrap();
    assert_eq!(report.blocked_ips, 4);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].name, "b3");

    let blocked = &refresher.controller().blocked_ips;
    for ip in ["1.1.1.1", "2.2.2.2", "4.4.4.4", "5.5.5.5"] {
        assert!(blocked.contains(ip), "{ip} should be blocked");
    }

    let events = alarm.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AlarmKind::MalformedRow);
    assert_eq!(events[0].source, "b3");
}

#[tokio::test]
async fn test_malformed_rows_across_categories() {
    let store = Arc::new(MemoryStore::with_records([
        row("ok-mock", Category::Router, r#"{"router":"GET /","response":"hi"}"#, 10),
        row("bad-mock", Category::Router, r#"{"router":"GET /","#, 5),
        row("bad-limit", Category::RouterConcurrency, r#"{"router":"nonsense","max":3}"#, 5),
        row("ok-email", Category::Email, r#"{"name":"alarm","list":["ops@example.com"]}"#, 5),
        row("future", Category::Unknown, "ignored", 5),
    ]));
    let alarm = Arc::new(RecordingAlarm::default());
    let refresher = refresher(store, alarm.clone());

    let report = refresher.refresh().await.unwrap();
    assert_eq!(report.mocks, 1);
    assert_eq!(report.email_groups, 1);
    assert_eq!(report.rejected.len(), 2);
    assert_eq!(alarm.events().len(), 2);
    assert!(refresher.controller().mocks.get("GET", "/").is_some());
}

/// Serves rows until told to fail.
struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

#[async_trait]
impl PolicyStore for FlakyStore {
    async fn fetch_active(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConfigurationRecord>, StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        self.inner.fetch_active(now).await
    }
}

#[tokio::test]
async fn test_store_failure_keeps_last_policy() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::with_records([
            row("block", Category::BlockIp, "9.9.9.9", 0),
            row("mock", Category::Router, r#"{"router":"GET /users/me","response":"{}"}"#, 0),
        ]),
        down: AtomicBool::new(false),
    });
    let alarm = Arc::new(RecordingAlarm::default());
    let refresher = refresher(store.clone(), alarm.clone());

    refresher.refresh().await.unwrap();
    let refreshed_at = refresher.controller().refreshed_at();
    assert!(refreshed_at.is_some());

    store.down.store(true, Ordering::SeqCst);
    let err = refresher.refresh().await.unwrap_err();
    assert!(matches!(err, RefreshError::Store(StoreError::Unavailable(_))));

    let controller = refresher.controller();
    assert!(controller.blocked_ips.contains("9.9.9.9"));
    assert!(controller.mocks.get("GET", "/users/me").is_some());
    assert_eq!(controller.refreshed_at(), refreshed_at);

    let events = alarm.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AlarmKind::StoreUnavailable);
    assert!(!refresher.is_running());
}

#[tokio::test]
async fn test_file_store_cycle() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let rows = vec![
        row("keys", Category::SignedKey, "k1,k2", 0),
        row("clock", Category::MockTime, "2024-02-29T12:00:00Z", 0),
        row("limit", Category::RequestConcurrency, r#"{"name":"payments","max":2}"#, 0),
    ];
    write!(file, "{}", serde_json::to_string(&rows).unwrap()).unwrap();

    let alarm = Arc::new(RecordingAlarm::default());
    let refresher = refresher(Arc::new(FileStore::new(file.path())), alarm.clone());
    let report = refresher.refresh().await.unwrap();
    assert!(report.rejected.is_empty());
    assert!(!report.default_signing_keys);

    let controller = refresher.controller();
    assert_eq!(*controller.signing_keys.keys(), vec!["k1".to_string(), "k2".to_string()]);
    assert_eq!(
        controller.clock.now(),
        "2024-02-29T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
    );

    let first = controller.request_limits.try_acquire("payments").unwrap();
    let _second = controller.request_limits.try_acquire("payments").unwrap();
    assert!(controller.request_limits.try_acquire("payments").is_err());
    drop(first);
    assert!(controller.request_limits.try_acquire("payments").is_ok());
    assert!(alarm.events().is_empty());
}

#[tokio::test]
async fn test_background_loop_stops_on_shutdown() {
    let store = Arc::new(MemoryStore::new());
    let refresher = refresher(store.clone(), Arc::new(RecordingAlarm::default()));
    let shutdown = route_governor::Shutdown::new();

    let task = tokio::spawn(refresher.clone().run(shutdown.subscribe()));

    store.upsert(row("block", Category::BlockIp, "3.3.3.3", 0));
    refresher.trigger();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !refresher.controller().blocked_ips.contains("3.3.3.3") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
}
