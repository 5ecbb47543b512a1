//! Integration tests for the dispatcher
//!
//! Uses an in-process mock host so session behavior (start failures, slow
//! deliveries, stuck hosts) is fully controllable without subprocesses.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use agent_relay::{
    AgentIdentity, DeliveryOutcome, Dispatcher, Host, HostFactory, RelayConfig, RelayError,
    SessionState, SystemSnapshot,
};

// ----------------------------------------------------------------------
// Mock host
// ----------------------------------------------------------------------

#[derive(Clone, Default)]
struct MockBehavior {
    fail_start: bool,
    fail_deliver: bool,
    start_delay: Duration,
    deliver_delay: Duration,
}

#[derive(Default)]
struct MockStats {
    live: AtomicUsize,
    peak: AtomicUsize,
    deliveries: Mutex<HashMap<String, Vec<String>>>,
}

impl MockStats {
    fn record_start(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
    }

    fn record_stop(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    fn payloads_for(&self, identity: &str) -> Vec<String> {
        self.deliveries
            .lock()
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }
}

struct MockHost {
    identity: AgentIdentity,
    behavior: MockBehavior,
    stats: Arc<MockStats>,
    started: bool,
    stopped: bool,
}

#[async_trait]
impl Host for MockHost {
    async fn start(&mut self) -> agent_relay::Result<()> {
        tokio::time::sleep(self.behavior.start_delay).await;
        if self.behavior.fail_start {
            return Err(RelayError::host_unavailable(
                self.identity.as_str(),
                "mock start failure",
            ));
        }
        self.started = true;
        self.stats.record_start();
        Ok(())
    }

    async fn deliver(&mut self, payload: &str) -> agent_relay::Result<DeliveryOutcome> {
        tokio::time::sleep(self.behavior.deliver_delay).await;
        if self.behavior.fail_deliver {
            return Err(RelayError::delivery_failed("mock delivery failure"));
        }
        self.stats
            .deliveries
            .lock()
            .entry(self.identity.as_str().to_string())
            .or_default()
            .push(payload.to_string());
        Ok(DeliveryOutcome::Acknowledged)
    }

    async fn stop(&mut self) -> agent_relay::Result<()> {
        if self.started && !self.stopped {
            self.stopped = true;
            self.stats.record_stop();
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.started && !self.stopped
    }
}

#[derive(Default)]
struct MockFactory {
    default_behavior: MockBehavior,
    per_identity: HashMap<String, MockBehavior>,
    stats: Arc<MockStats>,
}

impl MockFactory {
    fn new(default_behavior: MockBehavior) -> Self {
        Self {
            default_behavior,
            ..Default::default()
        }
    }

    fn with_behavior(mut self, identity: &str, behavior: MockBehavior) -> Self {
        self.per_identity.insert(identity.to_string(), behavior);
        self
    }

    fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl HostFactory for MockFactory {
    async fn create(&self, identity: &AgentIdentity) -> agent_relay::Result<Box<dyn Host>> {
        let behavior = self
            .per_identity
            .get(identity.as_str())
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone());
        Ok(Box::new(MockHost {
            identity: identity.clone(),
            behavior,
            stats: Arc::clone(&self.stats),
            started: false,
            stopped: false,
        }))
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn test_config(dir: &tempfile::TempDir, max_sessions: usize) -> RelayConfig {
    RelayConfig::builder()
        .journal_path(dir.path().join("journal.jsonl"))
        .max_concurrent_sessions(max_sessions)
        .readiness_timeout(Duration::from_secs(2))
        .delivery_timeout(Duration::from_secs(2))
        .idle_timeout(Duration::from_secs(30))
        .shutdown_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

async fn wait_until(
    dispatcher: &Dispatcher,
    deadline: Duration,
    mut pred: impl FnMut(&SystemSnapshot) -> bool,
) -> SystemSnapshot {
    let stop_at = tokio::time::Instant::now() + deadline;
    loop {
        let snapshot = dispatcher.status().await.unwrap();
        if pred(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < stop_at,
            "condition not met before deadline; last snapshot: {snapshot:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ----------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------

#[tokio::test]
async fn delivers_in_submission_order_per_identity() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior::default());
    let stats = factory.stats();
    let dispatcher = Dispatcher::with_factory(test_config(&dir, 4), Arc::new(factory)).unwrap();

    for n in 0..5 {
        dispatcher.submit("worker1", format!("w1-{n}")).await.unwrap();
    }
    for n in 0..3 {
        dispatcher.submit("worker2", format!("w2-{n}")).await.unwrap();
    }

    let snapshot = wait_until(&dispatcher, Duration::from_secs(5), |s| s.delivered == 8).await;
    assert_eq!(snapshot.failed, 0);

    let expected: Vec<String> = (0..5).map(|n| format!("w1-{n}")).collect();
    assert_eq!(stats.payloads_for("worker1"), expected);
    let expected: Vec<String> = (0..3).map(|n| format!("w2-{n}")).collect();
    assert_eq!(stats.payloads_for("worker2"), expected);

    // Terminal records in the journal preserve per-identity order too
    use futures::StreamExt;
    let worker1 = AgentIdentity::from("worker1");
    let mut stream = dispatcher.journal().read_all();
    let mut journal_order = Vec::new();
    while let Some(record) = stream.next().await {
        let record = record.unwrap();
        if record.is_delivery() && record.target == worker1 {
            journal_order.push(record.payload);
        }
    }
    let expected: Vec<String> = (0..5).map(|n| format!("w1-{n}")).collect();
    assert_eq!(journal_order, expected);

    dispatcher.stop_all().await.unwrap();
}

#[tokio::test]
async fn session_bound_never_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior {
        deliver_delay: Duration::from_millis(150),
        ..Default::default()
    });
    let stats = factory.stats();

    let config = RelayConfig::builder()
        .journal_path(dir.path().join("journal.jsonl"))
        .max_concurrent_sessions(10)
        .idle_timeout(Duration::from_millis(400))
        .shutdown_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::with_factory(config, Arc::new(factory)).unwrap();

    for n in 0..12 {
        dispatcher
            .submit(format!("agent{n}").as_str(), "work")
            .await
            .unwrap();
    }

    // While the first ten sessions are busy, exactly two tasks must wait
    let mut saw_two_queued_at_bound = false;
    let snapshot = wait_until(&dispatcher, Duration::from_secs(15), |s| {
        assert!(s.live_sessions <= 10, "live sessions exceeded bound");
        if s.queued == 2 && s.live_sessions == 10 {
            saw_two_queued_at_bound = true;
        }
        s.delivered == 12
    })
    .await;

    assert!(saw_two_queued_at_bound, "never saw 2 tasks waiting at the bound");
    assert_eq!(stats.peak.load(Ordering::SeqCst), 10);
    assert_eq!(snapshot.failed, 0);

    dispatcher.stop_all().await.unwrap();
}

#[tokio::test]
async fn host_unavailable_marks_task_failed_and_frees_identity() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior::default()).with_behavior(
        "ghost",
        MockBehavior {
            fail_start: true,
            ..Default::default()
        },
    );
    let dispatcher = Dispatcher::with_factory(test_config(&dir, 4), Arc::new(factory)).unwrap();

    dispatcher.submit("ghost", "are you there").await.unwrap();
    let snapshot = wait_until(&dispatcher, Duration::from_secs(5), |s| s.failed == 1).await;

    assert_eq!(snapshot.delivered, 0);
    assert_eq!(snapshot.live_sessions, 0);
    assert_eq!(
        snapshot.agents[&AgentIdentity::from("ghost")].state,
        SessionState::Terminated
    );

    // No stale session registration: a new submission gets a fresh attempt
    dispatcher.submit("ghost", "retry").await.unwrap();
    wait_until(&dispatcher, Duration::from_secs(5), |s| s.failed == 2).await;

    dispatcher.stop_all().await.unwrap();
}

#[tokio::test]
async fn delivery_failure_is_data_not_control_flow() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior::default()).with_behavior(
        "flaky",
        MockBehavior {
            fail_deliver: true,
            ..Default::default()
        },
    );
    let dispatcher = Dispatcher::with_factory(test_config(&dir, 4), Arc::new(factory)).unwrap();

    // Submission succeeds; the failure surfaces as task state only
    dispatcher.submit("flaky", "doomed").await.unwrap();

    let snapshot = wait_until(&dispatcher, Duration::from_secs(5), |s| s.failed == 1).await;
    assert_eq!(
        snapshot.agents[&AgentIdentity::from("flaky")].state,
        SessionState::Terminated
    );

    dispatcher.stop_all().await.unwrap();
}

#[tokio::test]
async fn stop_all_is_idempotent_and_closes_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior::default());
    let stats = factory.stats();
    let dispatcher = Dispatcher::with_factory(test_config(&dir, 4), Arc::new(factory)).unwrap();

    dispatcher.submit("worker1", "one").await.unwrap();
    dispatcher.submit("worker2", "two").await.unwrap();
    wait_until(&dispatcher, Duration::from_secs(5), |s| s.delivered == 2).await;

    dispatcher.stop_all().await.unwrap();
    dispatcher.stop_all().await.unwrap();

    let snapshot = dispatcher.status().await.unwrap();
    assert_eq!(snapshot.live_sessions, 0);
    assert_eq!(stats.live.load(Ordering::SeqCst), 0);

    let result = dispatcher.submit("worker1", "too late").await;
    assert!(matches!(result, Err(RelayError::QueueClosed)));
}

#[tokio::test]
async fn snapshot_counts_stay_consistent_during_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior {
        deliver_delay: Duration::from_millis(30),
        ..Default::default()
    });
    let dispatcher = Dispatcher::with_factory(test_config(&dir, 3), Arc::new(factory)).unwrap();

    for n in 0..30 {
        let target = format!("worker{}", n % 3);
        dispatcher.submit(target.as_str(), format!("task-{n}")).await.unwrap();
    }

    // Every snapshot taken while the system is working must account for
    // each submitted task exactly once: no double counting across states,
    // no totals shrinking between folds
    let mut last_total = 0;
    let snapshot = wait_until(&dispatcher, Duration::from_secs(10), |s| {
        let total = s.total_tasks();
        assert!(total <= 30, "task counted twice: {s:?}");
        assert!(total >= last_total, "folded totals went backwards");
        last_total = total;
        s.delivered == 30
    })
    .await;

    assert_eq!(snapshot.total_tasks(), 30);
    dispatcher.stop_all().await.unwrap();
}

#[tokio::test]
async fn idle_sessions_are_reaped_to_free_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior::default());
    let stats = factory.stats();

    let config = RelayConfig::builder()
        .journal_path(dir.path().join("journal.jsonl"))
        .max_concurrent_sessions(4)
        .idle_timeout(Duration::from_millis(100))
        .shutdown_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::with_factory(config, Arc::new(factory)).unwrap();

    dispatcher.submit("worker1", "quick job").await.unwrap();
    wait_until(&dispatcher, Duration::from_secs(5), |s| s.delivered == 1).await;

    // The session is not a permanent reservation
    let snapshot =
        wait_until(&dispatcher, Duration::from_secs(5), |s| s.live_sessions == 0).await;
    assert_eq!(
        snapshot.agents[&AgentIdentity::from("worker1")].state,
        SessionState::Terminated
    );
    assert_eq!(stats.live.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn prestart_brings_up_the_fixed_role_set() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior::default());
    let dispatcher = Dispatcher::with_factory(test_config(&dir, 10), Arc::new(factory)).unwrap();

    let roles: Vec<AgentIdentity> = ["president", "boss1", "worker1"]
        .iter()
        .map(|r| AgentIdentity::from(*r))
        .collect();
    dispatcher.prestart(roles).await.unwrap();

    let snapshot = wait_until(&dispatcher, Duration::from_secs(5), |s| {
        s.live_sessions == 3
            && s.agents
                .values()
                .filter(|a| a.state == SessionState::Ready)
                .count()
                == 3
    })
    .await;
    assert_eq!(snapshot.total_tasks(), 0);

    dispatcher.stop_all().await.unwrap();
}

#[tokio::test]
async fn stop_all_forces_stuck_sessions_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let factory = MockFactory::new(MockBehavior::default()).with_behavior(
        "stuck",
        MockBehavior {
            deliver_delay: Duration::from_secs(30),
            ..Default::default()
        },
    );

    let config = RelayConfig::builder()
        .journal_path(dir.path().join("journal.jsonl"))
        .max_concurrent_sessions(4)
        .idle_timeout(Duration::from_secs(30))
        .shutdown_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let dispatcher = Dispatcher::with_factory(config, Arc::new(factory)).unwrap();

    dispatcher.submit("stuck", "never finishes").await.unwrap();
    wait_until(&dispatcher, Duration::from_secs(5), |s| s.dispatched == 1).await;

    // Must return despite the stuck delivery, and the in-flight task must
    // still get its terminal record
    tokio::time::timeout(Duration::from_secs(5), dispatcher.stop_all())
        .await
        .expect("stop_all did not return")
        .unwrap();

    let snapshot = dispatcher.status().await.unwrap();
    assert_eq!(snapshot.failed, 1);
    assert_eq!(snapshot.live_sessions, 0);
}
