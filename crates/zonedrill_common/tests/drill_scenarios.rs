//! End-to-end drill scenarios against the in-memory scheduler
//!
//! Every test drives `DrillController` with `FakeScheduler` and a snapshot
//! store, without any network calls.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use std::sync::Mutex;
use zonedrill_common::drill::snapshotter;
use zonedrill_common::notify::Notifier;
use zonedrill_common::providers::{FakeCall, FakeScheduler};
use zonedrill_common::{
    ApiError, CancelToken, ConvergenceOutcome, DrillController, DrillError, FileSnapshotStore,
    MemorySnapshotStore, PollConfig, ServiceKey, SnapshotStore, SubnetId,
};

fn key() -> ServiceKey {
    ServiceKey::new("drill-cluster", "web")
}

fn ids(raw: &[&str]) -> BTreeSet<SubnetId> {
    raw.iter().map(|s| SubnetId::from(*s)).collect()
}

fn fast_poll() -> PollConfig {
    PollConfig {
        base: Duration::from_millis(2),
        factor: 1.5,
        jitter_percent: 0.1,
        max: Duration::from_millis(10),
        deadline: Duration::from_secs(5),
        max_ticks: Some(25),
    }
}

/// Three zones, three instances all sitting in az-b
fn three_zone_fake() -> FakeScheduler {
    FakeScheduler::builder()
        .subnet("s1", "az-a")
        .subnet("s2", "az-b")
        .subnet("s3", "az-c")
        .service(key(), 3, &["s1", "s2", "s3"], &["sg-web"], &["s2", "s2", "s2"])
        .settle_after(1)
        .build()
}

fn controller(fake: &FakeScheduler, store: Arc<dyn SnapshotStore>) -> DrillController {
    DrillController::new(
        Arc::new(fake.clone()),
        Arc::new(fake.clone()),
        store,
        "eu-west-1",
    )
    .with_poll_config(fast_poll())
}

// ============================================================================
// Scenario A: exclude az-b, evict, converge on {s1, s3}
// ============================================================================

#[tokio::test]
async fn test_failover_excludes_zone_and_converges() {
    let fake = three_zone_fake();
    let original: Vec<_> = fake.instances(&key()).keys().cloned().collect();
    let store = Arc::new(MemorySnapshotStore::new());
    let drill = controller(&fake, store.clone());

    let report = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();

    let plan = report.plan.as_ref().unwrap();
    assert_eq!(plan.target_subnets, ids(&["s1", "s3"]));
    assert_eq!(report.target_subnets, ids(&["s1", "s3"]));

    let eviction = report.eviction.as_ref().unwrap();
    assert_eq!(eviction.count(), 3);
    let stopped: BTreeSet<_> = eviction.stopped.iter().cloned().collect();
    assert_eq!(stopped, original.iter().cloned().collect());

    assert!(report.is_success(), "outcome: {}", report.outcome.as_str());
    let placements = report.placements();
    assert_eq!(placements.len(), 3);
    assert!(placements
        .iter()
        .all(|p| p.resolved_subnet.as_str() != "s2" && p.resolved_az.as_str() != "az-b"));
    assert!(placements.iter().all(|p| !original.contains(&p.instance_id)));

    // Scheduler holds the reduced topology, security groups untouched
    let topology = fake.topology(&key()).unwrap();
    assert_eq!(topology.subnets, ids(&["s1", "s3"]));
    assert_eq!(topology.security_groups.len(), 1);

    let saved = store.load(&key()).unwrap().unwrap();
    assert_eq!(saved.subnets, ids(&["s1", "s2", "s3"]));
    assert_eq!(saved.excluded_az.unwrap().as_str(), "az-b");
}

#[tokio::test]
async fn test_apply_precedes_eviction() {
    let fake = three_zone_fake();
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()));
    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();

    // Exactly one update, and every stop reason names the excluded zone
    assert_eq!(fake.updates().len(), 1);
    assert_eq!(fake.stopped().len(), 3);
    assert!(fake.stopped().iter().all(|(_, _, r)| r.contains("az-b")));

    let calls = fake.calls();
    let update = calls
        .iter()
        .position(|c| matches!(c, FakeCall::Update(_)))
        .unwrap();
    let stops: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, FakeCall::Stop(..)))
        .map(|(i, _)| i)
        .collect();
    let first_poll = calls
        .iter()
        .skip(update)
        .position(|c| matches!(c, FakeCall::Describe(_)))
        .map(|offset| update + offset)
        .unwrap();

    assert_eq!(stops.len(), 3);
    assert!(stops.iter().all(|&i| i > update), "stop before apply: {calls:?}");
    assert!(stops.iter().all(|&i| i < first_poll), "poll during eviction: {calls:?}");
    // Snapshot describe happens before the update and nothing else mutates
    assert!(matches!(calls[0], FakeCall::Describe(_)));
    assert_eq!(
        calls.iter().filter(|c| matches!(c, FakeCall::Update(_))).count(),
        1
    );
}

// ============================================================================
// Scenario B: the zone holds every configured subnet
// ============================================================================

#[tokio::test]
async fn test_infeasible_plan_issues_no_update() {
    let fake = FakeScheduler::builder()
        .subnet("s2", "az-b")
        .subnet("s4", "az-b")
        .service(key(), 2, &["s2", "s4"], &["sg-web"], &["s2", "s4"])
        .build();
    let store = Arc::new(MemorySnapshotStore::new());
    let drill = controller(&fake, store.clone());

    let err = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DrillError::InfeasiblePlan { .. }), "{err}");
    assert!(fake.updates().is_empty());
    assert!(fake.stopped().is_empty());
    // Aborted before any mutation, so a rerun is not blocked
    assert!(store.load(&key()).unwrap().is_none());
}

// ============================================================================
// Scenario C: restore with no prior failover
// ============================================================================

#[tokio::test]
async fn test_restore_without_failover_is_missing_snapshot() {
    let fake = three_zone_fake();
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()));

    let err = drill.restore(&key(), &CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, DrillError::MissingSnapshot { .. }));
    assert!(fake.updates().is_empty());
    assert_eq!(fake.describe_calls(), 0);
}

// ============================================================================
// Scenario D: scheduler never converges
// ============================================================================

#[tokio::test]
async fn test_timeout_leaves_configuration_applied() {
    let fake = three_zone_fake();
    fake.set_frozen(true);
    let store = Arc::new(MemorySnapshotStore::new());
    let drill = controller(&fake, store.clone()).with_poll_config(PollConfig {
        max_ticks: Some(5),
        ..fast_poll()
    });

    let report = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();

    match &report.outcome {
        ConvergenceOutcome::TimedOut { ticks, pending, .. } => {
            assert_eq!(*ticks, 5);
            let pending = pending.as_ref().unwrap();
            assert_eq!(pending.running_count, 0);
            assert_eq!(pending.desired_count, 3);
        }
        other => panic!("expected timeout, got {}", other.as_str()),
    }
    assert!(!report.is_success());

    // No silent rollback
    assert_eq!(fake.updates().len(), 1);
    assert_eq!(fake.topology(&key()).unwrap().subnets, ids(&["s1", "s3"]));
    assert!(store.load_active(&key()).unwrap().is_some());
}

// ============================================================================
// Restore
// ============================================================================

#[tokio::test]
async fn test_restore_reproduces_original_subnets() {
    let fake = three_zone_fake();
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(FileSnapshotStore::new(dir.path()));
    let drill = controller(&fake, store.clone());

    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();
    let stops_after_failover = fake.stopped().len();

    let report = drill.restore(&key(), &CancelToken::new()).await.unwrap();
    assert!(report.is_success());
    assert!(report.eviction.is_none());
    assert_eq!(report.target_subnets, ids(&["s1", "s2", "s3"]));
    assert_eq!(fake.topology(&key()).unwrap().subnets, ids(&["s1", "s2", "s3"]));

    // Restore never evicts
    assert_eq!(fake.stopped().len(), stops_after_failover);

    // Snapshot retired: a second restore has nothing to do, a new failover may start
    let err = drill.restore(&key(), &CancelToken::new()).await.unwrap_err();
    assert!(matches!(err, DrillError::MissingSnapshot { .. }));
    assert!(store.load(&key()).unwrap().unwrap().is_consumed());
}

#[tokio::test]
async fn test_restore_carries_current_security_groups() {
    let fake = three_zone_fake();
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()));
    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();
    drill.restore(&key(), &CancelToken::new()).await.unwrap();

    let updates = fake.updates();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0].1.security_groups, updates[1].1.security_groups);
    assert!(updates.iter().all(|(_, u)| u.force_new_deployment));
}

#[tokio::test]
async fn test_unconverged_restore_keeps_snapshot() {
    let fake = three_zone_fake();
    let store = Arc::new(MemorySnapshotStore::new());
    let drill = controller(&fake, store.clone()).with_poll_config(PollConfig {
        max_ticks: Some(3),
        ..fast_poll()
    });
    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();

    // A stray instance in an unknown subnet never resolves, so the restore cannot converge
    fake.set_frozen(true);
    fake.place_instance(&key(), "s9");
    let report = drill.restore(&key(), &CancelToken::new()).await.unwrap();

    assert_eq!(report.outcome.as_str(), "timed_out");
    assert_eq!(report.outcome.ticks(), 3);
    assert!(store.load_active(&key()).unwrap().is_some());
}

// ============================================================================
// Snapshot keying and conflicts
// ============================================================================

#[tokio::test]
async fn test_second_failover_conflicts_until_restored() {
    let fake = three_zone_fake();
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()));
    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();

    let err = drill
        .failover(&key(), &"az-a".into(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DrillError::Conflict { .. }));
    assert_eq!(fake.updates().len(), 1);

    drill.restore(&key(), &CancelToken::new()).await.unwrap();
    drill
        .failover(&key(), &"az-a".into(), &CancelToken::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_interleaved_services_keep_separate_snapshots() {
    let api = ServiceKey::new("drill-cluster", "api");
    let fake = FakeScheduler::builder()
        .subnet("s1", "az-a")
        .subnet("s2", "az-b")
        .subnet("s3", "az-c")
        .service(key(), 2, &["s1", "s2", "s3"], &["sg-web"], &["s1", "s2"])
        .service(api.clone(), 1, &["s1", "s2"], &["sg-api"], &["s2"])
        .settle_after(1)
        .build();
    let dir = tempfile::tempdir().unwrap();
    let drill = controller(&fake, Arc::new(FileSnapshotStore::new(dir.path())));

    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();
    drill
        .failover(&api, &"az-a".into(), &CancelToken::new())
        .await
        .unwrap();

    drill.restore(&key(), &CancelToken::new()).await.unwrap();
    drill.restore(&api, &CancelToken::new()).await.unwrap();

    assert_eq!(fake.topology(&key()).unwrap().subnets, ids(&["s1", "s2", "s3"]));
    assert_eq!(fake.topology(&api).unwrap().subnets, ids(&["s1", "s2"]));
}

#[tokio::test]
async fn test_discard_removes_snapshot() {
    let fake = three_zone_fake();
    fake.set_frozen(true);
    let store = Arc::new(MemorySnapshotStore::new());
    let drill = controller(&fake, store.clone()).with_poll_config(
        PollConfig {
            max_ticks: Some(2),
            ..fast_poll()
        },
    );
    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();

    assert!(snapshotter::discard(store.as_ref(), &key()).unwrap());
    assert!(store.load(&key()).unwrap().is_none());
    assert!(!snapshotter::discard(store.as_ref(), &key()).unwrap());

    // The key is free again
    fake.set_frozen(false);
    let report = drill
        .failover(&key(), &"az-a".into(), &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(report.target_subnets, ids(&["s3"]));
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn test_rejected_update_is_apply_error_without_eviction() {
    let fake = three_zone_fake();
    fake.reject_updates(Some("insufficient capacity in az-a"));
    let store = Arc::new(MemorySnapshotStore::new());
    let drill = controller(&fake, store.clone());

    let err = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DrillError::Apply { .. }), "{err}");
    assert!(err.to_string().contains("drill-cluster/web"));
    assert!(fake.stopped().is_empty());
    // Nothing changed, so the rerun after fixing the cause is not blocked
    assert!(store.load(&key()).unwrap().is_none());

    fake.reject_updates(None);
    let report = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
}

#[tokio::test]
async fn test_unreachable_scheduler_during_apply_keeps_snapshot() {
    let fake = three_zone_fake();
    fake.fail_updates(Some(ApiError::Unavailable("gateway timeout".into())));
    let store = Arc::new(MemorySnapshotStore::new());
    let drill = controller(&fake, store.clone());

    let err = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DrillError::Api { .. }), "{err}");
    assert!(fake.stopped().is_empty());
    // The update may have landed, so the original topology stays restorable
    let saved = store.load_active(&key()).unwrap().unwrap();
    assert_eq!(saved.subnets, ids(&["s1", "s2", "s3"]));
}

#[tokio::test]
async fn test_unknown_service_is_lookup_error() {
    let fake = three_zone_fake();
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()));
    let err = drill
        .failover(&ServiceKey::new("drill-cluster", "ghost"), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DrillError::Lookup { .. }));
}

#[tokio::test]
async fn test_cancelled_failover_is_distinct_outcome() {
    let fake = three_zone_fake();
    fake.set_frozen(true);
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new())).with_poll_config(
        PollConfig {
            base: Duration::from_secs(30),
            max: Duration::from_secs(30),
            deadline: Duration::from_secs(300),
            max_ticks: None,
            ..fast_poll()
        },
    );
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        trigger.cancel();
    });

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        drill.failover(&key(), &"az-b".into(), &cancel),
    )
    .await
    .expect("cancel must end the wait")
    .unwrap();

    assert_eq!(report.outcome.as_str(), "cancelled");
    assert_eq!(fake.topology(&key()).unwrap().subnets, ids(&["s1", "s3"]));
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn publish(&self, _subject: &str, _message: &str) -> Result<(), ApiError> {
        Err(ApiError::Unavailable("smtp relay down".into()))
    }
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_run() {
    let fake = three_zone_fake();
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()))
        .with_notifier(Arc::new(FailingNotifier), "[drill]");

    let report = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();
    assert!(report.is_success());
}

#[derive(Default)]
struct RecordingNotifier {
    subjects: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(&self, subject: &str, _message: &str) -> Result<(), ApiError> {
        // Slower than the drill itself, so delivery depends on the flush
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.subjects.lock().unwrap().push(subject.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_flush_delivers_result_notification() {
    let fake = three_zone_fake();
    let notifier = Arc::new(RecordingNotifier::default());
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()))
        .with_notifier(notifier.clone(), "[drill]");

    drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();
    let abandoned = drill.flush_notifications(Duration::from_secs(5)).await;

    assert_eq!(abandoned, 0);
    let subjects = notifier.subjects.lock().unwrap().clone();
    assert!(subjects.contains(&"[drill] failover drill-cluster/web started".to_string()));
    assert!(subjects.contains(&"[drill] failover drill-cluster/web converged".to_string()));
    assert_eq!(drill.flush_notifications(Duration::from_secs(1)).await, 0);
}

struct StuckNotifier;

#[async_trait]
impl Notifier for StuckNotifier {
    async fn publish(&self, _subject: &str, _message: &str) -> Result<(), ApiError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_flush_is_bounded_by_timeout() {
    let fake = three_zone_fake();
    let drill = controller(&fake, Arc::new(MemorySnapshotStore::new()))
        .with_notifier(Arc::new(StuckNotifier), "[drill]");

    let report = drill
        .failover(&key(), &"az-b".into(), &CancelToken::new())
        .await
        .unwrap();
    assert!(report.is_success());

    let abandoned = tokio::time::timeout(
        Duration::from_secs(5),
        drill.flush_notifications(Duration::from_millis(50)),
    )
    .await
    .expect("flush must respect its timeout");
    assert_eq!(abandoned, 2);
}
