//! Closed-loop verification behaviour at the Analyser level.
//!
//! Exercises the tracker through `Analyser::process_snapshot` and the
//! completion subscriber, over the in-memory bus and an in-process knowledge
//! store.

mod common;

use std::sync::Arc;
use std::time::Duration;

use medic_core::analyser::{Analyser, REFIRE_REASON};
use medic_core::bus::{decode, subjects, ActionCompletedEvent, EventBus, EventBusExt, RollbackRequest};
use medic_core::bus::MemoryBus;
use medic_core::knowledge::KnowledgeStore;
use tokio_util::sync::CancellationToken;

use common::{analyser_config, bloat_snapshot, snapshot, wait_until};

struct Fixture {
    analyser: Arc<Analyser>,
    knowledge: Arc<KnowledgeStore>,
    bus: Arc<MemoryBus>,
    cancel: CancellationToken,
}

async fn fixture(required_cycles: u32, grace_cycles: u32) -> Fixture {
    let knowledge = Arc::new(KnowledgeStore::with_defaults());
    let bus = Arc::new(MemoryBus::new());
    let analyser = Arc::new(Analyser::new(
        &analyser_config(required_cycles, grace_cycles),
        knowledge.clone(),
        bus.clone(),
    ));

    let cancel = CancellationToken::new();
    let subscriber = analyser.clone();
    let subscriber_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = subscriber.run_completion_subscriber(subscriber_cancel).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    Fixture {
        analyser,
        knowledge,
        bus,
        cancel,
    }
}

fn completion(detection_id: &str, detection_key: &str) -> ActionCompletedEvent {
    ActionCompletedEvent::new("db-1", "action-1", detection_id, "vacuum_table", detection_key)
        .with_solution("Vacuumed table orders")
        .with_rollback(false)
}

#[tokio::test]
async fn completion_starts_verification_and_resolves_detection() {
    let f = fixture(3, 1).await;

    // Register the detection the way the analyser would.
    f.analyser.process_snapshot(bloat_snapshot()).await;
    let active = f.knowledge.active_detections_by_database("db-1");
    assert_eq!(active.len(), 1);
    let detection = active[0].clone();

    f.bus
        .publish_json(
            subjects::ACTIONS_COMPLETED,
            &completion(&detection.id, &detection.key()),
        )
        .await
        .unwrap();

    let tracker = f.analyser.tracker();
    let key = detection.key();
    wait_until(|| tracker.is_pending(&key), "verification pending").await;

    // The detection is resolved in knowledge with the solution verbatim.
    let entry = f.knowledge.get_detection(&detection.id).unwrap();
    assert_eq!(entry.solution, "Vacuumed table orders");
    assert!(!f.knowledge.is_detection_active(&key));

    f.cancel.cancel();
}

#[tokio::test]
async fn three_quiet_cycles_resolve_the_verification() {
    let f = fixture(3, 1).await;

    f.analyser.process_snapshot(bloat_snapshot()).await;
    let detection = f.knowledge.active_detections_by_database("db-1")[0].clone();
    let key = detection.key();

    f.bus
        .publish_json(
            subjects::ACTIONS_COMPLETED,
            &completion(&detection.id, &key),
        )
        .await
        .unwrap();

    let tracker = f.analyser.tracker();
    wait_until(|| tracker.is_pending(&key), "verification pending").await;

    // Three quiet snapshots: the issue is gone.
    f.analyser.process_snapshot(snapshot()).await;
    f.analyser.process_snapshot(snapshot()).await;
    assert!(tracker.is_pending(&key));
    f.analyser.process_snapshot(snapshot()).await;

    assert!(!tracker.is_pending(&key));
    assert_eq!(tracker.pending_count(), 0);

    f.cancel.cancel();
}

#[tokio::test]
async fn refire_after_grace_emits_rollback_request() {
    let f = fixture(3, 1).await;
    let mut rollbacks = f.bus.subscribe(subjects::ROLLBACK_REQUESTED).await.unwrap();

    f.analyser.process_snapshot(bloat_snapshot()).await;
    let detection = f.knowledge.active_detections_by_database("db-1")[0].clone();
    let key = detection.key();

    f.bus
        .publish_json(
            subjects::ACTIONS_COMPLETED,
            &completion(&detection.id, &key),
        )
        .await
        .unwrap();

    let tracker = f.analyser.tracker();
    wait_until(|| tracker.is_pending(&key), "verification pending").await;

    // One quiet cycle moves the entry past its grace period; the bloat then
    // re-fires on the second cycle.
    f.analyser.process_snapshot(snapshot()).await;
    f.analyser.process_snapshot(bloat_snapshot()).await;

    let payload = tokio::time::timeout(Duration::from_secs(2), rollbacks.recv())
        .await
        .expect("rollback request not published")
        .expect("bus closed");
    let request: RollbackRequest = decode(&payload).unwrap();

    assert_eq!(request.action_id, "action-1");
    assert_eq!(request.detection_key, key);
    assert_eq!(request.reason, REFIRE_REASON);
    assert!(!tracker.is_pending(&key));

    f.cancel.cancel();
}

#[tokio::test]
async fn refire_within_grace_is_suppressed_without_rollback() {
    let f = fixture(3, 1).await;
    let mut rollbacks = f.bus.subscribe(subjects::ROLLBACK_REQUESTED).await.unwrap();
    let mut detections = f.bus.subscribe(subjects::DETECTIONS).await.unwrap();

    f.analyser.process_snapshot(bloat_snapshot()).await;
    // Drain the original detection publish.
    let _ = tokio::time::timeout(Duration::from_secs(1), detections.recv()).await;

    let detection = f.knowledge.active_detections_by_database("db-1")[0].clone();
    let key = detection.key();

    f.bus
        .publish_json(
            subjects::ACTIONS_COMPLETED,
            &completion(&detection.id, &key),
        )
        .await
        .unwrap();
    let tracker = f.analyser.tracker();
    wait_until(|| tracker.is_pending(&key), "verification pending").await;

    // Immediate re-fire: zero elapsed cycles, inside the grace window.
    f.analyser.process_snapshot(bloat_snapshot()).await;

    assert!(tracker.is_pending(&key));
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rollbacks.recv())
            .await
            .is_err(),
        "no rollback request expected inside the grace period"
    );
    // The suppressed detection was not re-published either.
    assert!(
        tokio::time::timeout(Duration::from_millis(200), detections.recv())
            .await
            .is_err(),
        "suppressed detection must not be published"
    );

    f.cancel.cancel();
}

#[tokio::test]
async fn dedup_keeps_one_active_detection_per_key() {
    let f = fixture(3, 1).await;

    // The same condition across many cycles registers exactly once.
    for _ in 0..5 {
        f.analyser.process_snapshot(bloat_snapshot()).await;
    }

    assert_eq!(f.knowledge.active_detections_by_database("db-1").len(), 1);
    f.cancel.cancel();
}
