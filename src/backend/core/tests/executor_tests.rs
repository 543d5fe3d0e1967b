//! Executor dispatch, execution modes, and rollback paths over the in-memory
//! bus and fakes.

mod common;

use std::collections::HashMap;
use std::time::Duration;

use medic_core::bus::{decode, subjects, ActionStatusEvent, ApprovalEvent, EventBus, EventBusExt};
use medic_core::contracts::{
    ActionPlan, ActionStatus, Category, Detection, ExecutionMode, IndexPriority, Severity,
};
use tokio_util::sync::CancellationToken;

use common::{executor_fixture, wait_until, ExecutorFixture};

fn index_detection() -> Detection {
    Detection::new(
        "missing_index",
        Category::Query,
        Severity::Warning,
        "db-1",
        ActionPlan::CreateIndex {
            table_name: "users".to_string(),
            column_name: "email".to_string(),
            priority: IndexPriority::High,
        },
    )
}

async fn start(f: &ExecutorFixture) -> CancellationToken {
    let cancel = CancellationToken::new();
    let executor = f.executor.clone();
    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _ = executor.run(run_cancel).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel
}

#[tokio::test]
async fn autonomous_mode_executes_and_completes() {
    let f = executor_fixture(ExecutionMode::Autonomous);
    let mut completed = f.bus.subscribe(subjects::ACTIONS_COMPLETED).await.unwrap();
    let cancel = start(&f).await;

    f.bus
        .publish_json(subjects::DETECTIONS, &index_detection())
        .await
        .unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), completed.recv())
        .await
        .expect("no completion event")
        .expect("bus closed");
    let event: medic_core::bus::ActionCompletedEvent = decode(&payload).unwrap();

    assert!(event.can_rollback);
    assert_eq!(event.detection_key, "db-1:missing_index:users.email");
    assert!(f.adapter.has_index("idx_db_1_users_email"));

    // Knowledge went through queued -> executing -> completed.
    let record = f.knowledge.get_action(&event.action_id).unwrap();
    assert_eq!(record.status, ActionStatus::Completed);
    assert!(record.started_at.is_some());

    cancel.cancel();
}

#[tokio::test]
async fn status_transitions_publish_in_order() {
    let f = executor_fixture(ExecutionMode::Autonomous);
    let mut statuses = f.bus.subscribe(subjects::ACTIONS_STATUS).await.unwrap();
    let cancel = start(&f).await;

    f.bus
        .publish_json(subjects::DETECTIONS, &index_detection())
        .await
        .unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        let payload = tokio::time::timeout(Duration::from_secs(5), statuses.recv())
            .await
            .expect("status stream stalled")
            .expect("bus closed");
        let event: ActionStatusEvent = decode(&payload).unwrap();
        seen.push(event.status);
    }

    assert_eq!(
        seen,
        vec![
            ActionStatus::Queued,
            ActionStatus::Executing,
            ActionStatus::Completed,
        ]
    );

    cancel.cancel();
}

#[tokio::test]
async fn unknown_action_type_lands_on_pending_implementation() {
    let f = executor_fixture(ExecutionMode::Autonomous);
    let mut statuses = f.bus.subscribe(subjects::ACTIONS_STATUS).await.unwrap();
    let cancel = start(&f).await;

    let detection = Detection::new(
        "experimental_detector",
        Category::Query,
        Severity::Info,
        "db-1",
        ActionPlan::Unknown {
            action_type: "foobar".to_string(),
            metadata: HashMap::new(),
        },
    );
    f.bus
        .publish_json(subjects::DETECTIONS, &detection)
        .await
        .unwrap();

    let mut last = None;
    for _ in 0..3 {
        let payload = tokio::time::timeout(Duration::from_secs(5), statuses.recv())
            .await
            .expect("status stream stalled")
            .expect("bus closed");
        let event: ActionStatusEvent = decode(&payload).unwrap();
        last = Some(event);
    }

    let event = last.unwrap();
    assert_eq!(event.status, ActionStatus::PendingImplementation);
    assert_eq!(event.action_type, "foobar");

    // No adapter surface was touched.
    assert!(!f.adapter.has_index("idx_db_1_users_email"));
    assert_eq!(f.adapter.vacuum_count("users"), 0);

    cancel.cancel();
}

#[tokio::test]
async fn observe_mode_only_suggests() {
    let f = executor_fixture(ExecutionMode::Observe);
    let cancel = start(&f).await;

    let detection = index_detection();
    f.bus
        .publish_json(subjects::DETECTIONS, &detection)
        .await
        .unwrap();

    wait_until(
        || !f.executor.pending_actions("db-1").is_empty() || {
            // Suggested is terminal for observe mode and not "pending".
            f.knowledge
                .actions_by_status(ActionStatus::Suggested)
                .iter()
                .any(|r| r.detection_id == detection.id)
        },
        "suggested action recorded",
    )
    .await;

    assert!(!f.adapter.has_index("idx_db_1_users_email"));
    let suggested = f.knowledge.actions_by_status(ActionStatus::Suggested);
    assert_eq!(suggested.len(), 1);

    cancel.cancel();
}

#[tokio::test]
async fn approval_mode_waits_for_the_operator() {
    let f = executor_fixture(ExecutionMode::Approval);
    let mut completed = f.bus.subscribe(subjects::ACTIONS_COMPLETED).await.unwrap();
    let cancel = start(&f).await;

    f.bus
        .publish_json(subjects::DETECTIONS, &index_detection())
        .await
        .unwrap();

    wait_until(
        || {
            !f.knowledge
                .actions_by_status(ActionStatus::PendingApproval)
                .is_empty()
        },
        "action awaiting approval",
    )
    .await;
    assert!(!f.adapter.has_index("idx_db_1_users_email"));

    let pending = f.knowledge.actions_by_status(ActionStatus::PendingApproval);
    let action_id = pending[0].action_id.clone();

    f.bus
        .publish_json(subjects::ACTIONS_APPROVE, &ApprovalEvent::new(&action_id))
        .await
        .unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), completed.recv())
        .await
        .expect("no completion after approval")
        .expect("bus closed");
    let event: medic_core::bus::ActionCompletedEvent = decode(&payload).unwrap();
    assert_eq!(event.action_id, action_id);
    assert!(f.adapter.has_index("idx_db_1_users_email"));

    cancel.cancel();
}

#[tokio::test]
async fn rejection_terminates_without_execution() {
    let f = executor_fixture(ExecutionMode::Approval);
    let cancel = start(&f).await;

    f.bus
        .publish_json(subjects::DETECTIONS, &index_detection())
        .await
        .unwrap();

    wait_until(
        || {
            !f.knowledge
                .actions_by_status(ActionStatus::PendingApproval)
                .is_empty()
        },
        "action awaiting approval",
    )
    .await;
    let action_id = f.knowledge.actions_by_status(ActionStatus::PendingApproval)[0]
        .action_id
        .clone();

    f.bus
        .publish_json(subjects::ACTIONS_REJECT, &ApprovalEvent::new(&action_id))
        .await
        .unwrap();

    wait_until(
        || {
            f.knowledge
                .get_action(&action_id)
                .map(|r| r.status == ActionStatus::Rejected)
                .unwrap_or(false)
        },
        "action rejected",
    )
    .await;
    assert!(!f.adapter.has_index("idx_db_1_users_email"));

    cancel.cancel();
}

#[tokio::test]
async fn autonomous_rollback_request_rolls_back_completed_action() {
    let f = executor_fixture(ExecutionMode::Autonomous);
    let mut completed = f.bus.subscribe(subjects::ACTIONS_COMPLETED).await.unwrap();
    let cancel = start(&f).await;

    let detection = index_detection();
    f.bus
        .publish_json(subjects::DETECTIONS, &detection)
        .await
        .unwrap();

    let payload = tokio::time::timeout(Duration::from_secs(5), completed.recv())
        .await
        .expect("no completion event")
        .expect("bus closed");
    let event: medic_core::bus::ActionCompletedEvent = decode(&payload).unwrap();
    assert!(f.adapter.has_index("idx_db_1_users_email"));

    let request = medic_core::bus::RollbackRequest::new(
        "db-1",
        &event.action_id,
        &event.detection_id,
        &event.detection_key,
        "create_index",
        "Issue re-detected after action completion",
    );
    f.bus
        .publish_json(subjects::ROLLBACK_REQUESTED, &request)
        .await
        .unwrap();

    wait_until(
        || !f.adapter.has_index("idx_db_1_users_email"),
        "index dropped by rollback",
    )
    .await;

    let record = f.executor.get_action(&event.action_id).unwrap();
    assert_eq!(record.status, ActionStatus::RolledBack);
    assert!(record.rolled_back);

    cancel.cancel();
}

#[tokio::test]
async fn duplicate_detection_dispatch_is_skipped() {
    let f = executor_fixture(ExecutionMode::Approval);
    let cancel = start(&f).await;

    let detection = index_detection();
    f.bus
        .publish_json(subjects::DETECTIONS, &detection)
        .await
        .unwrap();
    wait_until(
        || {
            !f.knowledge
                .actions_by_status(ActionStatus::PendingApproval)
                .is_empty()
        },
        "first dispatch pending",
    )
    .await;

    // The same detection delivered again while the first is pending.
    f.bus
        .publish_json(subjects::DETECTIONS, &detection)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(
        f.knowledge
            .actions_by_status(ActionStatus::PendingApproval)
            .len(),
        1
    );

    cancel.cancel();
}
