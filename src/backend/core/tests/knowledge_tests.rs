//! Knowledge store behaviour through the cross-service API surface.

use std::sync::Arc;

use medic_core::contracts::{
    ActionPlan, ActionRecord, ActionStatus, Category, DatabaseHealth, DatabaseType, Detection,
    ExecutionMode, RegisteredDatabase, Severity, SystemConfig, TargetDatabase,
};
use medic_core::knowledge::{KnowledgeApi, KnowledgeStore};

fn detection(database_id: &str, table: &str) -> Detection {
    Detection::new(
        "table_bloat",
        Category::Storage,
        Severity::Warning,
        database_id,
        ActionPlan::VacuumTable {
            table_name: table.to_string(),
        },
    )
}

#[tokio::test]
async fn at_most_one_active_detection_per_key() {
    let store: Arc<dyn KnowledgeApi> = Arc::new(KnowledgeStore::with_defaults());

    assert!(store.register_detection(&detection("db-1", "orders")).await.unwrap());
    // Same key: suppressed.
    assert!(!store.register_detection(&detection("db-1", "orders")).await.unwrap());
    // Different table, different key.
    assert!(store.register_detection(&detection("db-1", "sessions")).await.unwrap());

    assert!(store
        .is_detection_active("db-1:table_bloat:orders")
        .await
        .unwrap());
}

#[tokio::test]
async fn resolution_persists_solution_and_frees_key() {
    let store = Arc::new(KnowledgeStore::with_defaults());
    let api: Arc<dyn KnowledgeApi> = store.clone();

    let d = detection("db-1", "orders");
    let id = d.id.clone();
    let key = d.key();
    api.register_detection(&d).await.unwrap();

    api.mark_detection_resolved(&id, "Vacuumed table orders")
        .await
        .unwrap();

    assert!(!api.is_detection_active(&key).await.unwrap());
    let entry = store.get_detection(&id).unwrap();
    assert_eq!(entry.solution, "Vacuumed table orders");

    // The key is reusable for the next occurrence.
    assert!(api.register_detection(&detection("db-1", "orders")).await.unwrap());
}

#[tokio::test]
async fn action_lifecycle_is_monotonic_through_the_api() {
    let api: Arc<dyn KnowledgeApi> = Arc::new(KnowledgeStore::with_defaults());

    let record = ActionRecord::new("action-1", "det-1", "create_index", "db-1");
    api.register_action(&record).await.unwrap();

    assert_eq!(api.pending_actions_by_database("db-1").await.unwrap().len(), 1);

    api.update_action_status("action-1", ActionStatus::Executing, "building", "")
        .await
        .unwrap();
    api.update_action_status("action-1", ActionStatus::Completed, "done", "")
        .await
        .unwrap();
    assert!(api.pending_actions_by_database("db-1").await.unwrap().is_empty());

    // Skipping executing is refused.
    let record = ActionRecord::new("action-2", "det-2", "vacuum_table", "db-1");
    api.register_action(&record).await.unwrap();
    assert!(api
        .update_action_status("action-2", ActionStatus::Completed, "", "")
        .await
        .is_err());
}

#[tokio::test]
async fn empty_database_filter_matches_everything() {
    let api: Arc<dyn KnowledgeApi> = Arc::new(KnowledgeStore::with_defaults());

    api.register_action(&ActionRecord::new("a-1", "d-1", "vacuum_table", "db-1"))
        .await
        .unwrap();
    api.register_action(&ActionRecord::new("a-2", "d-2", "vacuum_table", "db-2"))
        .await
        .unwrap();

    assert_eq!(api.pending_actions_by_database("").await.unwrap().len(), 2);
    assert_eq!(api.pending_actions_by_database("db-2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn database_registration_and_health_reports() {
    let api: Arc<dyn KnowledgeApi> = Arc::new(KnowledgeStore::with_defaults());

    let database = RegisteredDatabase::new(
        "",
        "postgres://medic@db:5432/app",
        DatabaseType::Postgres,
        "app",
    );
    let id = api.register_database(&database).await.unwrap();
    assert!(!id.is_empty());

    api.update_database_health(&id, DatabaseHealth::Offline, 0.0)
        .await
        .unwrap();
}

#[tokio::test]
async fn config_round_trip_through_the_api() {
    let api: Arc<dyn KnowledgeApi> = Arc::new(KnowledgeStore::with_defaults());

    // Defaults skeleton before anything is saved.
    let config = api.get_system_config().await.unwrap();
    assert!(!config.onboarding_complete);

    let saved = SystemConfig {
        onboarding_complete: true,
        execution_mode: ExecutionMode::Autonomous,
        target: Some(TargetDatabase {
            connection_string: "postgres://medic@db:5432/app".to_string(),
            database_type: DatabaseType::Postgres,
            name: "app".to_string(),
        }),
        ..SystemConfig::default()
    };
    api.save_system_config(&saved).await.unwrap();

    let config = api.get_system_config().await.unwrap();
    assert!(config.onboarding_complete);
    assert_eq!(config.execution_mode, ExecutionMode::Autonomous);
    assert_eq!(config.target.unwrap().name, "app");
}
