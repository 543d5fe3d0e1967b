//! Detections and typed remediation plans.
//!
//! A detection is a detector's verdict on one snapshot. Its remediation is a
//! tagged [`ActionPlan`] so the type system guarantees, for example, that a
//! `create_index` plan carries a table and a column; the string-keyed
//! `evidence` map stays generic for pass-through values only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════════════════════════
// Category & Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// The health dimension a detection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Connection,
    Query,
    Storage,
    Cache,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Storage => "storage",
            Self::Cache => "cache",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "connection" => Some(Self::Connection),
            "query" => Some(Self::Query),
            "storage" => Some(Self::Storage),
            "cache" => Some(Self::Cache),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detection severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Action Plans
// ═══════════════════════════════════════════════════════════════════════════════

/// Priority hint for index creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPriority {
    Low,
    Medium,
    High,
}

impl IndexPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// The typed remediation a detection asks for.
///
/// Serialised on the wire as an `action_type` tag plus a string metadata map;
/// [`ActionPlan::from_tag`] parses the pair back, falling to [`ActionPlan::Unknown`]
/// for tags this build does not implement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "plan", rename_all = "snake_case")]
pub enum ActionPlan {
    CreateIndex {
        table_name: String,
        column_name: String,
        priority: IndexPriority,
    },
    VacuumTable {
        table_name: String,
    },
    TerminateQuery {
        pid: i64,
        graceful: bool,
    },
    TuneConfigHighLatency,
    DeployConnectionPooler {
        max_client_connections: u32,
    },
    DeployCache {
        max_memory_mb: u32,
    },
    /// Suggestion-only remediation; the tag names the suggestion family
    /// (e.g. `cache_optimization_recommendation`).
    Recommendation {
        action_type: String,
        text: String,
    },
    /// An action type this build does not implement; acknowledged and stored,
    /// never executed.
    Unknown {
        action_type: String,
        metadata: HashMap<String, String>,
    },
}

impl ActionPlan {
    /// The dispatch tag for this plan.
    pub fn action_type(&self) -> &str {
        match self {
            Self::CreateIndex { .. } => "create_index",
            Self::VacuumTable { .. } => "vacuum_table",
            Self::TerminateQuery { .. } => "terminate_query",
            Self::TuneConfigHighLatency => "tune_config_high_latency",
            Self::DeployConnectionPooler { .. } => "deploy_connection_pooler",
            Self::DeployCache { .. } => "deploy_cache",
            Self::Recommendation { action_type, .. } => action_type.as_str(),
            Self::Unknown { action_type, .. } => action_type.as_str(),
        }
    }

    /// Flatten this plan into the wire metadata map.
    pub fn metadata(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        match self {
            Self::CreateIndex {
                table_name,
                column_name,
                priority,
            } => {
                map.insert("table_name".to_string(), table_name.clone());
                map.insert("column_name".to_string(), column_name.clone());
                map.insert("priority".to_string(), priority.as_str().to_string());
            }
            Self::VacuumTable { table_name } => {
                map.insert("table_name".to_string(), table_name.clone());
            }
            Self::TerminateQuery { pid, graceful } => {
                map.insert("pid".to_string(), pid.to_string());
                map.insert("graceful".to_string(), graceful.to_string());
            }
            Self::TuneConfigHighLatency => {}
            Self::DeployConnectionPooler {
                max_client_connections,
            } => {
                map.insert(
                    "max_client_connections".to_string(),
                    max_client_connections.to_string(),
                );
            }
            Self::DeployCache { max_memory_mb } => {
                map.insert("max_memory_mb".to_string(), max_memory_mb.to_string());
            }
            Self::Recommendation { text, .. } => {
                map.insert("text".to_string(), text.clone());
            }
            Self::Unknown { metadata, .. } => {
                map.extend(metadata.clone());
            }
        }
        map
    }

    /// Rebuild a plan from its wire tag and metadata.
    ///
    /// Tags with missing required metadata degrade to [`ActionPlan::Unknown`]
    /// so malformed detections surface as `pending_implementation` instead of
    /// being silently dropped.
    pub fn from_tag(action_type: &str, metadata: &HashMap<String, String>) -> Self {
        let unknown = || Self::Unknown {
            action_type: action_type.to_string(),
            metadata: metadata.clone(),
        };

        match action_type {
            "create_index" => {
                match (metadata.get("table_name"), metadata.get("column_name")) {
                    (Some(table), Some(column)) => Self::CreateIndex {
                        table_name: table.clone(),
                        column_name: column.clone(),
                        priority: metadata
                            .get("priority")
                            .map(|p| IndexPriority::from_tag(p))
                            .unwrap_or(IndexPriority::Medium),
                    },
                    _ => unknown(),
                }
            }
            "vacuum_table" => match metadata.get("table_name") {
                Some(table) => Self::VacuumTable {
                    table_name: table.clone(),
                },
                None => unknown(),
            },
            "terminate_query" => match metadata.get("pid").and_then(|p| p.parse::<i64>().ok()) {
                Some(pid) => Self::TerminateQuery {
                    pid,
                    graceful: metadata
                        .get("graceful")
                        .map(|g| g == "true")
                        .unwrap_or(true),
                },
                None => unknown(),
            },
            "tune_config_high_latency" => Self::TuneConfigHighLatency,
            "deploy_connection_pooler" | "deploy_pgbouncer" => Self::DeployConnectionPooler {
                max_client_connections: metadata
                    .get("max_client_connections")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(100),
            },
            "deploy_cache" | "deploy_redis" => Self::DeployCache {
                max_memory_mb: metadata
                    .get("max_memory_mb")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(256),
            },
            tag if tag.ends_with("recommendation") => Self::Recommendation {
                action_type: tag.to_string(),
                text: metadata.get("text").cloned().unwrap_or_default(),
            },
            _ => unknown(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Detection
// ═══════════════════════════════════════════════════════════════════════════════

/// A detector's verdict on one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    /// Stable detector identifier; part of the deduplication key.
    pub detector_name: String,
    pub category: Category,
    pub severity: Severity,
    pub database_id: String,
    pub detected_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    /// Pass-through evidence values backing the verdict.
    #[serde(default)]
    pub evidence: HashMap<String, String>,
    /// The typed remediation plan.
    pub plan: ActionPlan,
}

impl Detection {
    /// Create a detection with a fresh id, stamped now.
    pub fn new(
        detector_name: impl Into<String>,
        category: Category,
        severity: Severity,
        database_id: impl Into<String>,
        plan: ActionPlan,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            detector_name: detector_name.into(),
            category,
            severity,
            database_id: database_id.into(),
            detected_at: Utc::now(),
            title: String::new(),
            description: String::new(),
            recommendation: String::new(),
            evidence: HashMap::new(),
            plan,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_evidence(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.evidence.insert(key.into(), value.to_string());
        self
    }

    /// The dispatch tag of this detection's plan.
    pub fn action_type(&self) -> &str {
        self.plan.action_type()
    }

    /// Derive the stable deduplication key: `database_id:detector_name:identifier`.
    ///
    /// The identifier prefers the most specific available value: a
    /// `table.column` pair, then a bare table, then a query fingerprint, then
    /// the category.
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.database_id,
            self.detector_name,
            self.issue_identifier()
        )
    }

    fn issue_identifier(&self) -> String {
        if let Some(pair) = self.table_column_identifier() {
            return pair;
        }
        if let Some(table) = self.table_identifier() {
            return table;
        }
        if let Some(hash) = self.evidence.get("query_hash") {
            return hash.clone();
        }
        self.category.as_str().to_string()
    }

    fn table_column_identifier(&self) -> Option<String> {
        if let ActionPlan::CreateIndex {
            table_name,
            column_name,
            ..
        } = &self.plan
        {
            return Some(format!("{}.{}", table_name, column_name));
        }
        match (
            self.evidence.get("table_name"),
            self.evidence.get("column_name"),
        ) {
            (Some(table), Some(column)) => Some(format!("{}.{}", table, column)),
            _ => None,
        }
    }

    fn table_identifier(&self) -> Option<String> {
        if let ActionPlan::VacuumTable { table_name } = &self.plan {
            return Some(table_name.clone());
        }
        self.evidence.get("table_name").cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_plan_round_trip_create_index() {
        let plan = ActionPlan::CreateIndex {
            table_name: "users".to_string(),
            column_name: "email".to_string(),
            priority: IndexPriority::High,
        };

        let parsed = ActionPlan::from_tag(plan.action_type(), &plan.metadata());
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_plan_round_trip_terminate_query() {
        let plan = ActionPlan::TerminateQuery {
            pid: 4242,
            graceful: false,
        };

        let parsed = ActionPlan::from_tag(plan.action_type(), &plan.metadata());
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_create_index_without_column_degrades_to_unknown() {
        let plan = ActionPlan::from_tag("create_index", &metadata(&[("table_name", "users")]));
        assert!(matches!(plan, ActionPlan::Unknown { .. }));
    }

    #[test]
    fn test_pooler_aliases() {
        let plan = ActionPlan::from_tag("deploy_pgbouncer", &HashMap::new());
        assert!(matches!(plan, ActionPlan::DeployConnectionPooler { .. }));

        let plan = ActionPlan::from_tag("deploy_redis", &HashMap::new());
        assert!(matches!(plan, ActionPlan::DeployCache { .. }));
    }

    #[test]
    fn test_recommendation_keeps_its_tag() {
        let plan = ActionPlan::from_tag(
            "cache_optimization_recommendation",
            &metadata(&[("text", "resize shared_buffers")]),
        );
        assert_eq!(plan.action_type(), "cache_optimization_recommendation");
        assert!(matches!(plan, ActionPlan::Recommendation { .. }));
    }

    #[test]
    fn test_unknown_tag_keeps_metadata() {
        let plan = ActionPlan::from_tag("foobar", &metadata(&[("a", "1")]));
        match &plan {
            ActionPlan::Unknown {
                action_type,
                metadata,
            } => {
                assert_eq!(action_type, "foobar");
                assert_eq!(metadata.get("a").map(String::as_str), Some("1"));
            }
            other => panic!("expected unknown plan, got {:?}", other),
        }
    }

    #[test]
    fn test_key_prefers_table_column() {
        let detection = Detection::new(
            "missing_index",
            Category::Query,
            Severity::Warning,
            "db-1",
            ActionPlan::CreateIndex {
                table_name: "users".to_string(),
                column_name: "email".to_string(),
                priority: IndexPriority::High,
            },
        );

        assert_eq!(detection.key(), "db-1:missing_index:users.email");
    }

    #[test]
    fn test_key_falls_back_to_table() {
        let detection = Detection::new(
            "table_bloat",
            Category::Storage,
            Severity::Warning,
            "db-1",
            ActionPlan::VacuumTable {
                table_name: "orders".to_string(),
            },
        );

        assert_eq!(detection.key(), "db-1:table_bloat:orders");
    }

    #[test]
    fn test_key_falls_back_to_query_hash_then_category() {
        let detection = Detection::new(
            "high_latency",
            Category::Query,
            Severity::Info,
            "db-1",
            ActionPlan::TuneConfigHighLatency,
        )
        .with_evidence("query_hash", "deadbeefcafe0123");

        assert_eq!(detection.key(), "db-1:high_latency:deadbeefcafe0123");

        let detection = Detection::new(
            "cache_miss_rate_high",
            Category::Cache,
            Severity::Info,
            "db-1",
            ActionPlan::Recommendation {
                action_type: "cache_optimization_recommendation".to_string(),
                text: String::new(),
            },
        );

        assert_eq!(detection.key(), "db-1:cache_miss_rate_high:cache");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }
}
