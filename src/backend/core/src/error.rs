//! Error handling for Medic Core.
//!
//! This module provides:
//! - A structured error type shared by all four services
//! - Machine-readable error codes grouped by domain
//! - HTTP status mapping for the Executor's REST surface
//! - gRPC status mapping for the tonic services
//! - Severity-driven logging and metrics integration

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Medic operations.
pub type Result<T> = std::result::Result<T, MedicError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
///
/// These codes are stable and can be used by clients for programmatic error
/// handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Adapter Errors (1000-1099)
    AdapterConnectionFailed,
    AdapterQueryFailed,
    AdapterUnsupportedDatabase,
    CollectFailed,
    CollectTimeout,

    // Detection Errors (1100-1199)
    DetectorFailed,
    DetectionNotFound,
    DuplicateDetection,

    // Action Errors (1200-1299)
    ActionNotSupported,
    ActionNotFound,
    ActionValidationFailed,
    ActionExecutionFailed,
    ActionTimeout,
    IndexAlreadyExists,
    IndexNotFound,
    PidNotFound,
    ConfigAlreadyOptimal,
    RollbackNotAllowed,
    InvalidStatusTransition,
    DuplicateAction,
    QueueFull,

    // Verification Errors (1300-1399)
    VerificationNotFound,

    // Knowledge Errors (2000-2099)
    KnowledgeUnavailable,
    RecordNotFound,
    DuplicateRecord,

    // Event Bus Errors (2100-2199)
    BusUnavailable,
    PublishFailed,
    SubscribeFailed,

    // RPC / Serialization Errors (2200-2299)
    RpcUnavailable,
    RpcFailed,
    SerializationError,
    DeserializationError,

    // Container Orchestrator Errors (3000-3099)
    ContainerRuntimeUnavailable,
    ImagePullFailed,
    ContainerOperationFailed,
    ContainerNotFound,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
    NotImplemented,
    Timeout,
    ShuttingDown,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            // Adapter
            Self::AdapterConnectionFailed => 1000,
            Self::AdapterQueryFailed => 1001,
            Self::AdapterUnsupportedDatabase => 1002,
            Self::CollectFailed => 1003,
            Self::CollectTimeout => 1004,

            // Detection
            Self::DetectorFailed => 1100,
            Self::DetectionNotFound => 1101,
            Self::DuplicateDetection => 1102,

            // Action
            Self::ActionNotSupported => 1200,
            Self::ActionNotFound => 1201,
            Self::ActionValidationFailed => 1202,
            Self::ActionExecutionFailed => 1203,
            Self::ActionTimeout => 1204,
            Self::IndexAlreadyExists => 1205,
            Self::IndexNotFound => 1206,
            Self::PidNotFound => 1207,
            Self::ConfigAlreadyOptimal => 1208,
            Self::RollbackNotAllowed => 1209,
            Self::InvalidStatusTransition => 1210,
            Self::DuplicateAction => 1211,
            Self::QueueFull => 1212,

            // Verification
            Self::VerificationNotFound => 1300,

            // Knowledge
            Self::KnowledgeUnavailable => 2000,
            Self::RecordNotFound => 2001,
            Self::DuplicateRecord => 2002,

            // Bus
            Self::BusUnavailable => 2100,
            Self::PublishFailed => 2101,
            Self::SubscribeFailed => 2102,

            // RPC
            Self::RpcUnavailable => 2200,
            Self::RpcFailed => 2201,
            Self::SerializationError => 2202,
            Self::DeserializationError => 2203,

            // Container
            Self::ContainerRuntimeUnavailable => 3000,
            Self::ImagePullFailed => 3001,
            Self::ContainerOperationFailed => 3002,
            Self::ContainerNotFound => 3003,

            // Configuration
            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            // Internal
            Self::InternalError => 9000,
            Self::NotImplemented => 9001,
            Self::Timeout => 9002,
            Self::ShuttingDown => 9003,
        }
    }

    /// Get the HTTP status code for this error (Executor REST surface).
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Not Found (404)
            Self::ActionNotFound
            | Self::DetectionNotFound
            | Self::IndexNotFound
            | Self::PidNotFound
            | Self::RecordNotFound
            | Self::VerificationNotFound
            | Self::ContainerNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::DuplicateDetection
            | Self::DuplicateAction
            | Self::DuplicateRecord
            | Self::IndexAlreadyExists
            | Self::InvalidStatusTransition
            | Self::RollbackNotAllowed => StatusCode::CONFLICT,

            // Unprocessable Entity (422)
            Self::ActionValidationFailed | Self::ConfigAlreadyOptimal => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // Too Many Requests (429)
            Self::QueueFull => StatusCode::TOO_MANY_REQUESTS,

            // Timeout (504)
            Self::CollectTimeout | Self::ActionTimeout | Self::Timeout => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // Not Implemented (501)
            Self::ActionNotSupported | Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,

            // Service Unavailable (503)
            Self::AdapterConnectionFailed
            | Self::KnowledgeUnavailable
            | Self::BusUnavailable
            | Self::RpcUnavailable
            | Self::ContainerRuntimeUnavailable
            | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,

            // Bad Gateway (502)
            Self::AdapterQueryFailed
            | Self::CollectFailed
            | Self::ImagePullFailed
            | Self::ContainerOperationFailed
            | Self::RpcFailed => StatusCode::BAD_GATEWAY,

            // Internal Server Error (500)
            Self::AdapterUnsupportedDatabase
            | Self::DetectorFailed
            | Self::ActionExecutionFailed
            | Self::PublishFailed
            | Self::SubscribeFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the gRPC status code for this error.
    pub const fn grpc_code(&self) -> tonic::Code {
        match self {
            Self::ActionNotFound
            | Self::DetectionNotFound
            | Self::IndexNotFound
            | Self::PidNotFound
            | Self::RecordNotFound
            | Self::VerificationNotFound
            | Self::ContainerNotFound => tonic::Code::NotFound,

            Self::DuplicateDetection
            | Self::DuplicateAction
            | Self::DuplicateRecord
            | Self::IndexAlreadyExists => tonic::Code::AlreadyExists,

            Self::InvalidStatusTransition | Self::RollbackNotAllowed => {
                tonic::Code::FailedPrecondition
            }

            Self::ActionValidationFailed
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration => tonic::Code::InvalidArgument,

            Self::QueueFull => tonic::Code::ResourceExhausted,

            Self::CollectTimeout | Self::ActionTimeout | Self::Timeout => {
                tonic::Code::DeadlineExceeded
            }

            Self::ActionNotSupported | Self::NotImplemented => tonic::Code::Unimplemented,

            Self::AdapterConnectionFailed
            | Self::KnowledgeUnavailable
            | Self::BusUnavailable
            | Self::RpcUnavailable
            | Self::ContainerRuntimeUnavailable
            | Self::ShuttingDown => tonic::Code::Unavailable,

            _ => tonic::Code::Internal,
        }
    }

    /// Check if this error is retryable.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AdapterConnectionFailed
                | Self::AdapterQueryFailed
                | Self::CollectFailed
                | Self::CollectTimeout
                | Self::KnowledgeUnavailable
                | Self::BusUnavailable
                | Self::PublishFailed
                | Self::RpcUnavailable
                | Self::RpcFailed
                | Self::ContainerRuntimeUnavailable
                | Self::Timeout
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "adapter",
            1100..=1199 => "detection",
            1200..=1299 => "action",
            1300..=1399 => "verification",
            2000..=2099 => "knowledge",
            2100..=2199 => "bus",
            2200..=2299 => "rpc",
            3000..=3099 => "container",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging and alerting).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected operational conditions (not found, already exists)
    Low,
    /// Per-cycle transient failures (skip and continue)
    Medium,
    /// System errors (execution failures, serialization bugs)
    High,
    /// Errors that make a service non-functional
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            // Low severity - semantic, surfaced but expected
            ErrorCode::ActionNotFound
            | ErrorCode::DetectionNotFound
            | ErrorCode::IndexAlreadyExists
            | ErrorCode::IndexNotFound
            | ErrorCode::PidNotFound
            | ErrorCode::ConfigAlreadyOptimal
            | ErrorCode::ActionNotSupported
            | ErrorCode::RollbackNotAllowed
            | ErrorCode::DuplicateDetection
            | ErrorCode::DuplicateAction
            | ErrorCode::DuplicateRecord
            | ErrorCode::RecordNotFound
            | ErrorCode::VerificationNotFound
            | ErrorCode::ActionValidationFailed
            | ErrorCode::NotImplemented => Self::Low,

            // Medium severity - transient, retried or skipped
            ErrorCode::AdapterQueryFailed
            | ErrorCode::CollectFailed
            | ErrorCode::CollectTimeout
            | ErrorCode::PublishFailed
            | ErrorCode::SubscribeFailed
            | ErrorCode::RpcFailed
            | ErrorCode::QueueFull
            | ErrorCode::ActionTimeout
            | ErrorCode::Timeout
            | ErrorCode::ShuttingDown => Self::Medium,

            // High severity - system errors
            ErrorCode::AdapterUnsupportedDatabase
            | ErrorCode::DetectorFailed
            | ErrorCode::ActionExecutionFailed
            | ErrorCode::InvalidStatusTransition
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ImagePullFailed
            | ErrorCode::ContainerOperationFailed
            | ErrorCode::ContainerNotFound
            | ErrorCode::ContainerRuntimeUnavailable
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            // Critical severity - a required dependency is gone
            ErrorCode::AdapterConnectionFailed
            | ErrorCode::KnowledgeUnavailable
            | ErrorCode::BusUnavailable
            | ErrorCode::RpcUnavailable
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (action, detection, database)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Retry information
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Medic Core.
#[derive(Error, Debug)]
pub struct MedicError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-facing error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for MedicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl MedicError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::InternalError,
            "An internal error occurred",
            message,
        )
    }

    /// Create a not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Domain Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// The adapter does not declare the capability an action requires.
    pub fn action_not_supported(action_type: &str, capability: &str) -> Self {
        Self::new(
            ErrorCode::ActionNotSupported,
            format!(
                "Action {} not supported: adapter lacks capability {}",
                action_type, capability
            ),
        )
        .with_context("capability", capability)
    }

    /// An index with the requested name is already present.
    pub fn index_already_exists(index_name: &str) -> Self {
        Self::new(
            ErrorCode::IndexAlreadyExists,
            format!("Index already exists: {}", index_name),
        )
        .with_details(ErrorDetails::new().with_entity("index", index_name))
    }

    /// A backend process id was not found on the target database.
    pub fn pid_not_found(pid: i64) -> Self {
        Self::new(ErrorCode::PidNotFound, format!("Backend pid not found: {}", pid))
            .with_context("pid", pid)
    }

    /// Every tunable parameter is already at its computed optimum.
    pub fn already_optimal() -> Self {
        Self::new(
            ErrorCode::ConfigAlreadyOptimal,
            "Runtime configuration is already at the computed optimum",
        )
    }

    /// The dispatch queue is at capacity.
    pub fn queue_full(queued: usize, capacity: usize) -> Self {
        Self::new(
            ErrorCode::QueueFull,
            format!("Dispatch queue full: {} of {} slots in use", queued, capacity),
        )
        .with_context("queued", queued)
        .with_context("capacity", capacity)
        .with_details(ErrorDetails::new().with_retry_after(5))
    }

    /// An action status transition not present in the lifecycle DAG.
    pub fn invalid_transition(from: &str, to: &str) -> Self {
        Self::new(
            ErrorCode::InvalidStatusTransition,
            format!("Invalid action status transition: {} -> {}", from, to),
        )
        .with_context("from_status", from)
        .with_context("to_status", to)
    }

    /// Rollback requested for an action that is not completed or not
    /// rollback-capable.
    pub fn rollback_not_allowed(action_id: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::RollbackNotAllowed,
            format!("Rollback not allowed for {}: {}", action_id, reason),
        )
        .with_details(ErrorDetails::new().with_entity("action", action_id))
    }

    /// An action was not found.
    pub fn action_not_found(action_id: &str) -> Self {
        Self::new(
            ErrorCode::ActionNotFound,
            format!("Action not found: {}", action_id),
        )
        .with_details(ErrorDetails::new().with_entity("action", action_id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Get the user-facing message.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Get the internal message (if any).
    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Get the error details.
    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    /// Get the HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "Critical error"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    /// Record error metrics.
    fn record_metrics(&self) {
        counter!(
            "medic_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for REST clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Whether the request was successful (always false for errors)
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for REST responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Machine-readable error code
    pub code: ErrorCode,

    /// Numeric error code
    pub numeric_code: u32,

    /// User-facing error message
    pub message: String,

    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&MedicError> for ErrorResponse {
    fn from(error: &MedicError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.context.is_empty()
                    && error.details.entity_id.is_none()
                    && error.details.retry_after_secs.is_none()
                {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum / Tonic Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for MedicError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

impl From<MedicError> for tonic::Status {
    fn from(error: MedicError) -> Self {
        error.log();
        tonic::Status::new(error.code.grpc_code(), error.user_message.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for MedicError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => {
                (ErrorCode::RecordNotFound, "The requested row was not found")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::AdapterConnectionFailed,
                "Unable to reach the target database",
            ),
            sqlx::Error::Database(db_err) => {
                // 42P07: duplicate_table covers CREATE INDEX name collisions
                if db_err.code().as_deref() == Some("42P07") {
                    return Self::with_internal(
                        ErrorCode::IndexAlreadyExists,
                        "An object with this name already exists",
                        db_err.to_string(),
                    )
                    .with_source(error);
                }
                (ErrorCode::AdapterQueryFailed, "A database query failed")
            }
            _ => (ErrorCode::AdapterQueryFailed, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<redis::RedisError> for MedicError {
    fn from(error: redis::RedisError) -> Self {
        let (code, user_msg) = if error.is_connection_refusal() || error.is_connection_dropped() {
            (ErrorCode::BusUnavailable, "Unable to reach the event bus")
        } else if error.is_timeout() {
            (ErrorCode::PublishFailed, "Event bus operation timed out")
        } else {
            (ErrorCode::PublishFailed, "An event bus error occurred")
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for MedicError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON payload", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for MedicError {
    fn from(error: reqwest::Error) -> Self {
        let (code, user_msg) = if error.is_timeout() {
            (
                ErrorCode::ContainerOperationFailed,
                "Container runtime request timed out",
            )
        } else if error.is_connect() {
            (
                ErrorCode::ContainerRuntimeUnavailable,
                "Failed to connect to the container runtime",
            )
        } else {
            (
                ErrorCode::ContainerOperationFailed,
                "Container runtime returned an error",
            )
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<tonic::Status> for MedicError {
    fn from(status: tonic::Status) -> Self {
        let code = match status.code() {
            tonic::Code::NotFound => ErrorCode::RecordNotFound,
            tonic::Code::AlreadyExists => ErrorCode::DuplicateRecord,
            tonic::Code::Unavailable => ErrorCode::RpcUnavailable,
            tonic::Code::DeadlineExceeded => ErrorCode::Timeout,
            tonic::Code::Unimplemented => ErrorCode::NotImplemented,
            tonic::Code::InvalidArgument => ErrorCode::InvalidConfiguration,
            _ => ErrorCode::RpcFailed,
        };

        Self::with_internal(code, "RPC call failed", status.message().to_string())
            .with_source(status)
    }
}

impl From<tonic::transport::Error> for MedicError {
    fn from(error: tonic::transport::Error) -> Self {
        Self::with_internal(
            ErrorCode::RpcUnavailable,
            "RPC transport error",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for MedicError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::Timeout, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for MedicError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::RecordNotFound, "File or resource not found"),
            ErrorKind::TimedOut => (ErrorCode::Timeout, "Operation timed out"),
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                (ErrorCode::RpcUnavailable, "Connection failed")
            }
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for MedicError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (
                ErrorCode::ConfigurationError,
                "Configuration error occurred",
            ),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

impl From<anyhow::Error> for MedicError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<MedicError>() {
            Ok(medic_error) => medic_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(
            ErrorCode::ActionNotFound.http_status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ErrorCode::IndexAlreadyExists.http_status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ErrorCode::QueueFull.http_status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::ActionNotSupported.http_status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            ErrorCode::InternalError.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_code_grpc_mapping() {
        assert_eq!(ErrorCode::ActionNotFound.grpc_code(), tonic::Code::NotFound);
        assert_eq!(
            ErrorCode::DuplicateDetection.grpc_code(),
            tonic::Code::AlreadyExists
        );
        assert_eq!(
            ErrorCode::QueueFull.grpc_code(),
            tonic::Code::ResourceExhausted
        );
        assert_eq!(
            ErrorCode::BusUnavailable.grpc_code(),
            tonic::Code::Unavailable
        );
    }

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::CollectFailed.is_retryable());
        assert!(ErrorCode::BusUnavailable.is_retryable());
        assert!(!ErrorCode::IndexAlreadyExists.is_retryable());
        assert!(!ErrorCode::ActionNotSupported.is_retryable());
    }

    #[test]
    fn test_domain_constructors() {
        let error = MedicError::action_not_supported("create_index", "SupportsIndexes");
        assert_eq!(error.code(), ErrorCode::ActionNotSupported);
        assert!(error.user_message().contains("SupportsIndexes"));

        let error = MedicError::index_already_exists("idx_db1_users_email");
        assert_eq!(error.code(), ErrorCode::IndexAlreadyExists);
        assert_eq!(
            error.details().entity_id.as_deref(),
            Some("idx_db1_users_email")
        );

        let error = MedicError::queue_full(8, 8);
        assert_eq!(error.code(), ErrorCode::QueueFull);
        assert_eq!(error.details().retry_after_secs, Some(5));
    }

    #[test]
    fn test_invalid_transition() {
        let error = MedicError::invalid_transition("queued", "rolled_back");
        assert_eq!(error.code(), ErrorCode::InvalidStatusTransition);
        assert!(error.details().context.contains_key("from_status"));
        assert!(error.details().context.contains_key("to_status"));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::IndexAlreadyExists),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::CollectFailed),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ActionExecutionFailed),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::BusUnavailable),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let error = MedicError::action_not_found("action-42");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("ACTION_NOT_FOUND"));
        assert!(json.contains("action-42"));
    }

    #[test]
    fn test_error_display() {
        let error = MedicError::with_internal(
            ErrorCode::AdapterQueryFailed,
            "A database query failed",
            "relation \"users\" does not exist",
        );

        let display = format!("{}", error);
        assert!(display.contains("AdapterQueryFailed"));
        assert!(display.contains("A database query failed"));
        assert!(display.contains("does not exist"));
    }

    #[test]
    fn test_tonic_status_round_trip() {
        let error = MedicError::action_not_found("action-7");
        let status: tonic::Status = error.into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let back: MedicError = status.into();
        assert_eq!(back.code(), ErrorCode::RecordNotFound);
    }

    #[test]
    fn test_category() {
        assert_eq!(ErrorCode::CollectFailed.category(), "adapter");
        assert_eq!(ErrorCode::QueueFull.category(), "action");
        assert_eq!(ErrorCode::BusUnavailable.category(), "bus");
        assert_eq!(ErrorCode::ImagePullFailed.category(), "container");
    }
}
