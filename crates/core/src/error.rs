//! Error types for the CronBot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant, and every error maps onto
//! one [`ErrorClass`] so the control loop can decide how to react.

use thiserror::Error;

/// The top-level error type for all CronBot operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Reasoning oracle errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- State store errors ---
    #[error("State error: {0}")]
    State(#[from] StateError),

    // --- Work source errors ---
    #[error("Work source error: {0}")]
    WorkSource(#[from] WorkSourceError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// How a failure should be treated by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network or timeout on the oracle or a tool; retried after a backoff.
    Transient,
    /// Approval required; a deferred-execution signal rather than a fault.
    Policy,
    /// A blocker was detected; handled by cooldown and counter reset.
    StuckPattern,
    /// Missing credential or endpoint; fatal before the loop starts.
    Configuration,
    /// Unreadable persisted state; recovered by falling back to defaults.
    DataCorruption,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Policy => "policy",
            Self::StuckPattern => "stuck_pattern",
            Self::Configuration => "configuration",
            Self::DataCorruption => "data_corruption",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for the loop's failure handling.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Provider(ProviderError::AuthenticationFailed(_))
            | Error::Provider(ProviderError::NotConfigured(_)) => ErrorClass::Configuration,
            Error::Provider(_) => ErrorClass::Transient,
            Error::Tool(ToolError::ApprovalRequired { .. }) => ErrorClass::Policy,
            Error::Tool(_) => ErrorClass::Transient,
            Error::State(StateError::Corrupted { .. }) => ErrorClass::DataCorruption,
            Error::State(_) => ErrorClass::Transient,
            Error::WorkSource(_) => ErrorClass::Transient,
            Error::Config { .. } => ErrorClass::Configuration,
            Error::Serialization(_) => ErrorClass::DataCorruption,
            Error::Internal(_) => ErrorClass::Transient,
        }
    }

    /// Short machine-readable name of the variant, for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Provider(_) => "provider",
            Error::Tool(_) => "tool",
            Error::State(_) => "state",
            Error::WorkSource(_) => "work_source",
            Error::Config { .. } => "config",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_)
            | ProviderError::Network(_) => true,
            ProviderError::ApiError { status_code, .. } => *status_code >= 500,
            ProviderError::AuthenticationFailed(_)
            | ProviderError::NotConfigured(_)
            | ProviderError::MalformedResponse(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found in any registered server")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Approval required for {tool_name}: {reason}")]
    ApprovalRequired { tool_name: String, reason: String },

    #[error("No pending approval found with ID '{0}'")]
    ApprovalNotFound(String),

    #[error("Operation rejected by operator: {0}")]
    Rejected(String),

    #[error("Provider '{provider_id}' connection failed: {reason}")]
    ConnectionFailed { provider_id: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Storage I/O failed at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Persisted record at {path} is corrupted: {reason}")]
    Corrupted { path: String, reason: String },

    #[error("Failed to serialize state: {0}")]
    Serialization(String),
}

#[derive(Debug, Error)]
pub enum WorkSourceError {
    #[error("Work source request failed: {0}")]
    Request(String),

    #[error("Work source returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Work source response could not be decoded: {0}")]
    Decode(String),
}
