use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("queue full for project {project}")]
    QueueFull { project: String },

    #[error("rate limit exceeded for user {user_id}")]
    RateLimited { user_id: String },

    #[error("daily budget exceeded for project {project}")]
    BudgetExceeded { project: String },

    #[error("channel {channel} not bound to any project")]
    Unbound { channel: String },

    #[error("sandbox rejected command: {reason}")]
    SandboxRejected { reason: String },

    #[error("agent run timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("agent run aborted")]
    Aborted,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short error code string suitable for logs and webhook payloads.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "CONFIG_ERROR",
            RelayError::Database(_) => "DATABASE_ERROR",
            RelayError::QueueFull { .. } => "QUEUE_FULL",
            RelayError::RateLimited { .. } => "RATE_LIMITED",
            RelayError::BudgetExceeded { .. } => "BUDGET_EXCEEDED",
            RelayError::Unbound { .. } => "UNBOUND",
            RelayError::SandboxRejected { .. } => "SANDBOX_REJECTED",
            RelayError::Timeout { .. } => "TIMEOUT",
            RelayError::Aborted => "ABORTED",
            RelayError::Serialization(_) => "SERIALIZATION_ERROR",
            RelayError::Io(_) => "IO_ERROR",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
