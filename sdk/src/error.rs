//! Error types for the Flowlane engine

pub use flowlane_core::CoreError;
use flowlane_core::Retryable;

/// Main error type for the Flowlane engine
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// Workflow is suspended waiting for a task, timer, child or signal
    #[error("Workflow suspended: {reason}")]
    Suspended { reason: String },

    /// A long-poll returned without a task
    #[error("Poll timed out without a task")]
    PollTimeout,

    /// The targeted resource no longer exists
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    /// The service throttled the call
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Unexpected service fault
    #[error("Response error ({code}): {message}")]
    Response { code: String, message: String },

    /// An activity, timer or child ended in failure
    #[error("Task failed: {id}: {reason}")]
    TaskFailed {
        id: String,
        reason: String,
        details: Option<String>,
    },

    /// An activity or timer ran out of time
    #[error("Task timed out: {id}")]
    TaskTimedOut { id: String },

    /// An activity was canceled
    #[error("Task canceled: {id}")]
    TaskCanceled { id: String },

    /// Child workflow failed
    #[error("Child workflow failed: {workflow_id}: {reason}")]
    ChildWorkflowFailed { workflow_id: String, reason: String },

    /// Workflow execution failed
    #[error("Workflow failed: {0}")]
    WorkflowFailed(String),

    /// Workflow gave up after a cancellation request
    #[error("Workflow canceled: {0}")]
    WorkflowCanceled(String),

    /// Workflow definition not found
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Activity definition not found
    #[error("Activity not found: {0}")]
    ActivityNotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Flowlane operations
pub type Result<T> = std::result::Result<T, FlowError>;

impl From<CoreError> for FlowError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::PollTimeout => FlowError::PollTimeout,
            CoreError::DoesNotExist(msg) => FlowError::DoesNotExist(msg),
            CoreError::RateLimitExceeded(msg) => FlowError::RateLimitExceeded(msg),
            CoreError::Response { code, message } => FlowError::Response { code, message },
            CoreError::Serialization(e) => FlowError::Serialization(e),
            CoreError::Io(e) => FlowError::Io(e),
            CoreError::InvalidConfiguration(msg) => FlowError::InvalidConfiguration(msg),
            CoreError::Timeout(msg) => FlowError::Timeout(msg),
            CoreError::Other(msg) => FlowError::Other(msg),
        }
    }
}

impl FlowError {
    /// Whether this is the replay suspension signal rather than a failure
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    /// Short machine-readable name of the variant, used in failure reasons
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Suspended { .. } => "Suspended",
            Self::PollTimeout => "PollTimeout",
            Self::DoesNotExist(_) => "DoesNotExistError",
            Self::RateLimitExceeded(_) => "RateLimitExceededError",
            Self::Response { .. } => "ResponseError",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::TaskTimedOut { .. } => "TaskTimedOut",
            Self::TaskCanceled { .. } => "TaskCanceled",
            Self::ChildWorkflowFailed { .. } => "ChildWorkflowFailed",
            Self::WorkflowFailed(_) => "WorkflowFailed",
            Self::WorkflowCanceled(_) => "WorkflowCanceled",
            Self::WorkflowNotFound(_) => "WorkflowNotFound",
            Self::ActivityNotFound(_) => "ActivityNotFound",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::Timeout(_) => "Timeout",
            Self::Other(_) => "Error",
        }
    }
}

impl Retryable for FlowError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded(_) | Self::Response { .. } | Self::Io(_) | Self::Timeout(_)
        )
    }

    fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded(_))
    }

    fn kind(&self) -> &'static str {
        FlowError::kind(self)
    }
}
