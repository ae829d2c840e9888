//! Core error types for the Flowlane workflow engine
//!
//! The taxonomy mirrors the fault codes returned by the task exchange service.
//! Transport implementations translate service faults with
//! [`CoreError::from_fault`] so that the engine only ever reasons about the
//! variants below.

/// Fault code returned when a domain, type, execution or task is unknown
pub const UNKNOWN_RESOURCE_FAULT: &str = "UnknownResourceFault";
/// Fault code returned when a workflow or activity type is deprecated
pub const TYPE_DEPRECATED_FAULT: &str = "TypeDeprecatedFault";
/// Fault code returned when the caller is throttled
pub const THROTTLING_EXCEPTION: &str = "ThrottlingException";

/// Core error type for service operations
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A long-poll returned without a task. Expected, not a failure.
    #[error("Poll timed out without a task")]
    PollTimeout,

    /// The targeted resource (execution, task, type) no longer exists
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    /// The service throttled the call
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Any other fault reported by the service
    #[error("Response error ({code}): {message}")]
    Response { code: String, message: String },

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

/// Result type alias for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Translate a service fault code into the engine's taxonomy.
    pub fn from_fault(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            UNKNOWN_RESOURCE_FAULT | TYPE_DEPRECATED_FAULT => Self::DoesNotExist(message),
            THROTTLING_EXCEPTION => Self::RateLimitExceeded(message),
            _ => Self::Response {
                code: code.to_string(),
                message,
            },
        }
    }

    /// Whether a transport-level retry can help.
    ///
    /// Missing resources, bad payloads and bad configuration never heal by
    /// retrying the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded(_) | Self::Response { .. } | Self::Io(_) | Self::Timeout(_)
        )
    }

    /// Whether the error means the targeted resource is gone
    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::DoesNotExist(_))
    }

    /// Short machine-readable name of the variant, used in failure reasons
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PollTimeout => "PollTimeout",
            Self::DoesNotExist(_) => "DoesNotExistError",
            Self::RateLimitExceeded(_) => "RateLimitExceededError",
            Self::Response { .. } => "ResponseError",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::Timeout(_) => "Timeout",
            Self::Other(_) => "Error",
        }
    }
}
