//! Configuration for deciders and activity workers
//!
//! Settings are plain values threaded through constructors. Nothing is read
//! from process-global state.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use flowlane_core::{Delay, RetryPolicy};

use crate::error::FlowError;

/// Credentials used by a transport to sign requests
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Where and as whom an actor talks to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    pub domain: String,
    pub region: String,
    /// Fixed identity string; generated from name, host and pid when unset
    pub identity: Option<String>,
    pub credentials: Option<Credentials>,
}

impl ServiceContext {
    pub fn new(domain: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            region: region.into(),
            identity: None,
            credentials: None,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

/// Poll-loop pacing shared by every actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause after a failed poll
    pub error_backoff: Duration,
    /// Pause after a throttled poll
    pub rate_limit_backoff: Duration,
}

impl PollConfig {
    pub const DEFAULT: Self = Self {
        error_backoff: Duration::from_secs(1),
        rate_limit_backoff: Duration::from_secs(10),
    };
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration for a decider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeciderConfig {
    pub poll: PollConfig,
    /// Maximum number of decisions sent in one response
    pub max_decisions: usize,
    /// Maximum number of activities open at once per execution
    pub max_parallel: Option<usize>,
    /// Attempts for `respond_decision_task_completed`
    pub respond_attempts: u32,
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl DeciderConfig {
    /// Default configuration suitable for most use cases
    pub const DEFAULT: Self = Self {
        poll: PollConfig::DEFAULT,
        max_decisions: 100,
        max_parallel: None,
        respond_attempts: 5,
    };

    /// Create a new configuration with validation
    pub fn new(max_decisions: usize, respond_attempts: u32) -> Result<Self, ConfigError> {
        let config = Self {
            max_decisions,
            respond_attempts,
            ..Self::DEFAULT
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_decisions == 0 {
            return Err(ConfigError::InvalidValue(
                "max_decisions must be positive".to_string(),
            ));
        }
        if self.respond_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "respond_attempts must be positive".to_string(),
            ));
        }
        if self.max_parallel == Some(0) {
            return Err(ConfigError::InvalidValue(
                "max_parallel must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    /// Retry policy for decision responses
    pub fn respond_retry(&self) -> RetryPolicy {
        RetryPolicy::respond().with_nb_times(self.respond_attempts)
    }
}

/// Where activity handlers run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Isolation {
    /// One task process per task, started from the worker's own executable.
    /// The executable must call `activity::serve_task` at the top of `main`.
    #[default]
    Process,
    /// One task process per task, started from `program`
    Program(PathBuf),
    /// On the worker's runtime. Cancellation is cooperative: a handler that
    /// never yields keeps its slot until it returns.
    InProcess,
}

/// Configuration for an activity worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub poll: PollConfig,
    /// Maximum number of activity tasks executing concurrently
    pub nb_processes: usize,
    /// Interval between heartbeats of a running task
    pub heartbeat_interval: Duration,
    /// How long shutdown waits for running tasks before aborting them
    pub join_timeout: Duration,
    /// Time cancelled tasks get to report before they are aborted
    pub cancel_grace: Duration,
    /// Attempts for `respond_activity_task_*`
    pub respond_attempts: u32,
    /// Attempts for a single heartbeat tick
    pub heartbeat_attempts: u32,
    pub isolation: Isolation,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl WorkerConfig {
    /// Default configuration suitable for most use cases
    pub const DEFAULT: Self = Self {
        poll: PollConfig::DEFAULT,
        nb_processes: 4,
        heartbeat_interval: Duration::from_secs(30),
        join_timeout: Duration::from_secs(60),
        cancel_grace: Duration::from_secs(5),
        respond_attempts: 5,
        heartbeat_attempts: 3,
        isolation: Isolation::Process,
    };

    /// High-throughput configuration for many short activities
    pub const HIGH_THROUGHPUT: Self = Self {
        poll: PollConfig::DEFAULT,
        nb_processes: 32,
        heartbeat_interval: Duration::from_secs(15),
        join_timeout: Duration::from_secs(30),
        cancel_grace: Duration::from_secs(2),
        respond_attempts: 5,
        heartbeat_attempts: 3,
        isolation: Isolation::Process,
    };

    /// Long-running configuration for activities that take significant time
    pub const LONG_RUNNING: Self = Self {
        poll: PollConfig::DEFAULT,
        nb_processes: 2,
        heartbeat_interval: Duration::from_secs(60),
        join_timeout: Duration::from_secs(300),
        cancel_grace: Duration::from_secs(30),
        respond_attempts: 8,
        heartbeat_attempts: 3,
        isolation: Isolation::Process,
    };

    /// Low-resource configuration for constrained environments
    pub const LOW_RESOURCE: Self = Self {
        poll: PollConfig::DEFAULT,
        nb_processes: 1,
        heartbeat_interval: Duration::from_secs(45),
        join_timeout: Duration::from_secs(60),
        cancel_grace: Duration::from_secs(5),
        respond_attempts: 5,
        heartbeat_attempts: 2,
        isolation: Isolation::Process,
    };

    /// Create a new configuration with validation
    pub fn new(
        nb_processes: usize,
        heartbeat_interval: Duration,
        join_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            nb_processes,
            heartbeat_interval,
            join_timeout,
            ..Self::DEFAULT
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nb_processes == 0 {
            return Err(ConfigError::InvalidValue(
                "nb_processes must be positive".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "heartbeat_interval must be positive".to_string(),
            ));
        }
        if self.join_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "join_timeout must be positive".to_string(),
            ));
        }
        if self.respond_attempts == 0 || self.heartbeat_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "retry attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_nb_processes(mut self, nb_processes: usize) -> Self {
        self.nb_processes = nb_processes;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    /// Retry policy for activity responses
    pub fn respond_retry(&self) -> RetryPolicy {
        RetryPolicy::respond().with_nb_times(self.respond_attempts)
    }

    /// Retry policy for one heartbeat tick. Never waits longer than the
    /// heartbeat interval.
    pub fn heartbeat_retry(&self) -> RetryPolicy {
        let max = (self.heartbeat_interval / 4).max(Duration::from_millis(1));
        RetryPolicy::heartbeat()
            .with_nb_times(self.heartbeat_attempts)
            .with_delay(Delay::Exponential {
                initial: Duration::from_millis(200).min(max),
                multiplier: 2.0,
                max,
            })
    }
}

/// Configuration error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for FlowError {
    fn from(err: ConfigError) -> Self {
        FlowError::InvalidConfiguration(err.to_string())
    }
}
