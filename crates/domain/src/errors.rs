//! Error types for the crawler agent.
//!
//! `AgentError` is the closed taxonomy every thread loop dispatches on.
//! Collaborator errors (`StoreError`, `ConnectorError`) convert into it so a
//! loop can use `?` on store and connector calls and still decide between
//! reset, retry, exit and carry-on with a single `match`.

use serde::{Deserialize, Serialize};

/// Result alias used across the agent
pub type AgentResult<T> = Result<T, AgentError>;

/// Top-level agent error
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    /// The job store connection was lost; every thread sharing it must rendezvous
    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    /// A connector asked for the work to be retried later
    #[error("Service interruption: {0}")]
    ServiceInterruption(ServiceInterruption),

    /// Configuration problem that no amount of retrying will fix
    #[error("Setup error: {0}")]
    SetupFatal(String),

    /// Cooperative shutdown
    #[error("Interrupted")]
    Interrupted,

    /// A repository connection could not be established
    #[error("Repository connection error: {0}")]
    RepositoryConnection(String),

    /// Anything else
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AgentError {
    /// Stable code for logs and history records
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DatabaseConnection(_) => "DATABASE_CONNECTION_ERROR",
            Self::ServiceInterruption(_) => "SERVICE_INTERRUPTION",
            Self::SetupFatal(_) => "SETUP_ERROR",
            Self::Interrupted => "INTERRUPTED",
            Self::RepositoryConnection(_) => "REPOSITORY_CONNECTION_ERROR",
            Self::Unexpected(_) => "GENERAL_ERROR",
        }
    }

    /// Whether the failing operation should simply be tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DatabaseConnection(_) | Self::ServiceInterruption(_) | Self::RepositoryConnection(_)
        )
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    /// Errors a role must hand to its thread loop rather than absorb into
    /// per-document handling: shutdown, a lost store connection, a broken setup.
    pub fn must_propagate(&self) -> bool {
        matches!(
            self,
            Self::Interrupted | Self::DatabaseConnection(_) | Self::SetupFatal(_)
        )
    }
}

/// Connector-reported transient failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInterruption {
    pub message: String,
    /// Earliest time (ms) to try again
    pub retry_at: i64,
    /// Time (ms) after which a further interruption becomes a hard failure
    pub fail_time: Option<i64>,
    /// Retries allowed before a hard failure; `None` retries forever
    pub fail_retry_count: Option<u32>,
    /// Abort the whole job on hard failure instead of skipping the document
    pub abort_on_fail: bool,
    /// Raised because the job stopped being active, not by the remote service
    pub job_inactive_abort: bool,
}

impl ServiceInterruption {
    pub fn new(message: impl Into<String>, retry_at: i64) -> Self {
        Self {
            message: message.into(),
            retry_at,
            fail_time: None,
            fail_retry_count: None,
            abort_on_fail: false,
            job_inactive_abort: false,
        }
    }

    pub fn with_fail_time(mut self, fail_time: i64) -> Self {
        self.fail_time = Some(fail_time);
        self
    }

    pub fn with_retry_budget(mut self, fail_retry_count: u32) -> Self {
        self.fail_retry_count = Some(fail_retry_count);
        self
    }

    pub fn aborting_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }

    /// Interruption raised when a job is no longer active.
    pub fn job_inactive(retry_at: i64) -> Self {
        Self {
            job_inactive_abort: true,
            ..Self::new("Job no longer active", retry_at)
        }
    }

    /// Decide whether an item with the given failure history has run out of
    /// retries. `fail_time` and `remaining` come from the document (or the
    /// seeding record); `remaining == None` means no interruption was seen
    /// before, so this interruption's own budget applies.
    pub fn is_hard_failure(&self, fail_time: Option<i64>, remaining: Option<u32>) -> bool {
        if self.job_inactive_abort {
            return false;
        }
        if matches!(fail_time, Some(t) if t < self.retry_at) {
            return true;
        }
        matches!(remaining.or(self.fail_retry_count), Some(0))
    }

    /// Budget to store with a requeued item after this interruption.
    pub fn next_retry_budget(&self, remaining: Option<u32>) -> Option<u32> {
        remaining
            .or(self.fail_retry_count)
            .map(|budget| budget.saturating_sub(1))
    }

    /// Fail time to store with a requeued item.
    pub fn next_fail_time(&self, fail_time: Option<i64>) -> Option<i64> {
        fail_time.or(self.fail_time)
    }
}

impl std::fmt::Display for ServiceInterruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (retry at {})", self.message, self.retry_at)
    }
}

/// Job store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Connection lost: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Setup error: {0}")]
    Setup(String),

    #[error("Interrupted")]
    Interrupted,

    #[error("Store error: {0}")]
    Other(String),
}

impl From<StoreError> for AgentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => Self::DatabaseConnection(msg),
            StoreError::Setup(msg) => Self::SetupFatal(msg),
            StoreError::Interrupted => Self::Interrupted,
            StoreError::NotFound(msg) | StoreError::Other(msg) => Self::Unexpected(msg),
        }
    }
}

/// Connector errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("Service interruption: {0}")]
    ServiceInterruption(ServiceInterruption),

    /// No connector could be obtained for the connection
    #[error("Connector unavailable: {0}")]
    Unavailable(String),

    #[error("Connector failure: {0}")]
    Failure(String),

    /// The connector had to talk to the store and that failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ServiceInterruption> for ConnectorError {
    fn from(interruption: ServiceInterruption) -> Self {
        Self::ServiceInterruption(interruption)
    }
}

impl From<ConnectorError> for AgentError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::ServiceInterruption(si) => Self::ServiceInterruption(si),
            ConnectorError::Unavailable(msg) => Self::RepositoryConnection(msg),
            ConnectorError::Failure(msg) => Self::Unexpected(msg),
            ConnectorError::Store(store) => store.into(),
        }
    }
}
