//! Crawl job descriptions, seeding records and repository connections.

use crate::identifiers::JobId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// How a job decides that a document is finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Crawl the specified documents once and complete
    Specified,
    /// Keep rescanning documents and reseeding for as long as the job runs
    Continuous,
}

impl JobType {
    /// Adaptive jobs are the ones the seeding thread reseeds periodically.
    pub fn is_adaptive(&self) -> bool {
        matches!(self, Self::Continuous)
    }
}

/// How a job gets started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMethod {
    Manual,
    WindowBegin,
    WindowInside,
}

/// Job lifecycle status as seen by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Inactive,
    Active,
    Seeding,
    Paused,
    Aborting,
    ShuttingDown,
}

impl JobStatus {
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        matches!(
            (self, target),
            (Self::Inactive, Self::Active)
                | (Self::Active, Self::Seeding)
                | (Self::Seeding, Self::Active)
                | (Self::Active, Self::Paused)
                | (Self::Paused, Self::Active)
                | (Self::Active, Self::Aborting)
                | (Self::Seeding, Self::Aborting)
                | (Self::Paused, Self::Aborting)
                | (Self::Active, Self::ShuttingDown)
                | (Self::Aborting, Self::Inactive)
                | (Self::ShuttingDown, Self::Inactive)
        )
    }

    /// Documents of a job in this state may be handed to workers.
    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Active | Self::Seeding)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Seeding => "seeding",
            Self::Paused => "paused",
            Self::Aborting => "aborting",
            Self::ShuttingDown => "shutting down",
        }
    }
}

/// Configuration and current state of a crawl job.
///
/// Owned by the job store; the agent only reads it and asks the store for
/// state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    pub id: JobId,
    pub description: String,
    /// Repository connection the job crawls
    pub connection_name: String,
    /// Output connection documents are indexed into
    pub output_connection_name: String,
    pub job_type: JobType,
    pub start_method: StartMethod,
    pub status: JobStatus,
    /// Opaque connector-specific document specification
    #[serde(default)]
    pub specification: IndexMap<String, String>,
    /// Delay before a continuous job rescans a finished document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescan_interval_ms: Option<i64>,
    /// Age after which a continuous job's documents expire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_interval_ms: Option<i64>,
}

impl JobDescription {
    /// Label used in history records: `id(description)`.
    pub fn history_label(&self) -> String {
        format!("{}({})", self.id, self.description)
    }
}

/// A job the store has marked as due for (re)seeding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSeedingRecord {
    pub job_id: JobId,
    /// Seeding window start (last successful sync, ms)
    pub synch_time: i64,
    pub fail_time: Option<i64>,
    pub fail_retry_count: Option<u32>,
    #[serde(skip)]
    started: bool,
}

impl JobSeedingRecord {
    pub fn new(job_id: JobId, synch_time: i64) -> Self {
        Self {
            job_id,
            synch_time,
            fail_time: None,
            fail_retry_count: None,
            started: false,
        }
    }

    pub fn with_failure(mut self, fail_time: Option<i64>, fail_retry_count: Option<u32>) -> Self {
        self.fail_time = fail_time;
        self.fail_retry_count = fail_retry_count;
        self
    }

    /// Record that the seeding attempt reached a final disposition.
    pub fn note_started(&mut self) {
        self.started = true;
    }

    pub fn was_started(&self) -> bool {
        self.started
    }
}

/// A throttle limit: bins matching `pattern` may be fetched at most
/// `max_rate` times per millisecond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleSpec {
    pub pattern: String,
    pub max_rate: f64,
}

impl ThrottleSpec {
    pub fn new(pattern: impl Into<String>, max_rate: f64) -> Self {
        Self {
            pattern: pattern.into(),
            max_rate,
        }
    }
}

/// Configured repository connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConnection {
    pub name: String,
    pub class_name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub throttles: Vec<ThrottleSpec>,
}

fn default_max_connections() -> usize {
    10
}

impl RepositoryConnection {
    pub fn new(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            max_connections: default_max_connections(),
            throttles: Vec::new(),
        }
    }

    pub fn with_throttle(mut self, pattern: impl Into<String>, max_rate: f64) -> Self {
        self.throttles.push(ThrottleSpec::new(pattern, max_rate));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeding_record_started_flag() {
        let mut record = JobSeedingRecord::new(JobId(3), 0);
        assert!(!record.was_started());
        record.note_started();
        assert!(record.was_started());
    }

    #[test]
    fn test_history_label() {
        let job = JobDescription {
            id: JobId(7),
            description: "intranet".to_string(),
            connection_name: "web".to_string(),
            output_connection_name: "solr".to_string(),
            job_type: JobType::Continuous,
            start_method: StartMethod::Manual,
            status: JobStatus::Active,
            specification: IndexMap::new(),
            rescan_interval_ms: None,
            expiration_interval_ms: None,
        };
        assert_eq!(job.history_label(), "7(intranet)");
        assert!(job.job_type.is_adaptive());
    }
}
