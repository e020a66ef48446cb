//! Fluent builders for test data.

use crawler_domain::{JobDescription, JobId, JobStatus, JobType, StartMethod};
use indexmap::IndexMap;

/// Builder for creating JobDescription test instances
#[derive(Clone)]
pub struct JobBuilder {
    id: JobId,
    description: String,
    connection_name: String,
    output_connection_name: String,
    job_type: JobType,
    start_method: StartMethod,
    status: JobStatus,
    specification: IndexMap<String, String>,
    rescan_interval_ms: Option<i64>,
    expiration_interval_ms: Option<i64>,
}

impl JobBuilder {
    /// An active, specified job crawling connection `web` into output `index`.
    pub fn new(id: u64) -> Self {
        Self {
            id: JobId(id),
            description: format!("Test job {id}"),
            connection_name: "web".to_string(),
            output_connection_name: "index".to_string(),
            job_type: JobType::Specified,
            start_method: StartMethod::Manual,
            status: JobStatus::Active,
            specification: IndexMap::new(),
            rescan_interval_ms: None,
            expiration_interval_ms: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_connection(mut self, name: impl Into<String>) -> Self {
        self.connection_name = name.into();
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output_connection_name = name.into();
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_start_method(mut self, start_method: StartMethod) -> Self {
        self.start_method = start_method;
        self
    }

    pub fn with_specification(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.specification.insert(key.into(), value.into());
        self
    }

    /// A continuous job rescanning and expiring on the given intervals.
    pub fn continuous(mut self, rescan_interval_ms: Option<i64>, expiration_interval_ms: Option<i64>) -> Self {
        self.job_type = JobType::Continuous;
        self.rescan_interval_ms = rescan_interval_ms;
        self.expiration_interval_ms = expiration_interval_ms;
        self
    }

    pub fn build(self) -> JobDescription {
        JobDescription {
            id: self.id,
            description: self.description,
            connection_name: self.connection_name,
            output_connection_name: self.output_connection_name,
            job_type: self.job_type,
            start_method: self.start_method,
            status: self.status,
            specification: self.specification,
            rescan_interval_ms: self.rescan_interval_ms,
            expiration_interval_ms: self.expiration_interval_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_builder_defaults() {
        let job = JobBuilder::new(3).build();
        assert_eq!(job.id, JobId(3));
        assert_eq!(job.job_type, JobType::Specified);
        assert_eq!(job.status, JobStatus::Active);
        assert_eq!(job.connection_name, "web");
    }

    #[test]
    fn test_continuous_job_builder() {
        let job = JobBuilder::new(5)
            .with_connection("files")
            .continuous(Some(60_000), None)
            .with_specification("path", "/srv")
            .build();
        assert!(job.job_type.is_adaptive());
        assert_eq!(job.rescan_interval_ms, Some(60_000));
        assert_eq!(job.specification.get("path").map(String::as_str), Some("/srv"));
    }
}
