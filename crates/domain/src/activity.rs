//! Activity and history records.

use serde::{Deserialize, Serialize};

/// Activity type recorded when a job finishes stopping (abort, pause, shutdown).
pub const ACTIVITY_JOB_STOP: &str = "job stop";
/// Activity type recorded when a paused job resumes.
pub const ACTIVITY_JOB_CONTINUE: &str = "job continue";
/// Activity type recorded when a job completes.
pub const ACTIVITY_JOB_END: &str = "job end";
/// Activity type recorded when a document is removed from an output.
pub const ACTIVITY_DOCUMENT_DELETE: &str = "document deletion";
/// Activity type recorded for a fetched document.
pub const ACTIVITY_FETCH: &str = "fetch";

/// One audit-trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    /// Connection the activity belongs to
    pub connection_name: String,
    /// When the activity started (ms); `None` for instantaneous events
    pub start_time: Option<i64>,
    pub activity_type: String,
    pub data_size: Option<u64>,
    pub entity_uri: String,
    pub result_code: Option<String>,
    pub result_description: Option<String>,
}

impl ActivityRecord {
    pub fn new(
        connection_name: impl Into<String>,
        activity_type: impl Into<String>,
        entity_uri: impl Into<String>,
    ) -> Self {
        Self {
            connection_name: connection_name.into(),
            start_time: None,
            activity_type: activity_type.into(),
            data_size: None,
            entity_uri: entity_uri.into(),
            result_code: None,
            result_description: None,
        }
    }

    pub fn started_at(mut self, start_time: i64) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_data_size(mut self, data_size: u64) -> Self {
        self.data_size = Some(data_size);
        self
    }

    pub fn with_result(
        mut self,
        result_code: impl Into<String>,
        result_description: impl Into<String>,
    ) -> Self {
        self.result_code = Some(result_code.into());
        self.result_description = Some(result_description.into());
        self
    }
}
