//! Recording mocks for the agent's smaller collaborators.

use crawler_domain::ports::{ActivityLogger, ConfigurationSection, ConfigurationStore};
use crawler_domain::{ActivityRecord, StoreError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Activity logger that keeps every record
pub struct RecordingActivityLogger {
    records: Arc<RwLock<Vec<ActivityRecord>>>,
}

impl RecordingActivityLogger {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records.read().clone()
    }

    pub fn count_of(&self, activity_type: &str) -> usize {
        self.records
            .read()
            .iter()
            .filter(|r| r.activity_type == activity_type)
            .count()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl Default for RecordingActivityLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityLogger for RecordingActivityLogger {
    fn record_activity(&self, record: ActivityRecord) {
        self.records.write().push(record);
    }
}

/// Configuration store keeping each section as raw bytes
pub struct InMemoryConfigurationStore {
    sections: RwLock<HashMap<ConfigurationSection, Vec<u8>>>,
    failing_export: RwLock<Option<ConfigurationSection>>,
    imports: RwLock<Vec<ConfigurationSection>>,
}

impl InMemoryConfigurationStore {
    pub fn new() -> Self {
        Self {
            sections: RwLock::new(HashMap::new()),
            failing_export: RwLock::new(None),
            imports: RwLock::new(Vec::new()),
        }
    }

    pub fn with_section(self, section: ConfigurationSection, data: impl Into<Vec<u8>>) -> Self {
        self.sections.write().insert(section, data.into());
        self
    }

    pub fn section(&self, section: ConfigurationSection) -> Option<Vec<u8>> {
        self.sections.read().get(&section).cloned()
    }

    /// Make every export of `section` fail.
    pub fn fail_export_of(&self, section: ConfigurationSection) {
        *self.failing_export.write() = Some(section);
    }

    /// Sections imported so far, in order.
    pub fn imported(&self) -> Vec<ConfigurationSection> {
        self.imports.read().clone()
    }
}

impl Default for InMemoryConfigurationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationStore for InMemoryConfigurationStore {
    fn export_section(&self, section: ConfigurationSection) -> Result<Vec<u8>, StoreError> {
        if *self.failing_export.read() == Some(section) {
            return Err(StoreError::Other(format!(
                "Cannot export {}",
                section.entry_name()
            )));
        }
        Ok(self.section(section).unwrap_or_default())
    }

    fn import_section(&self, section: ConfigurationSection, data: &[u8]) -> Result<(), StoreError> {
        self.sections.write().insert(section, data.to_vec());
        self.imports.write().push(section);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_logger_counts_by_type() {
        let logger = RecordingActivityLogger::new();
        logger.record_activity(ActivityRecord::new("web", "fetch", "http://a/"));
        logger.record_activity(ActivityRecord::new("web", "fetch", "http://b/"));
        logger.record_activity(ActivityRecord::new("web", "job end", "1(x)"));

        assert_eq!(logger.count_of("fetch"), 2);
        assert_eq!(logger.records().len(), 3);
        logger.clear();
        assert!(logger.records().is_empty());
    }

    #[test]
    fn test_failing_export() {
        let store = InMemoryConfigurationStore::new().with_section(ConfigurationSection::Jobs, "[]");
        store.fail_export_of(ConfigurationSection::Outputs);
        assert!(store.export_section(ConfigurationSection::Outputs).is_err());
        assert_eq!(store.export_section(ConfigurationSection::Jobs).unwrap(), b"[]");
        assert!(store.export_section(ConfigurationSection::Connections).unwrap().is_empty());
    }
}
