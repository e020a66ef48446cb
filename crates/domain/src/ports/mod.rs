//! Collaborator contracts the agent consumes but does not implement.

mod connector;
mod store;

pub use connector::*;
pub use store::*;

use crate::activity::ActivityRecord;
use crate::errors::StoreError;
use serde::{Deserialize, Serialize};

/// Audit trail sink. Implementations must not block the caller indefinitely.
pub trait ActivityLogger: Send + Sync {
    fn record_activity(&self, record: ActivityRecord);
}

/// Sections of an exported configuration, in export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationSection {
    Outputs,
    Authorities,
    Connections,
    Jobs,
}

impl ConfigurationSection {
    pub const ALL: [ConfigurationSection; 4] = [
        Self::Outputs,
        Self::Authorities,
        Self::Connections,
        Self::Jobs,
    ];

    /// Archive entry name
    pub fn entry_name(&self) -> &'static str {
        match self {
            Self::Outputs => "outputs",
            Self::Authorities => "authorities",
            Self::Connections => "connections",
            Self::Jobs => "jobs",
        }
    }

    pub fn from_entry_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.entry_name() == name)
    }
}

/// Source and sink of the crawler's stored configuration.
pub trait ConfigurationStore: Send + Sync {
    fn export_section(&self, section: ConfigurationSection) -> Result<Vec<u8>, StoreError>;

    fn import_section(&self, section: ConfigurationSection, data: &[u8]) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_entry_names_round_trip() {
        for section in ConfigurationSection::ALL {
            assert_eq!(
                ConfigurationSection::from_entry_name(section.entry_name()),
                Some(section)
            );
        }
        assert_eq!(ConfigurationSection::from_entry_name("bogus"), None);
    }
}
