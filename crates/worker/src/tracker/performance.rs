//! Per-connection throughput statistics.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Completed batches kept per connection
const MAX_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    documents: usize,
    elapsed_ms: u64,
}

/// Rolling document throughput per repository connection.
#[derive(Debug, Clone, Default)]
pub struct PerformanceStatistics {
    connections: HashMap<String, VecDeque<Sample>>,
}

impl PerformanceStatistics {
    pub fn note_documents_completed(&mut self, connection_name: &str, documents: usize, elapsed: Duration) {
        let samples = self
            .connections
            .entry(connection_name.to_string())
            .or_default();
        samples.push_back(Sample {
            documents,
            elapsed_ms: elapsed.as_millis() as u64,
        });
        if samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
    }

    /// Documents per millisecond over the retained window, if anything was
    /// recorded for the connection.
    pub fn documents_per_ms(&self, connection_name: &str) -> Option<f64> {
        let samples = self.connections.get(connection_name)?;
        let documents: usize = samples.iter().map(|s| s.documents).sum();
        let elapsed: u64 = samples.iter().map(|s| s.elapsed_ms).sum();
        if elapsed == 0 {
            return if documents == 0 { None } else { Some(f64::INFINITY) };
        }
        Some(documents as f64 / elapsed as f64)
    }

    pub fn connection_names(&self) -> impl Iterator<Item = &str> {
        self.connections.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_over_window() {
        let mut stats = PerformanceStatistics::default();
        assert_eq!(stats.documents_per_ms("web"), None);

        stats.note_documents_completed("web", 10, Duration::from_millis(100));
        stats.note_documents_completed("web", 30, Duration::from_millis(300));
        assert_eq!(stats.documents_per_ms("web"), Some(0.1));
        assert_eq!(stats.documents_per_ms("files"), None);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut stats = PerformanceStatistics::default();
        stats.note_documents_completed("web", 1_000, Duration::from_millis(1));
        for _ in 0..MAX_SAMPLES {
            stats.note_documents_completed("web", 1, Duration::from_millis(10));
        }
        assert_eq!(stats.documents_per_ms("web"), Some(0.1));
    }
}
