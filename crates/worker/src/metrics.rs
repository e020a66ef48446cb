//! Agent metrics and monitoring

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Agent metrics, shared by every thread
#[derive(Clone)]
pub struct AgentMetrics {
    inner: Arc<RwLock<MetricsInner>>,
}

struct MetricsInner {
    /// Documents handed to a repository connector
    documents_processed: u64,
    /// Documents finished (completed or scheduled for rescan)
    documents_completed: u64,
    /// Documents put back because of a service interruption
    documents_requeued: u64,
    /// Documents that ran out of retries
    documents_failed: u64,
    /// Documents removed from an output
    documents_deleted: u64,
    documents_expired: u64,
    jobs_seeded: u64,
    /// Batch durations (for calculating percentiles)
    durations: Vec<Duration>,
    /// Queue depths by queue name
    queue_depths: HashMap<String, usize>,
    /// Documents per second over the last processed batch interval
    processing_rate: f64,
    last_update: Instant,
}

impl Default for MetricsInner {
    fn default() -> Self {
        Self {
            documents_processed: 0,
            documents_completed: 0,
            documents_requeued: 0,
            documents_failed: 0,
            documents_deleted: 0,
            documents_expired: 0,
            jobs_seeded: 0,
            durations: Vec::new(),
            queue_depths: HashMap::new(),
            processing_rate: 0.0,
            last_update: Instant::now(),
        }
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
        }
    }

    pub fn add_documents_processed(&self, count: usize) {
        let mut inner = self.inner.write();
        inner.documents_processed += count as u64;
        Self::update_processing_rate(&mut inner, count);
    }

    pub fn add_documents_completed(&self, count: usize) {
        self.inner.write().documents_completed += count as u64;
    }

    pub fn add_documents_requeued(&self, count: usize) {
        self.inner.write().documents_requeued += count as u64;
    }

    pub fn add_documents_failed(&self, count: usize) {
        self.inner.write().documents_failed += count as u64;
    }

    pub fn add_documents_deleted(&self, count: usize) {
        self.inner.write().documents_deleted += count as u64;
    }

    pub fn add_documents_expired(&self, count: usize) {
        self.inner.write().documents_expired += count as u64;
    }

    pub fn increment_jobs_seeded(&self) {
        self.inner.write().jobs_seeded += 1;
    }

    /// Record how long one batch took
    pub fn record_batch_duration(&self, duration: Duration) {
        let mut inner = self.inner.write();
        inner.durations.push(duration);

        // Keep only last 1000 durations to prevent unbounded growth
        if inner.durations.len() > 1000 {
            inner.durations.drain(0..500);
        }
    }

    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        self.inner
            .write()
            .queue_depths
            .insert(queue_name.to_string(), depth);
    }

    pub fn documents_processed(&self) -> u64 {
        self.inner.read().documents_processed
    }

    pub fn documents_completed(&self) -> u64 {
        self.inner.read().documents_completed
    }

    pub fn documents_requeued(&self) -> u64 {
        self.inner.read().documents_requeued
    }

    pub fn documents_failed(&self) -> u64 {
        self.inner.read().documents_failed
    }

    pub fn documents_deleted(&self) -> u64 {
        self.inner.read().documents_deleted
    }

    pub fn documents_expired(&self) -> u64 {
        self.inner.read().documents_expired
    }

    pub fn jobs_seeded(&self) -> u64 {
        self.inner.read().jobs_seeded
    }

    pub fn queue_depth(&self, queue_name: &str) -> Option<usize> {
        self.inner.read().queue_depths.get(queue_name).copied()
    }

    /// Get metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.read();
        let mut sorted = inner.durations.clone();
        sorted.sort();

        MetricsSnapshot {
            documents_processed: inner.documents_processed,
            documents_completed: inner.documents_completed,
            documents_requeued: inner.documents_requeued,
            documents_failed: inner.documents_failed,
            documents_deleted: inner.documents_deleted,
            documents_expired: inner.documents_expired,
            jobs_seeded: inner.jobs_seeded,
            average_duration: average(&sorted),
            median_duration: percentile(&sorted, 0.5),
            p95_duration: percentile(&sorted, 0.95),
            p99_duration: percentile(&sorted, 0.99),
            queue_depths: inner.queue_depths.clone(),
            processing_rate: inner.processing_rate,
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        *self.inner.write() = MetricsInner::default();
    }

    fn update_processing_rate(inner: &mut MetricsInner, count: usize) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_update).as_secs_f64();

        if elapsed > 0.0 {
            inner.processing_rate = count as f64 / elapsed;
            inner.last_update = now;
        }
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn average(sorted: &[Duration]) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let total: Duration = sorted.iter().sum();
    Some(total / sorted.len() as u32)
}

fn percentile(sorted: &[Duration], fraction: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let index = (sorted.len() as f64 * fraction) as usize;
    Some(sorted[index.min(sorted.len() - 1)])
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub documents_processed: u64,
    pub documents_completed: u64,
    pub documents_requeued: u64,
    pub documents_failed: u64,
    pub documents_deleted: u64,
    pub documents_expired: u64,
    pub jobs_seeded: u64,
    pub average_duration: Option<Duration>,
    pub median_duration: Option<Duration>,
    pub p95_duration: Option<Duration>,
    pub p99_duration: Option<Duration>,
    pub queue_depths: HashMap<String, usize>,
    pub processing_rate: f64,
}

impl MetricsSnapshot {
    /// Format metrics for display
    pub fn format(&self) -> String {
        let mut queues: Vec<_> = self.queue_depths.iter().collect();
        queues.sort();
        let queues = queues
            .into_iter()
            .map(|(name, depth)| format!("{name}={depth}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            r#"Agent Metrics:
  Documents Processed: {}
  Documents Completed: {}
  Documents Requeued: {}
  Documents Failed: {}
  Documents Deleted: {}
  Documents Expired: {}
  Jobs Seeded: {}
  Average Batch: {}
  Median Batch: {}
  P95 Batch: {}
  P99 Batch: {}
  Queue Depths: {}
  Processing Rate: {:.2} docs/sec"#,
            self.documents_processed,
            self.documents_completed,
            self.documents_requeued,
            self.documents_failed,
            self.documents_deleted,
            self.documents_expired,
            self.jobs_seeded,
            format_duration(self.average_duration),
            format_duration(self.median_duration),
            format_duration(self.p95_duration),
            format_duration(self.p99_duration),
            if queues.is_empty() { "N/A".to_string() } else { queues },
            self.processing_rate,
        )
    }
}

fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => format!("{:.2}ms", d.as_secs_f64() * 1000.0),
        None => "N/A".to_string(),
    }
}
