//! Queue tracker.
//!
//! Spreads fetches fairly across bins (typically host names). Every document
//! gets a priority derived from how many documents of its bins have been
//! prioritized so far, scaled by the bins' throttles, so that a host with
//! thousands of queued documents cannot starve a host with ten.
//!
//! The tracker also counts documents sitting in the in-memory queue and in
//! worker hands, and keeps per-connection throughput statistics.

mod performance;
mod priority;

pub use performance::PerformanceStatistics;
pub use priority::{bin_count_scale_factor, LogarithmicPriority, PriorityStrategy, MIN_MS_PER_FETCH};

use crawler_domain::{AgentError, AgentResult, RepositoryConnection};
use parking_lot::{Condvar, Mutex};
use priority::ThrottleCache;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

/// Bin set identity, independent of bin order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct PriorityKey(Vec<String>);

impl PriorityKey {
    fn new(bin_names: &[String]) -> Self {
        let mut bins = bin_names.to_vec();
        bins.sort();
        Self(bins)
    }
}

#[derive(Default)]
struct PriorityState {
    /// Documents prioritized per bin since the last reset
    bin_counts: HashMap<String, f64>,
    /// Depth the stuffer is currently fetching at
    current_minimum_depth: f64,
    /// Handed-out priorities that were never written, kept descending
    available: HashMap<PriorityKey, Vec<f64>>,
    /// Bin -> keys in `available` that contain it
    dependencies: HashMap<String, HashSet<PriorityKey>>,
    reset_in_progress: bool,
    interrupted: bool,
}

impl PriorityState {
    fn drop_dependents(&mut self, bin: &str) {
        if let Some(keys) = self.dependencies.remove(bin) {
            for key in keys {
                self.available.remove(&key);
            }
        }
    }

    fn take_available(&mut self, key: &PriorityKey) -> Option<f64> {
        let list = self.available.get_mut(key)?;
        let priority = list.pop()?;
        if list.is_empty() {
            self.available.remove(key);
            for bin in &key.0 {
                if let Some(keys) = self.dependencies.get_mut(bin) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.dependencies.remove(bin);
                    }
                }
            }
        }
        Some(priority)
    }
}

#[derive(Default)]
struct BinActivity {
    queued: HashMap<String, u64>,
    active: HashMap<String, u64>,
}

fn increment(counts: &mut HashMap<String, u64>, bin: &str) {
    *counts.entry(bin.to_string()).or_insert(0) += 1;
}

fn decrement(counts: &mut HashMap<String, u64>, bin: &str) {
    if let Some(count) = counts.get_mut(bin) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            counts.remove(bin);
        }
    }
}

/// Point-in-time view of the prioritization state, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct PrioritySnapshot {
    pub bin_counts: BTreeMap<String, f64>,
    pub current_minimum_depth: f64,
    pub available: BTreeMap<Vec<String>, Vec<f64>>,
    pub reset_in_progress: bool,
}

pub struct QueueTracker {
    state: Mutex<PriorityState>,
    reset_finished: Condvar,
    activity: Mutex<BinActivity>,
    performance: Mutex<PerformanceStatistics>,
    throttles: ThrottleCache,
    strategy: Box<dyn PriorityStrategy>,
}

impl Default for QueueTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueTracker {
    pub fn new() -> Self {
        Self::with_strategy(LogarithmicPriority)
    }

    pub fn with_strategy(strategy: impl PriorityStrategy + 'static) -> Self {
        Self {
            state: Mutex::new(PriorityState::default()),
            reset_finished: Condvar::new(),
            activity: Mutex::new(BinActivity::default()),
            performance: Mutex::new(PerformanceStatistics::default()),
            throttles: ThrottleCache::default(),
            strategy: Box::new(strategy),
        }
    }

    /// Priority for a newly queued or reprioritized document.
    ///
    /// Previously released priorities for the same bin set are handed out
    /// first. Otherwise the priority comes from the deepest throttle-adjusted
    /// bin, and every bin is counted one deeper.
    pub fn calculate_priority(&self, bin_names: &[String], connection: &RepositoryConnection) -> f64 {
        let rates = self.throttles.max_rates(bin_names, connection);
        let scales: Vec<f64> = rates.iter().map(|r| bin_count_scale_factor(*r)).collect();

        let mut state = self.state.lock();

        // Never hand out priorities better than the level currently being fetched
        for (bin, scale) in bin_names.iter().zip(&scales) {
            let count = state.bin_counts.get(bin).copied().unwrap_or(0.0);
            if count * scale < state.current_minimum_depth {
                let floor = state.current_minimum_depth / scale;
                debug!(bin = %bin, value = floor, scale, "Raising bin count to minimum depth");
                state.drop_dependents(bin);
                state.bin_counts.insert(bin.clone(), floor);
            }
        }

        let key = PriorityKey::new(bin_names);
        if let Some(priority) = state.take_available(&key) {
            debug!(bins = ?bin_names, priority, "Reusing released priority");
            return priority;
        }

        let highest = bin_names
            .iter()
            .zip(&scales)
            .map(|(bin, scale)| {
                if scale.is_infinite() {
                    f64::INFINITY
                } else {
                    state.bin_counts.get(bin).copied().unwrap_or(0.0) * scale
                }
            })
            .fold(0.0, f64::max);

        let priority = self.strategy.priority(highest);

        for bin in bin_names {
            *state.bin_counts.entry(bin.clone()).or_insert(0.0) += 1.0;
        }

        debug!(bins = ?bin_names, priority, "Assigned priority");
        priority
    }

    /// Release a priority that was calculated but never written, so the next
    /// document with the same bins reuses it.
    pub fn note_priority_not_used(
        &self,
        bin_names: &[String],
        _connection: &RepositoryConnection,
        priority: f64,
    ) {
        let key = PriorityKey::new(bin_names);
        let mut state = self.state.lock();

        let list = state.available.entry(key.clone()).or_default();
        // Descending, so the best (smallest) priority pops off the end
        let position = list.partition_point(|p| *p >= priority);
        list.insert(position, priority);

        for bin in bin_names {
            state
                .dependencies
                .entry(bin.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    /// Start a full reprioritization: forget all bin counts and released
    /// priorities. Depth assessments block until [`end_reset`](Self::end_reset).
    pub fn begin_reset(&self) {
        let mut state = self.state.lock();
        state.bin_counts.clear();
        state.current_minimum_depth = 0.0;
        state.available.clear();
        state.dependencies.clear();
        state.reset_in_progress = true;
    }

    pub fn end_reset(&self) {
        let mut state = self.state.lock();
        state.reset_in_progress = false;
        self.reset_finished.notify_all();
    }

    /// Bracket a reprioritization sweep; the reset ends when the guard drops.
    pub fn reset_sweep(&self) -> ResetSweep<'_> {
        self.begin_reset();
        ResetSweep { tracker: self }
    }

    /// Raise the minimum depth to match the best priority the store is
    /// currently handing out. Waits for any reset in progress first.
    pub fn assess_minimum_depth(&self, bin_priorities: &[f64]) -> AgentResult<()> {
        let mut state = self.state.lock();
        while state.reset_in_progress && !state.interrupted {
            self.reset_finished.wait(&mut state);
        }
        if state.interrupted {
            return Err(AgentError::Interrupted);
        }

        let Some(min_priority) = bin_priorities.iter().copied().reduce(f64::min) else {
            return Ok(());
        };

        let depth = self.strategy.depth_for_priority(min_priority);
        if depth > state.current_minimum_depth {
            debug!(depth, "Setting new minimum depth");
            state.current_minimum_depth = depth;
        } else if depth < state.current_minimum_depth {
            debug!(
                current = state.current_minimum_depth,
                observed = depth,
                "Minimum depth was set higher than the queue shows"
            );
        }
        Ok(())
    }

    /// Release any thread blocked on a reset.
    pub fn interrupt(&self) {
        let mut state = self.state.lock();
        state.interrupted = true;
        self.reset_finished.notify_all();
    }

    /// A document with these bins entered the in-memory queue.
    pub fn add_record(&self, bin_names: &[String]) {
        let mut activity = self.activity.lock();
        for bin in bin_names {
            increment(&mut activity.queued, bin);
        }
    }

    /// A queued document was discarded without reaching a worker.
    pub fn remove_record(&self, bin_names: &[String]) {
        let mut activity = self.activity.lock();
        for bin in bin_names {
            decrement(&mut activity.queued, bin);
        }
    }

    /// A worker picked the document up.
    pub fn begin_processing(&self, bin_names: &[String]) {
        let mut activity = self.activity.lock();
        for bin in bin_names {
            decrement(&mut activity.queued, bin);
            increment(&mut activity.active, bin);
        }
    }

    pub fn end_processing(&self, bin_names: &[String]) {
        let mut activity = self.activity.lock();
        for bin in bin_names {
            decrement(&mut activity.active, bin);
        }
    }

    /// Geometric-mean preference for starting a document with these bins,
    /// in log form: `-mean(ln(1 + active))`. Higher is better.
    pub fn calculate_assignment_rating(&self, bin_names: &[String]) -> f64 {
        if bin_names.is_empty() {
            return 0.0;
        }
        let activity = self.activity.lock();
        let total: f64 = bin_names
            .iter()
            .map(|bin| (activity.active.get(bin).copied().unwrap_or(0) as f64).ln_1p())
            .sum();
        -total / bin_names.len() as f64
    }

    pub fn queued_count(&self, bin: &str) -> u64 {
        self.activity.lock().queued.get(bin).copied().unwrap_or(0)
    }

    pub fn active_count(&self, bin: &str) -> u64 {
        self.activity.lock().active.get(bin).copied().unwrap_or(0)
    }

    pub fn note_connection_performance(&self, documents: usize, connection_name: &str, elapsed: Duration) {
        debug!(
            connection = connection_name,
            documents,
            elapsed_ms = elapsed.as_millis() as u64,
            "Connection batch completed"
        );
        self.performance
            .lock()
            .note_documents_completed(connection_name, documents, elapsed);
    }

    pub fn current_statistics(&self) -> PerformanceStatistics {
        self.performance.lock().clone()
    }

    pub fn priority_snapshot(&self) -> PrioritySnapshot {
        let state = self.state.lock();
        PrioritySnapshot {
            bin_counts: state
                .bin_counts
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            current_minimum_depth: state.current_minimum_depth,
            available: state
                .available
                .iter()
                .map(|(k, v)| (k.0.clone(), v.clone()))
                .collect(),
            reset_in_progress: state.reset_in_progress,
        }
    }
}

/// Ends the tracker reset when dropped, including on error or panic.
pub struct ResetSweep<'a> {
    tracker: &'a QueueTracker,
}

impl Drop for ResetSweep<'_> {
    fn drop(&mut self) {
        self.tracker.end_reset();
    }
}
