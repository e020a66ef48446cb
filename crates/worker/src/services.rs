//! Collaborators shared by every agent thread.

use crate::activity::TracingActivityLogger;
use crate::interrupt::InterruptToken;
use crate::metrics::AgentMetrics;
use crate::tracker::QueueTracker;
use crawler_common::IntervalConfig;
use crawler_domain::ports::{ActivityLogger, ConnectorRegistry, JobStore};
use std::sync::Arc;

/// Handles every role needs; cloning shares them.
#[derive(Clone)]
pub struct AgentServices {
    pub store: Arc<dyn JobStore>,
    pub connectors: Arc<dyn ConnectorRegistry>,
    pub tracker: Arc<QueueTracker>,
    pub activity_logger: Arc<dyn ActivityLogger>,
    pub metrics: AgentMetrics,
    pub interrupt: InterruptToken,
    pub intervals: IntervalConfig,
}

impl AgentServices {
    pub fn new(store: Arc<dyn JobStore>, connectors: Arc<dyn ConnectorRegistry>) -> Self {
        Self {
            store,
            connectors,
            tracker: Arc::new(QueueTracker::new()),
            activity_logger: Arc::new(TracingActivityLogger),
            metrics: AgentMetrics::new(),
            interrupt: InterruptToken::new(),
            intervals: IntervalConfig::default(),
        }
    }

    pub fn with_tracker(mut self, tracker: Arc<QueueTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_activity_logger(mut self, logger: Arc<dyn ActivityLogger>) -> Self {
        self.activity_logger = logger;
        self
    }

    pub fn with_intervals(mut self, intervals: IntervalConfig) -> Self {
        self.intervals = intervals;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptToken) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_metrics(mut self, metrics: AgentMetrics) -> Self {
        self.metrics = metrics;
        self
    }
}
