//! Priority formula and throttle lookups.

use crawler_domain::RepositoryConnection;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

/// Nominal time (ms) to fetch one unthrottled document. A bin throttled to
/// `rate` fetches per ms counts `1 + 1 / (MIN_MS_PER_FETCH * rate)` times as
/// deep as an unthrottled one.
pub const MIN_MS_PER_FETCH: f64 = 50.0;

/// Maps an adjusted bin depth to a document priority. Lower priority values
/// are fetched first.
///
/// Implementations must be monotonic: a deeper bin never yields a smaller
/// priority.
pub trait PriorityStrategy: Send + Sync {
    fn priority(&self, adjusted_depth: f64) -> f64;

    /// Inverse of [`priority`](Self::priority), used to turn the priorities the
    /// store reports back into a queue depth.
    fn depth_for_priority(&self, priority: f64) -> f64;
}

/// `ln(1 + depth)`
#[derive(Debug, Clone, Copy, Default)]
pub struct LogarithmicPriority;

impl PriorityStrategy for LogarithmicPriority {
    fn priority(&self, adjusted_depth: f64) -> f64 {
        if adjusted_depth.is_infinite() {
            f64::INFINITY
        } else {
            adjusted_depth.ln_1p()
        }
    }

    fn depth_for_priority(&self, priority: f64) -> f64 {
        priority.exp_m1()
    }
}

/// Scale factor applied to a bin count given the bin's max fetch rate.
pub fn bin_count_scale_factor(max_fetch_rate: f64) -> f64 {
    if max_fetch_rate == 0.0 {
        f64::INFINITY
    } else {
        1.0 + 1.0 / (MIN_MS_PER_FETCH * max_fetch_rate)
    }
}

/// Compiled throttle patterns, shared across calls.
#[derive(Default)]
pub(crate) struct ThrottleCache {
    compiled: Mutex<HashMap<String, Option<Regex>>>,
}

impl ThrottleCache {
    /// Max fetch rate for each bin: the lowest rate among throttles whose
    /// pattern matches anywhere in the bin name, or infinity if none match.
    pub(crate) fn max_rates(&self, bin_names: &[String], connection: &RepositoryConnection) -> Vec<f64> {
        let mut compiled = self.compiled.lock();
        for spec in &connection.throttles {
            if compiled.contains_key(&spec.pattern) {
                continue;
            }
            let regex = match Regex::new(&spec.pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(
                        connection = %connection.name,
                        pattern = %spec.pattern,
                        error = %e,
                        "Ignoring throttle with invalid pattern"
                    );
                    None
                }
            };
            compiled.insert(spec.pattern.clone(), regex);
        }

        bin_names
            .iter()
            .map(|bin| {
                connection
                    .throttles
                    .iter()
                    .filter(|spec| {
                        matches!(compiled.get(&spec.pattern), Some(Some(regex)) if regex.is_match(bin))
                    })
                    .map(|spec| spec.max_rate)
                    .fold(f64::INFINITY, f64::min)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logarithmic_priority_inverse() {
        let strategy = LogarithmicPriority;
        for depth in [0.0, 1.0, 7.5, 1000.0] {
            let back = strategy.depth_for_priority(strategy.priority(depth));
            assert!((back - depth).abs() < 1e-9);
        }
        assert_eq!(strategy.priority(f64::INFINITY), f64::INFINITY);
    }

    #[test]
    fn test_scale_factor() {
        assert_eq!(bin_count_scale_factor(f64::INFINITY), 1.0);
        assert_eq!(bin_count_scale_factor(0.0), f64::INFINITY);
        assert!((bin_count_scale_factor(0.02) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_minimum_matching_rate_wins() {
        let connection = RepositoryConnection::new("web", "web")
            .with_throttle("example", 0.5)
            .with_throttle("\\.com$", 0.1)
            .with_throttle("([", 0.0001);
        let cache = ThrottleCache::default();

        let rates = cache.max_rates(
            &["www.example.com".to_string(), "example.org".to_string(), "other.net".to_string()],
            &connection,
        );
        assert_eq!(rates, vec![0.1, 0.5, f64::INFINITY]);
    }
}
