//! Tests for service interruption retry budgets
//!
//! Walks a document through repeated interruptions the way the workers do:
//! each requeue stores the next budget on the document and the following
//! attempt reads it back.

use crawler_domain::{DocumentDescription, JobId, ServiceInterruption};
use proptest::prelude::*;

/// Count how many times a document is retried before it is surfaced as a failure.
fn retries_until_failure(si: &ServiceInterruption) -> u32 {
    let mut doc = DocumentDescription::new(JobId(1), "http://example.com/");
    let mut retries = 0;
    loop {
        if si.is_hard_failure(doc.fail_time, doc.fail_retry_count) {
            return retries;
        }
        doc = doc.clone().with_failure(
            si.next_fail_time(doc.fail_time),
            si.next_retry_budget(doc.fail_retry_count),
        );
        retries += 1;
        assert!(retries < 10_000, "budget never ran out");
    }
}

#[test]
fn test_budget_of_three_allows_three_retries() {
    let si = ServiceInterruption::new("rate limited", 1_000).with_retry_budget(3);
    assert_eq!(retries_until_failure(&si), 3);
}

#[test]
fn test_zero_budget_fails_immediately() {
    let si = ServiceInterruption::new("rate limited", 1_000).with_retry_budget(0);
    assert_eq!(retries_until_failure(&si), 0);
}

#[test]
fn test_fail_time_in_the_past_is_hard_failure() {
    let si = ServiceInterruption::new("down", 10_000).with_fail_time(5_000);
    let doc = DocumentDescription::new(JobId(1), "a").with_failure(Some(5_000), None);
    assert!(si.is_hard_failure(doc.fail_time, doc.fail_retry_count));
}

proptest! {
    #[test]
    fn prop_budget_n_allows_n_retries(budget in 0u32..50) {
        let si = ServiceInterruption::new("busy", 1_000).with_retry_budget(budget);
        prop_assert_eq!(retries_until_failure(&si), budget);
    }
}
