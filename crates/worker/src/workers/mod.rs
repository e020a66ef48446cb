//! Worker pools draining the in-memory queues.
//!
//! Every worker takes one set at a time and wraps it in a [`ClaimedBatch`].
//! Whatever the worker has not explicitly finished when the batch goes out
//! of scope is handed back to the job store, whether the worker returned
//! normally, bailed out with `?`, or panicked.

mod delete;
mod document;
mod expire;

pub use delete::DeleteWorker;
pub use document::{recheck_schedule, DocumentWorker};
pub use expire::ExpireWorker;

use crawler_domain::ports::ActivityLogger;
use crawler_domain::ActivityRecord;

/// Items claimed from the job store by one worker.
pub(crate) struct ClaimedBatch<T, R>
where
    R: FnMut(&T),
{
    items: Vec<T>,
    processed: Vec<bool>,
    release: R,
}

impl<T, R> ClaimedBatch<T, R>
where
    R: FnMut(&T),
{
    /// `release` runs once per item left unprocessed at drop.
    pub(crate) fn new(items: Vec<T>, release: R) -> Self {
        let processed = vec![false; items.len()];
        Self {
            items,
            processed,
            release,
        }
    }

    pub(crate) fn items(&self) -> &[T] {
        &self.items
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn mark_processed(&mut self, index: usize) {
        if let Some(flag) = self.processed.get_mut(index) {
            *flag = true;
        }
    }

    pub(crate) fn mark_all_processed(&mut self, indexes: &[usize]) {
        for &index in indexes {
            self.mark_processed(index);
        }
    }

    pub(crate) fn unprocessed_count(&self) -> usize {
        self.processed.iter().filter(|done| !**done).count()
    }
}

impl<T, R> Drop for ClaimedBatch<T, R>
where
    R: FnMut(&T),
{
    fn drop(&mut self) {
        for (item, done) in self.items.iter().zip(&self.processed) {
            if !*done {
                (self.release)(item);
            }
        }
    }
}

pub(crate) fn log_activities(logger: &dyn ActivityLogger, records: Vec<ActivityRecord>) {
    for record in records {
        logger.record_activity(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_unprocessed_items_are_released() {
        let released = RefCell::new(Vec::new());
        {
            let mut batch = ClaimedBatch::new(vec!["a", "b", "c"], |item: &&str| {
                released.borrow_mut().push(item.to_string())
            });
            batch.mark_processed(1);
            assert_eq!(batch.unprocessed_count(), 2);
        }
        assert_eq!(*released.borrow(), vec!["a", "c"]);
    }

    #[test]
    fn test_release_runs_during_panic() {
        let released = RefCell::new(0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut batch = ClaimedBatch::new(vec![1, 2, 3], |_: &i32| *released.borrow_mut() += 1);
            batch.mark_all_processed(&[0]);
            panic!("connector exploded");
        }));
        assert!(result.is_err());
        assert_eq!(*released.borrow(), 2);
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let released = RefCell::new(0);
        {
            let mut batch = ClaimedBatch::new(vec![()], |_: &()| *released.borrow_mut() += 1);
            batch.mark_processed(5);
            assert_eq!(batch.len(), 1);
        }
        assert_eq!(*released.borrow(), 1);
    }
}
