//! Shared FIFO of pending work units drained by the worker pool.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::WorkUnit;

/// A concurrency-safe queue of units waiting for a worker.
pub struct WorkQueue<U> {
    pending: Mutex<VecDeque<U>>,
}

impl<U: WorkUnit> WorkQueue<U> {
    pub fn new(units: Vec<U>) -> Self {
        Self {
            pending: Mutex::new(units.into()),
        }
    }

    /// Take the next unit, if any remain.
    pub fn pop(&self) -> Option<U> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels of units still waiting, at most `limit` of them.
    pub fn pending_labels(&self, limit: usize) -> Vec<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .take(limit)
            .map(WorkUnit::label)
            .collect()
    }
}
