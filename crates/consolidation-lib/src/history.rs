//! Bounded utilization history
//!
//! Keeps the most recent CPU-utilization samples, newest first. Once the cap
//! is reached the oldest sample is dropped on every push.

use std::collections::VecDeque;

/// Number of samples retained per guest
pub const HISTORY_LENGTH: usize = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationHistory {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for UtilizationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl UtilizationHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_LENGTH)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, sample: f64) {
        if self.capacity == 0 {
            return;
        }
        self.samples.push_front(sample);
        self.samples.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<f64> {
        self.samples.front().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Copy of the samples, newest first
    pub fn to_vec(&self) -> Vec<f64> {
        self.samples.iter().copied().collect()
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
