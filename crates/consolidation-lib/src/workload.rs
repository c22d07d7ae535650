//! Leaf demand models
//!
//! A guest that runs work directly (a container, or a VM without nested
//! containers) reports its CPU demand through a [`UtilizationModel`]: the
//! fraction of its spec MIPS it wants at a given virtual time.

use std::fmt::Debug;

pub trait UtilizationModel: Debug + Send + Sync {
    /// Requested fraction of the guest's MIPS at `now`, in [0, 1]
    fn utilization(&self, now: f64) -> f64;

    /// Earliest virtual time after `now` at which the demand changes, or
    /// `None` when it never will.
    fn next_change(&self, now: f64) -> Option<f64>;
}

/// Fixed demand for the whole run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantUtilization(pub f64);

impl UtilizationModel for ConstantUtilization {
    fn utilization(&self, _now: f64) -> f64 {
        self.0.clamp(0.0, 1.0)
    }

    fn next_change(&self, _now: f64) -> Option<f64> {
        None
    }
}

/// Samples taken every `interval` seconds, linearly interpolated between
/// neighbours. Past the last sample the final value holds.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceUtilization {
    samples: Vec<f64>,
    interval: f64,
}

impl TraceUtilization {
    pub fn new(samples: Vec<f64>, interval: f64) -> Self {
        Self {
            samples: samples.into_iter().map(|s| s.clamp(0.0, 1.0)).collect(),
            interval: if interval > 0.0 { interval } else { 1.0 },
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl UtilizationModel for TraceUtilization {
    fn utilization(&self, now: f64) -> f64 {
        let Some(last) = self.samples.last() else {
            return 0.0;
        };
        let position = (now.max(0.0)) / self.interval;
        let index = position.floor() as usize;
        if index + 1 >= self.samples.len() {
            return *last;
        }
        let fraction = position - index as f64;
        let (a, b) = (self.samples[index], self.samples[index + 1]);
        a + (b - a) * fraction
    }

    fn next_change(&self, now: f64) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let end = (self.samples.len() - 1) as f64 * self.interval;
        if now >= end {
            return None;
        }
        let next = ((now.max(0.0) / self.interval).floor() + 1.0) * self.interval;
        Some(next.min(end))
    }
}
