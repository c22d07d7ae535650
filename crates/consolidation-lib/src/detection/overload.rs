//! Overload detectors
//!
//! A host is overloaded when the CPU its guests request exceeds an upper
//! threshold. The threshold is either fixed or derived from the spread of the
//! host's utilization history; the local-regression detectors instead
//! extrapolate the history past the time a migration would take.
//!
//! Statistical detectors need enough history. Until they have it, or when the
//! history is degenerate, they delegate to a fallback detector.

use super::DetectionLog;
use crate::cluster::Cluster;
use crate::config::OverloadPolicy;
use crate::error::{EngineError, Result, StatsError};
use crate::models::HostId;
use crate::stats;
use std::fmt::Debug;
use tracing::trace;

/// Leading non-zero samples needed before a spread estimate is trusted
pub const MIN_HISTORY_FOR_SPREAD: usize = 12;

/// Samples fed to the local regression
pub const LOCAL_REGRESSION_WINDOW: usize = 10;

pub trait OverloadDetector: Debug + Send {
    /// Decide whether `host` is overloaded right now, recording the metric
    /// the decision used
    fn is_overloaded(&mut self, cluster: &Cluster, host: HostId) -> bool;

    fn name(&self) -> &'static str;

    fn log(&self) -> &DetectionLog;

    /// Drop records taken at `time`, so a later check at the same time
    /// records afresh
    fn discard_records_at(&mut self, time: f64);
}

/// Never reports overload
#[derive(Debug, Default)]
pub struct NeverOverloaded {
    log: DetectionLog,
}

impl OverloadDetector for NeverOverloaded {
    fn is_overloaded(&mut self, _cluster: &Cluster, _host: HostId) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "never"
    }

    fn log(&self) -> &DetectionLog {
        &self.log
    }

    fn discard_records_at(&mut self, time: f64) {
        self.log.discard_at(time);
    }
}

/// Overloaded when requested utilization exceeds a fixed threshold
#[derive(Debug)]
pub struct StaticThreshold {
    threshold: f64,
    log: DetectionLog,
}

impl StaticThreshold {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            log: DetectionLog::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

impl OverloadDetector for StaticThreshold {
    fn is_overloaded(&mut self, cluster: &Cluster, host: HostId) -> bool {
        self.log.record(cluster, host, self.threshold);
        cluster.host_requested_utilization(host) > self.threshold
    }

    fn name(&self) -> &'static str {
        "static_threshold"
    }

    fn log(&self) -> &DetectionLog {
        &self.log
    }

    fn discard_records_at(&mut self, time: f64) {
        self.log.discard_at(time);
    }
}

/// Robust spread estimator used by [`SpreadThreshold`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spread {
    MedianAbsoluteDeviation,
    InterQuartileRange,
}

/// Adaptive threshold `1 − safety × spread(history)`
#[derive(Debug)]
pub struct SpreadThreshold {
    spread: Spread,
    safety: f64,
    fallback: Box<dyn OverloadDetector>,
    log: DetectionLog,
}

impl SpreadThreshold {
    pub fn new(spread: Spread, safety: f64, fallback: Box<dyn OverloadDetector>) -> Self {
        Self {
            spread,
            safety,
            fallback,
            log: DetectionLog::new(),
        }
    }

    pub fn fallback(&self) -> &dyn OverloadDetector {
        self.fallback.as_ref()
    }

    fn upper_threshold(&self, history: &[f64]) -> std::result::Result<f64, StatsError> {
        let usable = stats::count_non_zero_beginning(history);
        if usable < MIN_HISTORY_FOR_SPREAD {
            return Err(StatsError::InsufficientData {
                needed: MIN_HISTORY_FOR_SPREAD,
                got: usable,
            });
        }
        let spread = match self.spread {
            Spread::MedianAbsoluteDeviation => stats::mad(history),
            Spread::InterQuartileRange => stats::iqr(history),
        };
        if spread.is_nan() {
            return Err(StatsError::Degenerate);
        }
        Ok(1.0 - self.safety * spread)
    }
}

impl OverloadDetector for SpreadThreshold {
    fn is_overloaded(&mut self, cluster: &Cluster, host: HostId) -> bool {
        let history = cluster.host_history(host);
        match self.upper_threshold(&history) {
            Ok(threshold) => {
                self.log.record(cluster, host, threshold);
                cluster.host_requested_utilization(host) > threshold
            }
            Err(err) => {
                trace!(host_id = %host, detector = self.name(), error = %err, "Using fallback detector");
                self.fallback.is_overloaded(cluster, host)
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.spread {
            Spread::MedianAbsoluteDeviation => "median_absolute_deviation",
            Spread::InterQuartileRange => "inter_quartile_range",
        }
    }

    fn log(&self) -> &DetectionLog {
        &self.log
    }

    fn discard_records_at(&mut self, time: f64) {
        self.log.discard_at(time);
        self.fallback.discard_records_at(time);
    }
}

/// Predicts utilization one migration ahead from a LOESS trend of the last
/// [`LOCAL_REGRESSION_WINDOW`] samples. Overloaded when
/// `safety × prediction ≥ 1`.
#[derive(Debug)]
pub struct LocalRegression {
    robust: bool,
    safety: f64,
    scheduling_interval: f64,
    fallback: Box<dyn OverloadDetector>,
    log: DetectionLog,
}

impl LocalRegression {
    pub fn new(safety: f64, scheduling_interval: f64, fallback: Box<dyn OverloadDetector>) -> Self {
        Self {
            robust: false,
            safety,
            scheduling_interval,
            fallback,
            log: DetectionLog::new(),
        }
    }

    /// Reweight the fit by its residuals to damp outliers
    pub fn robust(mut self) -> Self {
        self.robust = true;
        self
    }

    pub fn fallback(&self) -> &dyn OverloadDetector {
        self.fallback.as_ref()
    }

    fn predict(&self, cluster: &Cluster, host: HostId) -> std::result::Result<f64, StatsError> {
        let history = cluster.host_history(host);
        if history.len() < LOCAL_REGRESSION_WINDOW {
            return Err(StatsError::InsufficientData {
                needed: LOCAL_REGRESSION_WINDOW,
                got: history.len(),
            });
        }
        let oldest_first: Vec<f64> = history[..LOCAL_REGRESSION_WINDOW].iter().rev().copied().collect();
        let (intercept, slope) = if self.robust {
            stats::robust_loess_estimates(&oldest_first)?
        } else {
            stats::loess_estimates(&oldest_first)?
        };
        let migration_intervals = (cluster.max_guest_migration_time(host) / self.scheduling_interval).ceil();
        let predicted = (intercept + slope * (LOCAL_REGRESSION_WINDOW as f64 + migration_intervals)) * self.safety;
        if predicted.is_finite() {
            Ok(predicted)
        } else {
            Err(StatsError::Degenerate)
        }
    }
}

impl OverloadDetector for LocalRegression {
    fn is_overloaded(&mut self, cluster: &Cluster, host: HostId) -> bool {
        match self.predict(cluster, host) {
            Ok(predicted) => {
                self.log.record(cluster, host, predicted);
                predicted >= 1.0
            }
            Err(err) => {
                trace!(host_id = %host, detector = self.name(), error = %err, "Using fallback detector");
                self.fallback.is_overloaded(cluster, host)
            }
        }
    }

    fn name(&self) -> &'static str {
        if self.robust {
            "local_regression_robust"
        } else {
            "local_regression"
        }
    }

    fn log(&self) -> &DetectionLog {
        &self.log
    }

    fn discard_records_at(&mut self, time: f64) {
        self.log.discard_at(time);
        self.fallback.discard_records_at(time);
    }
}

fn check_safety(safety: f64) -> Result<()> {
    if safety < 0.0 || safety.is_nan() {
        return Err(EngineError::Config(format!(
            "safety parameter cannot be negative, got {}",
            safety
        )));
    }
    Ok(())
}

/// Build the detector chain a policy describes
pub fn build_overload_detector(policy: &OverloadPolicy, scheduling_interval: f64) -> Result<Box<dyn OverloadDetector>> {
    let detector: Box<dyn OverloadDetector> = match policy {
        OverloadPolicy::Never => Box::new(NeverOverloaded::default()),
        OverloadPolicy::StaticThreshold { threshold } => Box::new(StaticThreshold::new(*threshold)),
        OverloadPolicy::MedianAbsoluteDeviation { safety, fallback } => {
            check_safety(*safety)?;
            Box::new(SpreadThreshold::new(
                Spread::MedianAbsoluteDeviation,
                *safety,
                build_overload_detector(fallback, scheduling_interval)?,
            ))
        }
        OverloadPolicy::InterQuartileRange { safety, fallback } => {
            check_safety(*safety)?;
            Box::new(SpreadThreshold::new(
                Spread::InterQuartileRange,
                *safety,
                build_overload_detector(fallback, scheduling_interval)?,
            ))
        }
        OverloadPolicy::LocalRegression { safety, fallback } => {
            check_safety(*safety)?;
            Box::new(LocalRegression::new(
                *safety,
                scheduling_interval,
                build_overload_detector(fallback, scheduling_interval)?,
            ))
        }
        OverloadPolicy::LocalRegressionRobust { safety, fallback } => {
            check_safety(*safety)?;
            Box::new(
                LocalRegression::new(
                    *safety,
                    scheduling_interval,
                    build_overload_detector(fallback, scheduling_interval)?,
                )
                .robust(),
            )
        }
    };
    Ok(detector)
}
