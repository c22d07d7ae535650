//! Host load detection
//!
//! Overload detectors decide whether a host must shed guests; the underload
//! detector picks a lightly used host to drain and switch off. Detectors keep
//! a log of the threshold or prediction behind each decision.

mod overload;
mod underload;

pub use overload::{
    build_overload_detector, LocalRegression, NeverOverloaded, OverloadDetector, Spread,
    SpreadThreshold, StaticThreshold, LOCAL_REGRESSION_WINDOW, MIN_HISTORY_FOR_SPREAD,
};
pub use underload::UnderloadDetector;

use crate::cluster::Cluster;
use crate::models::{DetectionRecord, HostId};
use std::collections::BTreeMap;

/// Per-host decision log, at most one record per virtual time
#[derive(Debug, Clone, Default)]
pub struct DetectionLog {
    records: BTreeMap<HostId, Vec<DetectionRecord>>,
}

impl DetectionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `metric` for `host` at the cluster's current time. Later calls
    /// at the same time are ignored.
    pub fn record(&mut self, cluster: &Cluster, host: HostId, metric: f64) {
        let time = cluster.now();
        let entries = self.records.entry(host).or_default();
        if entries.iter().any(|r| r.time == time) {
            return;
        }
        entries.push(DetectionRecord {
            time,
            utilization: cluster.host_utilization(host),
            metric,
        });
    }

    pub fn for_host(&self, host: HostId) -> &[DetectionRecord] {
        self.records.get(&host).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.records.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record taken at `time`
    pub fn discard_at(&mut self, time: f64) {
        for entries in self.records.values_mut() {
            entries.retain(|r| r.time != time);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
