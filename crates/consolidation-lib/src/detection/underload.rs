//! Underload detection
//!
//! Picks one active host whose guests could be moved elsewhere so the host
//! can be switched off.

use crate::cluster::Cluster;
use crate::config::{LowerThreshold, UnderloadConfig, UnderloadStrategy};
use crate::models::{HostId, ParentRef};
use crate::stats;
use std::collections::BTreeSet;

use super::MIN_HISTORY_FOR_SPREAD;

#[derive(Debug, Clone)]
pub struct UnderloadDetector {
    config: UnderloadConfig,
    include_containers: bool,
}

impl UnderloadDetector {
    pub fn new(config: UnderloadConfig) -> Self {
        Self {
            config,
            include_containers: false,
        }
    }

    /// Also skip hosts where container-level migrations are in flight
    pub fn with_containers(mut self, include: bool) -> Self {
        self.include_containers = include;
        self
    }

    /// Utilization below which `host` counts as underloaded
    pub fn lower_threshold(&self, cluster: &Cluster, host: HostId) -> f64 {
        match self.config.lower_threshold {
            LowerThreshold::Static { value } => value,
            LowerThreshold::Iqr { base, safety } => {
                let history = cluster.host_history(host);
                if stats::count_non_zero_beginning(&history) < MIN_HISTORY_FOR_SPREAD {
                    return base;
                }
                let iqr = stats::iqr(&history);
                if iqr.is_nan() {
                    return base;
                }
                (base - safety * iqr).max(0.0)
            }
        }
    }

    fn qualifies(&self, cluster: &Cluster, host: HostId, excluded: &BTreeSet<HostId>) -> Option<f64> {
        if excluded.contains(&host) {
            return None;
        }
        let utilization = cluster.host_utilization(host);
        if utilization <= 0.0 || utilization >= self.lower_threshold(cluster, host) {
            return None;
        }
        if cluster.all_guests_migrating_out_or_any_migrating_in(host) {
            return None;
        }
        if self.include_containers && cluster.all_containers_migrating_out_or_any_migrating_in(host) {
            return None;
        }
        Some(utilization)
    }

    /// The host to drain next, if any
    pub fn find_underloaded_host(&self, cluster: &Cluster, excluded: &BTreeSet<HostId>) -> Option<HostId> {
        let mut candidates = cluster
            .host_ids()
            .filter_map(|h| self.qualifies(cluster, h, excluded).map(|u| (h, u)));

        match self.config.strategy {
            UnderloadStrategy::FirstFound => candidates.next().map(|(h, _)| h),
            UnderloadStrategy::MinimumUtilization => {
                let mut best: Option<(HostId, f64)> = None;
                for (host, utilization) in candidates {
                    if best.map_or(true, |(_, u)| utilization < u) {
                        best = Some((host, utilization));
                    }
                }
                best.map(|(h, _)| h)
            }
            UnderloadStrategy::MaxPowerPerGuest => {
                let mut best: Option<(HostId, f64)> = None;
                for (host, _) in candidates {
                    let residents = cluster.guests_on(ParentRef::Host(host)).len();
                    if residents == 0 {
                        continue;
                    }
                    let per_guest = cluster.host_power(host).unwrap_or(0.0) / residents as f64;
                    if best.map_or(true, |(_, p)| per_guest > p) {
                        best = Some((host, per_guest));
                    }
                }
                best.map(|(h, _)| h)
            }
        }
    }
}
