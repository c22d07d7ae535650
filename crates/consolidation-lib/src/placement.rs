//! Target selection for guests that must move or start
//!
//! Every policy applies the same feasibility rules and differs only in how
//! it ranks the feasible hosts:
//!
//! - the host must not be excluded and must have room for the guest
//! - a host that is already doing work must not become overloaded once the
//!   guest lands (checked by creating the guest speculatively, asking the
//!   detector, then destroying it again)
//!
//! VMs are placed on a host; containers on the first VM of the chosen host
//! that has room.

use crate::cluster::Cluster;
use crate::config::PlacementPolicyKind;
use crate::detection::{OverloadDetector, LOCAL_REGRESSION_WINDOW};
use crate::models::{GuestId, GuestKind, HostId, ParentRef};
use crate::stats;
use std::collections::BTreeSet;
use std::fmt::Debug;

pub trait PlacementPolicy: Debug + Send {
    /// Best target for `guest` outside `excluded`, or `None` when nothing is
    /// feasible. `cluster` is left as it was found.
    fn find_host(
        &mut self,
        cluster: &mut Cluster,
        detector: &mut dyn OverloadDetector,
        guest: GuestId,
        excluded: &BTreeSet<HostId>,
    ) -> Option<ParentRef>;

    /// Called before each batch of placements
    fn begin_batch(&mut self) {}

    fn name(&self) -> &'static str;
}

pub fn build_placement_policy(kind: PlacementPolicyKind) -> Box<dyn PlacementPolicy> {
    match kind {
        PlacementPolicyKind::MinimumPowerIncrease => Box::new(MinimumPowerIncrease),
        PlacementPolicyKind::MinimumBusyPes => Box::new(MinimumBusyPes::default()),
        PlacementPolicyKind::LowestPredictedUtilization => Box::new(LowestPredictedUtilization),
    }
}

/// Where on `host` the guest would go, if it fits
fn target_on(cluster: &Cluster, host: HostId, guest: GuestId) -> Option<ParentRef> {
    let kind = cluster.guest(guest)?.kind();
    match kind {
        GuestKind::Vm => {
            let target = ParentRef::Host(host);
            cluster.is_suitable(target, guest).then_some(target)
        }
        GuestKind::Container => cluster
            .guests_on(ParentRef::Host(host))
            .iter()
            .filter(|vm| {
                cluster
                    .guest(**vm)
                    .map(|g| g.kind() == GuestKind::Vm && !g.is_in_migration())
                    .unwrap_or(false)
            })
            .map(|vm| ParentRef::Vm(*vm))
            .find(|target| cluster.is_suitable(*target, guest)),
    }
}

fn overloaded_after(
    cluster: &mut Cluster,
    detector: &mut dyn OverloadDetector,
    target: ParentRef,
    host: HostId,
    guest: GuestId,
) -> bool {
    if !cluster.create(target, guest) {
        return true;
    }
    let overloaded = detector.is_overloaded(cluster, host);
    cluster.destroy(target, guest);
    overloaded
}

/// Target on `host` that passes every feasibility rule
fn feasible_target(
    cluster: &mut Cluster,
    detector: &mut dyn OverloadDetector,
    host: HostId,
    guest: GuestId,
    excluded: &BTreeSet<HostId>,
) -> Option<ParentRef> {
    if excluded.contains(&host) {
        return None;
    }
    let target = target_on(cluster, host, guest)?;
    let busy = cluster.host(host).map(|h| h.allocated_mips() != 0.0).unwrap_or(false);
    if busy && overloaded_after(cluster, detector, target, host, guest) {
        return None;
    }
    Some(target)
}

/// Host utilization once `guest`'s current demand is added
fn utilization_after(cluster: &Cluster, host: HostId, guest: GuestId) -> Option<f64> {
    let h = cluster.host(host)?;
    if h.total_mips() <= 0.0 {
        return None;
    }
    Some((h.allocated_mips() + cluster.requested_mips(guest)) / h.total_mips())
}

/// Pick the host whose power draw grows the least
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimumPowerIncrease;

impl PlacementPolicy for MinimumPowerIncrease {
    fn find_host(
        &mut self,
        cluster: &mut Cluster,
        detector: &mut dyn OverloadDetector,
        guest: GuestId,
        excluded: &BTreeSet<HostId>,
    ) -> Option<ParentRef> {
        let mut best: Option<(ParentRef, f64)> = None;
        let hosts: Vec<HostId> = cluster.host_ids().collect();
        for host in hosts {
            let Some(target) = feasible_target(cluster, detector, host, guest, excluded) else {
                continue;
            };
            let Some(h) = cluster.host(host) else { continue };
            let (Some(now), Some(after)) = (
                h.power(),
                utilization_after(cluster, host, guest).and_then(|u| h.power_at(u)),
            ) else {
                continue;
            };
            let increase = after - now;
            if best.map_or(true, |(_, b)| increase < b) {
                best = Some((target, increase));
            }
        }
        best.map(|(target, _)| target)
    }

    fn name(&self) -> &'static str {
        "minimum_power_increase"
    }
}

/// Bin-pack on busy PEs. Hosts are ranked by increasing free MIPS and
/// scanned from a rotating start position that advances with every guest
/// placed in the current batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimumBusyPes {
    position: usize,
}

impl MinimumBusyPes {
    pub fn position(&self) -> usize {
        self.position
    }
}

impl PlacementPolicy for MinimumBusyPes {
    fn find_host(
        &mut self,
        cluster: &mut Cluster,
        detector: &mut dyn OverloadDetector,
        guest: GuestId,
        excluded: &BTreeSet<HostId>,
    ) -> Option<ParentRef> {
        let mut order: Vec<HostId> = cluster.host_ids().collect();
        if order.is_empty() {
            return None;
        }
        order.sort_by(|a, b| {
            let fa = cluster.host(*a).map(|h| h.available_mips()).unwrap_or(0.0);
            let fb = cluster.host(*b).map(|h| h.available_mips()).unwrap_or(0.0);
            fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
        });
        let start = self.position % order.len();

        let mut best: Option<(ParentRef, u32)> = None;
        for i in (start..order.len()).chain(0..start) {
            let host = order[i];
            let Some(target) = feasible_target(cluster, detector, host, guest, excluded) else {
                continue;
            };
            let busy = cluster.host(host).map(|h| h.busy_pes()).unwrap_or(u32::MAX);
            if best.map_or(true, |(_, b)| busy < b) {
                best = Some((target, busy));
            }
        }
        if best.is_some() {
            self.position = (self.position + 1) % order.len();
        }
        best.map(|(target, _)| target)
    }

    fn begin_batch(&mut self) {
        self.position = 0;
    }

    fn name(&self) -> &'static str {
        "minimum_busy_pes"
    }
}

/// Pick the host with the lowest utilization predicted one migration ahead
/// by a LOESS trend of its history; hosts with a short or degenerate history
/// are ranked by their utilization right after placement.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowestPredictedUtilization;

impl LowestPredictedUtilization {
    pub fn predicted_utilization(cluster: &Cluster, host: HostId, guest: GuestId) -> Option<f64> {
        let history = cluster.host_history(host);
        if history.len() >= LOCAL_REGRESSION_WINDOW {
            let oldest_first: Vec<f64> = history[..LOCAL_REGRESSION_WINDOW].iter().rev().copied().collect();
            if let Ok((intercept, slope)) = stats::loess_estimates(&oldest_first) {
                let interval = cluster.scheduling_interval();
                let ahead = if interval > 0.0 {
                    (cluster.max_guest_migration_time(host) / interval).ceil()
                } else {
                    0.0
                };
                let predicted = intercept + slope * (LOCAL_REGRESSION_WINDOW as f64 + ahead);
                if predicted.is_finite() {
                    return Some(predicted);
                }
            }
        }
        utilization_after(cluster, host, guest)
    }
}

impl PlacementPolicy for LowestPredictedUtilization {
    fn find_host(
        &mut self,
        cluster: &mut Cluster,
        detector: &mut dyn OverloadDetector,
        guest: GuestId,
        excluded: &BTreeSet<HostId>,
    ) -> Option<ParentRef> {
        let mut best: Option<(ParentRef, f64)> = None;
        let hosts: Vec<HostId> = cluster.host_ids().collect();
        for host in hosts {
            let Some(target) = feasible_target(cluster, detector, host, guest, excluded) else {
                continue;
            };
            let Some(predicted) = Self::predicted_utilization(cluster, host, guest) else {
                continue;
            };
            if best.map_or(true, |(_, b)| predicted < b) {
                best = Some((target, predicted));
            }
        }
        best.map(|(target, _)| target)
    }

    fn name(&self) -> &'static str {
        "lowest_predicted_utilization"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{NeverOverloaded, StaticThreshold};
    use crate::testing::{cluster, guest_spec, place_vm, seed_history};
    use crate::workload::ConstantUtilization;
    use std::sync::Arc;

    fn unplaced_vm(c: &mut Cluster, local: u32, mips: f64) -> GuestId {
        let id = GuestId::new(2, local);
        c.register_vm(id, guest_spec(mips, 256.0), Some(Arc::new(ConstantUtilization(1.0))))
            .unwrap();
        id
    }

    #[test]
    fn test_power_prefers_active_host() {
        // switching on an idle host costs its static power
        let mut c = cluster(2, 2, 1000.0);
        place_vm(&mut c, HostId(1), 1, 500.0, 512.0, 1.0);
        let guest = unplaced_vm(&mut c, 1, 300.0);
        let mut detector = StaticThreshold::new(0.9);
        let target = MinimumPowerIncrease.find_host(&mut c, &mut detector, guest, &BTreeSet::new());
        assert_eq!(target, Some(ParentRef::Host(HostId(1))));
    }

    #[test]
    fn test_speculative_check_rejects_overload_and_restores() {
        let mut c = cluster(2, 2, 1000.0);
        place_vm(&mut c, HostId(1), 1, 800.0, 512.0, 1.0);
        let guest = unplaced_vm(&mut c, 1, 300.0);
        let before = c.host(HostId(1)).unwrap().allocated_mips();

        let mut detector = StaticThreshold::new(0.5);
        let target = MinimumPowerIncrease.find_host(&mut c, &mut detector, guest, &BTreeSet::new());
        assert_eq!(target, Some(ParentRef::Host(HostId(0))));
        assert_eq!(c.host(HostId(1)).unwrap().allocated_mips(), before);
        assert_eq!(c.guests_on(ParentRef::Host(HostId(1))).len(), 1);
        assert!(c.guest(guest).unwrap().parent().is_none());
    }

    #[test]
    fn test_excluded_and_full_hosts() {
        let mut c = cluster(2, 1, 1000.0);
        place_vm(&mut c, HostId(1), 1, 900.0, 512.0, 1.0);
        let guest = unplaced_vm(&mut c, 1, 300.0);
        let excluded: BTreeSet<HostId> = [HostId(0)].into_iter().collect();
        let mut detector = NeverOverloaded::default();
        assert_eq!(MinimumPowerIncrease.find_host(&mut c, &mut detector, guest, &excluded), None);
    }

    #[test]
    fn test_busy_pes_round_robin() {
        let mut c = cluster(3, 4, 1000.0);
        let mut detector = NeverOverloaded::default();
        let mut policy = MinimumBusyPes::default();
        policy.begin_batch();

        let first = unplaced_vm(&mut c, 1, 100.0);
        let second = unplaced_vm(&mut c, 2, 100.0);
        // all idle: the scan start decides the pick
        assert_eq!(
            policy.find_host(&mut c, &mut detector, first, &BTreeSet::new()),
            Some(ParentRef::Host(HostId(0)))
        );
        assert_eq!(policy.position(), 1);
        assert_eq!(
            policy.find_host(&mut c, &mut detector, second, &BTreeSet::new()),
            Some(ParentRef::Host(HostId(1)))
        );

        policy.begin_batch();
        assert_eq!(policy.position(), 0);
    }

    #[test]
    fn test_busy_pes_prefers_fewest_busy() {
        let mut c = cluster(2, 4, 1000.0);
        place_vm(&mut c, HostId(0), 1, 1000.0, 512.0, 1.0);
        place_vm(&mut c, HostId(0), 2, 1000.0, 512.0, 1.0);
        place_vm(&mut c, HostId(1), 3, 1000.0, 512.0, 1.0);
        let guest = unplaced_vm(&mut c, 1, 100.0);
        let mut policy = MinimumBusyPes::default();
        let mut detector = NeverOverloaded::default();
        assert_eq!(
            policy.find_host(&mut c, &mut detector, guest, &BTreeSet::new()),
            Some(ParentRef::Host(HostId(1)))
        );
    }

    #[test]
    fn test_predicted_utilization_prefers_falling_trend() {
        let mut c = cluster(2, 1, 1000.0);
        let rising = place_vm(&mut c, HostId(0), 1, 400.0, 512.0, 1.0);
        let falling = place_vm(&mut c, HostId(1), 2, 400.0, 512.0, 1.0);
        let up: Vec<f64> = (0..10).map(|i| 0.5 + 0.05 * i as f64).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        seed_history(&mut c, rising, &up);
        seed_history(&mut c, falling, &down);

        let guest = unplaced_vm(&mut c, 1, 100.0);
        let mut detector = NeverOverloaded::default();
        assert_eq!(
            LowestPredictedUtilization.find_host(&mut c, &mut detector, guest, &BTreeSet::new()),
            Some(ParentRef::Host(HostId(1)))
        );
    }

    #[test]
    fn test_container_goes_into_vm() {
        let mut c = cluster(1, 2, 1000.0);
        let vm = GuestId::new(1, 1);
        c.register_vm(vm, guest_spec(1000.0, 2048.0), None).unwrap();
        assert!(c.create(ParentRef::Host(HostId(0)), vm));
        let container = GuestId::new(3, 1);
        c.register_container(container, guest_spec(200.0, 128.0), Arc::new(ConstantUtilization(0.5)))
            .unwrap();

        let mut detector = NeverOverloaded::default();
        assert_eq!(
            MinimumPowerIncrease.find_host(&mut c, &mut detector, container, &BTreeSet::new()),
            Some(ParentRef::Vm(vm))
        );
    }
}
