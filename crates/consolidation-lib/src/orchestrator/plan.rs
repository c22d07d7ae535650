//! Planning phases of a control tick, run against a cluster snapshot

use super::MigrationOrchestrator;
use crate::cluster::Cluster;
use crate::config::MigrationLevel;
use crate::context::SimulationContext;
use crate::models::{GuestId, GuestState, HostId, ParentRef};
use crate::observability::MigrationReason;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::trace;

/// A move accepted on the snapshot, not yet reserved on the live cluster
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct PlannedMove {
    pub guest: GuestId,
    pub source: ParentRef,
    pub target: ParentRef,
    pub reason: MigrationReason,
}

/// Largest current demand first
fn sort_by_demand(snapshot: &Cluster, guests: &mut [GuestId]) {
    guests.sort_by(|a, b| {
        snapshot
            .requested_mips(*b)
            .partial_cmp(&snapshot.requested_mips(*a))
            .unwrap_or(Ordering::Equal)
    });
}

impl MigrationOrchestrator {
    pub(super) fn plan(&mut self, ctx: &mut SimulationContext, snapshot: &mut Cluster) -> Vec<PlannedMove> {
        let overloaded = self.detect_overloaded(ctx, snapshot);
        let victims = self.evict_from_overloaded(ctx, snapshot, &overloaded);
        let mut moves = self.place_victims(ctx, snapshot, victims, &overloaded);
        if self.consolidate_underloaded {
            let drained = self.drain_underloaded(ctx, snapshot, &overloaded, &moves);
            moves.extend(drained);
        }
        moves
    }

    fn detect_overloaded(&mut self, ctx: &mut SimulationContext, snapshot: &Cluster) -> BTreeSet<HostId> {
        let now = snapshot.now();
        let mut overloaded = BTreeSet::new();
        for host in snapshot.host_ids() {
            if self.overload.is_overloaded(snapshot, host) {
                ctx.metrics().inc_overloaded_hosts();
                ctx.logger().log_overload_detected(
                    now,
                    host,
                    snapshot.host_requested_utilization(host),
                    self.overload.name(),
                );
                overloaded.insert(host);
            }
        }
        overloaded
    }

    /// Guests on `host` that may move at the configured level
    fn candidates(&self, snapshot: &Cluster, host: HostId) -> Vec<GuestId> {
        match self.level {
            MigrationLevel::Vm => snapshot.migratable_guests(ParentRef::Host(host)),
            MigrationLevel::Container => snapshot
                .containers_on_host(host)
                .into_iter()
                .filter(|c| snapshot.guest(*c).map(|g| !g.is_in_migration()).unwrap_or(false))
                .collect(),
        }
    }

    /// Evict from each overloaded host until it no longer is, or nothing is
    /// left to pick. Evicted guests are removed from the snapshot.
    fn evict_from_overloaded(
        &mut self,
        ctx: &mut SimulationContext,
        snapshot: &mut Cluster,
        overloaded: &BTreeSet<HostId>,
    ) -> Vec<(GuestId, ParentRef)> {
        let mut victims = Vec::new();
        for host in overloaded {
            loop {
                let candidates = self.candidates(snapshot, *host);
                let Some(guest) = self.selection.select(ctx, snapshot, *host, &candidates) else {
                    break;
                };
                let Some(source) = snapshot.guest(guest).and_then(|g| g.parent()) else {
                    break;
                };
                trace!(host_id = %host, guest_id = %guest, policy = self.selection.name(), "Selected guest for eviction");
                self.states.insert(guest, GuestState::SelectedForEviction);
                snapshot.destroy(source, guest);
                victims.push((guest, source));
                if !self.overload.is_overloaded(snapshot, *host) {
                    break;
                }
            }
        }
        victims
    }

    fn place_victims(
        &mut self,
        ctx: &mut SimulationContext,
        snapshot: &mut Cluster,
        mut victims: Vec<(GuestId, ParentRef)>,
        excluded: &BTreeSet<HostId>,
    ) -> Vec<PlannedMove> {
        let now = snapshot.now();
        victims.sort_by(|a, b| {
            snapshot
                .requested_mips(b.0)
                .partial_cmp(&snapshot.requested_mips(a.0))
                .unwrap_or(Ordering::Equal)
        });

        self.placement.begin_batch();
        let mut moves = Vec::with_capacity(victims.len());
        for (guest, source) in victims {
            self.states.insert(guest, GuestState::PendingPlacement);
            match self.placement.find_host(snapshot, self.overload.as_mut(), guest, excluded) {
                Some(target) if snapshot.create(target, guest) => moves.push(PlannedMove {
                    guest,
                    source,
                    target,
                    reason: MigrationReason::Overload,
                }),
                _ => {
                    self.states.remove(&guest);
                    self.selection.forget(guest);
                    ctx.metrics().inc_placement_failures();
                    ctx.logger().log_placement_failed(now, guest);
                }
            }
        }
        moves
    }

    /// Drain underloaded hosts one at a time. Hosts that are switched off,
    /// overloaded, already drained or receiving guests are left alone.
    fn drain_underloaded(
        &mut self,
        ctx: &mut SimulationContext,
        snapshot: &mut Cluster,
        overloaded: &BTreeSet<HostId>,
        moves: &[PlannedMove],
    ) -> Vec<PlannedMove> {
        let now = snapshot.now();
        let switched_off: BTreeSet<HostId> = snapshot
            .host_ids()
            .filter(|h| snapshot.host_utilization(*h) == 0.0)
            .collect();
        let mut excluded_for_placement: BTreeSet<HostId> = overloaded.union(&switched_off).copied().collect();
        let mut excluded_for_underload = excluded_for_placement.clone();
        excluded_for_underload.extend(moves.iter().filter_map(|m| snapshot.host_of_parent(m.target)));

        let host_count = snapshot.hosts().len();
        let mut drained = Vec::new();
        while excluded_for_underload.len() < host_count {
            let Some(host) = self.underload.find_underloaded_host(snapshot, &excluded_for_underload) else {
                break;
            };
            excluded_for_underload.insert(host);
            excluded_for_placement.insert(host);

            let guests = self.candidates(snapshot, host);
            if guests.is_empty() {
                continue;
            }
            ctx.metrics().inc_underloaded_hosts();
            ctx.logger()
                .log_underload_detected(now, host, snapshot.host_utilization(host), guests.len());

            let count = guests.len();
            match self.place_all(snapshot, guests, &excluded_for_placement) {
                Some(placed) => {
                    excluded_for_underload.extend(placed.iter().filter_map(|m| snapshot.host_of_parent(m.target)));
                    drained.extend(placed);
                }
                None => ctx.logger().log_underload_rollback(now, host, count),
            }
        }
        drained
    }

    /// Place every guest or none. On failure the targets already taken in
    /// the snapshot are released again.
    fn place_all(
        &mut self,
        snapshot: &mut Cluster,
        mut guests: Vec<GuestId>,
        excluded: &BTreeSet<HostId>,
    ) -> Option<Vec<PlannedMove>> {
        sort_by_demand(snapshot, &mut guests);
        for guest in &guests {
            self.states.insert(*guest, GuestState::SelectedForEviction);
        }

        self.placement.begin_batch();
        let mut placed: Vec<PlannedMove> = Vec::with_capacity(guests.len());
        for guest in &guests {
            let source = snapshot.guest(*guest).and_then(|g| g.parent());
            self.states.insert(*guest, GuestState::PendingPlacement);
            let target = self.placement.find_host(snapshot, self.overload.as_mut(), *guest, excluded);
            match (source, target) {
                (Some(source), Some(target)) if snapshot.create(target, *guest) => placed.push(PlannedMove {
                    guest: *guest,
                    source,
                    target,
                    reason: MigrationReason::Underload,
                }),
                _ => {
                    for mv in &placed {
                        snapshot.destroy(mv.target, mv.guest);
                    }
                    for g in &guests {
                        self.states.remove(g);
                        self.selection.forget(*g);
                    }
                    return None;
                }
            }
        }
        Some(placed)
    }
}
