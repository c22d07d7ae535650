//! Migration orchestration
//!
//! The orchestrator drives one control tick at a time:
//!
//! 1. Detect overloaded hosts.
//! 2. Evict guests from each of them until it is no longer overloaded.
//! 3. Find targets for the evicted guests, largest demand first.
//! 4. Drain underloaded hosts, all of a host's guests or none of them.
//! 5. Reserve every accepted target on the live cluster and hand the plan
//!    to the caller, who delivers completion after the migration delay.
//!
//! Steps 1 to 4 run on a copy of the cluster so every policy sees the
//! pre-tick state; only step 5 touches the live cluster.
//!
//! Per guest the lifecycle is `Resident -> SelectedForEviction ->
//! PendingPlacement -> Migrating -> Resident`, falling back to `Resident`
//! when no target is found.

mod plan;


use crate::cluster::{migration_time, Cluster};
use crate::config::{EngineConfig, MigrationLevel};
use crate::context::SimulationContext;
use crate::detection::{build_overload_detector, OverloadDetector, UnderloadDetector};
use crate::error::Result;
use crate::models::{GuestId, GuestState, HostId, MigrationPlanEntry, ParentRef};
use crate::observability::MigrationReason;
use crate::placement::{build_placement_policy, PlacementPolicy};
use crate::selection::{build_selection_policy, GuestSelectionPolicy};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// A reserved migration waiting for its completion event
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingMigration {
    pub entry: MigrationPlanEntry,
    pub reason: MigrationReason,
    /// Virtual time the completion is expected at
    pub completes_at: f64,
}

#[derive(Debug)]
pub struct MigrationOrchestrator {
    overload: Box<dyn OverloadDetector>,
    underload: UnderloadDetector,
    selection: Box<dyn GuestSelectionPolicy>,
    placement: Box<dyn PlacementPolicy>,
    level: MigrationLevel,
    consolidate_underloaded: bool,
    cancel_overloaded_targets: bool,
    pending: BTreeMap<GuestId, PendingMigration>,
    states: BTreeMap<GuestId, GuestState>,
    completed: u64,
}

impl MigrationOrchestrator {
    /// Build the policies `config` names
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let overload = build_overload_detector(&config.overload, config.scheduling_interval)?;
        let underload = UnderloadDetector::new(config.underload)
            .with_containers(config.migration_level == MigrationLevel::Container);
        let mut orchestrator = Self::from_parts(
            overload,
            underload,
            build_selection_policy(&config.selection),
            build_placement_policy(config.placement),
        )
        .with_level(config.migration_level);
        orchestrator.consolidate_underloaded = config.consolidate_underloaded;
        orchestrator.cancel_overloaded_targets = config.cancel_overloaded_targets;
        Ok(orchestrator)
    }

    /// Assemble from explicit policies: VM level, underload draining on,
    /// no target cancellation
    pub fn from_parts(
        overload: Box<dyn OverloadDetector>,
        underload: UnderloadDetector,
        selection: Box<dyn GuestSelectionPolicy>,
        placement: Box<dyn PlacementPolicy>,
    ) -> Self {
        Self {
            overload,
            underload,
            selection,
            placement,
            level: MigrationLevel::Vm,
            consolidate_underloaded: true,
            cancel_overloaded_targets: false,
            pending: BTreeMap::new(),
            states: BTreeMap::new(),
            completed: 0,
        }
    }

    pub fn with_level(mut self, level: MigrationLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_underload_consolidation(mut self, enabled: bool) -> Self {
        self.consolidate_underloaded = enabled;
        self
    }

    pub fn with_target_cancellation(mut self, enabled: bool) -> Self {
        self.cancel_overloaded_targets = enabled;
        self
    }

    pub fn level(&self) -> MigrationLevel {
        self.level
    }

    pub fn overload_detector(&self) -> &dyn OverloadDetector {
        self.overload.as_ref()
    }

    pub fn selection_policy(&self) -> &dyn GuestSelectionPolicy {
        self.selection.as_ref()
    }

    pub fn placement_policy(&self) -> &dyn PlacementPolicy {
        self.placement.as_ref()
    }

    pub fn guest_state(&self, guest: GuestId) -> GuestState {
        self.states.get(&guest).copied().unwrap_or(GuestState::Resident)
    }

    pub fn pending_migration(&self, guest: GuestId) -> Option<&PendingMigration> {
        self.pending.get(&guest)
    }

    pub fn pending_migrations(&self) -> impl Iterator<Item = &PendingMigration> {
        self.pending.values()
    }

    pub fn completed_migrations(&self) -> u64 {
        self.completed
    }

    /// Forget in-flight bookkeeping and per-run policy state. Reservations
    /// already made on a cluster are not undone.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.states.clear();
        self.completed = 0;
        self.selection.reset();
        self.placement.begin_batch();
    }

    /// Plan and reserve this tick's migrations. The returned entries must be
    /// delivered back through [`Self::on_migration_complete`] once their
    /// delay has elapsed. An error is fatal to the run.
    pub fn run_control_tick(
        &mut self,
        ctx: &mut SimulationContext,
        cluster: &mut Cluster,
    ) -> Result<Vec<MigrationPlanEntry>> {
        let now = cluster.now();
        ctx.metrics().inc_control_ticks();

        if self.cancel_overloaded_targets {
            self.cancel_migrations_to_overloaded_hosts(ctx, cluster);
        }

        let moves = {
            let mut snapshot = cluster.clone();
            self.plan(ctx, &mut snapshot)
        };

        let mut entries = Vec::with_capacity(moves.len());
        for mv in moves {
            if let Err(err) = cluster.add_migrating_in(mv.target, mv.guest) {
                ctx.logger().log_fatal(now, &err);
                return Err(err);
            }
            let entry = MigrationPlanEntry {
                guest: mv.guest,
                source: mv.source,
                target: mv.target,
                estimated_delay: migration_delay(cluster, mv.guest, mv.target),
                decided_at: now,
            };
            ctx.metrics().observe_migration_planned(mv.reason, entry.estimated_delay);
            ctx.logger().log_migration_planned(&entry, mv.reason);
            self.states.insert(mv.guest, GuestState::Migrating);
            self.pending.insert(
                mv.guest,
                PendingMigration {
                    entry,
                    reason: mv.reason,
                    completes_at: now + entry.estimated_delay,
                },
            );
            entries.push(entry);
        }

        let active = cluster.hosts().iter().filter(|h| h.is_active()).count();
        let power = cluster.total_power();
        ctx.metrics().set_cluster_state(active, power);
        ctx.logger().log_tick_summary(now, entries.len(), active, power);
        Ok(entries)
    }

    /// Commit a migration whose delay has elapsed. Completions that do not
    /// match a pending migration (cancelled or already delivered) are
    /// ignored.
    pub fn on_migration_complete(
        &mut self,
        ctx: &mut SimulationContext,
        cluster: &mut Cluster,
        entry: &MigrationPlanEntry,
    ) -> Result<()> {
        let now = cluster.now();
        let pending = match self.pending.get(&entry.guest) {
            Some(p) if p.entry.target == entry.target && p.entry.decided_at == entry.decided_at => *p,
            _ => {
                warn!(guest_id = %entry.guest, target = %entry.target, "Ignoring completion of unknown migration");
                return Ok(());
            }
        };
        self.pending.remove(&entry.guest);

        if let Err(err) = cluster.commit_migration(pending.entry.source, pending.entry.target, entry.guest) {
            ctx.logger().log_fatal(now, &err);
            return Err(err);
        }
        self.states.remove(&entry.guest);
        self.completed += 1;
        ctx.metrics().inc_migrations_completed();
        ctx.logger().log_migration_committed(now, &pending.entry);
        self.selection.on_migration_committed(ctx, cluster, entry.guest);
        Ok(())
    }

    /// Place a guest at admission. `Ok(None)` when no parent can take it.
    pub fn on_guest_create_request(
        &mut self,
        ctx: &mut SimulationContext,
        cluster: &mut Cluster,
        guest: GuestId,
    ) -> Result<Option<ParentRef>> {
        let now = cluster.now();
        let target = self
            .placement
            .find_host(cluster, self.overload.as_mut(), guest, &BTreeSet::new());
        let Some(target) = target else {
            ctx.metrics().inc_placement_failures();
            ctx.logger().log_placement_failed(now, guest);
            return Ok(None);
        };
        if let Err(err) = cluster.try_create(target, guest) {
            ctx.logger().log_fatal(now, &err);
            return Err(err);
        }
        debug!(guest_id = %guest, target = %target, "Placed new guest");
        Ok(Some(target))
    }

    /// Roll back a pending migration, releasing its reservation. Returns
    /// false when nothing was pending for `guest`.
    pub fn cancel_migration(
        &mut self,
        ctx: &mut SimulationContext,
        cluster: &mut Cluster,
        guest: GuestId,
        reason: &str,
    ) -> bool {
        let Some(pending) = self.pending.remove(&guest) else {
            return false;
        };
        cluster.remove_migrating_in(pending.entry.target, guest);
        self.states.remove(&guest);
        self.selection.forget(guest);
        ctx.metrics().inc_migrations_cancelled();
        ctx.logger()
            .log_migration_cancelled(cluster.now(), guest, pending.entry.target, reason);
        true
    }

    fn cancel_migrations_to_overloaded_hosts(&mut self, ctx: &mut SimulationContext, cluster: &mut Cluster) {
        let mut verdicts: BTreeMap<HostId, bool> = BTreeMap::new();
        let mut doomed = Vec::new();
        for (guest, pending) in &self.pending {
            let Some(host) = cluster.host_of_parent(pending.entry.target) else {
                continue;
            };
            let overloaded = *verdicts
                .entry(host)
                .or_insert_with(|| self.overload.is_overloaded(cluster, host));
            if overloaded {
                doomed.push(*guest);
            }
        }
        for guest in doomed {
            self.cancel_migration(ctx, cluster, guest, "target_overloaded");
        }
        // planning re-checks these hosts after the cancellations
        if !verdicts.is_empty() {
            self.overload.discard_records_at(cluster.now());
        }
    }
}

/// Seconds to move `guest` to `target`, over half the target host's
/// bandwidth
fn migration_delay(cluster: &Cluster, guest: GuestId, target: ParentRef) -> f64 {
    cluster
        .host_of_parent(target)
        .and_then(|h| cluster.host(h))
        .map(|h| migration_time(cluster.requested_ram(guest), h.spec().bw))
        .unwrap_or(0.0)
}
