//! Guest hierarchy: hosts, VMs and containers in one arena
//!
//! All hosts and guests live in a [`Cluster`] and refer to each other by id.
//! Mutation goes through the methods here so that every provisioner ledger,
//! resident list and cached allocation stays consistent:
//!
//! - `create` / `destroy` / `destroy_all` place and remove guests
//! - `add_migrating_in` / `remove_migrating_in` reserve and release a
//!   destination during a migration (the guest stays billed on its source)
//! - `update_processing` advances virtual time, rebalances compute and
//!   samples utilization
//!
//! The cluster is `Clone`; planners work on a copy and only the accepted
//! result is applied to the live instance.

mod compute;
mod guest;
mod host;
mod tenancy;

pub use compute::ComputeScheduler;
pub use guest::Guest;
pub use host::Host;
pub use tenancy::{Admission, Demand, Tenancy};

use crate::error::{EngineError, Result};
use crate::models::{GuestId, GuestKind, GuestSpec, HostId, HostSpec, ParentRef, ResourceKind};
use crate::power::PowerModel;
use crate::stats;
use crate::workload::UtilizationModel;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Default offset of sampling ticks from interval boundaries
pub const DEFAULT_SAMPLE_OFFSET: f64 = 0.1;

/// Tolerance for recognising a sampling tick in floating-point time
const TICK_TOLERANCE: f64 = 1e-6;

/// Bits per unit of RAM divided by the share of bandwidth a migration gets
const MIGRATION_BW_DIVISOR: f64 = 2.0 * 8000.0;

/// Seconds needed to move `ram` over a link of bandwidth `bw`
pub fn migration_time(ram: f64, bw: f64) -> f64 {
    if bw <= 0.0 {
        return f64::INFINITY;
    }
    ram / (bw / MIGRATION_BW_DIVISOR)
}

#[derive(Debug, Clone)]
pub struct Cluster {
    hosts: Vec<Host>,
    guests: BTreeMap<GuestId, Guest>,
    clock: f64,
    scheduling_interval: f64,
    sample_offset: f64,
    last_sample: Option<f64>,
}

impl Cluster {
    pub fn new(scheduling_interval: f64) -> Self {
        Self {
            hosts: Vec::new(),
            guests: BTreeMap::new(),
            clock: 0.0,
            scheduling_interval,
            sample_offset: DEFAULT_SAMPLE_OFFSET,
            last_sample: None,
        }
    }

    pub fn with_sample_offset(mut self, offset: f64) -> Self {
        self.sample_offset = offset;
        self
    }

    pub fn now(&self) -> f64 {
        self.clock
    }

    pub fn scheduling_interval(&self) -> f64 {
        self.scheduling_interval
    }

    pub fn add_host(&mut self, spec: HostSpec, power_model: Option<Arc<dyn PowerModel>>) -> HostId {
        let id = HostId(self.hosts.len() as u32);
        self.hosts.push(Host::new(id, spec, power_model));
        id
    }

    /// Register an unplaced VM. It hosts containers, or runs `workload`
    /// directly when one is given.
    pub fn register_vm(
        &mut self,
        id: GuestId,
        spec: GuestSpec,
        workload: Option<Arc<dyn UtilizationModel>>,
    ) -> Result<GuestId> {
        self.register(id, GuestKind::Vm, spec, workload)
    }

    pub fn register_container(
        &mut self,
        id: GuestId,
        spec: GuestSpec,
        workload: Arc<dyn UtilizationModel>,
    ) -> Result<GuestId> {
        self.register(id, GuestKind::Container, spec, Some(workload))
    }

    fn register(
        &mut self,
        id: GuestId,
        kind: GuestKind,
        spec: GuestSpec,
        workload: Option<Arc<dyn UtilizationModel>>,
    ) -> Result<GuestId> {
        if self.guests.contains_key(&id) {
            return Err(EngineError::Config(format!("guest {} registered twice", id)));
        }
        self.guests.insert(id, Guest::new(id, kind, spec, workload));
        Ok(id)
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    pub fn host(&self, id: HostId) -> Option<&Host> {
        self.hosts.get(id.0 as usize)
    }

    pub fn host_ids(&self) -> impl Iterator<Item = HostId> + '_ {
        self.hosts.iter().map(|h| h.id)
    }

    pub fn guest(&self, id: GuestId) -> Option<&Guest> {
        self.guests.get(&id)
    }

    pub fn guests(&self) -> impl Iterator<Item = &Guest> {
        self.guests.values()
    }

    #[cfg(test)]
    pub(crate) fn guest_mut(&mut self, id: GuestId) -> Option<&mut Guest> {
        self.guests.get_mut(&id)
    }

    fn tenancy(&self, parent: ParentRef) -> Option<&Tenancy> {
        match parent {
            ParentRef::Host(id) => self.host(id).map(|h| &h.tenancy),
            ParentRef::Vm(id) => self.guests.get(&id).and_then(|g| g.tenancy.as_ref()),
        }
    }

    fn tenancy_mut(&mut self, parent: ParentRef) -> Option<&mut Tenancy> {
        match parent {
            ParentRef::Host(id) => self.hosts.get_mut(id.0 as usize).map(|h| &mut h.tenancy),
            ParentRef::Vm(id) => self.guests.get_mut(&id).and_then(|g| g.tenancy.as_mut()),
        }
    }

    fn check_parent(&self, parent: ParentRef) -> Result<()> {
        match parent {
            ParentRef::Host(id) if self.host(id).is_none() => Err(EngineError::UnknownHost(id)),
            ParentRef::Vm(id) if self.tenancy(parent).is_none() => Err(EngineError::UnknownGuest(id)),
            _ => Ok(()),
        }
    }

    /// Guests resident on `parent`, migrating-in ones included
    pub fn guests_on(&self, parent: ParentRef) -> &[GuestId] {
        self.tenancy(parent).map(|t| t.guests()).unwrap_or(&[])
    }

    /// Guests on `parent` that are not part of an in-flight migration
    pub fn migratable_guests(&self, parent: ParentRef) -> Vec<GuestId> {
        self.guests_on(parent)
            .iter()
            .copied()
            .filter(|g| self.guests.get(g).map(|x| !x.in_migration).unwrap_or(false))
            .collect()
    }

    /// Containers inside every VM on `host`
    pub fn containers_on_host(&self, host: HostId) -> Vec<GuestId> {
        self.guests_on(ParentRef::Host(host))
            .iter()
            .flat_map(|vm| self.guests_on(ParentRef::Vm(*vm)).iter().copied())
            .collect()
    }

    /// Physical host a guest currently resides on
    pub fn host_of(&self, guest: GuestId) -> Option<HostId> {
        match self.guests.get(&guest)?.parent? {
            ParentRef::Host(id) => Some(id),
            ParentRef::Vm(vm) => self.host_of(vm),
        }
    }

    pub fn host_of_parent(&self, parent: ParentRef) -> Option<HostId> {
        match parent {
            ParentRef::Host(id) => Some(id),
            ParentRef::Vm(vm) => self.host_of(vm),
        }
    }

    /// Current CPU demand. Spec MIPS while instantiating; otherwise the
    /// workload's demand, or the sum over hosted containers.
    pub fn requested_mips(&self, guest: GuestId) -> f64 {
        let Some(g) = self.guests.get(&guest) else {
            return 0.0;
        };
        if g.being_instantiated {
            return g.total_mips();
        }
        if let Some(workload) = &g.workload {
            return workload.utilization(self.clock) * g.total_mips();
        }
        g.tenancy
            .as_ref()
            .map(|t| t.guests().iter().map(|c| self.requested_mips(*c)).sum())
            .unwrap_or(0.0)
    }

    /// RAM is reserved at spec size for the guest's lifetime
    pub fn requested_ram(&self, guest: GuestId) -> f64 {
        self.guests.get(&guest).map(|g| g.spec.ram).unwrap_or(0.0)
    }

    pub fn requested_bw(&self, guest: GuestId) -> f64 {
        self.guests.get(&guest).map(|g| g.spec.bw).unwrap_or(0.0)
    }

    pub fn demand(&self, guest: GuestId) -> Option<Demand> {
        let g = self.guests.get(&guest)?;
        Some(Demand {
            mips: self.requested_mips(guest),
            cores: g.spec.cores,
            ram: self.requested_ram(guest),
            bw: self.requested_bw(guest),
            size: g.spec.size,
        })
    }

    /// Sum of the requested MIPS of everything on the host
    pub fn host_requested_mips(&self, host: HostId) -> f64 {
        self.guests_on(ParentRef::Host(host))
            .iter()
            .map(|g| self.requested_mips(*g))
            .sum()
    }

    pub fn host_requested_utilization(&self, host: HostId) -> f64 {
        match self.host(host) {
            Some(h) if h.total_mips() > 0.0 => self.host_requested_mips(host) / h.total_mips(),
            _ => 0.0,
        }
    }

    pub fn host_utilization(&self, host: HostId) -> f64 {
        self.host(host).map(|h| h.cpu_utilization()).unwrap_or(0.0)
    }

    /// Host utilization history, newest first, derived from the histories of
    /// its guests weighted by their share of host MIPS. Trailing zeros are
    /// trimmed.
    pub fn host_history(&self, host: HostId) -> Vec<f64> {
        let Some(h) = self.host(host) else {
            return Vec::new();
        };
        let host_mips = h.total_mips();
        if host_mips <= 0.0 {
            return Vec::new();
        }
        let mut history: Vec<f64> = Vec::new();
        for id in h.guests() {
            let Some(g) = self.guests.get(id) else { continue };
            let share = g.total_mips() / host_mips;
            for (i, u) in g.history.iter().enumerate() {
                if i == history.len() {
                    history.push(0.0);
                }
                history[i] += u * share;
            }
        }
        history.truncate(stats::count_non_zero_beginning(&history));
        history
    }

    /// Longest time any guest on the host would take to migrate off it
    pub fn max_guest_migration_time(&self, host: HostId) -> f64 {
        let Some(h) = self.host(host) else {
            return 0.0;
        };
        h.guests()
            .iter()
            .filter_map(|g| self.guests.get(g))
            .map(|g| migration_time(g.ram(), h.spec.bw))
            .fold(0.0, f64::max)
    }

    pub fn host_power(&self, host: HostId) -> Option<f64> {
        self.host(host).and_then(|h| h.power())
    }

    /// Instantaneous draw of every power-aware host
    pub fn total_power(&self) -> f64 {
        self.hosts.iter().filter_map(|h| h.power()).sum()
    }

    /// True when no guest on the host can be drained right now: every guest
    /// is already migrating out, or one of them is migrating in.
    pub fn all_guests_migrating_out_or_any_migrating_in(&self, host: HostId) -> bool {
        let Some(h) = self.host(host) else {
            return true;
        };
        for id in h.guests() {
            let in_migration = self.guests.get(id).map(|g| g.in_migration).unwrap_or(false);
            if !in_migration {
                return false;
            }
            if h.migrating_in().contains(id) {
                return true;
            }
        }
        true
    }

    /// Container-level counterpart: some VM on the host is receiving a
    /// container, or every container on the host is migrating out.
    pub fn all_containers_migrating_out_or_any_migrating_in(&self, host: HostId) -> bool {
        for vm in self.guests_on(ParentRef::Host(host)) {
            let Some(tenancy) = self.tenancy(ParentRef::Vm(*vm)) else {
                continue;
            };
            if !tenancy.migrating_in().is_empty() {
                return true;
            }
            for c in tenancy.guests() {
                if !self.guests.get(c).map(|g| g.in_migration).unwrap_or(false) {
                    return false;
                }
            }
        }
        true
    }

    /// Pure capacity check of `parent` for `guest`'s current demand
    pub fn is_suitable(&self, parent: ParentRef, guest: GuestId) -> bool {
        if parent == ParentRef::Vm(guest) {
            return false;
        }
        match (self.tenancy(parent), self.demand(guest)) {
            (Some(t), Some(d)) => t.is_suitable(guest, &d),
            _ => false,
        }
    }

    fn admit(&mut self, parent: ParentRef, guest: GuestId, admission: Admission) -> Result<()> {
        self.check_parent(parent)?;
        let demand = self.demand(guest).ok_or(EngineError::UnknownGuest(guest))?;
        if parent == ParentRef::Vm(guest) {
            return Err(EngineError::CapacityInvariant {
                guest,
                parent,
                resource: ResourceKind::Mips,
            });
        }
        let tenancy = self.tenancy_mut(parent).ok_or(EngineError::UnknownGuest(guest))?;
        let granted = tenancy
            .admit(guest, &demand, admission)
            .map_err(|resource| EngineError::CapacityInvariant {
                guest,
                parent,
                resource,
            })?;
        if let Some(g) = self.guests.get_mut(&guest) {
            if g.parent.is_none() {
                g.parent = Some(parent);
            }
            if g.parent == Some(parent) {
                g.allocated_mips = granted;
                g.allocated_ram = demand.ram;
                g.allocated_bw = demand.bw;
            }
        }
        Ok(())
    }

    /// Place `guest` on `parent` if every resource fits. A guest that still
    /// resides elsewhere keeps that residence; the new parent only bills it.
    pub fn create(&mut self, parent: ParentRef, guest: GuestId) -> bool {
        match self.admit(parent, guest, Admission::Strict) {
            Ok(()) => true,
            Err(err) => {
                trace!(guest_id = %guest, parent = %parent, error = %err, "Guest creation refused");
                false
            }
        }
    }

    /// `create` for a placement that was already vouched for; refusal is a
    /// capacity invariant violation
    pub fn try_create(&mut self, parent: ParentRef, guest: GuestId) -> Result<()> {
        self.admit(parent, guest, Admission::Strict)
    }

    /// Remove `guest` from `parent`, releasing all of its resources there
    pub fn destroy(&mut self, parent: ParentRef, guest: GuestId) {
        if let Some(tenancy) = self.tenancy_mut(parent) {
            tenancy.release(guest);
        }
        if let Some(g) = self.guests.get_mut(&guest) {
            if g.parent == Some(parent) {
                g.parent = None;
                g.allocated_mips = 0.0;
                g.allocated_ram = 0.0;
                g.allocated_bw = 0.0;
            }
        }
    }

    pub fn destroy_all(&mut self, parent: ParentRef) {
        for guest in self.guests_on(parent).to_vec() {
            self.destroy(parent, guest);
        }
    }

    /// Reserve `parent` for an incoming guest. Failure means a placement
    /// decision could not be honoured and is fatal.
    pub fn add_migrating_in(&mut self, parent: ParentRef, guest: GuestId) -> Result<()> {
        self.admit(parent, guest, Admission::Strict)?;
        if let Some(tenancy) = self.tenancy_mut(parent) {
            tenancy.mark_migrating_in(guest);
        }
        if let Some(g) = self.guests.get_mut(&guest) {
            g.in_migration = true;
        }
        debug!(guest_id = %guest, target = %parent, "Reserved capacity for incoming guest");
        Ok(())
    }

    /// Undo `add_migrating_in`
    pub fn remove_migrating_in(&mut self, parent: ParentRef, guest: GuestId) {
        if let Some(tenancy) = self.tenancy_mut(parent) {
            tenancy.release(guest);
        }
        if let Some(g) = self.guests.get_mut(&guest) {
            g.in_migration = false;
        }
    }

    /// Finish a move: drop the reservation, leave the source, take up
    /// residence on the target. Compute on the target is granted best effort
    /// since demand may have grown since the reservation.
    pub fn commit_migration(&mut self, source: ParentRef, target: ParentRef, guest: GuestId) -> Result<()> {
        self.remove_migrating_in(target, guest);
        self.destroy(source, guest);
        self.admit(target, guest, Admission::BestEffort)
    }

    fn is_sampling_tick(&self, now: f64) -> bool {
        if self.scheduling_interval <= 0.0 {
            return false;
        }
        let r = (now - self.sample_offset).rem_euclid(self.scheduling_interval);
        r < TICK_TOLERANCE || self.scheduling_interval - r < TICK_TOLERANCE
    }

    fn rebalance(&mut self, parent: ParentRef) {
        let requests: Vec<(GuestId, f64)> = self
            .guests_on(parent)
            .iter()
            .map(|g| (*g, self.requested_mips(*g)))
            .collect();
        let granted = match self.tenancy_mut(parent) {
            Some(t) => t.reallocate_compute(&requests),
            None => return,
        };
        for (id, amount) in granted {
            if let Some(g) = self.guests.get_mut(&id) {
                if g.parent == Some(parent) {
                    g.allocated_mips = amount;
                }
            }
        }
    }

    /// Advance to `now`: refresh demand, rebalance compute on every VM and
    /// host, sample utilization on interval boundaries. Returns the earliest
    /// future demand change, or `None` when nothing will change.
    pub fn update_processing(&mut self, now: f64) -> Option<f64> {
        self.clock = now;

        let placed: Vec<GuestId> = self
            .guests
            .values()
            .filter(|g| g.parent.is_some())
            .map(|g| g.id)
            .collect();

        for id in &placed {
            if self.guests.get(id).map(|g| g.kind == GuestKind::Vm).unwrap_or(false) {
                self.rebalance(ParentRef::Vm(*id));
            }
        }
        for i in 0..self.hosts.len() {
            self.rebalance(ParentRef::Host(HostId(i as u32)));
        }

        if self.is_sampling_tick(now) && self.last_sample != Some(now) {
            self.last_sample = Some(now);
            for id in &placed {
                if let Some(g) = self.guests.get_mut(id) {
                    let sample = g.cpu_utilization();
                    if !(sample == 0.0 && now == 0.0) {
                        g.history.push(sample);
                    }
                }
            }
        }

        let mut next: Option<f64> = None;
        for id in &placed {
            let Some(g) = self.guests.get_mut(id) else { continue };
            g.being_instantiated = false;
            let change = g
                .workload
                .as_ref()
                .and_then(|w| w.next_change(now))
                .filter(|t| *t > now);
            if let Some(t) = change {
                next = Some(next.map_or(t, |n: f64| n.min(t)));
            }
        }
        next
    }
}

#[cfg(test)]
mod tests;
