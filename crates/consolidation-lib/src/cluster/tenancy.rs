//! Capacity pools and resident list of a parent (host or VM)

use super::compute::ComputeScheduler;
use crate::models::{GuestId, ResourceKind};
use crate::provisioner::ResourceProvisioner;
use std::collections::BTreeSet;

/// What a guest asks of its parent at admission
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Demand {
    pub mips: f64,
    pub cores: u32,
    pub ram: f64,
    pub bw: f64,
    pub size: f64,
}

/// How the compute step treats a request that does not fit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Refuse the guest
    Strict,
    /// Grant what is free; the next reallocation evens shares out
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct Tenancy {
    compute: ComputeScheduler,
    ram: ResourceProvisioner,
    bw: ResourceProvisioner,
    storage: ResourceProvisioner,
    guests: Vec<GuestId>,
    migrating_in: BTreeSet<GuestId>,
}

impl Tenancy {
    pub fn new(pe_count: u32, pe_mips: f64, ram: f64, bw: f64, storage: f64) -> Self {
        Self {
            compute: ComputeScheduler::new(pe_count, pe_mips),
            ram: ResourceProvisioner::new(ram),
            bw: ResourceProvisioner::new(bw),
            storage: ResourceProvisioner::new(storage),
            guests: Vec::new(),
            migrating_in: BTreeSet::new(),
        }
    }

    pub fn compute(&self) -> &ComputeScheduler {
        &self.compute
    }

    pub fn ram(&self) -> &ResourceProvisioner {
        &self.ram
    }

    pub fn bw(&self) -> &ResourceProvisioner {
        &self.bw
    }

    pub fn storage(&self) -> &ResourceProvisioner {
        &self.storage
    }

    /// Resident guests, migrating-in ones included, in arrival order
    pub fn guests(&self) -> &[GuestId] {
        &self.guests
    }

    pub fn migrating_in(&self) -> &BTreeSet<GuestId> {
        &self.migrating_in
    }

    pub fn contains(&self, guest: GuestId) -> bool {
        self.guests.contains(&guest)
    }

    /// First resource that cannot hold `demand`, if any
    pub fn shortfall(&self, guest: GuestId, demand: &Demand) -> Option<ResourceKind> {
        if !self.storage.is_suitable(guest, demand.size) {
            Some(ResourceKind::Storage)
        } else if !self.ram.is_suitable(guest, demand.ram) {
            Some(ResourceKind::Ram)
        } else if !self.bw.is_suitable(guest, demand.bw) {
            Some(ResourceKind::Bandwidth)
        } else if !self.compute.is_suitable(guest, demand.cores, demand.mips) {
            Some(ResourceKind::Mips)
        } else {
            None
        }
    }

    pub fn is_suitable(&self, guest: GuestId, demand: &Demand) -> bool {
        self.shortfall(guest, demand).is_none()
    }

    /// Storage, then RAM, then bandwidth, then compute. A failing step
    /// rolls back the earlier ones. Returns the compute grant.
    pub fn admit(
        &mut self,
        guest: GuestId,
        demand: &Demand,
        admission: Admission,
    ) -> Result<f64, ResourceKind> {
        if !self.storage.allocate(guest, demand.size) {
            return Err(ResourceKind::Storage);
        }
        if !self.ram.allocate(guest, demand.ram) {
            self.storage.deallocate(guest);
            return Err(ResourceKind::Ram);
        }
        if !self.bw.allocate(guest, demand.bw) {
            self.storage.deallocate(guest);
            self.ram.deallocate(guest);
            return Err(ResourceKind::Bandwidth);
        }
        let granted = if self.compute.allocate(guest, demand.cores, demand.mips) {
            demand.mips
        } else if admission == Admission::BestEffort {
            let per_core_cap = self.compute.pe_mips() * demand.cores as f64;
            self.compute.allocate_available(guest, demand.mips.min(per_core_cap))
        } else {
            self.storage.deallocate(guest);
            self.ram.deallocate(guest);
            self.bw.deallocate(guest);
            return Err(ResourceKind::Mips);
        };
        if !self.guests.contains(&guest) {
            self.guests.push(guest);
        }
        Ok(granted)
    }

    /// Free every resource held by `guest` and forget it.
    pub fn release(&mut self, guest: GuestId) {
        self.storage.deallocate(guest);
        self.ram.deallocate(guest);
        self.bw.deallocate(guest);
        self.compute.deallocate(guest);
        self.guests.retain(|g| *g != guest);
        self.migrating_in.remove(&guest);
    }

    pub(crate) fn mark_migrating_in(&mut self, guest: GuestId) {
        self.migrating_in.insert(guest);
    }

    pub(crate) fn reallocate_compute(&mut self, requests: &[(GuestId, f64)]) -> Vec<(GuestId, f64)> {
        self.compute.reallocate(requests)
    }
}
