//! Processing-element scheduler for one host or VM
//!
//! Capacity is split into equal PEs. A guest fits only if each of its
//! virtual cores fits a single PE and its total request fits the free MIPS.
//! Periodic reallocation is time-shared: when the guests together ask for
//! more than the capacity, every request is scaled down by the same factor.

use crate::models::GuestId;
use crate::provisioner::ResourceProvisioner;

#[derive(Debug, Clone, PartialEq)]
pub struct ComputeScheduler {
    pe_count: u32,
    pe_mips: f64,
    pool: ResourceProvisioner,
}

impl ComputeScheduler {
    pub fn new(pe_count: u32, pe_mips: f64) -> Self {
        Self {
            pe_count,
            pe_mips,
            pool: ResourceProvisioner::new(pe_mips * pe_count as f64),
        }
    }

    pub fn pe_count(&self) -> u32 {
        self.pe_count
    }

    pub fn pe_mips(&self) -> f64 {
        self.pe_mips
    }

    pub fn capacity(&self) -> f64 {
        self.pool.capacity()
    }

    pub fn available(&self) -> f64 {
        self.pool.available()
    }

    pub fn total_allocated(&self) -> f64 {
        self.pool.total_allocated()
    }

    pub fn allocated_for(&self, guest: GuestId) -> f64 {
        self.pool.allocated_for(guest)
    }

    fn fits_cores(&self, cores: u32, total_mips: f64) -> bool {
        if cores == 0 {
            return total_mips <= 0.0;
        }
        total_mips / cores as f64 <= self.pe_mips
    }

    pub fn is_suitable(&self, guest: GuestId, cores: u32, total_mips: f64) -> bool {
        self.fits_cores(cores, total_mips) && self.pool.is_suitable(guest, total_mips)
    }

    pub fn allocate(&mut self, guest: GuestId, cores: u32, total_mips: f64) -> bool {
        if !self.fits_cores(cores, total_mips) {
            return false;
        }
        self.pool.allocate(guest, total_mips)
    }

    /// Grant whatever part of `total_mips` is currently free.
    pub fn allocate_available(&mut self, guest: GuestId, total_mips: f64) -> f64 {
        self.pool.deallocate(guest);
        let granted = total_mips.min(self.pool.available()).max(0.0);
        self.pool.allocate(guest, granted);
        granted
    }

    pub fn deallocate(&mut self, guest: GuestId) {
        self.pool.deallocate(guest);
    }

    /// PEs needed to carry the current allocation
    pub fn busy_pes(&self) -> u32 {
        if self.pe_mips <= 0.0 {
            return 0;
        }
        let busy = (self.pool.total_allocated() / self.pe_mips - 1e-9).ceil().max(0.0);
        (busy as u32).min(self.pe_count)
    }

    pub fn free_pes(&self) -> u32 {
        self.pe_count - self.busy_pes()
    }

    /// Replace every allocation with the given requests, scaled by
    /// `min(1, capacity / Σ requests)`. Returns the granted amounts in
    /// request order.
    pub fn reallocate(&mut self, requests: &[(GuestId, f64)]) -> Vec<(GuestId, f64)> {
        self.pool.clear();
        let total: f64 = requests.iter().map(|(_, r)| r.max(0.0)).sum();
        let scale = if total > self.capacity() && total > 0.0 {
            self.capacity() / total
        } else {
            1.0
        };
        requests
            .iter()
            .map(|(guest, request)| {
                let wanted = request.max(0.0) * scale;
                let granted = wanted.min(self.pool.available()).max(0.0);
                self.pool.allocate(*guest, granted);
                (*guest, granted)
            })
            .collect()
    }
}
