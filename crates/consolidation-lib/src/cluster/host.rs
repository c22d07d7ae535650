//! Physical hosts

use super::tenancy::Tenancy;
use crate::models::{GuestId, HostId, HostSpec};
use crate::power::PowerModel;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Host {
    pub(crate) id: HostId,
    pub(crate) spec: HostSpec,
    pub(crate) tenancy: Tenancy,
    pub(crate) power_model: Option<Arc<dyn PowerModel>>,
}

impl Host {
    pub(crate) fn new(id: HostId, spec: HostSpec, power_model: Option<Arc<dyn PowerModel>>) -> Self {
        Self {
            id,
            spec,
            tenancy: Tenancy::new(spec.pe_count, spec.mips_per_pe, spec.ram, spec.bw, spec.storage),
            power_model,
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    pub fn spec(&self) -> &HostSpec {
        &self.spec
    }

    pub fn total_mips(&self) -> f64 {
        self.spec.total_mips()
    }

    pub fn guests(&self) -> &[GuestId] {
        self.tenancy.guests()
    }

    pub fn migrating_in(&self) -> &BTreeSet<GuestId> {
        self.tenancy.migrating_in()
    }

    pub fn tenancy(&self) -> &Tenancy {
        &self.tenancy
    }

    pub fn power_model(&self) -> Option<&Arc<dyn PowerModel>> {
        self.power_model.as_ref()
    }

    pub fn allocated_mips(&self) -> f64 {
        self.tenancy.compute().total_allocated()
    }

    pub fn available_mips(&self) -> f64 {
        self.tenancy.compute().available()
    }

    /// Allocated share of total MIPS
    pub fn cpu_utilization(&self) -> f64 {
        let total = self.total_mips();
        if total <= 0.0 {
            0.0
        } else {
            self.allocated_mips() / total
        }
    }

    pub fn busy_pes(&self) -> u32 {
        self.tenancy.compute().busy_pes()
    }

    /// Has at least one guest that is not still waiting to migrate in
    pub fn is_active(&self) -> bool {
        self.guests()
            .iter()
            .any(|g| !self.tenancy.migrating_in().contains(g))
    }

    /// Power drawn at `utilization`, if the host is power-aware and the
    /// value is in range
    pub fn power_at(&self, utilization: f64) -> Option<f64> {
        self.power_model
            .as_ref()
            .and_then(|model| model.power(utilization).ok())
    }

    pub fn power(&self) -> Option<f64> {
        self.power_at(self.cpu_utilization().min(1.0))
    }
}
