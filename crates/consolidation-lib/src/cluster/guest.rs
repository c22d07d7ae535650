//! VMs and containers

use super::tenancy::Tenancy;
use crate::history::UtilizationHistory;
use crate::models::{GuestId, GuestKind, GuestSpec, ParentRef};
use crate::workload::UtilizationModel;
use std::sync::Arc;

/// A capacity consumer. VMs carry a [`Tenancy`] for the containers they
/// host; a guest with a workload reports its own demand.
#[derive(Debug, Clone)]
pub struct Guest {
    pub(crate) id: GuestId,
    pub(crate) kind: GuestKind,
    pub(crate) spec: GuestSpec,
    pub(crate) parent: Option<ParentRef>,
    pub(crate) being_instantiated: bool,
    pub(crate) in_migration: bool,
    pub(crate) allocated_mips: f64,
    pub(crate) allocated_ram: f64,
    pub(crate) allocated_bw: f64,
    pub(crate) history: UtilizationHistory,
    pub(crate) workload: Option<Arc<dyn UtilizationModel>>,
    pub(crate) tenancy: Option<Tenancy>,
}

impl Guest {
    pub(crate) fn new(
        id: GuestId,
        kind: GuestKind,
        spec: GuestSpec,
        workload: Option<Arc<dyn UtilizationModel>>,
    ) -> Self {
        let tenancy = match kind {
            GuestKind::Vm => Some(Tenancy::new(
                spec.cores,
                spec.mips_per_core,
                spec.ram,
                spec.bw,
                spec.size,
            )),
            GuestKind::Container => None,
        };
        Self {
            id,
            kind,
            spec,
            parent: None,
            being_instantiated: true,
            in_migration: false,
            allocated_mips: 0.0,
            allocated_ram: 0.0,
            allocated_bw: 0.0,
            history: UtilizationHistory::new(),
            workload,
            tenancy,
        }
    }

    pub fn id(&self) -> GuestId {
        self.id
    }

    pub fn kind(&self) -> GuestKind {
        self.kind
    }

    pub fn spec(&self) -> &GuestSpec {
        &self.spec
    }

    pub fn total_mips(&self) -> f64 {
        self.spec.total_mips()
    }

    pub fn ram(&self) -> f64 {
        self.spec.ram
    }

    /// Current residence. A guest migrating in elsewhere keeps its source here
    /// until the move is committed.
    pub fn parent(&self) -> Option<ParentRef> {
        self.parent
    }

    pub fn is_being_instantiated(&self) -> bool {
        self.being_instantiated
    }

    pub fn is_in_migration(&self) -> bool {
        self.in_migration
    }

    pub fn allocated_mips(&self) -> f64 {
        self.allocated_mips
    }

    pub fn allocated_ram(&self) -> f64 {
        self.allocated_ram
    }

    pub fn allocated_bw(&self) -> f64 {
        self.allocated_bw
    }

    pub fn history(&self) -> &UtilizationHistory {
        &self.history
    }

    pub fn workload(&self) -> Option<&Arc<dyn UtilizationModel>> {
        self.workload.as_ref()
    }

    pub fn tenancy(&self) -> Option<&Tenancy> {
        self.tenancy.as_ref()
    }

    /// Share of own capacity currently allocated
    pub fn cpu_utilization(&self) -> f64 {
        let total = self.total_mips();
        if total <= 0.0 {
            0.0
        } else {
            self.allocated_mips / total
        }
    }
}
