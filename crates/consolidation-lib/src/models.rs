//! Core data models for the consolidation engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical host identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(pub u32);

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

/// Guest identifier: the pair (owner id, local id).
///
/// Ordering is lexicographic on the pair, which keeps ledger sums and
/// iteration deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuestId {
    pub owner: u32,
    pub local: u32,
}

impl GuestId {
    pub fn new(owner: u32, local: u32) -> Self {
        Self { owner, local }
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.owner, self.local)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestKind {
    Vm,
    Container,
}

/// Where a guest lives: directly on a host (VMs) or inside a VM (containers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentRef {
    Host(HostId),
    Vm(GuestId),
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::Host(id) => write!(f, "{}", id),
            ParentRef::Vm(id) => write!(f, "vm-{}", id),
        }
    }
}

/// Resource kinds tracked by the provisioners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Storage,
    Ram,
    Bandwidth,
    Mips,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Storage => "storage",
            ResourceKind::Ram => "ram",
            ResourceKind::Bandwidth => "bw",
            ResourceKind::Mips => "mips",
        };
        f.write_str(name)
    }
}

/// Static shape of a guest (VM or container)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuestSpec {
    pub mips_per_core: f64,
    pub cores: u32,
    pub ram: f64,
    pub bw: f64,
    pub size: f64,
}

impl GuestSpec {
    pub fn total_mips(&self) -> f64 {
        self.mips_per_core * self.cores as f64
    }
}

/// Static shape of a physical host
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub pe_count: u32,
    pub mips_per_pe: f64,
    pub ram: f64,
    pub bw: f64,
    pub storage: f64,
}

impl HostSpec {
    pub fn total_mips(&self) -> f64 {
        self.mips_per_pe * self.pe_count as f64
    }
}

/// One accepted move, handed to the event kernel for delayed completion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MigrationPlanEntry {
    pub guest: GuestId,
    pub source: ParentRef,
    pub target: ParentRef,
    /// Simulated seconds until the kernel should deliver completion
    pub estimated_delay: f64,
    pub decided_at: f64,
}

/// Lifecycle of a guest as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestState {
    Resident,
    SelectedForEviction,
    PendingPlacement,
    Migrating,
}

/// One entry of a detector's decision log
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub time: f64,
    /// Host CPU utilization when the decision was made
    pub utilization: f64,
    /// Threshold or prediction the decision was based on
    pub metric: f64,
}
