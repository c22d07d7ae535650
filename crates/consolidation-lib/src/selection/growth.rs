//! Growth-potential aware selection
//!
//! Compares each guest's current demand with its historical mean and
//! projects the trend one step further: a guest below its mean is expected
//! to climb back (`mean + (mean − current)`), one above its mean to keep
//! rising (`current + (current − mean)`). The pick is the guest whose
//! rebound projection tops the lowest rising projection seen so far.

use super::GuestSelectionPolicy;
use crate::cluster::Cluster;
use crate::context::SimulationContext;
use crate::models::{GuestId, HostId};

/// Running state of the projection scan
#[derive(Debug, Clone, Copy)]
struct Projection {
    max_rebound: f64,
    min_rising: f64,
    selected: Option<GuestId>,
}

impl Projection {
    fn new() -> Self {
        Self {
            max_rebound: 0.0,
            min_rising: f64::MAX,
            selected: None,
        }
    }

    fn consider(&mut self, guest: GuestId, current: f64, mean: f64) {
        if mean > current {
            let projected = mean + (mean - current);
            if projected > self.max_rebound && self.min_rising != f64::MAX {
                self.max_rebound = projected;
                if self.max_rebound > self.min_rising {
                    self.selected = Some(guest);
                }
            }
        } else {
            let projected = current + (current - mean);
            if projected < self.min_rising {
                self.min_rising = projected;
                if self.max_rebound < self.min_rising {
                    self.selected = Some(guest);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GrowthPotentialAware {
    /// Only scan guests that improve on the smallest RAM seen so far
    migration_time_gate: bool,
}

impl GrowthPotentialAware {
    pub fn new() -> Self {
        Self::default()
    }

    /// Combine with minimum migration time: RAM decides which guests are
    /// scanned, in candidate order
    pub fn with_migration_time() -> Self {
        Self {
            migration_time_gate: true,
        }
    }
}

impl GuestSelectionPolicy for GrowthPotentialAware {
    fn select(
        &mut self,
        _ctx: &mut SimulationContext,
        cluster: &Cluster,
        _host: HostId,
        candidates: &[GuestId],
    ) -> Option<GuestId> {
        let mut projection = Projection::new();
        let mut min_ram = f64::MAX;
        for id in candidates {
            let Some(guest) = cluster.guest(*id) else { continue };
            if guest.is_in_migration() {
                continue;
            }
            if self.migration_time_gate {
                if guest.ram() >= min_ram {
                    continue;
                }
                min_ram = guest.ram();
            }
            let current = cluster.requested_mips(*id);
            let mean = guest.history().mean() * guest.total_mips();
            projection.consider(*id, current, mean);
        }
        projection.selected
    }

    fn name(&self) -> &'static str {
        if self.migration_time_gate {
            "growth_potential_aware_mmt"
        } else {
            "growth_potential_aware"
        }
    }
}
