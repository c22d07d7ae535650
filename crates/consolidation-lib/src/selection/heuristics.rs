//! Stateless selection heuristics

use super::GuestSelectionPolicy;
use crate::cluster::Cluster;
use crate::context::SimulationContext;
use crate::models::{GuestId, HostId};
use rand::Rng;

/// Evict the guest with the least RAM, the quickest to move
#[derive(Debug, Default, Clone, Copy)]
pub struct MinimumMigrationTime;

impl GuestSelectionPolicy for MinimumMigrationTime {
    fn select(
        &mut self,
        _ctx: &mut SimulationContext,
        cluster: &Cluster,
        _host: HostId,
        candidates: &[GuestId],
    ) -> Option<GuestId> {
        let mut best: Option<(GuestId, f64)> = None;
        for id in candidates {
            let Some(guest) = cluster.guest(*id) else { continue };
            if guest.is_in_migration() {
                continue;
            }
            if best.map_or(true, |(_, ram)| guest.ram() < ram) {
                best = Some((*id, guest.ram()));
            }
        }
        best.map(|(id, _)| id)
    }

    fn name(&self) -> &'static str {
        "minimum_migration_time"
    }
}

/// Uniform pick from the context's seeded generator
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSelection;

impl GuestSelectionPolicy for RandomSelection {
    fn select(
        &mut self,
        ctx: &mut SimulationContext,
        _cluster: &Cluster,
        _host: HostId,
        candidates: &[GuestId],
    ) -> Option<GuestId> {
        if candidates.is_empty() {
            return None;
        }
        let index = ctx.rng().gen_range(0..candidates.len());
        Some(candidates[index])
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
