//! Guest selection
//!
//! Given an overloaded host and the guests on it that are free to move,
//! choose the one to evict next. Policies may learn from completed
//! migrations through [`GuestSelectionPolicy::on_migration_committed`].

mod correlation;
mod growth;
mod heuristics;
mod reinforcement;

pub use correlation::{MaximumCorrelation, MaximumCorrelationWithHost};
pub use growth::GrowthPotentialAware;
pub use heuristics::{MinimumMigrationTime, RandomSelection};
pub use reinforcement::{Decision, ReinforcementLearning};

use crate::cluster::Cluster;
use crate::config::SelectionPolicyKind;
use crate::context::SimulationContext;
use crate::models::{GuestId, HostId};
use std::fmt::Debug;

pub trait GuestSelectionPolicy: Debug + Send {
    /// Pick one of `candidates` (guests on `host` not already migrating).
    /// `None` when there is nothing to pick.
    fn select(
        &mut self,
        ctx: &mut SimulationContext,
        cluster: &Cluster,
        host: HostId,
        candidates: &[GuestId],
    ) -> Option<GuestId>;

    /// Called once a migration of `guest` has been committed
    fn on_migration_committed(&mut self, _ctx: &mut SimulationContext, _cluster: &Cluster, _guest: GuestId) {}

    /// Called when a selected `guest` will not move after all (no target,
    /// rolled back or cancelled)
    fn forget(&mut self, _guest: GuestId) {}

    /// Forget per-run state
    fn reset(&mut self) {}

    fn name(&self) -> &'static str;
}

pub fn build_selection_policy(kind: &SelectionPolicyKind) -> Box<dyn GuestSelectionPolicy> {
    match kind {
        SelectionPolicyKind::MinimumMigrationTime => Box::new(MinimumMigrationTime),
        SelectionPolicyKind::Random => Box::new(RandomSelection),
        SelectionPolicyKind::MaximumCorrelation { fallback } => {
            Box::new(MaximumCorrelation::new(build_selection_policy(fallback)))
        }
        SelectionPolicyKind::MaximumCorrelationWithHost { fallback } => {
            Box::new(MaximumCorrelationWithHost::new(build_selection_policy(fallback)))
        }
        SelectionPolicyKind::GrowthPotentialAware => Box::new(GrowthPotentialAware::new()),
        SelectionPolicyKind::GrowthPotentialAwareMmt => Box::new(GrowthPotentialAware::with_migration_time()),
        SelectionPolicyKind::ReinforcementLearning => Box::new(ReinforcementLearning::new()),
    }
}
