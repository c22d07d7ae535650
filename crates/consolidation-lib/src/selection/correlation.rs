//! Correlation-based selection
//!
//! Guests whose load moves together with the rest of the host are the ones
//! most likely to push it over the edge again.

use super::GuestSelectionPolicy;
use crate::cluster::Cluster;
use crate::context::SimulationContext;
use crate::error::StatsError;
use crate::models::{GuestId, HostId};
use crate::stats;
use tracing::trace;

/// Correlation assigned to candidates whose coefficient is undefined
const UNDEFINED_CORRELATION: f64 = -3.0;

/// Coefficients at or below this are not considered a match
const MIN_USEFUL_CORRELATION: f64 = -2.0;

fn histories(cluster: &Cluster, candidates: &[GuestId]) -> Vec<Vec<f64>> {
    let rows: Vec<Vec<f64>> = candidates
        .iter()
        .map(|id| cluster.guest(*id).map(|g| g.history().to_vec()).unwrap_or_default())
        .collect();
    let common = rows.iter().map(|r| r.len()).min().unwrap_or(0);
    rows.into_iter()
        .map(|mut r| {
            r.truncate(common);
            r
        })
        .collect()
}

/// Evict the guest whose history is best explained (highest R²) by a linear
/// regression on the histories of the other candidates
#[derive(Debug)]
pub struct MaximumCorrelation {
    fallback: Box<dyn GuestSelectionPolicy>,
}

impl MaximumCorrelation {
    pub fn new(fallback: Box<dyn GuestSelectionPolicy>) -> Self {
        Self { fallback }
    }

    fn coefficients(cluster: &Cluster, candidates: &[GuestId]) -> Result<Vec<f64>, StatsError> {
        let data = histories(cluster, candidates);
        let mut coefficients = Vec::with_capacity(data.len());
        for (i, y) in data.iter().enumerate() {
            let others: Vec<Vec<f64>> = data
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, row)| row.clone())
                .collect();
            coefficients.push(stats::multiple_regression_r_squared(y, &others)?);
        }
        Ok(coefficients)
    }
}

impl GuestSelectionPolicy for MaximumCorrelation {
    fn select(
        &mut self,
        ctx: &mut SimulationContext,
        cluster: &Cluster,
        host: HostId,
        candidates: &[GuestId],
    ) -> Option<GuestId> {
        if candidates.is_empty() {
            return None;
        }
        match Self::coefficients(cluster, candidates) {
            Ok(coefficients) => {
                let mut best = 0;
                let mut best_value = f64::MIN_POSITIVE;
                for (i, value) in coefficients.iter().enumerate() {
                    if *value > best_value {
                        best = i;
                        best_value = *value;
                    }
                }
                Some(candidates[best])
            }
            Err(err) => {
                trace!(host_id = %host, error = %err, "Correlation undefined, using fallback selection");
                self.fallback.select(ctx, cluster, host, candidates)
            }
        }
    }

    fn on_migration_committed(&mut self, ctx: &mut SimulationContext, cluster: &Cluster, guest: GuestId) {
        self.fallback.on_migration_committed(ctx, cluster, guest);
    }

    fn forget(&mut self, guest: GuestId) {
        self.fallback.forget(guest);
    }

    fn reset(&mut self) {
        self.fallback.reset();
    }

    fn name(&self) -> &'static str {
        "maximum_correlation"
    }
}

/// Evict the guest whose history tracks the host's own history most closely
#[derive(Debug)]
pub struct MaximumCorrelationWithHost {
    fallback: Box<dyn GuestSelectionPolicy>,
}

impl MaximumCorrelationWithHost {
    pub fn new(fallback: Box<dyn GuestSelectionPolicy>) -> Self {
        Self { fallback }
    }
}

impl GuestSelectionPolicy for MaximumCorrelationWithHost {
    fn select(
        &mut self,
        ctx: &mut SimulationContext,
        cluster: &Cluster,
        host: HostId,
        candidates: &[GuestId],
    ) -> Option<GuestId> {
        if candidates.is_empty() {
            return None;
        }
        let host_history = cluster.host_history(host);
        let mut best: Option<(GuestId, f64)> = None;
        for id in candidates {
            let history = cluster.guest(*id).map(|g| g.history().to_vec()).unwrap_or_default();
            let mut r = stats::correlation(&history, &host_history);
            if r.is_nan() {
                r = UNDEFINED_CORRELATION;
            }
            if r > MIN_USEFUL_CORRELATION && best.map_or(true, |(_, b)| r > b) {
                best = Some((*id, r));
            }
        }
        match best {
            Some((id, _)) => Some(id),
            None => {
                trace!(host_id = %host, "No candidate correlates with host, using fallback selection");
                self.fallback.select(ctx, cluster, host, candidates)
            }
        }
    }

    fn on_migration_committed(&mut self, ctx: &mut SimulationContext, cluster: &Cluster, guest: GuestId) {
        self.fallback.on_migration_committed(ctx, cluster, guest);
    }

    fn forget(&mut self, guest: GuestId) {
        self.fallback.forget(guest);
    }

    fn reset(&mut self) {
        self.fallback.reset();
    }

    fn name(&self) -> &'static str {
        "maximum_correlation_with_host"
    }
}
