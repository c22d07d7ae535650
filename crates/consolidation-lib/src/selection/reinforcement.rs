//! Q-table driven selection
//!
//! The state is the host's load in percent of its MIPS; each candidate maps
//! to an action, its share of that load in percent. The policy evicts the
//! candidate whose action has the highest Q-value in the current state, and
//! learns once the move commits: shedding a larger share earns a larger
//! reward.

use super::GuestSelectionPolicy;
use crate::cluster::Cluster;
use crate::config::{ExplorationPolicy, LearningAlgorithm};
use crate::context::SimulationContext;
use crate::models::{GuestId, GuestKind, HostId, ParentRef};
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// What was decided when a guest was picked, kept until its move commits
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub state: usize,
    pub action: usize,
    pub host: HostId,
    /// Cluster power when the decision was made
    pub cluster_power: f64,
}

#[derive(Debug, Default)]
pub struct ReinforcementLearning {
    pending: BTreeMap<GuestId, Decision>,
}

/// Load of `host` in percent, truncated
fn state_of(cluster: &Cluster, host: HostId) -> usize {
    (cluster.host_requested_utilization(host) * 100.0).max(0.0) as usize
}

/// Share of the host's load each candidate carries, in rounded percent
fn actions_of(cluster: &Cluster, host: HostId, candidates: &[GuestId]) -> Vec<usize> {
    let Some(h) = cluster.host(host) else {
        return vec![0; candidates.len()];
    };
    let total = h.total_mips();
    let load = cluster.host_requested_utilization(host);
    candidates
        .iter()
        .map(|id| {
            if total <= 0.0 || load <= 0.0 {
                return 0;
            }
            let share = cluster.requested_mips(*id) / total;
            (share / load * 100.0).round().max(0.0) as usize
        })
        .collect()
}

/// Migratable guests of the same kind as `guest` left on `host`
fn remaining_candidates(cluster: &Cluster, host: HostId, guest: GuestId) -> Vec<GuestId> {
    let containers = cluster
        .guest(guest)
        .map(|g| g.kind() == GuestKind::Container)
        .unwrap_or(false);
    let on_host = if containers {
        cluster.containers_on_host(host)
    } else {
        cluster.guests_on(ParentRef::Host(host)).to_vec()
    };
    on_host
        .into_iter()
        .filter(|id| cluster.guest(*id).map(|g| !g.is_in_migration()).unwrap_or(false))
        .collect()
}

impl ReinforcementLearning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> &BTreeMap<GuestId, Decision> {
        &self.pending
    }

    fn explore(ctx: &mut SimulationContext, values: &[f64]) -> usize {
        let uniform = |ctx: &mut SimulationContext| ctx.rng().gen_range(0..values.len());
        match ctx.config().reinforcement.exploration {
            ExplorationPolicy::EpsilonGreedy => uniform(ctx),
            ExplorationPolicy::Softmax => {
                let total: f64 = values.iter().map(|q| q.abs()).sum();
                if total <= 0.0 || !total.is_finite() {
                    return uniform(ctx);
                }
                let target = ctx.rng().gen::<f64>() * total;
                let mut cumulative = 0.0;
                for (i, q) in values.iter().enumerate() {
                    cumulative += q.abs();
                    if cumulative > target {
                        return i;
                    }
                }
                values.len() - 1
            }
        }
    }
}

impl GuestSelectionPolicy for ReinforcementLearning {
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
        let state = state_of(cluster, host);
        let actions = actions_of(cluster, host, candidates);
        let values: Vec<f64> = actions.iter().map(|a| ctx.q_table().get(state, *a)).collect();

        let best = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let ties: Vec<usize> = (0..values.len()).filter(|i| values[*i] == best).collect();
        let mut chosen = match ties.len() {
            0 => 0,
            1 => ties[0],
            n => ties[ctx.rng().gen_range(0..n)],
        };

        let explore_chance = ctx.config().reinforcement.random_action_value;
        if ctx.rng().gen::<f64>() * 100.0 < explore_chance {
            chosen = Self::explore(ctx, &values);
            trace!(host_id = %host, guest_id = %candidates[chosen], "Exploratory selection");
        }

        let guest = candidates[chosen];
        let action = ctx.q_table().action_index(actions[chosen]);
        let state = ctx.q_table().state_index(state);
        ctx.q_table_mut().record_visit(state, action);
        self.pending.insert(
            guest,
            Decision {
                state,
                action,
                host,
                cluster_power: cluster.total_power(),
            },
        );
        Some(guest)
    }

    fn on_migration_committed(&mut self, ctx: &mut SimulationContext, cluster: &Cluster, guest: GuestId) {
        let Some(decision) = self.pending.remove(&guest) else {
            debug!(guest_id = %guest, "No pending decision for committed guest");
            return;
        };
        let rl = ctx.config().reinforcement;
        let reward = (decision.action as f64 - rl.reward_offset) * rl.reward_scale;
        let next_state = decision.state.saturating_sub(decision.action);

        let bootstrap = match rl.algorithm {
            LearningAlgorithm::QLearning => ctx.q_table().max_value(next_state),
            LearningAlgorithm::Sarsa => {
                let remaining = remaining_candidates(cluster, decision.host, guest);
                actions_of(cluster, decision.host, &remaining)
                    .iter()
                    .map(|a| ctx.q_table().get(next_state, *a))
                    .fold(None, |acc: Option<f64>, q| Some(acc.map_or(q, |m| m.max(q))))
                    .unwrap_or(0.0)
            }
        };

        let old = ctx.q_table().get(decision.state, decision.action);
        let updated = old + rl.alpha * (reward + rl.gamma * bootstrap - old);
        ctx.q_table_mut().set(decision.state, decision.action, updated);
        ctx.metrics().inc_rl_updates();
        debug!(
            guest_id = %guest,
            state = decision.state,
            action = decision.action,
            reward = reward,
            q_value = updated,
            "Updated Q-value"
        );
    }

    fn forget(&mut self, guest: GuestId) {
        if self.pending.remove(&guest).is_some() {
            debug!(guest_id = %guest, "Dropped decision for guest that stays put");
        }
    }

    fn reset(&mut self) {
        self.pending.clear();
    }

    fn name(&self) -> &'static str {
        "reinforcement_learning"
    }
}
