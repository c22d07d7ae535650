//! Dense Q-value table with visit counters

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QTable {
    states: usize,
    actions: usize,
    values: Vec<f64>,
    state_visits: Vec<u64>,
    state_action_visits: Vec<u64>,
}

impl QTable {
    /// All-zero table of `states × actions`
    pub fn new(states: usize, actions: usize) -> Self {
        Self {
            states,
            actions,
            values: vec![0.0; states * actions],
            state_visits: vec![0; states],
            state_action_visits: vec![0; states * actions],
        }
    }

    pub fn states(&self) -> usize {
        self.states
    }

    pub fn actions(&self) -> usize {
        self.actions
    }

    /// Clamp a state index into the table
    pub fn state_index(&self, state: usize) -> usize {
        state.min(self.states.saturating_sub(1))
    }

    /// Clamp an action index into the table
    pub fn action_index(&self, action: usize) -> usize {
        action.min(self.actions.saturating_sub(1))
    }

    fn slot(&self, state: usize, action: usize) -> usize {
        self.state_index(state) * self.actions + self.action_index(action)
    }

    pub fn get(&self, state: usize, action: usize) -> f64 {
        self.values.get(self.slot(state, action)).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, state: usize, action: usize, value: f64) {
        let slot = self.slot(state, action);
        if let Some(v) = self.values.get_mut(slot) {
            *v = value;
        }
    }

    /// Highest value over all actions in `state`
    pub fn max_value(&self, state: usize) -> f64 {
        let start = self.state_index(state) * self.actions;
        self.values
            .get(start..start + self.actions)
            .map(|row| row.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    }

    pub fn record_visit(&mut self, state: usize, action: usize) {
        let s = self.state_index(state);
        if let Some(v) = self.state_visits.get_mut(s) {
            *v += 1;
        }
        let slot = self.slot(state, action);
        if let Some(v) = self.state_action_visits.get_mut(slot) {
            *v += 1;
        }
    }

    pub fn state_visits(&self, state: usize) -> u64 {
        self.state_visits.get(self.state_index(state)).copied().unwrap_or(0)
    }

    pub fn state_action_visits(&self, state: usize, action: usize) -> u64 {
        self.state_action_visits
            .get(self.slot(state, action))
            .copied()
            .unwrap_or(0)
    }

    /// Zero every value and counter
    pub fn reset(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
        self.state_visits.iter_mut().for_each(|v| *v = 0);
        self.state_action_visits.iter_mut().for_each(|v| *v = 0);
    }
}
