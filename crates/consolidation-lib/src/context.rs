//! Per-run state shared by every policy
//!
//! The context owns what would otherwise be global: tunables, the seeded
//! random source, the Q-table and the metrics registry. Two contexts never
//! share state, so independent runs can live in one process.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::observability::{EngineMetrics, StructuredLogger};
use crate::qtable::QTable;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug)]
pub struct SimulationContext {
    config: EngineConfig,
    rng: StdRng,
    q_table: QTable,
    metrics: EngineMetrics,
    logger: StructuredLogger,
}

impl SimulationContext {
    /// Validate `config` and set up a fresh run
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let q_table = QTable::new(config.reinforcement.state_count, config.reinforcement.action_count);
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            q_table,
            metrics: EngineMetrics::new()?,
            logger: StructuredLogger::new(format!("run-{}", config.seed)),
            config,
        })
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.logger = StructuredLogger::new(run_id);
        self
    }

    /// Start from a Q-table learned in an earlier run
    pub fn with_q_table(mut self, q_table: QTable) -> Self {
        self.q_table = q_table;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn q_table(&self) -> &QTable {
        &self.q_table
    }

    pub fn q_table_mut(&mut self) -> &mut QTable {
        &mut self.q_table
    }

    /// Hand the learned table to the caller, leaving an empty one behind
    pub fn take_q_table(&mut self) -> QTable {
        let empty = QTable::new(self.q_table.states(), self.q_table.actions());
        std::mem::replace(&mut self.q_table, empty)
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }
}
