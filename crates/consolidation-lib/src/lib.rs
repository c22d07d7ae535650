//! Consolidation engine for virtualised datacenters
//!
//! This crate provides the core functionality for:
//! - Capacity accounting for hosts, VMs and containers
//! - Overload and underload detection on utilization histories
//! - Guest selection, including a Q-learning selector
//! - Target placement and migration orchestration
//! - Metrics and structured logging

pub mod cluster;
pub mod config;
pub mod context;
pub mod detection;
pub mod error;
pub mod history;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod placement;
pub mod power;
pub mod provisioner;
pub mod qtable;
pub mod selection;
pub mod stats;
pub mod workload;

#[cfg(test)]
mod testing;

pub use cluster::{migration_time, Cluster, Guest, Host};
pub use config::{EngineConfig, MigrationLevel, OverloadPolicy, PlacementPolicyKind, SelectionPolicyKind};
pub use context::SimulationContext;
pub use error::{EngineError, Result};
pub use models::*;
pub use observability::{EngineMetrics, MigrationReason, StructuredLogger};
pub use orchestrator::{MigrationOrchestrator, PendingMigration};
