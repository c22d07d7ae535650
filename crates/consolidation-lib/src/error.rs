//! Error types for the consolidation engine

use crate::models::{GuestId, HostId, ParentRef, ResourceKind};
use thiserror::Error;

/// Errors surfaced to the run harness.
///
/// Only `CapacityInvariant` is produced during normal operation, and it is
/// fatal: it means a reservation the placement step vouched for could not be
/// honoured. Everything else is a caller mistake (unknown ids, bad config).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("capacity invariant violated: guest {guest} could not obtain {resource} on {parent}")]
    CapacityInvariant {
        guest: GuestId,
        parent: ParentRef,
        resource: ResourceKind,
    },

    #[error("unknown host: {0}")]
    UnknownHost(HostId),

    #[error("unknown guest: {0}")]
    UnknownGuest(GuestId),

    #[error("utilization out of range [0, 1]: {0}")]
    UtilizationOutOfRange(f64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("metrics registry error: {0}")]
    Metrics(String),
}

impl EngineError {
    /// Whether the run must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::CapacityInvariant { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures of the statistics helpers.
///
/// These never leave the detectors and selection policies; callers resolve
/// them by delegating to a fallback.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum StatsError {
    #[error("insufficient data: need {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("degenerate regression input")]
    Degenerate,
}
