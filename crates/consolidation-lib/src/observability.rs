//! Observability for the consolidation engine
//!
//! Provides:
//! - Prometheus metrics (ticks, detections, migrations, power) on a registry
//!   owned by the simulation context
//! - Structured JSON logging with tracing

use crate::error::{EngineError, Result};
use crate::models::{GuestId, HostId, MigrationPlanEntry, ParentRef};
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::{error, info, warn};

/// Histogram buckets for migration delays (in simulated seconds)
const DELAY_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 3600.0];

impl From<prometheus::Error> for EngineError {
    fn from(err: prometheus::Error) -> Self {
        EngineError::Metrics(err.to_string())
    }
}

/// Why a guest was chosen for migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationReason {
    Overload,
    Underload,
}

impl MigrationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationReason::Overload => "overload",
            MigrationReason::Underload => "underload",
        }
    }
}

/// Engine metrics for Prometheus exposition
///
/// Each handle owns its registry, so independent runs in one process do not
/// share counters.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    control_ticks: IntCounter,
    overloaded_hosts: IntCounter,
    underloaded_hosts: IntCounter,
    migrations_planned: IntCounterVec,
    migrations_completed: IntCounter,
    migrations_cancelled: IntCounter,
    placement_failures: IntCounter,
    rl_updates: IntCounter,
    active_hosts: IntGauge,
    cluster_power_watts: Gauge,
    migration_delay_seconds: Histogram,
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("control_ticks", &self.control_ticks.get())
            .field("migrations_completed", &self.migrations_completed.get())
            .finish()
    }
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let control_ticks = IntCounter::new(
            "consolidation_control_ticks_total",
            "Number of control ticks evaluated",
        )?;
        let overloaded_hosts = IntCounter::new(
            "consolidation_overloaded_hosts_total",
            "Hosts found overloaded across all ticks",
        )?;
        let underloaded_hosts = IntCounter::new(
            "consolidation_underloaded_hosts_total",
            "Underloaded hosts drained across all ticks",
        )?;
        let migrations_planned = IntCounterVec::new(
            Opts::new(
                "consolidation_migrations_planned_total",
                "Migrations emitted by control ticks",
            ),
            &["reason"],
        )?;
        let migrations_completed = IntCounter::new(
            "consolidation_migrations_completed_total",
            "Migrations committed on completion",
        )?;
        let migrations_cancelled = IntCounter::new(
            "consolidation_migrations_cancelled_total",
            "Pending migrations rolled back",
        )?;
        let placement_failures = IntCounter::new(
            "consolidation_placement_failures_total",
            "Guests for which no target was found",
        )?;
        let rl_updates = IntCounter::new(
            "consolidation_rl_updates_total",
            "Q-table updates applied",
        )?;
        let active_hosts = IntGauge::new(
            "consolidation_active_hosts",
            "Hosts with at least one resident guest",
        )?;
        let cluster_power_watts = Gauge::new(
            "consolidation_cluster_power_watts",
            "Instantaneous power of all power-aware hosts",
        )?;
        let migration_delay_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "consolidation_migration_delay_seconds",
                "Estimated migration delay of planned moves",
            )
            .buckets(DELAY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(control_ticks.clone()))?;
        registry.register(Box::new(overloaded_hosts.clone()))?;
        registry.register(Box::new(underloaded_hosts.clone()))?;
        registry.register(Box::new(migrations_planned.clone()))?;
        registry.register(Box::new(migrations_completed.clone()))?;
        registry.register(Box::new(migrations_cancelled.clone()))?;
        registry.register(Box::new(placement_failures.clone()))?;
        registry.register(Box::new(rl_updates.clone()))?;
        registry.register(Box::new(active_hosts.clone()))?;
        registry.register(Box::new(cluster_power_watts.clone()))?;
        registry.register(Box::new(migration_delay_seconds.clone()))?;

        Ok(Self {
            registry,
            control_ticks,
            overloaded_hosts,
            underloaded_hosts,
            migrations_planned,
            migrations_completed,
            migrations_cancelled,
            placement_failures,
            rl_updates,
            active_hosts,
            cluster_power_watts,
            migration_delay_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn inc_control_ticks(&self) {
        self.control_ticks.inc();
    }

    pub fn inc_overloaded_hosts(&self) {
        self.overloaded_hosts.inc();
    }

    pub fn inc_underloaded_hosts(&self) {
        self.underloaded_hosts.inc();
    }

    /// Count a planned migration and observe its delay
    pub fn observe_migration_planned(&self, reason: MigrationReason, delay: f64) {
        self.migrations_planned.with_label_values(&[reason.as_str()]).inc();
        self.migration_delay_seconds.observe(delay);
    }

    pub fn inc_migrations_completed(&self) {
        self.migrations_completed.inc();
    }

    pub fn inc_migrations_cancelled(&self) {
        self.migrations_cancelled.inc();
    }

    pub fn inc_placement_failures(&self) {
        self.placement_failures.inc();
    }

    pub fn inc_rl_updates(&self) {
        self.rl_updates.inc();
    }

    pub fn set_cluster_state(&self, active_hosts: usize, power_watts: f64) {
        self.active_hosts.set(active_hosts as i64);
        self.cluster_power_watts.set(power_watts);
    }

    pub fn control_ticks(&self) -> u64 {
        self.control_ticks.get()
    }

    pub fn overloaded_hosts(&self) -> u64 {
        self.overloaded_hosts.get()
    }

    pub fn underloaded_hosts(&self) -> u64 {
        self.underloaded_hosts.get()
    }

    pub fn migrations_planned(&self, reason: MigrationReason) -> u64 {
        self.migrations_planned.with_label_values(&[reason.as_str()]).get()
    }

    pub fn migrations_completed(&self) -> u64 {
        self.migrations_completed.get()
    }

    pub fn migrations_cancelled(&self) -> u64 {
        self.migrations_cancelled.get()
    }

    pub fn placement_failures(&self) -> u64 {
        self.placement_failures.get()
    }

    pub fn rl_updates(&self) -> u64 {
        self.rl_updates.get()
    }

    pub fn cluster_power_watts(&self) -> f64 {
        self.cluster_power_watts.get()
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| EngineError::Metrics(e.to_string()))
    }
}

/// Structured logger for engine events
///
/// Provides consistent JSON-formatted logging for detections, migrations,
/// and other significant events.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self { run_id: run_id.into() }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_overload_detected(&self, time: f64, host: HostId, utilization: f64, detector: &str) {
        info!(
            event = "host_overloaded",
            run_id = %self.run_id,
            time = time,
            host_id = %host,
            utilization = utilization,
            detector = %detector,
            "Host overloaded"
        );
    }

    pub fn log_underload_detected(&self, time: f64, host: HostId, utilization: f64, guests: usize) {
        info!(
            event = "host_underloaded",
            run_id = %self.run_id,
            time = time,
            host_id = %host,
            utilization = utilization,
            guests = guests,
            "Draining underloaded host"
        );
    }

    pub fn log_migration_planned(&self, entry: &MigrationPlanEntry, reason: MigrationReason) {
        info!(
            event = "migration_planned",
            run_id = %self.run_id,
            time = entry.decided_at,
            guest_id = %entry.guest,
            source = %entry.source,
            target = %entry.target,
            delay_secs = entry.estimated_delay,
            reason = reason.as_str(),
            "Migration planned"
        );
    }

    pub fn log_migration_committed(&self, time: f64, entry: &MigrationPlanEntry) {
        info!(
            event = "migration_committed",
            run_id = %self.run_id,
            time = time,
            guest_id = %entry.guest,
            source = %entry.source,
            target = %entry.target,
            "Migration completed"
        );
    }

    pub fn log_migration_cancelled(&self, time: f64, guest: GuestId, target: ParentRef, reason: &str) {
        warn!(
            event = "migration_cancelled",
            run_id = %self.run_id,
            time = time,
            guest_id = %guest,
            target = %target,
            reason = %reason,
            "Migration cancelled"
        );
    }

    pub fn log_placement_failed(&self, time: f64, guest: GuestId) {
        warn!(
            event = "placement_failed",
            run_id = %self.run_id,
            time = time,
            guest_id = %guest,
            "No suitable target found"
        );
    }

    pub fn log_underload_rollback(&self, time: f64, host: HostId, guests: usize) {
        info!(
            event = "underload_rollback",
            run_id = %self.run_id,
            time = time,
            host_id = %host,
            guests = guests,
            "Could not place every guest of underloaded host, keeping it on"
        );
    }

    pub fn log_fatal(&self, time: f64, err: &EngineError) {
        error!(
            event = "fatal_error",
            run_id = %self.run_id,
            time = time,
            error = %err,
            "Engine invariant violated"
        );
    }

    pub fn log_tick_summary(&self, time: f64, planned: usize, active_hosts: usize, power_watts: f64) {
        info!(
            event = "control_tick",
            run_id = %self.run_id,
            time = time,
            planned = planned,
            active_hosts = active_hosts,
            power_watts = power_watts,
            "Control tick finished"
        );
    }

    pub fn log_run_started(&self, hosts: usize, guests: usize, policy: &str) {
        info!(
            event = "run_started",
            run_id = %self.run_id,
            hosts = hosts,
            guests = guests,
            policy = %policy,
            "Consolidation run started"
        );
    }

    pub fn log_run_finished(&self, time: f64, migrations: u64, energy_kwh: f64) {
        info!(
            event = "run_finished",
            run_id = %self.run_id,
            time = time,
            migrations = migrations,
            energy_kwh = energy_kwh,
            "Consolidation run finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_are_per_instance() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.inc_control_ticks();
        a.inc_migrations_completed();
        assert_eq!(a.control_ticks(), 1);
        assert_eq!(b.control_ticks(), 0);
        assert_eq!(b.migrations_completed(), 0);
    }

    #[test]
    fn test_planned_by_reason() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.observe_migration_planned(MigrationReason::Overload, 12.0);
        metrics.observe_migration_planned(MigrationReason::Overload, 3.0);
        metrics.observe_migration_planned(MigrationReason::Underload, 3.0);
        assert_eq!(metrics.migrations_planned(MigrationReason::Overload), 2);
        assert_eq!(metrics.migrations_planned(MigrationReason::Underload), 1);
    }

    #[test]
    fn test_render_exposition() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.set_cluster_state(3, 512.5);
        let text = metrics.render().unwrap();
        assert!(text.contains("consolidation_active_hosts 3"));
        assert!(text.contains("consolidation_cluster_power_watts 512.5"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("run-1");
        assert_eq!(logger.run_id(), "run-1");
    }
}
