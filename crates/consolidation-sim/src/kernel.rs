//! Discrete-event kernel
//!
//! Owns the virtual clock and a time-ordered event queue. Control ticks run
//! every scheduling interval (offset so they land on sampling ticks),
//! migrations complete after the delay the engine estimated, and demand
//! refreshes follow the workload traces. Energy is integrated between events
//! from the cluster's instantaneous power.

use crate::config::SimConfig;
use anyhow::{Context, Result};
use consolidation_lib::qtable::QTable;
use consolidation_lib::workload::TraceUtilization;
use consolidation_lib::{
    Cluster, GuestId, MigrationOrchestrator, MigrationPlanEntry, MigrationReason, SimulationContext,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, info};

/// Owner id of every simulated VM
const VM_OWNER: u32 = 1;

const JOULES_PER_KWH: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy)]
enum EventKind {
    ControlTick,
    MigrationComplete(MigrationPlanEntry),
    Refresh,
}

#[derive(Debug, Clone, Copy)]
struct Event {
    time: f64,
    seq: u64,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time.total_cmp(&other.time).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Outcome of one run, printed as JSON
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub simulated_seconds: f64,
    pub hosts: usize,
    pub vms: usize,
    pub unplaced_vms: usize,
    pub control_ticks: u64,
    pub migrations_planned: u64,
    pub migrations_completed: u64,
    pub overloaded_host_detections: u64,
    pub underloaded_host_detections: u64,
    pub placement_failures: u64,
    pub energy_kwh: f64,
    pub active_hosts_at_end: usize,
}

pub struct Simulation {
    config: SimConfig,
    cluster: Cluster,
    ctx: SimulationContext,
    orchestrator: MigrationOrchestrator,
    queue: BinaryHeap<Reverse<Event>>,
    seq: u64,
    clock: f64,
    next_refresh: Option<f64>,
    energy_joules: f64,
    unplaced: usize,
}

impl Simulation {
    /// Build the datacenter and admit every VM. `q_table` seeds the
    /// reinforcement-learning selector with an earlier run's knowledge.
    pub fn new(config: SimConfig, q_table: Option<QTable>) -> Result<Self> {
        let mut ctx = SimulationContext::new(config.engine.clone()).context("Invalid engine configuration")?;
        if let Some(q_table) = q_table {
            ctx = ctx.with_q_table(q_table);
        }
        let orchestrator = MigrationOrchestrator::new(&config.engine).context("Failed to build policies")?;

        let mut cluster =
            Cluster::new(config.engine.scheduling_interval).with_sample_offset(config.engine.sample_offset);
        for group in &config.hosts {
            for _ in 0..group.count {
                cluster.add_host(group.spec, Some(group.power.build()));
            }
        }

        let mut simulation = Self {
            config,
            cluster,
            ctx,
            orchestrator,
            queue: BinaryHeap::new(),
            seq: 0,
            clock: 0.0,
            next_refresh: None,
            energy_joules: 0.0,
            unplaced: 0,
        };
        simulation.admit_vms()?;
        Ok(simulation)
    }

    pub fn context(&self) -> &SimulationContext {
        &self.ctx
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Hand over the learned Q-table
    pub fn take_q_table(&mut self) -> QTable {
        self.ctx.take_q_table()
    }

    fn admit_vms(&mut self) -> Result<()> {
        let trace = &self.config.trace;
        let mut rng = StdRng::seed_from_u64(self.config.engine.seed);
        let noise = Normal::new(0.0, trace.noise_std_dev).context("Invalid trace noise")?;
        let samples = (self.config.duration / trace.sample_interval).ceil() as usize + 1;

        let mut local = 0;
        for group in &self.config.vms {
            for _ in 0..group.count {
                let base = if trace.max_base > trace.min_base {
                    rng.gen_range(trace.min_base..trace.max_base)
                } else {
                    trace.min_base
                };
                let demand: Vec<f64> = (0..samples)
                    .map(|_| (base + noise.sample(&mut rng)).clamp(0.0, 1.0))
                    .collect();
                let id = GuestId::new(VM_OWNER, local);
                local += 1;

                self.cluster.register_vm(
                    id,
                    group.spec,
                    Some(Arc::new(TraceUtilization::new(demand, trace.sample_interval))),
                )?;
                let placed = self
                    .orchestrator
                    .on_guest_create_request(&mut self.ctx, &mut self.cluster, id)
                    .context("VM admission failed")?;
                if placed.is_none() {
                    self.unplaced += 1;
                }
            }
        }
        info!(
            vms = local,
            unplaced = self.unplaced,
            "VMs admitted"
        );
        Ok(())
    }

    fn schedule(&mut self, time: f64, kind: EventKind) {
        self.seq += 1;
        self.queue.push(Reverse(Event {
            time,
            seq: self.seq,
            kind,
        }));
    }

    /// Move the clock to `now`, charging energy for the elapsed span at the
    /// power drawn before the update
    fn advance(&mut self, now: f64) {
        if now > self.clock {
            self.energy_joules += self.cluster.total_power() * (now - self.clock);
            self.clock = now;
        }
        let next = self.cluster.update_processing(now);
        if let Some(t) = next.filter(|t| *t <= self.config.duration) {
            if self.next_refresh.map_or(true, |r| r <= now || t < r) {
                self.next_refresh = Some(t);
                self.schedule(t, EventKind::Refresh);
            }
        }
    }

    /// Run to the configured duration. Fails only on a capacity invariant
    /// violation inside the engine.
    pub fn run(&mut self) -> Result<RunSummary> {
        let interval = self.config.engine.scheduling_interval;
        self.ctx.logger().log_run_started(
            self.cluster.hosts().len(),
            self.config.vm_count() - self.unplaced,
            self.orchestrator.selection_policy().name(),
        );

        self.schedule(self.config.engine.sample_offset, EventKind::ControlTick);
        while let Some(Reverse(event)) = self.queue.pop() {
            if event.time > self.config.duration {
                break;
            }
            self.advance(event.time);
            match event.kind {
                EventKind::ControlTick => {
                    let plan = self
                        .orchestrator
                        .run_control_tick(&mut self.ctx, &mut self.cluster)
                        .context("Control tick failed")?;
                    for entry in plan {
                        self.schedule(event.time + entry.estimated_delay, EventKind::MigrationComplete(entry));
                    }
                    self.schedule(event.time + interval, EventKind::ControlTick);
                }
                EventKind::MigrationComplete(entry) => {
                    self.orchestrator
                        .on_migration_complete(&mut self.ctx, &mut self.cluster, &entry)
                        .context("Migration commit failed")?;
                }
                EventKind::Refresh => debug!(time = event.time, "Demand refreshed"),
            }
        }
        self.advance(self.config.duration);

        let summary = self.summary();
        self.ctx
            .logger()
            .log_run_finished(self.clock, summary.migrations_completed, summary.energy_kwh);
        Ok(summary)
    }

    fn summary(&self) -> RunSummary {
        let metrics = self.ctx.metrics();
        RunSummary {
            run_id: self.ctx.logger().run_id().to_string(),
            simulated_seconds: self.clock,
            hosts: self.cluster.hosts().len(),
            vms: self.config.vm_count(),
            unplaced_vms: self.unplaced,
            control_ticks: metrics.control_ticks(),
            migrations_planned: metrics.migrations_planned(MigrationReason::Overload)
                + metrics.migrations_planned(MigrationReason::Underload),
            migrations_completed: metrics.migrations_completed(),
            overloaded_host_detections: metrics.overloaded_hosts(),
            underloaded_host_detections: metrics.underloaded_hosts(),
            placement_failures: metrics.placement_failures(),
            energy_kwh: self.energy_joules / JOULES_PER_KWH,
            active_hosts_at_end: self.cluster.hosts().iter().filter(|h| h.is_active()).count(),
        }
    }
}
