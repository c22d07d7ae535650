//! Shared fixtures for unit tests

use crate::cluster::Cluster;
use crate::models::{GuestId, GuestSpec, HostId, HostSpec, ParentRef};
use crate::power::LinearPowerModel;
use crate::workload::ConstantUtilization;
use std::sync::Arc;

pub const INTERVAL: f64 = 300.0;

pub fn host_spec(pe_count: u32, mips_per_pe: f64) -> HostSpec {
    HostSpec {
        pe_count,
        mips_per_pe,
        ram: 8192.0,
        bw: 10_000.0,
        storage: 1_000_000.0,
    }
}

pub fn guest_spec(mips: f64, ram: f64) -> GuestSpec {
    GuestSpec {
        mips_per_core: mips,
        cores: 1,
        ram,
        bw: 100.0,
        size: 2500.0,
    }
}

/// `n` power-aware hosts of `pe_count` PEs, sampling on interval boundaries
pub fn cluster(n: usize, pe_count: u32, mips_per_pe: f64) -> Cluster {
    let mut cluster = Cluster::new(INTERVAL).with_sample_offset(0.0);
    for _ in 0..n {
        cluster.add_host(
            host_spec(pe_count, mips_per_pe),
            Some(Arc::new(LinearPowerModel::new(250.0, 0.7))),
        );
    }
    cluster
}

/// Register and place a VM running a constant workload, past instantiation
pub fn place_vm(cluster: &mut Cluster, host: HostId, local: u32, mips: f64, ram: f64, util: f64) -> GuestId {
    let id = GuestId::new(1, local);
    cluster
        .register_vm(id, guest_spec(mips, ram), Some(Arc::new(ConstantUtilization(util))))
        .unwrap();
    assert!(cluster.create(ParentRef::Host(host), id));
    cluster.guest_mut(id).unwrap().being_instantiated = false;
    id
}

/// Overwrite a guest's history; `samples` are oldest first
pub fn seed_history(cluster: &mut Cluster, guest: GuestId, samples: &[f64]) {
    let g = cluster.guest_mut(guest).unwrap();
    g.history.clear();
    for s in samples {
        g.history.push(*s);
    }
}
