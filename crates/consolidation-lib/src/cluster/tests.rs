use super::*;
use crate::workload::{ConstantUtilization, TraceUtilization};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn host_spec() -> HostSpec {
    HostSpec {
        pe_count: 2,
        mips_per_pe: 500.0,
        ram: 4096.0,
        bw: 10_000.0,
        storage: 1_000_000.0,
    }
}

fn vm_spec(mips: f64, ram: f64) -> GuestSpec {
    GuestSpec {
        mips_per_core: mips,
        cores: 1,
        ram,
        bw: 100.0,
        size: 2500.0,
    }
}

fn cluster_with_hosts(n: usize) -> Cluster {
    let mut cluster = Cluster::new(300.0).with_sample_offset(0.0);
    for _ in 0..n {
        cluster.add_host(host_spec(), None);
    }
    cluster
}

fn vm(cluster: &mut Cluster, local: u32, mips: f64, utilization: f64) -> GuestId {
    cluster
        .register_vm(
            GuestId::new(1, local),
            vm_spec(mips, 512.0),
            Some(Arc::new(ConstantUtilization(utilization))),
        )
        .unwrap()
}

#[test]
fn test_create_and_destroy_updates_ledgers() {
    let mut cluster = cluster_with_hosts(1);
    let host = ParentRef::Host(HostId(0));
    let g = vm(&mut cluster, 1, 400.0, 1.0);

    assert!(cluster.create(host, g));
    assert_eq!(cluster.guest(g).unwrap().parent(), Some(host));
    assert_eq!(cluster.host(HostId(0)).unwrap().available_mips(), 600.0);
    assert_eq!(cluster.host_of(g), Some(HostId(0)));

    cluster.destroy(host, g);
    assert_eq!(cluster.guest(g).unwrap().parent(), None);
    assert_eq!(cluster.host(HostId(0)).unwrap().available_mips(), 1000.0);
    assert_eq!(cluster.host(HostId(0)).unwrap().tenancy().ram().total_allocated(), 0.0);
}

#[test]
fn test_create_failure_leaves_no_partial_residency() {
    let mut cluster = cluster_with_hosts(1);
    let host = ParentRef::Host(HostId(0));
    let big = cluster
        .register_vm(GuestId::new(1, 1), vm_spec(600.0, 512.0), None)
        .unwrap();
    // 600 MIPS on one core cannot fit a 500 MIPS PE
    assert!(!cluster.create(host, big));
    let h = cluster.host(HostId(0)).unwrap();
    assert_eq!(h.tenancy().ram().total_allocated(), 0.0);
    assert_eq!(h.tenancy().bw().total_allocated(), 0.0);
    assert!(h.guests().is_empty());
    assert_eq!(cluster.guest(big).unwrap().parent(), None);
}

#[test]
fn test_unknown_parent_is_refused() {
    let mut cluster = cluster_with_hosts(1);
    let g = vm(&mut cluster, 1, 100.0, 1.0);
    assert!(!cluster.create(ParentRef::Host(HostId(7)), g));
    assert!(matches!(
        cluster.add_migrating_in(ParentRef::Host(HostId(7)), g),
        Err(EngineError::UnknownHost(HostId(7)))
    ));
}

#[test]
fn test_duplicate_registration_is_config_error() {
    let mut cluster = cluster_with_hosts(1);
    vm(&mut cluster, 1, 100.0, 1.0);
    let err = cluster
        .register_vm(GuestId::new(1, 1), vm_spec(100.0, 1.0), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_requested_mips_uses_spec_while_instantiating() {
    let mut cluster = cluster_with_hosts(1);
    let g = vm(&mut cluster, 1, 400.0, 0.25);
    cluster.create(ParentRef::Host(HostId(0)), g);
    assert_eq!(cluster.requested_mips(g), 400.0);

    cluster.update_processing(0.0);
    assert!(!cluster.guest(g).unwrap().is_being_instantiated());
    assert_eq!(cluster.requested_mips(g), 100.0);
}

#[test]
fn test_vm_demand_sums_its_containers() {
    let mut cluster = cluster_with_hosts(1);
    let vm_id = cluster
        .register_vm(
            GuestId::new(1, 1),
            GuestSpec {
                mips_per_core: 500.0,
                cores: 2,
                ram: 2048.0,
                bw: 1000.0,
                size: 10_000.0,
            },
            None,
        )
        .unwrap();
    assert!(cluster.create(ParentRef::Host(HostId(0)), vm_id));
    for (local, u) in [(1, 0.5), (2, 0.25)] {
        let c = cluster
            .register_container(
                GuestId::new(2, local),
                GuestSpec {
                    mips_per_core: 400.0,
                    cores: 1,
                    ram: 256.0,
                    bw: 10.0,
                    size: 100.0,
                },
                Arc::new(ConstantUtilization(u)),
            )
            .unwrap();
        assert!(cluster.create(ParentRef::Vm(vm_id), c));
    }
    cluster.update_processing(0.0);
    assert_eq!(cluster.requested_mips(vm_id), 300.0);
    assert_eq!(cluster.containers_on_host(HostId(0)).len(), 2);
    assert_eq!(cluster.host_of(GuestId::new(2, 1)), Some(HostId(0)));
    assert_eq!(cluster.host_requested_mips(HostId(0)), 300.0);
}

#[test]
fn test_migration_round_trip_restores_capacity_exactly() {
    let mut cluster = cluster_with_hosts(2);
    let a = ParentRef::Host(HostId(0));
    let b = ParentRef::Host(HostId(1));
    let resident = vm(&mut cluster, 1, 333.3, 1.0);
    let mover = vm(&mut cluster, 2, 123.45, 1.0);
    assert!(cluster.create(a, resident));
    assert!(cluster.create(a, mover));
    cluster.update_processing(0.0);

    let host_a = cluster.host(HostId(0)).unwrap();
    let before = (
        host_a.available_mips(),
        host_a.tenancy().ram().available(),
        host_a.tenancy().bw().available(),
        host_a.tenancy().storage().available(),
    );

    cluster.add_migrating_in(b, mover).unwrap();
    cluster.commit_migration(a, b, mover).unwrap();
    assert_eq!(cluster.host_of(mover), Some(HostId(1)));
    cluster.add_migrating_in(a, mover).unwrap();
    cluster.commit_migration(b, a, mover).unwrap();

    let host_a = cluster.host(HostId(0)).unwrap();
    let after = (
        host_a.available_mips(),
        host_a.tenancy().ram().available(),
        host_a.tenancy().bw().available(),
        host_a.tenancy().storage().available(),
    );
    assert_eq!(before, after);
    assert_eq!(cluster.host(HostId(1)).unwrap().available_mips(), 1000.0);
}

#[test]
fn test_dual_bookkeeping_during_migration() {
    let mut cluster = cluster_with_hosts(2);
    let a = ParentRef::Host(HostId(0));
    let b = ParentRef::Host(HostId(1));
    let g = vm(&mut cluster, 1, 300.0, 1.0);
    cluster.create(a, g);
    cluster.add_migrating_in(b, g).unwrap();

    let guest = cluster.guest(g).unwrap();
    assert!(guest.is_in_migration());
    assert_eq!(guest.parent(), Some(a));
    // Billed on both ends
    assert_eq!(cluster.host(HostId(0)).unwrap().available_mips(), 700.0);
    assert_eq!(cluster.host(HostId(1)).unwrap().available_mips(), 700.0);
    // Only waiting-to-arrive guests on b, so it is not active yet
    assert!(!cluster.host(HostId(1)).unwrap().is_active());
    assert!(cluster.all_guests_migrating_out_or_any_migrating_in(HostId(0)));
    assert!(cluster.migratable_guests(a).is_empty());

    cluster.remove_migrating_in(b, g);
    assert!(!cluster.guest(g).unwrap().is_in_migration());
    assert_eq!(cluster.host(HostId(1)).unwrap().available_mips(), 1000.0);
    assert!(!cluster.all_guests_migrating_out_or_any_migrating_in(HostId(0)));
}

#[test]
fn test_add_migrating_in_without_capacity_is_fatal() {
    let mut cluster = cluster_with_hosts(2);
    let filler = vm(&mut cluster, 1, 500.0, 1.0);
    let filler2 = vm(&mut cluster, 2, 500.0, 1.0);
    let mover = vm(&mut cluster, 3, 300.0, 1.0);
    cluster.create(ParentRef::Host(HostId(1)), filler);
    cluster.create(ParentRef::Host(HostId(1)), filler2);
    cluster.create(ParentRef::Host(HostId(0)), mover);

    let err = cluster
        .add_migrating_in(ParentRef::Host(HostId(1)), mover)
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        EngineError::CapacityInvariant {
            resource: ResourceKind::Mips,
            ..
        }
    ));
    assert!(!cluster.guest(mover).unwrap().is_in_migration());
}

#[test]
fn test_allocation_follows_demand_after_instantiation() {
    let mut cluster = cluster_with_hosts(1);
    let host = ParentRef::Host(HostId(0));
    let a = vm(&mut cluster, 1, 500.0, 0.2);
    let b = vm(&mut cluster, 2, 500.0, 0.2);
    cluster.create(host, a);
    cluster.create(host, b);
    cluster.update_processing(0.0);
    assert_eq!(cluster.host(HostId(0)).unwrap().allocated_mips(), 1000.0);

    cluster.update_processing(300.0);
    assert_eq!(cluster.host(HostId(0)).unwrap().allocated_mips(), 200.0);
    assert_eq!(cluster.guest(a).unwrap().allocated_mips(), 100.0);
    assert_eq!(cluster.host_utilization(HostId(0)), 0.2);
}

#[test]
fn test_sampling_skips_startup_zero_and_respects_interval() {
    let mut cluster = cluster_with_hosts(1);
    let idle = vm(&mut cluster, 1, 100.0, 0.0);
    let busy = vm(&mut cluster, 2, 100.0, 0.5);
    cluster.create(ParentRef::Host(HostId(0)), idle);
    cluster.create(ParentRef::Host(HostId(0)), busy);

    cluster.update_processing(0.0);
    // Still instantiating at time 0, so both report their spec
    assert_eq!(cluster.guest(idle).unwrap().history().len(), 1);

    cluster.update_processing(150.0);
    assert_eq!(cluster.guest(busy).unwrap().history().len(), 1);

    cluster.update_processing(300.0);
    assert_eq!(cluster.guest(idle).unwrap().history().to_vec(), vec![0.0, 1.0]);
    assert_eq!(cluster.guest(busy).unwrap().history().to_vec(), vec![0.5, 1.0]);

    // A repeated call at the same time does not sample twice
    cluster.update_processing(300.0);
    assert_eq!(cluster.guest(busy).unwrap().history().len(), 2);
}

#[test]
fn test_zero_sample_at_time_zero_is_dropped() {
    let mut cluster = cluster_with_hosts(1);
    let g = vm(&mut cluster, 1, 100.0, 0.0);
    cluster.create(ParentRef::Host(HostId(0)), g);
    cluster.update_processing(0.0);
    cluster.update_processing(0.0);
    // Second update at t=0 is not a new tick; first one sampled the spec demand
    assert_eq!(cluster.guest(g).unwrap().history().to_vec(), vec![1.0]);

    let mut fresh = cluster_with_hosts(1);
    let c = vm(&mut fresh, 1, 100.0, 0.0);
    fresh.create(ParentRef::Host(HostId(0)), c);
    fresh.guests.get_mut(&c).unwrap().being_instantiated = false;
    fresh.update_processing(0.0);
    assert!(fresh.guest(c).unwrap().history().is_empty());
}

#[test]
fn test_update_processing_reports_next_change() {
    let mut cluster = cluster_with_hosts(1);
    let g = cluster
        .register_vm(
            GuestId::new(1, 1),
            vm_spec(200.0, 128.0),
            Some(Arc::new(TraceUtilization::new(vec![0.1, 0.2, 0.3], 300.0))),
        )
        .unwrap();
    assert_eq!(cluster.update_processing(0.0), None);
    cluster.create(ParentRef::Host(HostId(0)), g);
    assert_eq!(cluster.update_processing(0.0), Some(300.0));
    assert_eq!(cluster.update_processing(300.0), Some(600.0));
    assert_eq!(cluster.update_processing(600.0), None);
}

#[test]
fn test_host_history_weights_guest_histories() {
    let mut cluster = cluster_with_hosts(1);
    let a = vm(&mut cluster, 1, 500.0, 1.0);
    let b = vm(&mut cluster, 2, 250.0, 0.4);
    cluster.create(ParentRef::Host(HostId(0)), a);
    cluster.update_processing(0.0);
    cluster.create(ParentRef::Host(HostId(0)), b);
    cluster.update_processing(300.0);
    cluster.update_processing(600.0);

    // `b` reports its spec on its first sample; the oldest sample predates it
    let history = cluster.host_history(HostId(0));
    assert_eq!(history.len(), 3);
    assert!((history[0] - 0.6).abs() < 1e-12);
    assert!((history[1] - 0.75).abs() < 1e-12);
    assert!((history[2] - 0.5).abs() < 1e-12);
}

#[test]
fn test_total_power_uses_power_aware_hosts_only() {
    let mut cluster = Cluster::new(300.0);
    cluster.add_host(host_spec(), Some(Arc::new(crate::power::LinearPowerModel::new(200.0, 0.5))));
    cluster.add_host(host_spec(), None);
    let g = vm(&mut cluster, 1, 500.0, 1.0);
    cluster.create(ParentRef::Host(HostId(0)), g);
    assert!((cluster.total_power() - 150.0).abs() < 1e-9);
    assert_eq!(cluster.host_power(HostId(1)), None);
}

#[test]
fn test_capacity_invariant_under_random_operations() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut cluster = cluster_with_hosts(3);
    let ids: Vec<GuestId> = (0..12)
        .map(|i| {
            let mips = rng.gen_range(50.0..500.0);
            let u = rng.gen_range(0.0..1.0);
            vm(&mut cluster, i, mips, u)
        })
        .collect();

    let mut now = 0.0;
    for step in 0..400 {
        let guest = ids[rng.gen_range(0..ids.len())];
        let host = ParentRef::Host(HostId(rng.gen_range(0..3)));
        match rng.gen_range(0..5) {
            0 => {
                cluster.create(host, guest);
            }
            1 => {
                if let Some(parent) = cluster.guest(guest).and_then(|g| g.parent()) {
                    cluster.destroy(parent, guest);
                }
            }
            2 => {
                let _ = cluster.add_migrating_in(host, guest);
            }
            3 => cluster.remove_migrating_in(host, guest),
            _ => {
                now += 150.0;
                cluster.update_processing(now);
            }
        }

        for h in cluster.hosts() {
            let t = h.tenancy();
            assert!(t.compute().total_allocated() <= t.compute().capacity(), "mips at step {}", step);
            assert!(t.ram().total_allocated() <= t.ram().capacity(), "ram at step {}", step);
            assert!(t.bw().total_allocated() <= t.bw().capacity(), "bw at step {}", step);
        }
    }
}
