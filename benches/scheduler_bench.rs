//! Benchmarks for nfs-stress
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Instant;

fn benchmark_registry_cycle(c: &mut Criterion) {
    use nfs_stress::protocol::{Action, Work, WorkerId};
    use nfs_stress::scheduler::{Job, WorkerRegistry};

    c.bench_function("registry_select_assign_complete", |b| {
        let mut registry = WorkerRegistry::new(50);
        let now = Instant::now();
        for n in 0..64 {
            registry
                .register_worker(&WorkerId::for_process(&format!("client{:02}", n), n), now)
                .unwrap();
        }
        let work = Work::new(Action::Stat, "/dir/file");

        b.iter(|| {
            let worker = registry.select_worker().unwrap();
            let job = Job::new(work.clone());
            let id = job.id.clone();
            registry.assign(&worker, job).unwrap();
            black_box(registry.complete(&worker, &id));
        })
    });
}

fn benchmark_workload_plan(c: &mut Criterion) {
    use chrono::NaiveDate;
    use nfs_stress::namespace::{Namespace, TreeShape};
    use nfs_stress::scheduler::WorkloadPlanner;

    c.bench_function("workload_plan", |b| {
        let mut ns = Namespace::build(
            TreeShape {
                depth: 1,
                width: 10,
                files_per_dir: 1000,
            },
            Some(1),
        );
        let created = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let ids: Vec<_> = ns.unsynced().collect();
        for id in ids {
            ns.mark_synced(id, Some(4096), created);
        }
        let mut planner = WorkloadPlanner::new(Some(1));

        b.iter(|| black_box(planner.plan(&ns)))
    });
}

fn benchmark_message_decode(c: &mut Criterion) {
    use nfs_stress::protocol::{WorkerId, WorkerMessage};

    let worker = WorkerId::from("client01:0x4d2");
    let frame = br#"{"message": "job_done", "job_id": "5f0c", "result": {"result": "success", "action": "write", "target": "/d/f", "timestamp": "2024/01/01 00:00:00.000001", "data": {"hash": "9a1f", "offset": 4096, "chunk_size": 65536, "uuid": "0123456789ab", "data_pattern": 3, "repeats": 4096}}}"#;

    c.bench_function("worker_message_decode", |b| {
        b.iter(|| black_box(WorkerMessage::decode(&worker, black_box(frame)).unwrap()))
    });
}

criterion_group!(
    benches,
    benchmark_registry_cycle,
    benchmark_workload_plan,
    benchmark_message_decode,
);
criterion_main!(benches);
