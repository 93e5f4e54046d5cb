//! Scheduler throughput benchmarks.
//!
//! Measures submit, merge and tick costs across the priority groups.

use std::time::Instant;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use respack_core::scheduler::{
    Notify, Priority, Scheduler, Step, Task, TaskContext, TaskKey, TaskKind, TaskOutput,
};

const PRIORITIES: [Priority; 5] = [
    Priority::Background,
    Priority::Low,
    Priority::Normal,
    Priority::High,
    Priority::Urgent,
];

/// Finishes after a fixed number of polls.
struct Spin {
    key: TaskKey,
    remaining: u32,
}

impl Task<u64> for Spin {
    fn key(&self) -> &TaskKey {
        &self.key
    }

    fn poll(&mut self, cx: &mut TaskContext<'_, u64>) -> Step {
        *cx.env += 1;
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            Step::Done(Ok(TaskOutput::Unit))
        } else {
            Step::Running
        }
    }
}

fn spin(name: String, steps: u32) -> Box<dyn Task<u64>> {
    Box::new(Spin {
        key: TaskKey::new(TaskKind::Request, name),
        remaining: steps,
    })
}

fn drain(scheduler: &mut Scheduler<u64>, env: &mut u64) {
    let now = Instant::now();
    while !scheduler.is_empty() {
        scheduler.tick(env, now);
    }
}

fn bench_submit_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_and_drain");

    for tasks in [16usize, 256, 4096] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_with_input(BenchmarkId::new("distinct", tasks), &tasks, |b, &tasks| {
            b.iter(|| {
                let mut scheduler = Scheduler::new(64);
                let mut env = 0u64;
                for i in 0..tasks {
                    let priority = PRIORITIES[i % PRIORITIES.len()];
                    scheduler.submit(spin(format!("t{i}"), 4), priority, Notify::Detached);
                }
                drain(&mut scheduler, &mut env);
                black_box(env)
            })
        });
    }

    group.finish();
}

fn bench_merged_requests(c: &mut Criterion) {
    let mut group = c.benchmark_group("merged_requests");

    for (name, keys) in [("hot", 4usize), ("spread", 64)] {
        group.throughput(Throughput::Elements(1024));
        group.bench_function(BenchmarkId::new("merge", name), |b| {
            b.iter(|| {
                let mut scheduler = Scheduler::new(64);
                let mut env = 0u64;
                for i in 0..1024 {
                    let priority = PRIORITIES[i % PRIORITIES.len()];
                    scheduler.submit(spin(format!("k{}", i % keys), 8), priority, Notify::Detached);
                }
                drain(&mut scheduler, &mut env);
                black_box(scheduler.stats().merged)
            })
        });
    }

    group.finish();
}

fn bench_cancel(c: &mut Criterion) {
    c.bench_function("cancel_half", |b| {
        b.iter(|| {
            let mut scheduler = Scheduler::new(64);
            let mut env = 0u64;
            let tickets: Vec<_> = (0..512)
                .map(|i| scheduler.submit(spin(format!("c{}", i % 128), 8), Priority::Normal, Notify::Detached))
                .collect();
            for ticket in tickets.iter().step_by(2) {
                scheduler.cancel(*ticket);
            }
            drain(&mut scheduler, &mut env);
            black_box(scheduler.stats().cancelled)
        })
    });
}

criterion_group!(benches, bench_submit_and_drain, bench_merged_requests, bench_cancel);
criterion_main!(benches);
