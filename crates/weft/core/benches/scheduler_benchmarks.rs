// Weft
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use weft_core::{
    ContextOptions, ExecContext, Executor, Serializer, Task, TaskGroup, TaskPriority, conc_reduce,
};

fn bench_enqueue_drain(c: &mut Criterion) {
    let ctx = ExecContext::new(ContextOptions::new().num_workers(4).reserved_slots(2));
    c.bench_function("enqueue_drain_1000_tasks", |b| {
        b.iter(|| {
            let grp = TaskGroup::new();
            let counter = Arc::new(AtomicUsize::new(0));
            for _ in 0..1000 {
                let counter = Arc::clone(&counter);
                ctx.enqueue(
                    Task::with_group(
                        move || {
                            counter.fetch_add(1, Ordering::Relaxed);
                        },
                        grp.clone(),
                    ),
                    TaskPriority::Normal,
                );
            }
            ctx.wait(&grp);
            assert_eq!(counter.load(Ordering::Relaxed), 1000);
        })
    });
}

fn bench_serializer_throughput(c: &mut Criterion) {
    let ctx = ExecContext::new(ContextOptions::new().num_workers(4).reserved_slots(2));
    c.bench_function("serializer_500_tasks", |b| {
        b.iter(|| {
            let ser = Serializer::with_executors(Some(ctx.executor(TaskPriority::Normal)), None);
            let grp = TaskGroup::new();
            for _ in 0..500 {
                ser.execute(Task::with_group(|| {}, grp.clone()));
            }
            ctx.wait(&grp);
        })
    });
}

fn bench_conc_reduce_sum(c: &mut Criterion) {
    c.bench_function("conc_reduce_sum_100k", |b| {
        b.iter(|| {
            let sum = conc_reduce(0, 100_000, 0u64, |acc, i| acc + i as u64, |a, b| a + b);
            black_box(sum)
        })
    });
}

criterion_group!(
    benches,
    bench_enqueue_drain,
    bench_serializer_throughput,
    bench_conc_reduce_sum
);
criterion_main!(benches);
