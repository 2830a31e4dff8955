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

//! End-to-end scheduler scenarios against the default execution context
//! and explicit contexts.

use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use weft_core::{
    ContextOptions, ExecContext, Task, TaskGroup, TaskPriority, conc_for, spawn_and_wait,
    spawn_and_wait_all, spawn_with_group, wait,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn test_thousand_tasks_increment_counter() {
    init_tracing();
    let grp = TaskGroup::new();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..1000 {
        let counter = Arc::clone(&counter);
        spawn_with_group(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            &grp,
        );
    }
    wait(&grp);
    assert_eq!(counter.load(Ordering::SeqCst), 1000);
    assert!(!grp.is_active());
}

#[test]
fn test_conc_for_writes_every_index_once() {
    const N: usize = 1_000_000;
    let arr: Vec<AtomicUsize> = (0..N).map(|_| AtomicUsize::new(0)).collect();

    conc_for(0, N, |i| {
        arr[i].fetch_add(2 * i + 1, Ordering::Relaxed);
    });

    // The call returns only after every write completed, each exactly once
    for (i, slot) in arr.iter().enumerate() {
        assert_eq!(slot.load(Ordering::Relaxed), 2 * i + 1);
    }
}

#[test]
fn test_cancelling_queued_tasks_skips_all_bodies() {
    let ctx = ExecContext::new(ContextOptions::new().num_workers(1).reserved_slots(2));
    let grp = TaskGroup::new();

    // Block the only worker so the batch below stays queued
    let gate = Arc::new(AtomicBool::new(false));
    let gate_in_task = Arc::clone(&gate);
    ctx.enqueue(
        Task::new(move || {
            while !gate_in_task.load(Ordering::Acquire) {
                std::thread::yield_now();
            }
        }),
        TaskPriority::Critical,
    );

    let ran = Arc::new(AtomicUsize::new(0));
    let cancelled = Arc::new(AtomicUsize::new(0));
    for _ in 0..100 {
        let ran = Arc::clone(&ran);
        let cancelled = Arc::clone(&cancelled);
        ctx.enqueue(
            Task::with_continuation(
                move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                },
                Some(grp.clone()),
                move |err| {
                    if err.map(|e| e.is_cancelled()).unwrap_or(false) {
                        cancelled.fetch_add(1, Ordering::SeqCst);
                    }
                },
            ),
            TaskPriority::Normal,
        );
    }

    grp.cancel();
    gate.store(true, Ordering::Release);
    ctx.wait(&grp);

    assert_eq!(ran.load(Ordering::SeqCst), 0);
    assert_eq!(cancelled.load(Ordering::SeqCst), 100);
    assert!(!grp.is_active());
}

#[test]
fn test_spawn_and_wait_completes_inline_work() {
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    spawn_and_wait(move || {
        flag.store(true, Ordering::SeqCst);
    });
    assert!(done.load(Ordering::SeqCst));
}

#[test]
fn test_spawn_and_wait_all_runs_every_closure() {
    let counter = Arc::new(AtomicUsize::new(0));
    let fns: Vec<Box<dyn FnOnce() + Send>> = (0..8)
        .map(|_| {
            let counter = Arc::clone(&counter);
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        })
        .collect();
    spawn_and_wait_all(fns);
    assert_eq!(counter.load(Ordering::SeqCst), 8);
}

#[test]
fn test_nested_spawns_complete_before_wait_returns() {
    let grp = TaskGroup::new();
    let counter = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let counter = Arc::clone(&counter);
        let grp_inner = grp.clone();
        spawn_with_group(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                for _ in 0..10 {
                    let counter = Arc::clone(&counter);
                    spawn_with_group(
                        move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        },
                        &grp_inner,
                    );
                }
            },
            &grp,
        );
    }
    wait(&grp);
    assert_eq!(counter.load(Ordering::SeqCst), 110);
}

#[test]
fn test_mixed_priorities_under_load() {
    init_tracing();
    let ctx = ExecContext::new(ContextOptions::new().num_workers(4).reserved_slots(2));
    let grp = TaskGroup::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let mut rng = rand::thread_rng();

    for _ in 0..2_000 {
        let priority = match rng.gen_range(0..5) {
            0 => TaskPriority::Critical,
            1 => TaskPriority::High,
            2 => TaskPriority::Normal,
            3 => TaskPriority::Low,
            _ => TaskPriority::Background,
        };
        let spin = rng.gen_range(0..64);
        let counter = Arc::clone(&counter);
        ctx.enqueue(
            Task::with_group(
                move || {
                    for _ in 0..spin {
                        std::hint::spin_loop();
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ),
            priority,
        );
    }
    ctx.wait(&grp);
    assert_eq!(counter.load(Ordering::SeqCst), 2_000);
}

#[test]
fn test_attach_worker_serves_tasks_until_shutdown() {
    struct CtxPtr(*const ExecContext);
    unsafe impl Send for CtxPtr {}

    let ctx = ExecContext::new(ContextOptions::new().num_workers(1).reserved_slots(2));
    let ptr = CtxPtr(&ctx as *const ExecContext);

    // The pointer stays valid: the thread only dereferences it before
    // attach_worker returns, and attach_worker returns during ctx's drop,
    // while ctx is still alive
    let attached = std::thread::spawn(move || {
        let ptr = ptr;
        let ctx = unsafe { &*ptr.0 };
        ctx.attach_worker().unwrap();
    });

    let grp = TaskGroup::new();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..200 {
        let counter = Arc::clone(&counter);
        ctx.enqueue(
            Task::with_group(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ),
            TaskPriority::Normal,
        );
    }
    ctx.wait(&grp);
    assert_eq!(counter.load(Ordering::SeqCst), 200);

    drop(ctx);
    attached.join().unwrap();
}
