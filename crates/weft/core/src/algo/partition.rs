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

//! Work-partitioning strategies for the parallel range algorithms.
//!
//! The default, auto-partitioning, maximizes locality: split the range
//! roughly in half, spawn a task for the right side, keep the left side on
//! this thread. An atomic start index negotiates the boundary between the
//! two sides: as long as the right-side task has not started, the left side
//! steals forward into it, granularity elements at a time. The right-side
//! task claims exclusivity by swapping the index to a sentinel, then
//! recursively applies the same strategy to whatever remains.
//!
//! For reductions, intervals form a join tree. Sibling intervals are
//! chained so that smaller ranges join before larger ones, then bubble up
//! to the parent; `join_predecessors` counts the releases each interval
//! waits for. The left runner releases its right intervals only after it
//! has stopped touching its own work object, which is what makes the joins
//! race-free.

use crate::context::library;
use crate::spawn::spawn_task;
use crate::task::Task;
use crate::task_group::TaskGroup;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use weft_common::{PartitionHints, TaskError};

/// A unit of range work, mutated by exactly one task at a time.
///
/// Clones represent independent accumulations starting from the current
/// (pre-execution) state; for reductions that state is the identity.
pub(crate) trait RangeWork: Clone + Send + 'static {
    fn exec(&mut self, first: usize, last: usize);
    fn join(&mut self, other: Self);
}

/// Raw shared pointer that may cross into tasks. Only valid while the
/// spawning algorithm blocks on its wait group; every driver waits for the
/// group to drain before its borrowed data leaves scope.
#[derive(Clone, Copy)]
pub(crate) struct SendMutPtr<T>(pub *mut T);

unsafe impl<T> Send for SendMutPtr<T> {}

/// Upper bound on the split depth of one `run` invocation; ranges deeper
/// than this are processed inline.
const MAX_NUM_SPLITS: usize = 32;

/// Sentinel stored in `start_idx` when the right-side task claimed the
/// interval exclusively.
const CLAIMED: i64 = -1;

/// Default tasks-per-worker for the granularity computation.
const AUTO_TASKS_PER_WORKER: usize = 20;
/// Default tasks-per-worker for the upfront strategy.
const UPFRONT_TASKS_PER_WORKER: usize = 2;

/// Effective granularity for a range of `n` elements.
pub(crate) fn compute_granularity(n: usize, hints: &PartitionHints, num_workers: usize) -> usize {
    let tasks_per_worker = if hints.tasks_per_worker > 0 {
        hints.tasks_per_worker
    } else {
        AUTO_TASKS_PER_WORKER
    };
    let auto = n / (num_workers * tasks_per_worker).max(1);
    hints.granularity.max(1).max(auto)
}

pub(crate) struct WorkInterval<W, const NEEDS_JOIN: bool> {
    /// Absolute end of this interval.
    end: usize,
    /// Absolute index where this interval's right-side task picks up;
    /// raised by the left side stealing forward, or swapped to the
    /// sentinel when the right side claims it.
    start_idx: AtomicI64,
    join_predecessors: AtomicI32,
    work: Mutex<Option<W>>,
    granularity: usize,
    group: TaskGroup,
    parent: Mutex<Option<Arc<Self>>>,
    next: Mutex<Option<Arc<Self>>>,
}

impl<W: RangeWork, const NEEDS_JOIN: bool> WorkInterval<W, NEEDS_JOIN> {
    pub(crate) fn root(
        first: usize,
        last: usize,
        work: W,
        group: &TaskGroup,
        granularity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            end: last,
            start_idx: AtomicI64::new(first as i64),
            join_predecessors: AtomicI32::new(1),
            work: Mutex::new(Some(work)),
            granularity: granularity.max(1),
            group: group.clone(),
            parent: Mutex::new(None),
            next: Mutex::new(None),
        })
    }

    /// Take the accumulated work out of the interval; for the root this is
    /// the final result once the wait group drained.
    pub(crate) fn take_work(&self) -> Option<W> {
        self.work.lock().take()
    }

    fn spawn_right(right: Arc<Self>) {
        let group = right.group.clone();
        spawn_task(Task::with_group(move || right.run_as_right(), group), true);
    }

    /// Process `[start_idx, self.end)`, splitting off right-side tasks and
    /// stealing forward into them while they have not started.
    pub(crate) fn run(self: &Arc<Self>, start_idx: usize) {
        let first = start_idx;
        let n = self.end - first;
        let granularity = self.granularity;

        let mut work = self.work.lock().take().expect("interval work present");

        if n <= granularity {
            // Cannot split further; execute inline
            let result = panic::catch_unwind(AssertUnwindSafe(|| work.exec(first, first + n)));
            *self.work.lock() = Some(work);
            if let Err(payload) = result {
                panic::resume_unwind(payload);
            }
            return;
        }

        // Split down, halving each time; rights[0] is the largest interval
        let mut rights: Vec<Arc<Self>> = Vec::new();
        let mut end = n;
        while end > granularity && rights.len() < MAX_NUM_SPLITS {
            let start_right = (end + 1) / 2;
            let right = Arc::new(Self {
                end: first + end,
                start_idx: AtomicI64::new((first + start_right) as i64),
                join_predecessors: AtomicI32::new(2),
                work: Mutex::new(Some(work.clone())),
                granularity,
                group: self.group.clone(),
                parent: Mutex::new(None),
                next: Mutex::new(None),
            });
            rights.push(Arc::clone(&right));
            if !NEEDS_JOIN {
                Self::spawn_right(right);
            }
            end = start_right;
        }
        let max_level = rights.len() - 1;

        if NEEDS_JOIN {
            // Wire the join order before any right task may run: smaller
            // intervals join before larger ones, then into this interval
            self.join_predecessors
                .fetch_add(rights.len() as i32, Ordering::AcqRel);
            for level in 0..max_level {
                *rights[level + 1].next.lock() = Some(Arc::clone(&rights[level]));
                // Releases: own task, the left runner, the smaller sibling
                rights[level].join_predecessors.store(3, Ordering::Relaxed);
            }
            for right in &rights {
                *right.parent.lock() = Some(Arc::clone(self));
                Self::spawn_right(Arc::clone(right));
            }
        }

        // Left-to-right walk; steal forward from unstarted right tasks
        let full_end = self.end;
        let mut level = max_level;
        let mut i = first;
        let mut our_max = first + end;
        let walk = panic::catch_unwind(AssertUnwindSafe(|| {
            loop {
                work.exec(i, our_max);
                i = our_max;
                if our_max == full_end {
                    break;
                }
                let right = &rights[level];
                let lvl_end = right.end;
                let steal_end = (our_max + granularity).min(lvl_end);
                if right
                    .start_idx
                    .compare_exchange(
                        our_max as i64,
                        steal_end as i64,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_err()
                {
                    // The right-side task started; it owns the rest
                    break;
                }
                our_max = steal_end;
                if our_max == lvl_end {
                    level = level.saturating_sub(1);
                }
            }
        }));

        // Releases must come after we stopped touching the work object
        *self.work.lock() = Some(work);
        for right in rights.iter().rev() {
            right.release();
        }

        if let Err(payload) = walk {
            panic::resume_unwind(payload);
        }
    }

    /// Entry point of a spawned right-side task: claim whatever the left
    /// side has not stolen, then process it.
    fn run_as_right(self: &Arc<Self>) {
        let mut cur_start = self.start_idx.load(Ordering::Relaxed);
        while (cur_start as usize) < self.end {
            match self.start_idx.compare_exchange_weak(
                cur_start,
                CLAIMED,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur_start = observed,
            }
        }

        let result = if (cur_start as usize) < self.end {
            panic::catch_unwind(AssertUnwindSafe(|| self.run(cur_start as usize)))
        } else {
            Ok(())
        };
        // Release even when the body panicked, so join bookkeeping stays
        // consistent; the panic continues into the task error path after
        self.release();
        if let Err(payload) = result {
            panic::resume_unwind(payload);
        }
    }

    /// Drop one join predecessor; the last release folds this interval's
    /// result into the parent and unblocks the rest of the join chain.
    fn release(self: &Arc<Self>) {
        if !NEEDS_JOIN {
            return;
        }
        if self.join_predecessors.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let parent = self.parent.lock().take();
        let next = self.next.lock().take();

        let mut thrown = None;
        if let Some(parent) = &parent {
            if let Some(my_work) = self.work.lock().take() {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut parent_work = parent.work.lock();
                    if let Some(parent_work) = parent_work.as_mut() {
                        parent_work.join(my_work);
                    }
                }));
                if let Err(payload) = result {
                    thrown = Some(payload);
                }
            }
        }

        if let Some(parent) = parent {
            parent.release();
        }
        if let Some(next) = next {
            next.release();
        }
        if let Some(payload) = thrown {
            panic::resume_unwind(payload);
        }
    }
}

/// Split `[first, last)` into `workers * tasks_per_worker` chunks upfront,
/// one task per chunk, and wait for them. Joins are linear, in chunk
/// order.
pub(crate) fn upfront_partition_work<W: RangeWork>(
    first: usize,
    last: usize,
    work: &mut W,
    group: &TaskGroup,
    tasks_per_worker: usize,
    needs_join: bool,
) {
    let ctx = library::current_context_inner();
    let n = last - first;
    let tasks_per_worker = if tasks_per_worker > 0 {
        tasks_per_worker
    } else {
        UPFRONT_TASKS_PER_WORKER
    };
    let num_tasks = (ctx.num_workers() * tasks_per_worker).max(1);
    let num_chunks = num_tasks.min(n);

    let mut work_objs: Vec<W> = (0..num_chunks).map(|_| work.clone()).collect();
    for (i, work_obj) in work_objs.iter_mut().enumerate() {
        let lo = first + n * i / num_chunks;
        let hi = first + n * (i + 1) / num_chunks;
        let ptr = SendMutPtr(work_obj as *mut W);
        spawn_task(
            Task::with_group(
                move || {
                    let ptr = ptr;
                    unsafe { (*ptr.0).exec(lo, hi) }
                },
                group.clone(),
            ),
            true,
        );
    }

    // The chunk tasks reference work_objs; they must all finish before
    // this frame unwinds
    ctx.busy_wait_on(group);

    if needs_join {
        for work_obj in work_objs {
            work.join(work_obj);
        }
    }
}

/// Spawner keeping a bounded number of task chains alive; each finished
/// chunk spawns its successor, drawing from the remaining range under a
/// lock.
struct IterativeSpawner {
    next: Mutex<usize>,
    last: usize,
    group: TaskGroup,
}

impl IterativeSpawner {
    fn take_n(&self, count: usize) -> (usize, usize) {
        let mut next = self.next.lock();
        let begin = *next;
        let end = (begin + count).min(self.last);
        *next = end;
        (begin, end)
    }

    fn spawn_chain<W: RangeWork>(self: &Arc<Self>, work: SendMutPtr<W>, count: usize, cont: bool) {
        let (begin, end) = self.take_n(count);
        if begin < end {
            let this = Arc::clone(self);
            let task = Task::with_group(
                move || {
                    unsafe { (*work.0).exec(begin, end) };
                    this.spawn_chain(work, count, true);
                },
                self.group.clone(),
            );
            // Wake workers for the initial chains only; replacements are
            // picked up by the worker that just finished the predecessor
            spawn_task(task, !cont);
        }
    }
}

/// Keep `2 * workers` task chains in flight over `[first, last)`, each
/// chunk spawning its replacement, and wait for them.
pub(crate) fn iterative_partition_work<W: RangeWork>(
    first: usize,
    last: usize,
    work: &mut W,
    group: &TaskGroup,
    granularity: usize,
    needs_join: bool,
) {
    let ctx = library::current_context_inner();
    let num_chains = (ctx.num_workers() * 2).max(1);

    let mut work_objs: Vec<W> = (0..num_chains).map(|_| work.clone()).collect();
    let spawner = Arc::new(IterativeSpawner {
        next: Mutex::new(first),
        last,
        group: group.clone(),
    });
    for work_obj in work_objs.iter_mut() {
        spawner.spawn_chain(SendMutPtr(work_obj as *mut W), granularity.max(1), false);
    }

    ctx.busy_wait_on(group);

    if needs_join {
        for work_obj in work_objs {
            work.join(work_obj);
        }
    }
}

/// One task per `granularity` elements; simple, but can create very many
/// tasks. Not usable for reductions.
pub(crate) fn naive_partition_work<W: RangeWork>(
    first: usize,
    last: usize,
    work: &W,
    group: &TaskGroup,
    granularity: usize,
) {
    let ctx = library::current_context_inner();
    let granularity = granularity.max(1);
    let mut lo = first;
    while lo < last {
        let hi = (lo + granularity).min(last);
        let chunk_work = work.clone();
        spawn_task(
            Task::with_group(
                move || {
                    let mut chunk_work = chunk_work;
                    chunk_work.exec(lo, hi);
                },
                group.clone(),
            ),
            true,
        );
        lo = hi;
    }
    ctx.busy_wait_on(group);
}

/// Shared scaffolding of the parallel algorithms: a private wait group
/// nested under the caller's group, a panic-forwarding handler, a worker
/// slot for the calling thread, and the drain-then-rethrow discipline.
///
/// `run` spawns (and possibly executes) the work; `finish` computes the
/// result after the group has drained and no panic was recorded.
pub(crate) fn with_wait_group<T, R>(
    group: Option<&TaskGroup>,
    run: impl FnOnce(&TaskGroup) -> T,
    finish: impl FnOnce(T) -> R,
) -> R {
    let ctx = library::current_context_inner();
    let slot = ctx.enter_worker();

    let base = match group {
        Some(grp) => Some(grp.clone()),
        None => TaskGroup::current(),
    };
    let wait_group = match &base {
        Some(parent) => TaskGroup::with_parent(parent),
        None => TaskGroup::new(),
    };

    // First captured panic cancels the group so remaining tasks skip; it
    // resurfaces on the calling thread after the drain
    let recorded: Arc<Mutex<Option<Arc<TaskError>>>> = Arc::new(Mutex::new(None));
    {
        let recorded = Arc::clone(&recorded);
        let canceller = wait_group.downgrade();
        wait_group.set_exception_handler(move |err| {
            let mut slot = recorded.lock();
            if slot.is_none() {
                *slot = Some(err);
                canceller.cancel();
            }
        });
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| run(&wait_group)));
    if result.is_err() {
        wait_group.cancel();
    }
    ctx.busy_wait_on(&wait_group);
    if let Some(slot) = slot {
        ctx.exit_worker(slot);
    }

    match result {
        Err(payload) => panic::resume_unwind(payload),
        Ok(value) => {
            let recorded = recorded.lock().take();
            if let Some(err) = recorded {
                match Arc::try_unwrap(err) {
                    Ok(TaskError::Panicked(payload)) => panic::resume_unwind(payload.into_inner()),
                    Ok(other) => panic::panic_any(other.to_string()),
                    Err(shared) => panic::panic_any(shared.to_string()),
                }
            }
            finish(value)
        }
    }
}
