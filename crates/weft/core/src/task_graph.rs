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

//! Graphs of tasks with predecessor-count-based scheduling.
//!
//! Build [`ChainedTask`] values, wire them with [`add_dependency`] /
//! [`add_dependencies`] / [`add_dependents`], then start a task that has no
//! predecessors. Each completed task decrements its successors'
//! predecessor counts and submits those reaching zero through their own
//! executor.
//!
//! The graph must be acyclic; cycles are not detected and stall execution.
//! Panics and cancellations do not stop successors: the graph continues as
//! if the failed task had nothing to do.

use crate::executor::{AnyExecutor, SpawnExecutor, submit_or_report};
use crate::task::Task;
use crate::task_group::ExceptionHandler;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use weft_common::TaskError;

struct ChainedTaskInner {
    /// The wrapped task; consumed by the first run.
    task: Mutex<Option<Task>>,
    pred_count: AtomicI32,
    successors: Mutex<Vec<ChainedTask>>,
    executor: AnyExecutor,
    except_handler: Mutex<Option<ExceptionHandler>>,
}

impl ChainedTaskInner {
    /// Completion hook: hand over to successors whose last predecessor
    /// just finished. The successor list is consumed.
    fn on_complete(&self) {
        let successors = std::mem::take(&mut *self.successors.lock());
        for next in successors {
            if next.inner.pred_count.fetch_sub(1, Ordering::AcqRel) == 1 {
                let task = next.to_task();
                let handler = next.inner.except_handler.lock().clone();
                submit_or_report(&next.inner.executor, task, handler.as_ref());
            }
        }
    }

    fn run(self: &Arc<Self>) {
        debug_assert_eq!(self.pred_count.load(Ordering::Acquire), 0);
        let Some(mut task) = self.task.lock().take() else {
            return;
        };

        // Completion must fire for success, panic and cancellation alike,
        // so it rides on the continuation
        let inner_cont = task.take_continuation();
        let this = Arc::clone(self);
        task.set_continuation(move |err: Option<Arc<TaskError>>| {
            if let Some(inner_cont) = inner_cont {
                inner_cont(err);
            }
            this.on_complete();
        });

        task.invoke();
    }
}

/// A task that can be chained into a graph with other chained tasks.
///
/// Clones share the same node. The wrapped task stays single-shot: the
/// first run consumes it, later runs are no-ops. Dependency wiring
/// ([`clear_next`], [`add_dependency`]) can be redone between runs of the
/// surrounding graph.
///
/// [`clear_next`]: ChainedTask::clear_next
#[derive(Clone)]
pub struct ChainedTask {
    inner: Arc<ChainedTaskInner>,
}

impl ChainedTask {
    /// Chain a task, submitting successors through the spawn executor.
    pub fn new(task: Task) -> Self {
        Self::with_executor(task, AnyExecutor::new(SpawnExecutor))
    }

    /// Chain a task with an explicit executor for when this node is
    /// scheduled by a predecessor.
    pub fn with_executor(task: Task, executor: AnyExecutor) -> Self {
        Self {
            inner: Arc::new(ChainedTaskInner {
                task: Mutex::new(Some(task)),
                pred_count: AtomicI32::new(0),
                successors: Mutex::new(Vec::new()),
                executor,
                except_handler: Mutex::new(None),
            }),
        }
    }

    /// Handler for failures while submitting this node to its executor.
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(Arc<TaskError>) + Send + Sync + 'static,
    {
        *self.inner.except_handler.lock() = Some(Arc::new(handler));
    }

    /// A plain task running this graph node; use it to start a root node.
    pub fn to_task(&self) -> Task {
        let inner = Arc::clone(&self.inner);
        Task::new(move || inner.run())
    }

    /// Drop all dependencies that go out from this node, keeping the
    /// successors' predecessor counts consistent.
    pub fn clear_next(&self) {
        let successors = std::mem::take(&mut *self.inner.successors.lock());
        for next in &successors {
            next.inner.pred_count.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn same_node(&self, other: &ChainedTask) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<&ChainedTask> for Task {
    fn from(chained: &ChainedTask) -> Self {
        chained.to_task()
    }
}

/// Make `next` run only after `prev` completed.
pub fn add_dependency(prev: &ChainedTask, next: &ChainedTask) {
    debug_assert!(!prev.same_node(next), "a task cannot depend on itself");
    next.inner.pred_count.fetch_add(1, Ordering::AcqRel);
    prev.inner.successors.lock().push(next.clone());
}

/// Make every task in `nexts` run only after `prev` completed.
pub fn add_dependencies(prev: &ChainedTask, nexts: &[ChainedTask]) {
    for next in nexts {
        next.inner.pred_count.fetch_add(1, Ordering::AcqRel);
    }
    prev.inner.successors.lock().extend(nexts.iter().cloned());
}

/// Make `next` run only after every task in `prevs` completed.
pub fn add_dependents(prevs: &[ChainedTask], next: &ChainedTask) {
    next.inner
        .pred_count
        .fetch_add(prevs.len() as i32, Ordering::AcqRel);
    for prev in prevs {
        prev.inner.successors.lock().push(next.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecContext;
    use crate::task_group::TaskGroup;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_common::{ContextOptions, TaskPriority};

    fn test_context() -> ExecContext {
        ExecContext::new(ContextOptions::new().num_workers(4).reserved_slots(2))
    }

    fn node(
        ctx: &ExecContext,
        grp: &TaskGroup,
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> ChainedTask {
        let log = Arc::clone(log);
        ChainedTask::with_executor(
            Task::with_group(move || log.lock().push(name), grp.clone()),
            ctx.executor(TaskPriority::Normal),
        )
    }

    #[test]
    fn test_diamond_graph_ordering() {
        let ctx = test_context();
        let grp = TaskGroup::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = node(&ctx, &grp, &log, "a");
        let b = node(&ctx, &grp, &log, "b");
        let c = node(&ctx, &grp, &log, "c");
        let d = node(&ctx, &grp, &log, "d");
        let e = node(&ctx, &grp, &log, "e");

        add_dependencies(&a, &[b.clone(), c.clone(), d.clone()]);
        add_dependents(&[b, c, d], &e);

        ctx.enqueue(a.to_task(), TaskPriority::Normal);
        ctx.wait(&grp);

        let log = log.lock();
        assert_eq!(log.len(), 5);
        assert_eq!(log[0], "a");
        assert_eq!(log[4], "e");
        let middle: Vec<_> = log[1..4].to_vec();
        for name in ["b", "c", "d"] {
            assert!(middle.contains(&name));
        }
    }

    #[test]
    fn test_many_to_one_runs_once() {
        let ctx = test_context();
        let grp = TaskGroup::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let a = ChainedTask::with_executor(
            Task::with_group(|| {}, grp.clone()),
            ctx.executor(TaskPriority::Normal),
        );
        let b = ChainedTask::with_executor(
            Task::with_group(|| {}, grp.clone()),
            ctx.executor(TaskPriority::Normal),
        );
        let counter = Arc::clone(&runs);
        let joined = ChainedTask::with_executor(
            Task::with_group(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ),
            ctx.executor(TaskPriority::Normal),
        );

        add_dependents(&[a.clone(), b.clone()], &joined);

        ctx.enqueue(a.to_task(), TaskPriority::Normal);
        ctx.enqueue(b.to_task(), TaskPriority::Normal);
        ctx.wait(&grp);

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_predecessor_still_schedules_successors() {
        let ctx = test_context();
        let grp = TaskGroup::new();
        grp.set_exception_handler(|_| {});
        let ran = Arc::new(AtomicUsize::new(0));

        let failing = ChainedTask::with_executor(
            Task::with_group(|| panic!("node fails"), grp.clone()),
            ctx.executor(TaskPriority::Normal),
        );
        let counter = Arc::clone(&ran);
        let next = ChainedTask::with_executor(
            Task::with_group(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ),
            ctx.executor(TaskPriority::Normal),
        );
        add_dependency(&failing, &next);

        ctx.enqueue(failing.to_task(), TaskPriority::Normal);
        ctx.wait(&grp);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clear_next_unwires_successors() {
        let ctx = test_context();
        let grp = TaskGroup::new();
        let ran_b = Arc::new(AtomicUsize::new(0));

        let a = ChainedTask::with_executor(
            Task::with_group(|| {}, grp.clone()),
            ctx.executor(TaskPriority::Normal),
        );
        let counter = Arc::clone(&ran_b);
        let b = ChainedTask::with_executor(
            Task::with_group(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ),
            ctx.executor(TaskPriority::Normal),
        );

        add_dependency(&a, &b);
        a.clear_next();
        assert_eq!(b.inner.pred_count.load(Ordering::SeqCst), 0);

        ctx.enqueue(a.to_task(), TaskPriority::Normal);
        // b is no longer reachable from a; run it independently
        ctx.enqueue(b.to_task(), TaskPriority::Normal);
        ctx.wait(&grp);
        assert_eq!(ran_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_run_is_noop() {
        let ctx = test_context();
        let grp = TaskGroup::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        let a = ChainedTask::with_executor(
            Task::with_group(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ),
            ctx.executor(TaskPriority::Normal),
        );

        ctx.enqueue(a.to_task(), TaskPriority::Normal);
        ctx.wait(&grp);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // The wrapped task was consumed; a second run has nothing to do
        let grp2 = TaskGroup::new();
        let gate = Arc::new(AtomicUsize::new(0));
        let gate_counter = Arc::clone(&gate);
        ctx.enqueue(a.to_task(), TaskPriority::Normal);
        ctx.enqueue(
            Task::with_group(
                move || {
                    gate_counter.fetch_add(1, Ordering::SeqCst);
                },
                grp2.clone(),
            ),
            TaskPriority::Normal,
        );
        ctx.wait(&grp2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
