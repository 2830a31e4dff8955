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

//! Serializer: an executor adapter that runs tasks one at a time, in
//! submission order, without blocking any thread.
//!
//! Tasks are parked in a FIFO. The first submission dispatches a wrapper
//! task through the *base* executor; when a task completes, its (wrapped)
//! continuation dispatches the next wrapper through the *continuation*
//! executor. At most one wrapped task is in flight at any moment.

use crate::executor::{
    AnyExecutor, Executor, GlobalExecutor, SpawnContinuationExecutor, submit_or_report,
};
use crate::task::Task;
use crate::task_group::ExceptionHandler;
use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use weft_common::TaskError;

pub(crate) struct SerializerInner {
    base_executor: AnyExecutor,
    cont_executor: AnyExecutor,
    except_handler: Mutex<Option<ExceptionHandler>>,
    waiting_tasks: Mutex<VecDeque<Task>>,
    count: AtomicUsize,
}

/// Resolve the base/continuation executor defaults shared by the
/// serializer family: base falls back to the global executor; the
/// continuation executor falls back to the base if one was given,
/// otherwise to the no-wake spawn executor.
pub(crate) fn resolve_executors(
    base: Option<AnyExecutor>,
    cont: Option<AnyExecutor>,
) -> (AnyExecutor, AnyExecutor) {
    let resolved_cont = cont.unwrap_or_else(|| match &base {
        Some(base) => base.clone(),
        None => AnyExecutor::new(SpawnContinuationExecutor),
    });
    let resolved_base = base.unwrap_or_else(|| AnyExecutor::new(GlobalExecutor::new()));
    (resolved_base, resolved_cont)
}

/// Spin-pop a task that a matching count update guarantees is (about to
/// be) present.
pub(crate) fn pop_present_task(queue: &Mutex<VecDeque<Task>>) -> Task {
    let backoff = Backoff::new();
    loop {
        if let Some(task) = queue.lock().pop_front() {
            return task;
        }
        backoff.snooze();
    }
}

impl SerializerInner {
    /// Add a task; dispatch the first wrapper if the serializer was idle.
    fn enqueue(self: &Arc<Self>, mut task: Task) {
        self.replace_continuation(&mut task);
        self.waiting_tasks.lock().push_back(task);

        if self.count.fetch_add(1, Ordering::AcqRel) == 0 {
            self.submit_wrapper(&self.base_executor);
        }
    }

    /// Run one parked task. Called from inside a wrapper task.
    fn execute_one(self: &Arc<Self>) {
        let task = pop_present_task(&self.waiting_tasks);
        task.invoke();
    }

    /// Continuation hook: move on to the next parked task, if any.
    fn on_done(self: &Arc<Self>) {
        if self.count.fetch_sub(1, Ordering::AcqRel) > 1 {
            self.submit_wrapper(&self.cont_executor);
        }
    }

    /// Wrap the task's continuation so completion advances the chain while
    /// the client's continuation is preserved.
    fn replace_continuation(self: &Arc<Self>, task: &mut Task) {
        let inner_cont = task.take_continuation();
        let this = Arc::clone(self);
        task.set_continuation(move |err| {
            if let Some(inner_cont) = inner_cont {
                inner_cont(err);
            }
            this.on_done();
        });
    }

    fn submit_wrapper(self: &Arc<Self>, executor: &AnyExecutor) {
        let body_owner = Arc::clone(self);
        let cont_owner = Arc::clone(self);
        let wrapper = Task::with_continuation(
            move || body_owner.execute_one(),
            None,
            move |err: Option<Arc<TaskError>>| {
                // If the wrapper itself was discarded (e.g. its executor
                // shut down), run the parked task here; its wrapped
                // continuation advances the chain and observes the task's
                // own cancellation state
                if err.map(|e| e.is_cancelled()).unwrap_or(false) {
                    cont_owner.execute_one();
                }
            },
        );
        let handler = self.except_handler.lock().clone();
        submit_or_report(executor, wrapper, handler.as_ref());
    }
}

/// Executor adapter enforcing mutual exclusion and submission order.
///
/// Clones share the same serializer state. The serializer owns no threads;
/// it re-submits wrapped tasks to its underlying executors.
#[derive(Clone)]
pub struct Serializer {
    inner: Arc<SerializerInner>,
}

impl Serializer {
    /// Serializer over the default executors (global for the first task,
    /// no-wake spawn for continuations).
    pub fn new() -> Self {
        Self::with_executors(None, None)
    }

    /// Serializer with explicit base and/or continuation executors.
    pub fn with_executors(base: Option<AnyExecutor>, cont: Option<AnyExecutor>) -> Self {
        let (base_executor, cont_executor) = resolve_executors(base, cont);
        Self {
            inner: Arc::new(SerializerInner {
                base_executor,
                cont_executor,
                except_handler: Mutex::new(None),
                waiting_tasks: Mutex::new(VecDeque::new()),
                count: AtomicUsize::new(0),
            }),
        }
    }

    /// Handler for failures while submitting follow-up tasks to the
    /// underlying executors. Task-body panics are not reported here; they
    /// go to the task's own group handler.
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(Arc<TaskError>) + Send + Sync + 'static,
    {
        *self.inner.except_handler.lock() = Some(Arc::new(handler));
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for Serializer {
    fn execute(&self, task: Task) {
        self.inner.enqueue(task);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_executor(&self, other: &dyn Any) -> bool {
        other
            .downcast_ref::<Self>()
            .map(|other| Arc::ptr_eq(&self.inner, &other.inner))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecContext;
    use crate::task_group::TaskGroup;
    use std::sync::atomic::AtomicIsize;
    use weft_common::{ContextOptions, TaskPriority};

    fn test_context() -> ExecContext {
        ExecContext::new(ContextOptions::new().num_workers(4).reserved_slots(2))
    }

    fn context_serializer(ctx: &ExecContext) -> Serializer {
        Serializer::with_executors(Some(ctx.executor(TaskPriority::Normal)), None)
    }

    #[test]
    fn test_tasks_execute_in_submission_order() {
        let ctx = test_context();
        let ser = context_serializer(&ctx);
        let grp = TaskGroup::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let order = Arc::clone(&order);
            ser.execute(Task::with_group(move || order.lock().push(i), grp.clone()));
        }
        ctx.wait(&grp);
        assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_at_most_one_task_runs_at_a_time() {
        let ctx = test_context();
        let ser = context_serializer(&ctx);
        let grp = TaskGroup::new();
        let current = Arc::new(AtomicIsize::new(0));
        let max_seen = Arc::new(AtomicIsize::new(0));

        for _ in 0..50 {
            let current = Arc::clone(&current);
            let max_seen = Arc::clone(&max_seen);
            ser.execute(Task::with_group(
                move || {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    std::thread::yield_now();
                    current.fetch_sub(1, Ordering::SeqCst);
                },
                grp.clone(),
            ));
        }
        ctx.wait(&grp);
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(current.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_task_does_not_stall_the_chain() {
        let ctx = test_context();
        let ser = context_serializer(&ctx);
        let grp = TaskGroup::new();
        let completed = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let completed = Arc::clone(&completed);
            ser.execute(Task::with_group(
                move || {
                    if i == 3 {
                        panic!("task 3 fails");
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ));
        }
        ctx.wait(&grp);
        assert_eq!(completed.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_cancelled_tasks_advance_the_chain() {
        let ctx = test_context();
        let ser = context_serializer(&ctx);
        let run_grp = TaskGroup::new();
        let skip_grp = TaskGroup::new();
        skip_grp.cancel();

        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let ran = Arc::clone(&ran);
            let grp = if i % 2 == 0 { &skip_grp } else { &run_grp };
            ser.execute(Task::with_group(
                move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                },
                grp.clone(),
            ));
        }
        ctx.wait(&run_grp);
        assert_eq!(ran.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_serializer_clones_share_state() {
        let ser = Serializer::new();
        let copy = ser.clone();
        let a: AnyExecutor = ser.into();
        let b: AnyExecutor = copy.into();
        assert_eq!(a, b);
        let c: AnyExecutor = Serializer::new().into();
        assert_ne!(a, c);
    }
}
