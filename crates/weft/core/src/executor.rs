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

//! The executor contract and the scheduler's executor views.
//!
//! An executor is a small, copyable, equality-comparable handle that takes
//! a [`Task`] and arranges for it to run. Concrete executors implement
//! [`Executor`]; [`AnyExecutor`] erases them behind a shared vtable so
//! adapters can store any of them uniformly.

use crate::context::exec_context::{ContextInner, ExecContext};
use crate::context::library;
use crate::task::Task;
use crate::task_group::ExceptionHandler;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use weft_common::{PanicPayload, TaskError, TaskPriority};

/// Something that can execute tasks.
pub trait Executor: Send + Sync + 'static {
    /// Arrange for `task` to run.
    fn execute(&self, task: Task);

    /// Self as `Any`, for equality across the type-erased handle.
    fn as_any(&self) -> &dyn Any;

    /// Equality against another (possibly differently typed) executor.
    fn eq_executor(&self, other: &dyn Any) -> bool;
}

/// Type-erased, cloneable executor handle.
#[derive(Clone)]
pub struct AnyExecutor(Arc<dyn Executor>);

impl AnyExecutor {
    pub fn new<E: Executor>(executor: E) -> Self {
        Self(Arc::new(executor))
    }

    pub fn execute(&self, task: Task) {
        self.0.execute(task);
    }

    /// Execute a bare callable, wrapped in a group-less task.
    pub fn execute_fn<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute(Task::new(f));
    }
}

impl<E: Executor> From<E> for AnyExecutor {
    fn from(executor: E) -> Self {
        Self::new(executor)
    }
}

impl PartialEq for AnyExecutor {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_executor(other.0.as_any())
    }
}

impl Eq for AnyExecutor {}

impl std::fmt::Debug for AnyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyExecutor").finish_non_exhaustive()
    }
}

/// Deliver the cancelled error to a task that will never run.
fn deliver_cancelled(mut task: Task) {
    if let Some(cont) = task.take_continuation() {
        cont(Some(Arc::new(TaskError::Cancelled)));
    }
}

/// Executor view over the current context's global priority queues.
///
/// Tasks are enqueued into the band for the configured priority and picked
/// up fairly across workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GlobalExecutor {
    priority: TaskPriority,
}

impl GlobalExecutor {
    pub fn new() -> Self {
        Self {
            priority: TaskPriority::Normal,
        }
    }

    pub fn with_priority(priority: TaskPriority) -> Self {
        Self { priority }
    }
}

impl Default for GlobalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for GlobalExecutor {
    fn execute(&self, task: Task) {
        library::current_context_inner().enqueue(task, self.priority);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_executor(&self, other: &dyn Any) -> bool {
        other
            .downcast_ref::<Self>()
            .map(|other| other.priority == self.priority)
            .unwrap_or(false)
    }
}

/// Executor view that spawns tasks onto the calling worker's local stack,
/// preferring locality over fairness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpawnExecutor;

impl Executor for SpawnExecutor {
    fn execute(&self, task: Task) {
        let ctx = library::current_context_inner();
        ctx.spawn(task, true);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_executor(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<Self>().is_some()
    }
}

/// Like [`SpawnExecutor`] but without waking other workers; meant for
/// continuations the current worker will pick up itself as its next task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpawnContinuationExecutor;

impl Executor for SpawnContinuationExecutor {
    fn execute(&self, task: Task) {
        let ctx = library::current_context_inner();
        ctx.spawn(task, false);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_executor(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<Self>().is_some()
    }
}

/// Executor that runs the task inline on the calling thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task.invoke();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_executor(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<Self>().is_some()
    }
}

/// Executor bound to one specific [`ExecContext`] rather than the
/// process-wide current one. If the context has shut down, submitted tasks
/// are cancelled through their continuation.
#[derive(Clone)]
pub struct ContextExecutor {
    ctx: Weak<ContextInner>,
    priority: TaskPriority,
}

impl Executor for ContextExecutor {
    fn execute(&self, task: Task) {
        match self.ctx.upgrade() {
            Some(ctx) => ctx.enqueue(task, self.priority),
            None => deliver_cancelled(task),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_executor(&self, other: &dyn Any) -> bool {
        other
            .downcast_ref::<Self>()
            .map(|other| Weak::ptr_eq(&self.ctx, &other.ctx) && self.priority == other.priority)
            .unwrap_or(false)
    }
}

impl ExecContext {
    /// An executor handle bound to this context's global queues.
    pub fn executor(&self, priority: TaskPriority) -> AnyExecutor {
        AnyExecutor::new(ContextExecutor {
            ctx: Arc::downgrade(self.inner()),
            priority,
        })
    }
}

/// Submit `task` through `executor`, routing a panicking downstream
/// executor to `handler` instead of unwinding into the caller. This is the
/// submission path adapters (serializers, graphs, pipelines) use for
/// tasks they generate themselves.
pub(crate) fn submit_or_report(
    executor: &AnyExecutor,
    task: Task,
    handler: Option<&ExceptionHandler>,
) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(task)));
    if let Err(payload) = result {
        if let Some(handler) = handler {
            handler(Arc::new(TaskError::Panicked(PanicPayload::new(payload))));
        }
    }
}
