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

//! The task: the core unit of schedulable work.

use crate::task_group::{GroupRegistration, TaskGroup};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use weft_common::{PanicPayload, TaskError};

/// Continuation invoked exactly once per executed task: `None` on success,
/// `Some(Cancelled)` when the task was skipped, `Some(Panicked)` when the
/// body panicked.
pub type ContinuationFn = Box<dyn FnOnce(Option<Arc<TaskError>>) + Send + 'static>;

/// An independent unit of work.
///
/// A task bundles a nullary body with an optional [`TaskGroup`] and an
/// optional continuation. Tasks are move-only and single-shot: the library
/// moves them through queues and consumes them on execution.
///
/// Creating a task inside a group makes the group *active*; the group
/// returns to inactive when all its task values have been consumed or
/// discarded. Constraints between tasks (ordering, mutual exclusion) are
/// not expressed here; they are layered on top by serializers, graphs and
/// pipelines, which do so by wrapping the continuation.
pub struct Task {
    body: Box<dyn FnOnce() + Send + 'static>,
    registration: GroupRegistration,
    continuation: Option<ContinuationFn>,
}

impl Task {
    /// Task from a plain body, belonging to no group.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            body: Box::new(body),
            registration: GroupRegistration::new(None),
            continuation: None,
        }
    }

    /// Task registered with `group`. The group becomes active until this
    /// task value is consumed.
    pub fn with_group<F>(body: F, group: TaskGroup) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            body: Box::new(body),
            registration: GroupRegistration::new(Some(group)),
            continuation: None,
        }
    }

    /// Task with a group and a continuation. The continuation is called no
    /// matter how the task ends: success, panic, or cancellation.
    pub fn with_continuation<F, C>(body: F, group: Option<TaskGroup>, continuation: C) -> Self
    where
        F: FnOnce() + Send + 'static,
        C: FnOnce(Option<Arc<TaskError>>) + Send + 'static,
    {
        Self {
            body: Box::new(body),
            registration: GroupRegistration::new(group),
            continuation: Some(Box::new(continuation)),
        }
    }

    /// The group this task belongs to, if any.
    pub fn group(&self) -> Option<&TaskGroup> {
        self.registration.group()
    }

    /// Take the current continuation, leaving none.
    ///
    /// An adapter exchanging the continuation must ensure the old one is
    /// still called; dropping it silently breaks the structures waiting on
    /// it.
    pub fn take_continuation(&mut self) -> Option<ContinuationFn> {
        self.continuation.take()
    }

    /// Set the continuation for this task.
    pub fn set_continuation<C>(&mut self, continuation: C)
    where
        C: FnOnce(Option<Arc<TaskError>>) + Send + 'static,
    {
        self.continuation = Some(Box::new(continuation));
    }

    /// True if this task's group (or an ancestor) is cancelled; such a task
    /// will be skipped when invoked.
    pub fn is_cancelled(&self) -> bool {
        self.registration
            .group()
            .map(TaskGroup::is_cancelled)
            .unwrap_or(false)
    }

    /// Execute the task.
    ///
    /// If the group chain is cancelled the body is skipped and the
    /// continuation receives [`TaskError::Cancelled`]. Otherwise the body
    /// runs with the thread-local current group published; a panic is
    /// captured, routed to the group's handler and to the continuation.
    /// Never unwinds into the caller.
    ///
    /// The group registration is released only after the continuation has
    /// run, so group activity covers continuation effects.
    pub fn invoke(self) {
        let Task {
            body,
            registration,
            mut continuation,
        } = self;
        let cont = continuation.take();
        let group = registration.group().cloned();

        if let Some(grp) = &group {
            if grp.is_cancelled() {
                if let Some(cont) = cont {
                    cont(Some(Arc::new(TaskError::Cancelled)));
                }
                return;
            }
        }

        let prev = TaskGroup::set_current(group.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(body));
        TaskGroup::set_current(prev);

        match result {
            Ok(()) => {
                if let Some(cont) = cont {
                    cont(None);
                }
            }
            Err(payload) => {
                let err = Arc::new(TaskError::Panicked(PanicPayload::new(payload)));
                if let Some(grp) = &group {
                    grp.handle_exception(Arc::clone(&err));
                }
                if let Some(cont) = cont {
                    cont(Some(err));
                }
            }
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("has_group", &self.registration.group().is_some())
            .field("has_continuation", &self.continuation.is_some())
            .finish()
    }
}
