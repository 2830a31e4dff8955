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

//! N-serializer: an executor adapter that lets at most N tasks run
//! concurrently.
//!
//! With N = 1 this degenerates to [`Serializer`] semantics, including
//! submission order.
//!
//! [`Serializer`]: crate::serializer::Serializer

use crate::data::ConsumerBoundedQueue;
use crate::executor::{AnyExecutor, Executor, submit_or_report};
use crate::serializer::resolve_executors;
use crate::task::Task;
use crate::task_group::ExceptionHandler;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use weft_common::TaskError;

struct NSerializerInner {
    base_executor: AnyExecutor,
    cont_executor: AnyExecutor,
    except_handler: Mutex<Option<ExceptionHandler>>,
    processing_items: ConsumerBoundedQueue<Task>,
}

impl NSerializerInner {
    fn enqueue(self: &Arc<Self>, task: Task) {
        if self.processing_items.push_and_try_acquire(task) {
            self.submit_wrapper(&self.base_executor);
        }
    }

    /// Execute one task, then pull in the next waiting one if the freed
    /// slot was immediately re-acquired.
    ///
    /// Only one task per wrapper, even when several wait: it keeps the
    /// individual scheduler tasks small.
    fn execute_one(self: &Arc<Self>) {
        let task = self.processing_items.extract_one();
        task.invoke();

        if self.processing_items.release_and_acquire() {
            self.submit_wrapper(&self.cont_executor);
        }
    }

    fn submit_wrapper(self: &Arc<Self>, executor: &AnyExecutor) {
        let this = Arc::clone(self);
        let wrapper = Task::new(move || this.execute_one());
        let handler = self.except_handler.lock().clone();
        submit_or_report(executor, wrapper, handler.as_ref());
    }
}

/// Executor adapter bounding concurrency to N tasks at a time.
///
/// Clones share the same state; the adapter owns no threads.
#[derive(Clone)]
pub struct NSerializer {
    inner: Arc<NSerializerInner>,
}

impl NSerializer {
    /// N-serializer over the default executors.
    pub fn new(max_concurrency: usize) -> Self {
        Self::with_executors(max_concurrency, None, None)
    }

    /// N-serializer with explicit base and/or continuation executors.
    pub fn with_executors(
        max_concurrency: usize,
        base: Option<AnyExecutor>,
        cont: Option<AnyExecutor>,
    ) -> Self {
        let (base_executor, cont_executor) = resolve_executors(base, cont);
        Self {
            inner: Arc::new(NSerializerInner {
                base_executor,
                cont_executor,
                except_handler: Mutex::new(None),
                processing_items: ConsumerBoundedQueue::new(max_concurrency),
            }),
        }
    }

    /// Handler for failures while submitting follow-up tasks to the
    /// underlying executors.
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(Arc<TaskError>) + Send + Sync + 'static,
    {
        *self.inner.except_handler.lock() = Some(Arc::new(handler));
    }
}

impl Executor for NSerializer {
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
