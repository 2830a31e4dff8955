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

//! Reader-writer serializer: reads run concurrently with reads, writes run
//! exclusively, writes are FIFO among themselves.
//!
//! The whole scheduling state lives in one atomic word split into
//! `{num_writes:16, num_active_reads:16, num_queued_reads:32}`:
//! - a read submitted while `num_writes == 0` becomes active immediately;
//! - a read submitted while writes are pending is queued;
//! - a write runs only once `num_active_reads == 0`;
//! - the last finishing read with writes pending dispatches the first
//!   write; the last finishing write promotes all queued reads to active
//!   in a single transaction.
//!
//! The policy slightly favors writers, on the assumption writes are rare.

use crate::executor::{AnyExecutor, Executor, submit_or_report};
use crate::serializer::{pop_present_task, resolve_executors};
use crate::task::Task;
use crate::task_group::ExceptionHandler;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use weft_common::TaskError;

/// Scheduling counters packed into one atomic word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct CountBits {
    num_writes: u16,
    num_active_reads: u16,
    num_queued_reads: u32,
}

impl CountBits {
    fn unpack(v: u64) -> Self {
        Self {
            num_writes: v as u16,
            num_active_reads: (v >> 16) as u16,
            num_queued_reads: (v >> 32) as u32,
        }
    }

    fn pack(self) -> u64 {
        self.num_writes as u64
            | ((self.num_active_reads as u64) << 16)
            | ((self.num_queued_reads as u64) << 32)
    }
}

struct RwSerializerInner {
    base_executor: AnyExecutor,
    cont_executor: AnyExecutor,
    except_handler: Mutex<Option<ExceptionHandler>>,
    read_tasks: Mutex<VecDeque<Task>>,
    write_tasks: Mutex<VecDeque<Task>>,
    combined: AtomicU64,
}

impl RwSerializerInner {
    /// Apply `update` to the packed counters atomically; returns the
    /// (before, after) pair of the successful transition.
    fn update_counts(&self, update: impl Fn(&mut CountBits)) -> (CountBits, CountBits) {
        let mut old = CountBits::unpack(self.combined.load(Ordering::Relaxed));
        loop {
            let mut desired = old;
            update(&mut desired);
            match self.combined.compare_exchange_weak(
                old.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return (old, desired),
                Err(v) => old = CountBits::unpack(v),
            }
        }
    }

    fn enqueue_read(self: &Arc<Self>, task: Task) {
        self.read_tasks.lock().push_back(task);

        // With writes pending the read must defer; otherwise it is active
        let (old, _) = self.update_counts(|c| {
            if c.num_writes > 0 {
                c.num_queued_reads += 1;
            } else {
                c.num_active_reads += 1;
            }
        });

        if old.num_writes == 0 {
            self.submit_read(&self.base_executor);
        }
    }

    fn enqueue_write(self: &Arc<Self>, task: Task) {
        self.write_tasks.lock().push_back(task);

        let (old, _) = self.update_counts(|c| c.num_writes += 1);

        // Start right away only if nothing at all was running
        if old.num_writes == 0 && old.num_active_reads == 0 {
            self.submit_write(&self.base_executor);
        }
    }

    fn execute_read(self: &Arc<Self>) {
        let task = pop_present_task(&self.read_tasks);
        task.invoke();

        let (old, _) = self.update_counts(|c| c.num_active_reads -= 1);

        // Reads never trigger reads (enqueue_read dispatches those); the
        // last read hands over to any pending write
        if old.num_active_reads == 1 && old.num_writes > 0 {
            self.submit_write(&self.cont_executor);
        }
    }

    fn execute_write(self: &Arc<Self>) {
        let task = pop_present_task(&self.write_tasks);
        task.invoke();

        let (old, desired) = self.update_counts(|c| {
            debug_assert_eq!(c.num_active_reads, 0);
            c.num_writes -= 1;
            if c.num_writes == 0 {
                c.num_active_reads = c.num_queued_reads as u16;
                c.num_queued_reads = 0;
            }
        });

        if desired.num_writes > 0 {
            self.submit_write(&self.cont_executor);
        } else if old.num_queued_reads > 0 {
            // All queued reads were promoted in one transaction; dispatch
            // them all
            for _ in 0..old.num_queued_reads {
                self.submit_read(&self.cont_executor);
            }
        }
    }

    fn submit_read(self: &Arc<Self>, executor: &AnyExecutor) {
        let this = Arc::clone(self);
        let wrapper = Task::new(move || this.execute_read());
        let handler = self.except_handler.lock().clone();
        submit_or_report(executor, wrapper, handler.as_ref());
    }

    fn submit_write(self: &Arc<Self>, executor: &AnyExecutor) {
        let this = Arc::clone(self);
        let wrapper = Task::new(move || this.execute_write());
        let handler = self.except_handler.lock().clone();
        submit_or_report(executor, wrapper, handler.as_ref());
    }
}

/// Reader-writer serializer over an underlying executor.
///
/// Obtain executor views with [`reader`] and [`writer`]; tasks submitted
/// through them obey shared/exclusive scheduling.
///
/// [`reader`]: RwSerializer::reader
/// [`writer`]: RwSerializer::writer
#[derive(Clone)]
pub struct RwSerializer {
    inner: Arc<RwSerializerInner>,
}

/// Executor view submitting READ tasks; reads run concurrently with reads.
#[derive(Clone)]
pub struct RwReader {
    inner: Arc<RwSerializerInner>,
}

/// Executor view submitting WRITE tasks; writes run exclusively, FIFO.
#[derive(Clone)]
pub struct RwWriter {
    inner: Arc<RwSerializerInner>,
}

impl RwSerializer {
    pub fn new() -> Self {
        Self::with_executors(None, None)
    }

    pub fn with_executors(base: Option<AnyExecutor>, cont: Option<AnyExecutor>) -> Self {
        let (base_executor, cont_executor) = resolve_executors(base, cont);
        Self {
            inner: Arc::new(RwSerializerInner {
                base_executor,
                cont_executor,
                except_handler: Mutex::new(None),
                read_tasks: Mutex::new(VecDeque::new()),
                write_tasks: Mutex::new(VecDeque::new()),
                combined: AtomicU64::new(0),
            }),
        }
    }

    pub fn reader(&self) -> RwReader {
        RwReader {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn writer(&self) -> RwWriter {
        RwWriter {
            inner: Arc::clone(&self.inner),
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

impl Default for RwSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor for RwReader {
    fn execute(&self, task: Task) {
        self.inner.enqueue_read(task);
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

impl Executor for RwWriter {
    fn execute(&self, task: Task) {
        self.inner.enqueue_write(task);
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
