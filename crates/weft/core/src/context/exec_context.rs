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

//! The execution context: worker threads, task extraction, sleep/wake
//! coordination and external-thread attachment.
//!
//! Extraction order for a worker looking for its next task:
//! 1. Own local stack (LIFO, locality)
//! 2. Global priority bands, highest first
//! 3. Steal from other primary workers (FIFO)
//! 4. Steal from occupied reserved slots
//!
//! A worker that finds nothing spins briefly, then parks on its slot's
//! binary semaphore. Wakeups prefer flipping a spinning (`Waiting`) worker
//! back to `Running` — that worker will observe the new task on its own —
//! and only signal a semaphore when every non-idle worker is already
//! running.

use crate::context::global_queue::GlobalTaskQueues;
use crate::context::worker_tasks::WorkerTasks;
use crate::low_level::BinarySemaphore;
use crate::task::Task;
use crate::task_group::TaskGroup;
use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU8, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};
use weft_common::{AttachError, ContextOptions, TaskPriority};

/// Worker slot states. A slot is in exactly one at any time; a worker
/// blocks on its semaphore only while `Idle`.
const STATE_RUNNING: u8 = 0;
const STATE_WAITING: u8 = 1;
const STATE_IDLE: u8 = 2;

/// Spin iterations before a worker commits to sleeping.
const BEFORE_SLEEP_ITERATIONS: usize = 8;

/// Busy-wait pause bounds, in nanoseconds.
const MIN_WAIT_PAUSE_NS: u64 = 1_000;
const MAX_WAIT_PAUSE_NS: u64 = 10_000_000;

struct WorkerSlot {
    state: AtomicU8,
    /// True while a thread is bound to this slot. Always true for primary
    /// slots; claimed/released for reserved ones.
    occupied: AtomicBool,
    wake: BinarySemaphore,
    local_tasks: WorkerTasks,
}

impl WorkerSlot {
    fn new(initial_state: u8, occupied: bool) -> Self {
        Self {
            state: AtomicU8::new(initial_state),
            occupied: AtomicBool::new(occupied),
            wake: BinarySemaphore::new(),
            local_tasks: WorkerTasks::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum SlotId {
    Primary(usize),
    Reserved(usize),
}

/// Per-thread binding of a worker thread (or temporarily attached external
/// thread) to its context and slot.
struct WorkerBinding {
    ctx: Arc<ContextInner>,
    slot: SlotId,
}

thread_local! {
    static WORKER_TLS: RefCell<Option<WorkerBinding>> = const { RefCell::new(None) };
}

/// Handle returned by [`ExecContext::enter_worker`]; must be passed back to
/// [`ExecContext::exit_worker`] to release the reserved slot. Bound to the
/// claiming thread.
pub struct WorkerSlotHandle {
    slot: SlotId,
    _not_send: PhantomData<*const ()>,
}

pub(crate) struct ContextInner {
    workers: Box<[CachePadded<WorkerSlot>]>,
    reserved: Box<[CachePadded<WorkerSlot>]>,
    /// Number of reserved slots currently claimed by external threads.
    active_reserved: AtomicUsize,
    global: GlobalTaskQueues,
    done: AtomicBool,
    /// Tasks tracked by this context: enqueued or spawned, not yet executed.
    num_tasks: AtomicIsize,
    /// Workers currently processing (not sleeping/spinning empty).
    active_workers: AtomicIsize,
}

impl ContextInner {
    pub(crate) fn num_workers(&self) -> usize {
        self.workers.len()
    }

    fn slot(&self, id: SlotId) -> &WorkerSlot {
        match id {
            SlotId::Primary(i) => &self.workers[i],
            SlotId::Reserved(i) => &self.reserved[i],
        }
    }

    fn on_task_added(&self) {
        self.num_tasks.fetch_add(1, Ordering::AcqRel);
        metrics::increment_counter!("weft_tasks_submitted");
    }

    fn on_task_removed(&self) {
        self.num_tasks.fetch_sub(1, Ordering::AcqRel);
    }

    fn on_worker_active(&self) {
        self.active_workers.fetch_add(1, Ordering::AcqRel);
        metrics::increment_gauge!("weft_active_workers", 1.0);
    }

    fn on_worker_inactive(&self) {
        self.active_workers.fetch_sub(1, Ordering::AcqRel);
        metrics::decrement_gauge!("weft_active_workers", 1.0);
    }

    pub(crate) fn enqueue(&self, task: Task, priority: TaskPriority) {
        self.on_task_added();
        self.global.push(task, priority);
        self.wakeup_workers();
    }

    /// Spawn on the current worker's local stack; falls back to a normal
    /// priority enqueue when the calling thread is not one of our workers.
    pub(crate) fn spawn(self: &Arc<Self>, task: Task, wake_workers: bool) {
        let local = WORKER_TLS.with(|tls| {
            let tls = tls.borrow();
            match tls.as_ref() {
                Some(binding) if Arc::ptr_eq(&binding.ctx, self) => Some(binding.slot),
                _ => None,
            }
        });
        match local {
            Some(slot_id) => {
                self.on_task_added();
                self.slot(slot_id).local_tasks.push(task);
                if wake_workers {
                    self.wakeup_workers();
                }
            }
            None => self.enqueue(task, TaskPriority::Normal),
        }
    }

    fn execute_task(&self, task: Task) {
        task.invoke();
        self.on_task_removed();
    }

    /// Try to find and execute one task from `me`'s perspective.
    fn try_extract_execute_task(&self, me: SlotId) -> bool {
        if let Some(task) = self.slot(me).local_tasks.try_pop() {
            self.execute_task(task);
            return true;
        }

        if let Some(task) = self.global.try_pop() {
            self.execute_task(task);
            return true;
        }

        for (i, other) in self.workers.iter().enumerate() {
            if SlotId::Primary(i) == me {
                continue;
            }
            if let Some(task) = other.local_tasks.try_steal() {
                self.execute_task(task);
                return true;
            }
        }

        if self.active_reserved.load(Ordering::Acquire) > 0 {
            for (i, other) in self.reserved.iter().enumerate() {
                if SlotId::Reserved(i) == me {
                    continue;
                }
                if let Some(task) = other.local_tasks.try_steal() {
                    self.execute_task(task);
                    return true;
                }
            }
        }

        false
    }

    /// Spin a little before sleeping, hoping new work shows up; returns
    /// true when the worker committed to `Idle` and should block.
    fn before_sleep(&self, me: SlotId) -> bool {
        let slot = self.slot(me);
        slot.state.store(STATE_WAITING, Ordering::SeqCst);

        let backoff = Backoff::new();
        for _ in 0..BEFORE_SLEEP_ITERATIONS {
            if self.global.len() > 0 || self.done.load(Ordering::Acquire) {
                return false;
            }
            backoff.snooze();
        }

        // A racing wakeup flips Waiting -> Running and pre-empts the sleep
        slot.state
            .compare_exchange(
                STATE_WAITING,
                STATE_IDLE,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn try_sleep(&self, me: SlotId) {
        let slot = self.slot(me);
        self.on_worker_inactive();
        if self.before_sleep(me) {
            slot.wake.wait();
        }
        self.on_worker_active();
        slot.state.store(STATE_RUNNING, Ordering::SeqCst);
    }

    /// Make sure someone will pick up freshly submitted work.
    fn wakeup_workers(&self) {
        // A spinning worker observes new work by itself; flipping its state
        // is enough and costs no syscall
        let mut num_idle = 0;
        for slot in self.workers.iter() {
            match slot.state.compare_exchange(
                STATE_WAITING,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => {
                    if observed == STATE_IDLE {
                        num_idle += 1;
                    }
                }
            }
        }

        let mut num_reserved_idle = 0;
        for slot in self.reserved.iter() {
            if !slot.occupied.load(Ordering::Acquire) {
                continue;
            }
            match slot.state.compare_exchange(
                STATE_WAITING,
                STATE_RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => {
                    if observed == STATE_IDLE {
                        num_reserved_idle += 1;
                    }
                }
            }
        }

        // Everyone is either running or sound asleep; wake one sleeper
        if num_idle > 0 {
            for slot in self.workers.iter() {
                if slot
                    .state
                    .compare_exchange(
                        STATE_IDLE,
                        STATE_RUNNING,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    slot.wake.signal();
                    return;
                }
            }
        }

        if num_reserved_idle > 0 {
            for slot in self.reserved.iter() {
                if slot.occupied.load(Ordering::Acquire)
                    && slot
                        .state
                        .compare_exchange(
                            STATE_IDLE,
                            STATE_RUNNING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    slot.wake.signal();
                    return;
                }
            }
        }
    }

    /// The run loop for a worker bound to `me`. The TLS binding must
    /// already be published.
    fn worker_loop(&self, me: SlotId) {
        self.on_worker_active();
        loop {
            if self.done.load(Ordering::Acquire) {
                break;
            }
            if !self.try_extract_execute_task(me) {
                self.try_sleep(me);
            }
        }
        self.on_worker_inactive();
    }

    /// Cooperatively wait until `group` has no active tasks, executing
    /// other tasks meanwhile when the calling thread is one of our workers.
    pub(crate) fn busy_wait_on(self: &Arc<Self>, group: &TaskGroup) {
        let my_slot = WORKER_TLS.with(|tls| {
            let tls = tls.borrow();
            match tls.as_ref() {
                Some(binding) if Arc::ptr_eq(&binding.ctx, self) => Some(binding.slot),
                _ => None,
            }
        });

        self.on_worker_active();
        let mut pause_ns = MIN_WAIT_PAUSE_NS;
        loop {
            if !group.is_active() {
                break;
            }

            if let Some(me) = my_slot {
                if self.try_extract_execute_task(me) {
                    pause_ns = MIN_WAIT_PAUSE_NS;
                    continue;
                }
            }

            // Nothing to execute; pause, growing the interval so we do not
            // wake too often
            thread::sleep(Duration::from_nanos(pause_ns));
            pause_ns = (pause_ns * 16 / 10).min(MAX_WAIT_PAUSE_NS);
        }
        self.on_worker_inactive();
    }

    /// Claim a reserved slot for the calling external thread. Returns None
    /// when the thread is already a worker or all slots are taken.
    pub(crate) fn enter_worker(self: &Arc<Self>) -> Option<SlotId> {
        let already_worker = WORKER_TLS.with(|tls| tls.borrow().is_some());
        if already_worker {
            return None;
        }

        if self.active_reserved.fetch_add(1, Ordering::AcqRel) < self.reserved.len() {
            for (i, slot) in self.reserved.iter().enumerate() {
                // A sleeping attached worker parks its slot in Idle too;
                // only unoccupied slots are claimable
                if !slot.occupied.load(Ordering::Acquire)
                    && slot
                        .state
                        .compare_exchange(
                            STATE_IDLE,
                            STATE_RUNNING,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    slot.occupied.store(true, Ordering::Release);
                    let id = SlotId::Reserved(i);
                    WORKER_TLS.with(|tls| {
                        *tls.borrow_mut() = Some(WorkerBinding {
                            ctx: Arc::clone(self),
                            slot: id,
                        });
                    });
                    return Some(id);
                }
            }
        }
        self.active_reserved.fetch_sub(1, Ordering::AcqRel);
        None
    }

    pub(crate) fn exit_worker(&self, id: SlotId) {
        let slot = self.slot(id);
        debug_assert_eq!(slot.state.load(Ordering::Acquire), STATE_RUNNING);
        slot.occupied.store(false, Ordering::Release);
        slot.state.store(STATE_IDLE, Ordering::Release);
        self.active_reserved.fetch_sub(1, Ordering::AcqRel);
        WORKER_TLS.with(|tls| {
            *tls.borrow_mut() = None;
        });
    }

    fn is_active(&self) -> bool {
        self.num_tasks.load(Ordering::Acquire) > 0
            || self.active_workers.load(Ordering::Acquire) > 0
    }
}

/// A pool of worker threads executing tasks.
///
/// Dropping the context shuts the pool down: workers are woken, joined,
/// and any still-queued tasks are discarded (their group registrations
/// unwind, so groups report inactive). External threads attached through
/// [`enter_worker`] are waited out with a spin.
///
/// Most applications use the process-wide default context through the free
/// functions in [`crate::spawn`] and the executor views; explicit contexts
/// are for embedding and tests.
///
/// [`enter_worker`]: ExecContext::enter_worker
pub struct ExecContext {
    inner: Arc<ContextInner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

fn resolve_num_workers(configured: usize) -> usize {
    if configured > 0 {
        configured
    } else {
        num_cpus::get().max(1)
    }
}

impl ExecContext {
    pub fn new(options: ContextOptions) -> Self {
        let num_workers = resolve_num_workers(options.num_workers);
        let reserved_slots = options.reserved_slots;
        debug!(num_workers, reserved_slots, "starting execution context");

        let workers: Vec<CachePadded<WorkerSlot>> = (0..num_workers)
            .map(|_| CachePadded::new(WorkerSlot::new(STATE_RUNNING, true)))
            .collect();
        let reserved: Vec<CachePadded<WorkerSlot>> = (0..reserved_slots)
            .map(|_| CachePadded::new(WorkerSlot::new(STATE_IDLE, false)))
            .collect();

        let inner = Arc::new(ContextInner {
            workers: workers.into_boxed_slice(),
            reserved: reserved.into_boxed_slice(),
            active_reserved: AtomicUsize::new(0),
            global: GlobalTaskQueues::new(),
            done: AtomicBool::new(false),
            num_tasks: AtomicIsize::new(0),
            active_workers: AtomicIsize::new(0),
        });

        let threads = (0..num_workers)
            .map(|index| {
                let inner = Arc::clone(&inner);
                let start_fn = options.worker_start.clone();
                thread::Builder::new()
                    .name(format!("weft-worker-{index}"))
                    .spawn(move || {
                        if let Some(start_fn) = start_fn {
                            start_fn(index);
                        }
                        trace!(worker = index, "worker thread started");
                        let me = SlotId::Primary(index);
                        WORKER_TLS.with(|tls| {
                            *tls.borrow_mut() = Some(WorkerBinding {
                                ctx: Arc::clone(&inner),
                                slot: me,
                            });
                        });
                        inner.worker_loop(me);
                        WORKER_TLS.with(|tls| {
                            *tls.borrow_mut() = None;
                        });
                        trace!(worker = index, "worker thread exiting");
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            inner,
            threads: Mutex::new(threads),
        }
    }

    /// Number of primary worker threads.
    pub fn num_workers(&self) -> usize {
        self.inner.workers.len()
    }

    /// Submit a task to the global queue band for `priority`. Never blocks.
    pub fn enqueue(&self, task: Task, priority: TaskPriority) {
        self.inner.enqueue(task, priority);
    }

    /// Submit a task to the calling worker's local stack (front), falling
    /// back to a normal-priority enqueue from non-worker threads.
    pub fn spawn(&self, task: Task, wake_workers: bool) {
        self.inner.spawn(task, wake_workers);
    }

    /// Cooperatively wait until `group` is inactive, executing other tasks
    /// meanwhile. Attaches the calling thread as a temporary worker when
    /// possible.
    pub fn wait(&self, group: &TaskGroup) {
        let slot = self.inner.enter_worker();
        self.inner.busy_wait_on(group);
        if let Some(slot) = slot {
            self.inner.exit_worker(slot);
        }
    }

    /// Busy-wait on `group` without claiming a worker slot first.
    pub fn busy_wait_on(&self, group: &TaskGroup) {
        self.inner.busy_wait_on(group);
    }

    /// Temporarily join the context from an external thread. Returns a slot
    /// handle on success; None if the thread is already a worker or no
    /// reserved slot is free. Pair with [`exit_worker`].
    ///
    /// [`exit_worker`]: ExecContext::exit_worker
    pub fn enter_worker(&self) -> Option<WorkerSlotHandle> {
        self.inner.enter_worker().map(|slot| WorkerSlotHandle {
            slot,
            _not_send: PhantomData,
        })
    }

    /// Release a slot claimed with [`enter_worker`].
    ///
    /// [`enter_worker`]: ExecContext::enter_worker
    pub fn exit_worker(&self, handle: WorkerSlotHandle) {
        self.inner.exit_worker(handle.slot);
    }

    /// Run the calling thread as a worker until the context shuts down.
    pub fn attach_worker(&self) -> Result<(), AttachError> {
        let already_worker = WORKER_TLS.with(|tls| tls.borrow().is_some());
        if already_worker {
            return Err(AttachError::AlreadyWorker);
        }
        let slot = self
            .inner
            .enter_worker()
            .ok_or(AttachError::NoSlotAvailable)?;
        debug!(?slot, "external thread attached as worker");
        self.inner.worker_loop(slot);
        self.inner.exit_worker(slot);
        Ok(())
    }

    /// True while tasks are tracked or workers are actively processing.
    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Number of tasks currently tracked by the context (enqueued or
    /// spawned, not yet executed). Tasks waiting inside serializers or
    /// local stacks of foreign structures are not counted.
    pub fn num_active_tasks(&self) -> isize {
        self.inner.num_tasks.load(Ordering::Acquire)
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }
}

impl Drop for ExecContext {
    fn drop(&mut self) {
        debug!("shutting down execution context");
        self.inner.done.store(true, Ordering::Release);
        for slot in self.inner.workers.iter() {
            slot.wake.signal();
        }
        for slot in self.inner.reserved.iter() {
            slot.wake.signal();
        }
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
        // Wait for temporarily attached external threads to leave
        let backoff = Backoff::new();
        while self.inner.active_reserved.load(Ordering::Acquire) > 0 {
            backoff.snooze();
        }
    }
}

impl std::fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecContext")
            .field("num_workers", &self.inner.workers.len())
            .field("reserved_slots", &self.inner.reserved.len())
            .field("num_tasks", &self.inner.num_tasks.load(Ordering::Relaxed))
            .finish()
    }
}

/// Access the calling thread's worker binding for `ctx`-independent
/// callers: yields the bound context if the thread is a worker.
pub(crate) fn current_worker_context() -> Option<Arc<ContextInner>> {
    WORKER_TLS.with(|tls| tls.borrow().as_ref().map(|b| Arc::clone(&b.ctx)))
}
