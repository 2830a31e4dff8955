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

//! Multi-stage pipeline with bounded concurrency and per-stage ordering.
//!
//! Lines of client data flow through an ordered sequence of stages. Each
//! stage declares how its executions may interleave:
//! - [`StageOrdering::Concurrent`] — no constraint;
//! - [`StageOrdering::OutOfOrder`] — one line at a time, any order;
//! - [`StageOrdering::InOrder`] — one line at a time, in push order.
//!
//! A maximum-concurrency bound limits how many lines are in flight at
//! once; finishing the last stage frees a slot for a waiting line.
//!
//! If a stage function panics, the line is marked stopped: later stages
//! skip it but the line still advances, so in-order stages never stall.
//! The panic propagates through the task's error path (group handler).

use crate::data::ConsumerBoundedQueue;
use crate::executor::{AnyExecutor, Executor, GlobalExecutor};
use crate::serializer::Serializer;
use crate::task::Task;
use crate::task_group::TaskGroup;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// How executions of one stage may interleave across lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOrdering {
    /// Lines pass this stage strictly in push order, one at a time.
    InOrder,
    /// At most one line in this stage at a time, in any order.
    OutOfOrder,
    /// No constraint.
    Concurrent,
}

type StageFn<T> = Box<dyn Fn(&mut T) + Send + Sync>;

struct Line<T> {
    data: Mutex<T>,
    /// Assigned at push; the order in_order stages enforce.
    order_idx: usize,
    stage_idx: AtomicUsize,
    stopped: AtomicBool,
}

type LinePtr<T> = Arc<Line<T>>;

/// State an in_order stage needs to replay lines in push order.
struct InOrderState<T> {
    /// Lines that arrived early, sorted by order index.
    pending: Vec<(LinePtr<T>, usize)>,
    expected_order_idx: usize,
}

struct StageData<T> {
    ordering: StageOrdering,
    fun: StageFn<T>,
    /// Serializes this stage for the two ordered modes.
    serializer: Serializer,
    in_order: Mutex<InOrderState<T>>,
}

impl<T> StageData<T> {
    /// Park a line that arrived before its turn, keeping the list sorted.
    fn add_pending(&self, line: LinePtr<T>) {
        let order_idx = line.order_idx;
        let mut state = self.in_order.lock();
        let pos = state
            .pending
            .partition_point(|(_, idx)| *idx < order_idx);
        state.pending.insert(pos, (line, order_idx));
    }
}

struct PipelineInner<T> {
    group: Option<TaskGroup>,
    executor: AnyExecutor,
    stages: Vec<StageData<T>>,
    /// Bounds the number of lines in flight.
    processing_items: ConsumerBoundedQueue<LinePtr<T>>,
    cur_order_idx: AtomicUsize,
}

impl<T: Send + 'static> PipelineInner<T> {
    fn make_task(&self, body: impl FnOnce() + Send + 'static) -> Task {
        match &self.group {
            Some(grp) => Task::with_group(body, grp.clone()),
            None => Task::new(body),
        }
    }

    fn start(self: &Arc<Self>, line: LinePtr<T>) {
        debug_assert_eq!(line.stage_idx.load(Ordering::Acquire), 0);
        if self.processing_items.push_and_try_acquire(line) {
            let admitted = self.processing_items.extract_one();
            self.run(admitted);
        }
    }

    /// Dispatch the line's current stage through the stage's ordering
    /// discipline. Never executes inline.
    fn run(self: &Arc<Self>, line: LinePtr<T>) {
        let stage_idx = line.stage_idx.load(Ordering::Acquire);
        debug_assert!(stage_idx < self.stages.len());
        let stage = &self.stages[stage_idx];

        match stage.ordering {
            StageOrdering::Concurrent => {
                let this = Arc::clone(self);
                let task = self.make_task(move || this.execute_stage_task(line));
                self.executor.execute(task);
            }
            StageOrdering::OutOfOrder => {
                let this = Arc::clone(self);
                let task = self.make_task(move || this.execute_stage_task(line));
                stage.serializer.execute(task);
            }
            StageOrdering::InOrder => {
                let this = Arc::clone(self);
                let task = self.make_task(move || {
                    let stage = &this.stages[line.stage_idx.load(Ordering::Acquire)];
                    let can_run = {
                        let mut state = stage.in_order.lock();
                        if line.order_idx == state.expected_order_idx {
                            state.expected_order_idx += 1;
                            true
                        } else {
                            false
                        }
                    };
                    if can_run {
                        this.execute_stage_task(line);
                    } else {
                        // Not this line's turn yet; it waits for the
                        // stragglers before it
                        stage.add_pending(line);
                    }
                });
                stage.serializer.execute(task);
            }
        }
    }

    fn execute_stage_task(self: &Arc<Self>, line: LinePtr<T>) {
        let stage_idx = line.stage_idx.load(Ordering::Acquire);
        let stage = &self.stages[stage_idx];

        if !line.stopped.load(Ordering::Acquire) {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                (stage.fun)(&mut line.data.lock());
            }));
            if let Err(payload) = result {
                // Stop the line but keep it moving so in_order stages do
                // not wedge on its index
                line.stopped.store(true, Ordering::Release);
                self.on_task_done(line);
                panic::resume_unwind(payload);
            }
        }
        self.on_task_done(line);
    }

    fn on_task_done(self: &Arc<Self>, line: LinePtr<T>) {
        let stage_idx = line.stage_idx.load(Ordering::Acquire);
        let stage = &self.stages[stage_idx];

        // An in_order stage may now have unblocked the next line
        if stage.ordering == StageOrdering::InOrder {
            let next_line = {
                let mut state = stage.in_order.lock();
                match state.pending.first() {
                    Some((_, idx)) if *idx == state.expected_order_idx => {
                        Some(state.pending.remove(0).0)
                    }
                    _ => None,
                }
            };
            if let Some(next_line) = next_line {
                self.run(next_line);
            }
        }

        let next_stage = line.stage_idx.fetch_add(1, Ordering::AcqRel) + 1;
        if next_stage < self.stages.len() {
            self.run(line);
        } else if self.processing_items.release_and_acquire() {
            // Line finished; a waiting line may enter stage 0
            let admitted = self.processing_items.extract_one();
            self.run(admitted);
        }
    }
}

/// A runnable pipeline over lines of type `T`. Clones share the same
/// pipeline state.
pub struct Pipeline<T> {
    inner: Arc<PipelineInner<T>>,
}

impl<T> Clone for Pipeline<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Pipeline<T> {
    /// Push a new line into the pipeline. Returns immediately; the line is
    /// processed asynchronously, entering stage 0 once a concurrency slot
    /// is free.
    pub fn push(&self, data: T) {
        let line = Arc::new(Line {
            data: Mutex::new(data),
            order_idx: self.inner.cur_order_idx.fetch_add(1, Ordering::AcqRel),
            stage_idx: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        });
        self.inner.start(line);
    }
}

/// Builder assembling a [`Pipeline`] stage by stage.
pub struct PipelineBuilder<T> {
    max_concurrency: usize,
    group: Option<TaskGroup>,
    executor: Option<AnyExecutor>,
    stages: Vec<(StageOrdering, StageFn<T>)>,
}

impl<T: Send + 'static> PipelineBuilder<T> {
    /// A pipeline admitting at most `max_concurrency` lines in flight.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            group: None,
            executor: None,
            stages: Vec::new(),
        }
    }

    /// Group for all the tasks the pipeline creates.
    pub fn group(mut self, group: TaskGroup) -> Self {
        self.group = Some(group);
        self
    }

    /// Executor for stage tasks; defaults to the global executor.
    pub fn executor(mut self, executor: AnyExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Append a stage with the given ordering discipline.
    pub fn add_stage<F>(mut self, ordering: StageOrdering, fun: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.stages.push((ordering, Box::new(fun)));
        self
    }

    pub fn build(self) -> Pipeline<T> {
        let executor = self
            .executor
            .unwrap_or_else(|| AnyExecutor::new(GlobalExecutor::new()));
        let stages = self
            .stages
            .into_iter()
            .map(|(ordering, fun)| StageData {
                ordering,
                fun,
                serializer: Serializer::with_executors(Some(executor.clone()), None),
                in_order: Mutex::new(InOrderState {
                    pending: Vec::new(),
                    expected_order_idx: 0,
                }),
            })
            .collect();

        Pipeline {
            inner: Arc::new(PipelineInner {
                group: self.group,
                executor,
                stages,
                processing_items: ConsumerBoundedQueue::new(self.max_concurrency),
                cur_order_idx: AtomicUsize::new(0),
            }),
        }
    }
}
