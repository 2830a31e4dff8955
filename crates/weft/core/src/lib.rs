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

//! Weft — a work-stealing task scheduler with coordination primitives.
//!
//! The execution core is a fixed pool of worker threads, each with a local
//! task stack (LIFO for the owner, stolen FIFO by others), fed by five
//! priority-banded global queues. On top of it compose:
//!
//! - [`TaskGroup`]: hierarchical cancellation, completion tracking and
//!   panic routing for sets of tasks;
//! - serializers ([`Serializer`], [`NSerializer`], [`RwSerializer`]):
//!   executor adapters enforcing mutual exclusion, bounded concurrency
//!   and reader/writer exclusion;
//! - [`ChainedTask`] graphs with predecessor-count scheduling;
//! - [`Pipeline`]: bounded-concurrency staged processing with per-stage
//!   ordering;
//! - parallel algorithms [`conc_for`] and [`conc_reduce`] built on
//!   splittable-range work stealing.
//!
//! Most entry points target the lazily-created default execution context;
//! construct an [`ExecContext`] explicitly to embed a private pool.

pub mod algo;
pub mod context;
pub mod data;
pub mod executor;
pub mod low_level;
pub mod n_serializer;
pub mod pipeline;
pub mod rw_serializer;
pub mod serializer;
pub mod spawn;
pub mod task;
pub mod task_graph;
pub mod task_group;

pub use algo::{conc_for, conc_for_with, conc_reduce, conc_reduce_with};
pub use context::{ExecContext, WorkerSlotHandle, init, is_initialized, shutdown};
pub use executor::{
    AnyExecutor, Executor, GlobalExecutor, InlineExecutor, SpawnContinuationExecutor,
    SpawnExecutor,
};
pub use n_serializer::NSerializer;
pub use pipeline::{Pipeline, PipelineBuilder, StageOrdering};
pub use rw_serializer::{RwReader, RwSerializer, RwWriter};
pub use serializer::Serializer;
pub use spawn::{spawn, spawn_and_wait, spawn_and_wait_all, spawn_many, spawn_task, spawn_with_group, wait};
pub use task::{ContinuationFn, Task};
pub use task_graph::{ChainedTask, add_dependencies, add_dependency, add_dependents};
pub use task_group::{ExceptionHandler, TaskGroup};

pub use weft_common::{
    AttachError, ContextOptions, InitError, PanicPayload, PartitionHints, PartitionMethod,
    TaskError, TaskPriority,
};
