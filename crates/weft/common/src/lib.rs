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

//! Shared vocabulary types for the Weft task-execution library.
//!
//! This crate carries the plain-data types exchanged between the scheduler
//! core and its clients: task priorities, error kinds, execution-context
//! options and partitioning hints. It holds no machinery of its own.

pub mod config;
pub mod error;
pub mod hints;
pub mod priority;

pub use config::{ContextOptions, WorkerStartFn};
pub use error::{AttachError, InitError, PanicPayload, TaskError};
pub use hints::{PartitionHints, PartitionMethod};
pub use priority::TaskPriority;
