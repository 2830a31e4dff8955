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

use std::fmt;
use std::sync::Arc;

/// Callback invoked on every worker thread right after it starts, before it
/// begins pulling tasks. Receives the worker index.
pub type WorkerStartFn = Arc<dyn Fn(usize) + Send + Sync>;

/// Configuration for an execution context
#[derive(Clone)]
pub struct ContextOptions {
    /// Number of primary worker threads; 0 selects the hardware concurrency
    pub num_workers: usize,
    /// Number of reserved slots for externally attached threads
    pub reserved_slots: usize,
    /// Optional per-worker startup callback
    pub worker_start: Option<WorkerStartFn>,
}

impl ContextOptions {
    pub fn new() -> Self {
        Self {
            num_workers: 0,
            reserved_slots: Self::DEFAULT_RESERVED_SLOTS,
            worker_start: None,
        }
    }

    /// Default number of reserved slots for external threads.
    pub const DEFAULT_RESERVED_SLOTS: usize = 10;

    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = n;
        self
    }

    pub fn reserved_slots(mut self, n: usize) -> Self {
        self.reserved_slots = n;
        self
    }

    pub fn worker_start<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.worker_start = Some(Arc::new(f));
        self
    }
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("num_workers", &self.num_workers)
            .field("reserved_slots", &self.reserved_slots)
            .field("worker_start", &self.worker_start.is_some())
            .finish()
    }
}
