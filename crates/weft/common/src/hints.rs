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

use serde::{Deserialize, Serialize};

/// The method of dividing the work for concurrent algorithms on ranges.
///
/// A hint for `conc_for` and `conc_reduce` on how to partition the input.
/// The algorithms may choose not to follow the requested method; the
/// default works well in most cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionMethod {
    /// Automatically partition the data, trying to maximize locality.
    ///
    /// Splits the range recursively, keeping the left side inline and
    /// letting it steal forward from unstarted right-side tasks. Works well
    /// when the per-element work is unbalanced.
    Auto,
    /// Partition the data upfront into `workers * tasks_per_worker` chunks.
    ///
    /// Minimizes task management but does not rebalance when workloads are
    /// uneven.
    Upfront,
    /// Partition iteratively, keeping a bounded number of tasks in flight;
    /// each finished task spawns a replacement drawing from the remaining
    /// range.
    Iterative,
    /// One task per element (or per `granularity` elements). Can create
    /// very many tasks on large ranges.
    Naive,
}

impl Default for PartitionMethod {
    fn default() -> Self {
        Self::Auto
    }
}

/// Hints to alter the behavior of the range-partitioning algorithms.
///
/// The algorithms may ignore these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionHints {
    /// Preferred partitioning method
    pub method: PartitionMethod,
    /// Minimum number of iterations to keep together in one task. Useful
    /// when individual iterations are very small and the task-management
    /// overhead would dominate. Does not apply to the upfront method.
    pub granularity: usize,
    /// Number of tasks to aim for per worker; 0 selects the per-method
    /// default.
    pub tasks_per_worker: usize,
}

impl Default for PartitionHints {
    fn default() -> Self {
        Self {
            method: PartitionMethod::Auto,
            granularity: 1,
            tasks_per_worker: 0,
        }
    }
}

impl PartitionHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: PartitionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity.max(1);
        self
    }

    pub fn tasks_per_worker(mut self, tasks_per_worker: usize) -> Self {
        self.tasks_per_worker = tasks_per_worker;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_defaults() {
        let hints = PartitionHints::default();
        assert_eq!(hints.method, PartitionMethod::Auto);
        assert_eq!(hints.granularity, 1);
        assert_eq!(hints.tasks_per_worker, 0);
    }

    #[test]
    fn test_hints_builder_clamps_granularity() {
        let hints = PartitionHints::new()
            .method(PartitionMethod::Naive)
            .granularity(0)
            .tasks_per_worker(8);
        assert_eq!(hints.method, PartitionMethod::Naive);
        assert_eq!(hints.granularity, 1);
        assert_eq!(hints.tasks_per_worker, 8);
    }
}
