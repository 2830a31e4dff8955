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

use crate::data::BoundedDeque;
use crate::task::Task;

/// Ring capacity of each worker's local stack before spilling.
const LOCAL_STACK_CAPACITY: usize = 256;

/// The list of tasks owned by one worker.
///
/// To the owning worker this is a stack: the task pushed last is popped
/// first, keeping execution close to the work that created it. Thieves take
/// from the opposite end, grabbing the oldest task — the one furthest from
/// what the owner is currently touching and typically representing the
/// largest remaining chunk of work.
pub struct WorkerTasks {
    tasks: BoundedDeque<Task>,
}

impl WorkerTasks {
    pub fn new() -> Self {
        Self {
            tasks: BoundedDeque::new(LOCAL_STACK_CAPACITY),
        }
    }

    /// Push a task on top of the stack (owner side).
    pub fn push(&self, task: Task) {
        self.tasks.push_front(task);
    }

    /// Pop the most recently pushed task (owner side, LIFO).
    pub fn try_pop(&self) -> Option<Task> {
        self.tasks.try_pop_front()
    }

    /// Steal the oldest task (thief side, FIFO).
    pub fn try_steal(&self) -> Option<Task> {
        self.tasks.try_pop_back()
    }
}

impl Default for WorkerTasks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn marker_task(log: &Arc<Mutex<Vec<u32>>>, id: u32) -> Task {
        let log = Arc::clone(log);
        Task::new(move || log.lock().push(id))
    }

    #[test]
    fn test_owner_pops_lifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = WorkerTasks::new();
        for i in 0..3 {
            stack.push(marker_task(&log, i));
        }
        while let Some(task) = stack.try_pop() {
            task.invoke();
        }
        assert_eq!(*log.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn test_thief_steals_fifo() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stack = WorkerTasks::new();
        for i in 0..3 {
            stack.push(marker_task(&log, i));
        }
        while let Some(task) = stack.try_steal() {
            task.invoke();
        }
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }
}
