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

use crate::task::Task;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicIsize, Ordering};
use weft_common::TaskPriority;
use weft_common::priority::NUM_PRIORITIES;

/// The global task queues, one FIFO band per priority.
///
/// Each band is guarded by its own mutex; the shared counter gives workers
/// a cheap emptiness check before committing to sleep. The counter is
/// weakly consistent with the band contents: readers may observe a stale
/// value.
pub struct GlobalTaskQueues {
    bands: [Mutex<VecDeque<Task>>; NUM_PRIORITIES],
    /// Signed: a pop may transiently observe the push before its counter
    /// increment and drive the value to -1.
    count: AtomicIsize,
}

impl GlobalTaskQueues {
    pub fn new() -> Self {
        Self {
            bands: std::array::from_fn(|_| Mutex::new(VecDeque::new())),
            count: AtomicIsize::new(0),
        }
    }

    /// Push a task into the band for `priority`.
    pub fn push(&self, task: Task, priority: TaskPriority) {
        self.bands[priority.queue_index()].lock().push_back(task);
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Pop the first available task, scanning bands highest priority first.
    pub fn try_pop(&self) -> Option<Task> {
        if self.count.load(Ordering::Acquire) == 0 {
            return None;
        }
        for band in &self.bands {
            if let Some(task) = band.lock().pop_front() {
                self.count.fetch_sub(1, Ordering::Release);
                return Some(task);
            }
        }
        None
    }

    /// Approximate number of queued tasks across all bands.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GlobalTaskQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    #[test]
    fn test_pop_scans_highest_priority_first() {
        let queues = GlobalTaskQueues::new();
        let log = Arc::new(PlMutex::new(Vec::new()));

        for (prio, name) in [
            (TaskPriority::Low, "low"),
            (TaskPriority::Critical, "critical"),
            (TaskPriority::Normal, "normal"),
            (TaskPriority::Background, "background"),
            (TaskPriority::High, "high"),
        ] {
            let log = Arc::clone(&log);
            queues.push(Task::new(move || log.lock().push(name)), prio);
        }

        while let Some(task) = queues.try_pop() {
            task.invoke();
        }
        assert_eq!(
            *log.lock(),
            vec!["critical", "high", "normal", "low", "background"]
        );
    }

    #[test]
    fn test_fifo_within_band() {
        let queues = GlobalTaskQueues::new();
        let log = Arc::new(PlMutex::new(Vec::new()));
        for i in 0..5 {
            let log = Arc::clone(&log);
            queues.push(Task::new(move || log.lock().push(i)), TaskPriority::Normal);
        }
        while let Some(task) = queues.try_pop() {
            task.invoke();
        }
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_counter_tracks_pushes_and_pops() {
        let queues = GlobalTaskQueues::new();
        assert!(queues.is_empty());
        queues.push(Task::new(|| {}), TaskPriority::High);
        queues.push(Task::new(|| {}), TaskPriority::Low);
        assert_eq!(queues.len(), 2);
        queues.try_pop().unwrap();
        assert_eq!(queues.len(), 1);
        queues.try_pop().unwrap();
        assert!(queues.try_pop().is_none());
        assert!(queues.is_empty());
    }
}
