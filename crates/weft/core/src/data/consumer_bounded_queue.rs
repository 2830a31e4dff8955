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

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counts of items being tracked, packed into one atomic word.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Counts {
    active: u32,
    total: u32,
}

impl Counts {
    fn unpack(v: u64) -> Self {
        Self {
            active: v as u32,
            total: (v >> 32) as u32,
        }
    }

    fn pack(self) -> u64 {
        self.active as u64 | ((self.total as u64) << 32)
    }
}

/// A queue that admits a bounded number of items into active processing.
///
/// Given a limit on how many items may be processed at once, this keeps
/// track of when an item may become active and when the completion of one
/// item should pull in the next. Used by the N-serializer and the pipeline
/// to bound their concurrency.
///
/// Protocol: every `true` returned from [`push_and_try_acquire`] or
/// [`release_and_acquire`] must be matched with exactly one
/// [`extract_one`] and, after processing, one [`release_and_acquire`].
///
/// [`push_and_try_acquire`]: ConsumerBoundedQueue::push_and_try_acquire
/// [`extract_one`]: ConsumerBoundedQueue::extract_one
/// [`release_and_acquire`]: ConsumerBoundedQueue::release_and_acquire
pub struct ConsumerBoundedQueue<T> {
    max_active: u32,
    waiting: Mutex<VecDeque<T>>,
    combined: AtomicU64,
}

impl<T> ConsumerBoundedQueue<T> {
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active: max_active.max(1) as u32,
            waiting: Mutex::new(VecDeque::new()),
            combined: AtomicU64::new(0),
        }
    }

    /// Push a new item; returns true if the caller acquired an active slot
    /// and should extract and process one item (not necessarily the one
    /// just pushed — extraction is FIFO).
    pub fn push_and_try_acquire(&self, elem: T) -> bool {
        self.waiting.lock().push_back(elem);

        let mut old = Counts::unpack(self.combined.load(Ordering::Relaxed));
        loop {
            let mut desired = old;
            desired.total += 1;
            if desired.active < self.max_active {
                desired.active += 1;
            }
            match self.combined.compare_exchange_weak(
                old.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return desired.active != old.active,
                Err(v) => old = Counts::unpack(v),
            }
        }
    }

    /// Extract the next item to process. Must only be called after an
    /// acquire succeeded; spins briefly in case the matching push has not
    /// finished publishing yet.
    pub fn extract_one(&self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(elem) = self.waiting.lock().pop_front() {
                return elem;
            }
            backoff.snooze();
        }
    }

    /// Signal that an item finished processing; returns true if the caller
    /// acquired the freed slot for a waiting item and should process
    /// another one.
    pub fn release_and_acquire(&self) -> bool {
        let mut old = Counts::unpack(self.combined.load(Ordering::Relaxed));
        loop {
            let mut desired = old;
            desired.total -= 1;
            desired.active = desired.active.min(desired.total);
            match self.combined.compare_exchange_weak(
                old.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                // Unchanged active count means the slot was immediately
                // handed to a waiting item
                Ok(_) => return desired.active == old.active,
                Err(v) => old = Counts::unpack(v),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquires_up_to_limit() {
        let q = ConsumerBoundedQueue::new(2);
        assert!(q.push_and_try_acquire(1));
        assert!(q.push_and_try_acquire(2));
        // Limit reached; further pushes queue up
        assert!(!q.push_and_try_acquire(3));
        assert!(!q.push_and_try_acquire(4));
    }

    #[test]
    fn test_release_hands_slot_to_waiting_item() {
        let q = ConsumerBoundedQueue::new(1);
        assert!(q.push_and_try_acquire(10));
        assert!(!q.push_and_try_acquire(20));

        assert_eq!(q.extract_one(), 10);
        // Finishing 10 immediately re-acquires for 20
        assert!(q.release_and_acquire());
        assert_eq!(q.extract_one(), 20);
        // Nothing left waiting
        assert!(!q.release_and_acquire());
    }

    #[test]
    fn test_extraction_is_fifo() {
        let q = ConsumerBoundedQueue::new(3);
        for i in 0..3 {
            assert!(q.push_and_try_acquire(i));
        }
        assert_eq!(q.extract_one(), 0);
        assert_eq!(q.extract_one(), 1);
        assert_eq!(q.extract_one(), 2);
    }
}
