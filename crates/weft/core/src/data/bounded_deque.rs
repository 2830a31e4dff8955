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

//! Bounded concurrent double-ended queue.
//!
//! A preallocated ring holds the common case; when the ring is full,
//! elements spill into a mutex-guarded deque. Ring operations only touch
//! atomics: a single 32-bit word packs two free-running 16-bit cursors
//! (start/end), and reservation is a CAS that advances one of them.
//!
//! Each slot carries its own state atom so a producer that won its cursor
//! but has not finished moving the value in can be told apart from a
//! consumer that grabbed a slot and has not finished moving the value out.
//! A consumer landing on a slot still in `Constructing` spins until it
//! turns `Valid`; it never reads uninitialized storage.

use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicUsize, Ordering};

/// Slot lifecycle: Free -> Constructing -> Valid -> Destructing -> Free.
const STATE_FREE: u8 = 0;
const STATE_CONSTRUCTING: u8 = 1;
const STATE_VALID: u8 = 2;
const STATE_DESTRUCTING: u8 = 3;

/// Spin until `state` transitions from `from` to `to`. The transition must
/// always eventually start from the `from` state.
fn spin_switch_state(state: &AtomicU8, from: u8, to: u8) {
    let backoff = Backoff::new();
    while state
        .compare_exchange(from, to, Ordering::AcqRel, Ordering::Relaxed)
        .is_err()
    {
        backoff.snooze();
    }
}

struct Slot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_FREE),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// The [start, end) cursor pair packed into one atomic word.
/// Cursors run freely over u16 and are reduced modulo the ring size on
/// access, so wraparound arithmetic stays correct.
#[derive(Clone, Copy, PartialEq, Eq)]
struct FastRange {
    start: u16,
    end: u16,
}

impl FastRange {
    fn unpack(v: u32) -> Self {
        Self {
            start: v as u16,
            end: (v >> 16) as u16,
        }
    }

    fn pack(self) -> u32 {
        self.start as u32 | ((self.end as u32) << 16)
    }

    fn len(self) -> u16 {
        self.end.wrapping_sub(self.start)
    }
}

/// Bounded concurrent deque with a locked spill path.
///
/// Thread-safe for any number of concurrent `push_*` / `try_pop_*` calls.
/// Ordering between elements in the ring and elements in the spill deque is
/// relaxed once the ring has overflowed.
pub struct BoundedDeque<T> {
    size: u16,
    ring: Box<[Slot<T>]>,
    fast_range: AtomicU32,
    spill: Mutex<VecDeque<T>>,
    /// Fast emptiness check for the spill deque, so the common empty-pop
    /// path never takes the lock.
    spill_len: AtomicUsize,
}

unsafe impl<T: Send> Send for BoundedDeque<T> {}
unsafe impl<T: Send> Sync for BoundedDeque<T> {}

impl<T> BoundedDeque<T> {
    /// Create a deque whose ring holds up to `capacity - 3` elements before
    /// spilling. The capacity is rounded up to a power of two so the
    /// free-running 16-bit cursors stay consistent across wraparound.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        assert!(
            (8..=u16::MAX as usize / 2).contains(&capacity),
            "ring capacity out of range"
        );
        let ring: Vec<Slot<T>> = (0..capacity).map(|_| Slot::new()).collect();
        Self {
            size: capacity as u16,
            ring: ring.into_boxed_slice(),
            fast_range: AtomicU32::new(0),
            spill: Mutex::new(VecDeque::new()),
            spill_len: AtomicUsize::new(0),
        }
    }

    /// Maximum cursor distance before reservation fails. The margin keeps a
    /// couple of slots free so in-flight extractions never collide with new
    /// reservations on the same slot.
    fn max_dist(&self) -> u16 {
        self.size - 3
    }

    fn reserve_back(&self) -> Option<u16> {
        let mut old = FastRange::unpack(self.fast_range.load(Ordering::Relaxed));
        loop {
            if old.len() > self.max_dist() {
                return None;
            }
            let desired = FastRange {
                start: old.start,
                end: old.end.wrapping_add(1),
            };
            match self.fast_range.compare_exchange_weak(
                old.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(old.end),
                Err(v) => old = FastRange::unpack(v),
            }
        }
    }

    fn reserve_front(&self) -> Option<u16> {
        let mut old = FastRange::unpack(self.fast_range.load(Ordering::Relaxed));
        loop {
            if old.len() > self.max_dist() {
                return None;
            }
            let desired = FastRange {
                start: old.start.wrapping_sub(1),
                end: old.end,
            };
            match self.fast_range.compare_exchange_weak(
                old.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(desired.start),
                Err(v) => old = FastRange::unpack(v),
            }
        }
    }

    fn consume_front(&self) -> Option<u16> {
        let mut old = FastRange::unpack(self.fast_range.load(Ordering::Relaxed));
        loop {
            if old.start == old.end {
                return None;
            }
            let desired = FastRange {
                start: old.start.wrapping_add(1),
                end: old.end,
            };
            match self.fast_range.compare_exchange_weak(
                old.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(old.start),
                Err(v) => old = FastRange::unpack(v),
            }
        }
    }

    fn consume_back(&self) -> Option<u16> {
        let mut old = FastRange::unpack(self.fast_range.load(Ordering::Relaxed));
        loop {
            if old.start == old.end {
                return None;
            }
            let desired = FastRange {
                start: old.start,
                end: old.end.wrapping_sub(1),
            };
            match self.fast_range.compare_exchange_weak(
                old.pack(),
                desired.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(desired.end),
                Err(v) => old = FastRange::unpack(v),
            }
        }
    }

    /// Construct an element in the already-reserved slot at `pos`.
    fn construct_in_ring(&self, pos: u16, value: T) {
        let slot = &self.ring[(pos % self.size) as usize];
        // The slot may still be draining from a previous occupant; wait for
        // it to become free before moving the value in.
        spin_switch_state(&slot.state, STATE_FREE, STATE_CONSTRUCTING);
        unsafe {
            (*slot.value.get()).write(value);
        }
        slot.state.store(STATE_VALID, Ordering::Release);
    }

    /// Extract the element from the already-consumed slot at `pos`.
    fn extract_from_ring(&self, pos: u16) -> T {
        let slot = &self.ring[(pos % self.size) as usize];
        // The producer may not have finished moving the value in yet.
        spin_switch_state(&slot.state, STATE_VALID, STATE_DESTRUCTING);
        let value = unsafe { (*slot.value.get()).assume_init_read() };
        slot.state.store(STATE_FREE, Ordering::Release);
        value
    }

    pub fn push_back(&self, value: T) {
        match self.reserve_back() {
            Some(pos) => self.construct_in_ring(pos, value),
            None => {
                self.spill.lock().push_back(value);
                self.spill_len.fetch_add(1, Ordering::Release);
            }
        }
    }

    pub fn push_front(&self, value: T) {
        match self.reserve_front() {
            Some(pos) => self.construct_in_ring(pos, value),
            None => {
                self.spill.lock().push_front(value);
                self.spill_len.fetch_add(1, Ordering::Release);
            }
        }
    }

    pub fn try_pop_front(&self) -> Option<T> {
        if let Some(pos) = self.consume_front() {
            return Some(self.extract_from_ring(pos));
        }
        self.try_pop_spill(|spill| spill.pop_front())
    }

    pub fn try_pop_back(&self) -> Option<T> {
        if let Some(pos) = self.consume_back() {
            return Some(self.extract_from_ring(pos));
        }
        self.try_pop_spill(|spill| spill.pop_back())
    }

    fn try_pop_spill(&self, pop: impl FnOnce(&mut VecDeque<T>) -> Option<T>) -> Option<T> {
        if self.spill_len.load(Ordering::Acquire) == 0 {
            return None;
        }
        let mut spill = self.spill.lock();
        let value = pop(&mut spill)?;
        self.spill_len.fetch_sub(1, Ordering::Release);
        Some(value)
    }

    /// Approximate number of stored elements. Racy by nature; usable only
    /// as a heuristic.
    pub fn len(&self) -> usize {
        let range = FastRange::unpack(self.fast_range.load(Ordering::Relaxed));
        range.len() as usize + self.spill_len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all stored elements. Exclusive access makes this safe.
    pub fn clear(&mut self) {
        for slot in self.ring.iter() {
            if slot.state.load(Ordering::Relaxed) == STATE_VALID {
                unsafe {
                    (*slot.value.get()).assume_init_drop();
                }
            }
            slot.state.store(STATE_FREE, Ordering::Relaxed);
        }
        self.fast_range.store(0, Ordering::Release);
        self.spill.lock().clear();
        self.spill_len.store(0, Ordering::Release);
    }
}

impl<T> Drop for BoundedDeque<T> {
    fn drop(&mut self) {
        self.clear();
    }
}
