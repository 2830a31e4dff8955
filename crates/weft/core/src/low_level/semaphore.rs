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

use parking_lot::{Condvar, Mutex};

/// Binary semaphore used to park and wake individual worker threads.
///
/// A `signal` delivered while no thread is waiting is remembered, so the
/// next `wait` returns immediately; consecutive signals do not accumulate
/// beyond one.
#[derive(Default)]
pub struct BinarySemaphore {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl BinarySemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a signal is delivered, consuming it.
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Deliver a signal, waking one waiter if present.
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_signal_before_wait() {
        let sem = BinarySemaphore::new();
        sem.signal();
        // Must not block
        sem.wait();
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let sem = Arc::new(BinarySemaphore::new());
        let woke = Arc::new(AtomicBool::new(false));

        let handle = {
            let sem = Arc::clone(&sem);
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                sem.wait();
                woke.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(Ordering::SeqCst));
        sem.signal();
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn test_signal_is_binary() {
        let sem = BinarySemaphore::new();
        sem.signal();
        sem.signal();
        sem.wait();
        // A second wait would block: the two signals collapsed into one
        let signaled = *sem.signaled.lock();
        assert!(!signaled);
    }
}
