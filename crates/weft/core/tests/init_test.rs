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

//! Library init/shutdown lifecycle. Kept as a single test: the default
//! context is process-wide state and the steps below depend on order.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use weft_core::{ContextOptions, InitError, TaskGroup, spawn_with_group, wait};

#[test]
fn test_init_shutdown_lifecycle() {
    assert!(!weft_core::is_initialized());

    weft_core::init(ContextOptions::new().num_workers(2)).unwrap();
    assert!(weft_core::is_initialized());

    // A second init must be rejected while initialized
    assert_eq!(
        weft_core::init(ContextOptions::new()),
        Err(InitError::AlreadyInitialized)
    );

    // The explicitly initialized context executes work
    let grp = TaskGroup::new();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..50 {
        let counter = Arc::clone(&counter);
        spawn_with_group(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            &grp,
        );
    }
    wait(&grp);
    assert_eq!(counter.load(Ordering::SeqCst), 50);

    weft_core::shutdown();
    assert!(!weft_core::is_initialized());
    // Shutting down again is a no-op
    weft_core::shutdown();

    // The library can be initialized again after a shutdown
    weft_core::init(ContextOptions::new().num_workers(1)).unwrap();
    assert!(weft_core::is_initialized());

    // First use without init would also have created a default lazily;
    // after this shutdown the lazy path is exercised by the spawn below
    weft_core::shutdown();

    let grp = TaskGroup::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    spawn_with_group(
        move || {
            c.fetch_add(1, Ordering::SeqCst);
        },
        &grp,
    );
    wait(&grp);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(weft_core::is_initialized());
}
