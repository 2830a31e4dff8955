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

//! Concurrent `for` over an index range.

use crate::algo::partition::{
    self, RangeWork, WorkInterval, compute_granularity, with_wait_group,
};
use crate::context::library;
use crate::task_group::TaskGroup;
use weft_common::{PartitionHints, PartitionMethod};

/// Function reference with its borrow lifetime erased. Sound because the
/// algorithm does not return until its wait group drained, so the borrow
/// outlives every task that dereferences it.
type ForFn = dyn Fn(usize) + Sync;

struct ForWork {
    f: *const ForFn,
}

unsafe impl Send for ForWork {}

impl Clone for ForWork {
    fn clone(&self) -> Self {
        Self { f: self.f }
    }
}

impl RangeWork for ForWork {
    fn exec(&mut self, first: usize, last: usize) {
        let f = unsafe { &*self.f };
        for i in first..last {
            f(i);
        }
    }

    fn join(&mut self, _other: Self) {}
}

/// Apply `f` to every index in `[first, last)`, concurrently.
///
/// The function is called exactly once per index, possibly on different
/// threads, unless the group is cancelled. Does not return until every
/// call completed; other scheduler tasks may be executed while waiting.
/// A panic in `f` resurfaces on the calling thread after the remaining
/// iterations were cancelled and drained.
///
/// The iterations must be independent; racing iterations on shared state
/// is the caller's responsibility.
pub fn conc_for<F>(first: usize, last: usize, f: F)
where
    F: Fn(usize) + Sync,
{
    conc_for_with(first, last, f, None, PartitionHints::default());
}

/// [`conc_for`] with an explicit group and partition hints. Cancelling the
/// group prevents iterations that have not started from running.
pub fn conc_for_with<F>(
    first: usize,
    last: usize,
    f: F,
    group: Option<&TaskGroup>,
    hints: PartitionHints,
) where
    F: Fn(usize) + Sync,
{
    if last <= first {
        return;
    }
    let n = last - first;

    let wide: &(dyn Fn(usize) + Sync) = &f;
    // Erase the borrow; tasks never outlive the wait below
    let work = ForWork {
        f: unsafe { std::mem::transmute::<&(dyn Fn(usize) + Sync), &'static ForFn>(wide) },
    };

    let num_workers = library::current_context_inner().num_workers();
    with_wait_group(
        group,
        move |wait_group| {
            if wait_group.is_cancelled() {
                return;
            }
            match hints.method {
                PartitionMethod::Auto => {
                    let granularity = compute_granularity(n, &hints, num_workers);
                    let root =
                        WorkInterval::<ForWork, false>::root(first, last, work, wait_group, granularity);
                    root.run(first);
                }
                PartitionMethod::Upfront => {
                    let mut work = work;
                    partition::upfront_partition_work(
                        first,
                        last,
                        &mut work,
                        wait_group,
                        hints.tasks_per_worker,
                        false,
                    );
                }
                PartitionMethod::Iterative => {
                    let mut work = work;
                    partition::iterative_partition_work(
                        first,
                        last,
                        &mut work,
                        wait_group,
                        hints.granularity,
                        false,
                    );
                }
                PartitionMethod::Naive => {
                    partition::naive_partition_work(
                        first,
                        last,
                        &work,
                        wait_group,
                        hints.granularity,
                    );
                }
            }
        },
        |_| (),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hit_counts(n: usize) -> Vec<AtomicUsize> {
        (0..n).map(|_| AtomicUsize::new(0)).collect()
    }

    fn assert_each_exactly_once(hits: &[AtomicUsize]) {
        for (i, hit) in hits.iter().enumerate() {
            assert_eq!(hit.load(Ordering::SeqCst), 1, "index {i} hit count");
        }
    }

    #[test]
    fn test_every_index_visited_exactly_once() {
        let hits = hit_counts(100_000);
        conc_for(0, hits.len(), |i| {
            hits[i].fetch_add(1, Ordering::SeqCst);
        });
        assert_each_exactly_once(&hits);
    }

    #[test]
    fn test_every_method_visits_exactly_once() {
        for method in [
            PartitionMethod::Auto,
            PartitionMethod::Upfront,
            PartitionMethod::Iterative,
            PartitionMethod::Naive,
        ] {
            let hits = hit_counts(2_000);
            conc_for_with(
                0,
                hits.len(),
                |i| {
                    hits[i].fetch_add(1, Ordering::SeqCst);
                },
                None,
                PartitionHints::new().method(method),
            );
            assert_each_exactly_once(&hits);
        }
    }

    #[test]
    fn test_subrange_and_granularity() {
        let hits = hit_counts(1_000);
        conc_for_with(
            100,
            900,
            |i| {
                hits[i].fetch_add(1, Ordering::SeqCst);
            },
            None,
            PartitionHints::new().granularity(64),
        );
        for (i, hit) in hits.iter().enumerate() {
            let expected = usize::from((100..900).contains(&i));
            assert_eq!(hit.load(Ordering::SeqCst), expected);
        }
    }

    #[test]
    fn test_empty_range_does_nothing() {
        let calls = AtomicUsize::new(0);
        conc_for(10, 10, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        conc_for(10, 5, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_element_range() {
        let calls = AtomicUsize::new(0);
        conc_for(41, 42, |i| {
            assert_eq!(i, 41);
            calls.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_group_skips_all_iterations() {
        let grp = TaskGroup::new();
        grp.cancel();
        let calls = AtomicUsize::new(0);
        conc_for_with(
            0,
            1_000,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            },
            Some(&grp),
            PartitionHints::default(),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panic_in_iteration_propagates() {
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&completed);
        let result = panic::catch_unwind(move || {
            conc_for(0, 10_000, |i| {
                if i == 57 {
                    panic!("iteration failed");
                }
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });
        assert!(result.is_err());
    }
}
