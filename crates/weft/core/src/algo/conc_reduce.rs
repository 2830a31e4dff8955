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

//! Concurrent reduction over an index range.
//!
//! Equivalent to the left fold `red(... red(op(op(identity, first),
//! first+1) ...)` for an associative `op`/`red` pair with a consistent
//! identity; commutativity is not required — the join tree preserves range
//! order.

use crate::algo::partition::{
    self, RangeWork, WorkInterval, compute_granularity, with_wait_group,
};
use crate::context::library;
use crate::task_group::TaskGroup;
use weft_common::{PartitionHints, PartitionMethod};

type OpFn<V> = dyn Fn(V, usize) -> V + Sync;
type RedFn<V> = dyn Fn(V, V) -> V + Sync;

/// Accumulation state for one chunk. Clones start from the value held at
/// clone time, which is always the identity (clones are made before any
/// execution on the cloned-from object).
struct ReduceWork<V> {
    value: Option<V>,
    op: *const OpFn<V>,
    red: *const RedFn<V>,
}

unsafe impl<V: Send> Send for ReduceWork<V> {}

impl<V: Clone> Clone for ReduceWork<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            op: self.op,
            red: self.red,
        }
    }
}

impl<V: Clone + Send + 'static> RangeWork for ReduceWork<V> {
    fn exec(&mut self, first: usize, last: usize) {
        let op = unsafe { &*self.op };
        let mut value = self.value.take().expect("reduce value present");
        for i in first..last {
            value = op(value, i);
        }
        self.value = Some(value);
    }

    fn join(&mut self, other: Self) {
        let red = unsafe { &*self.red };
        if let (Some(mine), Some(theirs)) = (self.value.take(), other.value) {
            self.value = Some(red(mine, theirs));
        }
    }
}

/// Reduce `[first, last)`: fold every index into `identity` with `op`,
/// combining partial results with `reduction`.
///
/// `op` and `reduction` must be associative and consistent with the
/// identity; they need not be commutative. Does not return until the
/// reduction completed; panics resurface on the calling thread.
pub fn conc_reduce<V, Op, Red>(first: usize, last: usize, identity: V, op: Op, reduction: Red) -> V
where
    V: Clone + Send + 'static,
    Op: Fn(V, usize) -> V + Sync,
    Red: Fn(V, V) -> V + Sync,
{
    conc_reduce_with(
        first,
        last,
        identity,
        op,
        reduction,
        None,
        PartitionHints::default(),
    )
}

/// [`conc_reduce`] with an explicit group and partition hints. With a
/// cancelled group the identity is returned untouched.
pub fn conc_reduce_with<V, Op, Red>(
    first: usize,
    last: usize,
    identity: V,
    op: Op,
    reduction: Red,
    group: Option<&TaskGroup>,
    hints: PartitionHints,
) -> V
where
    V: Clone + Send + 'static,
    Op: Fn(V, usize) -> V + Sync,
    Red: Fn(V, V) -> V + Sync,
{
    if last <= first {
        return identity;
    }
    let n = last - first;

    let wide_op: &(dyn Fn(V, usize) -> V + Sync) = &op;
    let wide_red: &(dyn Fn(V, V) -> V + Sync) = &reduction;
    // Erase the borrows; tasks never outlive the wait inside
    let work = ReduceWork {
        value: Some(identity),
        op: unsafe {
            std::mem::transmute::<&(dyn Fn(V, usize) -> V + Sync), &'static OpFn<V>>(wide_op)
        },
        red: unsafe {
            std::mem::transmute::<&(dyn Fn(V, V) -> V + Sync), &'static RedFn<V>>(wide_red)
        },
    };

    enum Outcome<V> {
        Value(V),
        Root(std::sync::Arc<WorkInterval<ReduceWork<V>, true>>),
    }

    let num_workers = library::current_context_inner().num_workers();
    with_wait_group(
        group,
        move |wait_group| {
            if wait_group.is_cancelled() {
                let mut work = work;
                return Outcome::Value(work.value.take().expect("identity present"));
            }
            match hints.method {
                PartitionMethod::Upfront => {
                    let mut work = work;
                    partition::upfront_partition_work(
                        first,
                        last,
                        &mut work,
                        wait_group,
                        hints.tasks_per_worker,
                        true,
                    );
                    Outcome::Value(work.value.take().expect("reduce result present"))
                }
                // Naive cannot express a reduction; fall back to iterative
                PartitionMethod::Iterative | PartitionMethod::Naive => {
                    let mut work = work;
                    partition::iterative_partition_work(
                        first,
                        last,
                        &mut work,
                        wait_group,
                        hints.granularity,
                        true,
                    );
                    Outcome::Value(work.value.take().expect("reduce result present"))
                }
                PartitionMethod::Auto => {
                    let granularity = compute_granularity(n, &hints, num_workers);
                    let root = WorkInterval::<ReduceWork<V>, true>::root(
                        first, last, work, wait_group, granularity,
                    );
                    root.run(first);
                    // The join tree completes while the wait group drains;
                    // the result is extracted afterwards
                    Outcome::Root(root)
                }
            }
        },
        |outcome| match outcome {
            Outcome::Value(value) => value,
            Outcome::Root(root) => root
                .take_work()
                .and_then(|work| work.value)
                .expect("reduce result present after drain"),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_matches_sequential_fold() {
        let n = 10_000usize;
        let expected: u64 = (0..n as u64).sum();
        for method in [
            PartitionMethod::Auto,
            PartitionMethod::Upfront,
            PartitionMethod::Iterative,
        ] {
            let sum = conc_reduce_with(
                0,
                n,
                0u64,
                |acc, i| acc + i as u64,
                |a, b| a + b,
                None,
                PartitionHints::new().method(method),
            );
            assert_eq!(sum, expected, "method {method:?}");
        }
    }

    #[test]
    fn test_non_commutative_reduction_preserves_order() {
        let n = 400usize;
        let expected: String = (0..n).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        // Auto joins along the split tree, upfront joins chunks in range
        // order; both preserve the fold order for non-commutative ops.
        // (Iterative interleaves chunks across chains and needs
        // commutativity.)
        for method in [PartitionMethod::Auto, PartitionMethod::Upfront] {
            let result = conc_reduce_with(
                0,
                n,
                String::new(),
                |mut acc: String, i| {
                    acc.push(char::from(b'a' + (i % 26) as u8));
                    acc
                },
                |mut a, b| {
                    a.push_str(&b);
                    a
                },
                None,
                PartitionHints::new().method(method).granularity(7),
            );
            assert_eq!(result, expected, "method {method:?}");
        }
    }

    #[test]
    fn test_empty_range_yields_identity() {
        let result = conc_reduce(5, 5, 42i64, |acc, i| acc + i as i64, |a, b| a + b);
        assert_eq!(result, 42);
    }

    #[test]
    fn test_single_element_range() {
        let result = conc_reduce(7, 8, 0usize, |acc, i| acc + i, |a, b| a + b);
        assert_eq!(result, 7);
    }

    #[test]
    fn test_cancelled_group_yields_identity() {
        let grp = TaskGroup::new();
        grp.cancel();
        let result = conc_reduce_with(
            0,
            1_000,
            -1i64,
            |acc, i| acc + i as i64,
            |a, b| a + b,
            Some(&grp),
            PartitionHints::default(),
        );
        assert_eq!(result, -1);
    }
}
