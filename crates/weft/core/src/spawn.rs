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

//! Spawning and joining tasks from the current scope.
//!
//! Spawned tasks go to the front of the calling worker's local stack, so
//! they tend to run on this thread, soon — the add-to-front strategy keeps
//! execution close to the data the current task just touched. From
//! non-worker threads spawning falls back to a normal-priority enqueue on
//! the default context.

use crate::context::library;
use crate::task::Task;
use crate::task_group::TaskGroup;

/// Spawn a prepared task.
///
/// `wake_workers` should stay true unless the current task is about to
/// finish and pick the new task up itself; skipping the wake then saves a
/// needless signal.
pub fn spawn_task(task: Task, wake_workers: bool) {
    library::current_context_inner().spawn(task, wake_workers);
}

/// Spawn a closure as a task. The task inherits the group of the currently
/// running task, if any.
pub fn spawn<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    let task = match TaskGroup::current() {
        Some(grp) => Task::with_group(f, grp),
        None => Task::new(f),
    };
    spawn_task(task, true);
}

/// Spawn a closure into an explicit group.
pub fn spawn_with_group<F>(f: F, group: &TaskGroup)
where
    F: FnOnce() + Send + 'static,
{
    spawn_task(Task::with_group(f, group.clone()), true);
}

/// Spawn several closures; workers are woken for each but the last, which
/// the caller's worker is expected to pick up.
pub fn spawn_many(fns: Vec<Box<dyn FnOnce() + Send + 'static>>) {
    let group = TaskGroup::current();
    let count = fns.len();
    for (i, f) in fns.into_iter().enumerate() {
        let task = match &group {
            Some(grp) => Task::with_group(f, grp.clone()),
            None => Task::new(f),
        };
        spawn_task(task, i + 1 < count);
    }
}

/// Spawn a closure and actively wait for it to finish.
///
/// The wait executes other tasks meanwhile; the spawned task usually runs
/// on the calling thread itself. The task is placed in a fresh group
/// nested under the current task's group, so outer cancellation applies.
pub fn spawn_and_wait<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    let ctx = library::current_context_inner();
    let slot = ctx.enter_worker();

    let group = match TaskGroup::current() {
        Some(parent) => TaskGroup::with_parent(&parent),
        None => TaskGroup::new(),
    };
    ctx.spawn(Task::with_group(f, group.clone()), false);
    ctx.busy_wait_on(&group);

    if let Some(slot) = slot {
        ctx.exit_worker(slot);
    }
}

/// Spawn several closures and actively wait for all of them.
pub fn spawn_and_wait_all(fns: Vec<Box<dyn FnOnce() + Send + 'static>>) {
    let ctx = library::current_context_inner();
    let slot = ctx.enter_worker();

    let group = match TaskGroup::current() {
        Some(parent) => TaskGroup::with_parent(&parent),
        None => TaskGroup::new(),
    };
    let count = fns.len();
    for (i, f) in fns.into_iter().enumerate() {
        // Don't wake for the last one; this thread will run it
        ctx.spawn(Task::with_group(f, group.clone()), i + 1 < count);
    }
    ctx.busy_wait_on(&group);

    if let Some(slot) = slot {
        ctx.exit_worker(slot);
    }
}

/// Actively wait until all tasks of `group` (and its descendants) are done.
///
/// Executes other tasks from the scheduler while waiting, so calling this
/// from inside a task does not stall a worker. Blocks forever if tasks are
/// added to the group but never submitted for execution.
pub fn wait(group: &TaskGroup) {
    let ctx = library::current_context_inner();
    let slot = ctx.enter_worker();
    ctx.busy_wait_on(group);
    if let Some(slot) = slot {
        ctx.exit_worker(slot);
    }
}
