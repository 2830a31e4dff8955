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

//! Task groups: shared cancellation, task accounting and panic reporting.
//!
//! Tasks can reference one group; groups can reference a parent group,
//! forming a tree. Cloning a [`TaskGroup`] yields a shared copy: cancelling
//! one handle cancels them all.
//!
//! Registration counts propagate up the parent chain, so [`is_active`]
//! covers descendants in O(1) without child back-references (the tree only
//! points upward, which also rules out reference cycles).
//!
//! [`is_active`]: TaskGroup::is_active

use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use weft_common::TaskError;

/// Handler invoked with every panic captured from a task of the group.
pub type ExceptionHandler = Arc<dyn Fn(Arc<TaskError>) + Send + Sync>;

struct GroupInner {
    parent: Option<Arc<GroupInner>>,
    cancelled: AtomicBool,
    /// Live tasks registered here plus contributions from descendants.
    active_tasks: AtomicUsize,
    /// Set once at setup time; setters must not race task panics.
    handler: Mutex<Option<ExceptionHandler>>,
}

impl GroupInner {
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        let mut cur = self.parent.as_deref();
        while let Some(inner) = cur {
            if inner.cancelled.load(Ordering::Acquire) {
                return true;
            }
            cur = inner.parent.as_deref();
        }
        false
    }

    /// Bump the activity count here and on every ancestor.
    fn on_task_created(self: &Arc<Self>) {
        let mut cur = Arc::clone(self);
        loop {
            cur.active_tasks.fetch_add(1, Ordering::AcqRel);
            match cur.parent.clone() {
                Some(parent) => cur = parent,
                None => break,
            }
        }
    }

    fn on_task_destroyed(self: &Arc<Self>) {
        let mut cur = Arc::clone(self);
        loop {
            cur.active_tasks.fetch_sub(1, Ordering::AcqRel);
            match cur.parent.clone() {
                Some(parent) => cur = parent,
                None => break,
            }
        }
    }
}

/// Shared handle controlling a group of tasks: cancellation, completion
/// tracking and panic reporting.
///
/// # Scenarios
/// - Cancellation: after [`cancel`], tasks of this group (and of child
///   groups) that have not started will not run. Running tasks continue but
///   can poll [`TaskGroup::is_current_cancelled`] to stop early.
/// - Waiting: [`is_active`] reports whether any task referencing this group
///   or a descendant is still alive; `wait` busy-waits on it.
/// - Panics: a handler installed with [`set_exception_handler`] observes
///   every panic captured from the group's tasks.
///
/// [`cancel`]: TaskGroup::cancel
/// [`is_active`]: TaskGroup::is_active
/// [`set_exception_handler`]: TaskGroup::set_exception_handler
#[derive(Clone)]
pub struct TaskGroup {
    inner: Arc<GroupInner>,
}

thread_local! {
    static CURRENT_GROUP: RefCell<Option<TaskGroup>> = const { RefCell::new(None) };
}

impl TaskGroup {
    /// Create a new root group.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                parent: None,
                cancelled: AtomicBool::new(false),
                active_tasks: AtomicUsize::new(0),
                handler: Mutex::new(None),
            }),
        }
    }

    /// Create a group nested under `parent`. Cancelling the parent cancels
    /// this group's tasks; the parent stays active while this group is.
    pub fn with_parent(parent: &TaskGroup) -> Self {
        Self {
            inner: Arc::new(GroupInner {
                parent: Some(Arc::clone(&parent.inner)),
                cancelled: AtomicBool::new(false),
                active_tasks: AtomicUsize::new(0),
                handler: Mutex::new(None),
            }),
        }
    }

    /// Cancel the group: tasks not yet started will not be executed.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
    }

    /// Clear the cancel flag; tasks added afterwards run again. Tasks
    /// already skipped stay skipped.
    pub fn clear_cancel(&self) {
        self.inner.cancelled.store(false, Ordering::Release);
    }

    /// True if this group or any ancestor is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// True while tasks referencing this group or any descendant exist.
    pub fn is_active(&self) -> bool {
        self.inner.active_tasks.load(Ordering::Acquire) > 0
    }

    /// Install the panic handler. Intended to be called once at setup,
    /// before tasks of this group start executing.
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(Arc<TaskError>) + Send + Sync + 'static,
    {
        *self.inner.handler.lock() = Some(Arc::new(handler));
    }

    /// The group of the task currently executing on this thread, if any.
    pub fn current() -> Option<TaskGroup> {
        CURRENT_GROUP.with(|cell| cell.borrow().clone())
    }

    /// True if the current task's group (or an ancestor) is cancelled.
    /// Intended to be polled from within long-running task bodies.
    pub fn is_current_cancelled() -> bool {
        CURRENT_GROUP.with(|cell| {
            cell.borrow()
                .as_ref()
                .map(TaskGroup::is_cancelled)
                .unwrap_or(false)
        })
    }

    /// Replace the current thread's group, returning the previous one.
    /// Used by the scheduler around task execution and by the parallel
    /// algorithms to inherit groups.
    pub(crate) fn set_current(grp: Option<TaskGroup>) -> Option<TaskGroup> {
        CURRENT_GROUP.with(|cell| cell.replace(grp))
    }

    /// Route a captured panic to the group handler, if one is installed.
    pub(crate) fn handle_exception(&self, err: Arc<TaskError>) {
        let handler = self.inner.handler.lock().clone();
        if let Some(handler) = handler {
            handler(err);
        }
    }

    /// Two handles are equal when they share the same group state.
    pub fn same_group(&self, other: &TaskGroup) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning handle that can cancel the group. Lets a group's own
    /// exception handler cancel it without creating a reference cycle
    /// through the stored handler.
    pub(crate) fn downgrade(&self) -> WeakGroup {
        WeakGroup(Arc::downgrade(&self.inner))
    }
}

/// Weak cancellation handle; see [`TaskGroup::downgrade`].
pub(crate) struct WeakGroup(std::sync::Weak<GroupInner>);

impl WeakGroup {
    pub(crate) fn cancel(&self) {
        if let Some(inner) = self.0.upgrade() {
            inner.cancelled.store(true, Ordering::Release);
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TaskGroup {
    fn eq(&self, other: &Self) -> bool {
        self.same_group(other)
    }
}

impl Eq for TaskGroup {}

impl std::fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGroup")
            .field("cancelled", &self.inner.cancelled.load(Ordering::Relaxed))
            .field(
                "active_tasks",
                &self.inner.active_tasks.load(Ordering::Relaxed),
            )
            .finish()
    }
}

/// Guard that keeps a group's activity count in sync with the lifetime of
/// one task. Created at task construction, dropped when the task value is
/// consumed or discarded; the drop runs after the task's continuation.
pub(crate) struct GroupRegistration {
    group: Option<TaskGroup>,
}

impl GroupRegistration {
    pub(crate) fn new(group: Option<TaskGroup>) -> Self {
        if let Some(grp) = &group {
            grp.inner.on_task_created();
        }
        Self { group }
    }

    pub(crate) fn group(&self) -> Option<&TaskGroup> {
        self.group.as_ref()
    }
}

impl Drop for GroupRegistration {
    fn drop(&mut self) {
        if let Some(grp) = &self.group {
            grp.inner.on_task_destroyed();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_and_clear() {
        let grp = TaskGroup::new();
        assert!(!grp.is_cancelled());
        grp.cancel();
        assert!(grp.is_cancelled());
        grp.clear_cancel();
        assert!(!grp.is_cancelled());
    }

    #[test]
    fn test_cancel_propagates_to_children() {
        let parent = TaskGroup::new();
        let child = TaskGroup::with_parent(&parent);
        let grandchild = TaskGroup::with_parent(&child);

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());

        parent.clear_cancel();
        assert!(!grandchild.is_cancelled());

        // Cancelling a child does not affect the parent
        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_shared_copy_semantics() {
        let grp = TaskGroup::new();
        let copy = grp.clone();
        copy.cancel();
        assert!(grp.is_cancelled());
        assert_eq!(grp, copy);
        assert_ne!(grp, TaskGroup::new());
    }

    #[test]
    fn test_registration_drives_activity() {
        let grp = TaskGroup::new();
        assert!(!grp.is_active());

        let reg = GroupRegistration::new(Some(grp.clone()));
        assert!(grp.is_active());
        let reg2 = GroupRegistration::new(Some(grp.clone()));
        drop(reg);
        assert!(grp.is_active());
        drop(reg2);
        assert!(!grp.is_active());
    }

    #[test]
    fn test_child_activity_makes_parent_active() {
        let parent = TaskGroup::new();
        let child = TaskGroup::with_parent(&parent);

        let reg = GroupRegistration::new(Some(child.clone()));
        assert!(child.is_active());
        assert!(parent.is_active());
        drop(reg);
        assert!(!parent.is_active());
    }

    #[test]
    fn test_current_group_roundtrip() {
        assert!(TaskGroup::current().is_none());
        let grp = TaskGroup::new();
        let prev = TaskGroup::set_current(Some(grp.clone()));
        assert!(prev.is_none());
        assert_eq!(TaskGroup::current().unwrap(), grp);
        assert!(!TaskGroup::is_current_cancelled());
        grp.cancel();
        assert!(TaskGroup::is_current_cancelled());
        TaskGroup::set_current(None);
        assert!(TaskGroup::current().is_none());
    }

    #[test]
    fn test_exception_handler_invoked() {
        use std::sync::atomic::AtomicUsize;

        let grp = TaskGroup::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_handler = Arc::clone(&hits);
        grp.set_exception_handler(move |err| {
            assert!(!err.is_cancelled());
            hits_in_handler.fetch_add(1, Ordering::SeqCst);
        });

        let err = Arc::new(TaskError::Panicked(weft_common::PanicPayload::new(
            Box::new("boom"),
        )));
        grp.handle_exception(err);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
