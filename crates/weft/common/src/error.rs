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

use std::any::Any;
use std::fmt;
use thiserror::Error;

/// A captured panic payload from a task body.
///
/// Task bodies run under `catch_unwind`; whatever they panicked with is
/// preserved here so that continuations and group handlers can inspect it,
/// and so that waiting callers can resume the unwind on their own thread.
pub struct PanicPayload(Box<dyn Any + Send + 'static>);

// SAFETY: the payload is only ever inspected read-only (via `message` or
// downcasting in `into_inner`'s caller); no interior mutability is exposed
// across threads.
unsafe impl Sync for PanicPayload {}

impl PanicPayload {
    pub fn new(payload: Box<dyn Any + Send + 'static>) -> Self {
        Self(payload)
    }

    /// Best-effort extraction of the panic message.
    pub fn message(&self) -> &str {
        if let Some(s) = self.0.downcast_ref::<&'static str>() {
            s
        } else if let Some(s) = self.0.downcast_ref::<String>() {
            s.as_str()
        } else {
            "<non-string panic payload>"
        }
    }

    /// Consume the wrapper, yielding the raw payload for `resume_unwind`.
    pub fn into_inner(self) -> Box<dyn Any + Send + 'static> {
        self.0
    }
}

impl fmt::Debug for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PanicPayload").field(&self.message()).finish()
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// The error delivered to a task's continuation when the task did not
/// complete normally.
///
/// A continuation receives `None` on success, `Some(TaskError::Cancelled)`
/// when the task's group was cancelled before the body ran, and
/// `Some(TaskError::Panicked(_))` when the body panicked.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,
    #[error("task panicked: {0}")]
    Panicked(PanicPayload),
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Errors raised by explicit library initialization.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    #[error("library already initialized")]
    AlreadyInitialized,
}

/// Errors raised when attaching the calling thread to an execution context.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    #[error("thread is already attached to an execution context")]
    AlreadyWorker,
    #[error("no reserved worker slot available")]
    NoSlotAvailable,
}
