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

//! Process-wide library state: the default execution context.
//!
//! The default context is created lazily on first use with default options.
//! `init` creates it eagerly with explicit options and fails if the library
//! is already initialized; `shutdown` tears it down (joining the workers)
//! and permits a later re-initialization. Explicit [`ExecContext`] handles
//! are first-class; the singleton is a thin convenience over them.

use crate::context::exec_context::{self, ContextInner, ExecContext};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use weft_common::{ContextOptions, InitError};

static LIBRARY_CONTEXT: Mutex<Option<Arc<ExecContext>>> = Mutex::new(None);

/// Initialize the library with explicit options.
///
/// Fails with [`InitError::AlreadyInitialized`] if the default context
/// already exists, whether created by a previous `init` or lazily by first
/// use.
pub fn init(options: ContextOptions) -> Result<(), InitError> {
    let mut ctx = LIBRARY_CONTEXT.lock();
    if ctx.is_some() {
        return Err(InitError::AlreadyInitialized);
    }
    info!("initializing weft library");
    *ctx = Some(Arc::new(ExecContext::new(options)));
    Ok(())
}

/// Tear down the default context, joining its workers. No-op when the
/// library is not initialized. After shutdown the library may be
/// initialized again.
pub fn shutdown() {
    let ctx = LIBRARY_CONTEXT.lock().take();
    if ctx.is_some() {
        info!("shutting down weft library");
    }
    // Dropped outside the lock: joining workers can take a while
    drop(ctx);
}

/// True while the default context exists.
pub fn is_initialized() -> bool {
    LIBRARY_CONTEXT.lock().is_some()
}

/// The default context, created on first use.
pub(crate) fn default_context() -> Arc<ExecContext> {
    let mut ctx = LIBRARY_CONTEXT.lock();
    if let Some(ctx) = ctx.as_ref() {
        return Arc::clone(ctx);
    }
    info!("lazily creating default execution context");
    let created = Arc::new(ExecContext::new(ContextOptions::new()));
    *ctx = Some(Arc::clone(&created));
    created
}

/// The context the calling thread should submit to: the one it is a worker
/// of, or the process default.
pub(crate) fn current_context_inner() -> Arc<ContextInner> {
    if let Some(inner) = exec_context::current_worker_context() {
        return inner;
    }
    Arc::clone(default_context().inner())
}
