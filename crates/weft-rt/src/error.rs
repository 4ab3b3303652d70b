// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Runtime error surface.
//!
//! Setup failures (context capture, stack allocation) and lifecycle misuse
//! are the only error sources — the core carries no application-level
//! failure channel. A coroutine body either returns or never does.

use std::io;

/// Errors returned by the scheduler surface.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    /// `Scheduler::start` was called while this thread already has a live
    /// scheduler. The existing instance keeps running.
    #[error("a scheduler is already active on this thread")]
    AlreadyActive,

    /// A free function (`spawn`) needs an active scheduler and none exists.
    #[error("no active scheduler on this thread")]
    NotActive,

    /// The coroutine pool is full. The pool is fixed-capacity and slots are
    /// never reused within an epoch, so this is final for the epoch.
    #[error("coroutine pool exhausted ({0} slots)")]
    PoolExhausted(usize),

    /// `getcontext` failed while snapshotting CPU state.
    #[error("context capture failed: {0}")]
    ContextCapture(#[source] io::Error),

    /// The coroutine stack could not be allocated.
    #[error("failed to allocate a {0}-byte coroutine stack")]
    StackAlloc(usize),
}

/// Shorthand result for scheduler operations.
pub type SchedResult<T> = Result<T, SchedError>;
