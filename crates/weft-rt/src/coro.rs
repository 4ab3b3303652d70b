// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Coroutine record.
//!
//! A record's identity is its pool slot. The scheduler owns every record
//! and its stack; a coroutine never outlives the scheduler that created it.

use std::fmt;

use crate::context::{Context, Stack};

/// Pool-slot identity of a coroutine. Slots are allocated monotonically
/// within an epoch and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoroId(pub(crate) usize);

impl CoroId {
    /// The slot index backing this id.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for CoroId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coroutine lifecycle states.
///
/// `Ready → Running` on dispatch, `Running → Ready` on a voluntary yield,
/// `Running → Dead` when the entry closure returns. No atomics: exactly one
/// of {dispatcher, one coroutine} holds the CPU at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroState {
    /// Linked in the ready-queue, waiting for a turn.
    Ready,
    /// Currently holding the CPU.
    Running,
    /// Entry closure returned; unlinked, stack pending reclamation.
    Dead,
}

/// The record the scheduler owns for each coroutine. Boxed, so its address
/// is stable — the trampoline receives it as a raw pointer through the
/// bound context.
pub(crate) struct Coro {
    pub id: CoroId,
    /// Captured execution context, rebound onto `stack` at creation.
    pub ctx: Box<Context>,
    /// Entry closure; taken by the trampoline on first dispatch.
    pub entry: Option<Box<dyn FnOnce()>>,
    /// Intrusive ready-queue link.
    pub next: Option<CoroId>,
    pub state: CoroState,
    /// Dedicated stack. Freed when the record is dropped, which the
    /// dispatcher does only after control has left it.
    pub stack: Stack,
}
