// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Weft runtime library.
//!
//! A fixed-capacity pool of stackful coroutines multiplexed onto one OS
//! thread by an explicit, non-preemptive round-robin scheduler. Coroutines
//! suspend only at `yield_now()` (or by returning); the dispatcher and the
//! running coroutine exchange the CPU through a single context-swap
//! primitive.
//!
//! Components:
//! - `context`   — ucontext wrapper: capture/bind/swap + stack allocation
//! - `coro`      — coroutine record, id, lifecycle states
//! - `scheduler` — pool, intrusive ready-queue, dispatch loop, epoch lifecycle
//! - `error`     — typed scheduler errors
//!
//! ```no_run
//! use weft_rt::{yield_now, Scheduler};
//!
//! let sched = Scheduler::start()?;
//! sched.create(|| {
//!     println!("first turn");
//!     yield_now();
//!     println!("second turn");
//! })?;
//! sched.dispatch();
//! sched.finish();
//! # Ok::<(), weft_rt::SchedError>(())
//! ```

pub mod context;
pub mod coro;
pub mod error;
pub mod scheduler;

pub use coro::{CoroId, CoroState};
pub use error::{SchedError, SchedResult};
pub use scheduler::{spawn, yield_now, Scheduler, MAX_COROUTINES, STACK_SIZE};
