// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler core: coroutine pool, intrusive ready-queue, round-robin
//! dispatch, and the per-epoch lifecycle.
//!
//! Strictly single-threaded and cooperative. The dispatcher and the running
//! coroutine hand the CPU back and forth through exactly one primitive —
//! [`Context::swap`] — so pool, queue, and `current` are only ever touched
//! by one logical execution at a time. No locks, no atomics.
//!
//! Reclamation protocol: when an entry closure returns, the trampoline
//! unlinks the record and marks it `Dead`, but the stack is still the one
//! the CPU is executing on. The dispatcher frees it only after the swap
//! back has returned.

use std::cell::{Cell, UnsafeCell};
use std::fmt::Write as _;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use crate::context::{join_arg, Context, Stack};
use crate::coro::{Coro, CoroId, CoroState};
use crate::error::{SchedError, SchedResult};

/// Fixed stack size for every coroutine: 1 MiB, no growth.
pub const STACK_SIZE: usize = 1 << 20;

/// Fixed pool capacity. Creating past it is a checked [`SchedError::PoolExhausted`].
pub const MAX_COROUTINES: usize = 10;

/// Mutable scheduler state. Boxed behind `UnsafeCell` so the dispatcher,
/// `yield_now`, and the trampoline can all reach it through a raw pointer
/// while the dispatcher's own frame is suspended mid-`dispatch`.
struct Core {
    /// The dispatcher's execution context. Written by every swap out of the
    /// dispatch loop; also the return link of every bound coroutine context.
    main_ctx: Box<Context>,
    /// The coroutine currently holding the CPU, if any.
    current: Option<CoroId>,
    /// Slot arena. Index == CoroId. Dead slots become `None` and are never
    /// reused within the epoch.
    pool: Vec<Option<Box<Coro>>>,
    /// Monotonic allocation cursor.
    cursor: usize,
    /// Ready-queue head; records chain through `Coro::next`.
    head: Option<CoroId>,
    /// Total swaps into coroutines, for observability.
    switches: u64,
}

thread_local! {
    /// The active scheduler core on this thread, or null. Free functions
    /// (`spawn`, `yield_now`) and the trampoline reach the scheduler here.
    static ACTIVE: Cell<*mut Core> = Cell::new(ptr::null_mut());
}

/// A scheduling epoch: one pool of coroutines run to completion by one
/// dispatch loop. At most one instance is live per thread at a time;
/// [`Scheduler::start`] installs it, [`Scheduler::finish`] (or drop)
/// uninstalls it.
pub struct Scheduler {
    core: Box<UnsafeCell<Core>>,
    /// Contexts and the active pointer are thread-bound.
    _not_send: PhantomData<*mut ()>,
}

impl Scheduler {
    /// Begin a scheduler epoch on this thread.
    ///
    /// Fails with [`SchedError::AlreadyActive`] if an epoch is already in
    /// progress; the existing instance is left untouched.
    pub fn start() -> SchedResult<Scheduler> {
        if !ACTIVE.with(|a| a.get()).is_null() {
            return Err(SchedError::AlreadyActive);
        }
        let core = Box::new(UnsafeCell::new(Core {
            main_ctx: Context::zeroed(),
            current: None,
            pool: Vec::with_capacity(MAX_COROUTINES),
            cursor: 0,
            head: None,
            switches: 0,
        }));
        ACTIVE.with(|a| a.set(core.get()));
        Ok(Scheduler {
            core,
            _not_send: PhantomData,
        })
    }

    /// End the epoch, releasing the pool and clearing the active instance.
    ///
    /// Finishing an instance that is not the active one means the epoch
    /// bookkeeping has been corrupted; that is a programmer error, not a
    /// runtime condition, and it aborts.
    pub fn finish(self) {
        let active = ACTIVE.with(|a| a.get());
        assert!(
            ptr::eq(active, self.core.get()),
            "finish called on a scheduler that is not the active instance"
        );
        // Drop clears ACTIVE and frees the pool.
    }

    /// Create a coroutine running `f` and append it at the ready-queue tail.
    ///
    /// The record is committed only after context capture and stack
    /// allocation succeed; on failure nothing is mutated.
    pub fn create<F>(&self, f: F) -> SchedResult<CoroId>
    where
        F: FnOnce() + 'static,
    {
        // SAFETY: core is this instance's boxed state; single-threaded.
        unsafe { core_create(self.core.get(), Box::new(f)) }
    }

    /// Run every ready coroutine to completion, round-robin in link order.
    ///
    /// Returns when the ready-queue drains. Returns immediately if it is
    /// already empty, or if called from inside a running coroutine.
    pub fn dispatch(&self) {
        let core = self.core.get();
        // SAFETY: single-threaded cooperative model — between swaps, this
        // loop is the only execution touching the core. No Rust reference
        // into the core is held across a swap.
        unsafe {
            if (*core).current.is_some() {
                return;
            }
            while let Some(head) = (*core).head {
                // Round-robin selection: next after current, wrapping to the
                // head; fresh from the head when there is no current.
                let next = match (*core).current {
                    None => head,
                    Some(cur) => coro_mut(core, cur).next.unwrap_or(head),
                };
                (*core).current = Some(next);
                (*core).switches += 1;

                let co = coro_mut(core, next);
                co.state = CoroState::Running;
                let co_ctx: *mut Context = &mut *co.ctx;
                let main_ctx: *mut Context = &mut *(*core).main_ctx;
                Context::swap(main_ctx, co_ctx);

                // Back from a yield or a termination. A dead record is
                // already unlinked; now that control has left its stack,
                // reclaim it and restart selection from the head.
                if let Some(cur) = (*core).current {
                    if coro_mut(core, cur).state == CoroState::Dead {
                        (&mut (*core).pool)[cur.index()] = None;
                        (*core).current = None;
                    }
                }
            }
        }
    }

    /// Human-readable listing of the ready-queue. Debugging aid.
    pub fn dump(&self) -> String {
        let core = self.core.get();
        let mut out = String::from("co list:\n");
        // SAFETY: read-only walk; no coroutine is mid-swap while the caller
        // holds `&self` outside dispatch.
        unsafe {
            let mut cur = (*core).head;
            while let Some(id) = cur {
                let co = coro_mut(core, id);
                let _ = writeln!(
                    out,
                    "co {} state {:?} stack {} next {}",
                    id,
                    co.state,
                    co.stack.size(),
                    co.next.map_or_else(|| "-".to_string(), |n| n.to_string()),
                );
                cur = co.next;
            }
        }
        out
    }

    /// Total swaps into coroutines so far.
    pub fn switches(&self) -> u64 {
        // SAFETY: plain read; see dispatch.
        unsafe { (*self.core.get()).switches }
    }

    /// Number of records currently linked in the ready-queue.
    pub fn ready_len(&self) -> usize {
        let core = self.core.get();
        let mut n = 0;
        // SAFETY: read-only walk; see dump.
        unsafe {
            let mut cur = (*core).head;
            while let Some(id) = cur {
                n += 1;
                cur = coro_mut(core, id).next;
            }
        }
        n
    }

    /// Number of live (unreclaimed) records in the pool.
    pub fn live(&self) -> usize {
        // SAFETY: plain read; see dispatch.
        unsafe { (*self.core.get()).pool.iter().filter(|s| s.is_some()).count() }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        ACTIVE.with(|a| {
            if ptr::eq(a.get(), self.core.get()) {
                a.set(ptr::null_mut());
            }
        });
    }
}

/// Create a coroutine on the active scheduler. Usable from inside a running
/// coroutine; the new record is appended behind the current tail and will be
/// visited after every coroutine that was already ready.
pub fn spawn<F>(f: F) -> SchedResult<CoroId>
where
    F: FnOnce() + 'static,
{
    let core = ACTIVE.with(|a| a.get());
    if core.is_null() {
        return Err(SchedError::NotActive);
    }
    // SAFETY: ACTIVE points at the live epoch's core on this thread.
    unsafe { core_create(core, Box::new(f)) }
}

/// Suspend the calling coroutine and hand control back to the dispatcher.
/// Resumes transparently, exactly here, on the coroutine's next turn.
///
/// Safe no-op when no coroutine is current — including when no scheduler
/// is active at all.
pub fn yield_now() {
    let core = ACTIVE.with(|a| a.get());
    if core.is_null() {
        return;
    }
    // SAFETY: only the running coroutine can reach this with `current` set,
    // and it is the sole execution touching the core right now.
    unsafe {
        let Some(cur) = (*core).current else {
            return;
        };
        let co = coro_mut(core, cur);
        co.state = CoroState::Ready;
        let co_ctx: *mut Context = &mut *co.ctx;
        let main_ctx: *mut Context = &mut *(*core).main_ctx;
        Context::swap(co_ctx, main_ctx);
    }
}

/// Allocate the next pool slot, bind a fresh context over a new stack, and
/// append the record at the ready-queue tail.
unsafe fn core_create(core: *mut Core, f: Box<dyn FnOnce()>) -> SchedResult<CoroId> {
    let slot = (*core).cursor;
    if slot >= MAX_COROUTINES {
        return Err(SchedError::PoolExhausted(MAX_COROUTINES));
    }

    // Capture and allocate before committing anything, so a failure leaves
    // pool, cursor, and ready-queue untouched.
    let ctx = Context::capture()?;
    let stack = Stack::new(STACK_SIZE)?;

    let id = CoroId(slot);
    let mut co = Box::new(Coro {
        id,
        ctx,
        entry: Some(f),
        next: None,
        state: CoroState::Ready,
        stack,
    });

    // Bind after boxing: the trampoline argument is the record's final,
    // stable address.
    let co_ptr: *mut Coro = &mut *co;
    {
        let main_ctx = &mut *(*core).main_ctx;
        let co = &mut *co_ptr;
        co.ctx.bind(&co.stack, trampoline, co_ptr as usize, main_ctx);
    }

    debug_assert_eq!((*core).pool.len(), slot);
    (*core).pool.push(Some(co));
    (*core).cursor = slot + 1;

    // Append at the tail: creation order is first-round dispatch order.
    let mut pp: *mut Option<CoroId> = &mut (*core).head;
    while let Some(nid) = *pp {
        pp = &mut coro_mut(core, nid).next;
    }
    *pp = Some(id);

    Ok(id)
}

/// Every coroutine stack starts here. Runs the entry closure, then unlinks
/// the record and marks it dead; returning resumes the dispatcher through
/// the bound link. The stack must not be freed on this path — the CPU is
/// still on it.
extern "C" fn trampoline(hi: libc::c_uint, lo: libc::c_uint) {
    let co = join_arg(hi, lo) as *mut Coro;
    // SAFETY: the dispatcher swapped into this context, so the record is
    // live and owned by the active core; nothing else runs concurrently.
    unsafe {
        if let Some(f) = (*co).entry.take() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                // Never unwind across the context-switch boundary. Report
                // and reclaim like a normal return.
                eprintln!(
                    "weft: coroutine {} panicked: {}",
                    (*co).id,
                    panic_message(&payload)
                );
            }
        }
        let core = ACTIVE.with(|a| a.get());
        if !core.is_null() {
            core_destroy(core, (*co).id);
        }
    }
}

/// Unlink a record from the ready-queue (single-pass search by identity)
/// and mark it dead. Stack reclamation is the dispatcher's job, after the
/// swap back returns.
unsafe fn core_destroy(core: *mut Core, id: CoroId) {
    let mut pp: *mut Option<CoroId> = &mut (*core).head;
    while let Some(nid) = *pp {
        if nid == id {
            *pp = coro_mut(core, nid).next;
            coro_mut(core, id).state = CoroState::Dead;
            break;
        }
        pp = &mut coro_mut(core, nid).next;
    }
}

/// Resolve a live pool slot. Linked ids always name live records; a miss
/// means the queue invariants were broken.
unsafe fn coro_mut<'a>(core: *mut Core, id: CoroId) -> &'a mut Coro {
    let slot = (&mut (*core).pool)[id.index()]
        .as_mut()
        .expect("ready-queue references a reclaimed slot");
    &mut **slot
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
