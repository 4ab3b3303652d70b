// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Execution context primitive.
//!
//! Thin wrapper over the ucontext family: capture the caller's CPU state,
//! rebind a captured context onto a fresh stack with an entry trampoline,
//! and swap between two contexts. `swap` is the sole transfer mechanism —
//! dispatch into a coroutine and yield back out are the same call with the
//! arguments reversed.

use std::alloc::{self, Layout};
use std::ptr::NonNull;
use std::{io, mem};

use crate::error::{SchedError, SchedResult};

#[cfg(not(unix))]
compile_error!("weft-rt requires a ucontext-capable unix target");

/// Entry routine signature for [`Context::bind`]. `makecontext` only
/// forwards int-sized arguments, so a pointer travels as two halves.
pub type Trampoline = extern "C" fn(libc::c_uint, libc::c_uint);

/// Split a pointer-sized value into the hi/lo halves `makecontext` can carry.
pub(crate) fn split_arg(arg: usize) -> (libc::c_uint, libc::c_uint) {
    let arg = arg as u64;
    ((arg >> 32) as libc::c_uint, (arg & 0xffff_ffff) as libc::c_uint)
}

/// Reassemble a pointer-sized value inside the trampoline.
pub(crate) fn join_arg(hi: libc::c_uint, lo: libc::c_uint) -> usize {
    (((hi as u64) << 32) | lo as u64) as usize
}

/// Saved CPU execution state: instruction pointer, stack pointer, and
/// callee-saved registers, plus the stack the state runs on.
///
/// Always handled through `Box`: glibc's `ucontext_t` stores pointers into
/// itself (`uc_mcontext.fpregs`), so a captured context must never move.
pub struct Context {
    raw: libc::ucontext_t,
}

impl Context {
    /// A zeroed context. Valid only as the *save* side of a [`Context::swap`]
    /// or as a [`Context::bind`] return link — `swapcontext` fills it in
    /// before anything resumes it. Mirrors the dispatcher slot, which is
    /// never resumed before the first swap out of it.
    pub fn zeroed() -> Box<Context> {
        // SAFETY: ucontext_t is a plain C struct; all-zero is a valid
        // (if meaningless) bit pattern, and we never resume it unfilled.
        Box::new(Context {
            raw: unsafe { mem::zeroed() },
        })
    }

    /// Snapshot the caller's current CPU state.
    pub fn capture() -> SchedResult<Box<Context>> {
        let mut ctx = Context::zeroed();
        // SAFETY: ctx.raw is a valid ucontext_t for getcontext to fill.
        if unsafe { libc::getcontext(&mut ctx.raw) } != 0 {
            return Err(SchedError::ContextCapture(io::Error::last_os_error()));
        }
        Ok(ctx)
    }

    /// Rebind a captured context to a new logical thread of execution:
    /// resuming it runs `entry(arg)` on `stack`; when `entry` returns, the
    /// context named by `link` is resumed (`uc_link`).
    ///
    /// # Safety
    /// `self` must have been produced by [`Context::capture`]. `stack` and
    /// `link` must outlive every resumption of this context.
    pub unsafe fn bind(&mut self, stack: &Stack, entry: Trampoline, arg: usize, link: &mut Context) {
        self.raw.uc_stack.ss_sp = stack.base().cast();
        self.raw.uc_stack.ss_size = stack.size();
        self.raw.uc_stack.ss_flags = 0;
        self.raw.uc_link = &mut link.raw;

        let (hi, lo) = split_arg(arg);
        // makecontext's entry parameter is declared as a zero-argument
        // function; the real arguments are forwarded through the variadic
        // tail. Same cast the C interface forces on everyone.
        let entry: extern "C" fn() = mem::transmute(entry);
        libc::makecontext(&mut self.raw, entry, 2, hi, lo);
    }

    /// Save the caller's CPU state into `save_into` and resume `resume_from`.
    /// Returns only when a later swap targets `save_into` again (or a bound
    /// context's entry returns into it via its link).
    ///
    /// # Safety
    /// Both pointers must be valid, non-aliasing, boxed contexts.
    /// `resume_from` must be either bound or previously saved into.
    pub unsafe fn swap(save_into: *mut Context, resume_from: *mut Context) {
        libc::swapcontext(&mut (*save_into).raw, &mut (*resume_from).raw);
    }
}

/// Minimum stack alignment. The ABI wants 16 on x86-64; every other target
/// we care about is satisfied by it too.
pub const STACK_ALIGN: usize = 16;

/// A coroutine stack: one fixed-size aligned heap allocation. No growth,
/// no guard page. Freed on drop — the owner must guarantee nothing is
/// executing on it by then.
pub struct Stack {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Stack {
    /// Allocate a stack of `size` bytes.
    pub fn new(size: usize) -> SchedResult<Stack> {
        let layout =
            Layout::from_size_align(size, STACK_ALIGN).map_err(|_| SchedError::StackAlloc(size))?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(Stack { ptr, layout }),
            None => Err(SchedError::StackAlloc(size)),
        }
    }

    /// Base address of the allocation (lowest byte).
    pub fn base(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Stack size in bytes.
    pub fn size(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: ptr/layout are the pair returned by alloc in new().
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_alloc_is_aligned() {
        let stack = Stack::new(64 * 1024).unwrap();
        assert_eq!(stack.base() as usize % STACK_ALIGN, 0);
        assert_eq!(stack.size(), 64 * 1024);
    }

    #[test]
    fn capture_succeeds() {
        let ctx = Context::capture().unwrap();
        drop(ctx);
    }

    #[test]
    fn split_join_round_trips_pointers() {
        let v: usize = 0xdead_beef_cafe_f00d_u64 as usize;
        let (hi, lo) = split_arg(v);
        assert_eq!(join_arg(hi, lo), v);
    }

    extern "C" fn bump(hi: libc::c_uint, lo: libc::c_uint) {
        let p = join_arg(hi, lo) as *mut u32;
        unsafe { *p += 1 };
    }

    #[test]
    fn bind_and_swap_round_trip() {
        let mut main = Context::zeroed();
        let mut co = Context::capture().unwrap();
        let stack = Stack::new(64 * 1024).unwrap();
        let mut value: u32 = 7;
        unsafe {
            co.bind(&stack, bump, &mut value as *mut u32 as usize, &mut main);
            Context::swap(&mut *main, &mut *co);
        }
        // bump ran on the coroutine stack, returned, and uc_link brought
        // control back here.
        assert_eq!(value, 8);
    }
}
