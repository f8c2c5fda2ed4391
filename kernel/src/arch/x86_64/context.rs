/*
 * Context Switch
 *
 * The scheduler switches threads by switching kernel stacks. A suspended
 * thread is exactly its saved stack: the callee-saved registers live in a
 * switch frame at the top of the suspended stack, and the descriptor's
 * `stack` field points at that frame. Resuming a thread means loading its
 * stack pointer and popping the frame; the `ret` at the end of
 * switch_threads then "returns" into whatever call site the thread
 * suspended at.
 *
 * SWITCH FRAME (pushed by switch_threads, popped on resume):
 *
 *   High Address  [return address]   <- where the thread resumes
 *                 [rbp]
 *                 [rbx]
 *                 [r12]
 *                 [r13]
 *                 [r14]
 *   Low Address   [r15]              <- saved stack pointer
 *
 * Only the System V callee-saved registers are in the frame; everything
 * else is dead across a call by the calling convention, and interrupts
 * are off for the whole switch so no handler can observe the torn state.
 *
 * FIRST RUN:
 *
 * A newly created thread has never suspended, so prepare_stack() forges
 * the stack a suspended thread would have, laid out from the top of the
 * thread's stack page:
 *
 *   High Address  [aux]              argument for the thread function
 *                 [function]         the thread function itself
 *                 [switch_entry]     return address of the switch frame
 *                 [six zero words]   callee-saved registers (rbp = 0 so
 *   Low Address                      backtraces terminate here)
 *
 * The first switch into the thread pops the zeros and "returns" into
 * switch_entry, which completes the switch (schedule_tail), then loads
 * `function` and `aux` from the stack and enters the kernel-thread
 * trampoline. The same layout works on bare metal and hosted builds.
 */

use core::arch::naked_asm;

use crate::scheduler::ThreadFunc;

/// Number of callee-saved registers in the switch frame.
const SWITCH_FRAME_WORDS: usize = 6;

/// Switch stacks from the running thread to `next_sp`.
///
/// Saves the callee-saved registers, stores the resulting stack pointer
/// through `prev_sp_cell`, installs `next_sp`, and resumes the next
/// thread. `prev_tag` is handed through to the resumed context as the
/// return value, so whoever wakes up knows which thread ran before it
/// and can finish the switch on its behalf.
///
/// # Safety
///
/// Interrupts must be disabled. `prev_sp_cell` must point at the current
/// thread's descriptor `stack` field and `next_sp` must be a stack pointer
/// previously produced by this function or by `prepare_stack`. The
/// scheduler lock must not be held: the resumed code re-acquires it in
/// schedule_tail.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_threads(
    prev_sp_cell: *mut usize,
    next_sp: usize,
    prev_tag: usize,
) -> usize {
    naked_asm!(
        // Build the switch frame on the outgoing stack.
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        // Publish the outgoing stack pointer, then switch stacks.
        "mov [rdi], rsp",
        "mov rsp, rsi",
        // Unwind the incoming thread's switch frame.
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        // The resumed context receives the outgoing thread's tag.
        "mov rax, rdx",
        "ret",
    )
}

/// First-run landing point for a new thread.
///
/// Entered by the `ret` of switch_threads with the previous thread's tag
/// in rax and the forged stack from prepare_stack() in rsp. Completes the
/// half-finished context switch, then falls into the kernel-thread
/// trampoline with the function and argument popped from the stack.
#[unsafe(naked)]
unsafe extern "C" fn switch_entry() {
    naked_asm!(
        "mov rdi, rax",
        "call {tail}",
        "pop rdi", // thread function
        "pop rsi", // aux argument
        "call {entry}",
        // kernel_thread_entry never returns.
        "ud2",
        tail = sym crate::scheduler::schedule_tail_entry,
        entry = sym crate::scheduler::kernel_thread_entry,
    )
}

/// Forge the initial stack for a thread that has never run.
///
/// Returns the stack pointer to store in the new thread's descriptor.
///
/// # Safety
///
/// `stack_top` must be the one-past-the-end address of a writable,
/// 16-byte-aligned stack region with room for the frames below it.
pub unsafe fn prepare_stack(stack_top: usize, function: ThreadFunc, aux: usize) -> usize {
    debug_assert_eq!(stack_top % 16, 0, "thread stack top must be 16-byte aligned");

    let mut sp = stack_top as *mut usize;
    unsafe {
        sp = sp.sub(1);
        sp.write(aux);
        sp = sp.sub(1);
        sp.write(function as usize);
        sp = sp.sub(1);
        sp.write(switch_entry as usize);
        for _ in 0..SWITCH_FRAME_WORDS {
            sp = sp.sub(1);
            sp.write(0);
        }
    }
    sp as usize
}
