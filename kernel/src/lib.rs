/*
 * Vesper Kernel - Thread Scheduler Subsystem
 *
 * This crate implements the core thread scheduler of the Vesper kernel:
 * the thread lifecycle and state machine, the ready structures for the two
 * scheduling disciplines (strict priority with donation, and a multi-level
 * feedback queue), the sleep/wake mechanism driven by the timer tick, and
 * the context-switch path that preserves the scheduler invariants across
 * preemption.
 *
 * The subsystem is built as a library so the kernel binary (boot loader,
 * IDT wiring, drivers) can link it, and so the scheduling logic can be
 * exercised on a hosted build where the interrupt flag is simulated and
 * the timer tick is delivered by the platform layer. The context switch
 * itself is plain x86_64 register switching and is identical on bare
 * metal and hosted builds.
 */

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod fixed_point;
pub mod interrupt;
pub mod palloc;
pub mod scheduler;
pub mod sync;
pub mod timer;

pub use scheduler::{
    CreateError, Discipline, SchedulerManager, Thread, ThreadFunc, ThreadId, ThreadManager,
    ThreadStatus, PRI_DEFAULT, PRI_MAX, PRI_MIN, TIME_SLICE,
};
pub use sync::{Lock, Semaphore};
