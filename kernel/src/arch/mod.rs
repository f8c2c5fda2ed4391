/*
 * Architecture Support
 *
 * All target-specific code lives below this module: the interrupt flag,
 * the low-level context switch, the synthetic stack frames that let a new
 * thread be scheduled for the first time, and the idle thread's wait for
 * the next timer interrupt.
 *
 * The rest of the scheduler only uses the re-exports here, so the generic
 * code never names an architecture.
 */

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{
    context, disable_interrupts, enable_interrupts, interrupts_enabled, wait_for_interrupt,
};

#[cfg(not(target_arch = "x86_64"))]
compile_error!("the vesper scheduler currently supports only x86_64");
