/*
 * Interrupt Gate
 *
 * Disabling interrupts is the only synchronization primitive available
 * inside the scheduler: every mutation of scheduler state happens with
 * interrupts off, and the blocking operations are entered with interrupts
 * off and restore the caller's level on return.
 *
 * This module is the scheduler's view of that primitive. It wraps the
 * architecture layer's interrupt flag (the real flag on bare metal, a
 * simulated one on hosted builds) and adds two pieces of software state
 * the hardware does not track:
 *
 * - whether the CPU is currently inside an external interrupt handler,
 *   which is what makes `yield_on_return` legal and direct yielding not;
 * - the yield-on-return flag itself, set by the tick handler when the
 *   current time slice expires and honored at the interrupt-return
 *   boundary (see timer::interrupt_tick).
 */

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch;

/// Interrupt state of the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Interrupts disabled.
    Off,
    /// Interrupts enabled.
    On,
}

/// True while the CPU is running an external interrupt handler.
static IN_EXTERNAL_HANDLER: AtomicBool = AtomicBool::new(false);

/// Set from interrupt context to request a yield once the handler returns.
static YIELD_ON_RETURN: AtomicBool = AtomicBool::new(false);

/// Get the current interrupt level.
pub fn get_level() -> Level {
    if arch::interrupts_enabled() {
        Level::On
    } else {
        Level::Off
    }
}

/// Disable interrupts and return the previous level.
pub fn disable() -> Level {
    let old = get_level();
    arch::disable_interrupts();
    old
}

/// Enable interrupts and return the previous level.
///
/// Enabling interrupts inside an external handler would allow nested
/// preemption of the handler, which the kernel does not support.
pub fn enable() -> Level {
    assert!(
        !is_external_handler(),
        "interrupts enabled inside an interrupt handler"
    );
    let old = get_level();
    arch::enable_interrupts();
    old
}

/// Restore a previously saved interrupt level.
pub fn set_level(level: Level) -> Level {
    match level {
        Level::On => enable(),
        Level::Off => disable(),
    }
}

/// Run `f` with interrupts disabled, restoring the previous level after.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let old = disable();
    let result = f();
    set_level(old);
    result
}

/// True when running in external interrupt (handler) context.
pub fn is_external_handler() -> bool {
    IN_EXTERNAL_HANDLER.load(Ordering::SeqCst)
}

/// Request a yield when the current interrupt handler returns.
///
/// Handlers may not call into the scheduler's switching paths directly;
/// this flag defers the preemption to the interrupt-return boundary.
pub fn yield_on_return() {
    assert!(
        is_external_handler(),
        "yield_on_return outside interrupt context"
    );
    YIELD_ON_RETURN.store(true, Ordering::SeqCst);
}

/// Mark entry into an external interrupt handler.
pub(crate) fn enter_external_handler() {
    let nested = IN_EXTERNAL_HANDLER.swap(true, Ordering::SeqCst);
    assert!(!nested, "nested external interrupt handler");
}

/// Mark exit from an external interrupt handler.
///
/// Returns true if a yield was requested during the handler; the caller
/// performs it at the interrupt-return boundary.
pub(crate) fn leave_external_handler() -> bool {
    IN_EXTERNAL_HANDLER.store(false, Ordering::SeqCst);
    YIELD_ON_RETURN.swap(false, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Single test so the global interrupt flag is not contended by the
    // parallel test runner.
    #[test]
    fn level_save_restore() {
        let initial = get_level();

        disable();
        assert_eq!(get_level(), Level::Off);
        let old = enable();
        assert_eq!(old, Level::Off);
        assert_eq!(get_level(), Level::On);

        let result = without_interrupts(|| {
            assert_eq!(get_level(), Level::Off);
            // Nesting keeps interrupts off and restores to off.
            without_interrupts(|| assert_eq!(get_level(), Level::Off));
            assert_eq!(get_level(), Level::Off);
            42
        });
        assert_eq!(result, 42);
        assert_eq!(get_level(), Level::On);

        enter_external_handler();
        assert!(is_external_handler());
        yield_on_return();
        assert!(leave_external_handler());
        assert!(!is_external_handler());
        // Flag is consumed by leave_external_handler.
        enter_external_handler();
        assert!(!leave_external_handler());

        set_level(initial);
    }
}
