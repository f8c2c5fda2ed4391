/*
 * Interrupt Flag Control
 *
 * Low-level access to the interrupt flag. On bare metal this is the real
 * RFLAGS.IF bit via the x86_64 crate. On hosted builds (where cli/sti are
 * privileged) the flag is simulated by an atomic, which preserves the
 * save/disable/restore discipline of the callers so the scheduler's
 * critical sections behave identically under test.
 */

#[cfg(target_os = "none")]
mod flag {
    use x86_64::instructions::interrupts;

    pub fn enabled() -> bool {
        interrupts::are_enabled()
    }

    pub fn enable() {
        interrupts::enable();
    }

    pub fn disable() {
        interrupts::disable();
    }
}

#[cfg(not(target_os = "none"))]
mod flag {
    use core::sync::atomic::{AtomicBool, Ordering};

    /// Simulated interrupt flag. Starts clear, matching the boot state.
    static INTERRUPT_FLAG: AtomicBool = AtomicBool::new(false);

    pub fn enabled() -> bool {
        INTERRUPT_FLAG.load(Ordering::SeqCst)
    }

    pub fn enable() {
        INTERRUPT_FLAG.store(true, Ordering::SeqCst);
    }

    pub fn disable() {
        INTERRUPT_FLAG.store(false, Ordering::SeqCst);
    }
}

/// Check if interrupts are enabled.
pub fn interrupts_enabled() -> bool {
    flag::enabled()
}

/// Enable interrupts globally.
pub fn enable_interrupts() {
    flag::enable();
}

/// Disable interrupts globally.
pub fn disable_interrupts() {
    flag::disable();
}
