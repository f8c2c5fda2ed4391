/*
 * x86_64 Architecture Support
 *
 * Submodules:
 * - interrupts: the interrupt flag (hardware RFLAGS.IF on bare metal, a
 *   simulated flag on hosted builds)
 * - context: stack switching and first-run stack preparation
 *
 * The interrupt flag and the context switch are the only two services the
 * scheduler needs from the architecture; everything else (GDT, IDT, the
 * timer device itself) belongs to the kernel binary.
 */

pub mod context;
pub mod interrupts;

pub use interrupts::{disable_interrupts, enable_interrupts, interrupts_enabled};

/// Wait until the next timer interrupt has been delivered.
///
/// Called by the idle thread with interrupts disabled. On bare metal this
/// is the canonical `sti; hlt` pair: `sti` takes effect after the
/// following instruction, so no interrupt can slip in between enabling
/// and halting. On hosted builds there is no hardware timer, so waiting
/// for the next interrupt *is* delivering the next tick; the idle thread
/// becomes the platform's clock source.
pub fn wait_for_interrupt() {
    #[cfg(target_os = "none")]
    {
        x86_64::instructions::interrupts::enable_and_hlt();
    }
    #[cfg(not(target_os = "none"))]
    {
        crate::interrupt::enable();
        crate::timer::interrupt_tick();
    }
}
