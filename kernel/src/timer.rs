/*
 * Timer Facility
 *
 * Tick accounting for the scheduler. The timer device itself (PIT/APIC
 * programming, EOI) lives in the kernel binary's driver layer; its ISR
 * calls interrupt_tick() once per tick. On hosted builds the idle thread
 * delivers ticks through the same entry point (see arch::x86_64).
 *
 * interrupt_tick() is also where deferred preemption happens: if the
 * scheduler requested yield-on-return during the tick, the yield runs
 * here, at the interrupt-return boundary, where it is once again legal to
 * switch threads.
 */

use core::sync::atomic::{AtomicI64, Ordering};

use crate::interrupt;
use crate::scheduler::{self, SchedulerManager};

/// Timer interrupts per second.
pub const TIMER_FREQ: i64 = 100;

/// Ticks since boot.
static TICKS: AtomicI64 = AtomicI64::new(0);

/// Number of timer ticks since boot.
pub fn ticks() -> i64 {
    TICKS.load(Ordering::SeqCst)
}

/// Number of ticks elapsed since `then`.
pub fn elapsed(then: i64) -> i64 {
    ticks() - then
}

/// Suspend the current thread for approximately `duration` ticks.
///
/// The thread is unblocked no earlier than its wake time and, with a
/// running tick stream, no later than one tick after it.
pub fn sleep(duration: i64) {
    if duration <= 0 {
        return;
    }
    assert_eq!(
        interrupt::get_level(),
        interrupt::Level::On,
        "timer::sleep with interrupts disabled"
    );
    let start = ticks();
    SchedulerManager::sleep_until(start + duration);
}

/// Timer interrupt entry point, called once per tick by the timer ISR.
pub fn interrupt_tick() {
    let old_level = interrupt::disable();
    interrupt::enter_external_handler();

    TICKS.fetch_add(1, Ordering::SeqCst);
    scheduler::tick(ticks());

    let wants_yield = interrupt::leave_external_handler();
    if wants_yield {
        // The time slice expired during the handler. The handler itself
        // may not switch; the boundary we are on now can.
        SchedulerManager::yield_now();
    }
    interrupt::set_level(old_level);
}
