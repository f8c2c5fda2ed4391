/*
 * Scheduling Policy Trait
 *
 * Separates policy from mechanism: the mechanism (scheduler.rs) owns the
 * thread slab, the state machine and the context switch; a policy owns
 * only the ready structures and decides who runs next. The discipline is
 * chosen once at boot and held as a Box<dyn SchedPolicy>; nothing outside
 * this trait knows which one is active.
 *
 * Policies never touch the global scheduler state; they receive the
 * thread table explicitly, which keeps them testable in isolation.
 */

use crate::fixed_point::Fixed;

use super::list::{Slot, ThreadList};
use super::thread::ThreadTable;

pub(crate) trait SchedPolicy: Send {
    /// Policy name for logs.
    fn name(&self) -> &'static str;

    /// A thread became READY; add it to the ready structure.
    fn enqueue(&mut self, threads: &mut ThreadTable, slot: Slot);

    /// Remove and return the next thread to run, or None if the ready
    /// structure is empty. The mechanism falls back to the idle thread.
    fn pick_next(&mut self, threads: &mut ThreadTable) -> Option<Slot>;

    /// A READY thread's effective priority changed (priority donation);
    /// restore the ready structure's ordering.
    fn reposition(&mut self, threads: &mut ThreadTable, slot: Slot);

    /// Number of threads currently ready to run.
    fn ready_count(&self) -> usize;

    /// Once-per-second recomputation, driven by the tick handler while it
    /// runs in interrupt context. `running` is the current thread.
    fn on_second(
        &mut self,
        threads: &mut ThreadTable,
        all_list: &ThreadList,
        running: Slot,
        idle: Option<Slot>,
        load_avg: &mut Fixed,
    );
}
