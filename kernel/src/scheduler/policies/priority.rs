/*
 * Strict Priority Policy
 *
 * One ready list, ordered by effective priority descending. The head is
 * always the highest-priority ready thread, so pick_next is a pop. Ties
 * keep insertion order: among equals, the thread that has been ready
 * longest runs first, which gives round-robin behavior between
 * equal-priority threads that yield.
 *
 * Priority donation can raise a ready thread's effective priority after
 * it was inserted; reposition() re-sorts it by removing and re-inserting.
 */

use crate::fixed_point::Fixed;

use super::super::list::{LinkField, Slot, ThreadList};
use super::super::thread::{Thread, ThreadTable};
use super::super::traits::SchedPolicy;

pub(crate) struct PriorityPolicy {
    ready: ThreadList,
}

impl PriorityPolicy {
    pub(crate) fn new() -> PriorityPolicy {
        PriorityPolicy {
            ready: ThreadList::new(LinkField::Elem),
        }
    }
}

/// Higher effective priority first; equal priorities keep insertion order.
fn higher_priority(a: &Thread, b: &Thread) -> bool {
    a.effective_priority() > b.effective_priority()
}

impl SchedPolicy for PriorityPolicy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn enqueue(&mut self, threads: &mut ThreadTable, slot: Slot) {
        self.ready.insert_ordered(threads, slot, higher_priority);
    }

    fn pick_next(&mut self, threads: &mut ThreadTable) -> Option<Slot> {
        self.ready.pop_front(threads)
    }

    fn reposition(&mut self, threads: &mut ThreadTable, slot: Slot) {
        self.ready.remove(threads, slot);
        self.ready.insert_ordered(threads, slot, higher_priority);
    }

    fn ready_count(&self) -> usize {
        self.ready.len()
    }

    fn on_second(
        &mut self,
        _threads: &mut ThreadTable,
        _all_list: &ThreadList,
        _running: Slot,
        _idle: Option<Slot>,
        _load_avg: &mut Fixed,
    ) {
        // The priority discipline has no periodic recomputation.
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::thread::ThreadId;
    use super::*;

    fn policy_with(priorities: &[i32]) -> (PriorityPolicy, ThreadTable, alloc::vec::Vec<Slot>) {
        let mut table = ThreadTable::new();
        let mut policy = PriorityPolicy::new();
        let slots: alloc::vec::Vec<Slot> = priorities
            .iter()
            .enumerate()
            .map(|(i, &p)| table.insert(Thread::new(ThreadId(i + 1), "t", p)))
            .collect();
        for &s in &slots {
            policy.enqueue(&mut table, s);
        }
        (policy, table, slots)
    }

    #[test]
    fn picks_highest_priority_first() {
        let (mut policy, mut table, slots) = policy_with(&[20, 30, 25]);
        assert_eq!(policy.ready_count(), 3);
        assert_eq!(policy.pick_next(&mut table), Some(slots[1]));
        assert_eq!(policy.pick_next(&mut table), Some(slots[2]));
        assert_eq!(policy.pick_next(&mut table), Some(slots[0]));
        assert_eq!(policy.pick_next(&mut table), None);
    }

    #[test]
    fn equal_priorities_run_in_arrival_order() {
        let (mut policy, mut table, slots) = policy_with(&[20, 20, 20]);
        assert_eq!(policy.pick_next(&mut table), Some(slots[0]));
        assert_eq!(policy.pick_next(&mut table), Some(slots[1]));
        assert_eq!(policy.pick_next(&mut table), Some(slots[2]));
    }

    #[test]
    fn donation_reposition_reorders_ready_thread() {
        let (mut policy, mut table, slots) = policy_with(&[10, 20]);
        table.get_mut(slots[0]).donated_priority = 30;
        policy.reposition(&mut table, slots[0]);
        assert_eq!(policy.pick_next(&mut table), Some(slots[0]));
        assert_eq!(policy.pick_next(&mut table), Some(slots[1]));
    }
}
