/*
 * Multi-Level Feedback Queue Policy
 *
 * One FIFO queue per priority level plus an aggregate size counter. A
 * thread is enqueued at the priority its formula yields at insertion
 * time; between the per-second recomputations the queue index may lag
 * the formula, and the recomputation reconciles it by moving threads to
 * their new queues (appended at the tail).
 *
 * Formula, evaluated in 17.14 fixed point:
 *
 *   priority  = clamp(PRI_MAX - round(recent_cpu / 4) - 2 * nice, 0, PRI_MAX)
 *   load_avg  = (59/60) * load_avg + (1/60) * ready_threads    (per second)
 *   recent_cpu = (2*load_avg / (2*load_avg + 1)) * recent_cpu + nice
 *                                                              (per second)
 *
 * recent_cpu additionally gains one unit per tick while the thread runs;
 * that part is the mechanism's job (scheduler.rs), since it happens in
 * both disciplines.
 */

use crate::fixed_point::Fixed;

use super::super::list::{LinkField, Slot, ThreadList};
use super::super::thread::{Thread, ThreadTable, PRI_MAX, PRI_MIN};
use super::super::traits::SchedPolicy;

const QUEUE_COUNT: usize = (PRI_MAX - PRI_MIN + 1) as usize;

pub(crate) struct MlfqPolicy {
    queues: [ThreadList; QUEUE_COUNT],
    /// Total threads across all queues.
    size: usize,
}

impl MlfqPolicy {
    pub(crate) fn new() -> MlfqPolicy {
        MlfqPolicy {
            queues: [ThreadList::new(LinkField::Mlfq); QUEUE_COUNT],
            size: 0,
        }
    }
}

/// The dynamic priority formula.
pub(crate) fn mlfq_priority(thread: &Thread) -> i32 {
    let unbound =
        PRI_MAX - thread.recent_cpu().div_int(4).to_int_round() - thread.nice() * 2;
    unbound.clamp(PRI_MIN, PRI_MAX)
}

impl SchedPolicy for MlfqPolicy {
    fn name(&self) -> &'static str {
        "mlfqs"
    }

    fn enqueue(&mut self, threads: &mut ThreadTable, slot: Slot) {
        let priority = mlfq_priority(threads.get(slot)) as usize;
        self.queues[priority].push_back(threads, slot);
        self.size += 1;
    }

    fn pick_next(&mut self, threads: &mut ThreadTable) -> Option<Slot> {
        if self.size == 0 {
            return None;
        }
        for queue in self.queues.iter_mut().rev() {
            if let Some(slot) = queue.pop_front(threads) {
                self.size -= 1;
                return Some(slot);
            }
        }
        unreachable!("mlfq size counter disagrees with the queues");
    }

    fn reposition(&mut self, _threads: &mut ThreadTable, _slot: Slot) {
        // Queue position is authority between recomputations; donation is
        // a priority-discipline concept.
    }

    fn ready_count(&self) -> usize {
        self.size
    }

    fn on_second(
        &mut self,
        threads: &mut ThreadTable,
        all_list: &ThreadList,
        running: Slot,
        idle: Option<Slot>,
        load_avg: &mut Fixed,
    ) {
        // Load average over the number of runnable threads. The running
        // thread counts unless it is the idle thread.
        let mut ready_threads = self.size as i32;
        if Some(running) != idle {
            ready_threads += 1;
        }
        *load_avg = Fixed::from_ratio(59, 60) * *load_avg
            + Fixed::from_ratio(1, 60) * Fixed::from_int(ready_threads);

        // Decay every live thread's recent_cpu toward its nice value.
        let twice_load = load_avg.mul_int(2);
        let decay = twice_load / (twice_load + Fixed::from_int(1));
        let mut cursor = all_list.front();
        while let Some(slot) = cursor {
            cursor = all_list.next_of(threads, slot);
            if Some(slot) == idle {
                continue;
            }
            let thread = threads.get_mut(slot);
            thread.recent_cpu = decay * thread.recent_cpu + Fixed::from_int(thread.nice);
        }

        // Reconcile queue positions with the recomputed priorities.
        for index in 0..QUEUE_COUNT {
            let mut cursor = self.queues[index].front();
            while let Some(slot) = cursor {
                cursor = self.queues[index].next_of(threads, slot);
                let new_priority = mlfq_priority(threads.get(slot)) as usize;
                if new_priority != index {
                    self.queues[index].remove(threads, slot);
                    self.queues[new_priority].push_back(threads, slot);
                }
            }
        }
    }
}
