/*
 * Scheduler Mechanism
 *
 * The Scheduler struct owns all scheduler state: the thread slab, the
 * all-threads and sleep lists, the active policy, and the registries for
 * the synchronization primitives (their waiter lists thread through the
 * same embedded links as the ready list, so they live under the same
 * lock as the thread table).
 *
 * Every method here runs with interrupts disabled under the scheduler
 * singleton lock (see the with_scheduler helpers in mod.rs). The context
 * switch itself happens outside the lock: plan_switch() computes a
 * SwitchPlan while locked, mod.rs performs the switch unlocked (still
 * with interrupts off), and whichever thread resumes calls
 * finish_switch() to complete it.
 */

use alloc::boxed::Box;

use crate::fixed_point::Fixed;
use crate::interrupt;
use crate::palloc;
use crate::sync::{LockTable, SemaId, SemaRecord, SemaTable};
use crate::timer::TIMER_FREQ;
use crate::arch;

use super::list::{LinkField, Slot, ThreadList};
use super::policies::{MlfqPolicy, PriorityPolicy};
use super::thread::{
    BlockedReason, CreateError, Thread, ThreadFunc, ThreadId, ThreadStatus, ThreadTable,
    PRI_DEFAULT, PRI_MAX, PRI_MIN, STACK_CANARY,
};
use super::traits::SchedPolicy;
use super::{current_slot, set_current_slot, Discipline, TIME_SLICE};

/// Aggregate scheduler counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerStats {
    pub idle_ticks: u64,
    pub kernel_ticks: u64,
    pub context_switches: u64,
}

/// Instructions for the caller of plan_switch().
pub(crate) enum SwitchPlan {
    /// Switch stacks. `prev_cell` points at the outgoing descriptor's
    /// saved-stack field; it stays valid because interrupts remain off
    /// and nothing touches the slab until the switch writes through it.
    Switch {
        prev: Slot,
        prev_cell: *mut usize,
        next_sp: usize,
    },
    /// The current thread keeps the CPU.
    Stay,
}

pub(crate) struct Scheduler {
    pub(crate) threads: ThreadTable,
    pub(crate) all_list: ThreadList,
    sleepers: ThreadList,

    policy: Box<dyn SchedPolicy>,
    pub(crate) discipline: Discipline,

    pub(crate) semaphores: SemaTable,
    pub(crate) locks: LockTable,

    pub(crate) idle: Option<Slot>,
    initial: Slot,

    pub(crate) load_avg: Fixed,
    /// Ticks since the last involuntary yield; reset on every switch.
    thread_ticks: u32,
    next_tid: usize,

    idle_ticks: u64,
    kernel_ticks: u64,
    context_switches: u64,
}

/// Wake time of a thread on the sleep list.
fn wakeup_of(thread: &Thread) -> i64 {
    match thread.blocked {
        BlockedReason::Sleeping { wakeup_tick } => wakeup_tick,
        _ => unreachable!("sleep list holds a thread that is not sleeping"),
    }
}

impl Scheduler {
    /// Build the scheduler and adopt the running code as the initial
    /// thread. The initial thread's stack predates the scheduler, so it
    /// has no stack page and is never reaped.
    pub(crate) fn new(discipline: Discipline) -> Scheduler {
        let policy: Box<dyn SchedPolicy> = match discipline {
            Discipline::Priority => Box::new(PriorityPolicy::new()),
            Discipline::Mlfq => Box::new(MlfqPolicy::new()),
        };
        log::info!("scheduler using the {} policy", policy.name());

        let mut scheduler = Scheduler {
            threads: ThreadTable::new(),
            all_list: ThreadList::new(LinkField::All),
            sleepers: ThreadList::new(LinkField::Elem),
            policy,
            discipline,
            semaphores: SemaTable::new(),
            locks: LockTable::new(),
            idle: None,
            initial: 0,
            load_avg: Fixed::ZERO,
            thread_ticks: 0,
            next_tid: 1,
            idle_ticks: 0,
            kernel_ticks: 0,
            context_switches: 0,
        };

        let tid = scheduler.allocate_tid();
        let mut main_thread = Thread::new(tid, "main", PRI_DEFAULT);
        main_thread.status = ThreadStatus::Running;
        let slot = scheduler.threads.insert(main_thread);
        scheduler.all_list.push_back(&mut scheduler.threads, slot);
        scheduler.initial = slot;
        scheduler
    }

    pub(crate) fn initial_slot(&self) -> Slot {
        self.initial
    }

    fn allocate_tid(&mut self) -> ThreadId {
        let tid = ThreadId(self.next_tid);
        self.next_tid += 1;
        tid
    }

    /// Create a new thread: stack page, forged first-run frames,
    /// descriptor inheriting the creator's recent_cpu and nice, then
    /// unblock it into the ready structure.
    ///
    /// Returns the new tid plus whether the creator must yield (priority
    /// discipline, new thread outranks the creator). The caller performs
    /// the yield after releasing the scheduler lock.
    pub(crate) fn create_thread(
        &mut self,
        name: &str,
        priority: i32,
        function: ThreadFunc,
        aux: usize,
    ) -> Result<(ThreadId, bool), CreateError> {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "thread priority {} out of range",
            priority
        );

        let page = palloc::alloc_zeroed_page().ok_or(CreateError::OutOfPages)?;
        unsafe { (page.base() as *mut usize).write(STACK_CANARY) };
        let stack = unsafe { arch::context::prepare_stack(page.top(), function, aux) };

        let creator = self.threads.get(current_slot());
        let creator_effective = creator.effective_priority();
        let inherited_nice = creator.nice;
        let inherited_recent_cpu = creator.recent_cpu;

        let tid = self.allocate_tid();
        let mut thread = Thread::new(tid, name, priority);
        thread.stack = stack;
        thread.stack_page = Some(page);
        thread.nice = inherited_nice;
        thread.recent_cpu = inherited_recent_cpu;

        let slot = self.threads.insert(thread);
        self.all_list.push_back(&mut self.threads, slot);
        self.unblock_slot(slot);
        log::debug!("created {} '{}' with priority {}", tid, name, priority);

        let preempt = self.discipline == Discipline::Priority && priority > creator_effective;
        Ok((tid, preempt))
    }

    /// Transition a blocked thread to READY and enqueue it. Does not
    /// preempt; preemption policy is the caller's business.
    pub(crate) fn unblock_slot(&mut self, slot: Slot) {
        assert_eq!(
            self.threads.get(slot).status,
            ThreadStatus::Blocked,
            "unblocking a thread that is not blocked"
        );
        {
            let Scheduler {
                policy, threads, ..
            } = self;
            policy.enqueue(threads, slot);
        }
        let thread = self.threads.get_mut(slot);
        thread.status = ThreadStatus::Ready;
        thread.blocked = BlockedReason::Unknown;
    }

    /// Re-enqueue the current thread (the idle thread is never enqueued)
    /// and mark it READY ahead of a scheduling decision.
    pub(crate) fn prepare_yield(&mut self) {
        let cur = current_slot();
        if Some(cur) != self.idle {
            let Scheduler {
                policy, threads, ..
            } = self;
            policy.enqueue(threads, cur);
        }
        self.threads.get_mut(cur).status = ThreadStatus::Ready;
    }

    /// Block the current thread until `wakeup_tick`, keeping the sleep
    /// list sorted by ascending wake time. The idle thread never sleeps
    /// on the list; it is the fallback the scheduler needs available.
    pub(crate) fn sleep_current(&mut self, wakeup_tick: i64) {
        let cur = current_slot();
        {
            let thread = self.threads.get_mut(cur);
            thread.status = ThreadStatus::Blocked;
            thread.blocked = BlockedReason::Sleeping { wakeup_tick };
        }
        if Some(cur) != self.idle {
            let Scheduler {
                sleepers, threads, ..
            } = self;
            sleepers.insert_ordered(threads, cur, |a, b| wakeup_of(a) < wakeup_of(b));
        }
    }

    /// Pop and wake every sleeper whose wake time has arrived. The list
    /// is sorted, so the walk stops at the first unexpired entry.
    fn wake_sleepers(&mut self, now: i64) {
        while let Some(head) = self.sleepers.front() {
            if wakeup_of(self.threads.get(head)) > now {
                break;
            }
            // Pop before unblocking: the general link is about to be
            // reused by the ready structure.
            {
                let Scheduler {
                    sleepers, threads, ..
                } = self;
                sleepers.pop_front(threads);
            }
            self.unblock_slot(head);
        }
    }

    /// Per-tick bookkeeping, run in interrupt context: statistics, the
    /// running thread's recent_cpu, the MLFQ per-second work, sleeper
    /// wakeups, and the time-slice preemption request.
    pub(crate) fn tick(&mut self, now: i64) {
        let cur = current_slot();

        if Some(cur) == self.idle {
            self.idle_ticks += 1;
        } else {
            self.kernel_ticks += 1;
            let thread = self.threads.get_mut(cur);
            thread.recent_cpu = thread.recent_cpu + Fixed::from_int(1);
        }

        if self.discipline == Discipline::Mlfq && now % TIMER_FREQ == 0 {
            let Scheduler {
                policy,
                threads,
                all_list,
                idle,
                load_avg,
                ..
            } = self;
            policy.on_second(threads, all_list, cur, *idle, load_avg);
        }

        self.wake_sleepers(now);

        self.thread_ticks += 1;
        if self.thread_ticks >= TIME_SLICE {
            interrupt::yield_on_return();
        }
    }

    /// Choose the next thread and stage the context switch. The caller
    /// has already moved the current thread out of RUNNING.
    pub(crate) fn plan_switch(&mut self) -> SwitchPlan {
        let cur = current_slot();
        assert_ne!(
            self.threads.get(cur).status,
            ThreadStatus::Running,
            "schedule() while the current thread is still RUNNING"
        );
        self.threads.get(cur).check_stack_canary();

        let picked = {
            let Scheduler {
                policy, threads, ..
            } = self;
            policy.pick_next(threads)
        };
        let next = picked.unwrap_or_else(|| self.idle.expect("nothing to run and no idle thread"));
        if next == cur {
            return SwitchPlan::Stay;
        }

        self.threads.get(next).check_stack_canary();
        self.context_switches += 1;
        set_current_slot(next);
        let next_sp = self.threads.get(next).stack;
        let prev_cell = &mut self.threads.get_mut(cur).stack as *mut usize;
        SwitchPlan::Switch {
            prev: cur,
            prev_cell,
            next_sp,
        }
    }

    /// Complete a switch on the incoming thread's side: mark it RUNNING,
    /// start a fresh time slice, and reap the previous thread if it was
    /// dying. Reaping must happen here, by the successor, because the dying
    /// thread was still executing on its stack until the switch.
    pub(crate) fn finish_switch(&mut self, prev: Option<Slot>) {
        assert_eq!(
            interrupt::get_level(),
            interrupt::Level::Off,
            "schedule_tail with interrupts enabled"
        );
        let cur = current_slot();
        self.threads.get_mut(cur).status = ThreadStatus::Running;
        self.thread_ticks = 0;

        if let Some(prev) = prev {
            if prev != cur
                && self.threads.get(prev).status == ThreadStatus::Dying
                && prev != self.initial
            {
                let mut dead = self.threads.remove(prev);
                debug_assert!(
                    !dead.elem.is_linked() && !dead.allelem.is_linked() && !dead.mlfq_elem.is_linked(),
                    "dying thread still on a list"
                );
                if let Some(page) = dead.stack_page.take() {
                    palloc::free_page(page);
                }
                log::debug!("reaped {}", dead.tid);
            }
        }
    }

    /// Remove the current thread from the all-threads list and mark it
    /// dying, ahead of its final schedule().
    pub(crate) fn prepare_exit(&mut self) {
        let cur = current_slot();
        log::debug!("{} exiting", self.threads.get(cur).tid);
        self.all_list.remove(&mut self.threads, cur);
        self.threads.get_mut(cur).status = ThreadStatus::Dying;
    }

    // ========================================================================
    // PRIORITY DONATION
    // ========================================================================

    /// Donate `priority` to `receiver`, propagating through chains of
    /// lock holders: while the receiver is itself waiting on a lock, the
    /// lock's holder receives the donation too. Termination holds because
    /// the lock layer forbids waiting on a lock the waiter holds, so the
    /// chain cannot cycle.
    pub(crate) fn donate(&mut self, receiver: Slot, priority: i32) {
        self.receive_donation(receiver, priority);
        let mut link = receiver;
        loop {
            let thread = self.threads.get(link);
            let holder = match (thread.status, thread.blocked) {
                (ThreadStatus::Blocked, BlockedReason::WaitingOnLock { lock }) => self
                    .locks
                    .get(lock)
                    .holder
                    .expect("a waited-on lock has no holder"),
                _ => break,
            };
            self.receive_donation(holder, priority);
            link = holder;
        }
    }

    /// One step of donation: raise the receiver's donated priority if the
    /// offer beats it, and re-sort the ready structure if the receiver is
    /// sitting in it.
    fn receive_donation(&mut self, slot: Slot, priority: i32) {
        let needs_reposition = {
            let thread = self.threads.get_mut(slot);
            if priority > thread.donated_priority {
                thread.donated_priority = priority;
                thread.status == ThreadStatus::Ready
            } else {
                false
            }
        };
        if needs_reposition {
            let Scheduler {
                policy, threads, ..
            } = self;
            policy.reposition(threads, slot);
        }
    }

    /// Recompute a thread's donated priority from scratch: the maximum
    /// effective priority over the waiters of every lock it still holds,
    /// zero if none.
    pub(crate) fn calculate_donated_priority(&self, slot: Slot) -> i32 {
        let mut max = 0;
        for &lock_id in &self.threads.get(slot).owned_locks {
            let sema = self.locks.get(lock_id).sema;
            for waiter in self.semaphores.get(sema).waiters.iter(&self.threads) {
                let effective = self.threads.get(waiter).effective_priority();
                if effective > max {
                    max = effective;
                }
            }
        }
        max
    }

    // ========================================================================
    // SEMAPHORE SUPPORT (waiter lists share the thread table's links)
    // ========================================================================

    /// Register a fresh semaphore record.
    pub(crate) fn sema_create(&mut self, value: u32) -> SemaId {
        self.semaphores.insert(SemaRecord {
            value,
            waiters: ThreadList::new(LinkField::Elem),
        })
    }

    /// Put the current thread on a semaphore's waiter list, ordered by
    /// effective priority so the strongest waiter sits in front.
    pub(crate) fn sema_wait_insert(&mut self, sema: SemaId) {
        let cur = current_slot();
        let Scheduler {
            semaphores,
            threads,
            ..
        } = self;
        semaphores.get_mut(sema).waiters.insert_ordered(threads, cur, |a, b| {
            a.effective_priority() > b.effective_priority()
        });
    }

    /// Wake the highest-effective-priority waiter, if any. The list was
    /// inserted in priority order, but donations received after insertion
    /// can reorder effective priorities, so scan rather than trust the
    /// head.
    pub(crate) fn sema_wake_highest(&mut self, sema: SemaId) -> Option<Slot> {
        let best = {
            let mut best: Option<(Slot, i32)> = None;
            for slot in self.semaphores.get(sema).waiters.iter(&self.threads) {
                let effective = self.threads.get(slot).effective_priority();
                match best {
                    Some((_, top)) if top >= effective => {}
                    _ => best = Some((slot, effective)),
                }
            }
            best.map(|(slot, _)| slot)
        };
        let slot = best?;
        {
            let Scheduler {
                semaphores,
                threads,
                ..
            } = self;
            semaphores.get_mut(sema).waiters.remove(threads, slot);
        }
        self.unblock_slot(slot);
        Some(slot)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub(crate) fn effective_priority(&self, slot: Slot) -> i32 {
        self.threads.get(slot).effective_priority()
    }

    pub(crate) fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            idle_ticks: self.idle_ticks,
            kernel_ticks: self.kernel_ticks,
            context_switches: self.context_switches,
        }
    }
}
