/*
 * Synchronization Primitives
 *
 * The semaphore and the lock built on it, integrated with the scheduler's
 * priority donation. These are the primitives the donation machinery
 * exists for: a lock records its holder, a holder records its locks, and
 * a waiter records the lock it is blocked on. These are the three edges the
 * donation chain walks.
 *
 * State lives in registries owned by the scheduler singleton, addressed
 * by stable ids: waiter lists thread through the same embedded link as
 * the ready list, so they must sit under the scheduler's lock. The
 * public types here are handles over those ids; dropping a handle
 * retires its record.
 *
 * Interrupt discipline matches the scheduler's: every operation disables
 * interrupts, and the blocking ones stay disabled across the block and
 * restore the caller's level on return.
 */

use alloc::vec::Vec;

use crate::interrupt;
use crate::scheduler::list::{Slot, ThreadList};
use crate::scheduler::thread::BlockedReason;
use crate::scheduler::{
    current_slot, try_with_scheduler_mut, with_scheduler, with_scheduler_mut, Discipline,
    SchedulerManager,
};

/// Identifier of a semaphore record.
pub(crate) type SemaId = usize;
/// Identifier of a lock record; thread descriptors reference locks by it.
pub(crate) type LockId = usize;

/// Slab of synchronization records with id reuse.
pub(crate) struct Registry<T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
}

impl<T> Registry<T> {
    pub(crate) const fn new() -> Registry<T> {
        Registry {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    pub(crate) fn insert(&mut self, value: T) -> usize {
        match self.free.pop() {
            Some(id) => {
                debug_assert!(self.slots[id].is_none());
                self.slots[id] = Some(value);
                id
            }
            None => {
                self.slots.push(Some(value));
                self.slots.len() - 1
            }
        }
    }

    pub(crate) fn remove(&mut self, id: usize) -> T {
        let value = self.slots[id].take().expect("stale sync handle");
        self.free.push(id);
        value
    }

    pub(crate) fn get(&self, id: usize) -> &T {
        self.slots[id].as_ref().expect("stale sync handle")
    }

    pub(crate) fn get_mut(&mut self, id: usize) -> &mut T {
        self.slots[id].as_mut().expect("stale sync handle")
    }
}

pub(crate) struct SemaRecord {
    pub(crate) value: u32,
    /// Threads blocked on this semaphore, on their general link.
    pub(crate) waiters: ThreadList,
}

pub(crate) struct LockRecord {
    pub(crate) holder: Option<Slot>,
    pub(crate) sema: SemaId,
}

pub(crate) type SemaTable = Registry<SemaRecord>;
pub(crate) type LockTable = Registry<LockRecord>;

// ================================================================================================
// SEMAPHORE
// ================================================================================================

/// Counting semaphore.
///
/// down() blocks while the count is zero; up() wakes the
/// highest-effective-priority waiter and hands over the CPU if that
/// waiter outranks the caller.
pub struct Semaphore {
    id: SemaId,
}

impl Semaphore {
    pub fn new(value: u32) -> Semaphore {
        let id = with_scheduler_mut(|s| s.sema_create(value));
        Semaphore { id }
    }

    /// Decrement the count, blocking until it is positive.
    pub fn down(&self) {
        sema_down(self.id);
    }

    /// Decrement the count if it is positive; never blocks.
    pub fn try_down(&self) -> bool {
        with_scheduler_mut(|s| {
            let record = s.semaphores.get_mut(self.id);
            if record.value > 0 {
                record.value -= 1;
                true
            } else {
                false
            }
        })
    }

    /// Increment the count and wake one waiter. Safe from interrupt
    /// context: preemption of the caller is deferred to the interrupt
    /// return in that case.
    pub fn up(&self) {
        sema_up(self.id);
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let _ = try_with_scheduler_mut(|s| {
            let record = s.semaphores.remove(self.id);
            debug_assert!(
                record.waiters.is_empty(),
                "semaphore destroyed with blocked waiters"
            );
        });
    }
}

fn sema_down(id: SemaId) {
    assert!(
        !interrupt::is_external_handler(),
        "semaphore down in interrupt context"
    );
    let old_level = interrupt::disable();
    loop {
        let taken = with_scheduler_mut(|s| {
            if s.semaphores.get(id).value > 0 {
                s.semaphores.get_mut(id).value -= 1;
                true
            } else {
                s.sema_wait_insert(id);
                false
            }
        });
        if taken {
            break;
        }
        // Another thread may take the count between our wakeup and our
        // rescheduling, so re-check rather than assume.
        SchedulerManager::block_current();
    }
    interrupt::set_level(old_level);
}

fn sema_up(id: SemaId) {
    let old_level = interrupt::disable();
    let woken = with_scheduler_mut(|s| {
        let woken = s.sema_wake_highest(id);
        s.semaphores.get_mut(id).value += 1;
        woken.map(|slot| {
            (
                s.effective_priority(slot),
                s.effective_priority(current_slot()),
            )
        })
    });
    interrupt::set_level(old_level);

    if let Some((woken_effective, current_effective)) = woken {
        if woken_effective > current_effective {
            // unblock() does not preempt; that duty is ours. Inside a
            // handler the switch waits for the interrupt return.
            if interrupt::is_external_handler() {
                interrupt::yield_on_return();
            } else {
                SchedulerManager::yield_now();
            }
        }
    }
}

// ================================================================================================
// LOCK
// ================================================================================================

/// Mutual exclusion lock with priority donation.
///
/// While a high-priority thread waits on the lock, the holder runs at
/// the waiter's effective priority, transitively through chains of
/// holders, so no mid-priority thread can starve the critical section
/// (priority inversion).
pub struct Lock {
    id: LockId,
}

impl Lock {
    pub fn new() -> Lock {
        let id = with_scheduler_mut(|s| {
            let sema = s.sema_create(1);
            s.locks.insert(LockRecord { holder: None, sema })
        });
        Lock { id }
    }

    /// Acquire the lock, blocking until it is free. A thread may not
    /// acquire a lock it already holds; that would make the donation
    /// chain cyclic.
    pub fn acquire(&self) {
        assert!(
            !interrupt::is_external_handler(),
            "lock acquire in interrupt context"
        );
        let old_level = interrupt::disable();

        let sema = with_scheduler_mut(|s| {
            let cur = current_slot();
            let (sema, holder) = {
                let record = s.locks.get(self.id);
                (record.sema, record.holder)
            };
            assert_ne!(
                holder,
                Some(cur),
                "acquiring a lock already held by this thread"
            );
            if let Some(holder) = holder {
                // Record the wait-for edge before blocking so later
                // donations can pass through this thread, then push our
                // own priority down the chain.
                s.threads.get_mut(cur).blocked =
                    BlockedReason::WaitingOnLock { lock: self.id };
                if s.discipline == Discipline::Priority {
                    let effective = s.effective_priority(cur);
                    s.donate(holder, effective);
                }
            }
            sema
        });

        sema_down(sema);

        with_scheduler_mut(|s| {
            let cur = current_slot();
            s.threads.get_mut(cur).blocked = BlockedReason::Unknown;
            s.locks.get_mut(self.id).holder = Some(cur);
            s.threads.get_mut(cur).owned_locks.push(self.id);
        });
        interrupt::set_level(old_level);
    }

    /// Release the lock and wake the strongest waiter. The caller's
    /// donated priority is recomputed from the locks it still holds, so
    /// donations tied to this lock end here.
    pub fn release(&self) {
        let old_level = interrupt::disable();
        let sema = with_scheduler_mut(|s| {
            let cur = current_slot();
            let (sema, holder) = {
                let record = s.locks.get(self.id);
                (record.sema, record.holder)
            };
            assert_eq!(holder, Some(cur), "releasing a lock held by another thread");

            s.threads.get_mut(cur).owned_locks.retain(|&l| l != self.id);
            if s.discipline == Discipline::Priority {
                let residual = s.calculate_donated_priority(cur);
                s.threads.get_mut(cur).donated_priority = residual;
            }
            s.locks.get_mut(self.id).holder = None;
            sema
        });
        sema_up(sema);
        interrupt::set_level(old_level);
    }

    /// Whether the current thread holds this lock.
    pub fn held_by_current(&self) -> bool {
        with_scheduler(|s| s.locks.get(self.id).holder == Some(current_slot()))
    }
}

impl Default for Lock {
    fn default() -> Lock {
        Lock::new()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let _ = try_with_scheduler_mut(|s| {
            let record = s.locks.remove(self.id);
            debug_assert!(record.holder.is_none(), "lock destroyed while held");
            let sema = s.semaphores.remove(record.sema);
            debug_assert!(
                sema.waiters.is_empty(),
                "lock destroyed with blocked waiters"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_reuses_ids() {
        let mut registry: Registry<u32> = Registry::new();
        let a = registry.insert(10);
        let b = registry.insert(20);
        assert_ne!(a, b);
        assert_eq!(*registry.get(a), 10);
        assert_eq!(registry.remove(a), 10);
        let c = registry.insert(30);
        assert_eq!(c, a);
        assert_eq!(*registry.get(c), 30);
        assert_eq!(*registry.get(b), 20);
    }
}
