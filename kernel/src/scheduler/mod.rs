/*
 * Preemptive Thread Scheduler
 *
 * Public API layer of the scheduler subsystem. The module is organized
 * the same way the state is:
 *
 * - scheduler.rs: the mechanism (thread slab, state machine, context
 *   switch staging, donation, sleep queue)
 * - traits.rs + policies/: the scheduling disciplines behind the
 *   SchedPolicy trait, chosen once at boot
 * - thread.rs: descriptors and the thread slab
 * - list.rs: the intrusive lists everything is queued on
 *
 * This file owns the globals (the scheduler singleton, the current
 * thread, the started flag), the interrupt-safe access helpers, and the
 * two ZST managers that namespace the public operations: ThreadManager
 * for lifecycle and per-thread attributes, SchedulerManager for
 * scheduling control.
 *
 * LOCKING DISCIPLINE:
 *
 * All scheduler state is behind one spin lock, and the lock is only ever
 * taken with interrupts disabled, so the tick handler can never land on
 * top of a held lock. The lock is never held across a context switch;
 * schedule() stages the switch under the lock, performs it outside, and
 * the resumed side re-locks to finish.
 */

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch;
use crate::interrupt;

pub(crate) mod list;
mod scheduler;
pub(crate) mod thread;
pub(crate) mod traits;
pub(crate) mod policies;

pub use self::scheduler::SchedulerStats;
pub use self::thread::{
    CreateError, Thread, ThreadFunc, ThreadId, ThreadStatus, NAME_MAX, NICE_MAX, NICE_MIN,
    PRI_DEFAULT, PRI_MAX, PRI_MIN,
};

pub(crate) use self::list::Slot;
pub(crate) use self::scheduler::{Scheduler, SwitchPlan};

/// Scheduling quantum: ticks a thread may run before preemption.
pub const TIME_SLICE: u32 = 4;

/// Scheduling discipline, fixed at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discipline {
    /// Strict priority scheduling with priority donation.
    #[default]
    Priority,
    /// Multi-level feedback queue scheduling.
    Mlfq,
}

impl Discipline {
    /// Read the discipline from the kernel command line: the option pair
    /// `-o mlfqs` selects MLFQ, its absence the priority scheduler.
    pub fn from_boot_args(args: &str) -> Discipline {
        let mut prev_was_option = false;
        for token in args.split_whitespace() {
            if prev_was_option && token == "mlfqs" {
                return Discipline::Mlfq;
            }
            prev_was_option = token == "-o";
        }
        Discipline::Priority
    }
}

// ================================================================================================
// GLOBAL STATE
// ================================================================================================

/// The scheduler singleton. Explicitly initialized at boot; never taken
/// without interrupts disabled.
static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);

/// Slot of the running thread, updated in the switch path. This replaces
/// the locate-by-stack-pointer trick: a single CPU has a single current
/// thread, and the switch path is the only writer.
static CURRENT_THREAD: AtomicUsize = AtomicUsize::new(0);

/// Set once start() has spawned the idle thread and enabled preemption.
static SCHEDULER_STARTED: AtomicBool = AtomicBool::new(false);

pub(crate) fn current_slot() -> Slot {
    CURRENT_THREAD.load(Ordering::SeqCst)
}

pub(crate) fn set_current_slot(slot: Slot) {
    CURRENT_THREAD.store(slot, Ordering::SeqCst);
}

/// Run `f` with shared access to the scheduler, interrupts disabled.
///
/// Panics if the scheduler has not been initialized.
pub(crate) fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&Scheduler) -> R,
{
    interrupt::without_interrupts(|| {
        let guard = SCHEDULER.lock();
        f(guard.as_ref().expect("scheduler not initialized"))
    })
}

/// Run `f` with exclusive access to the scheduler, interrupts disabled.
///
/// Panics if the scheduler has not been initialized.
pub(crate) fn with_scheduler_mut<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler) -> R,
{
    interrupt::without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        f(guard.as_mut().expect("scheduler not initialized"))
    })
}

/// Like with_scheduler_mut, but a no-op before initialization. For
/// callers that can legitimately run early (tick handler, Drop impls).
pub(crate) fn try_with_scheduler_mut<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&mut Scheduler) -> R,
{
    interrupt::without_interrupts(|| SCHEDULER.lock().as_mut().map(f))
}

// ================================================================================================
// CONTEXT SWITCH DRIVER
// ================================================================================================

/// Pick the next thread and switch to it. On entry interrupts are off
/// and the current thread has already left RUNNING (its caller moved it
/// to READY, BLOCKED, or DYING).
pub(crate) fn schedule() {
    assert_eq!(
        interrupt::get_level(),
        interrupt::Level::Off,
        "schedule() with interrupts enabled"
    );
    let plan = with_scheduler_mut(|s| s.plan_switch());
    match plan {
        SwitchPlan::Switch {
            prev,
            prev_cell,
            next_sp,
        } => {
            // The lock is released but interrupts stay off, so the plan's
            // pointer into the slab cannot be invalidated before the
            // switch writes through it.
            let previous = unsafe { arch::context::switch_threads(prev_cell, next_sp, prev) };
            schedule_tail(Some(previous));
        }
        SwitchPlan::Stay => schedule_tail(None),
    }
}

/// Completion half of a switch, run by the incoming thread.
fn schedule_tail(prev: Option<Slot>) {
    with_scheduler_mut(|s| s.finish_switch(prev));
}

/// Entered from the switch trampoline the first time a thread runs.
pub(crate) extern "C" fn schedule_tail_entry(prev: usize) {
    schedule_tail(Some(prev));
}

/// Common stem of every kernel thread: the switch path left interrupts
/// off, so turn them on, run the thread's function, and exit if it
/// returns.
pub(crate) extern "C" fn kernel_thread_entry(function: usize, aux: usize) -> ! {
    let function: ThreadFunc = unsafe { core::mem::transmute(function) };
    interrupt::enable();
    function(aux);
    ThreadManager::exit();
}

/// Per-tick scheduler work, called from the timer interrupt path.
pub(crate) fn tick(now: i64) {
    // Before initialization there is nothing to account.
    let _ = try_with_scheduler_mut(|s| s.tick(now));
}

/// Idle thread: scheduled only when nothing else is ready. Blocks itself
/// on every pass and sleeps the CPU until the next interrupt, so a woken
/// thread gets the CPU within one pass of this loop.
fn idle_thread_main(_aux: usize) {
    log::debug!("idle thread running");
    loop {
        interrupt::disable();
        SchedulerManager::block_current();
        arch::wait_for_interrupt();
    }
}

// ================================================================================================
// THREAD MANAGER
// ================================================================================================

/// Thread lifecycle and per-thread attributes.
///
/// A Zero-Sized Type grouping the thread-facing operations under one
/// namespace; all methods act through the scheduler singleton.
pub struct ThreadManager;

impl ThreadManager {
    /// Create a kernel thread running `function(aux)` at `priority`.
    ///
    /// The new thread inherits the creator's nice and recent_cpu. It may
    /// run (and even exit) before this returns: under the priority
    /// discipline a creator that just produced a higher-priority thread
    /// yields immediately.
    pub fn create(
        name: &str,
        priority: i32,
        function: ThreadFunc,
        aux: usize,
    ) -> Result<ThreadId, CreateError> {
        let (tid, preempt) =
            with_scheduler_mut(|s| s.create_thread(name, priority, function, aux))?;
        if preempt {
            SchedulerManager::yield_now();
        }
        Ok(tid)
    }

    /// Deschedule and destroy the current thread. Never returns; the
    /// successor thread frees this thread's stack page.
    pub fn exit() -> ! {
        assert!(
            !interrupt::is_external_handler(),
            "exit from interrupt context"
        );
        interrupt::disable();
        with_scheduler_mut(|s| s.prepare_exit());
        schedule();
        unreachable!("a dying thread was scheduled again");
    }

    /// Stable identifier of the running thread.
    pub fn current_id() -> ThreadId {
        Self::with_current(|t| t.tid())
    }

    /// Run `f` against the running thread's descriptor.
    ///
    /// Asserts the descriptor is intact and actually RUNNING; a failure
    /// here usually means a trampled descriptor.
    pub fn with_current<F, R>(f: F) -> R
    where
        F: FnOnce(&Thread) -> R,
    {
        with_scheduler(|s| {
            let thread = s.threads.get(current_slot());
            assert_eq!(
                thread.status(),
                ThreadStatus::Running,
                "current thread is not RUNNING"
            );
            f(thread)
        })
    }

    /// Name of the running thread.
    pub fn name() -> heapless::String<NAME_MAX> {
        Self::with_current(|t| t.name.clone())
    }

    /// Invoke `f` on every live thread, with interrupts off.
    pub fn foreach<F>(mut f: F)
    where
        F: FnMut(&Thread),
    {
        with_scheduler(|s| {
            for slot in s.all_list.iter(&s.threads) {
                f(s.threads.get(slot));
            }
        });
    }

    /// Set the current thread's base priority and rerun the scheduling
    /// decision. The yield is unconditional: if an active donation still
    /// dominates, or the new priority is the highest anyway, the thread
    /// is simply re-picked.
    pub fn set_priority(priority: i32) {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "thread priority {} out of range",
            priority
        );
        with_scheduler_mut(|s| {
            s.threads.get_mut(current_slot()).priority = priority;
        });
        SchedulerManager::yield_now();
    }

    /// Effective priority of the current thread (base or donated,
    /// whichever is higher).
    pub fn get_priority() -> i32 {
        Self::with_current(|t| t.effective_priority())
    }

    /// Set the current thread's nice value, clamped to [NICE_MIN,
    /// NICE_MAX]. Only meaningful under the MLFQ discipline.
    pub fn set_nice(nice: i32) {
        let nice = nice.clamp(NICE_MIN, NICE_MAX);
        with_scheduler_mut(|s| {
            s.threads.get_mut(current_slot()).nice = nice;
        });
    }

    pub fn get_nice() -> i32 {
        Self::with_current(|t| t.nice())
    }
}

// ================================================================================================
// SCHEDULER MANAGER
// ================================================================================================

/// Scheduling control: boot, preemption, suspension points.
pub struct SchedulerManager;

impl SchedulerManager {
    /// Initialize the thread system, adopting the running code as the
    /// initial thread "main". Leaves interrupts disabled; call start()
    /// once the rest of the kernel is ready for preemption.
    pub fn init(discipline: Discipline) {
        interrupt::disable();
        let scheduler = Scheduler::new(discipline);
        set_current_slot(scheduler.initial_slot());
        SCHEDULER_STARTED.store(false, Ordering::SeqCst);
        *SCHEDULER.lock() = Some(scheduler);
        log::info!("thread system initialized");
    }

    /// Spawn the idle thread and start preemptive scheduling by enabling
    /// interrupts.
    pub fn start() {
        let tid = ThreadManager::create("idle", PRI_MIN, idle_thread_main, 0)
            .expect("no page for the idle thread");
        with_scheduler_mut(|s| {
            let slot = s.threads.find(tid).expect("idle thread vanished");
            s.idle = Some(slot);
        });
        SCHEDULER_STARTED.store(true, Ordering::SeqCst);
        log::info!("preemptive scheduling started");
        interrupt::enable();
    }

    /// Whether start() has run.
    pub fn is_started() -> bool {
        SCHEDULER_STARTED.load(Ordering::SeqCst)
    }

    /// The boot-selected scheduling discipline.
    pub fn discipline() -> Discipline {
        with_scheduler(|s| s.discipline)
    }

    /// Voluntarily hand the CPU to the scheduler. The current thread
    /// stays runnable and may be re-picked immediately.
    pub fn yield_now() {
        if !Self::is_started() {
            // Nothing to yield to before the idle thread exists.
            return;
        }
        assert!(
            !interrupt::is_external_handler(),
            "yield from interrupt context"
        );
        let old_level = interrupt::disable();
        with_scheduler_mut(|s| s.prepare_yield());
        schedule();
        interrupt::set_level(old_level);
    }

    /// Block the current thread. Requires interrupts off and thread
    /// context; the caller has already put the thread on whatever wait
    /// list will produce the matching unblock().
    pub fn block_current() {
        assert!(
            !interrupt::is_external_handler(),
            "block from interrupt context"
        );
        assert_eq!(
            interrupt::get_level(),
            interrupt::Level::Off,
            "block_current with interrupts enabled"
        );
        with_scheduler_mut(|s| {
            s.threads.get_mut(current_slot()).status = ThreadStatus::Blocked;
        });
        schedule();
    }

    /// Make a blocked thread runnable. Does not preempt the running
    /// thread: callers that need "highest priority runs" preempt
    /// themselves. Safe from interrupt context and from sections that
    /// already disabled interrupts.
    pub fn unblock(tid: ThreadId) {
        with_scheduler_mut(|s| {
            let slot = s.threads.find(tid).expect("unblocking an unknown thread");
            s.unblock_slot(slot);
        });
    }

    /// Block the current thread until the given absolute tick. Past wake
    /// times are allowed; the thread then wakes on the next tick.
    pub fn sleep_until(wakeup_tick: i64) {
        assert!(
            !interrupt::is_external_handler(),
            "sleep from interrupt context"
        );
        let old_level = interrupt::disable();
        with_scheduler_mut(|s| s.sleep_current(wakeup_tick));
        schedule();
        interrupt::set_level(old_level);
    }

    /// 100 times the system load average, rounded to the nearest integer.
    pub fn get_load_avg() -> i32 {
        with_scheduler(|s| s.load_avg.mul_int(100).to_int_round())
    }

    /// 100 times the current thread's recent_cpu, rounded to nearest.
    pub fn get_recent_cpu() -> i32 {
        with_scheduler(|s| {
            s.threads
                .get(current_slot())
                .recent_cpu()
                .mul_int(100)
                .to_int_round()
        })
    }

    /// Aggregate scheduler counters.
    pub fn stats() -> SchedulerStats {
        with_scheduler(|s| s.stats())
    }

    /// Log the scheduler counters.
    pub fn log_stats() {
        let stats = Self::stats();
        log::info!(
            "Thread: {} idle ticks, {} kernel ticks, {} context switches",
            stats.idle_ticks,
            stats.kernel_ticks,
            stats.context_switches
        );
    }
}
