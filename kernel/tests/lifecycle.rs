/*
 * Thread lifecycle integration tests: creation, inherited attributes,
 * exit and reaping, and stack-page exhaustion.
 */

mod common;

use common::boot;
use vesper_kernel::{
    palloc, timer, CreateError, Discipline, SchedulerManager, Semaphore, ThreadManager,
};

struct Ctx {
    done: Semaphore,
}

fn signal_and_exit(aux: usize) {
    let c = unsafe { &*(aux as *const Ctx) };
    c.done.up();
}

#[test]
fn created_threads_are_reaped_and_pages_returned() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    let pages_before = palloc::pages_in_use();
    let mut live = 0;
    ThreadManager::foreach(|_| live += 1);

    for _ in 0..3 {
        ThreadManager::create("worker", 20, signal_and_exit, aux).unwrap();
    }
    assert_eq!(palloc::pages_in_use(), pages_before + 3);

    for _ in 0..3 {
        c.done.down();
    }
    // The last unblock preempted the workers before their exits; give
    // them the CPU to finish dying, then check the reaper's work.
    timer::sleep(2);

    assert_eq!(palloc::pages_in_use(), pages_before);
    let mut live_after = 0;
    ThreadManager::foreach(|_| live_after += 1);
    assert_eq!(live_after, live);

    // Three threads ran to completion plus the idle passes: the switch
    // and tick counters moved.
    let stats = SchedulerManager::stats();
    assert!(stats.context_switches > 0);
    assert!(stats.idle_ticks + stats.kernel_ticks > 0);
}

#[test]
fn tids_are_monotonic_and_names_bounded() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    let first = ThreadManager::create("worker-one", 20, signal_and_exit, aux).unwrap();
    let second =
        ThreadManager::create("a-very-long-worker-name", 20, signal_and_exit, aux).unwrap();
    assert!(second.0 > first.0);

    let mut seen_truncated = false;
    ThreadManager::foreach(|t| {
        if t.tid() == second {
            assert_eq!(t.name(), "a-very-long-wor");
            seen_truncated = true;
        }
    });
    assert!(seen_truncated);

    c.done.down();
    c.done.down();
    timer::sleep(2);
}

fn never_runs(_aux: usize) {
    unreachable!("this thread should never have been created");
}

#[test]
fn creation_fails_cleanly_when_pages_run_out() {
    let _serial = boot(Discipline::Priority);

    let mut live = 0;
    ThreadManager::foreach(|_| live += 1);
    let pages = palloc::pages_in_use();

    palloc::set_limit(pages);
    let result = ThreadManager::create("doomed", 20, never_runs, 0);
    assert_eq!(result.unwrap_err(), CreateError::OutOfPages);

    // The failed creation left nothing behind.
    assert_eq!(palloc::pages_in_use(), pages);
    let mut live_after = 0;
    ThreadManager::foreach(|_| live_after += 1);
    assert_eq!(live_after, live);

    palloc::set_limit(1024);
}

fn check_inherited(aux: usize) {
    let c = unsafe { &*(aux as *const Ctx) };
    // nice carries over from the creator even under the priority
    // discipline; it simply has no effect there.
    assert_eq!(ThreadManager::get_nice(), 7);
    c.done.up();
}

#[test]
fn children_inherit_the_creator_nice() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    ThreadManager::set_nice(7);
    ThreadManager::create("child", 20, check_inherited, aux).unwrap();
    c.done.down();
    ThreadManager::set_nice(0);
    timer::sleep(2);
}
