/*
 * Priority-scheduler integration tests: run ordering, creation
 * preemption, and set_priority semantics, driven over real context
 * switches.
 */

mod common;

use common::{boot, Recorder};
use vesper_kernel::{
    timer, Discipline, Semaphore, SchedulerManager, ThreadId, ThreadManager, PRI_DEFAULT,
};

struct Ctx {
    record: Recorder,
    done: Semaphore,
}

fn ctx(aux: usize) -> &'static Ctx {
    unsafe { &*(aux as *const Ctx) }
}

#[test]
fn boots_with_main_as_the_initial_thread() {
    let _serial = boot(Discipline::Priority);

    assert_eq!(ThreadManager::current_id(), ThreadId(1));
    assert_eq!(ThreadManager::name().as_str(), "main");
    assert_eq!(ThreadManager::get_priority(), PRI_DEFAULT);
    assert!(SchedulerManager::is_started());
    assert_eq!(SchedulerManager::discipline(), Discipline::Priority);

    let mut names = Vec::new();
    ThreadManager::foreach(|t| names.push(t.name().to_string()));
    assert!(names.iter().any(|n| n == "main"));
    assert!(names.iter().any(|n| n == "idle"));
    assert_eq!(names.len(), 2);
}

fn record_a(aux: usize) {
    let c = ctx(aux);
    c.record.push("A");
    c.done.up();
}

fn record_b(aux: usize) {
    let c = ctx(aux);
    c.record.push("B");
    c.done.up();
}

fn record_c(aux: usize) {
    let c = ctx(aux);
    c.record.push("C");
    c.done.up();
}

// Three lower-priority threads created from priority-31 main: none may
// run until main waits, and then they run strictly by priority.
#[test]
fn lower_priority_threads_run_in_priority_order() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        record: Recorder::new(),
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    c.record.push("main");
    ThreadManager::create("A", 20, record_a, aux).unwrap();
    ThreadManager::create("B", 30, record_b, aux).unwrap();
    ThreadManager::create("C", 25, record_c, aux).unwrap();

    // All three are below main's priority; yielding hands the CPU right
    // back to main.
    SchedulerManager::yield_now();
    assert_eq!(c.record.events(), ["main"]);

    for _ in 0..3 {
        c.done.down();
    }
    assert_eq!(c.record.events(), ["main", "B", "C", "A"]);

    // Let the workers finish their exits before the context goes away.
    timer::sleep(2);
}

fn record_x(aux: usize) {
    let c = ctx(aux);
    c.record.push("X");
    c.done.up();
}

// Creating a thread that outranks the creator preempts the creator
// immediately.
#[test]
fn creation_preempts_for_a_higher_priority_thread() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        record: Recorder::new(),
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    c.record.push("before-create");
    ThreadManager::create("X", 40, record_x, aux).unwrap();
    c.record.push("after-create");

    c.done.down();
    assert_eq!(c.record.events(), ["before-create", "X", "after-create"]);
    timer::sleep(2);
}

fn record_y(aux: usize) {
    let c = ctx(aux);
    c.record.push("Y");
    c.done.up();
}

// set_priority always reruns the scheduling decision; lowering below a
// ready thread hands the CPU over.
#[test]
fn lowering_priority_yields_to_a_ready_thread() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        record: Recorder::new(),
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    ThreadManager::create("Y", 20, record_y, aux).unwrap();
    c.record.push("main-high");
    assert_eq!(c.record.events(), ["main-high"]); // Y has not run

    ThreadManager::set_priority(10);
    c.record.push("main-low");
    assert_eq!(ThreadManager::get_priority(), 10);

    ThreadManager::set_priority(PRI_DEFAULT);
    c.done.down();
    assert_eq!(c.record.events(), ["main-high", "Y", "main-low"]);
    timer::sleep(2);
}

fn parks_itself(aux: usize) {
    let c = ctx(aux);
    c.record.push("W parked");
    // block_current requires interrupts off; the wake comes from main.
    vesper_kernel::interrupt::disable();
    SchedulerManager::block_current();
    c.record.push("W resumed");
    c.done.up();
}

// unblock() makes the thread runnable but never preempts the caller.
#[test]
fn unblock_does_not_preempt_the_running_thread() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        record: Recorder::new(),
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    let tid = ThreadManager::create("W", 20, parks_itself, aux).unwrap();
    // Let W run until it blocks itself.
    timer::sleep(2);
    assert_eq!(c.record.events(), ["W parked"]);

    SchedulerManager::unblock(tid);
    c.record.push("main after unblock");

    c.done.down();
    assert_eq!(
        c.record.events(),
        ["W parked", "main after unblock", "W resumed"]
    );
    timer::sleep(2);
}

fn record_e1(aux: usize) {
    let c = ctx(aux);
    c.record.push("E1");
    c.done.up();
}

fn record_e2(aux: usize) {
    let c = ctx(aux);
    c.record.push("E2");
    c.done.up();
}

// Equal-priority threads are served in creation order.
#[test]
fn equal_priority_threads_run_fifo() {
    let _serial = boot(Discipline::Priority);
    let c = Ctx {
        record: Recorder::new(),
        done: Semaphore::new(0),
    };
    let aux = &c as *const Ctx as usize;

    ThreadManager::create("E1", 25, record_e1, aux).unwrap();
    ThreadManager::create("E2", 25, record_e2, aux).unwrap();

    c.done.down();
    c.done.down();
    assert_eq!(c.record.events(), ["E1", "E2"]);
    timer::sleep(2);
}
