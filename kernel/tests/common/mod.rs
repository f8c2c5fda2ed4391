/*
 * Shared harness for the scheduler integration tests.
 *
 * The scheduler is process-wide singleton state, so tests within a
 * binary are serialized: boot() takes a global lock, re-initializes the
 * thread system, and starts preemptive scheduling. The calling test
 * thread becomes the kernel's initial thread "main"; threads it creates
 * run as real coroutines via the kernel's own context switch, and timer
 * ticks are delivered by the idle thread (or injected directly with
 * timer::interrupt_tick()).
 */

// Not every test binary uses every helper here.
#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard, OnceLock};

use vesper_kernel::{Discipline, SchedulerManager};

pub fn boot(discipline: Discipline) -> MutexGuard<'static, ()> {
    static SERIAL: OnceLock<Mutex<()>> = OnceLock::new();
    let guard = SERIAL
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    SchedulerManager::init(discipline);
    SchedulerManager::start();
    guard
}

/// Event log shared between the test's threads. Preallocated so pushes
/// from one-page kernel stacks never allocate.
pub struct Recorder {
    events: Mutex<Vec<&'static str>>,
}

impl Recorder {
    pub fn new() -> Recorder {
        Recorder {
            events: Mutex::new(Vec::with_capacity(64)),
        }
    }

    pub fn push(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    /// Index of an event, panicking if it never happened.
    pub fn index_of(&self, event: &'static str) -> usize {
        let events = self.events();
        events
            .iter()
            .position(|&e| e == event)
            .unwrap_or_else(|| panic!("event {:?} not recorded in {:?}", event, events))
    }
}

/// Effective priority of a live thread, looked up by name.
pub fn effective_priority_of(name: &str) -> i32 {
    let mut found = None;
    vesper_kernel::ThreadManager::foreach(|t| {
        if t.name() == name {
            found = Some(t.effective_priority());
        }
    });
    found.unwrap_or_else(|| panic!("no live thread named {:?}", name))
}
