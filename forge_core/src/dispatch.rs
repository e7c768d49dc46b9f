use std::{
    num::NonZeroUsize,
    panic::{self, AssertUnwindSafe},
    sync::{Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    outcome::{ExecutionOutcome, ExitCode},
    phase::PhasedTask,
};

/// Counting admission control for the timed phase of tasks.
pub struct AdmissionGate {
    free: Mutex<usize>,
    freed: Condvar,
}

impl AdmissionGate {
    pub fn new(slots: NonZeroUsize) -> Self {
        Self {
            free: Mutex::new(slots.get()),
            freed: Condvar::new(),
        }
    }

    /// Block until a slot is free; the slot is released when the guard drops.
    pub fn enter(&self) -> AdmissionSlot<'_> {
        let mut free = self.free.lock().unwrap_or_else(|e| e.into_inner());
        while *free == 0 {
            free = self.freed.wait(free).unwrap_or_else(|e| e.into_inner());
        }
        *free -= 1;
        AdmissionSlot { gate: self }
    }
}

pub struct AdmissionSlot<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for AdmissionSlot<'_> {
    fn drop(&mut self) {
        let mut free = self.gate.free.lock().unwrap_or_else(|e| e.into_inner());
        *free += 1;
        self.gate.freed.notify_one();
    }
}

/// Everything a batch produced, in submission order.
#[derive(Debug)]
pub struct DispatchReport<T> {
    pub outcomes: Vec<ExecutionOutcome<T>>,
    pub total: Duration,
    pub per_task: Vec<Duration>,
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    concurrency: NonZeroUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(available_concurrency())
    }
}

pub fn available_concurrency() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

impl Dispatcher {
    pub fn new(concurrency: NonZeroUsize) -> Self {
        Self { concurrency }
    }

    pub fn concurrency(&self) -> NonZeroUsize {
        self.concurrency
    }

    /// Run every task to completion and return their outcomes by index.
    ///
    /// One worker thread per task; at most `concurrency` of them are inside
    /// their timed phase at once. Each worker owns exactly one result slot,
    /// and nothing is returned before every worker is done.
    pub fn run_all<T: Send + 'static>(&self, name: &str, tasks: Vec<PhasedTask<T>>) -> DispatchReport<T> {
        let gate = AdmissionGate::new(self.concurrency);
        let mut slots: Vec<Option<(ExecutionOutcome<T>, Duration)>> =
            (0..tasks.len()).map(|_| None).collect();

        let started = Instant::now();
        thread::scope(|scope| {
            for (index, (task, slot)) in tasks.into_iter().zip(slots.iter_mut()).enumerate() {
                let gate = &gate;
                scope.spawn(move || {
                    let begin = Instant::now();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.run(gate)))
                        .unwrap_or_else(|_| {
                            ExecutionOutcome::failure(ExitCode::RuntimeFailure, "worker panicked")
                        });
                    let elapsed = begin.elapsed();
                    debug!("{} #{} finished in {:?}", name, index + 1, elapsed);
                    *slot = Some((outcome, elapsed));
                });
            }
        });
        let total = started.elapsed();

        let (outcomes, per_task): (Vec<_>, Vec<_>) = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    (
                        ExecutionOutcome::failure(ExitCode::Killed, "worker never reported"),
                        Duration::ZERO,
                    )
                })
            })
            .unzip();
        DispatchReport {
            outcomes,
            total,
            per_task,
        }
    }
}
