//! The worker pool (spec component G): a fixed-size set of OS threads, each
//! running `while !stop { if !consume() { park } }` against a shared
//! `FifoScheduler`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::access::AccessPolicy;
use crate::scheduler::FifoScheduler;
use crate::space::TaskSpace;

/// A running pool of cooperative-stack workers.
pub struct WorkerPool<P: AccessPolicy> {
    threads: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    scheduler: Arc<FifoScheduler<P>>,
    root: Arc<TaskSpace<P>>,
    poisoned: Arc<AtomicBool>,
}

impl<P: AccessPolicy> WorkerPool<P> {
    /// Spawn `n_threads` workers (or `available_parallelism()` if `0`,
    /// matching the original's `hardware_concurrency()` default).
    pub fn start(
        n_threads: usize,
        scheduler: Arc<FifoScheduler<P>>,
        root: Arc<TaskSpace<P>>,
        poisoned: Arc<AtomicBool>,
    ) -> Self {
        let n = if n_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            n_threads
        };
        let stop = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::with_capacity(n);
        for idx in 0..n {
            let scheduler = scheduler.clone();
            let root = root.clone();
            let stop = stop.clone();
            let poisoned = poisoned.clone();
            let handle = std::thread::Builder::new()
                .name(format!("graphene-worker-{idx}"))
                .spawn(move || worker_loop(scheduler, root, stop, poisoned))
                .expect("failed to spawn worker thread");
            threads.push(handle);
        }
        log::debug!("worker pool started with {n} threads");
        WorkerPool {
            threads,
            stop,
            scheduler,
            root,
            poisoned,
        }
    }

    /// Busy-idle, calling `idle` on every iteration that finds work still
    /// pending, until the root space is empty or the runtime is poisoned.
    pub fn barrier(&self, mut idle: impl FnMut(), poisoned: &AtomicBool) {
        while !self.root.empty() && !poisoned.load(Ordering::SeqCst) {
            idle();
        }
    }

    /// Signal every worker to exit once its current task (if any) finishes
    /// and the root space has drained (or the runtime is poisoned, in which
    /// case the root space may never drain and workers exit immediately
    /// instead), and join all threads.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.scheduler.notifier.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        log::debug!("worker pool stopped");
    }
}

fn worker_loop<P: AccessPolicy>(
    scheduler: Arc<FifoScheduler<P>>,
    root: Arc<TaskSpace<P>>,
    stop: Arc<AtomicBool>,
    poisoned: Arc<AtomicBool>,
) {
    let should_exit = || {
        stop.load(Ordering::Acquire) && (root.empty() || poisoned.load(Ordering::Acquire))
    };
    loop {
        if should_exit() {
            return;
        }
        let generation = scheduler.notifier.current();
        if !scheduler.consume(&root) {
            if should_exit() {
                return;
            }
            scheduler.notifier.park_since(generation);
        }
    }
}
