// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Worker pool answering FUSE requests off the session thread

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::error;

/// Overrides the number of request workers
pub const WORKERS_ENV: &str = "FS42_FUSE_WORKERS";

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct RequestDispatcher {
    queue: Arc<SegQueue<Job>>,
    signal: Arc<(Mutex<bool>, Condvar)>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl RequestDispatcher {
    pub fn new(thread_count: usize) -> Self {
        let queue = Arc::new(SegQueue::<Job>::new());
        let signal = Arc::new((Mutex::new(false), Condvar::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(thread_count.max(1));

        for index in 0..thread_count.max(1) {
            let queue = Arc::clone(&queue);
            let signal = Arc::clone(&signal);
            let shutdown = Arc::clone(&shutdown);
            let spawned = thread::Builder::new()
                .name(format!("fs42-worker-{index}"))
                .spawn(move || worker_loop(&queue, &signal, &shutdown));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => error!(target: "fs42::fuse", index, %err, "failed to spawn worker"),
            }
        }

        Self {
            queue,
            signal,
            shutdown,
            handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Queue `job`; it runs inline when no worker could be started
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.handles.is_empty() {
            run(Box::new(job));
            return;
        }
        self.queue.push(Box::new(job));
        let (lock, cvar) = &*self.signal;
        let mut pending = lock.lock();
        *pending = true;
        cvar.notify_one();
    }
}

fn worker_loop(queue: &SegQueue<Job>, signal: &(Mutex<bool>, Condvar), shutdown: &AtomicBool) {
    loop {
        if let Some(job) = queue.pop() {
            run(job);
            continue;
        }
        // Drain before exiting so no request is left unanswered
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        let (lock, cvar) = signal;
        let mut pending = lock.lock();
        if !*pending {
            cvar.wait_for(&mut pending, Duration::from_millis(5));
        }
        *pending = false;
    }
}

fn run(job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(target: "fs42::fuse", "request handler panicked");
    }
}

impl Drop for RequestDispatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        let (lock, cvar) = &*self.signal;
        {
            let mut pending = lock.lock();
            *pending = true;
            cvar.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Number of workers: `FS42_FUSE_WORKERS` when set to a positive number,
/// otherwise the available parallelism (at least two).
pub fn worker_count() -> usize {
    worker_count_from(std::env::var(WORKERS_ENV).ok().as_deref())
}

fn worker_count_from(value: Option<&str>) -> usize {
    let parallelism = || thread::available_parallelism().map(|p| p.get()).unwrap_or(1);
    match value {
        Some(value) => value
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or_else(parallelism),
        None => parallelism().max(2),
    }
}
