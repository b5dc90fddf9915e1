//! Background task thread
//!
//! Runs work that must not happen on the caller's thread: encoder pre-warming
//! and preemption signals that arrived on the thread holding the command lock.

use crate::app_log;
use crate::logger::LogLevel;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::{JoinHandle, ThreadId};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Task {
    Run(Job),
    Shutdown,
}

pub struct Worker {
    sender: Sender<Task>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Option<ThreadId>,
    closed: AtomicBool,
}

impl Worker {
    pub fn spawn(name: &str) -> Self {
        let (sender, receiver) = unbounded();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || Self::run(receiver));

        let (thread, thread_id) = match handle {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), Some(id))
            }
            Err(e) => {
                app_log!(
                    LogLevel::Error,
                    "worker",
                    "Failed to spawn worker thread: {}",
                    e
                );
                (None, None)
            }
        };

        Self {
            sender,
            thread: Mutex::new(thread),
            thread_id,
            closed: AtomicBool::new(false),
        }
    }

    fn run(receiver: Receiver<Task>) {
        for task in receiver {
            match task {
                Task::Run(job) => {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        app_log!(LogLevel::Error, "worker", "Background job panicked");
                    }
                }
                Task::Shutdown => break,
            }
        }
    }

    /// Queue a job. Returns `false` once the worker is shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) || self.thread_id.is_none() {
            return false;
        }
        self.sender.send(Task::Run(Box::new(job))).is_ok()
    }

    pub fn is_worker_thread(&self) -> bool {
        self.thread_id == Some(std::thread::current().id())
    }

    /// Finish queued jobs, then stop the thread.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.sender.send(Task::Shutdown);

        if self.is_worker_thread() {
            return;
        }
        let handle = match self.thread.lock() {
            Ok(mut thread) => thread.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_runs_jobs_before_shutdown() {
        let worker = Worker::spawn("camctl-test-worker");
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            assert!(worker.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        worker.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert!(!worker.submit(|| {}));
    }

    #[test]
    fn test_survives_panicking_job() {
        let worker = Worker::spawn("camctl-test-worker");
        let counter = Arc::new(AtomicUsize::new(0));

        worker.submit(|| panic!("job bug"));
        let after = Arc::clone(&counter);
        worker.submit(move || {
            after.fetch_add(1, Ordering::SeqCst);
        });
        worker.shutdown();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
