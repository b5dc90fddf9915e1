//! Asynchronous, ordered message delivery
//!
//! `post` never blocks: messages go through an unbounded channel to a dedicated
//! dispatch thread, which invokes the registered callback in post order. A slow
//! or panicking callback only ever stalls the dispatch thread.
//!
//! Every queued item is stamped with the dispatcher's generation. `flush()`
//! bumps the generation, waits for a running delivery and drains the queue, so
//! once it returns nothing posted before it can reach the callback.

use super::{Message, MessageEnvelope};
use crate::app_log;
use crate::logger::LogLevel;
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{JoinHandle, ThreadId};
use uuid::Uuid;

/// Callback invoked on the dispatch thread for every delivered message
pub type MessageCallback = Arc<dyn Fn(&MessageEnvelope) + Send + Sync>;

enum Envelope {
    Deliver {
        generation: u64,
        posted_at: DateTime<Utc>,
        message: Message,
    },
    Shutdown,
}

struct DispatchShared {
    session_id: Uuid,
    callback: Mutex<Option<MessageCallback>>,
    generation: AtomicU64,
    /// Held by the dispatch thread for the whole callback invocation
    delivery: Mutex<()>,
}

fn lock_ignoring_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct MessageDispatcher {
    sender: Sender<Envelope>,
    /// Second handle on the queue, used to discard pending items
    drain: Receiver<Envelope>,
    shared: Arc<DispatchShared>,
    closed: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Option<ThreadId>,
}

impl MessageDispatcher {
    pub fn new(session_id: Uuid) -> Self {
        let (sender, receiver) = unbounded();
        let shared = Arc::new(DispatchShared {
            session_id,
            callback: Mutex::new(None),
            generation: AtomicU64::new(0),
            delivery: Mutex::new(()),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_receiver = receiver.clone();
        let handle = std::thread::Builder::new()
            .name("camctl-dispatch".to_string())
            .spawn(move || Self::dispatch_thread(thread_receiver, thread_shared));

        let (thread, thread_id) = match handle {
            Ok(handle) => {
                let id = handle.thread().id();
                (Some(handle), Some(id))
            }
            Err(e) => {
                app_log!(
                    LogLevel::Error,
                    "dispatcher",
                    "Failed to spawn dispatch thread: {}",
                    e
                );
                (None, None)
            }
        };

        Self {
            sender,
            drain: receiver,
            shared,
            closed: AtomicBool::new(false),
            thread: Mutex::new(thread),
            thread_id,
        }
    }

    fn dispatch_thread(receiver: Receiver<Envelope>, shared: Arc<DispatchShared>) {
        let mut sequence = 0u64;

        for item in receiver {
            let (generation, posted_at, message) = match item {
                Envelope::Shutdown => break,
                Envelope::Deliver {
                    generation,
                    posted_at,
                    message,
                } => (generation, posted_at, message),
            };

            let _delivery = lock_ignoring_poison(&shared.delivery);
            if generation != shared.generation.load(Ordering::SeqCst) {
                continue;
            }

            let callback = lock_ignoring_poison(&shared.callback).clone();
            let Some(callback) = callback else {
                // No receiver registered: the message is dropped, not parked.
                continue;
            };

            sequence += 1;
            let envelope = MessageEnvelope {
                session_id: shared.session_id,
                sequence,
                posted_at,
                message,
            };

            if catch_unwind(AssertUnwindSafe(|| callback(&envelope))).is_err() {
                app_log!(
                    LogLevel::Error,
                    "dispatcher",
                    "Message callback panicked on {} (session: {})",
                    envelope.message.name(),
                    shared.session_id
                );
            }
        }
    }

    fn on_dispatch_thread(&self) -> bool {
        self.thread_id == Some(std::thread::current().id())
    }

    /// Queue a message for delivery. Safe from any thread, never blocks.
    pub fn post(&self, message: Message) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let _ = self.sender.send(Envelope::Deliver {
            generation,
            posted_at: Utc::now(),
            message,
        });
    }

    /// Register the receiver, or `None` to stop delivery.
    pub fn set_callback(&self, callback: Option<MessageCallback>) {
        *lock_ignoring_poison(&self.shared.callback) = callback;
    }

    pub fn has_callback(&self) -> bool {
        lock_ignoring_poison(&self.shared.callback).is_some()
    }

    /// Number of messages waiting for the dispatch thread
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    /// Discard everything queued. No callback runs for a discarded message,
    /// and any delivery in progress has finished when this returns (unless it
    /// is called from inside the callback itself).
    pub fn flush(&self) {
        // Bump first so the dispatch thread skips everything it picks up next,
        // then wait out a delivery that is already running.
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let _delivery = if self.on_dispatch_thread() {
            None
        } else {
            Some(lock_ignoring_poison(&self.shared.delivery))
        };

        let mut discarded = 0usize;
        let mut shutdown_seen = false;
        for item in self.drain.try_iter() {
            match item {
                Envelope::Deliver { .. } => discarded += 1,
                Envelope::Shutdown => shutdown_seen = true,
            }
        }
        if shutdown_seen {
            let _ = self.sender.send(Envelope::Shutdown);
        }

        if discarded > 0 {
            app_log!(
                LogLevel::Debug,
                "dispatcher",
                "Discarded {} pending messages (session: {})",
                discarded,
                self.shared.session_id
            );
        }
    }

    /// Flush, refuse further posts and stop the dispatch thread.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flush();
        self.set_callback(None);
        let _ = self.sender.send(Envelope::Shutdown);

        if self.on_dispatch_thread() {
            return;
        }
        let handle = lock_ignoring_poison(&self.thread).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
