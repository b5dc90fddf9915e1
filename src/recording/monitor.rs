//! Per-buffer limit accounting and backpressure
//!
//! Buffer timestamps are pipeline running time, which does not advance while
//! the pipeline is paused; elapsed time is measured from the first buffer.
//!
//! Checks run in a fixed order on every buffer:
//! 1. time limit
//! 2. size limit (written + buffer + container trailer + safety margin)
//! 3. free space on the target volume, every `storage_check_interval` buffers
//!
//! The first check that trips returns its `Trip*` action and posts one
//! message. Every later buffer is dropped until the monitor is re-armed.

use super::storage::{volume_dir, StorageInspector};
use super::RecordingProgress;
use crate::app_log;
use crate::config::RecordingConfig;
use crate::error::{CamError, CamResult, ErrorKind, Fault, FaultLatch};
use crate::logger::LogLevel;
use crate::message::{Message, MessageDispatcher};
use crate::pipeline::{BufferAction, BufferObserver, IoFault, PipelineAdapter, PipelineHandle};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Headroom kept below `max_size_bytes` so the muxer can always finalize.
pub const SIZE_LIMIT_SAFETY_MARGIN: u64 = 4096;

struct ArmedRecording {
    config: RecordingConfig,
    adapter: Weak<dyn PipelineAdapter>,
    handle: PipelineHandle,
    progress: RecordingProgress,
    first_timestamp_ms: Option<u64>,
    last_status_ms: Option<u64>,
    buffers_since_storage_check: u32,
}

impl ArmedRecording {
    fn trailer_size(&self) -> u64 {
        self.adapter
            .upgrade()
            .map(|adapter| adapter.estimated_trailer_size(self.handle))
            .unwrap_or(0)
    }

    /// Estimated time before the binding limit trips
    fn remaining_ms(&self) -> Option<u64> {
        let limits = &self.config.limits;
        let progress = &self.progress;

        let by_time = limits
            .has_time_limit()
            .then(|| limits.max_time_ms.saturating_sub(progress.elapsed_ms));

        let by_size = if limits.has_size_limit()
            && progress.bytes_written > 0
            && progress.elapsed_ms > 0
        {
            let left = limits.max_size_bytes.saturating_sub(progress.bytes_written);
            let ms = (left as u128 * progress.elapsed_ms as u128) / progress.bytes_written as u128;
            Some(ms.min(u64::MAX as u128) as u64)
        } else {
            None
        };

        match (by_time, by_size) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Buffer observer for the encoder pipeline of one session
pub struct RecordingMonitor {
    dispatcher: Arc<MessageDispatcher>,
    storage: Arc<dyn StorageInspector>,
    faults: Arc<FaultLatch>,
    active: Mutex<Option<ArmedRecording>>,
}

impl RecordingMonitor {
    pub fn new(
        dispatcher: Arc<MessageDispatcher>,
        storage: Arc<dyn StorageInspector>,
        faults: Arc<FaultLatch>,
    ) -> Self {
        Self {
            dispatcher,
            storage,
            faults,
            active: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ArmedRecording>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Refuse to start when the target volume is too full.
    ///
    /// Returns the usable free bytes (free space minus reserved quota).
    pub fn preflight(&self, config: &RecordingConfig) -> CamResult<u64> {
        let volume = volume_dir(&config.target_path);
        let free = self.storage.free_space(&volume)?;
        let available = free.saturating_sub(config.reserved_quota_bytes);
        let required = config.limits.minimum_free_bytes;

        if available < required {
            app_log!(
                LogLevel::Warn,
                "recording",
                "Refusing to record on {}: {} bytes usable, {} required",
                volume.display(),
                available,
                required
            );
            return Err(CamError::OutOfStorage {
                available,
                required,
            });
        }

        Ok(available)
    }

    /// Start accounting a new recording attempt with fresh counters.
    ///
    /// Also opens the session's fault latch for the attempt.
    pub fn arm(
        &self,
        config: RecordingConfig,
        adapter: Weak<dyn PipelineAdapter>,
        handle: PipelineHandle,
    ) {
        app_log!(
            LogLevel::Debug,
            "recording",
            "Monitor armed on {} (max size: {}, max time: {} ms)",
            handle,
            config.limits.max_size_bytes,
            config.limits.max_time_ms
        );
        *self.lock() = Some(ArmedRecording {
            config,
            adapter,
            handle,
            progress: RecordingProgress::default(),
            first_timestamp_ms: None,
            last_status_ms: None,
            buffers_since_storage_check: 0,
        });
        self.faults.open();
    }

    /// Stop accounting and close the fault latch. Returns the final
    /// counters of the attempt.
    pub fn disarm(&self) -> Option<RecordingProgress> {
        let progress = self.lock().take().map(|armed| armed.progress);
        self.faults.close();
        progress
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    pub fn progress(&self) -> Option<RecordingProgress> {
        self.lock().as_ref().map(|armed| armed.progress)
    }

    /// Buffers accepted so far in the current attempt
    pub fn frames(&self) -> u64 {
        self.lock()
            .as_ref()
            .map(|armed| armed.progress.frames)
            .unwrap_or(0)
    }

    fn check_storage(&self, armed: &mut ArmedRecording) -> bool {
        let interval = armed.config.storage_check_interval;
        if interval == 0 {
            return true;
        }
        armed.buffers_since_storage_check += 1;
        if armed.buffers_since_storage_check < interval {
            return true;
        }
        armed.buffers_since_storage_check = 0;

        let volume = volume_dir(&armed.config.target_path);
        match self.storage.free_space(&volume) {
            Ok(free) => {
                let available = free.saturating_sub(armed.config.reserved_quota_bytes);
                available >= armed.config.limits.minimum_free_bytes
            }
            Err(e) => {
                app_log!(
                    LogLevel::Warn,
                    "recording",
                    "Free space check failed on {}: {}",
                    volume.display(),
                    e
                );
                true
            }
        }
    }

    fn maybe_post_status(&self, armed: &mut ArmedRecording) {
        let elapsed = armed.progress.elapsed_ms;
        let due = match armed.last_status_ms {
            None => true,
            Some(last) => elapsed.saturating_sub(last) >= armed.config.status_interval_ms,
        };
        if !due {
            return;
        }
        armed.last_status_ms = Some(elapsed);
        self.dispatcher.post(Message::RecordingStatus {
            elapsed_ms: elapsed,
            file_size_kb: armed.progress.file_size_kb(),
            remaining_ms: armed.remaining_ms(),
        });
    }
}

impl BufferObserver for RecordingMonitor {
    fn on_buffer(&self, bytes: u64, timestamp_ms: u64) -> BufferAction {
        let mut guard = self.lock();
        let Some(armed) = guard.as_mut() else {
            return BufferAction::Drop;
        };
        if armed.progress.is_stopped() {
            return BufferAction::Drop;
        }

        let first = *armed.first_timestamp_ms.get_or_insert(timestamp_ms);
        let elapsed = timestamp_ms.saturating_sub(first);
        let limits = armed.config.limits;

        if limits.has_time_limit() && elapsed > limits.max_time_ms {
            armed.progress.time_limit_tripped = true;
            app_log!(
                LogLevel::Info,
                "recording",
                "Time limit reached at {} ms (limit: {} ms)",
                elapsed,
                limits.max_time_ms
            );
            self.dispatcher.post(Message::TimeLimitReached);
            return BufferAction::TripTime;
        }

        if limits.has_size_limit() {
            let projected = armed
                .progress
                .bytes_written
                .saturating_add(bytes)
                .saturating_add(armed.trailer_size())
                .saturating_add(SIZE_LIMIT_SAFETY_MARGIN);
            if projected > limits.max_size_bytes {
                armed.progress.size_limit_tripped = true;
                app_log!(
                    LogLevel::Info,
                    "recording",
                    "Size limit reached: {} bytes written, {} projected (limit: {})",
                    armed.progress.bytes_written,
                    projected,
                    limits.max_size_bytes
                );
                self.dispatcher.post(Message::MaxSizeReached);
                return BufferAction::TripSize;
            }
        }

        if !self.check_storage(armed) {
            armed.progress.storage_tripped = true;
            app_log!(
                LogLevel::Warn,
                "recording",
                "Free space exhausted after {} bytes",
                armed.progress.bytes_written
            );
            self.dispatcher.post(Message::NoFreeSpace);
            return BufferAction::TripStorage;
        }

        armed.progress.bytes_written += bytes;
        armed.progress.elapsed_ms = elapsed;
        armed.progress.frames += 1;
        armed.progress.consecutive_io_errors = 0;
        self.maybe_post_status(armed);

        BufferAction::Pass
    }

    fn on_io_error(&self, fault: IoFault) {
        let mut guard = self.lock();
        let Some(armed) = guard.as_mut() else {
            return;
        };
        if armed.progress.failed {
            return;
        }

        armed.progress.consecutive_io_errors += 1;
        let count = armed.progress.consecutive_io_errors;
        if count < armed.config.io_error_threshold {
            app_log!(
                LogLevel::Debug,
                "recording",
                "Transient {:?} error ({} of {})",
                fault,
                count,
                armed.config.io_error_threshold
            );
            return;
        }

        armed.progress.failed = true;
        let kind = match fault {
            IoFault::Write | IoFault::Seek => ErrorKind::FileWrite,
            IoFault::Read => ErrorKind::FileRead,
        };
        let detail = format!(
            "{} consecutive {:?} errors on {}",
            count,
            fault,
            armed.config.target_path.display()
        );
        app_log!(LogLevel::Error, "recording", "Recording failed: {}", detail);

        if self.faults.record(Fault::new(kind, detail)) {
            self.dispatcher.post(Message::Error { kind });
        }
    }
}
