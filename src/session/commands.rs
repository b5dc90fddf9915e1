//! Command execution
//!
//! Every command follows the same contract once the command lock is held:
//! validate against the transition table, open the async window, drive the
//! pipeline and the arbiter, then commit and post `StateChanged` or roll back
//! and return the error. A failed command leaves no pipeline, observer or
//! lease behind that it created itself.

use super::{lock, SessionInner};
use crate::app_log;
use crate::config::{ProgressGate, SessionConfig};
use crate::error::{CamError, CamResult, ErrorKind, Fault};
use crate::logger::LogLevel;
use crate::message::Message;
use crate::pipeline::{BufferObserver, PipelineHandle, PipelineRole};
use crate::resource::LeaseSpec;
use crate::state_machine::{plan, Command, Mode, State, Transition};
use std::sync::Arc;
use std::time::Duration;

/// Who asked for a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Caller,
    /// Preemption, resume or teardown. Bypasses the progress gate and marks
    /// `StateChanged` as caused by the system.
    System,
}

impl Origin {
    fn is_system(self) -> bool {
        self == Origin::System
    }
}

impl SessionInner {
    /// Run one command. The caller must hold the command lock.
    pub(crate) fn execute(&self, command: Command, origin: Origin) -> CamResult<State> {
        let mode = self.active_mode();
        let current = self.machine.current();
        let transition = plan(command, current, mode)?;

        self.machine.begin(transition.from, transition.target)?;
        app_log!(
            LogLevel::Info,
            "session",
            "{:?}: {:?} -> {:?} (session: {})",
            command,
            transition.from,
            transition.commit,
            self.id
        );

        if let Err(e) = self.perform(&transition, mode, origin) {
            self.machine.rollback();
            app_log!(
                LogLevel::Warn,
                "session",
                "{:?} failed in {:?}, rolled back (session: {}): {}",
                command,
                transition.from,
                self.id,
                e
            );
            return Err(e);
        }

        let previous = self.machine.commit(transition.commit)?;
        if !transition.is_snapshot() {
            self.dispatcher.post(Message::state_changed(
                previous,
                transition.commit,
                origin.is_system(),
            ));
        }
        self.context.status.publish(transition.commit);

        if command == Command::Start && mode == Mode::Video {
            self.schedule_prewarm();
        }

        Ok(transition.commit)
    }

    fn perform(&self, transition: &Transition, mode: Mode, origin: Origin) -> CamResult<()> {
        let config = self.config();
        let timeout = config.transition_timeout();

        match transition.command {
            Command::Realize => self.do_realize(&config, timeout),
            Command::Unrealize => self.do_unrealize(timeout),
            Command::Start => self.source_to(State::Prepare, timeout),
            Command::Stop => self.source_to(State::Ready, timeout),
            Command::CaptureStart if transition.is_snapshot() => self.do_snapshot(timeout),
            Command::CaptureStart => self.source_to(State::Capturing, timeout),
            Command::CaptureStop => self.source_to(State::Prepare, timeout),
            Command::Record if transition.from == State::Paused => {
                self.encoder_to(State::Recording, timeout)
            }
            Command::Record => self.do_record(&config, mode, timeout),
            Command::Pause => {
                if !origin.is_system() {
                    self.wait_for_progress(config.progress_gate, mode)?;
                }
                self.encoder_to(State::Paused, timeout)
            }
            Command::Commit => {
                if let Some(fault) = self.faults.current() {
                    return Err(fault.to_error());
                }
                if !origin.is_system() {
                    self.wait_for_progress(config.progress_gate, mode)?;
                }
                self.do_finish(&config, false, timeout)
            }
            Command::Cancel => self.do_finish(&config, true, timeout),
        }
    }

    fn source(&self) -> CamResult<PipelineHandle> {
        self.pipelines()
            .source
            .ok_or_else(|| CamError::Internal("no source pipeline".to_string()))
    }

    fn encoder(&self) -> CamResult<PipelineHandle> {
        self.pipelines()
            .encoder
            .ok_or_else(|| CamError::Internal("no encoder pipeline".to_string()))
    }

    fn source_to(&self, target: State, timeout: Duration) -> CamResult<()> {
        let handle = self.source()?;
        self.context.pipeline.set_state(handle, target, timeout)
    }

    fn encoder_to(&self, target: State, timeout: Duration) -> CamResult<()> {
        let handle = self.encoder()?;
        self.context.pipeline.set_state(handle, target, timeout)
    }

    /// Still capture while recording. The source must end up back in
    /// Recording even when the capture fails.
    fn do_snapshot(&self, timeout: Duration) -> CamResult<()> {
        self.source_to(State::Capturing, timeout)?;
        let Err(e) = self.source_to(State::Recording, timeout) else {
            return Ok(());
        };

        app_log!(
            LogLevel::Warn,
            "session",
            "Snapshot did not return to Recording, retrying: {}",
            e
        );
        if let Err(restore) = self.source_to(State::Recording, timeout) {
            app_log!(
                LogLevel::Error,
                "session",
                "Source stuck after snapshot (session: {}): {}",
                self.id,
                restore
            );
            self.faults
                .record(Fault::new(ErrorKind::DeviceIo, restore.to_string()));
        }
        Err(e)
    }

    fn do_realize(&self, config: &SessionConfig, timeout: Duration) -> CamResult<()> {
        let mode = config.mode;
        let spec = LeaseSpec::for_mode(mode, config.display_overlay);
        self.arbiter.acquire(&spec)?;

        let pipeline = &self.context.pipeline;
        let source = match pipeline.create(PipelineRole::Source, mode) {
            Ok(handle) => handle,
            Err(e) => {
                self.arbiter.release();
                return Err(e);
            }
        };
        if let Err(e) = pipeline.set_state(source, State::Ready, timeout) {
            pipeline.destroy(source);
            self.arbiter.release();
            return Err(e);
        }

        *lock(&self.pipelines) = super::Pipelines {
            mode: Some(mode),
            source: Some(source),
            encoder: None,
        };
        Ok(())
    }

    fn do_unrealize(&self, timeout: Duration) -> CamResult<()> {
        let source = self.source()?;
        self.context.pipeline.set_state(source, State::Null, timeout)?;
        self.context.pipeline.destroy(source);

        *lock(&self.pipelines) = super::Pipelines::default();
        self.arbiter.release();
        Ok(())
    }

    fn do_record(&self, config: &SessionConfig, mode: Mode, timeout: Duration) -> CamResult<()> {
        let recording = config.recording.clone();
        self.monitor.preflight(&recording)?;

        let pipeline = &self.context.pipeline;
        let encoder = pipeline.create(PipelineRole::Encoder, mode)?;
        self.monitor
            .arm(recording, Arc::downgrade(pipeline), encoder);

        let observer: Arc<dyn BufferObserver> = self.monitor.clone();
        let started = pipeline
            .attach_observer(encoder, observer)
            .and_then(|_| pipeline.set_state(encoder, State::Recording, timeout));
        if let Err(e) = started {
            self.monitor.disarm();
            pipeline.destroy(encoder);
            return Err(e);
        }

        lock(&self.pipelines).encoder = Some(encoder);
        Ok(())
    }

    /// Commit or cancel: finalize the encoder and drop it.
    fn do_finish(&self, config: &SessionConfig, cancel: bool, timeout: Duration) -> CamResult<()> {
        let encoder = self.encoder()?;
        self.context.pipeline.set_state(encoder, State::Null, timeout)?;
        self.context.pipeline.destroy(encoder);
        lock(&self.pipelines).encoder = None;

        let progress = self.monitor.disarm().unwrap_or_default();
        let target = &config.recording.target_path;

        if cancel {
            match std::fs::remove_file(target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => app_log!(
                    LogLevel::Warn,
                    "session",
                    "Could not remove cancelled recording {}: {}",
                    target.display(),
                    e
                ),
            }
            app_log!(
                LogLevel::Info,
                "session",
                "Recording cancelled after {} frames",
                progress.frames
            );
        } else {
            let on_disk = self.context.storage.file_size(target).ok();
            app_log!(
                LogLevel::Info,
                "session",
                "Recording committed: {} frames, {} ms, {} bytes accounted, {:?} on disk",
                progress.frames,
                progress.elapsed_ms,
                progress.bytes_written,
                on_disk
            );
        }
        Ok(())
    }

    /// Wait for the encoder to deliver a minimum number of buffers.
    fn wait_for_progress(&self, gate: ProgressGate, mode: Mode) -> CamResult<()> {
        if mode != Mode::Video || gate.min_frames == 0 {
            return Ok(());
        }

        let polls = gate.max_polls.max(1);
        let mut frames = 0;
        for poll in 0..polls {
            frames = self.monitor.frames();
            if frames >= gate.min_frames {
                return Ok(());
            }
            if poll + 1 < polls {
                std::thread::sleep(gate.poll_interval());
            }
        }

        Err(CamError::InsufficientProgress {
            frames,
            required: gate.min_frames,
        })
    }

    fn schedule_prewarm(&self) {
        let Some(source) = self.pipelines().source else {
            return;
        };
        let pipeline = Arc::downgrade(&self.context.pipeline);
        let submitted = self.worker.submit(move || {
            if let Some(pipeline) = pipeline.upgrade() {
                pipeline.prewarm(source);
            }
        });
        if !submitted {
            app_log!(
                LogLevel::Debug,
                "session",
                "Prewarm skipped, worker stopped (session: {})",
                self.id
            );
        }
    }
}
