mod common;

use camctl::{
    BufferAction, CamError, ErrorKind, IoFault, Message, Mode, PipelineRole, ProgressGate,
    RecordingLimits, State,
};
use common::{harness, harness_with, test_config};

fn limits(max_size_bytes: u64, max_time_ms: u64) -> RecordingLimits {
    RecordingLimits {
        max_size_bytes,
        max_time_ms,
        minimum_free_bytes: 1024,
    }
}

#[test]
fn test_size_limit_trips_once() {
    let h = harness(Mode::Video);
    h.session.set_recording_limits(limits(512_000, 0)).unwrap();
    h.drive_to(State::Recording);

    let actions: Vec<BufferAction> = (0..9u64)
        .map(|i| h.pipeline.push_buffer(100_000, i * 33).unwrap())
        .collect();

    assert!(actions[..5].iter().all(|a| *a == BufferAction::Pass));
    assert_eq!(actions[5], BufferAction::TripSize);
    assert!(actions[6..].iter().all(|a| *a == BufferAction::Drop));

    let messages = h.drain();
    assert_eq!(
        messages
            .iter()
            .filter(|m| **m == Message::MaxSizeReached)
            .count(),
        1
    );

    // Hitting a limit does not change state; the caller commits.
    assert_eq!(h.session.get_state(), State::Recording);
    assert_eq!(h.session.commit().unwrap(), State::Prepare);
    assert!(h.session.recording_progress().is_none());
}

#[test]
fn test_limits_captured_at_record() {
    let h = harness(Mode::Video);
    h.session.set_recording_limits(limits(0, 1000)).unwrap();
    h.drive_to(State::Recording);

    assert!(matches!(
        h.session.set_recording_limits(limits(0, 10)),
        Err(CamError::InvalidState { .. })
    ));

    assert_eq!(h.pipeline.push_buffer(10, 0), Some(BufferAction::Pass));
    assert_eq!(h.pipeline.push_buffer(10, 500), Some(BufferAction::Pass));
    assert_eq!(h.pipeline.push_buffer(10, 1001), Some(BufferAction::TripTime));
    assert!(h.drain().contains(&Message::TimeLimitReached));
}

#[test]
fn test_preflight_refuses_before_creating_encoder() {
    let h = harness(Mode::Video);
    let mut recording_limits = limits(0, 0);
    recording_limits.minimum_free_bytes = 1_000_000;
    h.session.set_recording_limits(recording_limits).unwrap();
    h.drive_to(State::Prepare);
    h.storage.set_free_space(999_999);

    assert!(matches!(
        h.session.record(),
        Err(CamError::OutOfStorage {
            available: 999_999,
            required: 1_000_000
        })
    ));
    assert_eq!(h.pipeline.create_calls(PipelineRole::Encoder), 0);
    assert_eq!(h.session.get_state(), State::Prepare);
    assert!(h.drain().is_empty());
}

#[test]
fn test_reserved_quota_counts_against_free_space() {
    let mut config = test_config(Mode::Audio);
    config.recording.reserved_quota_bytes = 10_000;
    config.recording.limits.minimum_free_bytes = 5_000;
    let h = harness_with(config);
    h.drive_to(State::Prepare);

    h.storage.set_free_space(14_000);
    assert!(matches!(
        h.session.record(),
        Err(CamError::OutOfStorage { .. })
    ));

    h.storage.set_free_space(15_000);
    assert_eq!(h.session.record().unwrap(), State::Recording);
}

#[test]
fn test_runtime_free_space_exhaustion() {
    let mut config = test_config(Mode::Video);
    config.recording.storage_check_interval = 1;
    let h = harness_with(config);
    h.drive_to(State::Recording);

    assert_eq!(h.pipeline.push_buffer(4096, 0), Some(BufferAction::Pass));
    h.storage.set_free_space(100);
    assert_eq!(
        h.pipeline.push_buffer(4096, 40),
        Some(BufferAction::TripStorage)
    );
    assert_eq!(h.pipeline.push_buffer(4096, 80), Some(BufferAction::Drop));
    assert!(h.drain().contains(&Message::NoFreeSpace));
}

#[test]
fn test_failed_encoder_start_cleans_up() {
    let h = harness(Mode::Video);
    h.drive_to(State::Prepare);
    h.pipeline.fail_transition(State::Recording);

    assert!(matches!(h.session.record(), Err(CamError::DeviceIo(_))));
    assert_eq!(h.session.get_state(), State::Prepare);
    assert!(h.pipeline.live_handle(PipelineRole::Encoder).is_none());
    assert!(h.session.recording_progress().is_none());
    assert_eq!(h.pipeline.push_buffer(10, 0), None);
}

#[test]
fn test_io_fault_fails_commit_until_cancel() {
    let h = harness(Mode::Video);
    h.drive_to(State::Recording);
    h.pipeline.push_buffer(1000, 0);

    for _ in 0..3 {
        h.pipeline.push_io_error(IoFault::Write);
    }
    h.pipeline.push_io_error(IoFault::Write);

    let errors: Vec<Message> = h
        .drain()
        .into_iter()
        .filter(|m| matches!(m, Message::Error { .. }))
        .collect();
    assert_eq!(
        errors,
        vec![Message::Error {
            kind: ErrorKind::FileWrite
        }]
    );
    assert_eq!(h.pipeline.push_buffer(1000, 10), Some(BufferAction::Drop));

    assert!(matches!(h.session.commit(), Err(CamError::FileWrite(_))));
    assert_eq!(h.session.get_state(), State::Recording);
    assert!(h.drain().is_empty());

    assert_eq!(h.session.cancel().unwrap(), State::Prepare);
    assert!(h.session.last_fault().is_none());
}

#[test]
fn test_transient_io_errors_are_tolerated() {
    let h = harness(Mode::Video);
    h.drive_to(State::Recording);

    for ts in 0..5u64 {
        h.pipeline.push_io_error(IoFault::Seek);
        h.pipeline.push_buffer(1000, ts * 100);
    }

    assert!(h.session.last_fault().is_none());
    assert_eq!(h.session.commit().unwrap(), State::Prepare);
}

#[test]
fn test_device_fault_reported_once_and_returned_by_commit() {
    let h = harness(Mode::Video);
    h.drive_to(State::Recording);
    let sink = h.session.event_sink();

    sink.device_fault("sensor stopped");
    sink.device_fault("sensor stopped");

    assert_eq!(
        h.drain(),
        vec![Message::Error {
            kind: ErrorKind::DeviceIo
        }]
    );
    assert!(matches!(h.session.commit(), Err(CamError::DeviceIo(_))));
    assert_eq!(h.session.cancel().unwrap(), State::Prepare);
}

#[test]
fn test_preview_fault_reported_but_not_returned_by_commit() {
    let h = harness(Mode::Video);
    h.drive_to(State::Prepare);
    h.session.event_sink().device_fault("glitch while previewing");

    assert_eq!(
        h.drain(),
        vec![Message::Error {
            kind: ErrorKind::DeviceIo
        }]
    );
    assert!(h.session.last_fault().is_none());

    h.session.record().unwrap();
    assert_eq!(h.session.commit().unwrap(), State::Prepare);
}

#[test]
fn test_every_fault_outside_recording_is_reported() {
    let h = harness(Mode::Image);
    h.drive_to(State::Prepare);
    let sink = h.session.event_sink();

    sink.device_fault("first");
    assert_eq!(
        h.drain(),
        vec![Message::Error {
            kind: ErrorKind::DeviceIo
        }]
    );

    h.session.stop().unwrap();
    h.session.unrealize().unwrap();
    h.session.realize().unwrap();
    h.session.start().unwrap();
    h.drain();

    sink.device_fault("second");
    sink.device_fault("third");
    assert_eq!(
        h.drain(),
        vec![
            Message::Error {
                kind: ErrorKind::DeviceIo
            },
            Message::Error {
                kind: ErrorKind::DeviceIo
            }
        ]
    );
    assert!(h.session.last_fault().is_none());
}

#[test]
fn test_fault_from_previous_recording_does_not_leak() {
    let h = harness(Mode::Video);
    h.drive_to(State::Recording);
    h.session.event_sink().device_fault("sensor stopped");
    h.session.cancel().unwrap();
    h.drain();

    h.session.record().unwrap();
    h.session.event_sink().device_fault("sensor stopped again");
    assert_eq!(
        h.drain(),
        vec![Message::Error {
            kind: ErrorKind::DeviceIo
        }]
    );
    assert_eq!(
        h.session.last_fault().unwrap().detail,
        "sensor stopped again"
    );
}

#[test]
fn test_progress_gate_blocks_early_pause() {
    let mut config = test_config(Mode::Video);
    config.progress_gate = ProgressGate {
        min_frames: 3,
        max_polls: 3,
        poll_interval_ms: 10,
    };
    let h = harness_with(config);
    h.drive_to(State::Recording);

    h.pipeline.push_buffer(100, 0);
    assert!(matches!(
        h.session.pause(),
        Err(CamError::InsufficientProgress {
            frames: 1,
            required: 3
        })
    ));
    assert_eq!(h.session.get_state(), State::Recording);

    h.pipeline.push_buffer(100, 33);
    h.pipeline.push_buffer(100, 66);
    assert_eq!(h.session.pause().unwrap(), State::Paused);
}

#[test]
fn test_progress_gate_ignored_for_audio() {
    let mut config = test_config(Mode::Audio);
    config.progress_gate = ProgressGate::default();
    let h = harness_with(config);
    h.drive_to(State::Recording);

    assert_eq!(h.session.commit().unwrap(), State::Prepare);
}

#[test]
fn test_recording_status_reaches_callback() {
    let mut config = test_config(Mode::Video);
    config.recording.status_interval_ms = 500;
    config.recording.limits.max_time_ms = 10_000;
    let h = harness_with(config);
    h.drive_to(State::Recording);

    for ts in (0..=1000u64).step_by(100) {
        h.pipeline.push_buffer(2048, ts);
    }

    let statuses: Vec<(u64, u64)> = h
        .drain()
        .into_iter()
        .filter_map(|m| match m {
            Message::RecordingStatus {
                elapsed_ms,
                file_size_kb,
                ..
            } => Some((elapsed_ms, file_size_kb)),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![(0, 2), (500, 12), (1000, 22)]);
}

#[test]
fn test_cancel_removes_partial_file() {
    let h = harness(Mode::Video);
    h.drive_to(State::Recording);
    let target = h.session.config().recording.target_path;
    std::fs::write(&target, b"partial").unwrap();

    h.session.cancel().unwrap();
    assert!(!target.exists());
}

#[test]
fn test_commit_keeps_file() {
    let h = harness(Mode::Video);
    h.drive_to(State::Recording);
    let target = h.session.config().recording.target_path;
    std::fs::write(&target, b"complete").unwrap();

    h.session.commit().unwrap();
    assert!(target.exists());
    assert!(target.starts_with(h.temp_dir.path()));
}
