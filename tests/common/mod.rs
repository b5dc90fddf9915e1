#![allow(dead_code)]

use camctl::pipeline::mock::MockPipeline;
use camctl::recording::FixedStorage;
use camctl::resource::mock::MockBroker;
use camctl::{
    Command, DeviceStatus, Message, MessageCallback, MessageEnvelope, Mode, ProgressGate, ResourceBroker,
    RetryPolicy, Session, SessionConfig, SessionContext, State,
};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub struct Harness {
    pub session: Session,
    pub pipeline: Arc<MockPipeline>,
    pub broker: Arc<MockBroker>,
    pub storage: Arc<FixedStorage>,
    pub status: Arc<DeviceStatus>,
    pub messages: Receiver<MessageEnvelope>,
    pub temp_dir: TempDir,
}

pub fn test_config(mode: Mode) -> SessionConfig {
    let mut config = SessionConfig {
        mode,
        transition_timeout_ms: 2000,
        progress_gate: ProgressGate::disabled(),
        force_retry: RetryPolicy {
            max_attempts: 2,
            interval_ms: 10,
        },
        ..Default::default()
    };
    config.recording.limits.minimum_free_bytes = 1024;
    config
}

pub fn harness(mode: Mode) -> Harness {
    harness_with(test_config(mode))
}

pub fn harness_with(config: SessionConfig) -> Harness {
    harness_with_broker(config, Arc::new(MockBroker::new()), None)
}

/// Build a session whose broker may be wrapped by the test
pub fn harness_with_broker(
    mut config: SessionConfig,
    broker: Arc<MockBroker>,
    session_broker: Option<Arc<dyn ResourceBroker>>,
) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    config.recording.target_path = temp_dir.path().join("clip.mp4");

    let pipeline = Arc::new(MockPipeline::new());
    let storage = Arc::new(FixedStorage::new(u64::MAX));
    let status = Arc::new(DeviceStatus::new());
    let session_broker =
        session_broker.unwrap_or_else(|| broker.clone() as Arc<dyn ResourceBroker>);

    let context = SessionContext::new(pipeline.clone(), session_broker)
        .with_storage(storage.clone())
        .with_status(status.clone());
    let session = Session::create(config, context).unwrap();

    let (tx, rx) = unbounded();
    let callback: MessageCallback = Arc::new(move |envelope: &MessageEnvelope| {
        let _ = tx.send(envelope.clone());
    });
    session.set_message_callback(Some(callback));

    Harness {
        session,
        pipeline,
        broker,
        storage,
        status,
        messages: rx,
        temp_dir,
    }
}

/// Commands that bring a fresh session to `state` in its configured mode
pub fn path_to(state: State) -> Vec<Command> {
    match state {
        State::Null | State::None => vec![],
        State::Ready => vec![Command::Realize],
        State::Prepare => vec![Command::Realize, Command::Start],
        State::Capturing => vec![Command::Realize, Command::Start, Command::CaptureStart],
        State::Recording => vec![Command::Realize, Command::Start, Command::Record],
        State::Paused => vec![
            Command::Realize,
            Command::Start,
            Command::Record,
            Command::Pause,
        ],
    }
}

impl Harness {
    pub fn drive_to(&self, state: State) {
        for command in path_to(state) {
            self.session.execute(command).unwrap();
        }
        assert_eq!(self.session.get_state(), state);
        self.drain();
    }

    /// Everything delivered once the dispatcher went quiet
    pub fn drain(&self) -> Vec<Message> {
        std::thread::sleep(Duration::from_millis(100));
        self.messages.try_iter().map(|e| e.message).collect()
    }

    /// Wait for `count` messages
    pub fn collect(&self, count: usize) -> Vec<Message> {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut out = Vec::new();
        while out.len() < count {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.messages.recv_timeout(left) {
                Ok(envelope) => out.push(envelope.message),
                Err(_) => break,
            }
        }
        out
    }

    pub fn state_changes(&self) -> Vec<(State, State, bool)> {
        state_changes(&self.drain())
    }
}

pub fn state_changes(messages: &[Message]) -> Vec<(State, State, bool)> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::StateChanged {
                previous,
                current,
                caused_by_system,
            } => Some((*previous, *current, *caused_by_system)),
            _ => None,
        })
        .collect()
}

/// Poll `condition` for up to two seconds
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}
