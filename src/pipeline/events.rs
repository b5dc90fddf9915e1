use crate::app_log;
use crate::error::{ErrorKind, Fault, FaultLatch};
use crate::logger::LogLevel;
use crate::message::{Message, MessageDispatcher};
use std::sync::Arc;
use uuid::Uuid;

/// Handle given to a pipeline adapter for reporting asynchronous events
///
/// Safe to clone and call from any pipeline status thread.
#[derive(Clone)]
pub struct PipelineEventSink {
    session_id: Uuid,
    dispatcher: Arc<MessageDispatcher>,
    faults: Arc<FaultLatch>,
}

impl PipelineEventSink {
    pub(crate) fn new(
        session_id: Uuid,
        dispatcher: Arc<MessageDispatcher>,
        faults: Arc<FaultLatch>,
    ) -> Self {
        Self {
            session_id,
            dispatcher,
            faults,
        }
    }

    pub fn focus_changed(&self, code: i32) {
        self.dispatcher.post(Message::FocusChanged { code });
    }

    /// An image was written to `filename`
    pub fn captured(&self, filename: impl Into<String>) {
        let filename = filename.into();
        app_log!(
            LogLevel::Info,
            "pipeline",
            "Image captured: {} (session: {})",
            filename,
            self.session_id
        );
        self.dispatcher.post(Message::Captured { filename });
    }

    /// Hardware failure after the command that started the pipeline returned.
    ///
    /// During a recording only the first fault is reported, and it is
    /// returned by the next Commit. Outside a recording every fault is
    /// reported and none is kept.
    pub fn device_fault(&self, detail: impl Into<String>) {
        let detail = detail.into();
        app_log!(
            LogLevel::Error,
            "pipeline",
            "Device fault: {} (session: {})",
            detail,
            self.session_id
        );
        if self.faults.record(Fault::new(ErrorKind::DeviceIo, detail)) {
            self.dispatcher.post(Message::Error {
                kind: ErrorKind::DeviceIo,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageCallback, MessageEnvelope};
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    #[test]
    fn test_device_fault_reported_once_while_recording() {
        let session_id = Uuid::new_v4();
        let dispatcher = Arc::new(MessageDispatcher::new(session_id));
        let (tx, rx) = unbounded();
        let callback: MessageCallback = Arc::new(move |envelope: &MessageEnvelope| {
            let _ = tx.send(envelope.message.clone());
        });
        dispatcher.set_callback(Some(callback));

        let faults = Arc::new(FaultLatch::new());
        faults.open();
        let sink = PipelineEventSink::new(session_id, Arc::clone(&dispatcher), Arc::clone(&faults));

        sink.device_fault("sensor timeout");
        sink.device_fault("sensor timeout again");
        sink.focus_changed(2);

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Message::Error {
                kind: ErrorKind::DeviceIo
            }
        );
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Message::FocusChanged { code: 2 }
        );
        assert_eq!(faults.current().unwrap().detail, "sensor timeout");
    }

    #[test]
    fn test_device_fault_outside_recording_not_latched() {
        let session_id = Uuid::new_v4();
        let dispatcher = Arc::new(MessageDispatcher::new(session_id));
        let (tx, rx) = unbounded();
        let callback: MessageCallback = Arc::new(move |envelope: &MessageEnvelope| {
            let _ = tx.send(envelope.message.clone());
        });
        dispatcher.set_callback(Some(callback));

        let faults = Arc::new(FaultLatch::new());
        let sink = PipelineEventSink::new(session_id, Arc::clone(&dispatcher), Arc::clone(&faults));

        sink.device_fault("lens stuck");
        sink.device_fault("lens stuck");

        for _ in 0..2 {
            assert_eq!(
                rx.recv_timeout(Duration::from_secs(2)).unwrap(),
                Message::Error {
                    kind: ErrorKind::DeviceIo
                }
            );
        }
        assert!(faults.current().is_none());
    }
}
