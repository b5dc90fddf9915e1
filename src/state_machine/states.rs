/// State and mode definitions for the capture session state machine
use serde::{Deserialize, Serialize};

/// Session state as observed by callers
///
/// `None` is only reported for a session that has been destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum State {
    None,
    Null,
    Ready,
    Prepare,
    Capturing,
    Recording,
    Paused,
}

impl State {
    pub const ALL: [State; 7] = [
        State::None,
        State::Null,
        State::Ready,
        State::Prepare,
        State::Capturing,
        State::Recording,
        State::Paused,
    ];

    /// Position on the Null -> Ready -> Prepare ladder.
    ///
    /// Capturing, Recording and Paused all sit above Prepare.
    pub fn rank(self) -> u8 {
        match self {
            State::None => 0,
            State::Null => 1,
            State::Ready => 2,
            State::Prepare => 3,
            State::Capturing | State::Recording | State::Paused => 4,
        }
    }

    /// Whether an encoder pipeline is attached in this state
    pub fn is_recording(self) -> bool {
        matches!(self, State::Recording | State::Paused)
    }

    pub fn name(self) -> &'static str {
        match self {
            State::None => "None",
            State::Null => "Null",
            State::Ready => "Ready",
            State::Prepare => "Prepare",
            State::Capturing => "Capturing",
            State::Recording => "Recording",
            State::Paused => "Paused",
        }
    }
}

/// Operating mode, fixed when the session is realized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    /// Still image capture with preview
    Image,
    /// Audio/video recording with preview
    #[default]
    Video,
    /// Audio-only recording, no camera
    Audio,
}

impl Mode {
    pub fn supports_capture(self) -> bool {
        matches!(self, Mode::Image)
    }

    pub fn supports_recording(self) -> bool {
        matches!(self, Mode::Video | Mode::Audio)
    }

    /// Snapshot capture while recording is only possible with a camera attached
    pub fn supports_snapshot_while_recording(self) -> bool {
        matches!(self, Mode::Video)
    }

    pub fn uses_camera(self) -> bool {
        !matches!(self, Mode::Audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ladder() {
        assert!(State::Null.rank() < State::Ready.rank());
        assert!(State::Ready.rank() < State::Prepare.rank());
        assert_eq!(State::Recording.rank(), State::Capturing.rank());
        assert_eq!(State::Paused.rank(), State::Recording.rank());
    }

    #[test]
    fn test_mode_capabilities() {
        assert_eq!(Mode::default(), Mode::Video);
        assert!(Mode::Image.supports_capture());
        assert!(!Mode::Image.supports_recording());
        assert!(Mode::Audio.supports_recording());
        assert!(!Mode::Audio.uses_camera());
        assert!(Mode::Video.supports_snapshot_while_recording());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&State::Prepare).unwrap();
        assert_eq!(json, "\"prepare\"");
    }
}
