//! Events flowing into the session manager.

use std::fmt;

/// Something that happened on the live connection or in a local component.
///
/// Remote events come from the connection in arrival order; local ones
/// (capture failures) are merged into the same stream so the session has a
/// single place where state changes happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The remote side accepted the session setup.
    Opened,
    /// Partial transcription of what the user said.
    InputTranscript(String),
    /// Partial transcription of what the model said.
    OutputTranscript(String),
    /// The model finished its turn.
    TurnComplete,
    /// Base64 PCM audio from the model.
    Audio(String),
    /// The user started speaking while the model was talking.
    Interrupted,
    /// The connection reported an error.
    Error(String),
    /// The connection closed.
    Closed,
    /// The local capture loop gave up.
    CaptureFailed(String),
}

impl SessionEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Opened => "opened",
            SessionEvent::InputTranscript(_) => "input-transcript",
            SessionEvent::OutputTranscript(_) => "output-transcript",
            SessionEvent::TurnComplete => "turn-complete",
            SessionEvent::Audio(_) => "audio",
            SessionEvent::Interrupted => "interrupted",
            SessionEvent::Error(_) => "error",
            SessionEvent::Closed => "closed",
            SessionEvent::CaptureFailed(_) => "capture-failed",
        }
    }

    /// Whether this event ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Error(_) | SessionEvent::Closed | SessionEvent::CaptureFailed(_)
        )
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEvent::InputTranscript(text) | SessionEvent::OutputTranscript(text) => {
                write!(f, "{}: {:?}", self.kind(), text)
            }
            SessionEvent::Audio(data) => write!(f, "audio ({} base64 chars)", data.len()),
            SessionEvent::Error(message) | SessionEvent::CaptureFailed(message) => {
                write!(f, "{}: {}", self.kind(), message)
            }
            _ => f.write_str(self.kind()),
        }
    }
}
