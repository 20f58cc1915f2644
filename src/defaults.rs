//! Default configuration constants for vaani.
//!
//! Shared by the config layer, the audio devices and the session so that
//! every component agrees on rates and sizes.

/// Microphone sample rate in Hz expected by the live session.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate in Hz of the synthesized speech returned by the live session.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Number of samples per captured frame.
///
/// At 16kHz this is 256ms of audio per outbound message.
pub const FRAME_SIZE: usize = 4096;

/// Capacity of the outbound frame queue between capture and the network.
///
/// Frames are dropped (not blocked on) when this fills up.
pub const OUTBOUND_QUEUE: usize = 32;

/// Maximum number of audio chunks decoded concurrently ahead of the scheduler.
pub const DECODE_CONCURRENCY: usize = 4;

/// Number of transcript entries kept; older entries are evicted first.
pub const TRANSCRIPT_CAPACITY: usize = 50;

/// Polling interval of the capture thread when the source has no samples.
pub const CAPTURE_POLL_MS: u64 = 10;

/// Live API WebSocket endpoint.
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Native-audio model used for conversations.
pub const LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-12-2025";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Persona selected when nothing else is configured.
pub const DEFAULT_PERSONA: &str = "ancient-guru";

/// Message shown when the live connection drops mid-session.
pub const CONNECTION_LOST_MESSAGE: &str = "The connection to the live session was interrupted.";

/// Mime tag for outbound PCM at the given rate.
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}
