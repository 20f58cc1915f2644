//! vaani - Real-time voice conversations with a live speech model
//!
//! Captures the microphone, streams it to a remote live session and plays
//! the spoken reply back gaplessly, with barge-in when the speaker interrupts.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod live;
#[cfg(feature = "cli")]
pub mod output;
pub mod persona;
pub mod pipeline;
pub mod session;
pub mod transcript;

// Composition root - needs everything
#[cfg(all(feature = "cpal-audio", feature = "cli"))]
pub mod app;

// Device and transport seams
pub use audio::recorder::AudioSource;
pub use live::connector::Connector;
pub use pipeline::scheduler::{OutputContext, PlaybackScheduler};
pub use session::devices::DeviceFactory;

// Session
pub use session::{SessionEvent, SessionManager, SessionOptions, SessionState};

// Error handling
pub use error::{Result, VaaniError};

// Config
pub use config::Config;
pub use persona::{Persona, Voice};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
