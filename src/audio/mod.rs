//! Audio devices, sample formats and the PCM wire codec.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod frame;
pub mod level;
#[cfg(feature = "cpal-audio")]
pub mod playback;
pub mod pcm;
pub mod recorder;
pub mod wav;

pub use frame::AudioFrame;
pub use level::LevelMeter;
pub use pcm::EncodedChunk;
pub use recorder::{AudioSource, MockAudioSource};
