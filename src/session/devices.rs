//! Device boundary: where a session gets its microphone and speaker.

use crate::audio::level::LevelMeter;
use crate::audio::recorder::{AudioSource, MockAudioSource, MockSourceState};
use crate::error::{Result, VaaniError};
use crate::pipeline::scheduler::{MockOutput, OutputContext};

/// Opens the audio devices of one session.
pub trait DeviceFactory: Send + Sync {
    /// Opens the capture device. The returned source is not started yet.
    fn open_microphone(&self, sample_rate: u32) -> Result<Box<dyn AudioSource>>;

    /// Opens the playback context; it publishes its output level to `level`.
    fn open_output(&self, sample_rate: u32, level: LevelMeter) -> Result<Box<dyn OutputContext>>;
}

/// Real devices through CPAL, optionally replacing the microphone with a
/// WAV file played at real-time pace.
#[cfg(feature = "cpal-audio")]
#[derive(Debug, Clone, Default)]
pub struct CpalDevices {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub input_wav: Option<std::path::PathBuf>,
}

#[cfg(feature = "cpal-audio")]
impl DeviceFactory for CpalDevices {
    fn open_microphone(&self, sample_rate: u32) -> Result<Box<dyn AudioSource>> {
        if let Some(path) = &self.input_wav {
            let source = crate::audio::wav::WavAudioSource::open(path)?.paced();
            tracing::info!(
                "using {} as microphone ({:.1}s)",
                path.display(),
                source.len() as f64 / crate::defaults::INPUT_SAMPLE_RATE as f64
            );
            return Ok(Box::new(source));
        }
        let source = crate::audio::capture::CpalAudioSource::new(self.input_device.as_deref())?
            .with_sample_rate(sample_rate);
        Ok(Box::new(source))
    }

    fn open_output(&self, sample_rate: u32, level: LevelMeter) -> Result<Box<dyn OutputContext>> {
        let output =
            crate::audio::playback::CpalOutput::open(self.output_device.as_deref(), sample_rate, level)?;
        Ok(Box::new(output))
    }
}

/// In-memory devices for tests.
///
/// Every microphone handed out is a clone of the configured mock source, so
/// [`MockDevices::source_state`] observes whichever one the session used.
#[derive(Clone, Default)]
pub struct MockDevices {
    source: MockAudioSource,
    output: MockOutput,
    microphone_error: Option<String>,
    output_error: Option<String>,
}

impl MockDevices {
    pub fn new() -> Self {
        Self {
            source: MockAudioSource::new(),
            output: MockOutput::new(),
            microphone_error: None,
            output_error: None,
        }
    }

    pub fn with_source(mut self, source: MockAudioSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_output(mut self, output: MockOutput) -> Self {
        self.output = output;
        self
    }

    /// The microphone cannot be opened at all.
    pub fn with_microphone_error(mut self, message: &str) -> Self {
        self.microphone_error = Some(message.to_string());
        self
    }

    /// The speaker cannot be opened.
    pub fn with_output_error(mut self, message: &str) -> Self {
        self.output_error = Some(message.to_string());
        self
    }

    /// Handle on the shared clock and unit log of the output.
    pub fn output(&self) -> MockOutput {
        self.output.clone()
    }

    pub fn source_state(&self) -> MockSourceState {
        self.source.state()
    }
}

impl DeviceFactory for MockDevices {
    fn open_microphone(&self, _sample_rate: u32) -> Result<Box<dyn AudioSource>> {
        if let Some(message) = &self.microphone_error {
            return Err(VaaniError::Permission {
                message: message.clone(),
            });
        }
        Ok(Box::new(self.source.clone()))
    }

    fn open_output(&self, _sample_rate: u32, _level: LevelMeter) -> Result<Box<dyn OutputContext>> {
        if let Some(message) = &self.output_error {
            return Err(VaaniError::AudioOutput {
                message: message.clone(),
            });
        }
        Ok(Box::new(self.output.clone()))
    }
}
