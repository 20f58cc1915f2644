use crate::defaults;
use crate::error::{Result, VaaniError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (microphone, WAV file, mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the last call.
    ///
    /// # Returns
    /// Normalized mono samples at [`AudioSource::sample_rate`]; empty when
    /// nothing new is available yet.
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Sample rate of the samples returned by `read_samples`.
    fn sample_rate(&self) -> u32 {
        defaults::INPUT_SAMPLE_RATE
    }

    /// Whether the source has no more audio to give (files, mocks).
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Mock audio source for testing.
///
/// Returns the configured blocks one per `read_samples` call, then empty reads.
/// Start/stop state is observable through [`MockAudioSource::state`] even
/// after the source has been moved into a capture thread.
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    blocks: VecDeque<Vec<f32>>,
    state: MockSourceState,
    sample_rate: u32,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
}

/// Shared view of a mock source's lifecycle.
#[derive(Debug, Clone, Default)]
pub struct MockSourceState {
    started: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

impl MockSourceState {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// True once `stop()` has succeeded at least once.
    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl MockAudioSource {
    /// Create a new mock audio source with no audio queued.
    pub fn new() -> Self {
        Self {
            blocks: VecDeque::new(),
            state: MockSourceState::default(),
            sample_rate: defaults::INPUT_SAMPLE_RATE,
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
        }
    }

    /// Queue one block of samples.
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.blocks.push_back(samples);
        self
    }

    /// Queue several blocks, returned in order.
    pub fn with_blocks(mut self, blocks: Vec<Vec<f32>>) -> Self {
        self.blocks.extend(blocks);
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on stop
    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Handle for observing start/stop after the source is moved.
    pub fn state(&self) -> MockSourceState {
        self.state.clone()
    }

    pub fn is_started(&self) -> bool {
        self.state.is_started()
    }

    fn failure(&self) -> VaaniError {
        VaaniError::AudioCapture {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            return Err(self.failure());
        }
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.should_fail_stop {
            return Err(self.failure());
        }
        self.state.started.store(false, Ordering::SeqCst);
        self.state.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(self.failure());
        }
        Ok(self.blocks.pop_front().unwrap_or_default())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_exhausted(&self) -> bool {
        self.blocks.is_empty()
    }
}
