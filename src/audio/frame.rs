//! Decoded audio buffers.

/// A block of normalized floating-point audio.
///
/// Samples are interleaved: sample `i` of channel `c` lives at `i * channels + c`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioFrame {
    /// Creates a frame from interleaved samples.
    ///
    /// A trailing partial multi-channel frame is truncated.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Creates a single-channel frame.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames (samples per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// De-interleaved samples of one channel, or `None` if out of range.
    pub fn channel_data(&self, channel: u16) -> Option<Vec<f32>> {
        if channel >= self.channels {
            return None;
        }
        let step = self.channels as usize;
        Some(
            self.samples
                .iter()
                .skip(channel as usize)
                .step_by(step)
                .copied()
                .collect(),
        )
    }

    /// Mixes all channels down to one by averaging.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels == 1 {
            return self.samples.clone();
        }
        let n = self.channels as usize;
        self.samples
            .chunks_exact(n)
            .map(|frame| frame.iter().sum::<f32>() / n as f32)
            .collect()
    }
}
