//! WAV file audio source, usable in place of the microphone.

use crate::audio::recorder::AudioSource;
use crate::defaults::INPUT_SAMPLE_RATE;
use crate::error::{Result, VaaniError};
use std::io::Read;
use std::path::Path;
use std::time::Instant;

/// Audio source that replays WAV file data.
///
/// Supports arbitrary sample rates, channel counts and sample formats,
/// converting to mono f32 at 16kHz. When paced, samples are released at
/// real-time speed so the file behaves like a live microphone.
pub struct WavAudioSource {
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
    paced: bool,
    started_at: Option<Instant>,
}

impl WavAudioSource {
    /// Create from any reader (for testing/flexibility).
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut wav_reader =
            hound::WavReader::new(reader).map_err(|e| VaaniError::AudioCapture {
                message: format!("Failed to parse WAV file: {}", e),
            })?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(VaaniError::AudioCapture {
                message: "WAV file declares zero channels".to_string(),
            });
        }

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => wav_reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>(),
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                wav_reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()
            }
        }
        .map_err(|e| VaaniError::AudioCapture {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

        let channels = spec.channels as usize;
        let mono: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        let samples = resample(&mono, spec.sample_rate, INPUT_SAMPLE_RATE);

        // 100ms chunks at 16kHz
        let chunk_size = (INPUT_SAMPLE_RATE / 10) as usize;

        Ok(Self {
            samples,
            position: 0,
            chunk_size,
            paced: false,
            started_at: None,
        })
    }

    /// Open a WAV file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| VaaniError::AudioCapture {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(std::io::BufReader::new(file)))
    }

    /// Release samples at real-time speed instead of as fast as they are read.
    pub fn paced(mut self) -> Self {
        self.paced = true;
        self
    }

    /// Total length in samples after conversion.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn available_end(&self) -> usize {
        let limit = match (self.paced, self.started_at) {
            (true, Some(started)) => {
                let elapsed = started.elapsed().as_secs_f64();
                (elapsed * INPUT_SAMPLE_RATE as f64) as usize
            }
            _ => self.position + self.chunk_size,
        };
        limit.min(self.samples.len())
    }
}

impl AudioSource for WavAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.started_at = None;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        let end = self.available_end();
        if end <= self.position {
            return Ok(Vec::new());
        }
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(chunk)
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[samples.len() - 1]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}
