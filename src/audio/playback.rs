//! Speaker output using CPAL.
//!
//! The output clock is the number of frames the device callback has
//! rendered. Scheduled units are placed at absolute frame positions and
//! mixed in as the clock reaches them.

use crate::audio::capture::{SendableStream, with_suppressed_stderr};
use crate::audio::frame::AudioFrame;
use crate::audio::level::LevelMeter;
use crate::audio::wav::resample;
use crate::error::{Result, VaaniError};
use crate::pipeline::scheduler::{OutputContext, UnitId};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// A unit waiting for, or in the middle of, playback.
struct RenderUnit {
    id: UnitId,
    start_frame: u64,
    samples: Vec<f32>,
    ended: Sender<UnitId>,
}

impl RenderUnit {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Mixes every unit overlapping `[base, base + out.len() / channels)` into
/// `out`, then retires the units that have fully played.
fn render_block(units: &mut Vec<RenderUnit>, base: u64, out: &mut [f32], channels: usize) {
    let channels = channels.max(1);
    out.fill(0.0);

    let frames = (out.len() / channels) as u64;
    let block_end = base + frames;

    for unit in units.iter() {
        if unit.start_frame >= block_end || unit.end_frame() <= base {
            continue;
        }
        let from = unit.start_frame.max(base);
        let to = unit.end_frame().min(block_end);
        for frame in from..to {
            let sample = unit.samples[(frame - unit.start_frame) as usize];
            let offset = (frame - base) as usize * channels;
            for slot in &mut out[offset..offset + channels] {
                *slot += sample;
            }
        }
    }

    units.retain(|unit| {
        if unit.end_frame() <= block_end {
            // Scheduler may already be gone during shutdown
            unit.ended.send(unit.id).ok();
            false
        } else {
            true
        }
    });

    for slot in out.iter_mut() {
        *slot = slot.clamp(-1.0, 1.0);
    }
}

/// Speaker output context backed by the default (or named) output device.
pub struct CpalOutput {
    stream: Option<SendableStream>,
    units: Arc<Mutex<Vec<RenderUnit>>>,
    frames_rendered: Arc<AtomicU64>,
    device_rate: u32,
    sample_rate: u32,
    level: LevelMeter,
}

impl CpalOutput {
    /// Opens the output device and starts the render stream.
    ///
    /// `sample_rate` is the rate of the frames that will be scheduled; the
    /// device may run at a different rate, in which case units are resampled.
    pub fn open(device_name: Option<&str>, sample_rate: u32, level: LevelMeter) -> Result<Self> {
        let device = find_output_device(device_name)?;

        let units: Arc<Mutex<Vec<RenderUnit>>> = Arc::new(Mutex::new(Vec::new()));
        let frames_rendered = Arc::new(AtomicU64::new(0));

        let (stream, device_rate) =
            build_output_stream(&device, sample_rate, &units, &frames_rendered, &level)?;
        stream.play().map_err(|e| VaaniError::AudioOutput {
            message: format!("Failed to start output stream: {}", e),
        })?;

        tracing::debug!(
            "output stream running at {}Hz (units at {}Hz)",
            device_rate,
            sample_rate
        );

        Ok(Self {
            stream: Some(SendableStream(stream)),
            units,
            frames_rendered,
            device_rate,
            sample_rate,
            level,
        })
    }

    fn lock_units(&self) -> Result<std::sync::MutexGuard<'_, Vec<RenderUnit>>> {
        self.units.lock().map_err(|e| VaaniError::AudioOutput {
            message: format!("Failed to lock output mixer: {}", e),
        })
    }
}

impl OutputContext for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start_unit(
        &mut self,
        id: UnitId,
        frame: AudioFrame,
        start_time: f64,
        ended: Sender<UnitId>,
    ) -> Result<()> {
        if self.stream.is_none() {
            return Err(VaaniError::AudioOutput {
                message: "output is closed".to_string(),
            });
        }
        let rate = frame.sample_rate();
        let samples = resample(&frame.to_mono(), rate, self.device_rate);
        let start_frame = (start_time * self.device_rate as f64).round() as u64;

        self.lock_units()?.push(RenderUnit {
            id,
            start_frame,
            samples,
            ended,
        });
        Ok(())
    }

    fn stop_unit(&mut self, id: UnitId) -> Result<()> {
        let mut units = self.lock_units()?;
        let before = units.len();
        units.retain(|unit| unit.id != id);
        if units.len() == before {
            return Err(VaaniError::AudioOutput {
                message: format!("unit {} is not playing", id),
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.lock_units()?.clear();
        self.level.reset();
        if let Some(stream) = self.stream.take() {
            stream.0.pause().map_err(|e| VaaniError::Cleanup {
                resource: "audio output".to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("output close on drop failed: {}", e);
        }
    }
}

fn find_output_device(device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match device_name {
            Some(name) => {
                let devices = host.output_devices().map_err(|e| VaaniError::AudioOutput {
                    message: format!("Failed to enumerate output devices: {}", e),
                })?;
                devices
                    .into_iter()
                    .find(|dev| dev.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| VaaniError::AudioDeviceNotFound {
                        device: name.to_string(),
                    })
            }
            None => host
                .default_output_device()
                .ok_or_else(|| VaaniError::AudioDeviceNotFound {
                    device: "default output".to_string(),
                }),
        }
    })
}

/// Tries a mono f32 stream at the unit rate, then the device's own config.
fn build_output_stream(
    device: &cpal::Device,
    sample_rate: u32,
    units: &Arc<Mutex<Vec<RenderUnit>>>,
    frames_rendered: &Arc<AtomicU64>,
    level: &LevelMeter,
) -> Result<(cpal::Stream, u32)> {
    let preferred = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    if let Ok(stream) = build_f32_stream(device, &preferred, 1, units, frames_rendered, level) {
        return Ok((stream, sample_rate));
    }

    let default_config = device
        .default_output_config()
        .map_err(|e| VaaniError::AudioOutput {
            message: format!("Failed to query default output config: {}", e),
        })?;
    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels() as usize;
    let config: cpal::StreamConfig = default_config.clone().into();

    tracing::info!(
        "using native output format ({}ch/{}Hz/{:?})",
        channels,
        native_rate,
        default_config.sample_format(),
    );

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_f32_stream(device, &config, channels, units, frames_rendered, level)?
        }
        cpal::SampleFormat::I16 => {
            let units = Arc::clone(units);
            let clock = Arc::clone(frames_rendered);
            let level = level.clone();
            let mut scratch: Vec<f32> = Vec::new();
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0.0);
                        render_into(&units, &clock, &level, &mut scratch, channels);
                        for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                            *out = crate::audio::pcm::sample_to_i16(*sample);
                        }
                    },
                    |err| tracing::warn!("Audio output stream error: {}", err),
                    None,
                )
                .map_err(|e| VaaniError::AudioOutput {
                    message: format!("Failed to build output stream: {}", e),
                })?
        }
        fmt => {
            return Err(VaaniError::AudioOutput {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device with --output-device.",
                    fmt
                ),
            });
        }
    };

    Ok((stream, native_rate))
}

fn build_f32_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    units: &Arc<Mutex<Vec<RenderUnit>>>,
    frames_rendered: &Arc<AtomicU64>,
    level: &LevelMeter,
) -> Result<cpal::Stream> {
    let units = Arc::clone(units);
    let clock = Arc::clone(frames_rendered);
    let level = level.clone();
    device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                render_into(&units, &clock, &level, data, channels);
            },
            |err| tracing::warn!("Audio output stream error: {}", err),
            None,
        )
        .map_err(|e| VaaniError::AudioOutput {
            message: format!("Failed to build output stream: {}", e),
        })
}

fn render_into(
    units: &Mutex<Vec<RenderUnit>>,
    clock: &AtomicU64,
    level: &LevelMeter,
    out: &mut [f32],
    channels: usize,
) {
    let base = clock.load(Ordering::Relaxed);
    match units.lock() {
        Ok(mut units) => render_block(&mut units, base, out, channels),
        // Poisoned mixer: render silence
        Err(_) => out.fill(0.0),
    }
    level.update(out);
    clock.fetch_add((out.len() / channels.max(1)) as u64, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn unit(id: UnitId, start_frame: u64, samples: Vec<f32>, ended: &Sender<UnitId>) -> RenderUnit {
        RenderUnit {
            id,
            start_frame,
            samples,
            ended: ended.clone(),
        }
    }

    #[test]
    fn render_places_unit_at_its_start_frame() {
        let (tx, _rx) = unbounded();
        let mut units = vec![unit(0, 2, vec![0.5, 0.5], &tx)];
        let mut out = vec![9.0; 6];

        render_block(&mut units, 0, &mut out, 1);

        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn render_spans_block_boundaries() {
        let (tx, rx) = unbounded();
        let mut units = vec![unit(7, 3, vec![0.1, 0.2, 0.3, 0.4], &tx)];

        let mut first = vec![0.0; 4];
        render_block(&mut units, 0, &mut first, 1);
        assert_eq!(first[3], 0.1);
        assert!(rx.try_recv().is_err());

        let mut second = vec![0.0; 4];
        render_block(&mut units, 4, &mut second, 1);
        assert_eq!(&second[..3], &[0.2, 0.3, 0.4]);
        assert_eq!(rx.try_recv().unwrap(), 7);
        assert!(units.is_empty());
    }

    #[test]
    fn render_duplicates_mono_into_every_channel() {
        let (tx, _rx) = unbounded();
        let mut units = vec![unit(0, 0, vec![0.25, -0.25], &tx)];
        let mut out = vec![0.0; 4];

        render_block(&mut units, 0, &mut out, 2);

        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25]);
    }

    #[test]
    fn back_to_back_units_leave_no_gap() {
        let (tx, rx) = unbounded();
        let mut units = vec![
            unit(0, 0, vec![0.1; 3], &tx),
            unit(1, 3, vec![0.2; 3], &tx),
        ];
        let mut out = vec![0.0; 6];

        render_block(&mut units, 0, &mut out, 1);

        assert_eq!(out, vec![0.1, 0.1, 0.1, 0.2, 0.2, 0.2]);
        let ended: Vec<UnitId> = rx.try_iter().collect();
        assert_eq!(ended, vec![0, 1]);
    }

    #[test]
    fn render_clamps_overlapping_units() {
        let (tx, _rx) = unbounded();
        let mut units = vec![unit(0, 0, vec![0.8], &tx), unit(1, 0, vec![0.8], &tx)];
        let mut out = vec![0.0; 1];

        render_block(&mut units, 0, &mut out, 1);

        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn render_into_advances_clock_and_meter() {
        let (tx, _rx) = unbounded();
        let units = Mutex::new(vec![unit(0, 0, vec![0.5; 8], &tx)]);
        let clock = AtomicU64::new(0);
        let level = LevelMeter::new();
        let mut out = vec![0.0; 8];

        render_into(&units, &clock, &level, &mut out, 2);

        assert_eq!(clock.load(Ordering::Relaxed), 4);
        assert!((level.level() - 0.5).abs() < 1e-6);
    }

    #[test]
    #[ignore = "requires an audio output device"]
    fn open_default_output() {
        let mut output = CpalOutput::open(None, 24000, LevelMeter::new()).unwrap();
        assert_eq!(output.sample_rate(), 24000);
        output.close().unwrap();
    }
}
