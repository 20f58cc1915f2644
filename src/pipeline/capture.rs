//! Capture pipeline: microphone samples to outbound encoded frames.
//!
//! A polling thread drains the audio source, cuts the samples into
//! fixed-size frames and hands each one to the outbound queue without
//! waiting. Muted frames are dropped, as are frames that find the queue
//! full; nothing backs up toward the microphone.

use crate::audio::level::LevelMeter;
use crate::audio::pcm;
use crate::audio::recorder::AudioSource;
use crate::defaults;
use crate::live::connector::Outbound;
use crate::session::events::SessionEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Consecutive read failures tolerated before capture gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Cuts a continuous sample stream into frames of exactly `frame_size`.
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Appends samples and returns every frame completed by them.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size;
        if complete == 0 {
            return Vec::new();
        }
        let remainder = self.pending.split_off(complete * self.frame_size);
        let full = std::mem::replace(&mut self.pending, remainder);
        full.chunks_exact(self.frame_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Counters shared between the capture thread and observers.
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    sent: Arc<AtomicU64>,
    muted: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl CaptureStats {
    /// Frames handed to the outbound queue.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Frames discarded because the session was muted.
    pub fn muted(&self) -> u64 {
        self.muted.load(Ordering::Relaxed)
    }

    /// Frames discarded because the outbound queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Outcome of offering one frame to the outbound queue.
enum Dispatch {
    Sent,
    Muted,
    Dropped,
    Closed,
}

/// Builder for the capture thread.
pub struct CapturePipeline {
    frame_size: usize,
    muted: Arc<AtomicBool>,
    level: LevelMeter,
    stats: CaptureStats,
    poll_interval: Duration,
}

impl CapturePipeline {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            muted: Arc::new(AtomicBool::new(false)),
            level: LevelMeter::new(),
            stats: CaptureStats::default(),
            poll_interval: Duration::from_millis(defaults::CAPTURE_POLL_MS),
        }
    }

    /// Share a mute flag with the session.
    pub fn with_muted(mut self, muted: Arc<AtomicBool>) -> Self {
        self.muted = muted;
        self
    }

    /// Publish the RMS level of every captured frame, muted or not.
    pub fn with_level(mut self, level: LevelMeter) -> Self {
        self.level = level;
        self
    }

    pub fn with_stats(mut self, stats: CaptureStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }

    fn dispatch(&self, frame: &[f32], sample_rate: u32, outbound: &mpsc::Sender<Outbound>) -> Dispatch {
        self.level.update(frame);

        if self.muted.load(Ordering::SeqCst) {
            self.stats.muted.fetch_add(1, Ordering::Relaxed);
            return Dispatch::Muted;
        }

        let chunk = pcm::encode(frame, sample_rate);
        match outbound.try_send(Outbound::Media(chunk)) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Dispatch::Sent
            }
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!("outbound queue full, dropped frame ({} so far)", dropped);
                Dispatch::Dropped
            }
            Err(TrySendError::Closed(_)) => Dispatch::Closed,
        }
    }

    /// Spawns the capture thread for an already started source.
    ///
    /// The source is stopped when the thread exits. A source that keeps
    /// failing to read is reported as [`SessionEvent::CaptureFailed`].
    pub fn spawn(
        self,
        mut source: Box<dyn AudioSource>,
        outbound: mpsc::Sender<Outbound>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> CaptureHandle {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();

        let thread = thread::spawn(move || {
            let mut chunker = FrameChunker::new(self.frame_size);
            let sample_rate = source.sample_rate();
            let mut consecutive_errors: u32 = 0;

            'capture: while thread_running.load(Ordering::SeqCst) {
                let samples = match source.read_samples() {
                    Ok(samples) => {
                        consecutive_errors = 0;
                        samples
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            tracing::warn!(
                                "audio capture failed {} times in a row: {}",
                                consecutive_errors,
                                e
                            );
                            if events.send(SessionEvent::CaptureFailed(e.to_string())).is_err() {
                                tracing::debug!("capture failure after session ended");
                            }
                            break;
                        }
                        thread::sleep(self.poll_interval);
                        continue;
                    }
                };

                if samples.is_empty() {
                    if source.is_exhausted() {
                        tracing::info!("audio source exhausted, capture finished");
                        break;
                    }
                    thread::sleep(self.poll_interval);
                    continue;
                }

                for frame in chunker.push(&samples) {
                    if let Dispatch::Closed = self.dispatch(&frame, sample_rate, &outbound) {
                        tracing::debug!("outbound queue closed, capture finished");
                        break 'capture;
                    }
                }
            }

            self.level.reset();
            if let Err(e) = source.stop() {
                tracing::warn!("failed to stop audio capture: {}", e);
            }
        });

        CaptureHandle {
            running,
            thread: Some(thread),
        }
    }
}

/// Handle to a running capture thread.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Signals the thread to stop and waits for it to release the source.
    ///
    /// Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && let Err(panic_info) = thread.join()
        {
            let msg = panic_info
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("unknown panic");
            tracing::warn!("capture thread panicked: {}", msg);
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
