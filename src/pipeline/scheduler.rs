//! Gapless playback scheduling with barge-in support.
//!
//! Decoded chunks are laid end to end on the output clock. A cursor tracks
//! where the next chunk starts; if the clock has already passed the cursor
//! (underrun, drift) the chunk starts "now" instead of in the past.

use crate::audio::frame::AudioFrame;
use crate::error::Result;
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Identifier of a scheduled playback unit, unique per scheduler.
pub type UnitId = u64;

/// Output rendering context with a real-time clock.
///
/// Implementations render each started unit at its start time and report
/// completion by sending the unit's id on the `ended` channel.
pub trait OutputContext: Send {
    /// Current position of the output clock in seconds.
    fn current_time(&self) -> f64;

    /// Rate the context renders at.
    fn sample_rate(&self) -> u32;

    /// Begin playing `frame` at `start_time` seconds on the output clock.
    fn start_unit(
        &mut self,
        id: UnitId,
        frame: AudioFrame,
        start_time: f64,
        ended: Sender<UnitId>,
    ) -> Result<()>;

    /// Stop a unit immediately, wherever it is in its playback.
    ///
    /// May fail for units that already finished; callers ignore that.
    fn stop_unit(&mut self, id: UnitId) -> Result<()>;

    /// Release the rendering device.
    fn close(&mut self) -> Result<()>;
}

/// A unit as placed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledUnit {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Owns the playback timeline cursor and the set of active units.
pub struct PlaybackScheduler {
    output: Box<dyn OutputContext>,
    next_start_time: f64,
    active: BTreeMap<UnitId, ScheduledUnit>,
    next_id: UnitId,
    ended_tx: Sender<UnitId>,
    ended_rx: Receiver<UnitId>,
}

/// Scheduler shared between the playback station and the session.
pub type SharedScheduler = Arc<Mutex<PlaybackScheduler>>;

impl PlaybackScheduler {
    pub fn new(output: Box<dyn OutputContext>) -> Self {
        let (ended_tx, ended_rx) = unbounded();
        Self {
            output,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 0,
            ended_tx,
            ended_rx,
        }
    }

    pub fn into_shared(self) -> SharedScheduler {
        Arc::new(Mutex::new(self))
    }

    /// Places a decoded frame right after the previously scheduled one.
    pub fn schedule(&mut self, frame: AudioFrame) -> Result<ScheduledUnit> {
        self.reap_finished();

        let now = self.output.current_time();
        let start_time = self.next_start_time.max(now);
        let duration = frame.duration();
        let id = self.next_id;

        self.output
            .start_unit(id, frame, start_time, self.ended_tx.clone())?;

        self.next_id += 1;
        self.next_start_time = start_time + duration;
        let unit = ScheduledUnit {
            id,
            start_time,
            duration,
        };
        self.active.insert(id, unit);

        tracing::trace!(
            "scheduled unit {} at {:.3}s for {:.3}s (now {:.3}s)",
            id,
            start_time,
            duration,
            now
        );
        Ok(unit)
    }

    /// Stops every active unit and rewinds the cursor.
    ///
    /// Returns the number of units that were stopped.
    pub fn interrupt(&mut self) -> usize {
        self.reap_finished();

        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active).into_keys() {
            if let Err(e) = self.output.stop_unit(id) {
                tracing::trace!("ignoring stop failure for unit {}: {}", id, e);
            }
        }
        self.next_start_time = 0.0;

        if stopped > 0 {
            tracing::debug!("interrupted playback, stopped {} unit(s)", stopped);
        }
        stopped
    }

    /// Stops all playback and releases the output device.
    pub fn close(&mut self) -> Result<()> {
        self.interrupt();
        self.output.close()
    }

    /// Where the next chunk will start if the clock has not overtaken it.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    /// Number of units still scheduled or playing.
    pub fn active_count(&mut self) -> usize {
        self.reap_finished();
        self.active.len()
    }

    pub fn is_active(&mut self, id: UnitId) -> bool {
        self.reap_finished();
        self.active.contains_key(&id)
    }

    /// Seconds of audio still queued ahead of the output clock.
    pub fn buffered_seconds(&self) -> f64 {
        (self.next_start_time - self.output.current_time()).max(0.0)
    }

    fn reap_finished(&mut self) {
        while let Ok(id) = self.ended_rx.try_recv() {
            self.active.remove(&id);
        }
    }
}

/// A unit as seen by [`MockOutput`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockUnit {
    pub id: UnitId,
    pub start_time: f64,
    pub duration: f64,
    pub samples: usize,
}

#[derive(Default)]
struct MockOutputState {
    time: f64,
    playing: BTreeMap<UnitId, (MockUnit, Sender<UnitId>)>,
    started: Vec<MockUnit>,
    stopped: Vec<UnitId>,
    closed: bool,
    fail_start: bool,
    fail_close: bool,
}

/// Output context with a manual clock, for tests.
///
/// Clones share state, so a test can keep one handle while the scheduler
/// owns another. Stopping a unit that is not playing returns an error, the
/// same way a real rendering context rejects a second stop.
#[derive(Clone, Default)]
pub struct MockOutput {
    state: Arc<Mutex<MockOutputState>>,
    sample_rate: u32,
}

impl MockOutput {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            sample_rate: crate::defaults::OUTPUT_SAMPLE_RATE,
        }
    }

    pub fn with_start_failure(self) -> Self {
        self.with_state(|s| s.fail_start = true);
        self
    }

    pub fn with_close_failure(self) -> Self {
        self.with_state(|s| s.fail_close = true);
        self
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockOutputState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Moves the clock without finishing anything.
    pub fn set_time(&self, time: f64) {
        self.with_state(|s| s.time = time);
    }

    /// Moves the clock and finishes every unit whose end has passed.
    pub fn advance_to(&self, time: f64) {
        self.with_state(|s| {
            s.time = time;
            let due: Vec<UnitId> = s
                .playing
                .iter()
                .filter(|(_, (unit, _))| unit.start_time + unit.duration <= time)
                .map(|(id, _)| *id)
                .collect();
            for id in due {
                if let Some((_, ended)) = s.playing.remove(&id) {
                    ended.send(id).ok();
                }
            }
        });
    }

    /// Finishes one unit as if it played to the end.
    pub fn finish(&self, id: UnitId) {
        self.with_state(|s| {
            if let Some((_, ended)) = s.playing.remove(&id) {
                ended.send(id).ok();
            }
        });
    }

    /// Ends a unit without notifying the scheduler, as when the ended
    /// notice is still in flight.
    pub fn end_silently(&self, id: UnitId) {
        self.with_state(|s| {
            s.playing.remove(&id);
        });
    }

    pub fn started(&self) -> Vec<MockUnit> {
        self.with_state(|s| s.started.clone())
    }

    pub fn stopped(&self) -> Vec<UnitId> {
        self.with_state(|s| s.stopped.clone())
    }

    pub fn playing_count(&self) -> usize {
        self.with_state(|s| s.playing.len())
    }

    pub fn is_closed(&self) -> bool {
        self.with_state(|s| s.closed)
    }
}

impl OutputContext for MockOutput {
    fn current_time(&self) -> f64 {
        self.with_state(|s| s.time)
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
        self.with_state(|s| {
            if s.fail_start {
                return Err(crate::error::VaaniError::AudioOutput {
                    message: "mock start failure".to_string(),
                });
            }
            let unit = MockUnit {
                id,
                start_time,
                duration: frame.duration(),
                samples: frame.samples().len(),
            };
            s.started.push(unit.clone());
            s.playing.insert(id, (unit, ended));
            Ok(())
        })
    }

    fn stop_unit(&mut self, id: UnitId) -> Result<()> {
        self.with_state(|s| {
            if s.playing.remove(&id).is_none() {
                return Err(crate::error::VaaniError::AudioOutput {
                    message: format!("unit {} is not playing", id),
                });
            }
            s.stopped.push(id);
            Ok(())
        })
    }

    fn close(&mut self) -> Result<()> {
        self.with_state(|s| {
            if s.fail_close {
                return Err(crate::error::VaaniError::AudioOutput {
                    message: "mock close failure".to_string(),
                });
            }
            s.closed = true;
            s.playing.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(ms: u32) -> AudioFrame {
        let samples = (24000 * ms / 1000) as usize;
        AudioFrame::mono(vec![0.1; samples], 24000)
    }

    fn scheduler() -> (PlaybackScheduler, MockOutput) {
        let output = MockOutput::new();
        (PlaybackScheduler::new(Box::new(output.clone())), output)
    }

    #[test]
    fn consecutive_chunks_are_back_to_back() {
        let (mut sched, output) = scheduler();
        output.set_time(0.05);

        let a = sched.schedule(chunk(100)).unwrap();
        let b = sched.schedule(chunk(200)).unwrap();
        let c = sched.schedule(chunk(50)).unwrap();

        assert!((a.start_time - 0.05).abs() < 1e-9);
        assert!((b.start_time - a.end_time()).abs() < 1e-9);
        assert!((c.start_time - b.end_time()).abs() < 1e-9);
        assert!((sched.next_start_time() - (0.05 + 0.35)).abs() < 1e-9);
    }

    #[test]
    fn three_chunks_from_zero_sum_their_durations() {
        let (mut sched, _output) = scheduler();

        sched.schedule(chunk(100)).unwrap();
        sched.schedule(chunk(250)).unwrap();
        sched.schedule(chunk(40)).unwrap();

        assert!((sched.next_start_time() - 0.39).abs() < 1e-9);
        assert_eq!(sched.active_count(), 3);
    }

    #[test]
    fn late_chunk_starts_now_instead_of_in_the_past() {
        let (mut sched, output) = scheduler();

        sched.schedule(chunk(100)).unwrap();
        // Clock overtakes the cursor (network stall)
        output.advance_to(0.5);
        let late = sched.schedule(chunk(100)).unwrap();

        assert!((late.start_time - 0.5).abs() < 1e-9);
        assert!((sched.next_start_time() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn finished_units_leave_the_active_set() {
        let (mut sched, output) = scheduler();

        let a = sched.schedule(chunk(100)).unwrap();
        let b = sched.schedule(chunk(100)).unwrap();
        output.advance_to(0.15);

        assert!(!sched.is_active(a.id));
        assert!(sched.is_active(b.id));
        assert_eq!(sched.active_count(), 1);
    }

    #[test]
    fn interrupt_stops_everything_and_rewinds_cursor() {
        let (mut sched, output) = scheduler();
        output.set_time(1.0);

        sched.schedule(chunk(100)).unwrap();
        sched.schedule(chunk(100)).unwrap();
        sched.schedule(chunk(100)).unwrap();

        assert_eq!(sched.interrupt(), 3);
        assert_eq!(sched.active_count(), 0);
        assert_eq!(sched.next_start_time(), 0.0);
        assert_eq!(output.stopped().len(), 3);
        assert_eq!(output.playing_count(), 0);
    }

    #[test]
    fn chunk_after_interrupt_starts_at_now() {
        let (mut sched, output) = scheduler();
        output.set_time(2.0);
        sched.schedule(chunk(500)).unwrap();
        sched.schedule(chunk(500)).unwrap();

        output.set_time(2.2);
        sched.interrupt();
        let fresh = sched.schedule(chunk(100)).unwrap();

        assert!((fresh.start_time - 2.2).abs() < 1e-9);
    }

    #[test]
    fn stopping_finished_units_is_not_an_error() {
        let (mut sched, output) = scheduler();

        let a = sched.schedule(chunk(100)).unwrap();
        let b = sched.schedule(chunk(100)).unwrap();
        output.end_silently(a.id);

        assert_eq!(sched.interrupt(), 2);
        assert_eq!(output.stopped(), vec![b.id]);
        assert_eq!(sched.active_count(), 0);
        assert_eq!(sched.interrupt(), 0);
    }

    #[test]
    fn failed_start_does_not_advance_cursor() {
        let output = MockOutput::new().with_start_failure();
        let mut sched = PlaybackScheduler::new(Box::new(output.clone()));

        assert!(sched.schedule(chunk(100)).is_err());
        assert_eq!(sched.next_start_time(), 0.0);
        assert_eq!(sched.active_count(), 0);
    }

    #[test]
    fn close_stops_units_and_releases_output() {
        let (mut sched, output) = scheduler();
        sched.schedule(chunk(100)).unwrap();

        sched.close().unwrap();

        assert!(output.is_closed());
        assert_eq!(sched.active_count(), 0);
        assert_eq!(sched.next_start_time(), 0.0);
    }

    #[test]
    fn unit_ids_are_unique_across_interrupts() {
        let (mut sched, _output) = scheduler();
        let a = sched.schedule(chunk(10)).unwrap();
        sched.interrupt();
        let b = sched.schedule(chunk(10)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn buffered_seconds_tracks_queue_ahead_of_clock() {
        let (mut sched, output) = scheduler();
        sched.schedule(chunk(300)).unwrap();
        output.set_time(0.1);
        assert!((sched.buffered_seconds() - 0.2).abs() < 1e-9);
        output.set_time(1.0);
        assert_eq!(sched.buffered_seconds(), 0.0);
    }
}
