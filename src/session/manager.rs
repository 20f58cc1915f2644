//! Session lifecycle manager.
//!
//! Owns the devices, the live link, the playback scheduler and the
//! transcript for one conversation at a time. Every state change happens
//! in [`SessionManager::dispatch`], fed by [`SessionManager::next_event`],
//! which merges remote events with local capture failures.

use crate::audio::level::LevelMeter;
use crate::defaults;
use crate::error::{Result, VaaniError};
use crate::live::connector::{Connector, LiveConfig, LiveLink};
use crate::persona::{self, Persona};
use crate::pipeline::capture::{CaptureHandle, CapturePipeline, CaptureStats};
use crate::pipeline::playback_station::PlaybackStation;
use crate::pipeline::scheduler::{PlaybackScheduler, SharedScheduler};
use crate::session::devices::DeviceFactory;
use crate::session::events::SessionEvent;
use crate::session::state::SessionState;
use crate::transcript::{TranscriptEntry, TranscriptLog, TurnAccumulator};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Rates, sizes and endpoint settings for new sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub outbound_queue: usize,
    pub decode_concurrency: usize,
    pub transcript_capacity: usize,
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            input_sample_rate: defaults::INPUT_SAMPLE_RATE,
            output_sample_rate: defaults::OUTPUT_SAMPLE_RATE,
            frame_size: defaults::FRAME_SIZE,
            outbound_queue: defaults::OUTBOUND_QUEUE,
            decode_concurrency: defaults::DECODE_CONCURRENCY,
            transcript_capacity: defaults::TRANSCRIPT_CAPACITY,
            model: defaults::LIVE_MODEL.to_string(),
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            api_key: String::new(),
        }
    }
}

/// Resources held while a session is not Idle or Closed.
struct ActiveSession {
    link: LiveLink,
    capture: Option<CaptureHandle>,
    playback: PlaybackStation,
    scheduler: SharedScheduler,
    local_events: Option<mpsc::UnboundedReceiver<SessionEvent>>,
}

enum Next {
    Local(Option<SessionEvent>),
    Remote(Option<SessionEvent>),
}

/// Microphone failures at start are reported as permission problems.
fn as_permission(e: VaaniError) -> VaaniError {
    match e {
        VaaniError::Permission { .. } => e,
        other => VaaniError::Permission {
            message: other.to_string(),
        },
    }
}

fn as_connection(e: VaaniError) -> VaaniError {
    match e {
        VaaniError::Connection { .. } => e,
        other => VaaniError::Connection {
            message: other.to_string(),
        },
    }
}

/// Drives one conversation at a time through its lifecycle.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    devices: Arc<dyn DeviceFactory>,
    options: SessionOptions,
    catalog: Vec<Persona>,
    persona: Persona,
    state: SessionState,
    active: Option<ActiveSession>,
    muted: Arc<AtomicBool>,
    turn: TurnAccumulator,
    transcript: TranscriptLog,
    last_error: Option<String>,
    input_level: LevelMeter,
    output_level: LevelMeter,
    capture_stats: CaptureStats,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, devices: Arc<dyn DeviceFactory>, persona: Persona) -> Self {
        let options = SessionOptions::default();
        Self {
            connector,
            devices,
            transcript: TranscriptLog::with_capacity(options.transcript_capacity),
            options,
            catalog: persona::builtin(),
            persona,
            state: SessionState::Idle,
            active: None,
            muted: Arc::new(AtomicBool::new(false)),
            turn: TurnAccumulator::new(),
            last_error: None,
            input_level: LevelMeter::new(),
            output_level: LevelMeter::new(),
            capture_stats: CaptureStats::default(),
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.transcript = TranscriptLog::with_capacity(options.transcript_capacity);
        self.options = options;
        self
    }

    /// Personas available to [`SessionManager::select_persona`].
    pub fn with_catalog(mut self, catalog: Vec<Persona>) -> Self {
        self.catalog = catalog;
        self
    }

    fn set_state(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        tracing::info!("session {} -> {}", self.state, next);
        self.state = next;
    }

    /// Opens devices and the live link, then waits for the remote side
    /// to confirm (see [`SessionEvent::Opened`]).
    ///
    /// Only valid from Idle. On failure the session ends up Closed with
    /// [`SessionManager::last_error`] set.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(VaaniError::InvalidState {
                operation: "start".to_string(),
                state: self.state.to_string(),
            });
        }

        self.last_error = None;
        self.turn.clear();
        self.set_state(SessionState::Connecting);

        match self.open().await {
            Ok(active) => {
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("session start failed: {}", e);
                self.last_error = Some(e.to_string());
                self.set_state(SessionState::Errored);
                self.stop();
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<ActiveSession> {
        let mut source = self
            .devices
            .open_microphone(self.options.input_sample_rate)
            .map_err(as_permission)?;
        source.start().map_err(as_permission)?;

        let output = match self
            .devices
            .open_output(self.options.output_sample_rate, self.output_level.clone())
        {
            Ok(output) => output,
            Err(e) => {
                if let Err(stop_err) = source.stop() {
                    tracing::debug!("microphone release after failed start: {}", stop_err);
                }
                return Err(e);
            }
        };
        let scheduler = PlaybackScheduler::new(output).into_shared();

        let config = LiveConfig::for_persona(&self.persona)
            .with_model(self.options.model.clone())
            .with_endpoint(self.options.endpoint.clone())
            .with_api_key(self.options.api_key.clone())
            .with_outbound_queue(self.options.outbound_queue);

        tracing::info!(
            "opening session as {} (voice {})",
            self.persona.name,
            self.persona.voice
        );

        let link = match self.connector.connect(&config).await {
            Ok(link) => link,
            Err(e) => {
                if let Err(stop_err) = source.stop() {
                    tracing::debug!("microphone release after failed start: {}", stop_err);
                }
                close_scheduler(&scheduler);
                return Err(as_connection(e));
            }
        };

        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let capture = CapturePipeline::new(self.options.frame_size)
            .with_muted(self.muted.clone())
            .with_level(self.input_level.clone())
            .with_stats(self.capture_stats.clone())
            .spawn(source, link.outbound.clone(), local_tx);

        let playback = PlaybackStation::spawn(
            scheduler.clone(),
            self.options.output_sample_rate,
            1,
            self.options.decode_concurrency,
        );

        Ok(ActiveSession {
            link,
            capture: Some(capture),
            playback,
            scheduler,
            local_events: Some(local_rx),
        })
    }

    /// Waits for the next remote or local event.
    ///
    /// Returns `None` when no session is active. A link that goes away
    /// without saying so is reported as [`SessionEvent::Closed`].
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let next = {
                let active = self.active.as_mut()?;
                let local = &mut active.local_events;
                let remote = &mut active.link.inbound;
                tokio::select! {
                    event = async {
                        match local {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => Next::Local(event),
                    event = remote.recv() => Next::Remote(event),
                }
            };

            match next {
                Next::Local(Some(event)) | Next::Remote(Some(event)) => return Some(event),
                Next::Remote(None) => return Some(SessionEvent::Closed),
                Next::Local(None) => {
                    // Capture finished; keep listening to the remote side
                    if let Some(active) = self.active.as_mut() {
                        active.local_events = None;
                    }
                }
            }
        }
    }

    /// Applies one event. Returns the transcript entries it produced.
    pub fn dispatch(&mut self, event: SessionEvent) -> Vec<TranscriptEntry> {
        if self.active.is_none() {
            tracing::trace!("ignoring {} with no active session", event);
            return Vec::new();
        }
        tracing::debug!("dispatch {}", event);

        match event {
            SessionEvent::Opened => {
                if self.state == SessionState::Connecting {
                    self.set_state(SessionState::Live);
                }
            }
            SessionEvent::InputTranscript(text) => self.turn.push_user(&text),
            SessionEvent::OutputTranscript(text) => self.turn.push_model(&text),
            SessionEvent::TurnComplete => {
                let entries = self.turn.flush();
                self.transcript.extend(entries.iter().cloned());
                return entries;
            }
            SessionEvent::Audio(payload) => {
                if let Some(active) = &self.active
                    && let Err(e) = active.playback.push_chunk(payload)
                {
                    tracing::warn!("{}", e);
                }
            }
            SessionEvent::Interrupted => {
                tracing::debug!("model interrupted, discarding queued speech");
                if let Some(active) = &self.active
                    && let Err(e) = active.playback.interrupt()
                {
                    tracing::warn!("{}", e);
                }
            }
            SessionEvent::Error(detail) => {
                tracing::warn!("live session error: {}", detail);
                self.last_error = Some(defaults::CONNECTION_LOST_MESSAGE.to_string());
                self.fail();
            }
            SessionEvent::CaptureFailed(detail) => {
                self.last_error = Some(format!("Microphone capture stopped: {}", detail));
                self.fail();
            }
            SessionEvent::Closed => {
                tracing::info!("live session closed");
                self.stop();
            }
        }
        Vec::new()
    }

    fn fail(&mut self) {
        if matches!(self.state, SessionState::Connecting | SessionState::Live) {
            self.set_state(SessionState::Errored);
        }
        self.stop();
    }

    /// Tears the session down. Safe to call in any state, any number of
    /// times; always ends in Closed.
    ///
    /// Every resource is released even when releasing another one fails.
    pub fn stop(&mut self) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Idle => {
                self.set_state(SessionState::Closed);
                return;
            }
            SessionState::Closing => {}
            _ => self.set_state(SessionState::Closing),
        }

        if let Some(mut active) = self.active.take() {
            active.link.close();
            if let Some(mut capture) = active.capture.take() {
                capture.stop();
            }
            active.playback.shutdown();
            close_scheduler(&active.scheduler);
        }

        self.turn.clear();
        self.input_level.reset();
        self.output_level.reset();
        self.set_state(SessionState::Closed);
    }

    /// Makes a Closed manager ready for a fresh `start()`.
    pub fn reset(&mut self) -> Result<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::Closed => {
                self.set_state(SessionState::Idle);
                Ok(())
            }
            state => Err(VaaniError::InvalidState {
                operation: "reset".to_string(),
                state: state.to_string(),
            }),
        }
    }

    /// Drops captured frames instead of sending them while `muted`.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
        tracing::info!("microphone {}", if muted { "muted" } else { "unmuted" });
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Chooses the persona for the next `start()`.
    ///
    /// An active session is stopped first; it is not restarted.
    pub fn select_persona(&mut self, id: &str) -> Result<()> {
        let persona = persona::find(&self.catalog, id)?;
        if self.state.is_active() {
            tracing::info!("persona change to {} ends the current session", persona.id);
            self.stop();
        }
        self.persona = persona;
        Ok(())
    }

    /// Waits until every audio event dispatched so far reached the scheduler.
    pub async fn flush_playback(&self) -> Result<()> {
        match &self.active {
            Some(active) => active.playback.flush().await,
            None => Ok(()),
        }
    }

    /// Start time of the next inbound chunk, 0.0 without a session.
    pub fn next_start_time(&self) -> f64 {
        self.active
            .as_ref()
            .and_then(|active| active.scheduler.lock().ok().map(|s| s.next_start_time()))
            .unwrap_or(0.0)
    }

    /// Units scheduled or playing right now.
    pub fn active_playback_units(&self) -> usize {
        self.active
            .as_ref()
            .and_then(|active| active.scheduler.lock().ok().map(|mut s| s.active_count()))
            .unwrap_or(0)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Message for the person using the client, if the last session failed.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn catalog(&self) -> &[Persona] {
        &self.catalog
    }

    pub fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    /// Text received for the turn in progress.
    pub fn pending_turn(&self) -> &TurnAccumulator {
        &self.turn
    }

    pub fn input_level(&self) -> f32 {
        self.input_level.level()
    }

    pub fn output_level(&self) -> f32 {
        self.output_level.level()
    }

    pub fn capture_stats(&self) -> &CaptureStats {
        &self.capture_stats
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

fn close_scheduler(scheduler: &SharedScheduler) {
    let result = match scheduler.lock() {
        Ok(mut scheduler) => scheduler.close(),
        Err(e) => Err(VaaniError::Other(e.to_string())),
    };
    if let Err(e) = result {
        let cleanup = VaaniError::Cleanup {
            resource: "audio output".to_string(),
            message: e.to_string(),
        };
        tracing::warn!("{}", cleanup);
    }
}
