//! Remote session boundary.
//!
//! A [`Connector`] opens a bidirectional link to the live model. The link is
//! plain message passing: a bounded sender for outbound frames and a receiver
//! of typed [`SessionEvent`]s, so the session never sees transport details.

use crate::audio::pcm::EncodedChunk;
use crate::defaults;
use crate::error::{Result, VaaniError};
use crate::persona::{Persona, Voice};
use crate::session::events::SessionEvent;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How long transport tasks get to finish after a close request.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Message from the client to the remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One captured, encoded frame.
    Media(EncodedChunk),
}

/// Configuration sent when a session is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveConfig {
    pub voice: Voice,
    pub system_instruction: String,
    pub request_audio_output: bool,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
    pub model: String,
    pub endpoint: String,
    pub api_key: String,
    /// Capacity of the outbound queue.
    pub outbound_queue: usize,
}

impl LiveConfig {
    /// Audio out and transcripts in both directions, for the given persona.
    pub fn for_persona(persona: &Persona) -> Self {
        Self {
            voice: persona.voice,
            system_instruction: persona.system_instruction.clone(),
            request_audio_output: true,
            transcribe_input: true,
            transcribe_output: true,
            model: defaults::LIVE_MODEL.to_string(),
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            api_key: String::new(),
            outbound_queue: defaults::OUTBOUND_QUEUE,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_outbound_queue(mut self, capacity: usize) -> Self {
        self.outbound_queue = capacity.max(1);
        self
    }
}

/// An open link to the remote session.
///
/// The close request travels on its own channel so a full media queue
/// cannot hold it back.
pub struct LiveLink {
    pub outbound: mpsc::Sender<Outbound>,
    pub inbound: mpsc::Receiver<SessionEvent>,
    close: Option<oneshot::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveLink {
    pub fn new(
        outbound: mpsc::Sender<Outbound>,
        inbound: mpsc::Receiver<SessionEvent>,
        close: oneshot::Sender<()>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            close: Some(close),
            tasks,
        }
    }

    /// Asks the remote side to close, then tears down the transport tasks.
    ///
    /// Best effort: a link that is already gone is not an error.
    pub fn close(&mut self) {
        if let Some(close) = self.close.take()
            && close.send(()).is_err()
        {
            tracing::debug!("close request not delivered: transport already gone");
        }
        let tasks: Vec<JoinHandle<()>> = self.tasks.drain(..).collect();
        match tokio::runtime::Handle::try_current() {
            // Let the writer flush the close frame before tearing down
            Ok(runtime) if !tasks.is_empty() => {
                runtime.spawn(async move {
                    for mut task in tasks {
                        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                            task.abort();
                        }
                    }
                });
            }
            _ => tasks.iter().for_each(JoinHandle::abort),
        }
        self.inbound.close();
    }
}

impl Drop for LiveLink {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Opens live sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a link configured by `config`.
    ///
    /// Returns once the transport is up; the session is confirmed open by a
    /// [`SessionEvent::Opened`] on the inbound side.
    async fn connect(&self, config: &LiveConfig) -> Result<LiveLink>;
}

/// Remote side of a [`MockConnector`] link, held by tests.
pub struct MockRemote {
    pub events: mpsc::Sender<SessionEvent>,
    pub received: mpsc::Receiver<Outbound>,
    close: oneshot::Receiver<()>,
    close_seen: bool,
}

impl MockRemote {
    /// Sends an event as if it came from the server.
    pub async fn emit(&self, event: SessionEvent) {
        // Receiver is gone once the session stopped; tests may emit late
        if let Err(e) = self.events.send(event).await {
            tracing::trace!("mock event after link closed: {}", e.0);
        }
    }

    /// Whether the client asked to close the link.
    pub fn close_requested(&mut self) -> bool {
        if !self.close_seen {
            self.close_seen = self.close.try_recv().is_ok();
        }
        self.close_seen
    }

    /// Drains everything the client sent so far.
    pub fn drain(&mut self) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(message) = self.received.try_recv() {
            out.push(message);
        }
        out
    }
}

#[derive(Default)]
struct MockConnectorState {
    configs: Vec<LiveConfig>,
    remotes: Vec<MockRemote>,
    fail_with: Option<String>,
    auto_open: bool,
}

/// Connector that keeps links in memory, for tests.
///
/// Each successful `connect` records the config and stores a [`MockRemote`]
/// that tests take with [`MockConnector::take_remote`].
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockConnectorState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every connect with a connection error.
    pub fn with_failure(self, message: &str) -> Self {
        self.with_state(|s| s.fail_with = Some(message.to_string()));
        self
    }

    /// Queue an `Opened` event as soon as the link is created.
    pub fn with_auto_open(self) -> Self {
        self.with_state(|s| s.auto_open = true);
        self
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MockConnectorState) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Remote end of the oldest link not yet taken.
    pub fn take_remote(&self) -> Option<MockRemote> {
        self.with_state(|s| {
            if s.remotes.is_empty() {
                None
            } else {
                Some(s.remotes.remove(0))
            }
        })
    }

    /// Configs passed to every connect call so far.
    pub fn configs(&self) -> Vec<LiveConfig> {
        self.with_state(|s| s.configs.clone())
    }

    pub fn connect_count(&self) -> usize {
        self.with_state(|s| s.configs.len())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, config: &LiveConfig) -> Result<LiveLink> {
        self.with_state(|s| {
            s.configs.push(config.clone());
            if let Some(message) = &s.fail_with {
                return Err(VaaniError::Connection {
                    message: message.clone(),
                });
            }

            let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_queue.max(1));
            let (event_tx, event_rx) = mpsc::channel(64);
            let (close_tx, close_rx) = oneshot::channel();
            if s.auto_open
                && let Err(e) = event_tx.try_send(SessionEvent::Opened)
            {
                tracing::trace!("mock open not queued: {}", e);
            }
            s.remotes.push(MockRemote {
                events: event_tx,
                received: outbound_rx,
                close: close_rx,
                close_seen: false,
            });
            Ok(LiveLink::new(outbound_tx, event_rx, close_tx, Vec::new()))
        })
    }
}
