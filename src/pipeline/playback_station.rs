//! Feeds inbound audio to the playback scheduler in arrival order.
//!
//! Chunks are decoded on the blocking pool, several at a time, but the
//! results are applied to the scheduler strictly in the order the commands
//! were queued. Interruptions travel through the same queue, so they land
//! after every chunk received before them and before every chunk after.

use crate::audio::pcm;
use crate::error::{Result, VaaniError};
use crate::pipeline::scheduler::SharedScheduler;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Work for the playback station.
#[derive(Debug)]
pub enum PlaybackCommand {
    /// Base64 PCM audio to decode and schedule.
    Chunk(String),
    /// Stop everything scheduled so far.
    Interrupt,
    /// Acknowledged once every earlier command has been applied.
    Barrier(oneshot::Sender<()>),
}

enum Prepared {
    Frame(Result<crate::audio::frame::AudioFrame>),
    Interrupt,
    Barrier(oneshot::Sender<()>),
}

/// Handle to the running station task.
pub struct PlaybackStation {
    commands: mpsc::UnboundedSender<PlaybackCommand>,
    task: JoinHandle<()>,
}

impl PlaybackStation {
    /// Starts the station on the current tokio runtime.
    ///
    /// `sample_rate` and `channels` describe the inbound PCM; `concurrency`
    /// bounds how many chunks are decoded ahead of the scheduler.
    pub fn spawn(
        scheduler: SharedScheduler,
        sample_rate: u32,
        channels: u16,
        concurrency: usize,
    ) -> Self {
        let (commands, mut rx) = mpsc::unbounded_channel::<PlaybackCommand>();

        let task = tokio::spawn(async move {
            let queued = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
            let mut prepared = queued
                .map(move |command| async move {
                    match command {
                        PlaybackCommand::Chunk(payload) => {
                            let decoded = tokio::task::spawn_blocking(move || {
                                pcm::decode_frame(&payload, sample_rate, channels)
                            })
                            .await
                            .unwrap_or_else(|e| {
                                Err(VaaniError::Codec {
                                    message: format!("decode task failed: {}", e),
                                })
                            });
                            Prepared::Frame(decoded)
                        }
                        PlaybackCommand::Interrupt => Prepared::Interrupt,
                        PlaybackCommand::Barrier(ack) => Prepared::Barrier(ack),
                    }
                })
                .buffered(concurrency.max(1));

            while let Some(item) = prepared.next().await {
                match item {
                    Prepared::Frame(Ok(frame)) => {
                        let result = match scheduler.lock() {
                            Ok(mut scheduler) => scheduler.schedule(frame).map(|_| ()),
                            Err(e) => Err(VaaniError::AudioOutput {
                                message: format!("scheduler lock poisoned: {}", e),
                            }),
                        };
                        if let Err(e) = result {
                            tracing::warn!("could not schedule audio chunk: {}", e);
                        }
                    }
                    Prepared::Frame(Err(e)) => {
                        tracing::warn!("dropping undecodable audio chunk: {}", e);
                    }
                    Prepared::Interrupt => match scheduler.lock() {
                        Ok(mut scheduler) => {
                            scheduler.interrupt();
                        }
                        Err(e) => tracing::warn!("scheduler lock poisoned: {}", e),
                    },
                    Prepared::Barrier(ack) => {
                        if ack.send(()).is_err() {
                            tracing::trace!("flush waiter went away");
                        }
                    }
                }
            }
            tracing::debug!("playback station finished");
        });

        Self { commands, task }
    }

    fn send(&self, command: PlaybackCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| VaaniError::AudioOutput {
                message: "playback station is not running".to_string(),
            })
    }

    /// Queues an inbound audio chunk.
    pub fn push_chunk(&self, payload: String) -> Result<()> {
        self.send(PlaybackCommand::Chunk(payload))
    }

    /// Queues an interruption behind every chunk already queued.
    pub fn interrupt(&self) -> Result<()> {
        self.send(PlaybackCommand::Interrupt)
    }

    /// Waits until everything queued so far has reached the scheduler.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(PlaybackCommand::Barrier(ack))?;
        done.await.map_err(|_| VaaniError::AudioOutput {
            message: "playback station stopped before flushing".to_string(),
        })
    }

    /// Stops the station; queued commands are discarded.
    pub fn shutdown(self) {
        self.task.abort();
    }
}
