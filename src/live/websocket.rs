//! WebSocket transport for the live session.

use crate::error::{Result, VaaniError};
use crate::live::connector::{Connector, LiveConfig, LiveLink, Outbound};
use crate::live::protocol;
use crate::session::events::SessionEvent;
use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Inbound events buffered between the socket reader and the session.
const INBOUND_BUFFER: usize = 256;

/// Connects to the live API over a WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

fn connection_error(message: impl Into<String>) -> VaaniError {
    VaaniError::Connection {
        message: message.into(),
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, config: &LiveConfig) -> Result<LiveLink> {
        if config.api_key.is_empty() {
            return Err(connection_error("no API key configured"));
        }

        let url = format!("{}?key={}", config.endpoint, config.api_key);
        tracing::debug!("connecting to {} ({})", config.endpoint, config.model);

        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        write
            .send(WsMessage::Text(protocol::setup_json(config)?))
            .await
            .map_err(|e| connection_error(format!("setup not sent: {}", e)))?;

        let (out_tx, out_rx) = mpsc::channel::<Outbound>(config.outbound_queue.max(1));
        let (close_tx, close_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(INBOUND_BUFFER);

        let writer = tokio::spawn(write_loop(write, out_rx, close_rx));

        let reader = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                let text = match result {
                    Ok(WsMessage::Text(text)) => text,
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            tracing::warn!("ignoring non UTF-8 binary message");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        if let Some(frame) = frame
                            && frame.code != CloseCode::Normal
                        {
                            let detail = format!("closed by server ({}): {}", frame.code, frame.reason);
                            if event_tx.send(SessionEvent::Error(detail)).await.is_err() {
                                tracing::trace!("server close after session ended");
                            }
                            return;
                        }
                        tracing::info!("live session closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        if let Err(unsent) = event_tx.send(SessionEvent::Error(e.to_string())).await {
                            tracing::trace!("socket error after session ended: {}", unsent.0);
                        }
                        return;
                    }
                };

                match protocol::parse_server_message(&text) {
                    Ok(events) => {
                        for event in events {
                            tracing::trace!("inbound {}", event);
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let preview: String = text.chars().take(100).collect();
                        tracing::warn!("{}: {}", e, preview);
                    }
                }
            }
            if event_tx.send(SessionEvent::Closed).await.is_err() {
                tracing::trace!("socket ended after session ended");
            }
        });

        Ok(LiveLink::new(out_tx, event_rx, close_tx, vec![writer, reader]))
    }
}

/// Forwards queued frames to the socket until the queue ends or a close is
/// requested. A close request wins over frames still waiting in the queue.
async fn write_loop<S>(
    mut write: S,
    mut outbound: mpsc::Receiver<Outbound>,
    mut close: oneshot::Receiver<()>,
) where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        tokio::select! {
            biased;
            _ = &mut close => {
                if let Err(e) = write.send(WsMessage::Close(None)).await {
                    tracing::debug!("close frame not sent: {}", e);
                }
                break;
            }
            message = outbound.recv() => {
                let Some(Outbound::Media(chunk)) = message else { break };
                let text = match protocol::media_json(chunk) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("dropping unserializable frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = write.send(WsMessage::Text(text)).await {
                    tracing::warn!("live socket write failed: {}", e);
                    break;
                }
            }
        }
    }
    if let Err(e) = write.close().await {
        tracing::debug!("live socket close: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm;
    use crate::persona;

    #[tokio::test]
    async fn close_request_jumps_queued_frames() {
        let (outbound, outbound_rx) = mpsc::channel(2);
        let (close, close_rx) = oneshot::channel();
        for _ in 0..2 {
            outbound
                .try_send(Outbound::Media(pcm::encode(&[0.5; 4], 16000)))
                .unwrap();
        }
        close.send(()).unwrap();

        let mut sent: Vec<WsMessage> = Vec::new();
        write_loop(&mut sent, outbound_rx, close_rx).await;

        assert_eq!(sent, vec![WsMessage::Close(None)]);
    }

    #[tokio::test]
    async fn frames_go_out_as_realtime_input_until_queue_ends() {
        let (outbound, outbound_rx) = mpsc::channel(2);
        let (_close, close_rx) = oneshot::channel::<()>();
        outbound
            .try_send(Outbound::Media(pcm::encode(&[0.5; 4], 16000)))
            .unwrap();
        drop(outbound);

        let mut sent: Vec<WsMessage> = Vec::new();
        write_loop(&mut sent, outbound_rx, close_rx).await;

        assert_eq!(sent.len(), 1);
        match &sent[0] {
            WsMessage::Text(text) => assert!(text.contains("audio/pcm;rate=16000")),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_dialing() {
        let persona = persona::find(&persona::builtin(), "divine-mentor").unwrap();
        let config = LiveConfig::for_persona(&persona).with_endpoint("ws://127.0.0.1:9");

        match WebSocketConnector::new().connect(&config).await {
            Err(VaaniError::Connection { message }) => assert!(message.contains("API key")),
            Err(other) => panic!("Expected Connection error, got {:?}", other),
            Ok(_) => panic!("Expected Connection error, got a link"),
        }
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connection_error() {
        let persona = persona::find(&persona::builtin(), "divine-mentor").unwrap();
        let config = LiveConfig::for_persona(&persona)
            .with_endpoint("ws://127.0.0.1:9")
            .with_api_key("test-key");

        let result = WebSocketConnector::new().connect(&config).await;
        assert!(matches!(result, Err(VaaniError::Connection { .. })));
    }
}
