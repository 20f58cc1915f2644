//! End-to-end conversation flows against in-memory devices and link.

use std::sync::Arc;
use std::time::Duration;
use vaani::audio::pcm;
use vaani::audio::recorder::MockAudioSource;
use vaani::live::connector::{MockConnector, MockRemote, Outbound};
use vaani::persona;
use vaani::session::devices::MockDevices;
use vaani::session::{SessionEvent, SessionManager, SessionOptions, SessionState};
use vaani::transcript::Role;
use vaani::VaaniError;

const TIMEOUT: Duration = Duration::from_secs(5);

fn session(connector: &MockConnector, devices: &MockDevices) -> SessionManager {
    let persona = persona::find(&persona::builtin(), "vedic-seer").unwrap();
    SessionManager::new(Arc::new(connector.clone()), Arc::new(devices.clone()), persona)
        .with_options(SessionOptions {
            frame_size: 4,
            ..SessionOptions::default()
        })
}

/// Emits an event on the remote side and feeds it through the manager.
async fn deliver(session: &mut SessionManager, remote: &MockRemote, event: SessionEvent) {
    remote.emit(event).await;
    let event = tokio::time::timeout(TIMEOUT, session.next_event())
        .await
        .expect("event not delivered in time")
        .expect("session ended unexpectedly");
    session.dispatch(event);
}

/// Base64 payload of `samples` mono samples at 24 kHz.
fn speech(samples: usize) -> String {
    pcm::encode(&vec![0.25; samples], 24000).data
}

async fn go_live(connector: &MockConnector, session: &mut SessionManager) -> MockRemote {
    session.start().await.unwrap();
    let remote = connector.take_remote().unwrap();
    deliver(session, &remote, SessionEvent::Opened).await;
    assert_eq!(session.state(), SessionState::Live);
    remote
}

#[tokio::test]
async fn microphone_frames_reach_the_link_as_pcm() {
    let connector = MockConnector::new();
    let devices = MockDevices::new().with_source(
        MockAudioSource::new().with_samples(vec![0.0, 0.5, -0.5, 1.0, 0.25, -0.25, 0.75, -1.0]),
    );
    let mut session = session(&connector, &devices);
    let mut remote = go_live(&connector, &mut session).await;

    let mut chunks = Vec::new();
    while chunks.len() < 2 {
        let message = tokio::time::timeout(TIMEOUT, remote.received.recv())
            .await
            .expect("no frame sent in time")
            .expect("link closed");
        let Outbound::Media(chunk) = message;
        chunks.push(chunk);
    }

    for chunk in &chunks {
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        assert_eq!(pcm::decode(&chunk.data).unwrap().len(), 8);
    }
    let first = pcm::decode(&chunks[0].data).unwrap();
    assert_eq!(i16::from_le_bytes([first[2], first[3]]), 16384);
    assert_eq!(i16::from_le_bytes([first[6], first[7]]), 32767);

    session.stop();
}

#[tokio::test]
async fn reply_plays_gaplessly_and_barge_in_silences_it() {
    let connector = MockConnector::new();
    let devices = MockDevices::new();
    let output = devices.output();
    let mut session = session(&connector, &devices);
    let remote = go_live(&connector, &mut session).await;

    // 0.1s, 0.2s and 0.05s of speech
    for samples in [2400, 4800, 1200] {
        deliver(&mut session, &remote, SessionEvent::Audio(speech(samples))).await;
    }
    session.flush_playback().await.unwrap();

    let starts: Vec<f64> = output.started().iter().map(|u| u.start_time).collect();
    assert_eq!(starts.len(), 3);
    assert!((starts[0] - 0.0).abs() < 1e-9);
    assert!((starts[1] - 0.1).abs() < 1e-9);
    assert!((starts[2] - 0.3).abs() < 1e-9);
    assert!((session.next_start_time() - 0.35).abs() < 1e-9);
    assert_eq!(session.active_playback_units(), 3);

    deliver(&mut session, &remote, SessionEvent::Interrupted).await;
    session.flush_playback().await.unwrap();

    let mut stopped = output.stopped();
    stopped.sort_unstable();
    let mut started: Vec<u64> = output.started().iter().map(|u| u.id).collect();
    started.sort_unstable();
    assert_eq!(stopped, started);
    assert_eq!(session.active_playback_units(), 0);
    assert_eq!(session.next_start_time(), 0.0);
    assert_eq!(session.state(), SessionState::Live);

    session.stop();
}

#[tokio::test]
async fn chunk_arriving_after_silence_starts_now() {
    let connector = MockConnector::new();
    let devices = MockDevices::new();
    let output = devices.output();
    let mut session = session(&connector, &devices);
    let remote = go_live(&connector, &mut session).await;

    deliver(&mut session, &remote, SessionEvent::Audio(speech(2400))).await;
    session.flush_playback().await.unwrap();
    output.advance_to(2.0);

    deliver(&mut session, &remote, SessionEvent::Audio(speech(2400))).await;
    session.flush_playback().await.unwrap();

    let second = &output.started()[1];
    assert!((second.start_time - 2.0).abs() < 1e-9);
    assert!((session.next_start_time() - 2.1).abs() < 1e-9);

    session.stop();
}

#[tokio::test]
async fn a_full_turn_lands_in_the_transcript() {
    let connector = MockConnector::new();
    let devices = MockDevices::new();
    let mut session = session(&connector, &devices);
    let remote = go_live(&connector, &mut session).await;

    for event in [
        SessionEvent::InputTranscript("What is ".into()),
        SessionEvent::InputTranscript("dharma?".into()),
        SessionEvent::OutputTranscript("Dharma is ".into()),
        SessionEvent::OutputTranscript("right action.".into()),
    ] {
        deliver(&mut session, &remote, event).await;
    }
    assert_eq!(session.pending_turn().pending_user(), "What is dharma?");
    deliver(&mut session, &remote, SessionEvent::TurnComplete).await;

    let entries = session.transcript().to_vec();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].role, Role::User);
    assert_eq!(entries[0].text, "What is dharma?");
    assert_eq!(entries[1].role, Role::Model);
    assert_eq!(entries[1].text, "Dharma is right action.");

    let json = session.transcript().to_json().unwrap();
    assert!(json.contains("\"role\": \"user\""));

    session.stop();
    // Transcript outlives the session
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn muted_microphone_sends_nothing() {
    let connector = MockConnector::new();
    let devices = MockDevices::new()
        .with_source(MockAudioSource::new().with_samples(vec![0.5; 8]));
    let mut session = session(&connector, &devices);
    session.set_muted(true);

    session.start().await.unwrap();
    let mut remote = connector.take_remote().unwrap();

    let waited = tokio::time::timeout(TIMEOUT, async {
        while !devices.source_state().was_stopped() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "capture never finished");

    assert!(remote.drain().is_empty());
    assert_eq!(session.capture_stats().muted(), 2);
    assert_eq!(session.capture_stats().sent(), 0);

    session.stop();
}

#[tokio::test]
async fn denied_microphone_is_reported_and_nothing_connects() {
    let connector = MockConnector::new();
    let devices = MockDevices::new().with_microphone_error("Microphone access denied by user");
    let mut session = session(&connector, &devices);

    let err = session.start().await.unwrap_err();

    assert!(matches!(err, VaaniError::Permission { .. }));
    assert!(err.is_user_visible());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.last_error().unwrap().contains("denied"));
    assert_eq!(connector.connect_count(), 0);
    assert!(session.next_event().await.is_none());
}

#[tokio::test]
async fn remote_close_releases_devices_and_allows_restart() {
    let connector = MockConnector::new();
    let devices = MockDevices::new();
    let mut session = session(&connector, &devices);
    let remote = go_live(&connector, &mut session).await;

    deliver(&mut session, &remote, SessionEvent::Closed).await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.last_error().is_none());
    assert!(devices.source_state().was_stopped());
    assert!(devices.output().is_closed());

    session.stop();
    assert_eq!(session.state(), SessionState::Closed);

    session.reset().unwrap();
    let _remote = go_live(&connector, &mut session).await;
    assert_eq!(connector.connect_count(), 2);
    session.stop();
}
