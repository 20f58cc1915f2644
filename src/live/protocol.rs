//! JSON messages of the bidirectional live content API.
//!
//! Only the subset the client uses is modelled. Unknown fields are ignored
//! so newer servers keep working.

use crate::audio::pcm::EncodedChunk;
use crate::error::{Result, VaaniError};
use crate::live::connector::LiveConfig;
use crate::session::events::SessionEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_transcription: Option<Empty>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`; presence alone enables a feature.
#[derive(Debug, Serialize)]
pub struct Empty {}

impl SetupMessage {
    pub fn from_config(config: &LiveConfig) -> Self {
        let modality = if config.request_audio_output {
            "AUDIO"
        } else {
            "TEXT"
        };
        Self {
            setup: Setup {
                model: config.model.clone(),
                generation_config: GenerationConfig {
                    response_modalities: vec![modality.to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.as_str().to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![TextPart {
                        text: config.system_instruction.clone(),
                    }],
                },
                input_audio_transcription: config.transcribe_input.then_some(Empty {}),
                output_audio_transcription: config.transcribe_output.then_some(Empty {}),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<EncodedChunk>,
}

/// Serializes the session setup request.
pub fn setup_json(config: &LiveConfig) -> Result<String> {
    Ok(serde_json::to_string(&SetupMessage::from_config(config))?)
}

/// Serializes one captured frame as realtime input.
pub fn media_json(chunk: EncodedChunk) -> Result<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: vec![chunk],
        },
    };
    Ok(serde_json::to_string(&message)?)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
    #[serde(default)]
    interrupted: bool,
    input_transcription: Option<Transcription>,
    output_transcription: Option<Transcription>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
struct InlineData {
    data: String,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    text: Option<String>,
}

fn non_empty(transcription: Option<Transcription>) -> Option<String> {
    transcription
        .and_then(|t| t.text)
        .filter(|text| !text.is_empty())
}

/// Translates one server message into session events.
///
/// Within a message, events come out as: transcripts (model, then user),
/// turn completion, audio parts, interruption.
pub fn parse_server_message(text: &str) -> Result<Vec<SessionEvent>> {
    let message: ServerMessage =
        serde_json::from_str(text).map_err(|e| VaaniError::Protocol {
            message: format!("unreadable server message: {}", e),
        })?;

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(SessionEvent::Opened);
    }

    if let Some(content) = message.server_content {
        if let Some(text) = non_empty(content.output_transcription) {
            events.push(SessionEvent::OutputTranscript(text));
        }
        if let Some(text) = non_empty(content.input_transcription) {
            events.push(SessionEvent::InputTranscript(text));
        }
        if content.turn_complete {
            events.push(SessionEvent::TurnComplete);
        }
        if let Some(turn) = content.model_turn {
            events.extend(
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data)
                    .filter(|inline| !inline.data.is_empty())
                    .map(|inline| SessionEvent::Audio(inline.data)),
            );
        }
        if content.interrupted {
            events.push(SessionEvent::Interrupted);
        }
    }

    if message.go_away.is_some() {
        tracing::info!("server announced it will close the session soon");
    }

    Ok(events)
}
