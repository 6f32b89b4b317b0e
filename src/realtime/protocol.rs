//! # Realtime Wire Protocol
//!
//! JSON events exchanged with the realtime model over its WebSocket. Only the
//! subset the session uses is modelled; every other server event type lands in
//! [`ServerEvent::Other`] and is ignored.
//!
//! ## Client → Server:
//! - `session.update`: instructions, voice, audio formats, VAD, noise reduction
//! - `input_audio_buffer.append`: base64 PCM16 microphone audio
//! - `response.create`: ask the model to speak, optionally with extra instructions
//!
//! ## Server → Client:
//! - `session.updated`: settings accepted
//! - `input_audio_buffer.speech_started`: the user started talking
//! - `conversation.item.input_audio_transcription.completed`: final user transcript
//! - `response.audio.delta`: base64 PCM16 speech
//! - `response.audio_transcript.done`: final assistant transcript
//! - `response.done`, `error`

use super::codec::{decode_pcm16, encode_pcm16};
use super::{ClientCommand, ModelEvent, NoiseReduction, SessionSettings};
use crate::error::AgentResult;
use serde::{Deserialize, Serialize};

const AUDIO_FORMAT: &str = "pcm16";

/// Model-side knobs that are not part of the conversation itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTuning {
    pub transcription_model: String,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },

    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

#[derive(Debug, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: TranscriptionConfig,
    pub turn_detection: TurnDetection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<NoiseReductionConfig>,
    pub temperature: f32,
}

#[derive(Debug, Serialize)]
pub struct TranscriptionConfig {
    pub model: String,
}

#[derive(Debug, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Serialize)]
pub struct NoiseReductionConfig {
    #[serde(rename = "type")]
    pub kind: NoiseReduction,
}

#[derive(Debug, Serialize)]
pub struct ResponseConfig {
    pub instructions: String,
}

impl ClientEvent {
    pub fn from_command(command: ClientCommand, tuning: &ModelTuning) -> Self {
        match command {
            ClientCommand::UpdateSession(settings) => ClientEvent::SessionUpdate {
                session: SessionConfig::new(settings, tuning),
            },
            ClientCommand::AppendAudio(samples) => ClientEvent::InputAudioAppend {
                audio: encode_pcm16(&samples),
            },
            ClientCommand::CreateResponse { instructions } => ClientEvent::ResponseCreate {
                response: instructions.map(|instructions| ResponseConfig { instructions }),
            },
        }
    }
}

impl SessionConfig {
    fn new(settings: SessionSettings, tuning: &ModelTuning) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: settings.instructions,
            voice: settings.voice,
            input_audio_format: AUDIO_FORMAT.to_string(),
            output_audio_format: AUDIO_FORMAT.to_string(),
            input_audio_transcription: TranscriptionConfig {
                model: tuning.transcription_model.clone(),
            },
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
            },
            input_audio_noise_reduction: settings
                .noise_reduction
                .map(|kind| NoiseReductionConfig { kind }),
            temperature: tuning.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {},

    #[serde(rename = "session.updated")]
    SessionUpdated {},

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted { item_id: String, transcript: String },

    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { delta: String },

    #[serde(
        rename = "response.audio_transcript.done",
        alias = "response.output_audio_transcript.done"
    )]
    AudioTranscriptDone { item_id: String, transcript: String },

    #[serde(rename = "response.done")]
    ResponseDone {},

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ServerEvent {
    pub fn parse(text: &str) -> AgentResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// The session-level meaning of this event, if it has one.
    pub fn into_model_event(self) -> AgentResult<Option<ModelEvent>> {
        let event = match self {
            ServerEvent::SessionUpdated {} => Some(ModelEvent::SessionUpdated),
            ServerEvent::SpeechStarted {} => Some(ModelEvent::SpeechStarted),
            ServerEvent::InputTranscriptionCompleted { item_id, transcript } => {
                Some(ModelEvent::UserTranscriptCommitted { item_id, transcript })
            }
            ServerEvent::AudioDelta { delta } => Some(ModelEvent::AudioDelta(decode_pcm16(&delta)?)),
            ServerEvent::AudioTranscriptDone { item_id, transcript } => {
                Some(ModelEvent::AgentTranscriptCommitted { item_id, transcript })
            }
            ServerEvent::ResponseDone {} => Some(ModelEvent::ResponseDone),
            ServerEvent::Error { error } => Some(ModelEvent::Error {
                message: match error.code {
                    Some(code) => format!("{} ({})", error.message, code),
                    None => error.message,
                },
            }),
            ServerEvent::SessionCreated {} | ServerEvent::Other => None,
        };
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn tuning() -> ModelTuning {
        ModelTuning {
            transcription_model: "whisper-1".to_string(),
            temperature: 0.8,
        }
    }

    fn to_value(command: ClientCommand) -> Value {
        serde_json::to_value(ClientEvent::from_command(command, &tuning())).unwrap()
    }

    #[test]
    fn test_session_update_shape() {
        let value = to_value(ClientCommand::UpdateSession(SessionSettings {
            instructions: "You are a helpful voice AI assistant.".to_string(),
            voice: "coral".to_string(),
            noise_reduction: Some(NoiseReduction::NearField),
        }));

        assert_eq!(value["type"], "session.update");
        assert_eq!(value["session"]["voice"], "coral");
        assert_eq!(value["session"]["input_audio_format"], "pcm16");
        assert_eq!(value["session"]["turn_detection"]["type"], "server_vad");
        assert_eq!(value["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(value["session"]["input_audio_noise_reduction"]["type"], "near_field");
    }

    #[test]
    fn test_session_update_without_noise_reduction() {
        let value = to_value(ClientCommand::UpdateSession(SessionSettings {
            instructions: "x".to_string(),
            voice: "alloy".to_string(),
            noise_reduction: None,
        }));
        assert!(value["session"].get("input_audio_noise_reduction").is_none());
    }

    #[test]
    fn test_response_create_carries_instructions() {
        let value = to_value(ClientCommand::CreateResponse {
            instructions: Some("Greet the user and offer your assistance.".to_string()),
        });
        assert_eq!(value["type"], "response.create");
        assert_eq!(
            value["response"]["instructions"],
            "Greet the user and offer your assistance."
        );

        let bare = to_value(ClientCommand::CreateResponse { instructions: None });
        assert!(bare.get("response").is_none());
    }

    #[test]
    fn test_user_transcript_event_is_passed_through_verbatim() {
        let event = ServerEvent::parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","event_id":"e1","item_id":"item_1","content_index":0,"transcript":"hello\n"}"#,
        )
        .unwrap();
        assert_eq!(
            event.into_model_event().unwrap(),
            Some(ModelEvent::UserTranscriptCommitted {
                item_id: "item_1".to_string(),
                transcript: "hello\n".to_string(),
            })
        );
    }

    #[test]
    fn test_agent_transcript_event_and_alias() {
        for kind in ["response.audio_transcript.done", "response.output_audio_transcript.done"] {
            let json = format!(
                r#"{{"type":"{}","response_id":"r1","item_id":"item_2","output_index":0,"content_index":0,"transcript":"Hi, how can I help?"}}"#,
                kind
            );
            let event = ServerEvent::parse(&json).unwrap();
            assert_eq!(
                event.into_model_event().unwrap(),
                Some(ModelEvent::AgentTranscriptCommitted {
                    item_id: "item_2".to_string(),
                    transcript: "Hi, how can I help?".to_string(),
                })
            );
        }
    }

    #[test]
    fn test_audio_delta_decodes_pcm() {
        let json = format!(
            r#"{{"type":"response.audio.delta","item_id":"i","delta":"{}"}}"#,
            encode_pcm16(&[10, -10])
        );
        let event = ServerEvent::parse(&json).unwrap();
        assert_eq!(
            event.into_model_event().unwrap(),
            Some(ModelEvent::AudioDelta(vec![10, -10]))
        );
    }

    #[test]
    fn test_error_event_includes_code() {
        let event = ServerEvent::parse(
            r#"{"type":"error","event_id":"e","error":{"type":"invalid_request_error","code":"invalid_value","message":"Invalid voice"}}"#,
        )
        .unwrap();
        assert_eq!(
            event.into_model_event().unwrap(),
            Some(ModelEvent::Error {
                message: "Invalid voice (invalid_value)".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_and_session_created_are_ignored() {
        let event = ServerEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(event.into_model_event().unwrap().is_none());

        let event =
            ServerEvent::parse(r#"{"type":"session.created","session":{"id":"sess_1"}}"#).unwrap();
        assert!(event.into_model_event().unwrap().is_none());

        let event =
            ServerEvent::parse(r#"{"type":"session.updated","session":{"id":"sess_1"}}"#).unwrap();
        assert_eq!(event.into_model_event().unwrap(), Some(ModelEvent::SessionUpdated));
    }
}
