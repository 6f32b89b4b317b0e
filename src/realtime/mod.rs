//! # Realtime Voice Model
//!
//! A realtime model takes microphone audio in and produces speech out, with
//! transcripts of both sides along the way. The session talks to it through a
//! pair of channels so the transport can live in its own tasks:
//!
//! ```text
//! AgentSession ──ClientCommand──▶ writer task ──JSON──▶ model
//! AgentSession ◀──ModelEvent──── reader task ◀──JSON── model
//! ```
//!
//! Dropping the command sender closes the connection.

pub mod codec;
pub mod openai;
pub mod protocol;

use crate::error::AgentResult;
use crate::room::NoiseCancellation;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

pub use openai::OpenAiRealtimeModel;

/// Input noise reduction applied by the model before transcription and VAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseReduction {
    NearField,
    FarField,
}

impl NoiseReduction {
    /// Map the room's noise-cancellation request onto the model's filter.
    pub fn from_room(mode: NoiseCancellation) -> Option<Self> {
        match mode {
            NoiseCancellation::Disabled => None,
            NoiseCancellation::Bvc => Some(NoiseReduction::NearField),
            NoiseCancellation::BvcTelephony => Some(NoiseReduction::FarField),
        }
    }
}

/// Everything the model needs to know about the conversation it is running.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub instructions: String,
    pub voice: String,
    pub noise_reduction: Option<NoiseReduction>,
}

/// Requests from the session to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    UpdateSession(SessionSettings),
    AppendAudio(Vec<i16>),
    CreateResponse { instructions: Option<String> },
}

/// What the model reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// The model accepted the latest session settings.
    SessionUpdated,
    /// Voice activity detected on the input; the user is talking.
    SpeechStarted,
    /// Final transcript of a user utterance.
    UserTranscriptCommitted { item_id: String, transcript: String },
    /// Final transcript of an assistant utterance.
    AgentTranscriptCommitted { item_id: String, transcript: String },
    AudioDelta(Vec<i16>),
    ResponseDone,
    Error { message: String },
}

/// Both ends of an open model connection.
pub struct RealtimeChannel {
    pub commands: mpsc::Sender<ClientCommand>,
    pub events: mpsc::Receiver<ModelEvent>,
}

#[async_trait]
pub trait RealtimeModel: Send + Sync {
    /// Open a new connection. The session follows up with an explicit
    /// `UpdateSession` carrying the same settings.
    async fn connect(&self, settings: &SessionSettings) -> AgentResult<RealtimeChannel>;

    /// Default voice configured for this model.
    fn voice(&self) -> &str;
}
