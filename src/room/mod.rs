//! # Room Binding
//!
//! The seams between a conversational session and the room it runs in. A room
//! gives the session three things:
//! - **Data publish**: broadcast an opaque payload to every participant
//! - **Audio input**: PCM frames from the participants' microphones
//! - **Audio output**: a place to push the assistant's synthesized speech
//!
//! [`livekit_room::LiveKitRoom`] is the production implementation. The traits exist
//! so the session and entrypoint can be exercised against in-memory rooms.
//!
//! ## Audio Format:
//! All frames crossing these traits are 16-bit signed PCM, mono, 24 kHz, the
//! format the realtime model speaks natively.

pub mod livekit_room;
pub mod token;

use crate::error::AgentResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use livekit_room::{LiveKitConnector, LiveKitDirectory};

/// Sample rate of every frame exchanged with the room.
pub const SAMPLE_RATE: u32 = 24_000;

/// Channel count of every frame exchanged with the room.
pub const NUM_CHANNELS: u32 = 1;

/// Noise filtering requested for the room's input audio.
///
/// ## Modes:
/// - **Disabled**: pass microphone audio through untouched
/// - **Bvc**: background voice cancellation tuned for close-talk microphones
/// - **BvcTelephony**: the same for narrow-band telephony audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseCancellation {
    Disabled,
    #[default]
    Bvc,
    BvcTelephony,
}

/// Options for how a session consumes room input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomInputOptions {
    pub noise_cancellation: NoiseCancellation,
}

/// Broadcast of opaque bytes to every participant in a room.
#[async_trait]
pub trait DataPublisher: Send + Sync {
    async fn publish_data(&self, payload: Vec<u8>) -> AgentResult<()>;
}

/// Sink for the assistant's speech.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Queue one chunk of PCM samples for playback.
    async fn push_frame(&self, samples: Vec<i16>) -> AgentResult<()>;

    /// Drop whatever is queued but not yet played (user barged in).
    fn clear(&self);
}

/// Audio endpoints handed to a session when it binds to a room.
pub struct RoomAudio {
    pub input: mpsc::Receiver<Vec<i16>>,
    pub output: Arc<dyn AudioOutput>,
}

/// A room a session can bind its audio to.
#[async_trait]
pub trait SessionRoom: Send + Sync {
    async fn bind_audio(&self, options: &RoomInputOptions) -> AgentResult<RoomAudio>;
}

/// Everything a job needs from its room.
#[async_trait]
pub trait JobRoom: DataPublisher + SessionRoom {
    fn name(&self) -> String;

    /// Participants in the room other than the agent.
    fn remote_participant_count(&self) -> usize;

    /// Resolves once the room connection is gone.
    async fn wait_disconnected(&self);

    /// Leave the room. Ends the session's audio input.
    async fn close(&self);
}

/// Opens rooms for jobs.
#[async_trait]
pub trait RoomConnector: Send + Sync {
    async fn connect(&self, room_name: &str) -> AgentResult<Arc<dyn JobRoom>>;
}

/// A room as listed by the room service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomSummary {
    pub name: String,
    pub num_participants: u32,
}

/// Lists the rooms that currently exist on the server.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn list_rooms(&self) -> AgentResult<Vec<RoomSummary>>;
}
