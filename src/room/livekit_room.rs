//! # LiveKit Room
//!
//! Production implementation of the room traits on top of the LiveKit client
//! SDK. One `LiveKitRoom` is one connection of the agent participant to one
//! room.
//!
//! ## Tasks:
//! - **Event loop**: drains `RoomEvent`s; links the session input to one
//!   participant, starts a forwarding task for that participant's audio tracks
//!   and flips the disconnect flag on `Disconnected` or when the last remote
//!   participant leaves
//! - **Track forwarders**: resample the linked participant's audio to 24 kHz
//!   mono through `NativeAudioStream` and push frames into the session's input
//!   channel once a session has bound
//!
//! The model hears one speaker. The first participant whose audio arrives is
//! linked; audio from everyone else is ignored. When the linked participant
//! leaves, the next participant whose audio track is subscribed takes over.
//! Frames that arrive before a session binds are dropped.

use super::token::{agent_identity, mint_token, TokenRequest};
use super::{
    AudioOutput, DataPublisher, JobRoom, RoomAudio, RoomConnector, RoomDirectory,
    RoomInputOptions, RoomSummary, SessionRoom, NUM_CHANNELS, SAMPLE_RATE,
};
use crate::config::LiveKitConfig;
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use futures_util::StreamExt;
use livekit::options::TrackPublishOptions;
use livekit::prelude::*;
use livekit::webrtc::audio_frame::AudioFrame;
use livekit::webrtc::audio_source::native::NativeAudioSource;
use livekit::webrtc::audio_source::{AudioSourceOptions, RtcAudioSource};
use livekit::webrtc::audio_stream::native::NativeAudioStream;
use livekit_api::services::room::RoomClient;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const INPUT_QUEUE_FRAMES: usize = 64;
const OUTPUT_QUEUE_MS: u32 = 1_000;
const AGENT_TRACK_NAME: &str = "agent-voice";

type InputSlot = Arc<Mutex<Option<mpsc::Sender<Vec<i16>>>>>;

pub struct LiveKitRoom {
    room: Arc<Room>,
    name: String,
    input_slot: InputSlot,
    disconnected: watch::Receiver<bool>,
    event_task: JoinHandle<()>,
}

impl LiveKitRoom {
    /// Join `room_name` as a fresh agent participant.
    pub async fn connect(config: &LiveKitConfig, room_name: &str) -> AgentResult<Self> {
        let identity = agent_identity(config);
        let token = mint_token(
            config,
            &TokenRequest {
                room: room_name.to_string(),
                identity: identity.clone(),
                name: Some(config.agent_name.clone()),
            },
        )?;

        let (room, events) = Room::connect(&config.url, &token, RoomOptions::default()).await?;
        info!(room = %room_name, identity = %identity, "Connected to LiveKit room");

        let room = Arc::new(room);
        let input_slot: InputSlot = Arc::new(Mutex::new(None));
        let (disconnected_tx, disconnected) = watch::channel(false);
        let event_task = tokio::spawn(handle_room_events(
            room.clone(),
            events,
            input_slot.clone(),
            disconnected_tx,
        ));

        Ok(Self {
            room,
            name: room_name.to_string(),
            input_slot,
            disconnected,
            event_task,
        })
    }
}

impl Drop for LiveKitRoom {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

#[async_trait]
impl DataPublisher for LiveKitRoom {
    async fn publish_data(&self, payload: Vec<u8>) -> AgentResult<()> {
        let packet = DataPacket {
            payload,
            reliable: true,
            ..Default::default()
        };
        self.room
            .local_participant()
            .publish_data(packet)
            .await
            .map_err(|e| AgentError::Publish(e.to_string()))
    }
}

#[async_trait]
impl SessionRoom for LiveKitRoom {
    async fn bind_audio(&self, options: &RoomInputOptions) -> AgentResult<RoomAudio> {
        let source = NativeAudioSource::new(
            AudioSourceOptions::default(),
            SAMPLE_RATE,
            NUM_CHANNELS,
            OUTPUT_QUEUE_MS,
        );
        let track = LocalAudioTrack::create_audio_track(
            AGENT_TRACK_NAME,
            RtcAudioSource::Native(source.clone()),
        );
        self.room
            .local_participant()
            .publish_track(
                LocalTrack::Audio(track),
                TrackPublishOptions {
                    source: TrackSource::Microphone,
                    ..Default::default()
                },
            )
            .await?;

        let (input_tx, input) = mpsc::channel(INPUT_QUEUE_FRAMES);
        if let Ok(mut slot) = self.input_slot.lock() {
            *slot = Some(input_tx);
        }

        info!(
            room = %self.name,
            noise_cancellation = ?options.noise_cancellation,
            "Session bound to room audio"
        );

        Ok(RoomAudio {
            input,
            output: Arc::new(LiveKitAudioOutput { source }),
        })
    }
}

#[async_trait]
impl JobRoom for LiveKitRoom {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn remote_participant_count(&self) -> usize {
        self.room.remote_participants().len()
    }

    async fn wait_disconnected(&self) {
        let mut disconnected = self.disconnected.clone();
        // An Err means the event loop is gone, which is a disconnect too
        let _ = disconnected.wait_for(|gone| *gone).await;
    }

    async fn close(&self) {
        if let Err(e) = self.room.close().await {
            warn!(room = %self.name, error = %e, "Room close failed");
        }
    }
}

async fn handle_room_events(
    room: Arc<Room>,
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    input_slot: InputSlot,
    disconnected: watch::Sender<bool>,
) {
    let mut link = InputLink::default();
    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();

    while let Some(event) = events.recv().await {
        match event {
            RoomEvent::TrackSubscribed {
                track: RemoteTrack::Audio(track),
                participant,
                ..
            } => {
                let identity = participant.identity().0;
                if link.accept(&identity) {
                    info!(participant = %identity, "Session input linked to participant audio");
                    forwarders.push(tokio::spawn(forward_track(track, input_slot.clone())));
                } else {
                    debug!(participant = %identity, "Ignoring audio from unlinked participant");
                }
            }
            RoomEvent::ParticipantDisconnected(participant) => {
                let identity = participant.identity().0;
                debug!(participant = %identity, "Participant left");
                if link.release(&identity) {
                    for forwarder in forwarders.drain(..) {
                        forwarder.abort();
                    }
                }
                if room.remote_participants().is_empty() {
                    info!("Last participant left the room");
                    break;
                }
            }
            RoomEvent::Disconnected { reason } => {
                info!(?reason, "Disconnected from room");
                break;
            }
            _ => {}
        }
    }

    for forwarder in forwarders {
        forwarder.abort();
    }
    if let Ok(mut slot) = input_slot.lock() {
        slot.take();
    }
    let _ = disconnected.send(true);
}

/// Which participant's audio feeds the session.
#[derive(Debug, Default)]
struct InputLink {
    linked: Option<String>,
}

impl InputLink {
    /// Whether audio from `identity` should reach the session. Links
    /// `identity` when nobody is linked yet.
    fn accept(&mut self, identity: &str) -> bool {
        match &self.linked {
            Some(linked) => linked == identity,
            None => {
                self.linked = Some(identity.to_string());
                true
            }
        }
    }

    /// Unlink `identity`. Returns true when it was the linked participant.
    fn release(&mut self, identity: &str) -> bool {
        if self.linked.as_deref() == Some(identity) {
            self.linked = None;
            true
        } else {
            false
        }
    }
}

async fn forward_track(track: RemoteAudioTrack, input_slot: InputSlot) {
    let mut stream = NativeAudioStream::new(track.rtc_track(), SAMPLE_RATE as i32, NUM_CHANNELS as i32);

    while let Some(frame) = stream.next().await {
        let sender = match input_slot.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => break,
        };
        let Some(sender) = sender else {
            continue;
        };
        if sender.send(frame.data.to_vec()).await.is_err() {
            debug!("Session input closed, stopping track forwarder");
            break;
        }
    }
}

struct LiveKitAudioOutput {
    source: NativeAudioSource,
}

#[async_trait]
impl AudioOutput for LiveKitAudioOutput {
    async fn push_frame(&self, samples: Vec<i16>) -> AgentResult<()> {
        let samples_per_channel = samples.len() as u32 / NUM_CHANNELS;
        let frame = AudioFrame {
            data: samples.into(),
            sample_rate: SAMPLE_RATE,
            num_channels: NUM_CHANNELS,
            samples_per_channel,
        };
        self.source
            .capture_frame(&frame)
            .await
            .map_err(|e| AgentError::Room(format!("audio capture failed: {}", e)))
    }

    fn clear(&self) {
        self.source.clear_buffer();
    }
}

/// Opens a [`LiveKitRoom`] per job.
pub struct LiveKitConnector {
    config: LiveKitConfig,
}

impl LiveKitConnector {
    pub fn new(config: LiveKitConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RoomConnector for LiveKitConnector {
    async fn connect(&self, room_name: &str) -> AgentResult<Arc<dyn JobRoom>> {
        let room = LiveKitRoom::connect(&self.config, room_name).await?;
        Ok(Arc::new(room))
    }
}

/// Room listing through the LiveKit room service API.
pub struct LiveKitDirectory {
    client: RoomClient,
}

impl LiveKitDirectory {
    pub fn new(http_url: &str, config: &LiveKitConfig) -> Self {
        Self {
            client: RoomClient::with_api_key(http_url, &config.api_key, &config.api_secret),
        }
    }
}

#[async_trait]
impl RoomDirectory for LiveKitDirectory {
    async fn list_rooms(&self) -> AgentResult<Vec<RoomSummary>> {
        let rooms = self
            .client
            .list_rooms(Vec::new())
            .await
            .map_err(|e| {
                warn!(error = %e, "Room listing failed");
                AgentError::Room(format!("room service error: {}", e))
            })?;

        Ok(rooms
            .into_iter()
            .map(|room| RoomSummary {
                name: room.name,
                num_participants: room.num_participants,
            })
            .collect())
    }
}
