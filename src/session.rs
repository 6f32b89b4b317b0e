//! # Agent Session
//!
//! One conversational pipeline for one job: room audio goes to the realtime
//! model, the model's speech comes back into the room, and finalized
//! transcripts of both sides are handed to whoever subscribed to them.
//!
//! ## Usage:
//! ```ignore
//! let mut session = AgentSession::new(model);
//! session.on_user_speech_committed(|text| async move { Ok(()) });
//! session.start(room.as_ref(), Agent::default(), RoomInputOptions::default()).await?;
//! session.generate_reply("Greet the user and offer your assistance.").await?;
//! ```
//!
//! ## Tasks spawned by `start`:
//! - **input pump**: room microphone frames → `input_audio_buffer.append`
//! - **event loop**: model events → playout, barge-in, speech dispatch
//! - **playout**: model audio → room output, dropping audio made stale by barge-in
//! - **dispatcher**: runs speech handlers one at a time, in event order
//!
//! The tasks outlive the `AgentSession` value. They wind down on their own when
//! the model hangs up; `close` stops them and drops the last command sender,
//! which ends the model connection.

use crate::agent::Agent;
use crate::error::{AgentError, AgentResult};
use crate::realtime::{
    ClientCommand, ModelEvent, NoiseReduction, RealtimeChannel, RealtimeModel, SessionSettings,
};
use crate::room::{AudioOutput, RoomInputOptions, SessionRoom};
use futures_util::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SESSION_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Events a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpeechEvent {
    UserSpeechCommitted,
    AgentSpeechCommitted,
}

impl SpeechEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SpeechEvent::UserSpeechCommitted => "user_speech_committed",
            SpeechEvent::AgentSpeechCommitted => "agent_speech_committed",
        }
    }
}

/// Boxed async callback receiving the committed text.
pub type SpeechHandler = Arc<dyn Fn(String) -> BoxFuture<'static, AgentResult<()>> + Send + Sync>;

type HandlerMap = Arc<RwLock<HashMap<SpeechEvent, Vec<SpeechHandler>>>>;

pub struct AgentSession {
    model: Arc<dyn RealtimeModel>,
    handlers: HandlerMap,
    commands: Option<mpsc::Sender<ClientCommand>>,
    event_loop: Option<JoinHandle<()>>,
    dispatcher: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentSession {
    pub fn new(model: Arc<dyn RealtimeModel>) -> Self {
        Self {
            model,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            commands: None,
            event_loop: None,
            dispatcher: None,
            tasks: Vec::new(),
        }
    }

    /// Subscribe to a speech event. Handlers for the same event run in the
    /// order they were registered.
    pub fn on<F, Fut>(&mut self, event: SpeechEvent, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<()>> + Send + 'static,
    {
        let handler: SpeechHandler =
            Arc::new(move |text: String| -> BoxFuture<'static, AgentResult<()>> { Box::pin(handler(text)) });
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.entry(event).or_default().push(handler);
        }
    }

    pub fn on_user_speech_committed<F, Fut>(&mut self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<()>> + Send + 'static,
    {
        self.on(SpeechEvent::UserSpeechCommitted, handler);
    }

    pub fn on_agent_speech_committed<F, Fut>(&mut self, handler: F)
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<()>> + Send + 'static,
    {
        self.on(SpeechEvent::AgentSpeechCommitted, handler);
    }

    pub fn is_started(&self) -> bool {
        self.commands.is_some()
    }

    /// Bind to the room, open the model connection and wait until the model
    /// has accepted the session settings.
    pub async fn start<R>(&mut self, room: &R, agent: Agent, options: RoomInputOptions) -> AgentResult<()>
    where
        R: SessionRoom + ?Sized,
    {
        if self.is_started() {
            return Err(AgentError::Session("session already started".to_string()));
        }

        let settings = SessionSettings {
            instructions: agent.instructions,
            voice: self.model.voice().to_string(),
            noise_reduction: NoiseReduction::from_room(options.noise_cancellation),
        };

        let audio = room.bind_audio(&options).await?;
        let RealtimeChannel { commands, mut events } = self.model.connect(&settings).await?;

        commands
            .send(ClientCommand::UpdateSession(settings.clone()))
            .await
            .map_err(|_| AgentError::Model("connection closed before session update".to_string()))?;
        wait_for_session_ready(&mut events).await?;

        info!(voice = %settings.voice, noise_reduction = ?settings.noise_reduction, "Agent session started");

        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (playout_tx, playout_rx) = mpsc::unbounded_channel();
        let generation = Arc::new(AtomicU64::new(0));

        self.dispatcher = Some(tokio::spawn(run_dispatcher(self.handlers.clone(), dispatch_rx)));
        self.tasks.push(tokio::spawn(run_playout(
            audio.output.clone(),
            playout_rx,
            generation.clone(),
        )));
        self.tasks.push(tokio::spawn(pump_input(audio.input, commands.clone())));
        self.event_loop = Some(tokio::spawn(run_event_loop(
            events,
            audio.output,
            playout_tx,
            dispatch_tx,
            generation,
        )));
        self.commands = Some(commands);

        Ok(())
    }

    /// Ask the model to speak now, steered by `instructions`.
    pub async fn generate_reply(&self, instructions: impl Into<String>) -> AgentResult<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| AgentError::Session("session not started".to_string()))?;

        commands
            .send(ClientCommand::CreateResponse {
                instructions: Some(instructions.into()),
            })
            .await
            .map_err(|_| AgentError::Session("model connection closed".to_string()))
    }

    /// Resolves once the model stops sending events and every speech event
    /// already received has been handled.
    ///
    /// Cancel safe: dropping the future early leaves the tasks in place for
    /// [`AgentSession::close`].
    pub async fn wait_closed(&mut self) {
        if let Some(handle) = self.event_loop.as_mut() {
            let _ = handle.await;
            self.event_loop = None;
        }
        if let Some(handle) = self.dispatcher.as_mut() {
            let _ = handle.await;
            self.dispatcher = None;
        }
    }

    pub fn close(&mut self) {
        self.commands.take();
        let handles = self
            .event_loop
            .take()
            .into_iter()
            .chain(self.dispatcher.take())
            .chain(self.tasks.drain(..));
        for handle in handles {
            handle.abort();
        }
    }
}

async fn wait_for_session_ready(events: &mut mpsc::Receiver<ModelEvent>) -> AgentResult<()> {
    let ready = async {
        while let Some(event) = events.recv().await {
            match event {
                ModelEvent::SessionUpdated => return Ok(()),
                ModelEvent::Error { message } => return Err(AgentError::Model(message)),
                other => debug!(?other, "Event before session was ready"),
            }
        }
        Err(AgentError::Model("connection closed before session was ready".to_string()))
    };

    tokio::time::timeout(SESSION_READY_TIMEOUT, ready)
        .await
        .map_err(|_| AgentError::Model("timed out waiting for session.updated".to_string()))?
}

async fn pump_input(mut input: mpsc::Receiver<Vec<i16>>, commands: mpsc::Sender<ClientCommand>) {
    while let Some(frame) = input.recv().await {
        if commands.send(ClientCommand::AppendAudio(frame)).await.is_err() {
            break;
        }
    }
    debug!("Room input closed");
}

async fn run_event_loop(
    mut events: mpsc::Receiver<ModelEvent>,
    output: Arc<dyn AudioOutput>,
    playout: mpsc::UnboundedSender<(u64, Vec<i16>)>,
    dispatch: mpsc::UnboundedSender<(SpeechEvent, String)>,
    generation: Arc<AtomicU64>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ModelEvent::AudioDelta(samples) => {
                let _ = playout.send((generation.load(Ordering::SeqCst), samples));
            }
            ModelEvent::SpeechStarted => {
                // Barge-in: anything still queued belongs to the interrupted reply
                generation.fetch_add(1, Ordering::SeqCst);
                output.clear();
            }
            ModelEvent::UserTranscriptCommitted { item_id, transcript } => {
                debug!(item_id = %item_id, "User speech committed");
                queue_speech(&dispatch, SpeechEvent::UserSpeechCommitted, transcript);
            }
            ModelEvent::AgentTranscriptCommitted { item_id, transcript } => {
                debug!(item_id = %item_id, "Agent speech committed");
                queue_speech(&dispatch, SpeechEvent::AgentSpeechCommitted, transcript);
            }
            ModelEvent::Error { message } => error!("Realtime model error: {}", message),
            ModelEvent::ResponseDone | ModelEvent::SessionUpdated => {}
        }
    }
    info!("Realtime model event stream ended");
}

fn queue_speech(dispatch: &mpsc::UnboundedSender<(SpeechEvent, String)>, event: SpeechEvent, text: String) {
    if text.trim().is_empty() {
        debug!(event = event.name(), "Skipping empty transcript");
        return;
    }
    let _ = dispatch.send((event, text));
}

async fn run_playout(
    output: Arc<dyn AudioOutput>,
    mut frames: mpsc::UnboundedReceiver<(u64, Vec<i16>)>,
    generation: Arc<AtomicU64>,
) {
    while let Some((frame_generation, samples)) = frames.recv().await {
        if frame_generation != generation.load(Ordering::SeqCst) {
            continue;
        }
        if let Err(e) = output.push_frame(samples).await {
            warn!(error = %e, "Dropping assistant audio frame");
        }
    }
}

async fn run_dispatcher(
    handlers: HandlerMap,
    mut queue: mpsc::UnboundedReceiver<(SpeechEvent, String)>,
) {
    while let Some((event, text)) = queue.recv().await {
        let registered = handlers
            .read()
            .map(|map| map.get(&event).cloned().unwrap_or_default())
            .unwrap_or_default();

        for handler in registered {
            if let Err(e) = handler(text.clone()).await {
                error!(event = event.name(), error = %e, "Speech handler failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::testing::FakeModel;
    use crate::room::testing::FakeRoom;
    use crate::room::NoiseCancellation;
    use std::sync::Mutex;

    async fn eventually<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn started_session(model: Arc<FakeModel>, room: &FakeRoom) -> AgentSession {
        let mut session = AgentSession::new(model);
        session
            .start(room, Agent::default(), RoomInputOptions::default())
            .await
            .unwrap();
        session
    }

    #[tokio::test]
    async fn test_start_configures_model_and_room() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let options = RoomInputOptions {
            noise_cancellation: NoiseCancellation::BvcTelephony,
        };

        let mut session = AgentSession::new(model.clone());
        session.start(&room, Agent::new("Be brief."), options.clone()).await.unwrap();

        assert!(session.is_started());
        assert_eq!(room.bound_options.lock().unwrap().clone(), Some(options));
        assert_eq!(
            model.commands().first(),
            Some(&ClientCommand::UpdateSession(SessionSettings {
                instructions: "Be brief.".to_string(),
                voice: "coral".to_string(),
                noise_reduction: Some(NoiseReduction::FarField),
            }))
        );
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let mut session = started_session(model, &room).await;

        let err = session
            .start(&room, Agent::default(), RoomInputOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Session(_)));
    }

    #[tokio::test]
    async fn test_generate_reply_requires_start() {
        let session = AgentSession::new(Arc::new(FakeModel::new()));
        let err = session.generate_reply("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Session(_)));
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let mut model = FakeModel::new();
        model.fail_connect = true;
        let room = FakeRoom::new("lobby");

        let mut session = AgentSession::new(Arc::new(model));
        let err = session
            .start(&room, Agent::default(), RoomInputOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Model(_)));
        assert!(!session.is_started());
    }

    #[tokio::test]
    async fn test_generate_reply_sends_instructions() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let session = started_session(model.clone(), &room).await;

        session.generate_reply("Say hello.").await.unwrap();
        eventually(|| model.response_requests().len() == 1).await;
        assert_eq!(model.response_requests(), vec![Some("Say hello.".to_string())]);
    }

    #[tokio::test]
    async fn test_speech_events_reach_handlers_in_order() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut session = AgentSession::new(model.clone());
        let user_seen = seen.clone();
        session.on_user_speech_committed(move |text| {
            let seen = user_seen.clone();
            async move {
                seen.lock().unwrap().push(format!("user:{}", text));
                Ok(())
            }
        });
        let agent_seen = seen.clone();
        session.on_agent_speech_committed(move |text| {
            let seen = agent_seen.clone();
            async move {
                seen.lock().unwrap().push(format!("agent:{}", text));
                Ok(())
            }
        });
        session
            .start(&room, Agent::default(), RoomInputOptions::default())
            .await
            .unwrap();

        model
            .emit(ModelEvent::UserTranscriptCommitted {
                item_id: "1".to_string(),
                transcript: "hello ".to_string(),
            })
            .await;
        model
            .emit(ModelEvent::UserTranscriptCommitted {
                item_id: "2".to_string(),
                transcript: " \n".to_string(),
            })
            .await;
        model
            .emit(ModelEvent::AgentTranscriptCommitted {
                item_id: "3".to_string(),
                transcript: "Hi, how can I help?".to_string(),
            })
            .await;

        eventually(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(
            seen.lock().unwrap().clone(),
            vec!["user:hello ".to_string(), "agent:Hi, how can I help?".to_string()]
        );
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_stop_dispatch() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let calls = Arc::new(Mutex::new(0));

        let mut session = AgentSession::new(model.clone());
        let counter = calls.clone();
        session.on_user_speech_committed(move |_| {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Err(AgentError::Publish("room closed".to_string()))
            }
        });
        session
            .start(&room, Agent::default(), RoomInputOptions::default())
            .await
            .unwrap();

        for text in ["one", "two"] {
            model
                .emit(ModelEvent::UserTranscriptCommitted {
                    item_id: text.to_string(),
                    transcript: text.to_string(),
                })
                .await;
        }
        eventually(|| *calls.lock().unwrap() == 2).await;
    }

    #[tokio::test]
    async fn test_audio_flows_both_ways() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let _session = started_session(model.clone(), &room).await;

        room.input_sender().unwrap().send(vec![1, 2, 3]).await.unwrap();
        eventually(|| model.commands().contains(&ClientCommand::AppendAudio(vec![1, 2, 3]))).await;

        model.emit(ModelEvent::AudioDelta(vec![7, 8])).await;
        eventually(|| room.output.frames.lock().unwrap().len() == 1).await;
        assert_eq!(room.output.frames.lock().unwrap()[0], vec![7, 8]);
    }

    #[tokio::test]
    async fn test_speech_started_clears_output() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let _session = started_session(model.clone(), &room).await;

        model.emit(ModelEvent::SpeechStarted).await;
        eventually(|| *room.output.clears.lock().unwrap() == 1).await;
    }

    #[tokio::test]
    async fn test_wait_closed_drains_pending_speech() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut session = AgentSession::new(model.clone());
        let recorder = seen.clone();
        session.on_user_speech_committed(move |text| {
            let seen = recorder.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                seen.lock().unwrap().push(text);
                Ok(())
            }
        });
        session
            .start(&room, Agent::default(), RoomInputOptions::default())
            .await
            .unwrap();

        model
            .emit(ModelEvent::UserTranscriptCommitted {
                item_id: "1".to_string(),
                transcript: "goodbye".to_string(),
            })
            .await;
        model.hang_up();

        tokio::time::timeout(Duration::from_secs(1), session.wait_closed())
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().clone(), vec!["goodbye".to_string()]);
    }

    #[tokio::test]
    async fn test_close_stops_session() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let mut session = started_session(model.clone(), &room).await;

        session.close();
        assert!(!session.is_started());
        assert!(session.generate_reply("too late").await.is_err());
        eventually(|| model.is_closed()).await;
    }

    #[tokio::test]
    async fn test_close_after_interrupted_wait_ends_model_connection() {
        let model = Arc::new(FakeModel::new());
        let room = FakeRoom::new("lobby");
        let mut session = started_session(model.clone(), &room).await;

        // The model never hangs up, so waiting times out
        let waited = tokio::time::timeout(Duration::from_millis(20), session.wait_closed()).await;
        assert!(waited.is_err());
        assert!(!model.is_closed());

        session.close();
        eventually(|| model.is_closed()).await;
    }
}
