//! # OpenAI Realtime Client
//!
//! Implements [`RealtimeModel`] over the OpenAI Realtime WebSocket API. Each
//! `connect` opens a fresh socket and splits it into two tasks:
//! - **writer**: `ClientCommand` → JSON client event → socket
//! - **reader**: socket → JSON server event → `ModelEvent`
//!
//! When the session drops its command sender the writer sends a close frame;
//! when the socket closes the reader drops the event sender, which ends the
//! session's event loop.

use super::protocol::{ClientEvent, ModelTuning, ServerEvent};
use super::{ClientCommand, ModelEvent, RealtimeChannel, RealtimeModel, SessionSettings};
use crate::config::ModelConfig;
use crate::error::{AgentError, AgentResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE: usize = 256;
const EVENT_QUEUE: usize = 256;

pub struct OpenAiRealtimeModel {
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    tuning: ModelTuning,
}

impl OpenAiRealtimeModel {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "wss://api.openai.com/v1/realtime".to_string(),
            model: model.into(),
            voice: "coral".to_string(),
            tuning: ModelTuning {
                transcription_model: "whisper-1".to_string(),
                temperature: 0.8,
            },
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.api_key.clone(), config.model.clone())
            .with_base_url(config.base_url.clone())
            .with_voice(config.voice.clone())
            .with_tuning(ModelTuning {
                transcription_model: config.transcription_model.clone(),
                temperature: config.temperature,
            })
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_tuning(mut self, tuning: ModelTuning) -> Self {
        self.tuning = tuning;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}?model={}", self.base_url.trim_end_matches('/'), self.model)
    }
}

#[async_trait]
impl RealtimeModel for OpenAiRealtimeModel {
    async fn connect(&self, settings: &SessionSettings) -> AgentResult<RealtimeChannel> {
        let mut request = self.endpoint().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| AgentError::Config(format!("invalid API key header: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
        info!(model = %self.model, voice = %settings.voice, "Connected to realtime model");

        let (mut sink, mut stream) = socket.split();
        let (commands, mut commands_rx) = mpsc::channel::<ClientCommand>(COMMAND_QUEUE);
        let (events_tx, events) = mpsc::channel::<ModelEvent>(EVENT_QUEUE);

        let tuning = self.tuning.clone();
        tokio::spawn(async move {
            while let Some(command) = commands_rx.recv().await {
                let event = ClientEvent::from_command(command, &tuning);
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        error!(error = %e, "Failed to encode client event");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(error = %e, "Realtime socket write failed");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            debug!("Realtime writer stopped");
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(frame)) => {
                        info!(?frame, "Realtime model closed the connection");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "Realtime socket read failed");
                        let _ = events_tx
                            .send(ModelEvent::Error {
                                message: e.to_string(),
                            })
                            .await;
                        break;
                    }
                };

                let parsed = ServerEvent::parse(&text).and_then(ServerEvent::into_model_event);
                match parsed {
                    Ok(Some(event)) => {
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Ignoring malformed server event"),
                }
            }
            debug!("Realtime reader stopped");
        });

        Ok(RealtimeChannel { commands, events })
    }

    fn voice(&self) -> &str {
        &self.voice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_endpoint_includes_model() {
        let model = OpenAiRealtimeModel::new("sk-test", "gpt-4o-realtime-preview")
            .with_base_url("wss://example.test/v1/realtime/");
        assert_eq!(
            model.endpoint(),
            "wss://example.test/v1/realtime?model=gpt-4o-realtime-preview"
        );
    }

    #[test]
    fn test_from_config_picks_voice() {
        let mut config = AppConfig::default().model;
        config.voice = "sage".to_string();
        let model = OpenAiRealtimeModel::from_config(&config);
        assert_eq!(model.voice(), "sage");
        assert_eq!(model.tuning.transcription_model, "whisper-1");
    }

    #[tokio::test]
    async fn test_connect_failure_is_model_error() {
        let model = OpenAiRealtimeModel::new("sk-test", "m").with_base_url("ws://127.0.0.1:1/realtime");
        let settings = SessionSettings {
            instructions: "x".to_string(),
            voice: "coral".to_string(),
            noise_reduction: None,
        };
        let err = match model.connect(&settings).await {
            Ok(_) => panic!("connect to a closed port should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, AgentError::Model(_)));
    }
}
