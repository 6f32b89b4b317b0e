//! # Configuration Management
//!
//! Loads the worker configuration once at process start and hands it down as a
//! plain struct. Sources, from lowest to highest priority:
//! 1. Default values (the `Default` impl below)
//! 2. Configuration file (`config.toml`, optional)
//! 3. Environment variables with the `APP_` prefix (`APP_MODEL__VOICE=alloy`)
//! 4. The well-known deployment variables (`LIVEKIT_URL`, `LIVEKIT_API_KEY`,
//!    `LIVEKIT_API_SECRET`, `OPENAI_API_KEY`, `TOKEN_API_KEY`, `HOST`, `PORT`)
//!
//! The `.env` file is read by `main` before any of this runs, so values placed
//! there show up as ordinary environment variables.
//!
//! ## Secrets:
//! Log or return [`AppConfig::redacted`], never the config itself.

use crate::room::token::PARTICIPANT_IDENTITY_PREFIX;
use crate::room::NoiseCancellation;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main configuration struct, one field per logical group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub livekit: LiveKitConfig,
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub worker: WorkerConfig,
}

/// Health/metrics HTTP server settings.
///
/// ## Fields:
/// - `token_api_key`: bearer key required by `POST /api/v1/token`; empty keeps
///   the endpoint closed
/// - `allowed_origins`: browser origins allowed to call the API cross-origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub token_api_key: String,
    pub allowed_origins: Vec<String>,
}

/// LiveKit server connection settings.
///
/// ## Fields:
/// - `url`: WebSocket URL of the LiveKit server (`ws://localhost:7880`, `wss://<project>.livekit.cloud`)
/// - `api_key` / `api_secret`: used to mint access tokens and call the room service
/// - `agent_identity_prefix`: participant identity prefix used when the worker joins a room
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveKitConfig {
    pub url: String,
    pub api_key: String,
    pub api_secret: String,
    pub agent_identity_prefix: String,
    pub agent_name: String,
}

/// Realtime voice model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub voice: String,
    pub transcription_model: String,
    pub temperature: f32,
}

/// What the assistant is and how it opens the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub instructions: String,
    pub greeting_instructions: String,
    pub noise_cancellation: NoiseCancellation,
}

/// Job dispatch tuning.
///
/// ## Fields:
/// - `max_concurrent_jobs`: upper bound on rooms served at the same time
/// - `poll_interval_secs`: how often `start` mode asks the room service for rooms
/// - `job_retention_secs`: how long finished jobs stay visible on `/api/v1/jobs`
/// - `failed_room_cooldown_secs`: how long polling leaves a room alone after its
///   job failed
/// - `empty_room_timeout_secs`: how long a job stays in a room with no other
///   participant before leaving
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
    pub poll_interval_secs: u64,
    pub job_retention_secs: u64,
    pub failed_room_cooldown_secs: u64,
    pub empty_room_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8081,
                token_api_key: String::new(),
                allowed_origins: vec!["http://localhost:5173".to_string()],
            },
            livekit: LiveKitConfig {
                url: "ws://localhost:7880".to_string(),
                api_key: String::new(),
                api_secret: String::new(),
                agent_identity_prefix: "agent".to_string(),
                agent_name: "Voice Assistant".to_string(),
            },
            model: ModelConfig {
                api_key: String::new(),
                base_url: "wss://api.openai.com/v1/realtime".to_string(),
                model: "gpt-4o-realtime-preview".to_string(),
                voice: "coral".to_string(),
                transcription_model: "whisper-1".to_string(),
                temperature: 0.8,
            },
            agent: AgentConfig {
                instructions: crate::agent::DEFAULT_INSTRUCTIONS.to_string(),
                greeting_instructions: crate::agent::GREETING_INSTRUCTIONS.to_string(),
                noise_cancellation: NoiseCancellation::Bvc,
            },
            worker: WorkerConfig {
                max_concurrent_jobs: 8,
                poll_interval_secs: 2,
                job_retention_secs: 600,
                failed_room_cooldown_secs: 300,
                empty_room_timeout_secs: 30,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`: override the health server port
    /// - `APP_MODEL__VOICE=alloy`: pick a different voice
    /// - `APP_AGENT__NOISE_CANCELLATION=bvc_telephony`: telephony noise filtering
    /// - `LIVEKIT_URL=wss://example.livekit.cloud`: deployment shortcut
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        let overrides = [
            ("LIVEKIT_URL", "livekit.url"),
            ("LIVEKIT_API_KEY", "livekit.api_key"),
            ("LIVEKIT_API_SECRET", "livekit.api_secret"),
            ("OPENAI_API_KEY", "model.api_key"),
            ("TOKEN_API_KEY", "server.token_api_key"),
            ("HOST", "server.host"),
            ("PORT", "server.port"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration can actually run a worker.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !(self.livekit.url.starts_with("ws://") || self.livekit.url.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "LiveKit URL must start with ws:// or wss://, got '{}'",
                self.livekit.url
            ));
        }

        if self.livekit.api_key.is_empty() || self.livekit.api_secret.is_empty() {
            return Err(anyhow::anyhow!(
                "LiveKit API key and secret are required (LIVEKIT_API_KEY / LIVEKIT_API_SECRET)"
            ));
        }

        if self.livekit.agent_identity_prefix == PARTICIPANT_IDENTITY_PREFIX {
            return Err(anyhow::anyhow!(
                "Agent identity prefix '{}' is reserved for frontend participants",
                PARTICIPANT_IDENTITY_PREFIX
            ));
        }

        if self.model.api_key.is_empty() {
            return Err(anyhow::anyhow!("Realtime model API key is required (OPENAI_API_KEY)"));
        }

        if self.model.voice.trim().is_empty() {
            return Err(anyhow::anyhow!("Model voice cannot be empty"));
        }

        if !(0.6..=1.2).contains(&self.model.temperature) {
            return Err(anyhow::anyhow!(
                "Model temperature must be between 0.6 and 1.2, got {}",
                self.model.temperature
            ));
        }

        if self.agent.instructions.trim().is_empty() {
            return Err(anyhow::anyhow!("Agent instructions cannot be empty"));
        }

        if self.worker.max_concurrent_jobs == 0 {
            return Err(anyhow::anyhow!("Max concurrent jobs must be greater than 0"));
        }

        if self.worker.poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }

        Ok(())
    }

    /// HTTP(S) base URL of the LiveKit server, for the room service API.
    pub fn livekit_http_url(&self) -> String {
        if let Some(rest) = self.livekit.url.strip_prefix("wss://") {
            format!("https://{}", rest)
        } else if let Some(rest) = self.livekit.url.strip_prefix("ws://") {
            format!("http://{}", rest)
        } else {
            self.livekit.url.clone()
        }
    }

    /// Copy of the configuration that is safe to log or return over HTTP.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.livekit.api_key = redact(&copy.livekit.api_key);
        copy.livekit.api_secret = redact(&copy.livekit.api_secret);
        copy.model.api_key = redact(&copy.model.api_key);
        copy.server.token_api_key = redact(&copy.server.token_api_key);
        copy
    }
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "***".to_string()
    }
}
