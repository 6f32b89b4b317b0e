//! Access tokens for joining LiveKit rooms.
//!
//! The worker mints one for itself per job; the HTTP surface mints them for the
//! browser frontend so it can join the same room the agent serves.

use crate::config::LiveKitConfig;
use crate::error::{AgentError, AgentResult};
use livekit_api::access_token::{AccessToken, VideoGrants};
use std::time::Duration;

const TOKEN_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Identity prefix for participants joining through the token endpoint.
pub const PARTICIPANT_IDENTITY_PREFIX: &str = "user";

/// Who the token is for and where it lets them in.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub room: String,
    pub identity: String,
    pub name: Option<String>,
}

impl TokenRequest {
    fn validate(&self) -> AgentResult<()> {
        if self.room.trim().is_empty() {
            return Err(AgentError::Token("room name is required".to_string()));
        }
        if self.identity.trim().is_empty() {
            return Err(AgentError::Token("participant identity is required".to_string()));
        }
        Ok(())
    }
}

/// Sign a room-join token with publish, subscribe and data permissions.
pub fn mint_token(config: &LiveKitConfig, request: &TokenRequest) -> AgentResult<String> {
    request.validate()?;

    let grants = VideoGrants {
        room_join: true,
        room: request.room.clone(),
        can_publish: true,
        can_subscribe: true,
        can_publish_data: true,
        ..Default::default()
    };

    let token = AccessToken::with_api_key(&config.api_key, &config.api_secret)
        .with_identity(&request.identity)
        .with_name(request.name.as_deref().unwrap_or(&request.identity))
        .with_grants(grants)
        .with_ttl(TOKEN_TTL)
        .to_jwt()?;

    Ok(token)
}

/// Identity the worker uses when it joins a room.
pub fn agent_identity(config: &LiveKitConfig) -> String {
    format!("{}-{}", config.agent_identity_prefix, uuid::Uuid::new_v4().simple())
}

/// Fresh identity for a frontend participant. Callers never choose their own.
pub fn participant_identity() -> String {
    format!("{}-{}", PARTICIPANT_IDENTITY_PREFIX, uuid::Uuid::new_v4().simple())
}
