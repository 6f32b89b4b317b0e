//! # Error Handling
//!
//! One error enum for the whole worker. The entrypoint itself never inspects
//! these: whatever a room, model or publish call returns is propagated with `?`
//! up to the job runner, which logs it and marks the job as failed.
//!
//! The HTTP surface converts the same enum into JSON error responses through
//! actix's `ResponseError` trait.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Error categories for the worker.
///
/// ## Categories:
/// - **Config**: missing credentials, invalid values (500 over HTTP)
/// - **Room**: connecting to or interacting with a LiveKit room failed
/// - **Model**: realtime model connection or protocol failure
/// - **Session**: session used in the wrong state (not started, started twice)
/// - **Publish**: a data publish to the room failed
/// - **Serialization**: JSON encoding/decoding failed (400 over HTTP)
/// - **Token**: access token could not be minted or the request was invalid
/// - **Unauthorized**: HTTP caller did not present a valid key (401)
#[derive(Debug)]
pub enum AgentError {
    Config(String),
    Room(String),
    Model(String),
    Session(String),
    Publish(String),
    Serialization(String),
    Token(String),
    Unauthorized(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AgentError::Room(msg) => write!(f, "Room error: {}", msg),
            AgentError::Model(msg) => write!(f, "Realtime model error: {}", msg),
            AgentError::Session(msg) => write!(f, "Session error: {}", msg),
            AgentError::Publish(msg) => write!(f, "Publish error: {}", msg),
            AgentError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            AgentError::Token(msg) => write!(f, "Token error: {}", msg),
            AgentError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {}

impl ResponseError for AgentError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;

        let (status, error_type, message) = match self {
            AgentError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AgentError::Room(msg) => (StatusCode::BAD_GATEWAY, "room_error", msg),
            AgentError::Model(msg) => (StatusCode::BAD_GATEWAY, "model_error", msg),
            AgentError::Session(msg) => (StatusCode::CONFLICT, "session_error", msg),
            AgentError::Publish(msg) => (StatusCode::BAD_GATEWAY, "publish_error", msg),
            AgentError::Serialization(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AgentError::Token(msg) => (StatusCode::BAD_REQUEST, "token_error", msg),
            AgentError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(err: config::ConfigError) -> Self {
        AgentError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AgentError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AgentError::Model(format!("WebSocket error: {}", err))
    }
}

impl From<livekit::RoomError> for AgentError {
    fn from(err: livekit::RoomError) -> Self {
        AgentError::Room(err.to_string())
    }
}

impl From<livekit_api::access_token::AccessTokenError> for AgentError {
    fn from(err: livekit_api::access_token::AccessTokenError) -> Self {
        AgentError::Token(err.to_string())
    }
}

/// Shorthand for `Result<T, AgentError>`.
pub type AgentResult<T> = Result<T, AgentError>;
