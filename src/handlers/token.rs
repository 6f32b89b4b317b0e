//! # Participant Tokens
//!
//! `POST /api/v1/token` lets the browser frontend join the room the agent
//! serves. Callers must send `Authorization: Bearer <server.token_api_key>`;
//! with no key configured every request is refused. Identities are generated
//! here, so a caller can never pose as the agent or as another participant.

use crate::error::{AgentError, AgentResult};
use crate::room::token::{mint_token, participant_identity, TokenRequest};
use crate::state::WorkerState;
use actix_web::{http::header, web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct TokenBody {
    pub room: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub url: String,
    pub room: String,
    pub identity: String,
}

pub async fn create_token(
    req: HttpRequest,
    state: web::Data<WorkerState>,
    body: web::Json<TokenBody>,
) -> Result<HttpResponse, AgentError> {
    let config = state.config();
    authorize(&req, &config.server.token_api_key)?;

    let body = body.into_inner();
    let request = TokenRequest {
        room: body.room,
        identity: participant_identity(),
        name: body.name,
    };

    let token = mint_token(&config.livekit, &request)?;
    info!(room = %request.room, identity = %request.identity, "Issued participant token");

    Ok(HttpResponse::Ok().json(TokenResponse {
        token,
        url: config.livekit.url.clone(),
        room: request.room,
        identity: request.identity,
    }))
}

fn authorize(req: &HttpRequest, api_key: &str) -> AgentResult<()> {
    if api_key.is_empty() {
        warn!("Token request refused, no token API key configured");
        return Err(AgentError::Unauthorized("token endpoint is not enabled".to_string()));
    }

    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(key) if key == api_key => Ok(()),
        _ => Err(AgentError::Unauthorized("missing or invalid bearer key".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::worker::JobManager;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;
    use std::sync::Arc;

    const KEY: &str = "frontend-key";

    fn state(token_api_key: &str) -> WorkerState {
        let mut config = AppConfig::default();
        config.livekit.api_key = "devkey".to_string();
        config.livekit.api_secret = "a-secret-long-enough-for-hmac-signing".to_string();
        config.server.token_api_key = token_api_key.to_string();
        WorkerState::new(config, Arc::new(JobManager::new(1)))
    }

    macro_rules! token_app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .route("/api/v1/token", web::post().to(create_token)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_token_for_room() {
        let app = token_app!(state(KEY));

        let req = test::TestRequest::post()
            .uri("/api/v1/token")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", KEY)))
            .set_json(json!({"room": "lobby", "identity": "agent-1234"}))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["room"], "lobby");
        assert_eq!(body["url"], "ws://localhost:7880");
        assert_eq!(body["token"].as_str().unwrap().split('.').count(), 3);

        // Requested identities are ignored
        let identity = body["identity"].as_str().unwrap();
        assert!(identity.starts_with("user-"));
        assert_ne!(identity, "agent-1234");
    }

    #[actix_web::test]
    async fn test_missing_or_wrong_key_is_unauthorized() {
        let app = token_app!(state(KEY));

        let req = test::TestRequest::post()
            .uri("/api/v1/token")
            .set_json(json!({"room": "lobby"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/v1/token")
            .insert_header((header::AUTHORIZATION, "Bearer guessed"))
            .set_json(json!({"room": "lobby"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_endpoint_closed_without_configured_key() {
        let app = token_app!(state(""));

        let req = test::TestRequest::post()
            .uri("/api/v1/token")
            .insert_header((header::AUTHORIZATION, "Bearer anything"))
            .set_json(json!({"room": "lobby"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_empty_room_is_rejected() {
        let app = token_app!(state(KEY));

        let req = test::TestRequest::post()
            .uri("/api/v1/token")
            .insert_header((header::AUTHORIZATION, format!("Bearer {}", KEY)))
            .set_json(json!({"room": " "}))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
