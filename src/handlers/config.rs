//! `GET /api/v1/config`: the configuration the worker runs with, secrets masked.

use crate::state::WorkerState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration with credentials masked.
pub async fn get_config(state: web::Data<WorkerState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": state.config().redacted()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::worker::JobManager;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_config_hides_secrets() {
        let mut config = AppConfig::default();
        config.livekit.api_secret = "very-secret".to_string();
        config.model.api_key = "sk-live".to_string();
        let state = WorkerState::new(config, Arc::new(JobManager::new(1)));

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["livekit"]["api_secret"], "***");
        assert_eq!(body["config"]["model"]["api_key"], "***");
        assert_eq!(body["config"]["model"]["voice"], "coral");
    }
}
