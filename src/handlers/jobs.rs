//! # Job Endpoints
//!
//! Read-only views of the worker's job registry:
//! - `GET /api/v1/jobs`: summary plus every job still retained, newest first
//! - `GET /api/v1/jobs/{job_id}`: one job, or a JSON 404

use crate::state::WorkerState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use uuid::Uuid;

/// Active and recently finished jobs, newest first.
pub async fn list_jobs(state: web::Data<WorkerState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "summary": state.jobs.summary(),
        "jobs": state.jobs.list()
    }))
}

pub async fn get_job(state: web::Data<WorkerState>, path: web::Path<Uuid>) -> HttpResponse {
    let job_id = path.into_inner();
    match state.jobs.get(job_id) {
        Some(job) => HttpResponse::Ok().json(job),
        None => HttpResponse::NotFound().json(json!({
            "error": {
                "type": "not_found",
                "message": format!("job {} not found", job_id),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        })),
    }
}
