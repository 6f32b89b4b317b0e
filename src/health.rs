//! # Health and Metrics Endpoints
//!
//! `GET /health` (also under `/api/v1`) is the liveness view: service
//! identity, job counts, request totals, memory and a load status derived
//! from how many job slots are taken. `GET /api/v1/metrics` adds per-endpoint
//! request statistics and the full job summary.

use crate::state::{HttpMetrics, WorkerState};
use crate::worker::JobSummary;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<WorkerState>) -> HttpResponse {
    let config = state.config();
    let metrics = state.metrics_snapshot();
    let jobs = state.jobs.summary();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "livekit": {
            "url": config.livekit.url,
            "agent_name": config.livekit.agent_name
        },
        "model": {
            "model": config.model.model,
            "voice": config.model.voice
        },
        "jobs": {
            "active": jobs.active_jobs,
            "max": jobs.max_jobs,
            "total": jobs.total_jobs,
            "published_messages": jobs.published_messages
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate()
        },
        "memory": get_memory_info(),
        "system": get_system_status(&jobs)
    }))
}

pub async fn detailed_metrics(state: web::Data<WorkerState>) -> HttpResponse {
    let metrics = state.metrics_snapshot();
    let uptime_seconds = state.uptime_seconds();
    let jobs = state.jobs.summary();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats(&metrics),
        "jobs": jobs,
        "memory": get_memory_info()
    }))
}

fn endpoint_stats(metrics: &HttpMetrics) -> Vec<serde_json::Value> {
    let mut stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));
    stats
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", process::id())) {
            let field_bytes = |name: &str| {
                status
                    .lines()
                    .find(|line| line.starts_with(name))
                    .and_then(|line| line.split_whitespace().nth(1))
                    .and_then(|kb| kb.parse::<u64>().ok())
                    .map(|kb| kb * 1024)
                    .unwrap_or(0)
            };

            return json!({
                "resident_memory_bytes": field_bytes("VmRSS:"),
                "virtual_memory_bytes": field_bytes("VmSize:"),
                "available": true
            });
        }
    }

    json!({
        "pid": process::id(),
        "available": false
    })
}

fn get_system_status(jobs: &JobSummary) -> serde_json::Value {
    let job_usage = if jobs.max_jobs > 0 {
        jobs.active_jobs as f64 / jobs.max_jobs as f64
    } else {
        0.0
    };

    let status = if job_usage >= 1.0 {
        "at_capacity"
    } else if job_usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "job_usage_percent": (job_usage * 100.0).round(),
        "max_jobs": jobs.max_jobs,
        "current_jobs": jobs.active_jobs
    })
}
