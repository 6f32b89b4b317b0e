//! # Worker State
//!
//! Shared by every HTTP handler: the configuration the worker was started
//! with, the job registry the worker writes to, and request metrics collected
//! by the metrics middleware.
//!
//! ## Sharing Pattern:
//! - **config**: `Arc<AppConfig>`, loaded once at startup and never mutated
//! - **jobs**: `Arc<JobManager>`, the same registry the worker updates
//! - **metrics**: `Arc<RwLock<HttpMetrics>>`, written on every request
//!
//! `WorkerState` is cheap to clone; clones share all three.

use crate::config::AppConfig;
use crate::worker::JobManager;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct WorkerState {
    config: Arc<AppConfig>,
    pub jobs: Arc<JobManager>,
    metrics: Arc<RwLock<HttpMetrics>>,
    start_time: Instant,
}

/// Request counters across the whole HTTP surface.
#[derive(Debug, Default, Clone)]
pub struct HttpMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Keyed by `"<METHOD> <route pattern>"`, e.g. `"GET /api/v1/jobs/{job_id}"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

impl HttpMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl WorkerState {
    pub fn new(config: AppConfig, jobs: Arc<JobManager>) -> Self {
        Self {
            config: Arc::new(config),
            jobs,
            metrics: Arc::new(RwLock::new(HttpMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Record one finished request against its endpoint.
    pub fn record_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
        if is_error {
            metrics.error_count += 1;
        }

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the counters, taken so the lock is not held while serializing.
    pub fn metrics_snapshot(&self) -> HttpMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
