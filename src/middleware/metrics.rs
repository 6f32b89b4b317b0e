//! # Request Metrics
//!
//! Records every HTTP request into [`WorkerState`]: one count per request, one
//! error per 4xx/5xx or handler error, and the time spent.
//!
//! Requests are keyed by method and route pattern (`GET /api/v1/jobs/{job_id}`)
//! so path parameters don't split one endpoint into many. Requests that match
//! no route fall back to the raw path.

use crate::state::WorkerState;
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web, Error,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::time::Instant;

pub struct RequestMetrics;

impl<S, B> Transform<S, ServiceRequest> for RequestMetrics
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestMetricsService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestMetricsService { service }))
    }
}

pub struct RequestMetricsService<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for RequestMetricsService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let started = Instant::now();
        let endpoint = endpoint_key(&req);
        let state = req.app_data::<web::Data<WorkerState>>().cloned();
        let response = self.service.call(req);

        Box::pin(async move {
            let result = response.await;
            if let Some(state) = state {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                state.record_request(&endpoint, elapsed_ms, is_failure(&result));
            }
            result
        })
    }
}

fn endpoint_key(req: &ServiceRequest) -> String {
    let route = req.match_pattern().unwrap_or_else(|| req.path().to_string());
    format!("{} {}", req.method(), route)
}

fn is_failure<B>(result: &Result<ServiceResponse<B>, Error>) -> bool {
    match result {
        Ok(response) => response.status().is_client_error() || response.status().is_server_error(),
        Err(_) => true,
    }
}
