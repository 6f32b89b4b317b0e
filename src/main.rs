//! # Voice Assistant Agent - Worker Entry Point
//!
//! A LiveKit agent worker. For every room it serves, it runs a realtime voice
//! session (OpenAI Realtime, voice "coral") with noise-cancelled input, greets
//! the user, and publishes a JSON transcription message to the room for every
//! committed utterance from either side.
//!
//! Alongside the worker runs a small HTTP server for health, metrics, job
//! listing and participant tokens for the browser frontend.
//!
//! ## Application Architecture:
//! - **config**: configuration (defaults, `config.toml`, environment)
//! - **cli**: `start`, `dev` and `connect --room NAME`
//! - **worker**: room dispatch and the job registry
//! - **entrypoint**: what runs inside each job
//! - **session**: the agent session (audio pumps, speech event dispatch)
//! - **realtime**: realtime model trait and the OpenAI WebSocket client
//! - **room**: room traits, the LiveKit implementation, access tokens
//! - **transcription**: the data message published to participants
//! - **state / health / handlers / middleware**: the HTTP surface
//! - **error**: the crate error type and its HTTP mapping

mod agent;
mod cli;
mod config;
mod entrypoint;
mod error;
mod handlers;
mod health;
mod middleware;
mod realtime;
mod room;
mod session;
mod state;
mod transcription;
mod worker;

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use anyhow::Result;
use clap::Parser;
use cli::Cli;
use config::AppConfig;
use error::AgentError;
use realtime::{OpenAiRealtimeModel, RealtimeModel};
use room::{LiveKitConnector, LiveKitDirectory};
use state::WorkerState;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker::{JobManager, Worker, WorkerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let command = cli.command();
    init_tracing(command.default_log_filter())?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-assistant-agent v{}", env!("CARGO_PKG_VERSION"));
    info!(livekit = %config.livekit.url, model = %config.model.model, voice = %config.model.voice, "Configuration loaded");
    debug!(config = ?config.redacted(), "Effective configuration");

    let jobs = Arc::new(JobManager::new(config.worker.max_concurrent_jobs));
    let app_state = WorkerState::new(config.clone(), jobs.clone());

    let model: Arc<dyn RealtimeModel> = Arc::new(OpenAiRealtimeModel::from_config(&config.model));
    let worker = Arc::new(Worker::new(
        WorkerOptions::new(entrypoint::entrypoint),
        Arc::new(LiveKitConnector::new(config.livekit.clone())),
        Arc::new(LiveKitDirectory::new(&config.livekit_http_url(), &config.livekit)),
        model,
        config.agent.clone(),
        config.worker.clone(),
        jobs,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    setup_signal_handlers(shutdown_tx.clone())?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting HTTP server on {}", bind_addr);

    let allowed_origins = config.server.allowed_origins.clone();
    let server = HttpServer::new(move || {
        let cors = allowed_origins.iter().fold(
            Cors::default()
                .allowed_methods(vec!["GET", "POST"])
                .allowed_headers(vec![header::AUTHORIZATION, header::CONTENT_TYPE])
                .max_age(3600),
            |cors, origin| cors.allowed_origin(origin),
        );

        let json_config = web::JsonConfig::default()
            .error_handler(|err, _req| AgentError::Serialization(err.to_string()).into());

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(json_config)
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::RequestMetrics)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/jobs", web::get().to(handlers::list_jobs))
                    .route("/jobs/{job_id}", web::get().to(handlers::get_job))
                    .route("/token", web::post().to(handlers::create_token)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let mut server_task = tokio::spawn(server);
    let mut worker_task = tokio::spawn(worker.run(command.dispatch_mode(), shutdown_rx));

    let worker_result = tokio::select! {
        result = &mut worker_task => result,
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => warn!("HTTP server stopped, shutting down worker"),
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
            let _ = shutdown_tx.send(true);
            worker_task.await
        }
    };

    server_handle.stop(true).await;

    worker_result??;
    info!("Worker stopped gracefully");
    Ok(())
}

/// Structured logging to stdout. `RUST_LOG` overrides `default_filter`.
fn init_tracing(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Flip the shutdown flag on SIGTERM or SIGINT.
fn setup_signal_handlers(shutdown: Arc<watch::Sender<bool>>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
        let _ = shutdown.send(true);
    });

    Ok(())
}
