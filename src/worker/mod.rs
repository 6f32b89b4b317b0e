//! # Worker
//!
//! Finds rooms that need an agent, joins them and runs the entrypoint once per
//! room. Each job is tracked in the [`JobManager`].
//!
//! ## Dispatch Modes:
//! - **Room**: serve one named room, return when that job ends
//! - **Poll**: list rooms every `poll_interval_secs` and start a job for every
//!   room with participants and no active job, up to `max_concurrent_jobs`.
//!   A room whose last job failed is left alone for `failed_room_cooldown_secs`.
//!
//! ## Job Flow:
//! reserve slot → connect room → entrypoint → wait for room disconnect, an
//! empty room or shutdown → end the session → close room. An error anywhere
//! marks the job failed; nothing is retried.

pub mod jobs;

pub use jobs::{JobManager, JobSummary, JobTicket};

use crate::config::{AgentConfig, WorkerConfig};
use crate::entrypoint::JobContext;
use crate::error::AgentResult;
use crate::realtime::RealtimeModel;
use crate::room::{JobRoom, RoomConnector, RoomDirectory};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const EMPTY_ROOM_CHECK: Duration = Duration::from_secs(1);

/// The job function the worker runs for every room.
pub type EntrypointFn = Arc<dyn Fn(JobContext) -> BoxFuture<'static, AgentResult<()>> + Send + Sync>;

#[derive(Clone)]
pub struct WorkerOptions {
    pub entrypoint: EntrypointFn,
}

impl WorkerOptions {
    pub fn new<F, Fut>(entrypoint: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AgentResult<()>> + Send + 'static,
    {
        Self {
            entrypoint: Arc::new(move |ctx: JobContext| -> BoxFuture<'static, AgentResult<()>> {
                Box::pin(entrypoint(ctx))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchMode {
    Poll,
    Room(String),
}

pub struct Worker {
    options: WorkerOptions,
    connector: Arc<dyn RoomConnector>,
    directory: Arc<dyn RoomDirectory>,
    model: Arc<dyn RealtimeModel>,
    agent: AgentConfig,
    settings: WorkerConfig,
    jobs: Arc<JobManager>,
}

impl Worker {
    pub fn new(
        options: WorkerOptions,
        connector: Arc<dyn RoomConnector>,
        directory: Arc<dyn RoomDirectory>,
        model: Arc<dyn RealtimeModel>,
        agent: AgentConfig,
        settings: WorkerConfig,
        jobs: Arc<JobManager>,
    ) -> Self {
        Self {
            options,
            connector,
            directory,
            model,
            agent,
            settings,
            jobs,
        }
    }

    /// Run until the mode's work is done or `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mode: DispatchMode, shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        match mode {
            DispatchMode::Room(room) => {
                info!(room = %room, "Serving a single room");
                self.run_job(&room, shutdown).await
            }
            DispatchMode::Poll => {
                info!(
                    interval_secs = self.settings.poll_interval_secs,
                    max_jobs = self.settings.max_concurrent_jobs,
                    "Polling for rooms"
                );
                self.poll_rooms(shutdown).await;
                Ok(())
            }
        }
    }

    /// Reserve a slot for `room_name` and run its job to the end.
    pub async fn run_job(&self, room_name: &str, shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        let ticket = self.jobs.create(room_name)?;
        self.run_ticket(ticket, shutdown).await
    }

    async fn run_ticket(&self, ticket: JobTicket, mut shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        info!(job_id = %ticket.job_id, room = %ticket.room, "Job started");

        match self.drive_job(&ticket, &mut shutdown).await {
            Ok(()) => {
                self.jobs.complete(ticket.job_id);
                info!(job_id = %ticket.job_id, room = %ticket.room, "Job completed");
                Ok(())
            }
            Err(e) => {
                error!(job_id = %ticket.job_id, room = %ticket.room, error = %e, "Job failed");
                self.jobs.fail(ticket.job_id, e.to_string());
                Err(e)
            }
        }
    }

    async fn drive_job(&self, ticket: &JobTicket, shutdown: &mut watch::Receiver<bool>) -> AgentResult<()> {
        let room = self.connector.connect(&ticket.room).await?;
        let (job_ended, job_ended_rx) = watch::channel(false);
        let ctx = JobContext::new(
            ticket,
            room.clone(),
            self.model.clone(),
            self.agent.clone(),
            job_ended_rx,
        );

        if let Err(e) = (self.options.entrypoint)(ctx).await {
            let _ = job_ended.send(true);
            room.close().await;
            return Err(e);
        }
        self.jobs.mark_running(ticket.job_id);

        let empty_timeout = Duration::from_secs(self.settings.empty_room_timeout_secs);
        tokio::select! {
            _ = room.wait_disconnected() => {
                debug!(room = %ticket.room, "Room disconnected");
            }
            _ = wait_until_abandoned(room.as_ref(), empty_timeout) => {
                info!(room = %ticket.room, "No participants left, leaving room");
            }
            _ = shutdown.wait_for(|stop| *stop) => {
                info!(room = %ticket.room, "Leaving room for shutdown");
            }
        }

        let _ = job_ended.send(true);
        room.close().await;
        Ok(())
    }

    /// Reserve slots for every room that needs an agent right now.
    pub async fn dispatch_pending(&self) -> AgentResult<Vec<JobTicket>> {
        let rooms = self.directory.list_rooms().await?;
        let mut tickets = Vec::new();

        for room in rooms {
            if room.num_participants == 0 {
                continue;
            }
            if self.jobs.recently_failed(&room.name, self.settings.failed_room_cooldown_secs) {
                debug!(room = %room.name, "Last job for room failed, waiting out cooldown");
                continue;
            }
            if !self.jobs.has_capacity() {
                warn!(room = %room.name, "At job capacity, room left unserved");
                break;
            }
            match self.jobs.create(&room.name) {
                Ok(ticket) => tickets.push(ticket),
                // Rooms that already have an active job land here
                Err(e) => debug!(room = %room.name, error = %e, "Room not dispatched"),
            }
        }

        Ok(tickets)
    }

    async fn poll_rooms(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.settings.poll_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut running = JoinSet::new();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.dispatch_pending().await {
                        Ok(tickets) => {
                            for ticket in tickets {
                                let worker = self.clone();
                                let stop = shutdown.clone();
                                running.spawn(async move {
                                    // Failures are recorded on the job
                                    let _ = worker.run_ticket(ticket, stop).await;
                                });
                            }
                        }
                        Err(e) => warn!(error = %e, "Room dispatch failed"),
                    }

                    let removed = self.jobs.cleanup_finished(self.settings.job_retention_secs);
                    if removed > 0 {
                        debug!(removed, "Dropped finished jobs");
                    }
                }
                Some(_) = running.join_next(), if !running.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(active = running.len(), "Waiting for jobs to finish");
        let drain = async { while running.join_next().await.is_some() {} };
        if tokio::time::timeout(DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("Jobs did not finish in time, aborting");
        }
    }
}

/// Resolves once `room` has had no other participant for `timeout`.
async fn wait_until_abandoned(room: &dyn JobRoom, timeout: Duration) {
    let mut check = tokio::time::interval(EMPTY_ROOM_CHECK);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut empty_since: Option<Instant> = None;

    loop {
        check.tick().await;
        if room.remote_participant_count() > 0 {
            empty_since = None;
            continue;
        }
        let since = *empty_since.get_or_insert_with(Instant::now);
        if since.elapsed() >= timeout {
            return;
        }
    }
}
