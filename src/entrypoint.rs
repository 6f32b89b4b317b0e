//! # Job Entrypoint
//!
//! What the worker runs for every room it joins:
//! 1. Build an [`AgentSession`] on the configured realtime model
//! 2. Forward every committed utterance, user or assistant, to the room as a
//!    `transcription` data message
//! 3. Start the session with noise-cancelled input
//! 4. Ask the model to greet the user
//!
//! The session keeps running after this returns. It is closed, and with it
//! the model connection, when the worker ends the job or the model hangs up.
//!
//! Any failure is returned to the worker as-is.

use crate::agent::Agent;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::realtime::RealtimeModel;
use crate::room::{DataPublisher, JobRoom, RoomInputOptions};
use crate::session::AgentSession;
use crate::transcription::{RoomMessage, SessionClock, Speaker};
use crate::worker::JobTicket;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Everything one job needs, handed over by the worker.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub room: Arc<dyn JobRoom>,
    pub model: Arc<dyn RealtimeModel>,
    pub agent: AgentConfig,
    /// Transcription messages published so far by this job.
    pub published: Arc<AtomicU64>,
    /// Flips to true when the worker ends the job.
    pub job_ended: watch::Receiver<bool>,
}

impl JobContext {
    pub fn new(
        ticket: &JobTicket,
        room: Arc<dyn JobRoom>,
        model: Arc<dyn RealtimeModel>,
        agent: AgentConfig,
        job_ended: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id: ticket.job_id,
            room,
            model,
            agent,
            published: ticket.published.clone(),
            job_ended,
        }
    }
}

pub async fn entrypoint(ctx: JobContext) -> AgentResult<()> {
    let mut session = AgentSession::new(ctx.model.clone());
    let clock = Arc::new(SessionClock::new());

    for speaker in [Speaker::User, Speaker::Assistant] {
        let room = ctx.room.clone();
        let clock = clock.clone();
        let published = ctx.published.clone();
        let forward = move |text: String| {
            let room = room.clone();
            let clock = clock.clone();
            let published = published.clone();
            async move {
                publish_transcription(room.as_ref(), &clock, speaker, &text).await?;
                published.fetch_add(1, Ordering::Relaxed);
                AgentResult::Ok(())
            }
        };

        match speaker {
            Speaker::User => session.on_user_speech_committed(forward),
            Speaker::Assistant => session.on_agent_speech_committed(forward),
        }
    }

    let options = RoomInputOptions {
        noise_cancellation: ctx.agent.noise_cancellation,
    };
    session
        .start(ctx.room.as_ref(), Agent::assistant(&ctx.agent), options)
        .await?;

    session.generate_reply(ctx.agent.greeting_instructions.clone()).await?;

    info!(job_id = %ctx.job_id, room = %ctx.room.name(), "Agent is live");

    let job_id = ctx.job_id;
    let mut job_ended = ctx.job_ended;
    tokio::spawn(async move {
        tokio::select! {
            _ = session.wait_closed() => {}
            // A dropped sender means the worker is done with the job as well
            _ = job_ended.wait_for(|ended| *ended) => {
                debug!(job_id = %job_id, "Job ended, closing agent session");
            }
        }
        session.close();
        info!(job_id = %job_id, "Agent session closed");
    });

    Ok(())
}

/// Publish one committed utterance to every participant in the room.
pub async fn publish_transcription<R>(
    room: &R,
    clock: &SessionClock,
    speaker: Speaker,
    text: &str,
) -> AgentResult<()>
where
    R: DataPublisher + ?Sized,
{
    match speaker {
        Speaker::User => info!("User said: {}", text),
        Speaker::Assistant => info!("Agent said: {}", text),
    }

    let payload = RoomMessage::transcription(text, speaker, clock.now_ms()).encode()?;
    room.publish_data(payload).await
}
