//! # Job Registry
//!
//! Tracks every job the worker has started: which room it serves, where it is
//! in its lifecycle and how many transcription messages it has published.
//!
//! ## Job Lifecycle:
//! 1. **Created**: slot reserved, room connection in progress
//! 2. **Running**: entrypoint succeeded, agent is live in the room
//! 3. **Completed**: room disconnected or worker shut down
//! 4. **Failed**: room connect or entrypoint returned an error
//!
//! Finished jobs stay listed for `job_retention_secs` so the HTTP surface can
//! show recent history, then `cleanup_finished` drops them.

use crate::error::{AgentError, AgentResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum JobStatus {
    Created,
    Running,
    Completed,
    Failed(String),
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed(_) => "failed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Created | JobStatus::Running)
    }
}

/// Point-in-time view of one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub room: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub published_messages: u64,
}

/// A reserved job slot, handed to the code that will run the job.
#[derive(Debug, Clone)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub room: String,
    pub published: Arc<AtomicU64>,
}

struct JobEntry {
    record: JobRecord,
    published: Arc<AtomicU64>,
}

impl JobEntry {
    fn snapshot(&self) -> JobRecord {
        JobRecord {
            published_messages: self.published.load(Ordering::Relaxed),
            ..self.record.clone()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub max_jobs: usize,
    pub status_counts: HashMap<String, usize>,
    pub published_messages: u64,
}

/// Registry of jobs with a cap on how many may be active at once.
pub struct JobManager {
    jobs: RwLock<HashMap<Uuid, JobEntry>>,
    max_concurrent_jobs: usize,
}

impl JobManager {
    pub fn new(max_concurrent_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            max_concurrent_jobs,
        }
    }

    /// Reserve a slot for a new job in `room`.
    ///
    /// Fails when the worker is at capacity or the room already has an
    /// active job.
    pub fn create(&self, room: &str) -> AgentResult<JobTicket> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);

        let active: Vec<&JobEntry> = jobs.values().filter(|e| e.record.status.is_active()).collect();
        if active.len() >= self.max_concurrent_jobs {
            return Err(AgentError::Session(format!(
                "maximum concurrent jobs ({}) reached",
                self.max_concurrent_jobs
            )));
        }
        if active.iter().any(|e| e.record.room == room) {
            return Err(AgentError::Session(format!("room '{}' already has an active job", room)));
        }

        let ticket = JobTicket {
            job_id: Uuid::new_v4(),
            room: room.to_string(),
            published: Arc::new(AtomicU64::new(0)),
        };
        jobs.insert(
            ticket.job_id,
            JobEntry {
                record: JobRecord {
                    job_id: ticket.job_id,
                    room: ticket.room.clone(),
                    status: JobStatus::Created,
                    created_at: Utc::now(),
                    started_at: None,
                    ended_at: None,
                    published_messages: 0,
                },
                published: ticket.published.clone(),
            },
        );

        Ok(ticket)
    }

    pub fn mark_running(&self, job_id: Uuid) {
        self.update(job_id, |record| {
            record.status = JobStatus::Running;
            record.started_at = Some(Utc::now());
        });
    }

    pub fn complete(&self, job_id: Uuid) {
        self.update(job_id, |record| {
            record.status = JobStatus::Completed;
            record.ended_at = Some(Utc::now());
        });
    }

    pub fn fail(&self, job_id: Uuid, reason: impl Into<String>) {
        let reason = reason.into();
        self.update(job_id, |record| {
            record.status = JobStatus::Failed(reason);
            record.ended_at = Some(Utc::now());
        });
    }

    fn update<F: FnOnce(&mut JobRecord)>(&self, job_id: Uuid, apply: F) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = jobs.get_mut(&job_id) {
            apply(&mut entry.record);
        }
    }

    pub fn get(&self, job_id: Uuid) -> Option<JobRecord> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(&job_id).map(JobEntry::snapshot)
    }

    /// Jobs newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut records: Vec<JobRecord> = jobs.values().map(JobEntry::snapshot).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn is_room_active(&self, room: &str) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.values()
            .any(|e| e.record.room == room && e.record.status.is_active())
    }

    /// True when the newest job for `room` failed less than `cooldown_secs` ago.
    pub fn recently_failed(&self, room: &str, cooldown_secs: u64) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let latest = jobs
            .values()
            .filter(|e| e.record.room == room)
            .max_by_key(|e| e.record.created_at);

        match latest {
            Some(entry) => match (&entry.record.status, entry.record.ended_at) {
                (JobStatus::Failed(_), Some(ended)) => {
                    Utc::now().signed_duration_since(ended).num_seconds() < cooldown_secs as i64
                }
                _ => false,
            },
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.values().filter(|e| e.record.status.is_active()).count()
    }

    pub fn has_capacity(&self) -> bool {
        self.active_count() < self.max_concurrent_jobs
    }

    /// Drop finished jobs that ended more than `max_age_secs` ago.
    pub fn cleanup_finished(&self, max_age_secs: u64) -> usize {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let before = jobs.len();

        jobs.retain(|_, entry| {
            if entry.record.status.is_active() {
                return true;
            }
            match entry.record.ended_at {
                Some(ended) => now.signed_duration_since(ended).num_seconds() < max_age_secs as i64,
                None => false,
            }
        });

        before - jobs.len()
    }

    pub fn summary(&self) -> JobSummary {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);

        let mut status_counts = HashMap::new();
        let mut published_messages = 0;
        let mut active_jobs = 0;
        for entry in jobs.values() {
            *status_counts
                .entry(entry.record.status.as_str().to_string())
                .or_insert(0) += 1;
            published_messages += entry.published.load(Ordering::Relaxed);
            if entry.record.status.is_active() {
                active_jobs += 1;
            }
        }

        JobSummary {
            total_jobs: jobs.len(),
            active_jobs,
            max_jobs: self.max_concurrent_jobs,
            status_counts,
            published_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_enforces_limit() {
        let jobs = JobManager::new(2);
        jobs.create("a").unwrap();
        jobs.create("b").unwrap();

        assert!(!jobs.has_capacity());
        assert!(matches!(jobs.create("c"), Err(AgentError::Session(_))));
    }

    #[test]
    fn test_one_active_job_per_room() {
        let jobs = JobManager::new(4);
        let ticket = jobs.create("lobby").unwrap();

        assert!(jobs.is_room_active("lobby"));
        assert!(jobs.create("lobby").is_err());

        jobs.complete(ticket.job_id);
        assert!(!jobs.is_room_active("lobby"));
        assert!(jobs.create("lobby").is_ok());
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let jobs = JobManager::new(1);
        let ticket = jobs.create("lobby").unwrap();

        let record = jobs.get(ticket.job_id).unwrap();
        assert_eq!(record.status, JobStatus::Created);
        assert!(record.started_at.is_none());

        jobs.mark_running(ticket.job_id);
        assert!(jobs.get(ticket.job_id).unwrap().started_at.is_some());

        jobs.fail(ticket.job_id, "model error: 401");
        let record = jobs.get(ticket.job_id).unwrap();
        assert_eq!(record.status, JobStatus::Failed("model error: 401".to_string()));
        assert!(record.ended_at.is_some());
        assert!(jobs.has_capacity());
    }

    #[test]
    fn test_recently_failed_follows_newest_job() {
        let jobs = JobManager::new(4);
        assert!(!jobs.recently_failed("lobby", 300));

        let first = jobs.create("lobby").unwrap();
        jobs.fail(first.job_id, "model error: 401");
        assert!(jobs.recently_failed("lobby", 300));
        assert!(!jobs.recently_failed("lobby", 0));
        assert!(!jobs.recently_failed("support", 300));

        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = jobs.create("lobby").unwrap();
        assert!(!jobs.recently_failed("lobby", 300));
        jobs.complete(second.job_id);
        assert!(!jobs.recently_failed("lobby", 300));
    }

    #[test]
    fn test_published_count_is_live() {
        let jobs = JobManager::new(1);
        let ticket = jobs.create("lobby").unwrap();

        ticket.published.fetch_add(3, Ordering::Relaxed);
        assert_eq!(jobs.get(ticket.job_id).unwrap().published_messages, 3);
        assert_eq!(jobs.summary().published_messages, 3);
    }

    #[test]
    fn test_cleanup_keeps_active_jobs() {
        let jobs = JobManager::new(4);
        let running = jobs.create("a").unwrap();
        let done = jobs.create("b").unwrap();
        jobs.mark_running(running.job_id);
        jobs.complete(done.job_id);

        assert_eq!(jobs.cleanup_finished(600), 0);
        assert_eq!(jobs.cleanup_finished(0), 1);
        assert!(jobs.get(running.job_id).is_some());
        assert!(jobs.get(done.job_id).is_none());
    }

    #[test]
    fn test_summary_counts_by_status() {
        let jobs = JobManager::new(4);
        let a = jobs.create("a").unwrap();
        let b = jobs.create("b").unwrap();
        jobs.create("c").unwrap();
        jobs.mark_running(a.job_id);
        jobs.fail(b.job_id, "boom");

        let summary = jobs.summary();
        assert_eq!(summary.total_jobs, 3);
        assert_eq!(summary.active_jobs, 2);
        assert_eq!(summary.max_jobs, 4);
        assert_eq!(summary.status_counts.get("running"), Some(&1));
        assert_eq!(summary.status_counts.get("failed"), Some(&1));
        assert_eq!(summary.status_counts.get("created"), Some(&1));
    }

    #[test]
    fn test_status_serializes_with_reason() {
        let json = serde_json::to_value(JobStatus::Failed("boom".to_string())).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["reason"], "boom");

        let json = serde_json::to_value(JobStatus::Running).unwrap();
        assert_eq!(json["state"], "running");
    }
}
