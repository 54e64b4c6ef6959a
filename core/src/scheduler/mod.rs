//! Scheduler (C5): fires `open` and `close` jobs at UTC instants.
//! Jobs are keyed by deterministic ids (`open_poll_<id>` /
//! `close_poll_<id>`) so scheduling is idempotent — replacing a job
//! with the same id just moves its fire time. The scheduler holds no
//! durable state of its own: on restart, the recovery orchestrator
//! (C11) repopulates it from the database.
//!
//! A cooperative loop ticking on a short interval (so instant-based
//! jobs fire close to on time), with a `tokio_util::sync::
//! CancellationToken` for graceful shutdown.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub fn open_job_id(poll_id: i64) -> String {
    format!("open_poll_{poll_id}")
}

pub fn close_job_id(poll_id: i64) -> String {
    format!("close_poll_{poll_id}")
}

#[derive(Debug, Clone, Copy)]
pub enum JobAction {
    OpenPoll(i64),
    ClosePoll(i64),
}

#[derive(Debug, Clone)]
struct ScheduledJob {
    fire_at: DateTime<Utc>,
    action: JobAction,
}

/// The side effect a fired job performs. Implemented by `app.rs`'s
/// `Service`, which wires the opening/closing services underneath —
/// the scheduler itself knows nothing about chat messages or the
/// database.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_open(&self, poll_id: i64);
    async fn run_close(&self, poll_id: i64);
}

const TICK: Duration = Duration::from_secs(1);

pub struct Scheduler {
    jobs: Arc<Mutex<HashMap<String, ScheduledJob>>>,
    runner: Arc<dyn JobRunner>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn JobRunner>) -> Self {
        Self { jobs: Arc::new(Mutex::new(HashMap::new())), runner }
    }

    pub async fn schedule_open(&self, poll_id: i64, fire_at: DateTime<Utc>) {
        let id = open_job_id(poll_id);
        debug!(job_id = %id, %fire_at, "scheduling open job");
        self.jobs.lock().await.insert(id, ScheduledJob { fire_at, action: JobAction::OpenPoll(poll_id) });
    }

    pub async fn schedule_close(&self, poll_id: i64, fire_at: DateTime<Utc>) {
        let id = close_job_id(poll_id);
        debug!(job_id = %id, %fire_at, "scheduling close job");
        self.jobs.lock().await.insert(id, ScheduledJob { fire_at, action: JobAction::ClosePoll(poll_id) });
    }

    /// No-op if the job is absent — cancellation is always idempotent.
    pub async fn cancel(&self, job_id: &str) {
        self.jobs.lock().await.remove(job_id);
    }

    pub async fn is_scheduled(&self, job_id: &str) -> bool {
        self.jobs.lock().await.contains_key(job_id)
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Runs until `shutdown` is cancelled. Due jobs are dispatched as
    /// separate tasks so one slow `run_open`/`run_close` call never
    /// delays the tick loop or other due jobs in the same tick.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("scheduler loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("scheduler loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.dispatch_due().await;
                }
            }
        }
    }

    async fn dispatch_due(&self) {
        let now = Utc::now();
        let due: Vec<(String, JobAction)> = {
            let mut jobs = self.jobs.lock().await;
            let due_ids: Vec<String> = jobs
                .iter()
                .filter(|(_, job)| job.fire_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            due_ids
                .into_iter()
                .filter_map(|id| jobs.remove(&id).map(|job| (id, job.action)))
                .collect()
        };

        for (job_id, action) in due {
            let runner = self.runner.clone();
            tokio::spawn(async move {
                match action {
                    JobAction::OpenPoll(poll_id) => {
                        debug!(job_id, poll_id, "dispatching open job");
                        runner.run_open(poll_id).await;
                    }
                    JobAction::ClosePoll(poll_id) => {
                        debug!(job_id, poll_id, "dispatching close job");
                        runner.run_close(poll_id).await;
                    }
                }
            });
        }
    }
}
