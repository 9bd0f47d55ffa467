//! Job manager
//!
//! A register of background operations. Each submitted operation runs exactly
//! once on its own Tokio task; callers poll its state by id.
//!
//! ```text
//! submit(op) ──► id ──► running ──┬──► succeeded ──┐
//!                                 └──► failed ─────┴──► evicted after retention
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use taskfleet_cloud::{CloudError, Result};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

/// How long a finished job stays queryable
pub const JOB_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        self != JobState::Running
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    fn running() -> Self {
        Self {
            state: JobState::Running,
            error: None,
        }
    }

    fn succeeded() -> Self {
        Self {
            state: JobState::Succeeded,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            state: JobState::Failed,
            error: Some(error),
        }
    }
}

struct Entry {
    status: JobStatus,
    finished_at: Option<Instant>,
}

type Jobs = RwLock<HashMap<Uuid, Entry>>;

#[derive(Clone)]
pub struct JobManager {
    jobs: Arc<Jobs>,
    retention: Duration,
}

impl Default for JobManager {
    fn default() -> Self {
        Self::with_retention(JOB_RETENTION)
    }
}

impl JobManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Schedule `operation` and return its id immediately
    pub async fn submit<F, E>(&self, operation: F) -> Uuid
    where
        F: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let id = Uuid::new_v4();
        {
            let mut jobs = self.jobs.write().await;
            evict_expired(&mut jobs, self.retention);
            jobs.insert(
                id,
                Entry {
                    status: JobStatus::running(),
                    finished_at: None,
                },
            );
        }

        let jobs = self.jobs.clone();
        let span = tracing::info_span!("job", %id);
        tokio::spawn(
            async move {
                // Panics surface as a JoinError here
                let outcome = tokio::spawn(operation.in_current_span()).await;
                let status = match outcome {
                    Ok(Ok(())) => {
                        tracing::info!("Job succeeded");
                        JobStatus::succeeded()
                    }
                    Ok(Err(err)) => {
                        tracing::warn!("Job failed: {}", err);
                        JobStatus::failed(err.to_string())
                    }
                    Err(err) if err.is_panic() => {
                        tracing::error!("Job panicked");
                        JobStatus::failed("operation panicked".to_string())
                    }
                    Err(err) => JobStatus::failed(err.to_string()),
                };
                finish(&jobs, id, status).await;
            }
            .instrument(span),
        );
        id
    }

    pub async fn status(&self, id: Uuid) -> Result<JobStatus> {
        let mut jobs = self.jobs.write().await;
        evict_expired(&mut jobs, self.retention);
        jobs.get(&id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| CloudError::NotFound(format!("job {id}")))
    }

    /// Ids of every job still held
    pub async fn ids(&self) -> HashSet<Uuid> {
        let mut jobs = self.jobs.write().await;
        evict_expired(&mut jobs, self.retention);
        jobs.keys().copied().collect()
    }
}

/// Record a terminal state; the first one written wins
async fn finish(jobs: &Jobs, id: Uuid, status: JobStatus) {
    let mut jobs = jobs.write().await;
    match jobs.get_mut(&id) {
        Some(current) if !current.status.state.is_terminal() => {
            current.status = status;
            current.finished_at = Some(Instant::now());
        }
        _ => {}
    }
}

fn evict_expired(jobs: &mut HashMap<Uuid, Entry>, retention: Duration) {
    let now = Instant::now();
    let before = jobs.len();
    jobs.retain(|_, entry| {
        entry
            .finished_at
            .is_none_or(|finished| now.duration_since(finished) < retention)
    });
    if jobs.len() < before {
        tracing::debug!("Evicted {} finished jobs", before - jobs.len());
    }
}
