//! Registry of running jobs.
//!
//! [`JobRegistry`] spawns one driver per job, keeps its cancellation
//! token and task handle, and tears everything down on shutdown. Each
//! job's token is a child of the registry's master token, so cancelling
//! the master stops every job. Finished jobs are reaped lazily.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use webaudit_core::job::JobOptions;
use webaudit_core::types::JobId;

use crate::config::CoordinatorConfig;
use crate::coordinator::{spawn_job_with_cancel, Transports};
use crate::error::TrackerError;
use crate::events::{JobEvent, JobState};

/// How long shutdown waits for each driver to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks every job started through it.
///
/// Created once via [`JobRegistry::new`]; the returned `Arc` can be
/// cloned freely.
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, ManagedJob>>,
    transports: Transports,
    config: CoordinatorConfig,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

/// Internal bookkeeping for a single job.
struct ManagedJob {
    target: String,
    /// Per-job cancellation token (child of the master token).
    cancel: CancellationToken,
    task_handle: tokio::task::JoinHandle<JobState>,
}

/// Summary of a job still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveJob {
    pub id: JobId,
    /// Normalized form, as submitted to the analyzer.
    pub target: String,
}

impl JobRegistry {
    pub fn new(transports: Transports, config: CoordinatorConfig) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(HashMap::new()),
            transports,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Validate and start a job, returning its id and event stream.
    pub async fn start(
        &self,
        target: &str,
        options: JobOptions,
    ) -> Result<(JobId, mpsc::UnboundedReceiver<JobEvent>), RegistryError> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::ShutDown);
        }

        let handle = spawn_job_with_cancel(
            self.transports.clone(),
            self.config,
            target,
            options,
            self.cancel.child_token(),
        )?;
        let id = handle.id();
        let target = handle.target().to_string();
        let (events, cancel, task_handle) = handle.into_parts();

        let mut jobs = self.jobs.write().await;
        reap_finished(&mut jobs);
        jobs.insert(
            id,
            ManagedJob {
                target: target.clone(),
                cancel,
                task_handle,
            },
        );
        tracing::info!(job_id = %id, target = %target, active = jobs.len(), "Job registered");

        Ok((id, events))
    }

    /// Request cancellation of one job. Cancelling a finished job that has
    /// not been reaped yet is a no-op.
    pub async fn cancel(&self, id: JobId) -> Result<(), RegistryError> {
        let jobs = self.jobs.read().await;
        let managed = jobs.get(&id).ok_or(RegistryError::JobNotFound(id))?;
        tracing::info!(job_id = %id, target = %managed.target, "Cancelling job");
        managed.cancel.cancel();
        Ok(())
    }

    /// Jobs whose drivers are still running.
    pub async fn active_jobs(&self) -> Vec<ActiveJob> {
        let mut jobs = self.jobs.write().await;
        reap_finished(&mut jobs);
        jobs.iter()
            .map(|(id, managed)| ActiveJob {
                id: *id,
                target: managed.target.clone(),
            })
            .collect()
    }

    /// Cancel every job and wait for the drivers to exit.
    ///
    /// Cancels the master token, then waits up to 5 seconds per task.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job registry");
        self.cancel.cancel();

        let mut jobs = self.jobs.write().await;
        for (id, managed) in jobs.drain() {
            tracing::info!(job_id = %id, "Stopping job driver");
            managed.cancel.cancel();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(state)) => tracing::debug!(job_id = %id, ?state, "Job driver stopped"),
                Ok(Err(e)) => tracing::warn!(job_id = %id, error = %e, "Job driver panicked"),
                Err(_) => tracing::warn!(job_id = %id, "Job driver did not stop in time"),
            }
        }

        tracing::info!("Job registry shut down complete");
    }
}

fn reap_finished(jobs: &mut HashMap<JobId, ManagedJob>) {
    jobs.retain(|_, managed| !managed.task_handle.is_finished());
}

/// Errors from the job registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Job registry is shut down")]
    ShutDown,

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}
