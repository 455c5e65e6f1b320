//! Job submission.
//!
//! [`JobSubmitter`] validates the target locally and then issues exactly
//! one submission request. It never retries; that is the caller's call.

use std::sync::Arc;

use webaudit_core::job::{Job, JobOptions};

use crate::api::{SubmitRequest, SubmitResponse};
use crate::error::TrackerError;
use crate::transport::SubmitEndpoint;

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The analyzer already had a result for this target.
    Cached(serde_json::Value),
    /// The job runs remotely; follow it with this session id.
    Pending(String),
}

pub struct JobSubmitter {
    endpoint: Arc<dyn SubmitEndpoint>,
}

impl JobSubmitter {
    pub fn new(endpoint: Arc<dyn SubmitEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Validate `target` and build the job, without touching the network.
    pub fn prepare(&self, target: &str, options: JobOptions) -> Result<Job, TrackerError> {
        Ok(Job::new(target, options)?)
    }

    /// Submit an already validated job.
    pub async fn submit_job(&self, job: &Job) -> Result<SubmitOutcome, TrackerError> {
        let request = SubmitRequest {
            url: job.target.clone(),
            include_screenshots: job.options.include_screenshots,
        };

        match self.endpoint.submit(&request).await {
            Ok(SubmitResponse::Cached(result)) => {
                tracing::info!(job_id = %job.id, target = %job.target, "Cache hit");
                Ok(SubmitOutcome::Cached(result))
            }
            Ok(SubmitResponse::Pending(pending)) => {
                tracing::info!(
                    job_id = %job.id,
                    target = %job.target,
                    session_id = %pending.session_id,
                    websocket_url = ?pending.websocket_url,
                    estimated_duration = ?pending.estimated_duration,
                    "Analysis started",
                );
                Ok(SubmitOutcome::Pending(pending.session_id))
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, target = %job.target, error = %e, "Submission failed");
                Err(e.into())
            }
        }
    }

    /// Validate and submit in one step.
    pub async fn submit(
        &self,
        target: &str,
        options: JobOptions,
    ) -> Result<(Job, SubmitOutcome), TrackerError> {
        let job = self.prepare(target, options)?;
        let outcome = self.submit_job(&job).await?;
        Ok((job, outcome))
    }
}
