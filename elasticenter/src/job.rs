//! Async job confirmation
//!
//! Mutating calls such as `createVolume` and `deleteFileSystem` return a job
//! handle instead of a result. The poller queries the job at a fixed interval
//! until it succeeds, fails, or the retry budget runs out.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::types::{JobRecord, JobStatus};

/// Anything that can report the state of an async job.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn query_job(&self, job_id: &str) -> Result<JobRecord>;
}

/// Extract the job id from a submit response nested under `envelope`.
pub fn job_id_from(submit_response: &Value, envelope: &str) -> Option<String> {
    match submit_response.get(envelope)?.get("jobid")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fixed-interval job poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPoller {
    /// Number of status queries before giving up
    pub max_retries: u32,
    /// Sleep between consecutive queries
    pub retry_interval: Duration,
}

impl JobPoller {
    pub const fn new(max_retries: u32, retry_interval: Duration) -> Self {
        Self {
            max_retries,
            retry_interval,
        }
    }

    /// Wait for the job referenced by `submit_response` to finish.
    ///
    /// `operation` and `target` only label logs and errors. Returns the job
    /// result payload on success.
    pub async fn await_job<S>(
        &self,
        source: &S,
        submit_response: &Value,
        envelope: &str,
        operation: &str,
        target: &str,
    ) -> Result<Value>
    where
        S: JobStatusSource + ?Sized,
    {
        let job_id = job_id_from(submit_response, envelope).ok_or_else(|| {
            ApiError::protocol(
                operation,
                format!("no job id under '{}' in response for '{}'", envelope, target),
            )
        })?;

        self.poll(source, &job_id, operation, target).await
    }

    /// Poll a known job id to a terminal state.
    pub async fn poll<S>(
        &self,
        source: &S,
        job_id: &str,
        operation: &str,
        target: &str,
    ) -> Result<Value>
    where
        S: JobStatusSource + ?Sized,
    {
        for attempt in 1..=self.max_retries {
            let record = source.query_job(job_id).await?;

            match JobStatus::from(record) {
                JobStatus::Succeeded(result) => {
                    info!(operation, target, job_id, attempt, "Job completed");
                    return Ok(result);
                }
                JobStatus::Failed { code, text } => {
                    warn!(operation, target, job_id, attempt, code = %code, error = %text, "Job failed");
                    return Err(ApiError::OperationFailed {
                        operation: operation.to_string(),
                        target: target.to_string(),
                        code,
                        text,
                    });
                }
                JobStatus::Pending => {
                    if attempt < self.max_retries {
                        debug!(
                            operation,
                            target,
                            job_id,
                            attempt,
                            max_retries = self.max_retries,
                            interval_ms = self.retry_interval.as_millis() as u64,
                            "Job still pending"
                        );
                        tokio::time::sleep(self.retry_interval).await;
                    }
                }
            }
        }

        warn!(operation, target, job_id, attempts = self.max_retries, "Job did not finish");
        Err(ApiError::Timeout {
            operation: operation.to_string(),
            target: target.to_string(),
            attempts: self.max_retries,
        })
    }
}
