//! Job Poller
//!
//! Turns an accepted job id into an artifact id by asking the job service
//! for the job's status until it reaches a terminal state or the attempt
//! ceiling runs out.
//!
//! ```text
//!   initial delay
//!        │
//!        ▼
//!   ┌─► query ──► Submitted/Running/Pending/NotFound ──► sleep ─┐
//!   │     │                                                     │
//!   └─────┼─────────────────────────────────────────────────────┘
//!         ├──► Success      → Ok(dataId)
//!         ├──► Error/Fail   → Err(JobFailed)
//!         └──► anything else→ Err(UnknownStatus)
//!   ceiling reached          → Err(Timeout)
//! ```

use crate::error::{CatalogError, Result};
use crate::model::{IngestJob, JobStatus};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Source of delays, injected so tests run without waiting
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// One status answer from the job service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub status: JobStatus,
    /// Artifact id, present once the job succeeded
    pub data_id: Option<String>,
    /// Upstream message and detail text, verbatim
    pub message: String,
    /// The response body as received
    pub raw: String,
}

/// Anything that can report the status of a job
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn job_status(&self, job_id: &str, credential: &str) -> Result<JobReport>;
}

/// Timing of the poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Wait before the first query; a status record takes a moment to exist
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            interval: Duration::from_millis(200),
            max_attempts: 100,
        }
    }
}

/// What a single report means for the loop
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Wait,
    Done(String),
}

#[derive(Clone)]
pub struct JobPoller {
    policy: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl JobPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self::with_sleeper(policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(policy: PollPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { policy, sleeper }
    }

    /// Poll `job_id` until it resolves to an artifact id.
    pub async fn resolve(
        &self,
        source: &dyn JobStatusSource,
        job_id: &str,
        credential: &str,
    ) -> Result<String> {
        let mut job = IngestJob::submitted(job_id);
        self.sleeper.sleep(self.policy.initial_delay).await;

        for attempt in 1..=self.policy.max_attempts {
            let report = source.job_status(job_id, credential).await?;
            debug!(job_id = %job_id, attempt, status = %report.status, "Polled job status");
            job.status = report.status.clone();

            match step(&job, report)? {
                Step::Done(data_id) => return Ok(data_id),
                Step::Wait => {
                    if attempt < self.policy.max_attempts {
                        self.sleeper.sleep(self.policy.interval).await;
                    }
                }
            }
        }

        warn!(job_id = %job_id, last_status = %job.status, "Job never reached a terminal state");
        Err(CatalogError::Timeout {
            job_id: job_id.to_string(),
            attempts: self.policy.max_attempts,
        })
    }
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(PollPolicy::default())
    }
}

fn step(job: &IngestJob, report: JobReport) -> Result<Step> {
    match &job.status {
        s if s.is_in_progress() => Ok(Step::Wait),
        JobStatus::Success => match report.data_id.filter(|id| !id.is_empty()) {
            Some(data_id) => Ok(Step::Done(data_id)),
            None => Err(CatalogError::NoDataId {
                job_id: job.job_id.clone(),
                body: report.raw,
            }),
        },
        JobStatus::Error | JobStatus::Fail => Err(CatalogError::JobFailed {
            job_id: job.job_id.clone(),
            status: job.status.to_string(),
            message: report.message,
            body: report.raw,
        }),
        other => Err(CatalogError::UnknownStatus {
            job_id: job.job_id.clone(),
            status: other.to_string(),
            body: report.raw,
        }),
    }
}
