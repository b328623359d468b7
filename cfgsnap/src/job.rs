//! Backup jobs and the executor that runs them target by target.

use std::path::PathBuf;
use std::time::Duration;

use log::{error, info, warn};

use crate::error::TargetError;
use crate::script::{Action, ScriptReport, ScriptRunner};
use crate::session::{Session, SessionConfig};
use crate::transport::{Connector, Credentials};
use crate::upload::Uploader;

/// One device to back up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Device address (`host` or `host:port`).
    pub address: String,

    /// Artifact the script leaves in the job's local path.
    pub filename: String,
}

impl Target {
    /// Create a target.
    pub fn new(address: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            filename: filename.into(),
        }
    }
}

/// A backup recipe: credentials, script and the devices to run it on.
#[derive(Debug, Clone)]
pub struct Job {
    /// Name used in logs and errors.
    pub name: String,

    /// Login for every target of this job.
    pub credentials: Credentials,

    /// Directory where the script leaves artifacts.
    pub local_path: PathBuf,

    /// Steps run on each target, in order.
    pub actions: Vec<Action>,

    /// Devices, in order.
    pub targets: Vec<Target>,
}

/// What happened on one target.
#[derive(Debug)]
pub struct TargetOutcome {
    /// Target address.
    pub address: String,

    /// Artifact name.
    pub filename: String,

    /// Script report on success, the failure otherwise.
    pub result: Result<ScriptReport, TargetError>,
}

impl TargetOutcome {
    /// Whether the script ran and the artifact was uploaded.
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Results for every target of a job.
#[derive(Debug)]
pub struct JobReport {
    /// Job name.
    pub job: String,

    /// One entry per target, in target order.
    pub outcomes: Vec<TargetOutcome>,
}

impl JobReport {
    /// Number of targets that succeeded.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Number of targets that failed.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Runs jobs: one fresh session per target, upload on success.
///
/// Targets are independent: a failure is logged and recorded, and the
/// next target still runs. Nothing is retried.
pub struct JobExecutor<C, U> {
    connector: C,
    uploader: U,
    default_timeout: Duration,
    session_config: SessionConfig,
}

impl<C: Connector, U: Uploader> JobExecutor<C, U> {
    /// Create an executor. `default_timeout` applies to expects without
    /// their own timeout.
    pub fn new(connector: C, uploader: U, default_timeout: Duration) -> Self {
        Self {
            connector,
            uploader,
            default_timeout,
            session_config: SessionConfig::default(),
        }
    }

    /// Override session tuning.
    pub fn with_session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// The connector used to open sessions.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// The uploader used after successful scripts.
    pub fn uploader(&self) -> &U {
        &self.uploader
    }

    /// Run every job in order.
    pub async fn run_all(&self, jobs: &[Job]) -> Vec<JobReport> {
        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            reports.push(self.run_job(job).await);
        }
        reports
    }

    /// Run one job over all of its targets.
    pub async fn run_job(&self, job: &Job) -> JobReport {
        info!("job '{}': {} target(s)", job.name, job.targets.len());

        let mut outcomes = Vec::with_capacity(job.targets.len());
        for target in &job.targets {
            let result = self.run_target(job, target).await;

            match result {
                Ok(ref report) => info!(
                    "job '{}' {}: backed up {} in {:?}",
                    job.name, target.address, target.filename, report.elapsed
                ),
                Err(ref e) => error!(
                    "job '{}' {}: {:?} failure, skipping: {}",
                    job.name,
                    target.address,
                    e.kind(),
                    e
                ),
            }

            outcomes.push(TargetOutcome {
                address: target.address.clone(),
                filename: target.filename.clone(),
                result,
            });
        }

        let report = JobReport {
            job: job.name.clone(),
            outcomes,
        };
        info!(
            "job '{}': {} succeeded, {} failed",
            report.job,
            report.succeeded(),
            report.failed()
        );
        report
    }

    /// Open a session, run the script, close the session, then upload.
    ///
    /// The session is closed whether or not the script succeeds. The
    /// upload only happens after a complete script.
    pub async fn run_target(&self, job: &Job, target: &Target) -> Result<ScriptReport, TargetError> {
        let transport = self
            .connector
            .connect(&target.address, &job.credentials)
            .await?;
        let mut session =
            Session::with_config(target.address.as_str(), transport, self.session_config.clone());

        let result = ScriptRunner::new(&job.name, &target.address, self.default_timeout)
            .run(&mut session, &job.actions)
            .await;

        if let Err(e) = session.close().await {
            warn!("job '{}' {}: close failed: {}", job.name, target.address, e);
        }

        let report = result?;
        self.uploader.upload(&target.filename, &job.local_path).await?;
        Ok(report)
    }
}
