//! # cfgsnap
//!
//! Backs up network device configuration by driving an interactive SSH
//! shell through a scripted sequence of send/expect steps.
//!
//! ## Features
//!
//! - Async SSH sessions via russh, with a PTY and interactive shell
//! - Demand-driven background reader: nothing is read until an expect asks
//! - Literal substring matching across chunk boundaries
//! - Fixed total timeout per expect, with in-flight reads cancelled on timeout
//! - Per-target isolation: one failing device never stops the rest of a job
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cfgsnap::{BackupConfig, BucketUploader, JobExecutor, SshConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cfgsnap::Error> {
//!     let config = BackupConfig::load("backupconf.yaml")?;
//!
//!     let executor = JobExecutor::new(
//!         SshConnector::new(),
//!         BucketUploader::new(config.uploader.clone()),
//!         config.timeout,
//!     );
//!
//!     for report in executor.run_all(&config.jobs).await {
//!         println!("{}: {} ok, {} failed", report.job, report.succeeded(), report.failed());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod script;
pub mod session;
pub mod transport;
pub mod upload;

// Re-export main types for convenience
pub use config::BackupConfig;
pub use error::{Error, ErrorKind};
pub use job::{Job, JobExecutor, JobReport, Target, TargetOutcome};
pub use script::{Action, ScriptBuilder, ScriptReport, ScriptRunner};
pub use session::{Session, SessionState, Shell};
pub use transport::{Connector, Credentials, SshConnector};
pub use upload::{BucketConfig, BucketUploader, Uploader};
