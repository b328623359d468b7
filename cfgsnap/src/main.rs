//! cfgsnap command line.
//!
//! Loads the backup document, sets up the log sink and runs every selected
//! job. Per-target failures are logged; only a bad config or log sink makes
//! the process exit non-zero.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use log::{error, info};

use cfgsnap::config::parse_duration;
use cfgsnap::transport::HostKeyVerification;
use cfgsnap::{BackupConfig, BucketUploader, JobExecutor, SshConnector};

#[derive(Debug, Parser)]
#[command(name = "cfgsnap", version, about = "Back up network device configuration over SSH")]
struct Args {
    /// Backup document to load.
    #[arg(short, long, default_value = "backupconf.yaml")]
    config: PathBuf,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log filter when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Only run jobs with these names (repeatable).
    #[arg(short, long = "job")]
    jobs: Vec<String>,

    /// SSH connect/authenticate timeout (e.g. 30s).
    #[arg(long, default_value = "30s", value_parser = parse_timeout)]
    connect_timeout: Duration,

    /// Host key checking mode.
    #[arg(long, value_enum, default_value_t = HostKeyMode::Disabled)]
    host_key_check: HostKeyMode,

    /// known_hosts file for accept-new/strict checking.
    #[arg(long)]
    known_hosts: Option<PathBuf>,

    /// Offer aes128-cbc for devices without modern ciphers.
    #[arg(long)]
    legacy_ciphers: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum HostKeyMode {
    Disabled,
    AcceptNew,
    Strict,
}

impl From<HostKeyMode> for HostKeyVerification {
    fn from(mode: HostKeyMode) -> Self {
        match mode {
            HostKeyMode::Disabled => HostKeyVerification::Disabled,
            HostKeyMode::AcceptNew => HostKeyVerification::AcceptNew,
            HostKeyMode::Strict => HostKeyVerification::Strict,
        }
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}

fn init_logging(args: &Args) -> std::io::Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level));

    if let Some(ref path) = args.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("cfgsnap: cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }

    let config = match BackupConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load {}: {}", args.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut connector = SshConnector::new()
        .timeout(args.connect_timeout)
        .host_key_verification(args.host_key_check.into())
        .legacy_ciphers(args.legacy_ciphers || config.legacy_ciphers);
    if let Some(ref path) = args.known_hosts {
        connector = connector.known_hosts_path(path);
    }

    let executor = JobExecutor::new(
        connector,
        BucketUploader::new(config.uploader.clone()),
        config.timeout,
    );

    let jobs = config.select_jobs(&args.jobs);
    if jobs.is_empty() {
        info!("no jobs to run");
    }

    let reports = executor.run_all(&jobs).await;
    let failed: usize = reports.iter().map(|r| r.failed()).sum();
    let succeeded: usize = reports.iter().map(|r| r.succeeded()).sum();
    info!("done: {} target(s) backed up, {} failed", succeeded, failed);

    ExitCode::SUCCESS
}
