//! Backup document loading.
//!
//! The document is YAML:
//!
//! ```yaml
//! timeout: 5s
//! legacy_ciphers: true
//! ess:
//!   bucket_name: backups
//!   domain_name: storage.example.com
//!   username: ACCESS_KEY
//!   password: SECRET
//! jobs:
//!   - job_name: core
//!     username: backup
//!     password: hunter2
//!     local_path: /srv/tftp/
//!     targets:
//!       - ip: 10.0.0.1
//!         file_name: core1.cfg
//!     actions:
//!       - expect: ">"
//!       - enter: "enable"
//!       - expect: "Password:"
//!         timeout: 10s
//!       - enter: "secret"
//!         hidden: true
//! ```
//!
//! Each action sets exactly one of `send` (verbatim), `enter` (text plus a
//! newline) or `expect`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::job::{Job, Target};
use crate::script::Action;
use crate::transport::Credentials;
use crate::upload::BucketConfig;

/// A loaded backup document.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Default expect timeout.
    pub timeout: Duration,

    /// Where artifacts are uploaded.
    pub uploader: BucketConfig,

    /// Jobs, in document order.
    pub jobs: Vec<Job>,

    /// Offer the legacy `aes128-cbc` cipher when connecting.
    pub legacy_ciphers: bool,
}

impl BackupConfig {
    /// Load and validate a document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawBackup = serde_yaml::from_str(content)?;

        let timeout = parse_duration(&raw.timeout)?;
        let uploader = raw.ess.map(RawUploader::into_config).unwrap_or_default();
        let jobs = raw
            .jobs
            .into_iter()
            .map(RawJob::into_job)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            timeout,
            uploader,
            jobs,
            legacy_ciphers: raw.legacy_ciphers,
        })
    }

    /// Jobs whose names are in `names`; all jobs when `names` is empty.
    pub fn select_jobs(&self, names: &[String]) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|job| names.is_empty() || names.contains(&job.name))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawBackup {
    timeout: String,
    #[serde(default)]
    legacy_ciphers: bool,
    #[serde(default)]
    ess: Option<RawUploader>,
    #[serde(default)]
    jobs: Vec<RawJob>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUploader {
    #[serde(default)]
    bucket_name: String,
    #[serde(default)]
    domain_name: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: Option<String>,
}

impl RawUploader {
    fn into_config(self) -> BucketConfig {
        BucketConfig {
            bucket_name: self.bucket_name,
            domain_name: self.domain_name,
            access_key: self.username,
            secret_key: self.password.map(Into::into),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawJob {
    job_name: String,
    username: String,
    password: String,
    local_path: PathBuf,
    #[serde(default)]
    targets: Vec<RawTarget>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

impl RawJob {
    fn into_job(self) -> Result<Job, ConfigError> {
        let actions = self
            .actions
            .into_iter()
            .enumerate()
            .map(|(index, action)| action.into_action(&self.job_name, index))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Job {
            credentials: Credentials::new(self.username, self.password),
            local_path: self.local_path,
            actions,
            targets: self
                .targets
                .into_iter()
                .map(|t| Target::new(t.ip, t.file_name))
                .collect(),
            name: self.job_name,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawTarget {
    ip: String,
    file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAction {
    send: Option<String>,
    enter: Option<String>,
    expect: Option<String>,
    timeout: Option<String>,
    #[serde(default)]
    hidden: bool,
}

impl RawAction {
    fn into_action(self, job: &str, index: usize) -> Result<Action, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidAction {
            job: job.to_string(),
            index,
            message: message.to_string(),
        };

        match (self.send, self.enter, self.expect) {
            (Some(_), None, None) | (None, Some(_), None) if self.timeout.is_some() => {
                Err(invalid("timeout is only valid on expect"))
            }
            (Some(text), None, None) => Ok(Action::Send {
                text,
                hidden: self.hidden,
            }),
            (None, Some(text), None) => Ok(Action::Send {
                text: format!("{}\n", text),
                hidden: self.hidden,
            }),
            (None, None, Some(_)) if self.hidden => Err(invalid("hidden is only valid on send/enter")),
            (None, None, Some(needle)) if needle.is_empty() => {
                Err(invalid("expect text must not be empty"))
            }
            (None, None, Some(needle)) => Ok(Action::Expect {
                needle,
                timeout: self.timeout.as_deref().map(parse_duration).transpose()?,
            }),
            (None, None, None) => Err(invalid("one of send, enter or expect is required")),
            _ => Err(invalid("only one of send, enter or expect may be set")),
        }
    }
}

/// Parse a Go-style duration such as `5s`, `250ms` or `1m30s`.
///
/// Units: `ns`, `us` (`µs`), `ms`, `s`, `m`, `h`. Numbers may have a
/// fractional part. A bare `0` is accepted.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason,
    };

    let s = value.trim();
    if s.is_empty() {
        return Err(invalid("empty duration".into()));
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let mut rest = s;
    let mut nanos = 0f64;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid(format!("expected a number at '{}'", rest)));
        }
        let number: f64 = rest[..number_end]
            .parse()
            .map_err(|_| invalid(format!("bad number '{}'", &rest[..number_end])))?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(invalid("missing unit".into())),
            unit => return Err(invalid(format!("unknown unit '{}'", unit))),
        };
        rest = &rest[unit_end..];

        nanos += number * scale;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(invalid("duration out of range".into()));
    }
    Ok(Duration::from_nanos(nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    const DOCUMENT: &str = r##"
timeout: 5s
legacy_ciphers: true
ess:
  bucket_name: backups
  domain_name: storage.example.com
  username: AKID
  password: s3cret
jobs:
  - job_name: core
    username: backup
    password: hunter2
    local_path: /srv/tftp/
    targets:
      - ip: 10.0.254.151
        file_name: core1.cfg
      - ip: "10.0.254.152:2222"
        file_name: core2.cfg
    actions:
      - expect: ">"
      - enter: "en 5"
      - expect: "Password:"
        timeout: 10s
      - enter: "hunter2"
        hidden: true
      - expect: "#"
      - send: "copy run scp\n"
  - job_name: edge
    username: backup
    password: other
    local_path: /srv/edge
"##;

    #[test]
    fn test_parse_document() {
        let config = BackupConfig::from_yaml(DOCUMENT).unwrap();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.legacy_ciphers);
        assert_eq!(config.uploader.bucket_name, "backups");
        assert_eq!(config.uploader.access_key, "AKID");
        assert_eq!(
            config.uploader.secret_key.as_ref().unwrap().expose_secret(),
            "s3cret"
        );
        assert_eq!(config.jobs.len(), 2);

        let job = &config.jobs[0];
        assert_eq!(job.name, "core");
        assert_eq!(job.credentials.username, "backup");
        assert_eq!(job.credentials.password.expose_secret(), "hunter2");
        assert_eq!(job.local_path, PathBuf::from("/srv/tftp/"));
        assert_eq!(
            job.targets,
            vec![
                Target::new("10.0.254.151", "core1.cfg"),
                Target::new("10.0.254.152:2222", "core2.cfg"),
            ]
        );
        assert_eq!(
            job.actions,
            vec![
                Action::expect(">"),
                Action::send("en 5\n"),
                Action::expect_within("Password:", Duration::from_secs(10)),
                Action::send_hidden("hunter2\n"),
                Action::expect("#"),
                Action::send("copy run scp\n"),
            ]
        );

        assert!(config.jobs[1].targets.is_empty());
        assert!(config.jobs[1].actions.is_empty());
    }

    #[test]
    fn test_select_jobs() {
        let config = BackupConfig::from_yaml(DOCUMENT).unwrap();
        assert_eq!(config.select_jobs(&[]).len(), 2);

        let selected = config.select_jobs(&["edge".to_string()]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "edge");
    }

    #[test]
    fn test_missing_uploader_is_unconfigured() {
        let config = BackupConfig::from_yaml("timeout: 1s\n").unwrap();
        assert!(!config.uploader.is_configured());
        assert!(config.jobs.is_empty());
        assert!(!config.legacy_ciphers);
    }

    #[test]
    fn test_invalid_timeout_is_fatal() {
        let err = BackupConfig::from_yaml("timeout: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));

        let err = BackupConfig::from_yaml("jobs: []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    fn action_error(action: &str) -> ConfigError {
        let doc = format!(
            "timeout: 1s\njobs:\n  - job_name: j\n    username: u\n    password: p\n    local_path: /tmp\n    actions:\n      - {}\n",
            action
        );
        BackupConfig::from_yaml(&doc).unwrap_err()
    }

    #[test]
    fn test_invalid_actions() {
        for action in [
            "{ send: a, expect: b }",
            "{ enter: a, send: b }",
            "{ hidden: true }",
            "{ expect: \"\" }",
            "{ expect: \"#\", hidden: true }",
            "{ send: a, timeout: 1s }",
        ] {
            let err = action_error(action);
            assert!(
                matches!(err, ConfigError::InvalidAction { index: 0, .. }),
                "{}: {:?}",
                action,
                err
            );
        }

        assert!(matches!(
            action_error("{ expect: \"#\", timeout: 5 parsecs }"),
            ConfigError::InvalidDuration { .. }
        ));
        assert!(matches!(
            action_error("{ sned: typo }"),
            ConfigError::Yaml(_)
        ));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("100ms").unwrap(), Duration::from_millis(100));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("250µs").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("42ns").unwrap(), Duration::from_nanos(42));
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for value in ["", "5", "s", "5x", "1.2.3s", "-5s", "5 s"] {
            assert!(parse_duration(value).is_err(), "{} should not parse", value);
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backupconf.yaml");
        std::fs::write(&path, DOCUMENT).unwrap();

        let config = BackupConfig::load(&path).unwrap();
        assert_eq!(config.jobs[0].actions.len(), 6);

        let err = BackupConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
