//! Error types for cfgsnap.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for cfgsnap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session send/expect errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A script step failed on a target
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// Artifact upload errors
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// Configuration document errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Closed set of failure kinds a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Dial, authentication or shell setup failed.
    Connection,
    /// Writing to the remote shell failed.
    Write,
    /// The expected text did not show up in time.
    Timeout,
    /// Reading from the remote shell failed.
    Read,
    /// The artifact could not be uploaded.
    Upload,
}

/// Transport layer errors (SSH connection, authentication, shell setup).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Target address could not be parsed
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Server key does not match the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Server is not in known_hosts and strict checking is on
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection setup timed out
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}

/// Session layer errors (send, expect, close).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Writing to the shell failed
    #[error("Write failed: {0}")]
    Write(#[source] io::Error),

    /// Expected text not seen within the budget
    #[error("Timed out after {after:?} waiting for {needle:?}")]
    Timeout { needle: String, after: Duration },

    /// Reading from the shell failed; the read pump has stopped
    #[error("Read failed: {0}")]
    Read(#[source] io::Error),

    /// The session was closed or its read pump is gone
    #[error("Session closed")]
    Closed,
}

impl SessionError {
    /// The failure kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Write(_) => ErrorKind::Write,
            SessionError::Timeout { .. } => ErrorKind::Timeout,
            SessionError::Read(_) | SessionError::Closed => ErrorKind::Read,
        }
    }
}

/// A failed script step, with enough context to find it in the config.
#[derive(Error, Debug)]
#[error("job '{job}' target {target}: step {step} ({action}) failed: {source}")]
pub struct ScriptError {
    /// Job name.
    pub job: String,
    /// Target address.
    pub target: String,
    /// Zero-based index of the failing action.
    pub step: usize,
    /// Display form of the failing action (hidden text is masked).
    pub action: String,
    /// Underlying session failure.
    #[source]
    pub source: SessionError,
}

impl ScriptError {
    /// The failure kind of the underlying session error.
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }
}

/// Per-target failure recorded by the job executor.
#[derive(Error, Debug)]
pub enum TargetError {
    /// Could not open a session to the target
    #[error("connect failed: {0}")]
    Connect(#[from] TransportError),

    /// A script step failed
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// The script succeeded but the artifact upload failed
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
}

impl TargetError {
    /// The failure kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TargetError::Connect(_) => ErrorKind::Connection,
            TargetError::Script(e) => e.kind(),
            TargetError::Upload(_) => ErrorKind::Upload,
        }
    }
}

/// Artifact upload errors.
#[derive(Error, Debug)]
pub enum UploadError {
    /// No bucket/domain configured
    #[error("uploader is not configured (bucket and domain are required)")]
    NotConfigured,

    /// Local artifact could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// HTTP request failed or the store rejected it
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Configuration document errors. These are fatal to the process.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Malformed YAML
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A duration string did not parse
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// An action is not exactly one of send/enter/expect
    #[error("job '{job}' action {index}: {message}")]
    InvalidAction {
        job: String,
        index: usize,
        message: String,
    },
}

/// Result type alias using cfgsnap's Error.
pub type Result<T> = std::result::Result<T, Error>;
