//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransportError;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys.
    Strict,

    /// Accept and learn unknown keys, reject changed keys.
    AcceptNew,

    /// Accept all keys without checking. Most device fleets are reached
    /// this way, so it is the default.
    #[default]
    Disabled,
}

/// SSH connection configuration for one device.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Connection and authentication timeout.
    pub timeout: Duration,

    /// Drop the connection after this much silence. `None` disables it.
    pub inactivity_timeout: Option<Duration>,

    /// Terminal type requested for the PTY.
    pub terminal_type: String,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,

    /// Also offer `aes128-cbc`, for devices that speak nothing newer.
    pub legacy_ciphers: bool,
}

impl SshConfig {
    /// Create a config for `host:port` with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(30),
            inactivity_timeout: None,
            terminal_type: "vt100".to_string(),
            terminal_width: 80,
            terminal_height: 40,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            legacy_ciphers: false,
        }
    }

    /// Build a config from a target address (`host`, `host:port` or `[v6]:port`).
    pub fn from_address(address: &str, default_port: u16) -> Result<Self, TransportError> {
        let (host, port) = split_host_port(address, default_port)?;
        Ok(Self::new(host, port))
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Split an address into host and port, falling back to `default_port`.
pub fn split_host_port(address: &str, default_port: u16) -> Result<(String, u16), TransportError> {
    let address = address.trim();
    let invalid = || TransportError::InvalidAddress(address.to_string());

    if address.is_empty() {
        return Err(invalid());
    }

    // [v6] or [v6]:port
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail {
            "" => default_port,
            _ => tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .ok_or_else(invalid)?,
        };
        return Ok((host.to_string(), port));
    }

    // A bare v6 address has more than one colon and no port.
    if address.matches(':').count() > 1 {
        return Ok((address.to_string(), default_port));
    }

    match address.split_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port.parse().map_err(|_| invalid())?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(invalid()),
        None => Ok((address.to_string(), default_port)),
    }
}
