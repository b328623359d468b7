//! Transport layer: authenticated full-duplex shell sessions.
//!
//! A [`Connector`] dials a device and hands back a [`Transport`], which is
//! split once into an independent read half, write half and teardown
//! handle. The session layer takes ownership of all three.

pub mod config;
mod ssh;

use std::fmt;
use std::future::Future;

use secrecy::SecretString;
use tokio::io::{AsyncRead, AsyncWrite};

pub use config::{HostKeyVerification, SshConfig};
pub use ssh::{SshConnector, SshHandle, SshTransport};

use crate::error::TransportError;

/// Login credentials for a device.
#[derive(Clone)]
pub struct Credentials {
    /// Username for authentication.
    pub username: String,

    /// Password for authentication.
    pub password: SecretString,
}

impl Credentials {
    /// Create credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An open shell session that can be split into its parts.
pub trait Transport: Send + 'static {
    /// Read side of the shell (device output).
    type Reader: AsyncRead + Unpin + Send + 'static;

    /// Write side of the shell (device input).
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// Owns the underlying connection and tears it down.
    type Handle: TransportHandle;

    /// Split into read half, write half and teardown handle.
    fn into_split(self) -> (Self::Reader, Self::Writer, Self::Handle);
}

/// Teardown side of a transport.
pub trait TransportHandle: Send + 'static {
    /// Release the connection. Consumes the handle so it runs at most once.
    fn close(self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Dials devices and opens interactive shells on them.
pub trait Connector: Send + Sync {
    /// The transport produced by this connector.
    type Transport: Transport;

    /// Connect to `address`, authenticate and start a shell with a PTY.
    fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;
}
