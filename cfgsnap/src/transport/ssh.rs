//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelStream, Preferred, Pty, cipher};
use secrecy::ExposeSecret;
use tokio::io::{ReadHalf, WriteHalf};

use super::config::{DEFAULT_PORT, HostKeyVerification, SshConfig};
use super::{Connector, Credentials, Transport, TransportHandle};
use crate::error::TransportError;

/// Keyboard-interactive rounds before giving up.
const MAX_KBD_INTERACTIVE_ROUNDS: usize = 3;

/// Line speed advertised in the PTY modes.
const TTY_SPEED: u32 = 14400;

/// Dials devices over SSH using shared connection settings.
#[derive(Debug, Clone)]
pub struct SshConnector {
    default_port: u16,
    timeout: Duration,
    inactivity_timeout: Option<Duration>,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    legacy_ciphers: bool,
}

impl SshConnector {
    /// Create a connector with default settings.
    pub fn new() -> Self {
        Self {
            default_port: DEFAULT_PORT,
            timeout: Duration::from_secs(30),
            inactivity_timeout: None,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            legacy_ciphers: false,
        }
    }

    /// Port used when a target address has none (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Set the connect/authenticate timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Drop idle connections after `timeout`.
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a specific known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Also offer `aes128-cbc`, after the default ciphers.
    pub fn legacy_ciphers(mut self, enabled: bool) -> Self {
        self.legacy_ciphers = enabled;
        self
    }

    /// Build the per-device config for `address`.
    pub fn config_for(&self, address: &str) -> Result<SshConfig, TransportError> {
        let mut config = SshConfig::from_address(address, self.default_port)?;
        config.timeout = self.timeout;
        config.inactivity_timeout = self.inactivity_timeout;
        config.host_key_verification = self.host_key_verification.clone();
        config.known_hosts_path = self.known_hosts_path.clone();
        config.legacy_ciphers = self.legacy_ciphers;
        Ok(config)
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for SshConnector {
    type Transport = SshTransport;

    async fn connect(
        &self,
        address: &str,
        credentials: &Credentials,
    ) -> Result<SshTransport, TransportError> {
        let config = self.config_for(address)?;
        SshTransport::connect(config, credentials).await
    }
}

/// An authenticated SSH connection with an interactive shell channel.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// Shell channel with a PTY.
    channel: Channel<Msg>,
}

impl SshTransport {
    /// Connect, authenticate and start a shell.
    ///
    /// Any failure along the way aborts the whole sequence.
    pub async fn connect(
        config: SshConfig,
        credentials: &Credentials,
    ) -> Result<Self, TransportError> {
        let ssh_config = Arc::new(Self::client_config(&config));

        let refusal = Arc::new(Mutex::new(None));
        let handler = SshHandler::new(&config, refusal.clone());

        debug!("connecting to {}", config.socket_addr());

        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            if let Some(refused) = refusal.lock().ok().and_then(|mut slot| slot.take()) {
                return refused;
            }
            match e {
                russh::Error::IO(source) => TransportError::ConnectionFailed {
                    host: config.host.clone(),
                    port: config.port,
                    source,
                },
                other => TransportError::Ssh(other),
            }
        })?;

        tokio::time::timeout(config.timeout, Self::authenticate(&mut session, credentials))
            .await
            .map_err(|_| TransportError::Timeout(config.timeout))??;

        let channel = Self::open_shell(&session, &config).await?;

        debug!("shell ready on {}", config.socket_addr());
        Ok(Self { session, channel })
    }

    /// russh client settings for `config`.
    fn client_config(config: &SshConfig) -> client::Config {
        let mut preferred = Preferred::default();
        if config.legacy_ciphers {
            let mut ciphers = preferred.cipher.to_vec();
            ciphers.push(cipher::AES_128_CBC);
            preferred.cipher = ciphers.into();
        }

        client::Config {
            inactivity_timeout: config.inactivity_timeout,
            preferred,
            ..Default::default()
        }
    }

    /// Open a session channel, request a PTY and start the shell.
    async fn open_shell(
        session: &Handle<SshHandler>,
        config: &SshConfig,
    ) -> Result<Channel<Msg>, TransportError> {
        let channel = session.channel_open_session().await?;

        channel
            .request_pty(
                true,
                &config.terminal_type,
                config.terminal_width,
                config.terminal_height,
                0,
                0,
                &[
                    (Pty::ECHO, 0),
                    (Pty::TTY_OP_ISPEED, TTY_SPEED),
                    (Pty::TTY_OP_OSPEED, TTY_SPEED),
                ],
            )
            .await?;

        channel.request_shell(true).await?;

        Ok(channel)
    }

    /// Authenticate with the password, falling back to keyboard-interactive.
    ///
    /// Many network operating systems only offer keyboard-interactive, where
    /// every prompt is answered with the password.
    async fn authenticate(
        session: &mut Handle<SshHandler>,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        let user = credentials.username.as_str();
        let password = credentials.password.expose_secret();

        if session.authenticate_password(user, password).await?.success() {
            return Ok(());
        }

        debug!("password auth rejected for '{}', trying keyboard-interactive", user);

        let mut response = session
            .authenticate_keyboard_interactive_start(user, None::<String>)
            .await?;

        for _ in 0..MAX_KBD_INTERACTIVE_ROUNDS {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(()),
                KeyboardInteractiveAuthResponse::Failure { .. } => break,
                KeyboardInteractiveAuthResponse::InfoRequest { ref prompts, .. } => {
                    let answers = prompts.iter().map(|_| password.to_string()).collect();
                    response = session
                        .authenticate_keyboard_interactive_respond(answers)
                        .await?;
                }
            }
        }

        Err(TransportError::AuthenticationFailed {
            user: user.to_string(),
        })
    }
}

impl Transport for SshTransport {
    type Reader = ReadHalf<ChannelStream<Msg>>;
    type Writer = WriteHalf<ChannelStream<Msg>>;
    type Handle = SshHandle;

    fn into_split(self) -> (Self::Reader, Self::Writer, Self::Handle) {
        let (reader, writer) = tokio::io::split(self.channel.into_stream());
        (
            reader,
            writer,
            SshHandle {
                session: self.session,
            },
        )
    }
}

/// Teardown handle for an SSH connection.
pub struct SshHandle {
    session: Handle<SshHandler>,
}

impl TransportHandle for SshHandle {
    async fn close(self) -> Result<(), TransportError> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await?;
        Ok(())
    }
}

/// Whether a server key is listed in known_hosts.
#[derive(Debug, PartialEq, Eq)]
enum KnownKey {
    Listed,
    Unlisted,
}

/// Answers russh's host key callback for one device.
struct SshHandler {
    host: String,
    port: u16,
    verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Why the key was refused, for connect() to report instead of
    /// russh's generic UnknownKey.
    refusal: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    fn new(config: &SshConfig, refusal: Arc<Mutex<Option<TransportError>>>) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            refusal,
        }
    }

    fn lookup(&self, key: &PublicKey) -> Result<KnownKey, TransportError> {
        let listed = match self.known_hosts_path {
            Some(ref path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        };

        match listed {
            Ok(true) => Ok(KnownKey::Listed),
            Ok(false) => Ok(KnownKey::Unlisted),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    fn remember(&self, key: &PublicKey) -> Result<(), TransportError> {
        let saved = match self.known_hosts_path {
            Some(ref path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, key, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, key),
        };
        saved.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    /// Decide whether `key` is acceptable for this device.
    fn verify(&self, key: &PublicKey) -> Result<(), TransportError> {
        match self.verification {
            HostKeyVerification::Disabled => Ok(()),
            HostKeyVerification::AcceptNew => {
                if self.lookup(key)? == KnownKey::Unlisted {
                    debug!("{}:{}: learning host key", self.host, self.port);
                    // An unwritable known_hosts does not block the backup
                    if let Err(e) = self.remember(key) {
                        warn!("{}:{}: {}", self.host, self.port, e);
                    }
                }
                Ok(())
            }
            HostKeyVerification::Strict => match self.lookup(key)? {
                KnownKey::Listed => Ok(()),
                KnownKey::Unlisted => Err(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                }),
            },
        }
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match self.verify(server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("{}:{}: refusing host key: {}", self.host, self.port, e);
                if let Ok(mut slot) = self.refusal.lock() {
                    *slot = Some(e);
                }
                Ok(false)
            }
        }
    }
}
