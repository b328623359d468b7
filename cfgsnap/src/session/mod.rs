//! Interactive shell sessions with send/expect.
//!
//! A [`Session`] owns one transport: the write half directly, the read half
//! through a background read pump, and the teardown handle until
//! [`Session::close`]. Methods take `&mut self`, so a session has at most
//! one send or expect in progress.
//!
//! # Timeout policy
//!
//! The timeout given to [`Session::expect`] is a total budget for the call.
//! Output that arrives without completing the match does not extend it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cfgsnap::session::Session;
//! use cfgsnap::transport::{Credentials, SshConnector};
//!
//! # async fn example() -> Result<(), cfgsnap::Error> {
//! let connector = SshConnector::new();
//! let credentials = Credentials::new("backup", "secret");
//! let mut session = Session::open(&connector, "10.0.0.1", &credentials).await?;
//!
//! session.expect(">", Duration::from_secs(5)).await?;
//! session.send_line("enable").await?;
//! session.expect("Password:", Duration::from_secs(5)).await?;
//!
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod pump;

use std::future::Future;
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

pub use buffer::ExpectBuffer;
pub use pump::DEFAULT_CHUNK_SIZE;

use crate::error::{SessionError, TransportError};
use crate::transport::{Connector, Credentials, Transport, TransportHandle};
use pump::PumpHandle;

/// How much trailing output to include in timeout logs.
const TIMEOUT_LOG_TAIL: usize = 200;

/// Something that can run send/expect steps.
///
/// Implemented by [`Session`]; the script runner is written against this
/// trait so it can be driven by any shell-like peer.
pub trait Shell: Send {
    /// Write `text` verbatim.
    fn send(&mut self, text: &str) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Wait until `needle` shows up in the output or `timeout` elapses.
    fn expect(
        &mut self,
        needle: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Shell is up and idle.
    ShellReady,
    /// A send is in progress.
    Sending,
    /// An expect is in progress.
    Awaiting,
    /// Closed; only `close()` is valid, and it does nothing.
    Closed,
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum bytes per read from the transport.
    pub chunk_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// An interactive shell on one device.
pub struct Session<T: Transport> {
    /// Device address, for logs.
    address: String,

    /// Write half of the shell.
    writer: T::Writer,

    /// Channels to the read pump.
    pump: PumpHandle,

    /// Teardown handle; taken exactly once by `close()`.
    handle: Option<T::Handle>,

    state: SessionState,

    /// Sequence number for the next expect call.
    next_seq: u64,
}

impl<T: Transport> Session<T> {
    /// Connect to `address` and start a session on the resulting shell.
    ///
    /// If dialing, authentication or shell setup fails, no session is
    /// created.
    pub async fn open<C>(
        connector: &C,
        address: &str,
        credentials: &Credentials,
    ) -> Result<Self, TransportError>
    where
        C: Connector<Transport = T>,
    {
        let transport = connector.connect(address, credentials).await?;
        Ok(Self::from_transport(address, transport))
    }

    /// Start a session on an already-open transport.
    ///
    /// Spawns the read pump, so this must run inside a tokio runtime.
    pub fn from_transport(address: impl Into<String>, transport: T) -> Self {
        Self::with_config(address, transport, SessionConfig::default())
    }

    /// Start a session with explicit tuning.
    pub fn with_config(address: impl Into<String>, transport: T, config: SessionConfig) -> Self {
        let (reader, writer, handle) = transport.into_split();
        let address = address.into();
        debug!("{}: session started", address);

        Self {
            address,
            writer,
            pump: PumpHandle::spawn(reader, config.chunk_size),
            handle: Some(handle),
            state: SessionState::ShellReady,
            next_seq: 1,
        }
    }

    /// Device address this session talks to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Write `text` verbatim. The caller supplies any line terminator.
    ///
    /// Success only means the local write completed.
    pub async fn send(&mut self, text: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.state = SessionState::Sending;

        let result = match self.writer.write_all(text.as_bytes()).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };

        self.state = SessionState::ShellReady;
        trace!("{}: sent {} bytes", self.address, text.len());
        result.map_err(SessionError::Write)
    }

    /// Write `text` followed by a newline.
    pub async fn send_line(&mut self, text: &str) -> Result<(), SessionError> {
        self.send(&format!("{}\n", text)).await
    }

    /// Wait until the output received since this call began contains
    /// `needle`, or fail once `timeout` has elapsed.
    ///
    /// Output after the match is discarded; the next call starts from an
    /// empty buffer. A read error stops the read pump and is fatal to the
    /// session.
    pub async fn expect(&mut self, needle: &str, timeout: Duration) -> Result<(), SessionError> {
        self.ensure_open()?;
        if needle.is_empty() {
            return Ok(());
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let deadline = Instant::now() + timeout;

        self.pump.discard_stale()?;
        self.state = SessionState::Awaiting;

        let mut buffer = ExpectBuffer::new(needle.as_bytes());
        let outcome =
            tokio::time::timeout_at(deadline, Self::fill_until_match(&mut self.pump, seq, &mut buffer))
                .await;

        self.state = SessionState::ShellReady;

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    "{}: matched {:?} after {} bytes",
                    self.address,
                    needle,
                    buffer.consumed().len()
                );
                Ok(())
            }
            Ok(Err(e)) => {
                debug!("{}: expect {:?} failed: {}", self.address, needle, e);
                Err(e)
            }
            Err(_) => {
                self.pump.cancel(seq);
                let text = buffer.as_str_lossy();
                let tail_start = text
                    .char_indices()
                    .rev()
                    .nth(TIMEOUT_LOG_TAIL)
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                debug!(
                    "{}: timed out waiting for {:?}; last output: {:?}",
                    self.address,
                    needle,
                    &text[tail_start..]
                );
                Err(SessionError::Timeout {
                    needle: needle.to_string(),
                    after: timeout,
                })
            }
        }
    }

    /// Post demand and accumulate chunks for call `seq` until the buffer
    /// matches. Chunks from earlier calls are dropped.
    async fn fill_until_match(
        pump: &mut PumpHandle,
        seq: u64,
        buffer: &mut ExpectBuffer,
    ) -> Result<(), SessionError> {
        pump.demand(seq).await?;

        loop {
            let chunk = pump.recv().await.ok_or(SessionError::Closed)?;
            let data = chunk.data.map_err(SessionError::Read)?;

            if chunk.seq != seq {
                trace!("dropping {} bytes read for call {}", data.len(), chunk.seq);
                continue;
            }

            if buffer.push(&data) {
                return Ok(());
            }

            pump.demand(seq).await?;
        }
    }

    /// Stop the read pump and release the transport.
    ///
    /// Safe to call more than once and after a failed send or expect; only
    /// the first call does anything.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        self.pump.shutdown().await;

        if let Err(e) = self.writer.shutdown().await {
            trace!("{}: write half shutdown: {}", self.address, e);
        }

        if let Some(handle) = self.handle.take() {
            handle.close().await?;
        }

        debug!("{}: session closed", self.address);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        Ok(())
    }
}

impl<T: Transport> Shell for Session<T> {
    fn send(&mut self, text: &str) -> impl Future<Output = Result<(), SessionError>> + Send {
        Session::send(self, text)
    }

    fn expect(
        &mut self,
        needle: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), SessionError>> + Send {
        Session::expect(self, needle, timeout)
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        if self.state != SessionState::Closed {
            warn!("session to {} dropped without close()", self.address);
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    struct DuplexTransport(DuplexStream);

    struct NoopHandle;

    impl TransportHandle for NoopHandle {
        async fn close(self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    impl Transport for DuplexTransport {
        type Reader = ReadHalf<DuplexStream>;
        type Writer = WriteHalf<DuplexStream>;
        type Handle = NoopHandle;

        fn into_split(self) -> (Self::Reader, Self::Writer, Self::Handle) {
            let (reader, writer) = tokio::io::split(self.0);
            (reader, writer, NoopHandle)
        }
    }

    /// Leaves a read for call 1 in flight, as if call 1 had timed out just
    /// as its read completed.
    async fn session_with_orphaned_read() -> (Session<DuplexTransport>, DuplexStream) {
        let (device, local) = tokio::io::duplex(1024);
        let mut session = Session::from_transport("router1", DuplexTransport(local));

        session.pump.demand(1).await.unwrap();
        session.next_seq = 2;
        (session, device)
    }

    #[tokio::test]
    async fn test_late_chunk_from_earlier_call_is_dropped() {
        let (mut session, mut device) = session_with_orphaned_read().await;

        // Published for call 1 only after call 2 has discarded stale chunks
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            device.write_all(b"router#").await.unwrap();
            device
        });

        let err = assert_err!(session.expect("#", Duration::from_millis(300)).await);
        assert!(matches!(err, SessionError::Timeout { .. }));

        let _device = writer.await.unwrap();
        assert_ok!(session.close().await);
    }

    #[tokio::test]
    async fn test_current_call_matches_after_late_chunk() {
        let (mut session, mut device) = session_with_orphaned_read().await;

        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            device.write_all(b"stale#").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            device.write_all(b"fresh#").await.unwrap();
            device
        });

        assert_ok!(session.expect("fresh#", Duration::from_secs(2)).await);

        let _device = writer.await.unwrap();
        assert_ok!(session.close().await);
    }

    #[tokio::test]
    async fn test_custom_chunk_size_still_matches() {
        let (mut device, local) = tokio::io::duplex(1024);
        let config = SessionConfig { chunk_size: 3 };
        let mut session = Session::with_config("router1", DuplexTransport(local), config);

        device.write_all(b"Building configuration...\r\nrouter#").await.unwrap();
        assert_ok!(session.expect("router#", Duration::from_secs(2)).await);

        assert_ok!(session.close().await);
    }
}
