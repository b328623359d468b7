//! Background reader that owns the transport's read half.
//!
//! The pump reads only when asked: each [`Demand`] produces at most one
//! [`Chunk`]. Demands and chunks carry the sequence number of the expect
//! call that posted them, so a chunk read for a call that already timed
//! out can be recognised and dropped by the next call.
//!
//! Channels:
//! - demand (capacity 1): session -> pump, one read request
//! - chunks (capacity 2): pump -> session, read results in arrival order
//! - cancel (watch): highest cancelled sequence number
//! - shutdown (oneshot): stop the task; dropping the sender also stops it

use std::io;

use bytes::{Bytes, BytesMut};
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::SessionError;

/// Default size of a single read, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// A request for one read.
#[derive(Debug)]
pub(crate) struct Demand {
    pub seq: u64,
}

/// One read result.
#[derive(Debug)]
pub(crate) struct Chunk {
    pub seq: u64,
    pub data: io::Result<Bytes>,
}

enum ReadOutcome {
    Done(io::Result<Bytes>),
    Cancelled,
    Shutdown,
}

/// Session-side ends of the pump channels.
pub(crate) struct PumpHandle {
    demands: mpsc::Sender<Demand>,
    chunks: mpsc::Receiver<Chunk>,
    cancel: watch::Sender<u64>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl PumpHandle {
    /// Spawn a pump task reading from `reader`.
    pub fn spawn<R>(reader: R, chunk_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (demand_tx, demand_rx) = mpsc::channel(1);
        let (chunk_tx, chunk_rx) = mpsc::channel(2);
        let (cancel_tx, cancel_rx) = watch::channel(0);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let pump = ReadPump {
            reader,
            chunk_size: chunk_size.max(1),
            demands: demand_rx,
            chunks: chunk_tx,
            cancel: cancel_rx,
            shutdown: shutdown_rx,
        };

        Self {
            demands: demand_tx,
            chunks: chunk_rx,
            cancel: cancel_tx,
            shutdown: Some(shutdown_tx),
            task: Some(tokio::spawn(pump.run())),
        }
    }

    /// Ask the pump for one more read on behalf of call `seq`.
    pub async fn demand(&self, seq: u64) -> Result<(), SessionError> {
        self.demands
            .send(Demand { seq })
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Wait for the next published chunk. `None` once the pump has exited.
    pub async fn recv(&mut self) -> Option<Chunk> {
        self.chunks.recv().await
    }

    /// Drop chunks left over from earlier calls.
    ///
    /// A leftover read error is returned: the pump has already stopped.
    pub fn discard_stale(&mut self) -> Result<(), SessionError> {
        while let Ok(chunk) = self.chunks.try_recv() {
            match chunk.data {
                Ok(data) => trace!(
                    "discarding stale chunk from call {} ({} bytes)",
                    chunk.seq,
                    data.len()
                ),
                Err(e) => return Err(SessionError::Read(e)),
            }
        }
        Ok(())
    }

    /// Abandon any read still in flight for call `seq`.
    pub fn cancel(&self, seq: u64) {
        self.cancel.send_replace(seq);
    }

    /// Stop the task and wait for it to exit. Safe to call repeatedly and
    /// after the task has already exited on its own.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.chunks.close();

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("read pump task failed: {}", e);
            }
        }
    }
}

/// The task side: owns the reader.
struct ReadPump<R> {
    reader: R,
    chunk_size: usize,
    demands: mpsc::Receiver<Demand>,
    chunks: mpsc::Sender<Chunk>,
    cancel: watch::Receiver<u64>,
    shutdown: oneshot::Receiver<()>,
}

impl<R: AsyncRead + Unpin + Send + 'static> ReadPump<R> {
    async fn run(mut self) {
        loop {
            let demand = tokio::select! {
                biased;
                _ = &mut self.shutdown => break,
                demand = self.demands.recv() => match demand {
                    Some(demand) => demand,
                    None => break,
                },
            };

            if *self.cancel.borrow_and_update() >= demand.seq {
                trace!("read pump: demand for call {} already cancelled", demand.seq);
                continue;
            }

            let data = match self.read_for(demand.seq).await {
                ReadOutcome::Done(data) => data,
                ReadOutcome::Cancelled => {
                    trace!("read pump: read for call {} cancelled", demand.seq);
                    continue;
                }
                ReadOutcome::Shutdown => break,
            };

            let failed = match data {
                Err(ref e) => {
                    debug!("read pump: read failed: {}", e);
                    true
                }
                Ok(_) => false,
            };

            if !self.publish(Chunk { seq: demand.seq, data }).await || failed {
                break;
            }
        }

        debug!("read pump stopped");
    }

    /// One bounded read, abandoned on cancel or shutdown. Reads are
    /// cancel-safe, so an abandoned read leaves its bytes in the stream.
    async fn read_for(&mut self, seq: u64) -> ReadOutcome {
        let mut buf = BytesMut::with_capacity(self.chunk_size);

        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return ReadOutcome::Shutdown,
                changed = self.cancel.changed() => {
                    if changed.is_err() {
                        return ReadOutcome::Shutdown;
                    }
                    if *self.cancel.borrow_and_update() >= seq {
                        return ReadOutcome::Cancelled;
                    }
                }
                result = self.reader.read_buf(&mut buf) => {
                    return ReadOutcome::Done(match result {
                        Ok(0) => Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "remote shell closed the stream",
                        )),
                        Ok(n) => {
                            trace!("read pump: {} bytes for call {}", n, seq);
                            Ok(buf.freeze())
                        }
                        Err(e) => Err(e),
                    });
                }
            }
        }
    }

    async fn publish(&mut self, chunk: Chunk) -> bool {
        tokio::select! {
            biased;
            _ = &mut self.shutdown => false,
            sent = self.chunks.send(chunk) => sent.is_ok(),
        }
    }
}
