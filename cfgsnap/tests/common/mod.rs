//! In-memory devices for driving sessions without a network.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

use cfgsnap::error::{TransportError, UploadError};
use cfgsnap::transport::{Connector, Credentials, Transport, TransportHandle};
use cfgsnap::upload::Uploader;

/// What the device does when a trigger shows up in its input.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Write the text at once.
    Text(String),
    /// Write each part after waiting `gap`.
    Trickle(Vec<String>, Duration),
    /// Drop the connection.
    Hangup,
}

#[derive(Debug, Clone)]
struct Rule {
    trigger: String,
    reply: Reply,
}

/// A scripted peer: emits startup output, then answers triggers in order.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    startup: Vec<(Duration, String)>,
    rules: Vec<Rule>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output written as soon as the shell opens.
    pub fn banner(self, text: &str) -> Self {
        self.emit_after(Duration::ZERO, text)
    }

    /// Output written `delay` after the previous startup output.
    pub fn emit_after(mut self, delay: Duration, text: &str) -> Self {
        self.startup.push((delay, text.to_string()));
        self
    }

    /// Reply with `text` once `trigger` has been received.
    pub fn on(self, trigger: &str, text: &str) -> Self {
        self.rule(trigger, Reply::Text(text.to_string()))
    }

    /// Reply with `parts`, one every `gap`, once `trigger` has been received.
    pub fn on_trickle(self, trigger: &str, parts: &[&str], gap: Duration) -> Self {
        self.rule(
            trigger,
            Reply::Trickle(parts.iter().map(|p| p.to_string()).collect(), gap),
        )
    }

    /// Hang up once `trigger` has been received.
    pub fn on_hangup(self, trigger: &str) -> Self {
        self.rule(trigger, Reply::Hangup)
    }

    fn rule(mut self, trigger: &str, reply: Reply) -> Self {
        self.rules.push(Rule {
            trigger: trigger.to_string(),
            reply,
        });
        self
    }

    /// Start the device task and return the session side of the link.
    pub fn spawn(self) -> (MemoryTransport, DeviceProbe) {
        let (local, remote) = tokio::io::duplex(64 * 1024);
        let probe = DeviceProbe::default();
        tokio::spawn(self.run(remote, probe.received.clone()));
        (
            MemoryTransport {
                stream: local,
                closes: probe.closes.clone(),
            },
            probe,
        )
    }

    async fn run(self, mut io: DuplexStream, received: Arc<Mutex<Vec<u8>>>) {
        for (delay, text) in &self.startup {
            if !delay.is_zero() {
                tokio::time::sleep(*delay).await;
            }
            if io.write_all(text.as_bytes()).await.is_err() {
                return;
            }
        }

        let mut rules: VecDeque<Rule> = self.rules.into_iter().collect();
        let mut pending = Vec::new();
        let mut buf = [0u8; 1024];

        loop {
            let n = match io.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            received.lock().unwrap().extend_from_slice(&buf[..n]);
            pending.extend_from_slice(&buf[..n]);

            while let Some(pos) = rules
                .front()
                .and_then(|rule| find(&pending, rule.trigger.as_bytes()))
            {
                let rule = rules.pop_front().unwrap();
                pending.drain(..pos + rule.trigger.len());

                match rule.reply {
                    Reply::Text(text) => {
                        if io.write_all(text.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Reply::Trickle(parts, gap) => {
                        for part in parts {
                            tokio::time::sleep(gap).await;
                            if io.write_all(part.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                    Reply::Hangup => return,
                }
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Observes a running fake device.
#[derive(Debug, Clone, Default)]
pub struct DeviceProbe {
    received: Arc<Mutex<Vec<u8>>>,
    closes: Arc<AtomicUsize>,
}

impl DeviceProbe {
    /// Everything the session wrote to the device.
    pub fn received(&self) -> String {
        String::from_utf8_lossy(&self.received.lock().unwrap()).into_owned()
    }

    /// How many times the transport was torn down.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Session side of an in-memory link.
pub struct MemoryTransport {
    stream: DuplexStream,
    closes: Arc<AtomicUsize>,
}

impl Transport for MemoryTransport {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;
    type Handle = MemoryHandle;

    fn into_split(self) -> (Self::Reader, Self::Writer, Self::Handle) {
        let (reader, writer) = tokio::io::split(self.stream);
        (
            reader,
            writer,
            MemoryHandle {
                closes: self.closes,
            },
        )
    }
}

pub struct MemoryHandle {
    closes: Arc<AtomicUsize>,
}

impl TransportHandle for MemoryHandle {
    async fn close(self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Connects addresses to fake devices; unknown addresses refuse.
#[derive(Default)]
pub struct MemoryConnector {
    devices: HashMap<String, FakeDevice>,
    connects: Mutex<Vec<String>>,
    probes: Mutex<Vec<DeviceProbe>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, address: &str, device: FakeDevice) -> Self {
        self.devices.insert(address.to_string(), device);
        self
    }

    /// Addresses dialed so far, in order.
    pub fn connects(&self) -> Vec<String> {
        self.connects.lock().unwrap().clone()
    }

    /// Total transport teardowns across all sessions.
    pub fn close_count(&self) -> usize {
        self.probes.lock().unwrap().iter().map(|p| p.close_count()).sum()
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(
        &self,
        address: &str,
        _credentials: &Credentials,
    ) -> Result<MemoryTransport, TransportError> {
        self.connects.lock().unwrap().push(address.to_string());

        let device = self
            .devices
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::ConnectionFailed {
                host: address.to_string(),
                port: 22,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            })?;

        let (transport, probe) = device.spawn();
        self.probes.lock().unwrap().push(probe);
        Ok(transport)
    }
}

/// Records uploads; filenames in `failing` are rejected.
#[derive(Default)]
pub struct RecordingUploader {
    uploads: Mutex<Vec<(String, PathBuf)>>,
    failing: Vec<String>,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, filename: &str) -> Self {
        self.failing.push(filename.to_string());
        self
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn uploads(&self) -> Vec<(String, PathBuf)> {
        self.uploads.lock().unwrap().clone()
    }
}

impl Uploader for RecordingUploader {
    async fn upload(&self, filename: &str, local_dir: &Path) -> Result<(), UploadError> {
        if self.failing.iter().any(|f| f == filename) {
            return Err(UploadError::NotConfigured);
        }
        self.uploads
            .lock()
            .unwrap()
            .push((filename.to_string(), local_dir.to_path_buf()));
        Ok(())
    }
}
