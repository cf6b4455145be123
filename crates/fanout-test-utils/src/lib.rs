//! Shared test utilities for fanout integration tests.
//!
//! Provides a [`ScriptedConnector`] that plays back per-host behaviour
//! without touching the network, a [`SharedBuffer`] writer for asserting on
//! sink output, and small fixture helpers.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use fanout_core::frame::{ConnectionError, ExecutionError};
use fanout_core::host::HostDescriptor;
use fanout_core::transport::{CommandOutput, Connector, RemoteSession};

/// What a scripted host does when the Runner reaches it.
#[derive(Debug, Clone)]
pub enum HostBehavior {
    /// Execute successfully, producing `output`.
    Succeed { output: Vec<u8> },
    /// Execute, produce `output`, then exit with `code`.
    ExitNonZero { output: Vec<u8>, code: u32 },
    /// Fail at connect time.
    Unreachable { message: String },
    /// Connect, then reject the password.
    RejectPassword,
    /// Connect and authenticate, then fail to open the session channel.
    ChannelRefused,
    /// Panic inside `execute`.
    Panic { message: String },
}

impl HostBehavior {
    pub fn succeed(output: impl Into<Vec<u8>>) -> Self {
        Self::Succeed {
            output: output.into(),
        }
    }

    pub fn exit_non_zero(output: impl Into<Vec<u8>>, code: u32) -> Self {
        Self::ExitNonZero {
            output: output.into(),
            code,
        }
    }

    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct HostScript {
    behavior: HostBehavior,
    delay: Duration,
}

/// Counters shared between a [`ScriptedConnector`] and its sessions.
#[derive(Debug, Default)]
pub struct Probe {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    connects: AtomicUsize,
    closes: AtomicUsize,
    executed_payloads: Mutex<Vec<(String, String)>>,
}

impl Probe {
    /// Highest number of hosts that were between connect and close at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// `(host label, payload)` for every executed payload, in call order.
    pub fn executed_payloads(&self) -> Vec<(String, String)> {
        self.executed_payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// A [`Connector`] whose hosts follow a script keyed by `user@host`.
///
/// Hosts without a script succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: HashMap<String, HostScript>,
    probe: Arc<Probe>,
    credential: Option<String>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script `label` (`user@host`) with `behavior` and no delay.
    pub fn host(self, label: &str, behavior: HostBehavior) -> Self {
        self.host_with_delay(label, behavior, Duration::ZERO)
    }

    /// Script `label` with `behavior`, sleeping `delay` inside `execute`
    /// (or inside `connect` for unreachable hosts).
    pub fn host_with_delay(mut self, label: &str, behavior: HostBehavior, delay: Duration) -> Self {
        self.scripts
            .insert(label.to_owned(), HostScript { behavior, delay });
        self
    }

    /// Only accept this password; any other is rejected at authentication.
    pub fn expect_credential(mut self, credential: &str) -> Self {
        self.credential = Some(credential.to_owned());
        self
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(
        &self,
        target: &HostDescriptor,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        let script = self
            .scripts
            .get(target.address())
            .cloned()
            .unwrap_or(HostScript {
                behavior: HostBehavior::succeed(Vec::new()),
                delay: Duration::ZERO,
            });

        if let HostBehavior::Unreachable { message } = &script.behavior {
            tokio::time::sleep(script.delay).await;
            return Err(ConnectionError::new(message.clone()));
        }

        self.probe.enter();
        Ok(Box::new(ScriptedSession {
            label: target.address().to_owned(),
            script,
            probe: Arc::clone(&self.probe),
            expected_credential: self.credential.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    label: String,
    script: HostScript,
    probe: Arc<Probe>,
    expected_credential: Option<String>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn authenticate(
        &mut self,
        _username: &str,
        credential: &str,
    ) -> Result<(), ConnectionError> {
        let wrong_password = self
            .expected_credential
            .as_deref()
            .is_some_and(|expected| expected != credential);
        if wrong_password || matches!(self.script.behavior, HostBehavior::RejectPassword) {
            return Err(ConnectionError::new("password authentication rejected"));
        }
        Ok(())
    }

    async fn open_channel(&mut self) -> Result<(), ConnectionError> {
        if matches!(self.script.behavior, HostBehavior::ChannelRefused) {
            return Err(ConnectionError::new("failed to open session: channel refused"));
        }
        Ok(())
    }

    async fn execute(&mut self, payload: &str) -> CommandOutput {
        self.probe
            .executed_payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((self.label.clone(), payload.to_owned()));

        tokio::time::sleep(self.script.delay).await;

        match &self.script.behavior {
            HostBehavior::Succeed { output } => CommandOutput::success(output.clone()),
            HostBehavior::ExitNonZero { output, code } => {
                CommandOutput::failed(output.clone(), ExecutionError::NonZeroExit { code: *code })
            }
            HostBehavior::Panic { message } => panic!("{message}"),
            HostBehavior::Unreachable { .. }
            | HostBehavior::RejectPassword
            | HostBehavior::ChannelRefused => {
                unreachable!("execute reached for a host scripted to fail earlier")
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.probe.leave();
        }
    }
}

/// A cloneable in-memory writer; every clone appends to the same bytes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Split sink output into `(host label, body)` pairs, one per frame.
///
/// Lines before the first frame header (e.g. the run banner) are ignored.
pub fn split_frames(text: &str) -> Vec<(String, String)> {
    text.split("\n====== [")
        .skip(1)
        .filter_map(|block| {
            let (label, body) = block.split_once("] ======\n")?;
            Some((label.to_owned(), body.to_owned()))
        })
        .collect()
}

/// Write `contents` to `dir/name` and return the path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("failed to write fixture file");
    path
}
