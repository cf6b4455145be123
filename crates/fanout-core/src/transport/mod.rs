//! Remote-shell transport seam.
//!
//! The Runner drives a host through its lifecycle using two object-safe
//! traits: a [`Connector`] opens a raw connection, and the returned
//! [`RemoteSession`] authenticates, opens a command channel, executes the
//! payload and releases everything on [`RemoteSession::close`].
//!
//! ```text
//! Connector::connect ──> Box<dyn RemoteSession>
//!                             authenticate(user, credential)
//!                             open_channel()
//!                             execute(payload) ──> CommandOutput
//!                             close()
//! ```
//!
//! [`SshConnector`] is the production implementation over `russh`.

pub mod ssh;

use async_trait::async_trait;

use crate::frame::{ConnectionError, ExecutionError};
use crate::host::HostDescriptor;

pub use ssh::SshConnector;

/// Captured result of executing the payload on one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Combined stdout and stderr, in arrival order.
    pub output: Vec<u8>,
    /// Set when the command exited nonzero or the channel faulted.
    pub error: Option<ExecutionError>,
}

impl CommandOutput {
    pub fn success(output: impl Into<Vec<u8>>) -> Self {
        Self {
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(output: impl Into<Vec<u8>>, error: ExecutionError) -> Self {
        Self {
            output: output.into(),
            error: Some(error),
        }
    }
}

/// Opens network connections to hosts.
///
/// Shared by every Runner of a run, so implementations must be `Send +
/// Sync` and keep no per-host state.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Short name used in logs (e.g. "ssh").
    fn name(&self) -> &str;

    /// Establish an unauthenticated connection to `target`.
    async fn connect(
        &self,
        target: &HostDescriptor,
    ) -> Result<Box<dyn RemoteSession>, ConnectionError>;
}

/// One host's connection, exclusively owned by a single Runner.
#[async_trait]
pub trait RemoteSession: Send {
    /// Authenticate with a password credential.
    async fn authenticate(&mut self, username: &str, credential: &str)
    -> Result<(), ConnectionError>;

    /// Open the command channel the payload will run on.
    async fn open_channel(&mut self) -> Result<(), ConnectionError>;

    /// Execute `payload` and capture its combined output. Never fails:
    /// faults are reported through [`CommandOutput::error`].
    async fn execute(&mut self, payload: &str) -> CommandOutput;

    /// Release the channel and the connection. Must be safe to call in any
    /// state, including right after a failed `authenticate`.
    async fn close(&mut self);
}

// Compile-time assertion: both traits must stay usable as trait objects.
const _: () = {
    fn _assert_object_safe(_: &dyn Connector, _: &dyn RemoteSession) {}
};
