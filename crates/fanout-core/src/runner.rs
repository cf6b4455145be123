//! Remote Session Runner: one host's connect-to-close lifecycle.
//!
//! The Runner walks a single host through the state graph
//!
//! ```text
//! disconnected -> connected -> authenticated -> session_open -> executed -> closed
//! ```
//!
//! and turns the outcome into exactly one [`ResultFrame`]. Every state may
//! go straight to `closed`; once a connection exists it is released on every
//! exit path before the frame is returned. There are no retries.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use secrecy::{ExposeSecret, SecretString};

use crate::frame::ResultFrame;
use crate::host::HostDescriptor;
use crate::payload::Payload;
use crate::transport::Connector;

/// Lifecycle states of a single Runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Disconnected,
    Connected,
    Authenticated,
    SessionOpen,
    Executed,
    Closed,
}

impl RunnerState {
    /// Check whether `from -> to` is an edge of the Runner state graph.
    pub fn is_valid_transition(from: RunnerState, to: RunnerState) -> bool {
        use RunnerState::*;
        matches!(
            (from, to),
            (Disconnected, Connected)
                | (Connected, Authenticated)
                | (Authenticated, SessionOpen)
                | (SessionOpen, Executed)
        ) || (to == Closed && from != Closed)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunnerState::Disconnected => "disconnected",
            RunnerState::Connected => "connected",
            RunnerState::Authenticated => "authenticated",
            RunnerState::SessionOpen => "session_open",
            RunnerState::Executed => "executed",
            RunnerState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Read-only input to one Runner.
///
/// Payload and credential are shared handles; no Runner can mutate them.
#[derive(Clone)]
pub struct ExecutionRequest {
    pub descriptor: HostDescriptor,
    pub payload: Payload,
    pub credential: Arc<SecretString>,
}

impl fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("descriptor", &self.descriptor)
            .field("payload", &self.payload)
            .field("credential", &"[REDACTED]")
            .finish()
    }
}

/// Tracks and logs the state of one Runner.
struct Lifecycle<'a> {
    host: &'a str,
    state: RunnerState,
}

impl<'a> Lifecycle<'a> {
    fn new(host: &'a str) -> Self {
        Self {
            host,
            state: RunnerState::Disconnected,
        }
    }

    fn advance(&mut self, to: RunnerState) {
        debug_assert!(
            RunnerState::is_valid_transition(self.state, to),
            "invalid runner transition {} -> {}",
            self.state,
            to
        );
        tracing::debug!(host = %self.host, from = %self.state, to = %to, "runner transition");
        self.state = to;
    }
}

/// Runs the payload on a single host through a [`Connector`].
#[derive(Clone)]
pub struct SessionRunner {
    connector: Arc<dyn Connector>,
}

impl SessionRunner {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Run the full lifecycle for one host and produce its frame.
    ///
    /// A connect, authenticate or channel-open failure yields a frame with
    /// `connection_error` set and empty output; the payload is never sent.
    /// A failed execution yields whatever output was captured plus
    /// `execution_error`.
    pub async fn run(&self, request: &ExecutionRequest) -> ResultFrame {
        let started = Instant::now();
        let label = request.descriptor.address();
        let mut lifecycle = Lifecycle::new(label);

        let mut session = match self.connector.connect(&request.descriptor).await {
            Ok(session) => session,
            Err(e) => {
                lifecycle.advance(RunnerState::Closed);
                return ResultFrame::connection_failed(label, e, started.elapsed());
            }
        };
        lifecycle.advance(RunnerState::Connected);

        let frame = 'lifecycle: {
            if let Err(e) = session
                .authenticate(
                    request.descriptor.username(),
                    request.credential.expose_secret(),
                )
                .await
            {
                break 'lifecycle ResultFrame::connection_failed(label, e, started.elapsed());
            }
            lifecycle.advance(RunnerState::Authenticated);

            if let Err(e) = session.open_channel().await {
                break 'lifecycle ResultFrame::connection_failed(label, e, started.elapsed());
            }
            lifecycle.advance(RunnerState::SessionOpen);

            let outcome = session.execute(request.payload.as_str()).await;
            lifecycle.advance(RunnerState::Executed);
            ResultFrame::executed(label, outcome.output, outcome.error, started.elapsed())
        };

        session.close().await;
        lifecycle.advance(RunnerState::Closed);
        frame
    }
}

impl fmt::Debug for SessionRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRunner")
            .field("connector", &self.connector.name())
            .finish()
    }
}
