//! Per-host results and the two recoverable error kinds.
//!
//! A [`ResultFrame`] is produced exactly once per Runner and never changes
//! afterwards. Connection and execution faults are data inside the frame,
//! not `Err`s: they are reported under the host's header and do not affect
//! any other host.

use std::time::Duration;

use thiserror::Error;

/// Transport or authentication failure for one host.
///
/// Timeouts, refused connections, handshake errors and rejected passwords
/// all collapse into this single kind; `message` carries the detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("SSH connection error: {message}")]
pub struct ConnectionError {
    pub message: String,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The remote command did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Command execution error: process exited with status {code}")]
    NonZeroExit { code: u32 },

    #[error("Command execution error: process killed by signal {signal}")]
    Signal { signal: String },

    #[error("Command execution error: remote command exited without exit status or exit signal")]
    MissingExitStatus,

    #[error("Command execution error: channel fault: {0}")]
    Channel(String),

    #[error("Command execution error: runner panicked: {0}")]
    Panicked(String),
}

/// How a host's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    ConnectionFailed,
    ExecutionFailed,
}

/// One host's complete result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultFrame {
    host_label: String,
    output: Vec<u8>,
    connection_error: Option<ConnectionError>,
    execution_error: Option<ExecutionError>,
    elapsed: Duration,
}

impl ResultFrame {
    /// A host that never got as far as executing the payload. Output is
    /// always empty.
    pub fn connection_failed(
        host_label: impl Into<String>,
        error: ConnectionError,
        elapsed: Duration,
    ) -> Self {
        Self {
            host_label: host_label.into(),
            output: Vec::new(),
            connection_error: Some(error),
            execution_error: None,
            elapsed,
        }
    }

    /// A host that executed the payload, successfully or not.
    pub fn executed(
        host_label: impl Into<String>,
        output: Vec<u8>,
        execution_error: Option<ExecutionError>,
        elapsed: Duration,
    ) -> Self {
        Self {
            host_label: host_label.into(),
            output,
            connection_error: None,
            execution_error,
            elapsed,
        }
    }

    pub fn host_label(&self) -> &str {
        &self.host_label
    }

    /// Combined stdout/stderr in the order the remote side produced it.
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn connection_error(&self) -> Option<&ConnectionError> {
        self.connection_error.as_ref()
    }

    pub fn execution_error(&self) -> Option<&ExecutionError> {
        self.execution_error.as_ref()
    }

    /// Wall time from the start of the Runner to the end of its lifecycle.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn outcome(&self) -> Outcome {
        if self.connection_error.is_some() {
            Outcome::ConnectionFailed
        } else if self.execution_error.is_some() {
            Outcome::ExecutionFailed
        } else {
            Outcome::Succeeded
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == Outcome::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_frame_has_no_output() {
        let frame = ResultFrame::connection_failed(
            "alice@10.0.0.1",
            ConnectionError::new("connection refused"),
            Duration::from_millis(5),
        );
        assert!(frame.output().is_empty());
        assert!(frame.execution_error().is_none());
        assert_eq!(frame.outcome(), Outcome::ConnectionFailed);
        assert!(!frame.is_success());
    }

    #[test]
    fn executed_frame_with_error_keeps_output() {
        let frame = ResultFrame::executed(
            "bob@10.0.0.2",
            b"partial output\n".to_vec(),
            Some(ExecutionError::NonZeroExit { code: 2 }),
            Duration::ZERO,
        );
        assert_eq!(frame.output(), b"partial output\n");
        assert!(frame.connection_error().is_none());
        assert_eq!(frame.outcome(), Outcome::ExecutionFailed);
    }

    #[test]
    fn executed_frame_without_error_succeeds() {
        let frame = ResultFrame::executed("carol@web", b"ok".to_vec(), None, Duration::ZERO);
        assert!(frame.is_success());
        assert_eq!(frame.host_label(), "carol@web");
    }

    #[test]
    fn error_messages_name_the_failure_class() {
        let conn = ConnectionError::new("timed out after 10s");
        assert_eq!(conn.to_string(), "SSH connection error: timed out after 10s");

        let exec = ExecutionError::NonZeroExit { code: 127 };
        assert_eq!(
            exec.to_string(),
            "Command execution error: process exited with status 127"
        );
    }
}
