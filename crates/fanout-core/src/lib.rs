//! Concurrent remote execution across a fleet of SSH hosts.
//!
//! A run takes a [`Fleet`] of host descriptors, a command payload and a
//! password credential, opens one SSH session per host in parallel,
//! executes the payload everywhere and funnels every host's framed result
//! through a single [`OutputSink`].
//!
//! ```text
//! Fleet ──> Coordinator ──spawn──> SessionRunner (one per host)
//!                |                      |
//!                |                      v
//!                |               Connector / RemoteSession
//!                |                      |
//!                |<──── join ─── ResultFrame ──> FrameSink (console + log)
//! ```

pub mod coordinator;
pub mod frame;
pub mod host;
pub mod payload;
pub mod run;
pub mod runner;
pub mod settings;
pub mod sink;
pub mod transport;

pub use coordinator::{Coordinator, CoordinatorConfig, RunSummary};
pub use frame::{ConnectionError, ExecutionError, Outcome, ResultFrame};
pub use host::{Fleet, FleetError, HostDescriptor, MalformedHostLine};
pub use payload::{Payload, PayloadReadError};
pub use run::{PreflightError, PreparedRun};
pub use runner::{ExecutionRequest, RunnerState, SessionRunner};
pub use settings::Settings;
pub use sink::{FrameSink, LogOpenError, OutputSink, render_frame};
pub use transport::{CommandOutput, Connector, RemoteSession, SshConnector};
