//! Fatal preflight and the top-level run.
//!
//! [`PreparedRun::prepare`] loads the fleet, reads the payload and opens the
//! log. Any failure there aborts the run before a single host is contacted.
//! Once [`PreparedRun::execute`] starts, no host failure is fatal.

use std::io::Write;
use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use thiserror::Error;
use uuid::Uuid;

use crate::coordinator::{Coordinator, CoordinatorConfig, RunSummary};
use crate::host::{Fleet, FleetError};
use crate::payload::{Payload, PayloadReadError};
use crate::settings::Settings;
use crate::sink::{LogOpenError, OutputSink};
use crate::transport::Connector;

/// Errors that abort a run before any network activity.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error(transparent)]
    Payload(#[from] PayloadReadError),

    #[error(transparent)]
    LogOpen(#[from] LogOpenError),
}

/// Everything a run needs, validated and opened.
#[derive(Debug)]
pub struct PreparedRun {
    run_id: Uuid,
    fleet: Fleet,
    payload: Payload,
    credential: Arc<SecretString>,
    sink: Arc<OutputSink>,
    config: CoordinatorConfig,
}

impl PreparedRun {
    /// Prepare a run that writes frames to stdout and the log file.
    pub fn prepare(settings: &Settings) -> Result<Self, PreflightError> {
        Self::prepare_with_console(settings, std::io::stdout())
    }

    /// Prepare a run with an explicit console writer.
    ///
    /// The log file is only created once the fleet and payload are known to
    /// be valid, so a failed preflight leaves any previous log untouched.
    pub fn prepare_with_console(
        settings: &Settings,
        console: impl Write + Send + 'static,
    ) -> Result<Self, PreflightError> {
        let fleet = Fleet::load(&settings.fleet_file)?;
        let payload = Payload::load(&settings.payload_script)?;
        let sink = OutputSink::open_with_console(&settings.log_file, console)?;

        if fleet.is_empty() {
            tracing::warn!(
                fleet_file = %settings.fleet_file.display(),
                "hosts file lists no hosts"
            );
        }

        Ok(Self {
            run_id: Uuid::new_v4(),
            fleet,
            payload,
            credential: Arc::clone(&settings.credential),
            sink: Arc::new(sink),
            config: settings.coordinator_config(),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn fleet(&self) -> &Fleet {
        &self.fleet
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Run the payload on every host through `connector`.
    ///
    /// Writes a banner line, one frame per host as each completes, and a
    /// console-only completion notice naming the log file.
    pub async fn execute(self, connector: Arc<dyn Connector>) -> RunSummary {
        let started_at = Utc::now();
        tracing::info!(
            run_id = %self.run_id,
            hosts = self.fleet.len(),
            transport = connector.name(),
            payload_bytes = self.payload.len(),
            "starting run"
        );

        self.sink.announce(&format!(
            "# fanout run {} started {} ({} hosts)",
            self.run_id,
            started_at.to_rfc3339(),
            self.fleet.len()
        ));

        let coordinator = Coordinator::new(connector, self.sink.clone(), self.config.clone());
        let summary = coordinator
            .execute(&self.fleet, &self.payload, Arc::clone(&self.credential))
            .await;

        let log_location = self
            .sink
            .log_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        self.sink.notice(&format!(
            "\n✅ All tasks completed ({summary}). See: {log_location}"
        ));

        summary
    }
}
