//! `fanout run` command: execute the script on every host.

use std::sync::Arc;

use anyhow::{Context, Result};

use fanout_core::run::PreparedRun;
use fanout_core::transport::SshConnector;

use crate::config::{self, Overrides};

/// Resolve settings, run the fatal preflight, then fan out over SSH.
///
/// Any error returned here happened before a host was contacted. Per-host
/// failures are reported in the output and never turn into an `Err`.
pub async fn run_fleet(overrides: &Overrides) -> Result<()> {
    let settings = config::resolve(overrides).context("failed to load configuration")?;

    let run = PreparedRun::prepare(&settings).context("run aborted before contacting any host")?;

    let connector = Arc::new(SshConnector::new(settings.connect_timeout));
    let summary = run.execute(connector).await;

    tracing::info!(
        hosts = summary.len(),
        succeeded = summary.succeeded(),
        connection_failures = summary.connection_failures(),
        execution_failures = summary.execution_failures(),
        "run complete"
    );
    Ok(())
}
