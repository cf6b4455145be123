//! The pre-resolved settings object a run is built from.
//!
//! Loading and merging configuration sources happens in the binary; the
//! core only ever sees this fully resolved value.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::coordinator::CoordinatorConfig;
use crate::transport::ssh::DEFAULT_CONNECT_TIMEOUT;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Script whose text is executed on every host.
    pub payload_script: PathBuf,
    /// Password used for every host.
    pub credential: Arc<SecretString>,
    /// Fleet file, one `user@host[:port]` per line.
    pub fleet_file: PathBuf,
    /// Durable log, created or truncated at the start of the run.
    pub log_file: PathBuf,
    /// Bound on each host's connect phase.
    pub connect_timeout: Duration,
    /// Optional cap on concurrently running hosts.
    pub max_concurrency: Option<usize>,
}

impl Settings {
    /// Settings with the default timeout and no concurrency cap.
    pub fn new(
        payload_script: impl Into<PathBuf>,
        credential: SecretString,
        fleet_file: impl Into<PathBuf>,
        log_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            payload_script: payload_script.into(),
            credential: Arc::new(credential),
            fleet_file: fleet_file.into(),
            log_file: log_file.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_concurrency: None,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_concurrency: self.max_concurrency,
        }
    }
}
