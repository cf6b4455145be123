//! Fan-Out Coordinator: one Runner per host, all at once, then a join.
//!
//! Every fleet member gets exactly one task. Each task runs its Runner,
//! hands the frame to the sink as soon as it exists, and returns it to the
//! coordinator. The join over all tasks is the only synchronization point;
//! nothing is retried, cancelled or prioritized.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use secrecy::SecretString;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::frame::{ExecutionError, Outcome, ResultFrame};
use crate::host::Fleet;
use crate::payload::Payload;
use crate::runner::{ExecutionRequest, SessionRunner};
use crate::sink::FrameSink;
use crate::transport::Connector;

/// Configuration for the coordinator.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Maximum number of Runners in flight. `None` launches every host
    /// immediately.
    pub max_concurrency: Option<usize>,
}

/// Frames of a finished run, in completion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    frames: Vec<ResultFrame>,
}

impl RunSummary {
    pub fn frames(&self) -> &[ResultFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.count(Outcome::Succeeded)
    }

    pub fn connection_failures(&self) -> usize {
        self.count(Outcome::ConnectionFailed)
    }

    pub fn execution_failures(&self) -> usize {
        self.count(Outcome::ExecutionFailed)
    }

    fn count(&self, outcome: Outcome) -> usize {
        self.frames.iter().filter(|f| f.outcome() == outcome).count()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hosts: {} ok, {} connection failed, {} execution failed",
            self.len(),
            self.succeeded(),
            self.connection_failures(),
            self.execution_failures()
        )
    }
}

/// Launches and joins the per-host Runners.
pub struct Coordinator {
    runner: SessionRunner,
    sink: Arc<dyn FrameSink>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        connector: Arc<dyn Connector>,
        sink: Arc<dyn FrameSink>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            runner: SessionRunner::new(connector),
            sink,
            config,
        }
    }

    /// Run `payload` on every host in `fleet` and wait for all of them.
    ///
    /// Returns one frame per host, each already recorded in the sink.
    pub async fn execute(
        &self,
        fleet: &Fleet,
        payload: &Payload,
        credential: Arc<SecretString>,
    ) -> RunSummary {
        let admission = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        tracing::info!(
            hosts = fleet.len(),
            max_concurrency = ?self.config.max_concurrency,
            "fanning out"
        );

        let mut tasks = JoinSet::new();
        let mut labels = HashMap::with_capacity(fleet.len());
        for descriptor in fleet {
            let request = ExecutionRequest {
                descriptor: descriptor.clone(),
                payload: payload.clone(),
                credential: Arc::clone(&credential),
            };
            let runner = self.runner.clone();
            let sink = Arc::clone(&self.sink);
            let admission = admission.clone();
            let span = tracing::info_span!("host", host = %descriptor.address());

            let handle = tasks.spawn(
                async move {
                    // The semaphore is never closed, so acquisition only
                    // waits.
                    let _permit = match admission {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };

                    let frame = run_isolated(&runner, &request).await;
                    log_outcome(&frame);
                    record_isolated(sink.as_ref(), &frame);
                    frame
                }
                .instrument(span),
            );
            labels.insert(handle.id(), descriptor.address().to_owned());
        }

        let mut frames = Vec::with_capacity(fleet.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    // The task died outside the Runner; the host still gets a frame.
                    let label = labels.remove(&e.id()).unwrap_or_default();
                    tracing::error!(host = %label, error = %e, "runner task did not complete");
                    let reason = if e.is_panic() {
                        panic_message(e.into_panic().as_ref())
                    } else {
                        "runner task cancelled".to_owned()
                    };
                    let frame = ResultFrame::executed(
                        label,
                        Vec::new(),
                        Some(ExecutionError::Panicked(reason)),
                        Duration::ZERO,
                    );
                    record_isolated(self.sink.as_ref(), &frame);
                    frames.push(frame);
                }
            }
        }

        let summary = RunSummary { frames };
        tracing::info!(%summary, "all runners finished");
        summary
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("runner", &self.runner)
            .field("config", &self.config)
            .finish()
    }
}

/// Run one host, turning a panic inside the Runner into an execution
/// error frame so every host still produces exactly one frame.
async fn run_isolated(runner: &SessionRunner, request: &ExecutionRequest) -> ResultFrame {
    let started = Instant::now();
    match AssertUnwindSafe(runner.run(request)).catch_unwind().await {
        Ok(frame) => frame,
        Err(panic) => ResultFrame::executed(
            request.descriptor.address(),
            Vec::new(),
            Some(ExecutionError::Panicked(panic_message(panic.as_ref()))),
            started.elapsed(),
        ),
    }
}

/// Hand `frame` to the sink; a panicking sink is logged, not propagated.
fn record_isolated(sink: &dyn FrameSink, frame: &ResultFrame) {
    if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| sink.record(frame))) {
        tracing::error!(
            host = %frame.host_label(),
            panic = %panic_message(panic.as_ref()),
            "sink failed to record frame"
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

fn log_outcome(frame: &ResultFrame) {
    let elapsed_ms = u64::try_from(frame.elapsed().as_millis()).unwrap_or(u64::MAX);
    match (frame.connection_error(), frame.execution_error()) {
        (Some(e), _) => tracing::warn!(elapsed_ms, error = %e, "host unreachable"),
        (None, Some(e)) => tracing::warn!(
            elapsed_ms,
            output_bytes = frame.output().len(),
            error = %e,
            "command failed"
        ),
        (None, None) => tracing::info!(
            elapsed_ms,
            output_bytes = frame.output().len(),
            "command succeeded"
        ),
    }
}
