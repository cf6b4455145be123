//! Output Sink: the single serialization point for host frames.
//!
//! Every frame is rendered into one buffer first and then written to the
//! console and the durable log while holding one lock, so two frames can
//! never interleave. Frames appear in the order they are recorded, which is
//! host completion order.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

use crate::frame::ResultFrame;

#[derive(Debug, Error)]
#[error("failed to open log file {}", path.display())]
pub struct LogOpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Destination for finished frames. Safe to call from many Runners at once.
pub trait FrameSink: Send + Sync {
    /// Record one frame atomically with respect to every other call.
    ///
    /// Called on the finishing host's task; writes may block it.
    fn record(&self, frame: &ResultFrame);
}

/// Render a frame as a self-delimited block: header line, captured output,
/// then one line per error.
pub fn render_frame(frame: &ResultFrame) -> Vec<u8> {
    let label = frame.host_label();
    let mut block = format!("\n====== [{label}] ======\n").into_bytes();

    let output = frame.output();
    if !output.is_empty() {
        block.extend_from_slice(output);
        if !output.ends_with(b"\n") {
            block.push(b'\n');
        }
    }

    if let Some(e) = frame.connection_error() {
        block.extend_from_slice(format!("[{label}] {e}\n").as_bytes());
    }
    if let Some(e) = frame.execution_error() {
        block.extend_from_slice(format!("[{label}] {e}\n").as_bytes());
    }

    block
}

struct Targets {
    console: Box<dyn Write + Send>,
    log: Box<dyn Write + Send>,
}

impl Targets {
    fn write_both(&mut self, bytes: &[u8]) {
        if let Err(e) = self.console.write_all(bytes).and_then(|()| self.console.flush()) {
            tracing::warn!(error = %e, "failed to write to console");
        }
        if let Err(e) = self.log.write_all(bytes).and_then(|()| self.log.flush()) {
            tracing::warn!(error = %e, "failed to write to log file");
        }
    }
}

/// Writes frames identically to a console stream and a durable log.
pub struct OutputSink {
    targets: Mutex<Targets>,
    log_path: Option<PathBuf>,
}

impl OutputSink {
    /// Build a sink over arbitrary writers.
    pub fn new(console: impl Write + Send + 'static, log: impl Write + Send + 'static) -> Self {
        Self {
            targets: Mutex::new(Targets {
                console: Box::new(console),
                log: Box::new(log),
            }),
            log_path: None,
        }
    }

    /// Create (or truncate) the log file at `path` and pair it with stdout.
    pub fn open(path: &Path) -> Result<Self, LogOpenError> {
        Self::open_with_console(path, io::stdout())
    }

    /// Like [`OutputSink::open`] with an explicit console writer.
    pub fn open_with_console(
        path: &Path,
        console: impl Write + Send + 'static,
    ) -> Result<Self, LogOpenError> {
        let file = File::create(path).map_err(|source| LogOpenError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut sink = Self::new(console, file);
        sink.log_path = Some(path.to_path_buf());
        Ok(sink)
    }

    /// Path of the durable log, when the sink was opened from a file.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Write a free-standing line to both targets.
    pub fn announce(&self, line: &str) {
        self.lock().write_both(format!("{line}\n").as_bytes());
    }

    /// Write a line to the console only.
    pub fn notice(&self, line: &str) {
        let mut targets = self.lock();
        if let Err(e) = writeln!(targets.console, "{line}").and_then(|()| targets.console.flush()) {
            tracing::warn!(error = %e, "failed to write to console");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Targets> {
        // A poisoned lock still guards usable writers.
        self.targets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSink for OutputSink {
    fn record(&self, frame: &ResultFrame) {
        let block = render_frame(frame);
        self.lock().write_both(&block);
    }
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputSink")
            .field("log_path", &self.log_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::frame::{ConnectionError, ExecutionError};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn render_successful_frame() {
        let frame = ResultFrame::executed("alice@web1", b"up 3 days".to_vec(), None, Duration::ZERO);
        let text = String::from_utf8(render_frame(&frame)).unwrap();
        assert_eq!(text, "\n====== [alice@web1] ======\nup 3 days\n");
    }

    #[test]
    fn render_execution_error_after_output() {
        let frame = ResultFrame::executed(
            "bob@web2",
            b"step 1 ok\nstep 2 failed\n".to_vec(),
            Some(ExecutionError::NonZeroExit { code: 1 }),
            Duration::ZERO,
        );
        let text = String::from_utf8(render_frame(&frame)).unwrap();
        assert_eq!(
            text,
            "\n====== [bob@web2] ======\nstep 1 ok\nstep 2 failed\n\
             [bob@web2] Command execution error: process exited with status 1\n"
        );
    }

    #[test]
    fn render_connection_error_has_header_and_no_output() {
        let frame = ResultFrame::connection_failed(
            "carol@10.0.0.9",
            ConnectionError::new("dial 10.0.0.9:22: connection refused"),
            Duration::ZERO,
        );
        let text = String::from_utf8(render_frame(&frame)).unwrap();
        assert_eq!(
            text,
            "\n====== [carol@10.0.0.9] ======\n\
             [carol@10.0.0.9] SSH connection error: dial 10.0.0.9:22: connection refused\n"
        );
    }

    #[test]
    fn record_writes_same_bytes_to_console_and_log() {
        let console = Buffer::default();
        let log = Buffer::default();
        let sink = OutputSink::new(console.clone(), log.clone());

        sink.record(&ResultFrame::executed("a@1", b"one\n".to_vec(), None, Duration::ZERO));
        sink.record(&ResultFrame::executed("b@2", b"two\n".to_vec(), None, Duration::ZERO));

        assert_eq!(console.text(), log.text());
        assert_eq!(
            log.text(),
            "\n====== [a@1] ======\none\n\n====== [b@2] ======\ntwo\n"
        );
    }

    #[test]
    fn notice_goes_to_console_only() {
        let console = Buffer::default();
        let log = Buffer::default();
        let sink = OutputSink::new(console.clone(), log.clone());

        sink.announce("run 42 started");
        sink.notice("All tasks completed.");

        assert_eq!(console.text(), "run 42 started\nAll tasks completed.\n");
        assert_eq!(log.text(), "run 42 started\n");
    }

    #[test]
    fn open_truncates_existing_log() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("run.log");
        std::fs::write(&path, "stale contents from last run\n").unwrap();

        let sink = OutputSink::open_with_console(&path, io::sink()).unwrap();
        sink.record(&ResultFrame::executed("a@1", b"fresh\n".to_vec(), None, Duration::ZERO));
        assert_eq!(sink.log_path(), Some(path.as_path()));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "\n====== [a@1] ======\nfresh\n");
    }

    #[test]
    fn open_in_missing_directory_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("no-such-dir").join("run.log");
        let err = OutputSink::open(&path).unwrap_err();
        assert_eq!(err.path, path);
    }

    #[test]
    fn concurrent_records_never_interleave() {
        let log = Buffer::default();
        let sink = Arc::new(OutputSink::new(io::sink(), log.clone()));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    let body = format!("{i}\n").repeat(200).into_bytes();
                    sink.record(&ResultFrame::executed(
                        format!("host{i}@h"),
                        body,
                        None,
                        Duration::ZERO,
                    ));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let text = log.text();
        let blocks: Vec<&str> = text.split("\n====== [").skip(1).collect();
        assert_eq!(blocks.len(), 16);
        for block in blocks {
            let (header, body) = block.split_once(" ======\n").unwrap();
            let i = header.trim_start_matches("host").trim_end_matches("@h]");
            assert!(
                body.lines().all(|line| line == i),
                "frame for host{i} contains foreign lines"
            );
            assert_eq!(body.lines().count(), 200);
        }
    }
}
