//! I/O pumps: one task per piped stream of a child.
//!
//! Output pumps read until EOF so the child never blocks on a full pipe,
//! keeping at most `max_output_bytes` per captured stream. The input pump
//! writes its source and then closes the child's stdin. All pumps are
//! joined in [`IoPump::finish`].

use crate::binding::{InputSource, OutputSink};
use crate::capture::{CaptureBuffer, CapturedOutput};
use hsu_common::{InvocationId, StreamKind};
use serde::Serialize;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 8 * 1024;
const MAX_LOG_LINE: usize = 16 * 1024;

/// An I/O failure on one stream. Recorded in the report, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamError {
    pub stream: StreamKind,
    pub message: String,
}

impl StreamError {
    fn new(stream: StreamKind, message: impl Into<String>) -> Self {
        Self {
            stream,
            message: message.into(),
        }
    }
}

/// Settings shared by the pumps of one invocation.
#[derive(Debug, Clone)]
pub struct PumpSettings {
    pub invocation_id: InvocationId,
    /// Per-stream capture cap. `None` captures without bound.
    pub max_output_bytes: Option<usize>,
}

impl PumpSettings {
    fn capture_limit(&self) -> usize {
        self.max_output_bytes.unwrap_or(usize::MAX)
    }
}

/// What the pumps produced once joined.
#[derive(Debug, Default)]
pub struct PumpOutcome {
    pub stdout: Option<CapturedOutput>,
    pub stderr: Option<CapturedOutput>,
    pub errors: Vec<StreamError>,
    /// True when at least one pump was stopped by the drain timeout.
    pub drain_interrupted: bool,
}

struct OutputResult {
    captured: Option<CapturedOutput>,
    error: Option<StreamError>,
    interrupted: bool,
}

/// Handles to the pump tasks of one child.
pub struct IoPump {
    invocation_id: InvocationId,
    drain: CancellationToken,
    input_stop: CancellationToken,
    input: Option<JoinHandle<Option<StreamError>>>,
    stdout: Option<JoinHandle<OutputResult>>,
    stderr: Option<JoinHandle<OutputResult>>,
}

impl IoPump {
    /// Take the child's pipe ends and start a pump for each bound stream.
    ///
    /// A sink or source is only used if the matching pipe exists.
    pub fn start(
        child: &mut Child,
        input: Option<InputSource>,
        stdout_sink: Option<OutputSink>,
        stderr_sink: Option<OutputSink>,
        settings: PumpSettings,
    ) -> Self {
        let drain = CancellationToken::new();
        let input_stop = drain.child_token();

        let input = match (child.stdin.take(), input) {
            (Some(stdin), Some(source)) => Some(tokio::spawn(pump_input(
                stdin,
                source,
                settings.invocation_id.clone(),
                input_stop.clone(),
            ))),
            _ => None,
        };

        let stdout = match (child.stdout.take(), stdout_sink) {
            (Some(reader), Some(sink)) => Some(tokio::spawn(pump_output(
                reader,
                sink,
                StreamKind::Stdout,
                settings.clone(),
                drain.clone(),
            ))),
            _ => None,
        };

        let stderr = match (child.stderr.take(), stderr_sink) {
            (Some(reader), Some(sink)) => Some(tokio::spawn(pump_output(
                reader,
                sink,
                StreamKind::Stderr,
                settings.clone(),
                drain.clone(),
            ))),
            _ => None,
        };

        Self {
            invocation_id: settings.invocation_id,
            drain,
            input_stop,
            input,
            stdout,
            stderr,
        }
    }

    /// Stop feeding stdin and close it. Used when the child is being aborted.
    pub fn stop_input(&self) {
        self.input_stop.cancel();
    }

    /// Join every pump.
    ///
    /// With a drain timeout, pumps still running after it elapses are told
    /// to stop; their captures are marked truncated. Nothing read before
    /// that point is lost.
    pub async fn finish(self, drain_timeout: Option<Duration>) -> PumpOutcome {
        let watchdog = drain_timeout.map(|timeout| {
            let drain = self.drain.clone();
            let invocation_id = self.invocation_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!(
                    invocation_id = %invocation_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Streams still open after drain timeout, stopping pumps"
                );
                drain.cancel();
            })
        });

        let mut outcome = PumpOutcome::default();

        if let Some(task) = self.input {
            match task.await {
                Ok(Some(error)) => outcome.errors.push(error),
                Ok(None) => {}
                Err(e) => outcome
                    .errors
                    .push(StreamError::new(StreamKind::Stdin, format!("pump task failed: {}", e))),
            }
        }

        for (kind, task) in [
            (StreamKind::Stdout, self.stdout),
            (StreamKind::Stderr, self.stderr),
        ] {
            let Some(task) = task else { continue };
            let result = match task.await {
                Ok(result) => result,
                Err(e) => OutputResult {
                    captured: None,
                    error: Some(StreamError::new(kind, format!("pump task failed: {}", e))),
                    interrupted: false,
                },
            };

            outcome.drain_interrupted |= result.interrupted;
            if let Some(error) = result.error {
                outcome.errors.push(error);
            }
            match kind {
                StreamKind::Stdout => outcome.stdout = result.captured,
                _ => outcome.stderr = result.captured,
            }
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        debug!(
            invocation_id = %self.invocation_id,
            errors = outcome.errors.len(),
            drain_interrupted = outcome.drain_interrupted,
            "I/O pumps joined"
        );

        outcome
    }
}

async fn pump_input(
    mut stdin: ChildStdin,
    source: InputSource,
    invocation_id: InvocationId,
    stop: CancellationToken,
) -> Option<StreamError> {
    let result = tokio::select! {
        _ = stop.cancelled() => {
            debug!(invocation_id = %invocation_id, "Input pump stopped");
            Ok(())
        }
        result = write_input(&mut stdin, source) => result,
    };

    let error = match result {
        Ok(()) => {
            let _ = stdin.shutdown().await;
            None
        }
        // The child closed its end early; it simply did not want more input.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!(invocation_id = %invocation_id, "Child closed stdin early");
            None
        }
        Err(e) => {
            warn!(invocation_id = %invocation_id, stream = "stdin", error = %e, "Input pump failed");
            Some(StreamError::new(StreamKind::Stdin, e.to_string()))
        }
    };

    // Dropping the handle closes the pipe on every path.
    drop(stdin);
    error
}

async fn write_input(stdin: &mut ChildStdin, source: InputSource) -> io::Result<()> {
    match source {
        InputSource::Bytes(data) => stdin.write_all(&data).await,
        InputSource::Reader(mut reader) => tokio::io::copy(&mut reader, stdin).await.map(|_| ()),
    }?;
    stdin.flush().await
}

enum SinkState {
    Capture(CaptureBuffer),
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    Log(LineSplitter),
    /// Writer failed; keep draining so the child is never blocked.
    Drain,
}

async fn pump_output<R>(
    mut reader: R,
    sink: OutputSink,
    kind: StreamKind,
    settings: PumpSettings,
    drain: CancellationToken,
) -> OutputResult
where
    R: AsyncRead + Unpin,
{
    let invocation_id = settings.invocation_id.clone();
    let mut state = match sink {
        OutputSink::Capture => SinkState::Capture(CaptureBuffer::new(settings.capture_limit())),
        OutputSink::Writer(writer) => SinkState::Writer(writer),
        OutputSink::Log => SinkState::Log(LineSplitter::default()),
    };
    let mut error = None;
    let mut interrupted = false;
    let mut total: u64 = 0;
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            biased;
            _ = drain.cancelled() => {
                interrupted = true;
                break;
            }
            result = reader.read(&mut buf) => result,
        };

        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(invocation_id = %invocation_id, stream = %kind, error = %e, "Output read failed");
                error = Some(StreamError::new(kind, e.to_string()));
                break;
            }
        };
        total += n as u64;
        let chunk = &buf[..n];

        match &mut state {
            SinkState::Capture(buffer) => buffer.push(chunk),
            SinkState::Writer(writer) => {
                if let Err(e) = writer.write_all(chunk).await {
                    warn!(
                        invocation_id = %invocation_id,
                        stream = %kind,
                        error = %e,
                        "Output writer failed, discarding remaining output"
                    );
                    error = Some(StreamError::new(kind, format!("writer failed: {}", e)));
                    state = SinkState::Drain;
                }
            }
            SinkState::Log(lines) => {
                for line in lines.push(chunk) {
                    info!(invocation_id = %invocation_id, stream = %kind, line = %line, "child output");
                }
            }
            SinkState::Drain => {}
        }
    }

    debug!(invocation_id = %invocation_id, stream = %kind, bytes = total, "Output pump finished");

    let captured = match state {
        SinkState::Capture(mut buffer) => {
            if interrupted || error.is_some() {
                buffer.mark_truncated();
            }
            Some(buffer.finish())
        }
        SinkState::Writer(mut writer) => {
            if let Err(e) = writer.flush().await {
                error.get_or_insert_with(|| StreamError::new(kind, format!("writer flush failed: {}", e)));
            }
            None
        }
        SinkState::Log(mut lines) => {
            if let Some(line) = lines.finish() {
                info!(invocation_id = %invocation_id, stream = %kind, line = %line, "child output");
            }
            None
        }
        SinkState::Drain => None,
    };

    OutputResult {
        captured,
        error,
        interrupted,
    }
}

/// Splits a byte stream into lines, bounding the length of any one line.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' {
                lines.push(self.take());
            } else {
                self.pending.push(byte);
                if self.pending.len() >= MAX_LOG_LINE {
                    lines.push(self.take());
                }
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    fn take(&mut self) -> String {
        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8_lossy(&line).into_owned()
    }
}
