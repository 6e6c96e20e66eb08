//! Stream bindings and their resolution into OS stdio handles.

use hsu_common::StreamKind;
use hsu_process::SpawnFailure;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};

/// Where one standard stream of the child is connected.
pub enum StreamBinding<T> {
    /// Share the caller's descriptor.
    Inherit,
    /// Connect to the null device.
    Discard,
    /// A fresh pipe whose parent end is driven by an I/O pump.
    Pipe(T),
    /// A file opened before spawn. Outputs are created if absent.
    File { path: PathBuf, append: bool },
}

/// Data fed to the child's stdin.
pub enum InputSource {
    Bytes(Vec<u8>),
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// Destination for a child's stdout or stderr.
pub enum OutputSink {
    /// Bounded in-memory capture returned in the report.
    Capture,
    /// Forward every byte to a caller-supplied writer.
    Writer(Box<dyn AsyncWrite + Send + Unpin>),
    /// Emit each line as a structured log event.
    Log,
}

pub type InputBinding = StreamBinding<InputSource>;
pub type OutputBinding = StreamBinding<OutputSink>;

impl<T> StreamBinding<T> {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        StreamBinding::File {
            path: path.into(),
            append: false,
        }
    }

    pub fn append_file(path: impl Into<PathBuf>) -> Self {
        StreamBinding::File {
            path: path.into(),
            append: true,
        }
    }

    pub fn is_pipe(&self) -> bool {
        matches!(self, StreamBinding::Pipe(_))
    }
}

impl InputBinding {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        StreamBinding::Pipe(InputSource::Bytes(data.into()))
    }

    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        StreamBinding::Pipe(InputSource::Reader(Box::new(reader)))
    }
}

impl OutputBinding {
    pub fn capture() -> Self {
        StreamBinding::Pipe(OutputSink::Capture)
    }

    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        StreamBinding::Pipe(OutputSink::Writer(Box::new(writer)))
    }

    pub fn log() -> Self {
        StreamBinding::Pipe(OutputSink::Log)
    }
}

impl<T: fmt::Debug> fmt::Debug for StreamBinding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamBinding::Inherit => write!(f, "Inherit"),
            StreamBinding::Discard => write!(f, "Discard"),
            StreamBinding::Pipe(endpoint) => f.debug_tuple("Pipe").field(endpoint).finish(),
            StreamBinding::File { path, append } => f
                .debug_struct("File")
                .field("path", path)
                .field("append", append)
                .finish(),
        }
    }
}

impl fmt::Debug for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSource::Bytes(data) => write!(f, "Bytes({} bytes)", data.len()),
            InputSource::Reader(_) => write!(f, "Reader"),
        }
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSink::Capture => write!(f, "Capture"),
            OutputSink::Writer(_) => write!(f, "Writer"),
            OutputSink::Log => write!(f, "Log"),
        }
    }
}

/// Bindings for all three standard streams of one invocation.
///
/// Defaults: stdin discarded, stdout and stderr captured.
#[derive(Debug)]
pub struct StreamBindings {
    pub stdin: InputBinding,
    pub stdout: OutputBinding,
    pub stderr: OutputBinding,
}

impl Default for StreamBindings {
    fn default() -> Self {
        Self {
            stdin: StreamBinding::Discard,
            stdout: OutputBinding::capture(),
            stderr: OutputBinding::capture(),
        }
    }
}

impl StreamBindings {
    /// All three streams shared with the caller.
    pub fn inherit() -> Self {
        Self {
            stdin: StreamBinding::Inherit,
            stdout: StreamBinding::Inherit,
            stderr: StreamBinding::Inherit,
        }
    }

    pub fn with_stdin(mut self, binding: InputBinding) -> Self {
        self.stdin = binding;
        self
    }

    pub fn with_stdout(mut self, binding: OutputBinding) -> Self {
        self.stdout = binding;
        self
    }

    pub fn with_stderr(mut self, binding: OutputBinding) -> Self {
        self.stderr = binding;
        self
    }

    /// Open files and choose stdio handles, before any process exists.
    ///
    /// On failure every handle opened so far is dropped (and closed) here.
    pub fn resolve(self) -> Result<ResolvedBindings, SpawnFailure> {
        let (stdin, input) = resolve_input(self.stdin)?;
        let (stdout, stdout_sink) = resolve_output(StreamKind::Stdout, self.stdout)?;
        let (stderr, stderr_sink) = resolve_output(StreamKind::Stderr, self.stderr)?;

        Ok(ResolvedBindings {
            stdin,
            stdout,
            stderr,
            input,
            stdout_sink,
            stderr_sink,
        })
    }
}

/// Stdio handles for the spawn plus the pump endpoints for piped streams.
#[derive(Debug)]
pub struct ResolvedBindings {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
    pub input: Option<InputSource>,
    pub stdout_sink: Option<OutputSink>,
    pub stderr_sink: Option<OutputSink>,
}

fn resolve_input(binding: InputBinding) -> Result<(Stdio, Option<InputSource>), SpawnFailure> {
    match binding {
        StreamBinding::Inherit => Ok((Stdio::inherit(), None)),
        StreamBinding::Discard => Ok((Stdio::null(), None)),
        StreamBinding::Pipe(source) => Ok((Stdio::piped(), Some(source))),
        StreamBinding::File { path, .. } => {
            let file = File::open(&path).map_err(|e| open_failure(StreamKind::Stdin, &path, e))?;
            Ok((Stdio::from(file), None))
        }
    }
}

fn resolve_output(
    kind: StreamKind,
    binding: OutputBinding,
) -> Result<(Stdio, Option<OutputSink>), SpawnFailure> {
    match binding {
        StreamBinding::Inherit => Ok((Stdio::inherit(), None)),
        StreamBinding::Discard => Ok((Stdio::null(), None)),
        StreamBinding::Pipe(sink) => Ok((Stdio::piped(), Some(sink))),
        StreamBinding::File { path, append } => {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(&path)
                .map_err(|e| open_failure(kind, &path, e))?;
            Ok((Stdio::from(file), None))
        }
    }
}

fn open_failure(kind: StreamKind, path: &Path, error: std::io::Error) -> SpawnFailure {
    SpawnFailure::binding(format!(
        "{}: cannot open {}: {}",
        kind,
        path.display(),
        error
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hsu_process::SpawnFailureKind;

    #[test]
    fn test_default_bindings() {
        let resolved = StreamBindings::default().resolve().unwrap();
        assert!(resolved.input.is_none());
        assert!(matches!(resolved.stdout_sink, Some(OutputSink::Capture)));
        assert!(matches!(resolved.stderr_sink, Some(OutputSink::Capture)));
    }

    #[test]
    fn test_output_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");

        let bindings = StreamBindings::default().with_stdout(OutputBinding::file(&path));
        let resolved = bindings.resolve().unwrap();
        assert!(resolved.stdout_sink.is_none());
        assert!(path.exists());
    }

    #[test]
    fn test_missing_stdin_file_is_binding_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = StreamBindings::default()
            .with_stdin(InputBinding::file(dir.path().join("missing.txt")));

        let failure = bindings.resolve().unwrap_err();
        assert_eq!(failure.kind, SpawnFailureKind::Binding);
        assert!(failure.reason.starts_with("stdin:"));
    }

    #[test]
    fn test_output_file_in_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let bindings = StreamBindings::default()
            .with_stderr(OutputBinding::append_file(dir.path().join("no/such/dir/err.log")));

        let failure = bindings.resolve().unwrap_err();
        assert_eq!(failure.kind, SpawnFailureKind::Binding);
        assert!(failure.reason.starts_with("stderr:"));
    }

    #[test]
    fn test_debug_hides_endpoints() {
        let binding = InputBinding::bytes(b"abc".to_vec());
        assert_eq!(format!("{:?}", binding), "Pipe(Bytes(3 bytes))");
        assert!(binding.is_pipe());
    }
}
