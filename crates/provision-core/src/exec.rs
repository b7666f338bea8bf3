//! Subprocess invocation for the command-line tools the provisioner drives
//! (`kubectl`, `age`).
//!
//! Every call has a deadline, and stdin is fed on its own thread alongside
//! the output drains so a large input cannot block past it. A process still
//! running at the deadline is
//! killed and reported as a transient [`ClientError`]; a non-zero exit is
//! classified as transient or permanent from its stderr.

use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ClientError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Substrings of stderr that indicate the remote side was not ready rather
/// than that the request itself was wrong.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "i/o timeout",
    "tls handshake timeout",
    "timed out",
    "serviceunavailable",
    "service unavailable",
    "too many requests",
    "etcdserver: leader changed",
    "unable to upgrade connection",
    "container not found",
    "can't connect to",
];

pub fn is_transient_stderr(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Resolve a tool binary: explicit path if configured, otherwise `PATH`.
pub fn find_program(name: &str, explicit: Option<&Path>) -> Result<PathBuf, ClientError> {
    if let Some(p) = explicit {
        if p.exists() {
            return Ok(p.to_path_buf());
        }
        return Err(ClientError::permanent(
            name,
            format!("configured binary not found: {}", p.display()),
        ));
    }
    which::which(name)
        .map_err(|_| ClientError::permanent(name, format!("'{name}' not found on PATH")))
}

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// Short description used in errors and logs, e.g. `kubectl apply secrets`.
    pub label: String,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout,
            label: label.into(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `spec` to completion or until its deadline.
pub fn run(spec: &CommandSpec) -> Result<CommandOutput, ClientError> {
    debug!("exec {}: {} {}", spec.label, spec.program.display(), spec.args.join(" "));

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|e| ClientError::permanent(&spec.label, format!("failed to spawn: {e}")))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let writer = feed(child.stdin.take(), spec.stdin.clone());

    let status = wait_with_deadline(&mut child, spec.timeout);
    let output = CommandOutput {
        stdout: join(stdout),
        stderr: join(stderr),
    };
    // The child has exited or been killed, so the pipe is closed and the
    // writer has returned.
    let written = writer
        .and_then(|h| h.join().ok())
        .unwrap_or(Ok(()));

    match status {
        Ok(Some(status)) if status.success() => {
            written.map_err(|e| {
                ClientError::permanent(&spec.label, format!("failed to write stdin: {e}"))
            })?;
            Ok(output)
        }
        Ok(Some(status)) => {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("exited with {status}")
            } else {
                stderr.chars().take(1000).collect()
            };
            if is_transient_stderr(stderr) {
                Err(ClientError::transient(&spec.label, message))
            } else {
                Err(ClientError::permanent(&spec.label, message))
            }
        }
        Ok(None) => Err(ClientError::transient(
            &spec.label,
            format!("timed out after {}s", spec.timeout.as_secs()),
        )),
        Err(e) => Err(ClientError::permanent(&spec.label, e.to_string())),
    }
}

/// `Ok(None)` means the deadline passed and the child was killed.
fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Write `input` and close the pipe. A child that exits without reading
/// everything surfaces as `BrokenPipe`.
fn feed<W: Write + Send + 'static>(
    pipe: Option<W>,
    input: Option<String>,
) -> Option<JoinHandle<std::io::Result<()>>> {
    let (mut w, input) = (pipe?, input?);
    Some(std::thread::spawn(move || {
        match w.write_all(input.as_bytes()) {
            Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    }))
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut r| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = r.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
