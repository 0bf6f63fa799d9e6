//! Command Executor - runs external commands and streams their output
//!
//! A command's stdout and stderr are merged into one bounded stream of text
//! lines, unless [`CommandSpec::separate_stderr`] keeps stderr out of it for
//! commands whose stdout is parsed. Lines are split on both `\n` and `\r`, so the carriage-return
//! progress updates git prints during long clones arrive as they happen
//! instead of in one burst at the end.
//!
//! The stream is decoupled from logging: [`RunningCommand::next_line`] yields
//! lines until the process closes its output, and [`CommandExecutor`] forwards
//! them to a [`LineSink`] tagged with the repository label.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::shutdown::Shutdown;

/// Lines buffered between the pipe readers and the consumer
const LINE_CHANNEL_CAPACITY: usize = 256;

/// Lines kept for error reporting when a command fails
pub const DEFAULT_CAPTURE_LINES: usize = 200;

/// How long a terminated child gets to clean up before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// Description of an external command invocation
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(OsString, OsString)>,
    /// Interleave stderr with stdout. When false, stderr is kept apart and
    /// only reported in logs and failure messages.
    pub merge_stderr: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            merge_stderr: true,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Keep stderr out of the output lines
    pub fn separate_stderr(mut self) -> Self {
        self.merge_stderr = false;
        self
    }

    /// Human-readable command line for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| part.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Receiver of streamed command output
pub trait LineSink: Send + Sync {
    fn line(&self, label: &str, line: &str);
}

/// Forwards command output to `tracing`, tagged with the repository label
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LineSink for TracingSink {
    fn line(&self, label: &str, line: &str) {
        if is_progress_tick(line) {
            debug!(repo = %label, "{}", line);
        } else {
            info!(repo = %label, "{}", line);
        }
    }
}

/// Intermediate progress updates such as `Receiving objects:  42% (420/1000)`
fn is_progress_tick(line: &str) -> bool {
    line.contains('%') && !line.ends_with("done.")
}

/// Result of a command that exited successfully
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Last captured lines of merged output
    pub lines: Vec<String>,
    /// Number of earlier lines dropped from `lines`
    pub dropped: usize,
}

impl CommandOutput {
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }
}

/// Bounded, lazy sequence of output lines, finished when the process closes
/// the pipes feeding it
pub struct OutputLines {
    receiver: mpsc::Receiver<String>,
}

impl OutputLines {
    pub async fn next_line(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// A spawned child process with its output stream, plus a separate stderr
/// stream for commands built with [`CommandSpec::separate_stderr`]
pub struct RunningCommand {
    child: Child,
    lines: OutputLines,
    errors: Option<OutputLines>,
}

impl RunningCommand {
    /// Start `spec` with stdin closed
    pub fn spawn(spec: &CommandSpec) -> Result<Self, SyncError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &spec.envs {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| SyncError::Spawn {
            program: spec.program.to_string_lossy().into_owned(),
            source,
        })?;

        let (sender, receiver) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let mut errors = None;
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, sender.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            if spec.merge_stderr {
                tokio::spawn(forward_lines(stderr, sender.clone()));
            } else {
                let (error_sender, error_receiver) = mpsc::channel(LINE_CHANNEL_CAPACITY);
                tokio::spawn(forward_lines(stderr, error_sender));
                errors = Some(OutputLines {
                    receiver: error_receiver,
                });
            }
        }
        drop(sender);

        Ok(Self {
            child,
            lines: OutputLines { receiver },
            errors,
        })
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.next_line().await
    }

    /// Detach the separate stderr stream, if there is one
    pub fn take_errors(&mut self) -> Option<OutputLines> {
        self.errors.take()
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Ask the child to exit, then kill it if it is still around after the
    /// grace period. git removes a half-written clone on SIGTERM but cannot on
    /// SIGKILL.
    pub async fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) => {
                    if let Ok(Ok(status)) =
                        tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await
                    {
                        debug!(pid, ?status, "child exited after SIGTERM");
                        return;
                    }
                }
                Err(e) => debug!(pid, "failed to send SIGTERM: {}", e),
            }
        }

        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill child process: {}", e);
        }
    }
}

async fn forward_lines<R>(mut reader: R, sender: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("output stream closed: {}", e);
                break;
            }
        };

        for &byte in &chunk[..read] {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = take_line(&mut pending) {
                    if sender.send(line).await.is_err() {
                        return;
                    }
                }
            } else {
                pending.push(byte);
            }
        }
    }

    if let Some(line) = take_line(&mut pending) {
        let _ = sender.send(line).await;
    }
}

fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let line = String::from_utf8_lossy(pending).trim_end().to_string();
    pending.clear();
    (!line.is_empty()).then_some(line)
}

/// Keeps the most recent lines of output, dropping older ones
struct OutputTail {
    lines: VecDeque<String>,
    limit: usize,
    dropped: usize,
}

impl OutputTail {
    fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            limit: limit.max(1),
            dropped: 0,
        }
    }

    fn push(&mut self, line: String) {
        if self.lines.len() == self.limit {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    fn into_output(self) -> CommandOutput {
        CommandOutput {
            lines: self.lines.into(),
            dropped: self.dropped,
        }
    }
}

/// Generic "run, stream, classify exit status" primitive shared by every git
/// operation. Never retries.
#[derive(Clone)]
pub struct CommandExecutor {
    sink: Arc<dyn LineSink>,
    shutdown: Shutdown,
    capture_lines: usize,
}

impl CommandExecutor {
    pub fn new(sink: Arc<dyn LineSink>, shutdown: Shutdown) -> Self {
        Self {
            sink,
            shutdown,
            capture_lines: DEFAULT_CAPTURE_LINES,
        }
    }

    pub fn with_capture_lines(mut self, capture_lines: usize) -> Self {
        self.capture_lines = capture_lines;
        self
    }

    /// Run `spec`, forwarding every output line to the sink under `label`
    pub async fn execute(&self, spec: &CommandSpec, label: &str) -> Result<CommandOutput, SyncError> {
        self.drive(spec, Some(label)).await
    }

    /// Run `spec` and only collect its output
    pub async fn capture(&self, spec: &CommandSpec) -> Result<CommandOutput, SyncError> {
        self.drive(spec, None).await
    }

    async fn drive(&self, spec: &CommandSpec, label: Option<&str>) -> Result<CommandOutput, SyncError> {
        let command = spec.display();
        debug!(command = %command, cwd = ?spec.cwd, "Running command");

        let mut shutdown = self.shutdown.listener();
        let mut running = RunningCommand::spawn(spec)?;
        let mut tail = OutputTail::new(self.capture_lines);
        let mut stderr_tail = OutputTail::new(self.capture_lines);

        let mut errors = running.take_errors();
        let mut output_open = true;
        let mut errors_open = errors.is_some();
        // Both streams are drained together so a chatty stderr cannot fill its
        // pipe and stall the child
        while output_open || errors_open {
            tokio::select! {
                line = running.next_line(), if output_open => match line {
                    Some(line) => {
                        if let Some(label) = label {
                            self.sink.line(label, &line);
                        }
                        tail.push(line);
                    }
                    None => output_open = false,
                },
                line = next_error_line(&mut errors), if errors_open => match line {
                    Some(line) => {
                        debug!(command = %command, "stderr: {}", line);
                        stderr_tail.push(line);
                    }
                    None => errors_open = false,
                },
                _ = shutdown.recv() => {
                    warn!(command = %command, "Terminating command for shutdown");
                    running.terminate().await;
                    return Err(SyncError::Interrupted { command });
                }
            }
        }

        let status = tokio::select! {
            status = running.wait() => status.map_err(|source| SyncError::Spawn {
                program: spec.program.to_string_lossy().into_owned(),
                source,
            })?,
            _ = shutdown.recv() => {
                running.terminate().await;
                return Err(SyncError::Interrupted { command });
            }
        };

        debug!(command = %command, exit_code = ?status.code(), "Command finished");

        let output = tail.into_output();
        let diagnostics = stderr_tail.into_output();
        if status.success() {
            if !diagnostics.lines.is_empty() {
                warn!(
                    command = %command,
                    "Command succeeded but wrote to stderr: {}",
                    diagnostics.text()
                );
            }
            Ok(output)
        } else {
            let output = [output.text(), diagnostics.text()]
                .into_iter()
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n");
            Err(SyncError::Execution {
                command,
                exit_code: status.code(),
                output,
            })
        }
    }
}

async fn next_error_line(errors: &mut Option<OutputLines>) -> Option<String> {
    match errors {
        Some(errors) => errors.next_line().await,
        None => None,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::LineSink;
    use std::sync::Mutex;

    /// Sink that records every forwarded line
    #[derive(Default)]
    pub struct RecordingSink {
        pub lines: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSink {
        pub fn lines(&self) -> Vec<(String, String)> {
            self.lines.lock().unwrap().clone()
        }
    }

    impl LineSink for RecordingSink {
        fn line(&self, label: &str, line: &str) {
            self.lines
                .lock()
                .unwrap()
                .push((label.to_string(), line.to_string()));
        }
    }
}
