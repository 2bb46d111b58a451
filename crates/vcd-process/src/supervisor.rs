//! Supervision of one external process.
//!
//! A [`ProcessSupervisor`] owns three tasks: a driver that waits on the child
//! and two readers that forward stdout and stderr line by line. The driver
//! only finishes after both readers have drained, so no trailing output is
//! lost when a process exits abruptly.
//!
//! Cancellation escalates on a timer. While the child is alive it is asked to
//! terminate (SIGTERM first, then a hard kill). Once the child is gone but the
//! readers are still blocked, typically because a grandchild inherited the
//! pipes, the driver is interrupted and abandons the readers.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::ToolCommand;
use crate::error::{ProcessError, ProcessResult};
use crate::metrics::record_stage;
use crate::sink::StatusSink;

/// Default escalation interval.
pub const DEFAULT_KILL_INTERVAL: Duration = Duration::from_millis(500);

/// Graceful terminate requests sent before switching to a hard kill.
pub const DEFAULT_GRACEFUL_ATTEMPTS: u32 = 3;

/// Lifecycle of a supervised stage. The last three states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed | StageState::Cancelled
        )
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    capture_stdout: bool,
    capture_stderr: bool,
    kill_interval: Duration,
    graceful_attempts: u32,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            capture_stdout: true,
            capture_stderr: true,
            kill_interval: DEFAULT_KILL_INTERVAL,
            graceful_attempts: DEFAULT_GRACEFUL_ATTEMPTS,
        }
    }
}

impl SupervisorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep stdout in memory for [`StageOutput::stdout`].
    pub fn capture_stdout(mut self, capture: bool) -> Self {
        self.capture_stdout = capture;
        self
    }

    /// Keep stderr in memory for [`StageOutput::stderr`].
    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    pub fn kill_interval(mut self, interval: Duration) -> Self {
        self.kill_interval = interval;
        self
    }

    pub fn graceful_attempts(mut self, attempts: u32) -> Self {
        self.graceful_attempts = attempts;
        self
    }
}

/// Outcome of a successful stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub exit_code: i32,
    pub elapsed: Duration,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Copy)]
enum Terminate {
    Graceful,
    Force,
}

#[derive(Debug, Default)]
struct Shared {
    alive: AtomicBool,
    cancel_requested: AtomicBool,
    interrupt: Notify,
}

/// One running external process.
pub struct ProcessSupervisor {
    command: String,
    canceller: StageCanceller,
    driver: JoinHandle<ProcessResult<StageOutput>>,
}

impl ProcessSupervisor {
    /// Spawn `command` and start streaming its output to `sink`.
    ///
    /// The working directory is created first. stdin is closed. A spawn
    /// failure is reported to the sink and returned as [`ProcessError::Spawn`].
    pub async fn start(
        command: ToolCommand,
        sink: Arc<dyn StatusSink>,
        options: SupervisorOptions,
    ) -> ProcessResult<Self> {
        let command_line = command.to_string();
        let tool = command.short_name().to_string();
        let started = Instant::now();

        sink.on_output_line(&format!("{}{}", timestamp(), command_line));

        let spawned = match tokio::fs::create_dir_all(command.working_dir()).await {
            Ok(()) => Command::new(command.program())
                .args(command.args())
                .current_dir(command.working_dir())
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn(),
            Err(e) => Err(e),
        };

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                let elapsed = started.elapsed();
                warn!(tool = %tool, error = %source, "Failed to start command");
                sink.on_output_line(&format!(
                    "{}command {} could not start ({} ms): {}",
                    timestamp(),
                    tool,
                    elapsed.as_millis(),
                    source
                ));
                record_stage(&tool, "spawn_error", elapsed);
                return Err(ProcessError::Spawn {
                    command: command_line,
                    source,
                });
            }
        };

        info!(tool = %tool, pid = ?child.id(), "Started {}", command_line);

        let shared = Arc::new(Shared::default());
        shared.alive.store(true, Ordering::SeqCst);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(StageState::Running);

        let tag = format!("[{}] ", tool);
        let stdout = spawn_reader(
            child.stdout.take(),
            tag.clone(),
            sink.clone(),
            options.capture_stdout,
        );
        let stderr = spawn_reader(child.stderr.take(), tag, sink.clone(), options.capture_stderr);

        let driver = tokio::spawn(drive(
            child,
            Driver {
                command: command_line.clone(),
                tool: tool.clone(),
                started,
                sink: sink.clone(),
                shared: shared.clone(),
                state: state_tx,
            },
            control_rx,
            stdout,
            stderr,
        ));

        Ok(Self {
            command: command_line,
            canceller: StageCanceller {
                tool,
                shared,
                control: control_tx,
                state: state_rx,
                sink,
                interval: options.kill_interval,
                graceful_attempts: options.graceful_attempts,
                runtime: Handle::current(),
            },
            driver,
        })
    }

    /// Loggable command line.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn state(&self) -> StageState {
        self.canceller.state()
    }

    /// Non-blocking check for a terminal state.
    pub fn has_ended(&self) -> bool {
        self.canceller.has_ended()
    }

    /// Start escalating cancellation. Idempotent.
    pub fn cancel(&self) {
        self.canceller.cancel();
    }

    /// A handle that can cancel this stage from elsewhere.
    pub fn canceller(&self) -> StageCanceller {
        self.canceller.clone()
    }

    /// Wait for the process to exit and both output streams to drain.
    pub async fn wait(self) -> ProcessResult<StageOutput> {
        match self.driver.await {
            Ok(result) => result,
            Err(e) => Err(ProcessError::TaskFailed(e.to_string())),
        }
    }
}

/// Start `command` and wait for it.
pub async fn run_command(
    command: ToolCommand,
    sink: Arc<dyn StatusSink>,
    options: SupervisorOptions,
) -> ProcessResult<StageOutput> {
    ProcessSupervisor::start(command, sink, options)
        .await?
        .wait()
        .await
}

/// Cancels one supervised stage.
#[derive(Clone)]
pub struct StageCanceller {
    tool: String,
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Terminate>,
    state: watch::Receiver<StageState>,
    sink: Arc<dyn StatusSink>,
    interval: Duration,
    graceful_attempts: u32,
    runtime: Handle,
}

impl StageCanceller {
    pub fn state(&self) -> StageState {
        *self.state.borrow()
    }

    pub fn has_ended(&self) -> bool {
        self.state().is_terminal()
    }

    /// Start escalating cancellation on the runtime that started the stage.
    /// Safe to call from any thread.
    pub fn cancel(&self) {
        if self.shared.cancel_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.has_ended() {
            return;
        }
        info!(tool = %self.tool, "Cancelling command");
        self.runtime.spawn(self.clone().escalate());
    }

    async fn escalate(self) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut state = self.state.clone();
        let mut attempts = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if state.borrow().is_terminal() {
                break;
            }

            if self.shared.alive.load(Ordering::SeqCst) {
                let signal = if attempts < self.graceful_attempts {
                    Terminate::Graceful
                } else {
                    Terminate::Force
                };
                attempts += 1;
                debug!(tool = %self.tool, attempts, ?signal, "Terminating process");
                self.sink.on_output_line("trying to kill process...");
                if self.control.send(signal).is_err() {
                    break;
                }
            } else {
                debug!(tool = %self.tool, "Interrupting supervisor");
                self.sink.on_output_line("interrupting process...");
                self.shared.interrupt.notify_one();
            }
        }
    }
}

struct Driver {
    command: String,
    tool: String,
    started: Instant,
    sink: Arc<dyn StatusSink>,
    shared: Arc<Shared>,
    state: watch::Sender<StageState>,
}

async fn drive(
    mut child: Child,
    driver: Driver,
    mut control: mpsc::UnboundedReceiver<Terminate>,
    mut stdout: JoinHandle<String>,
    mut stderr: JoinHandle<String>,
) -> ProcessResult<StageOutput> {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = control.recv() => terminate(&mut child, signal),
        }
    };
    driver.shared.alive.store(false, Ordering::SeqCst);

    let stdout_abort = stdout.abort_handle();
    let stderr_abort = stderr.abort_handle();
    let drained = tokio::select! {
        (out, err) = async { tokio::join!(&mut stdout, &mut stderr) } => {
            Some((out.unwrap_or_default(), err.unwrap_or_default()))
        }
        _ = driver.shared.interrupt.notified() => {
            warn!(tool = %driver.tool, "Output readers interrupted");
            stdout_abort.abort();
            stderr_abort.abort();
            None
        }
    };
    let (stdout, stderr) = drained.unwrap_or_default();

    let elapsed = driver.started.elapsed();
    let cancelled = driver.shared.cancel_requested.load(Ordering::SeqCst);

    let (state, result) = match status {
        Err(e) => (StageState::Failed, Err(ProcessError::Io(e))),
        Ok(_) if cancelled => (
            StageState::Cancelled,
            Err(ProcessError::Cancelled {
                command: driver.command.clone(),
                elapsed,
            }),
        ),
        Ok(status) if status.success() => (
            StageState::Succeeded,
            Ok(StageOutput {
                exit_code: status.code().unwrap_or(0),
                elapsed,
                stdout,
                stderr,
            }),
        ),
        Ok(status) => (
            StageState::Failed,
            Err(ProcessError::ExitFailure {
                command: driver.command.clone(),
                tool: driver.tool.clone(),
                exit_code: status.code(),
                elapsed,
            }),
        ),
    };

    let millis = elapsed.as_millis();
    let summary = match &result {
        Ok(_) => format!("command {} ok ({} ms)", driver.tool, millis),
        Err(ProcessError::Cancelled { .. }) => {
            format!("command {} cancelled ({} ms)", driver.tool, millis)
        }
        Err(ProcessError::ExitFailure { exit_code, .. }) => format!(
            "command {} error code={} ({} ms)",
            driver.tool,
            exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            millis
        ),
        Err(e) => format!("command {} error ({} ms): {}", driver.tool, millis, e),
    };
    driver
        .sink
        .on_output_line(&format!("{}{}", timestamp(), summary));

    let status_label = match state {
        StageState::Succeeded => "ok",
        StageState::Cancelled => "cancelled",
        _ => "failed",
    };
    record_stage(&driver.tool, status_label, elapsed);
    info!(tool = %driver.tool, elapsed_ms = millis as u64, status = status_label, "Command finished");

    driver.state.send_replace(state);
    result
}

fn terminate(child: &mut Child, signal: Terminate) {
    if let Terminate::Graceful = signal {
        if send_sigterm(child) {
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Kill request failed");
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id().and_then(|pid| i32::try_from(pid).ok()) {
        Some(pid) => kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok(),
        None => false,
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

fn spawn_reader<R>(
    stream: Option<R>,
    tag: String,
    sink: Arc<dyn StatusSink>,
    capture: bool,
) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = String::new();
        let Some(stream) = stream else {
            return captured;
        };

        let mut lines = BufReader::new(stream).split(b'\n');
        loop {
            match lines.next_segment().await {
                Ok(Some(raw)) => {
                    let text = String::from_utf8_lossy(&raw);
                    let text = text.trim_end_matches('\r');
                    sink.on_output_line(&format!("{}{}", tag, text));
                    if capture {
                        captured.push_str(text);
                        captured.push('\n');
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Stopped reading command output");
                    break;
                }
            }
        }
        captured
    })
}

/// Prefix for start and summary lines, e.g. `[Sat Oct 17 2026 10:00:00] `.
pub fn timestamp() -> String {
    chrono::Local::now()
        .format("[%a %b %-d %Y %H:%M:%S] ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!StageState::Idle.is_terminal());
        assert!(!StageState::Running.is_terminal());
        assert!(StageState::Succeeded.is_terminal());
        assert!(StageState::Failed.is_terminal());
        assert!(StageState::Cancelled.is_terminal());
    }

    #[test]
    fn test_options_builder() {
        let options = SupervisorOptions::new()
            .capture_stderr(false)
            .kill_interval(Duration::from_millis(50));
        assert!(options.capture_stdout);
        assert!(!options.capture_stderr);
        assert_eq!(options.kill_interval, Duration::from_millis(50));
        assert_eq!(options.graceful_attempts, DEFAULT_GRACEFUL_ATTEMPTS);
    }

    #[test]
    fn test_timestamp_shape() {
        let stamp = timestamp();
        assert!(stamp.starts_with('['));
        assert!(stamp.ends_with("] "));
    }
}
