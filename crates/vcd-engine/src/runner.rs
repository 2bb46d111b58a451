//! Sequential stage execution with run-wide cancellation.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::debug;
use vcd_process::{
    Arg, ProcessSupervisor, StageCanceller, StageOutput, StatusSink, SupervisorOptions, Tool,
    ToolCommand, Toolbox,
};

use crate::error::{EngineError, EngineResult};

/// Cancellation state shared by one pipeline run and its handle.
pub struct RunControl {
    cancelled: watch::Sender<bool>,
    current: Mutex<Option<StageCanceller>>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            cancelled: watch::channel(false).0,
            current: Mutex::new(None),
        }
    }

    /// Stop the current stage and refuse to start further ones.
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stage) = current.as_ref() {
            stage.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Receiver that flips to `true` on cancellation.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.cancelled.subscribe()
    }

    fn set_current(&self, stage: Option<StageCanceller>) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = stage;
    }
}

/// Runs tool commands one after another for a single run.
#[derive(Clone)]
pub struct StageRunner {
    toolbox: Toolbox,
    options: SupervisorOptions,
    sink: Arc<dyn StatusSink>,
    control: Arc<RunControl>,
}

impl StageRunner {
    pub fn new(
        toolbox: Toolbox,
        options: SupervisorOptions,
        sink: Arc<dyn StatusSink>,
        control: Arc<RunControl>,
    ) -> Self {
        Self {
            toolbox,
            options,
            sink,
            control,
        }
    }

    pub fn toolbox(&self) -> &Toolbox {
        &self.toolbox
    }

    pub fn sink(&self) -> &Arc<dyn StatusSink> {
        &self.sink
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    /// Fail with [`EngineError::Cancelled`] once the run was cancelled.
    pub fn check_cancelled(&self) -> EngineResult<()> {
        if self.control.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Run a P-VCD tool in the data directory.
    pub async fn tool(&self, tool: Tool, args: impl Into<Arg>) -> EngineResult<StageOutput> {
        let command = self.toolbox.command(tool, args)?;
        self.run(command).await
    }

    /// Run any tool in `working_dir`.
    pub async fn tool_in(
        &self,
        tool: Tool,
        args: impl Into<Arg>,
        working_dir: impl Into<PathBuf>,
    ) -> EngineResult<StageOutput> {
        let command = self.toolbox.command_in(tool, args, working_dir)?;
        self.run(command).await
    }

    /// Run one command to completion.
    pub async fn run(&self, command: ToolCommand) -> EngineResult<StageOutput> {
        self.check_cancelled()?;

        let supervisor =
            ProcessSupervisor::start(command, self.sink.clone(), self.options.clone()).await?;
        self.control.set_current(Some(supervisor.canceller()));
        // A cancel that raced the start saw no current stage.
        if self.control.is_cancelled() {
            debug!("Run cancelled while starting {}", supervisor.command());
            supervisor.cancel();
        }

        let result = supervisor.wait().await;
        self.control.set_current(None);
        Ok(result?)
    }
}
