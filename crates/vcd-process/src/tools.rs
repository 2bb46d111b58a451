//! The external tools and how to invoke them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::command::{Arg, CommandLine, ToolCommand};
use crate::error::{ProcessError, ProcessResult};
use crate::sink::NoopSink;
use crate::supervisor::{run_command, SupervisorOptions};

/// Every executable the engine knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Creates databases, segmentations and descriptors.
    DatabaseBuilder,
    /// Builds search profiles and runs similarity searches.
    Searcher,
    /// Merges per-vector neighbor lists.
    Merger,
    /// Localizes copies from a neighbor list.
    Localizer,
    /// Plain HTTP download.
    Downloader,
    /// Media extraction from hosting pages.
    MediaExtractor,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::DatabaseBuilder,
        Tool::Searcher,
        Tool::Merger,
        Tool::Localizer,
        Tool::Downloader,
        Tool::MediaExtractor,
    ];

    /// Base executable name.
    pub fn name(self) -> &'static str {
        match self {
            Tool::DatabaseBuilder => "pvcd_db",
            Tool::Searcher => "pvcd_search",
            Tool::Merger => "pvcd_mergeLocalToGlobal",
            Tool::Localizer => "pvcd_detect",
            Tool::Downloader => "wget",
            Tool::MediaExtractor => "youtube-dl",
        }
    }

    /// Whether the tool ships in the P-VCD tools directory.
    pub fn is_pvcd(self) -> bool {
        !matches!(self, Tool::Downloader | Tool::MediaExtractor)
    }

    /// Arguments that print the tool version.
    pub fn version_args(self) -> &'static [&'static str] {
        if self.is_pvcd() {
            &["-version"]
        } else {
            &["--version"]
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Locations and global flags for building tool commands.
#[derive(Debug, Clone)]
pub struct Toolbox {
    tools_dir: PathBuf,
    data_dir: PathBuf,
    wget: PathBuf,
    youtube_dl: PathBuf,
    max_cores: usize,
}

impl Toolbox {
    /// P-VCD tools are looked up in `tools_dir` and run inside `data_dir`.
    pub fn new(tools_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            data_dir: data_dir.into(),
            wget: PathBuf::from("wget"),
            youtube_dl: PathBuf::from("youtube-dl"),
            max_cores: 1,
        }
    }

    pub fn with_wget(mut self, path: impl Into<PathBuf>) -> Self {
        self.wget = path.into();
        self
    }

    pub fn with_youtube_dl(mut self, path: impl Into<PathBuf>) -> Self {
        self.youtube_dl = path.into();
        self
    }

    /// Above 1, every P-VCD invocation gets `-num_cores N`.
    pub fn with_max_cores(mut self, max_cores: usize) -> Self {
        self.max_cores = max_cores;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn max_cores(&self) -> usize {
        self.max_cores
    }

    /// Executable path (or bare name, resolved through `PATH`).
    pub fn executable(&self, tool: Tool) -> PathBuf {
        match tool {
            Tool::Downloader => self.wget.clone(),
            Tool::MediaExtractor => self.youtube_dl.clone(),
            _ => {
                let mut name = tool.name().to_string();
                if cfg!(windows) {
                    name.push_str(".exe");
                }
                self.tools_dir.join(name)
            }
        }
    }

    /// Command for a P-VCD tool, run in the data directory.
    pub fn command(&self, tool: Tool, args: impl Into<Arg>) -> ProcessResult<ToolCommand> {
        self.command_in(tool, args, self.data_dir.clone())
    }

    /// Command for any tool, run in `working_dir`.
    pub fn command_in(
        &self,
        tool: Tool,
        args: impl Into<Arg>,
        working_dir: impl Into<PathBuf>,
    ) -> ProcessResult<ToolCommand> {
        let mut line = CommandLine::new().arg(args);
        if tool.is_pvcd() && self.max_cores > 1 {
            line.push(crate::args!["-num_cores", self.max_cores]);
        }
        line.prepend(program_arg(&self.executable(tool)));
        line.into_command(working_dir)
    }

    /// The `(tool, version command)` pairs run by [`Toolbox::check_tools`].
    pub fn version_checks(&self) -> ProcessResult<Vec<(Tool, ToolCommand)>> {
        Tool::ALL
            .iter()
            .map(|&tool| {
                let working_dir = if tool.is_pvcd() {
                    self.data_dir.clone()
                } else {
                    std::env::temp_dir()
                };
                let command = self.command_in(tool, tool.version_args(), working_dir)?;
                Ok((tool, command))
            })
            .collect()
    }

    /// Resolve a tool to an existing executable.
    pub fn locate(&self, tool: Tool) -> ProcessResult<PathBuf> {
        let executable = self.executable(tool);
        if is_bare_name(&executable) {
            return which::which(&executable)
                .map_err(|_| ProcessError::tool_not_found(tool.name(), executable));
        }
        if executable.is_file() {
            Ok(executable)
        } else {
            Err(ProcessError::tool_not_found(tool.name(), executable))
        }
    }

    /// Run every version check; the first failure is returned.
    pub async fn check_tools(&self) -> ProcessResult<()> {
        for (tool, command) in self.version_checks()? {
            let checked = async {
                let path = self.locate(tool)?;
                debug!(tool = %tool, path = %path.display(), "Checking tool");
                run_command(command, Arc::new(NoopSink), SupervisorOptions::default()).await
            };
            checked.await.map_err(|source| ProcessError::ToolCheck {
                tool: tool.name().to_string(),
                source: Box::new(source),
            })?;
            info!(tool = %tool, "Tool OK");
        }
        Ok(())
    }
}

fn is_bare_name(path: &Path) -> bool {
    path.components().count() == 1 && path.parent().map_or(true, |p| p.as_os_str().is_empty())
}

/// Bare names stay bare so the OS searches `PATH`; anything else is made absolute.
fn program_arg(path: &Path) -> Arg {
    if is_bare_name(path) {
        Arg::Text(path.to_string_lossy().into_owned())
    } else {
        Arg::Path(path.to_path_buf())
    }
}
