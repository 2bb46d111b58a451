//! Command building and process supervision for the P-VCD tools.
//!
//! This crate provides:
//! - Heterogeneous argument flattening into immutable commands
//! - Asynchronous supervision with streamed output and escalating cancellation
//! - The tool catalogue and a version self-check
//! - Stage metrics through the `metrics` facade

pub mod command;
pub mod error;
pub mod metrics;
pub mod sink;
pub mod supervisor;
pub mod tools;

pub use command::{Arg, CommandLine, ToolCommand};
pub use error::{ProcessError, ProcessResult};
pub use sink::{NoopSink, StatusSink, TracingSink};
pub use supervisor::{
    run_command, ProcessSupervisor, StageCanceller, StageOutput, StageState, SupervisorOptions,
};
pub use tools::{Tool, Toolbox};
