//! Video copy detection engine.
//!
//! This crate provides:
//! - The staged copy detection pipeline with progress and cancellation
//! - The registry of reference and query databases
//! - Query acquisition from files and URLs
//! - Detections parsing and ranking
//! - Configuration, errors and run logging

pub mod acquire;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod results;
pub mod runner;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorKind};
pub use ingest::{build_reference_database, content_id};
pub use logging::{init_tracing, RunLogger};
pub use pipeline::{CopyDetectionPipeline, DetectionRequest, PipelineHandle, QuerySource};
pub use progress::ProgressTracker;
pub use registry::DatabaseRegistry;
pub use results::{parse_detections, rank_detections, read_detections};
pub use runner::{RunControl, StageRunner};
