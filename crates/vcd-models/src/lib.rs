//! Shared data models for the video copy detection engine.
//!
//! This crate provides:
//! - Media objects and the database manifest parser
//! - Media databases keyed by canonical path
//! - Detected copies
//! - Pipeline options and presets
//! - Timecode parsing/formatting

pub mod database;
pub mod detection;
pub mod media;
pub mod options;
pub mod timecode;

// Re-export common types
pub use database::MediaDatabase;
pub use detection::DetectedCopy;
pub use media::{has_media_extension, ManifestError, MediaKind, MediaObject, MANIFEST_FILE};
pub use options::{
    DescriptorOptions, LocalizationOptions, PipelineOptions, Preset, SearchMode, SearchOptions,
};
pub use timecode::{format_hhmmss, format_mmss, parse_timecode, TimecodeError};
