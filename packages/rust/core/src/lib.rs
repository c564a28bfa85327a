//! Core ingestion logic for tenderwatch.
//!
//! This crate ties together listing pagination, record extraction, tag
//! classification and deduplicated persistence into single-source and
//! multi-source runs.

pub mod pipeline;
pub mod progress;
pub mod tags;
pub mod writer;

pub use pipeline::{RunContext, run_all, run_source};
pub use progress::{
    ChannelProgress, ProgressEvent, ProgressMessage, ProgressReporter, SilentProgress,
    SourceSummary,
};
pub use writer::{DedupWriter, WriteOutcome};
