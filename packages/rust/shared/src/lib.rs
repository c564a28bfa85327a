//! Shared types, error model, and configuration for tenderwatch.
//!
//! This crate is the foundation depended on by all other tenderwatch crates.
//! It provides:
//! - [`TenderwatchError`]: the unified error type
//! - Domain types ([`SourceDescriptor`], [`ExtractedRecord`], [`NormalizedTender`], [`RunResult`])
//! - Configuration ([`AppConfig`], [`SourceRegistry`], [`FetchOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_USER_AGENT, DefaultsConfig, FetchOptions, RejectedSource, SourceEntry,
    SourceRegistry, config_dir, config_file_path, init_config, init_config_at, load_config,
    load_config_from,
};
pub use error::{Result, TenderwatchError};
pub use types::{
    ExtractedRecord, NormalizedTender, OrganisationKind, RawPage, RunResult, RunStatus,
    SourceDescriptor, SourceStats, Strategy, TagRule, TagRules,
};
