//! Shared types, error model, and configuration for finsource.
//!
//! This crate is the foundation depended on by all other finsource crates.
//! It provides:
//! - [`FinSourceError`] and [`ModelError`]: the error taxonomy
//! - Domain types ([`CompanyTask`], [`Answer`], [`Verdict`], [`CompanyResult`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, ModelConfig, RunConfig, ScraperConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{FinSourceError, ModelError, Result};
pub use types::{
    Answer, CompanyResult, CompanyTask, NO_ANSWER_FEEDBACK, OutputRecord, Reachability,
    ReferenceContext, RunId, TerminationReason, Verdict, VerdictOrigin,
};
