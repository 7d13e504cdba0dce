//! SFX Translator - translate sound effect file names with LLM providers
//!
//! Entries of a mapping file are grouped by naming prefix, sent to a chat
//! completion provider (synchronously or as a bulk batch job) and merged back
//! with a checkpoint after every unit of work.

#![forbid(unsafe_code)]

pub mod cli;
pub mod core;
pub mod processors;
pub mod utils;

// Re-export key types for convenience
pub use core::{
    client::TranslationClient,
    config::AppSettings,
    errors::{Result, TranslationError},
    models::{Batch, Mapping, MappingEntry},
    registry::{ProviderConfig, ProviderRegistry},
};

pub use processors::orchestrator::{Orchestrator, RunOptions, RunOutcome, TranslationContext};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
