//! Animate Publish - Export Rewriter
//!
//! Rewrites JavaScript exported by Adobe Animate so the simulation can pick
//! colors and figure layers at runtime.
//!
//! # Ground Rules
//! 1. Text In, Text Out
//! 2. Every Rule Runs Once, In Order
//! 3. The Marker Is The Only State
//! 4. The Library Never Prints Or Exits

#[macro_use]
mod macros;

pub mod config;
pub mod rules;
pub mod hashing;
pub mod pipeline;

pub use config::{AlreadyPublishedPolicy, ExportVariant, PaletteConfig, PublishOptions, UnmatchedPolicy};
pub use rules::{DocumentContext, Rewrite, RewriteRule};
pub use hashing::sha256_hex;
pub use pipeline::{
    is_published, backup_path, PipelineError, PublishOutcome, PublishPipeline, PublishReport,
    PublishedDocument, RuleOutcome,
};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PUBLICATION_MARKER: &str = "// Published.";
