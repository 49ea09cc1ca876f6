//! Publish Pipeline - Single Entry Point
//!
//! CRITICAL: the marker check runs before any rule. A document is rewritten
//! at most once unless the caller forces it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AlreadyPublishedPolicy, ExportVariant, PaletteConfig, PublishOptions, UnmatchedPolicy};
use crate::hashing::sha256_hex;
use crate::rules::{build_rules, DocumentContext, RewriteRule};
use crate::{ENGINE_VERSION, PUBLICATION_MARKER};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No file specified.")]
    NoFileSpecified,

    #[error("File must be of type '.js': {}", .0.display())]
    UnsupportedFileType(PathBuf),

    #[error("File already marked as published.")]
    AlreadyPublished,

    #[error("Rule '{0}' found nothing to rewrite")]
    RuleUnmatched(&'static str),

    #[error("Palette config requires engine >= {0}, current is {1}")]
    EngineVersionMismatch(String, String),

    #[error("Invalid palette config: {0}")]
    InvalidConfig(String),

    #[error("Invalid rule pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub replacements: usize,
}

/// A rewritten document, still in memory.
#[derive(Debug, Clone)]
pub struct PublishedDocument {
    pub text: String,
    pub rules: Vec<RuleOutcome>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub path: PathBuf,
    pub file_stem: String,
    pub variant: ExportVariant,
    pub rules: Vec<RuleOutcome>,
    pub backup: Option<PathBuf>,
    pub input_sha256: String,
    pub output_sha256: String,
    pub engine_version: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PublishOutcome {
    Published(PublishReport),
    /// Already published; left untouched under `AlreadyPublishedPolicy::Skip`.
    Skipped { path: PathBuf },
}

/// True if the document starts or ends with the publication marker.
pub fn is_published(document: &str) -> bool {
    document.starts_with(PUBLICATION_MARKER) || document.ends_with(PUBLICATION_MARKER)
}

fn strip_marker(document: &str) -> &str {
    let mut rest = document;
    if let Some(tail) = rest.strip_prefix(PUBLICATION_MARKER) {
        rest = tail.strip_prefix("\r\n").or_else(|| tail.strip_prefix('\n')).unwrap_or(tail);
    }
    if let Some(head) = rest.strip_suffix(PUBLICATION_MARKER) {
        rest = head.strip_suffix("\r\n").or_else(|| head.strip_suffix('\n')).unwrap_or(head);
    }
    rest
}

/// Sibling `<stem>.orig.js` next to the export.
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    path.with_file_name(format!("{}.orig.js", stem))
}

fn check_extension(path: &Path) -> Result<(), PipelineError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") => Ok(()),
        _ => Err(PipelineError::UnsupportedFileType(path.to_path_buf())),
    }
}

/// The publish pipeline - a fixed, ordered rule list
pub struct PublishPipeline {
    options: PublishOptions,
    rules: Vec<Box<dyn RewriteRule>>,
}

impl PublishPipeline {
    pub fn new(palette: &PaletteConfig, options: PublishOptions) -> Result<Self, PipelineError> {
        check_engine_version(palette)?;

        let problems = palette.validate();
        if !problems.is_empty() {
            return Err(PipelineError::InvalidConfig(problems.join("; ")));
        }

        let rules = build_rules(palette, options.variant, options.remap_asset_path)?;
        Ok(Self { options, rules })
    }

    pub fn options(&self) -> &PublishOptions {
        &self.options
    }

    /// Rule names in application order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Rewrite one document in memory.
    ///
    /// `file_stem` keys the composition lookup entry. Fails with
    /// `AlreadyPublished` unless `force` is set; a forced document loses its
    /// old marker so the result carries exactly one.
    pub fn publish_document(&self, document: &str, file_stem: &str) -> Result<PublishedDocument, PipelineError> {
        let source = if is_published(document) {
            if !self.options.force {
                return Err(PipelineError::AlreadyPublished);
            }
            strip_marker(document)
        } else {
            document
        };

        let ctx = DocumentContext::new(file_stem, source);
        let mut text = source.to_string();
        let mut outcomes = Vec::with_capacity(self.rules.len());

        for rule in &self.rules {
            let rewrite = rule.apply(&text, &ctx);
            debug!(rule = rule.name(), replacements = rewrite.replacements, "applied rule");
            if rewrite.replacements == 0 {
                self.handle_unmatched(rule.name(), file_stem)?;
            }
            outcomes.push(RuleOutcome {
                rule: rule.name().to_string(),
                replacements: rewrite.replacements,
            });
            text = rewrite.text;
        }

        text.push_str(ctx.line_ending);
        text.push_str(PUBLICATION_MARKER);

        Ok(PublishedDocument { text, rules: outcomes })
    }

    /// Read, rewrite, optionally back up, and write one export in place.
    ///
    /// The extension is checked before any I/O. Nothing is written unless
    /// the rewrite succeeds.
    #[tracing::instrument(skip(self, path), fields(path = %path.display()))]
    pub fn publish_file(&self, path: &Path) -> Result<PublishOutcome, PipelineError> {
        check_extension(path)?;

        let original = fs::read_to_string(path)?;

        if is_published(&original) && !self.options.force {
            match self.options.on_already_published {
                AlreadyPublishedPolicy::Fail => return Err(PipelineError::AlreadyPublished),
                AlreadyPublishedPolicy::Skip => {
                    warn!("already published, skipping");
                    return Ok(PublishOutcome::Skipped { path: path.to_path_buf() });
                }
            }
        }

        let file_stem = path.file_stem().unwrap_or_default().to_string_lossy().into_owned();
        let published = self.publish_document(&original, &file_stem)?;

        let backup = if self.options.backup {
            let target = backup_path(path);
            fs::copy(path, &target)?;
            debug!(backup = %target.display(), "wrote backup");
            Some(target)
        } else {
            None
        };

        fs::write(path, &published.text)?;
        info!("published");

        Ok(PublishOutcome::Published(PublishReport {
            path: path.to_path_buf(),
            file_stem,
            variant: self.options.variant,
            rules: published.rules,
            backup,
            input_sha256: sha256_hex(original.as_bytes()),
            output_sha256: sha256_hex(published.text.as_bytes()),
            engine_version: ENGINE_VERSION.to_string(),
            published_at: Utc::now(),
        }))
    }

    fn handle_unmatched(&self, rule: &'static str, file_stem: &str) -> Result<(), PipelineError> {
        match self.options.on_unmatched {
            UnmatchedPolicy::Ignore => Ok(()),
            UnmatchedPolicy::Warn => {
                warn!(rule, file_stem, "rule found nothing to rewrite");
                Ok(())
            }
            UnmatchedPolicy::Fail => Err(PipelineError::RuleUnmatched(rule)),
        }
    }
}

fn check_engine_version(palette: &PaletteConfig) -> Result<(), PipelineError> {
    let engine_ver = semver::Version::parse(ENGINE_VERSION)
        .map_err(|_| PipelineError::InvalidConfig("Invalid engine version".into()))?;
    let min_ver = semver::Version::parse(&palette.engine_min_version)
        .map_err(|_| PipelineError::InvalidConfig(format!("Invalid engineMinVersion '{}'", palette.engine_min_version)))?;

    if engine_ver < min_ver {
        return Err(PipelineError::EngineVersionMismatch(
            palette.engine_min_version.clone(),
            ENGINE_VERSION.to_string(),
        ));
    }

    Ok(())
}
