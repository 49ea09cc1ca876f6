//! Configuration - Palette Table and Publish Policies

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::pipeline::PipelineError;

/// Which export dialect the rewritten document targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportVariant {
    /// One palette, aliased locally as `this.assetPalette`.
    #[default]
    Aliased,
    /// N palettes, addressed by indices embedded in `#C0PPSS` literals.
    Indexed,
}

impl ExportVariant {
    /// Cached bitmap prefix the simulation serves `images/` from.
    pub fn cache_prefix(&self) -> &'static str {
        match self {
            Self::Aliased => "assets/cached/",
            Self::Indexed => "assets/cache/",
        }
    }
}

/// What to do when a rule finds nothing to rewrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedPolicy {
    #[default]
    Ignore,
    Warn,
    Fail,
}

/// What `publish_file` does with a file that already carries the marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlreadyPublishedPolicy {
    #[default]
    Fail,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOptions {
    #[serde(default)]
    pub variant: ExportVariant,
    #[serde(default)]
    pub force: bool,
    #[serde(default = "default_true")]
    pub backup: bool,
    #[serde(default = "default_true")]
    pub remap_asset_path: bool,
    #[serde(default)]
    pub on_unmatched: UnmatchedPolicy,
    #[serde(default)]
    pub on_already_published: AlreadyPublishedPolicy,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            variant: ExportVariant::default(),
            force: false,
            backup: true,
            remap_asset_path: true,
            on_unmatched: UnmatchedPolicy::default(),
            on_already_published: AlreadyPublishedPolicy::default(),
        }
    }
}

fn default_true() -> bool { true }

/// Palette table - which literals become palette references
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaletteConfig {
    #[serde(default = "default_engine_min_version")]
    pub engine_min_version: String,
    /// Number of figures whose layers get visibility gates.
    #[serde(default = "default_figures")]
    pub figures: u32,
    /// Global the aliased variant binds to `this.assetPalette`.
    #[serde(default = "default_palette_global")]
    pub palette_global: String,
    /// Global table the indexed variant reads from.
    #[serde(default = "default_palette_table")]
    pub palette_table: String,
    /// Hex literal -> palette slot name.
    #[serde(default = "default_colors")]
    pub colors: BTreeMap<String, String>,
}

fn default_engine_min_version() -> String { crate::ENGINE_VERSION.to_string() }
fn default_figures() -> u32 { 2 }
fn default_palette_global() -> String { "avatarPalette".to_string() }
fn default_palette_table() -> String { "assetPalettes".to_string() }

fn default_colors() -> BTreeMap<String, String> {
    [
        ("#666600", "eyeA"),
        ("#663300", "hairA"),
        ("#FFCC99", "skinA"),
        ("#F49E50", "skinB"),
        ("#E5CCFF", "outfitA"),
        ("#70618D", "outfitB"),
    ]
    .into_iter()
    .map(|(color, slot)| (color.to_string(), slot.to_string()))
    .collect()
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            engine_min_version: default_engine_min_version(),
            figures: default_figures(),
            palette_global: default_palette_global(),
            palette_table: default_palette_table(),
            colors: default_colors(),
        }
    }
}

impl PaletteConfig {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Problems that would make the emitted JavaScript invalid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = vec![];

        for name in [&self.palette_global, &self.palette_table] {
            if !is_identifier(name) {
                problems.push(format!("'{}' is not a JavaScript identifier", name));
            }
        }

        for (color, slot) in &self.colors {
            if !regex!(r"^#[0-9A-Fa-f]{6}$").is_match(color) {
                problems.push(format!("'{}' is not a #RRGGBB color", color));
            }
            if !is_identifier(slot) {
                problems.push(format!("slot '{}' for {} is not a JavaScript identifier", slot, color));
            }
        }

        problems
    }
}

fn is_identifier(name: &str) -> bool {
    regex!(r"^[A-Za-z_$][A-Za-z0-9_$]*$").is_match(name)
}
