//! Rewrite Rules - Ordered Text Substitutions
//!
//! Rules are pure: document in, document out, plus a replacement count.
//! The pipeline decides what a zero count means.

use regex::{Captures, Regex};

use crate::config::{ExportVariant, PaletteConfig};

/// Per-document facts a rule may need.
#[derive(Debug, Clone, Copy)]
pub struct DocumentContext<'a> {
    /// File name without the `.js` extension.
    pub file_stem: &'a str,
    /// `"\r\n"` or `"\n"`, whichever the export uses.
    pub line_ending: &'static str,
}

impl<'a> DocumentContext<'a> {
    pub fn new(file_stem: &'a str, document: &str) -> Self {
        Self { file_stem, line_ending: line_ending_of(document) }
    }
}

/// An export containing any CRLF is treated as CRLF throughout.
pub fn line_ending_of(document: &str) -> &'static str {
    if document.contains("\r\n") { "\r\n" } else { "\n" }
}

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub text: String,
    pub replacements: usize,
}

impl Rewrite {
    fn unchanged(document: &str) -> Self {
        Self { text: document.to_string(), replacements: 0 }
    }
}

/// Rewrite rule trait - produces the next document state
pub trait RewriteRule {
    fn name(&self) -> &'static str;
    fn apply(&self, document: &str, ctx: &DocumentContext<'_>) -> Rewrite;
}

/// Expression the generated conditions read the active selection from.
fn selection_expr(variant: ExportVariant, palette: &PaletteConfig) -> String {
    match variant {
        ExportVariant::Aliased => "this.assetPalette".to_string(),
        ExportVariant::Indexed => format!("{}.selected", palette.palette_table),
    }
}

/// Builds the rule list for one variant, in application order.
pub fn build_rules(
    palette: &PaletteConfig,
    variant: ExportVariant,
    remap_asset_path: bool,
) -> Result<Vec<Box<dyn RewriteRule>>, regex::Error> {
    let mut rules: Vec<Box<dyn RewriteRule>> = vec![];

    match variant {
        ExportVariant::Aliased => {
            rules.push(Box::new(PaletteAliasRule::new(&palette.palette_global)));
            rules.push(Box::new(PaletteColorRule::new(palette)));
        }
        ExportVariant::Indexed => {
            rules.push(Box::new(IndexedColorRule::new(&palette.palette_table)));
        }
    }

    rules.push(Box::new(LayerVisibilityRule::new(
        palette.figures,
        &selection_expr(variant, palette),
    )?));

    if remap_asset_path {
        rules.push(Box::new(AssetPathRule::new(variant.cache_prefix())));
    }

    rules.push(Box::new(FileIdLookupRule));

    Ok(rules)
}

// --- Concrete Rules ---

/// Binds `this.assetPalette` at the top of the stage constructor.
///
/// A document that already binds it is left alone and counts as a match.
pub struct PaletteAliasRule {
    statement: String,
}

impl PaletteAliasRule {
    pub fn new(palette_global: &str) -> Self {
        Self { statement: format!("this.assetPalette = {};", palette_global) }
    }
}

impl RewriteRule for PaletteAliasRule {
    fn name(&self) -> &'static str { "palette_alias" }

    fn apply(&self, document: &str, ctx: &DocumentContext<'_>) -> Rewrite {
        let existing = document.matches(self.statement.as_str()).count();
        if existing > 0 {
            return Rewrite { text: document.to_string(), replacements: existing };
        }

        let nl = ctx.line_ending;
        let mut replacements = 0;
        let text = regex!(r"(?mR)^// stage content:\r?\n.*function\(mode,startPosition,loop.*\).*$")
            .replace_all(document, |caps: &Captures| {
                replacements += 1;
                format!("{}{}{}{}", &caps[0], nl, self.statement, nl)
            })
            .into_owned();
        Rewrite { text, replacements }
    }
}

/// Swaps fixed fill literals for `this.assetPalette.<slot>`.
pub struct PaletteColorRule {
    substitutions: Vec<(String, String)>,
}

impl PaletteColorRule {
    pub fn new(palette: &PaletteConfig) -> Self {
        let substitutions = palette
            .colors
            .iter()
            .map(|(color, slot)| {
                (
                    format!("graphics.f(\"{}\").s()", color),
                    format!("graphics.f(this.assetPalette.{}).s()", slot),
                )
            })
            .collect();
        Self { substitutions }
    }
}

impl RewriteRule for PaletteColorRule {
    fn name(&self) -> &'static str { "palette_colors" }

    fn apply(&self, document: &str, _ctx: &DocumentContext<'_>) -> Rewrite {
        let mut rewrite = Rewrite::unchanged(document);
        for (literal, reference) in &self.substitutions {
            let count = rewrite.text.matches(literal.as_str()).count();
            if count > 0 {
                rewrite.text = rewrite.text.replace(literal.as_str(), reference);
                rewrite.replacements += count;
            }
        }
        rewrite
    }
}

/// Swaps `#C0PPSS` fill literals for `<table>[PP][SS]`.
pub struct IndexedColorRule {
    table: String,
}

impl IndexedColorRule {
    pub fn new(table: &str) -> Self {
        Self { table: table.to_string() }
    }
}

fn trim_index(digits: &str) -> &str {
    match digits.trim_start_matches('0') {
        "" => "0",
        trimmed => trimmed,
    }
}

impl RewriteRule for IndexedColorRule {
    fn name(&self) -> &'static str { "indexed_palette_colors" }

    fn apply(&self, document: &str, _ctx: &DocumentContext<'_>) -> Rewrite {
        let mut replacements = 0;
        let text = regex!(r##"graphics\.f\("#[Cc]0([0-9]{2})([0-9]{2})"\)\.s\(\)"##)
            .replace_all(document, |caps: &Captures| {
                replacements += 1;
                format!(
                    "graphics.f({}[{}][{}]).s()",
                    self.table,
                    trim_index(&caps[1]),
                    trim_index(&caps[2])
                )
            })
            .into_owned();
        Rewrite { text, replacements }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LayerKind {
    Avatar,
    Hair,
    Eyes,
}

struct LayerGate {
    figure: u32,
    kind: LayerKind,
    pattern: Regex,
}

/// Gates tagged figure layers on the active palette selection.
///
/// Every pattern has the same shape: group 1 runs from the tag comment up to
/// the nearest line containing `addTween`, group 2 is the tag suffix (rest of
/// line for avatars, variant index for hair and eyes), group 3 is that line
/// up to `addTween`. The condition goes between groups 1 and 3.
///
/// An avatar tag whose suffix contains `accessory` in any case
/// (`figure0avatar_accessory`, `figure0avatarAccessory`) is never gated by
/// figure alone; scanning resumes right after its tag line. A registration
/// line already carrying the same condition is not gated twice.
pub struct LayerVisibilityRule {
    gates: Vec<LayerGate>,
    selection: String,
}

impl LayerVisibilityRule {
    pub fn new(figures: u32, selection: &str) -> Result<Self, regex::Error> {
        let mut gates = vec![];
        for figure in 0..figures {
            gates.push(LayerGate {
                figure,
                kind: LayerKind::Avatar,
                pattern: Regex::new(&format!(
                    r"(?mR)(// figure{}avatar([^\n]*)(?s:.*?))(^[^\n]*addTween)",
                    figure
                ))?,
            });
            for (kind, feature) in [(LayerKind::Hair, "hair"), (LayerKind::Eyes, "eyes")] {
                gates.push(LayerGate {
                    figure,
                    kind,
                    pattern: Regex::new(&format!(
                        r"(?mR)(// figure{}{}([0-9]+)(?s:.*?))(^[^\n]*addTween)",
                        figure, feature
                    ))?,
                });
            }
        }
        Ok(Self { gates, selection: selection.to_string() })
    }

    fn gate(&self, gate: &LayerGate, text: &str) -> Rewrite {
        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        let mut replacements = 0;

        while let Some(caps) = gate.pattern.captures_at(text, pos) {
            let (Some(head), Some(tag), Some(line)) = (caps.get(1), caps.get(2), caps.get(3)) else {
                break;
            };

            if gate.kind == LayerKind::Avatar && is_accessory(tag.as_str()) {
                out.push_str(&text[pos..tag.end()]);
                pos = tag.end();
                continue;
            }

            let guard = format!("if ({})", self.condition(gate, tag.as_str()));
            out.push_str(&text[pos..head.end()]);
            if !line.as_str().starts_with(&guard) {
                out.push_str(&guard);
            }
            out.push_str(line.as_str());
            pos = line.end();
            replacements += 1;
        }

        out.push_str(&text[pos..]);
        Rewrite { text: out, replacements }
    }

    fn condition(&self, gate: &LayerGate, variant: &str) -> String {
        let sel = &self.selection;
        match gate.kind {
            LayerKind::Avatar => format!("{}.figure == {}", sel, gate.figure),
            LayerKind::Hair => format!("{}.figure == {} && {}.hair == {}", sel, gate.figure, sel, variant),
            LayerKind::Eyes => format!("{}.figure == {} && {}.eyes == {}", sel, gate.figure, sel, variant),
        }
    }
}

fn is_accessory(tag_suffix: &str) -> bool {
    tag_suffix.to_ascii_lowercase().contains("accessory")
}

impl RewriteRule for LayerVisibilityRule {
    fn name(&self) -> &'static str { "layer_visibility" }

    fn apply(&self, document: &str, _ctx: &DocumentContext<'_>) -> Rewrite {
        let mut rewrite = Rewrite::unchanged(document);
        for gate in &self.gates {
            let gated = self.gate(gate, &rewrite.text);
            rewrite.text = gated.text;
            rewrite.replacements += gated.replacements;
        }
        rewrite
    }
}

/// Points cached bitmap references at the simulation's asset layout.
pub struct AssetPathRule {
    from: &'static str,
    to: String,
}

impl AssetPathRule {
    pub fn new(prefix: &str) -> Self {
        Self { from: "\"images/", to: format!("\"{}", prefix) }
    }
}

impl RewriteRule for AssetPathRule {
    fn name(&self) -> &'static str { "asset_path" }

    fn apply(&self, document: &str, _ctx: &DocumentContext<'_>) -> Rewrite {
        Rewrite {
            text: document.replace(self.from, &self.to),
            replacements: document.matches(self.from).count(),
        }
    }
}

/// Registers `FILE_TO_ID[<stem>]` right before the namespace wiring call.
///
/// Emitted once per file: an entry already present counts as a match.
pub struct FileIdLookupRule;

impl RewriteRule for FileIdLookupRule {
    fn name(&self) -> &'static str { "file_id_lookup" }

    fn apply(&self, document: &str, ctx: &DocumentContext<'_>) -> Rewrite {
        // A JSON string literal is also a valid JS string literal.
        let key = serde_json::Value::String(ctx.file_stem.to_string()).to_string();
        let entry = format!("FILE_TO_ID[{}] = lib.properties.id;", key);
        let existing = document.matches(entry.as_str()).count();
        if existing > 0 {
            return Rewrite { text: document.to_string(), replacements: existing };
        }

        let nl = ctx.line_ending;
        let mut replacements = 0;
        let text = regex!(r"(?mR)^\}\)\(createjs = createjs\|\|\{\}, AdobeAn = AdobeAn\|\|\{\}\);$")
            .replace_all(document, |caps: &Captures| {
                replacements += 1;
                format!("{}FILE_TO_ID = window.FILE_TO_ID || {{}}; {}{}{}", nl, entry, nl, &caps[0])
            })
            .into_owned();
        Rewrite { text, replacements }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: DocumentContext<'static> = DocumentContext { file_stem: "walk", line_ending: "\n" };

    fn aliased_layers() -> LayerVisibilityRule {
        LayerVisibilityRule::new(2, "this.assetPalette").unwrap()
    }

    #[test]
    fn test_alias_follows_stage_constructor() {
        let doc = "// stage content:\n(lib.walk = function(mode,startPosition,loop,reversed) {\n\tthis.initialize();\n";
        let rewrite = PaletteAliasRule::new("avatarPalette").apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 1);
        assert_eq!(
            rewrite.text,
            "// stage content:\n(lib.walk = function(mode,startPosition,loop,reversed) {\nthis.assetPalette = avatarPalette;\n\n\tthis.initialize();\n"
        );
    }

    #[test]
    fn test_alias_needs_stage_comment() {
        let doc = "(lib.walk = function(mode,startPosition,loop,reversed) {\n";
        let rewrite = PaletteAliasRule::new("avatarPalette").apply(doc, &CTX);
        assert_eq!(rewrite.replacements, 0);
        assert_eq!(rewrite.text, doc);
    }

    #[test]
    fn test_colors_replace_every_occurrence() {
        let doc = concat!(
            "this.shape.graphics.f(\"#FFCC99\").s().p(\"A\");\n",
            "this.shape_1.graphics.f(\"#FFCC99\").s().p(\"B\");\n",
            "this.shape_2.graphics.f(\"#663300\").s().p(\"C\");\n",
            "this.shape_3.graphics.f(\"#123456\").s().p(\"D\");\n",
        );
        let rewrite = PaletteColorRule::new(&PaletteConfig::default()).apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 3);
        assert_eq!(rewrite.text.matches("this.assetPalette.skinA").count(), 2);
        assert!(rewrite.text.contains("graphics.f(this.assetPalette.hairA).s()"));
        assert!(rewrite.text.contains("graphics.f(\"#123456\").s()"));
    }

    #[test]
    fn test_colors_only_match_fill_then_stroke_call() {
        let doc = "this.shape.graphics.f(\"#FFCC99\").p(\"A\");\n";
        let rewrite = PaletteColorRule::new(&PaletteConfig::default()).apply(doc, &CTX);
        assert_eq!(rewrite.replacements, 0);
    }

    #[test]
    fn test_indexed_colors_use_embedded_indices() {
        let doc = "a.graphics.f(\"#C00102\").s();\nb.graphics.f(\"#c01000\").s();\nc.graphics.f(\"#CC0102\").s();\n";
        let rewrite = IndexedColorRule::new("assetPalettes").apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 2);
        assert!(rewrite.text.contains("a.graphics.f(assetPalettes[1][2]).s();"));
        assert!(rewrite.text.contains("b.graphics.f(assetPalettes[10][0]).s();"));
        assert!(rewrite.text.contains("c.graphics.f(\"#CC0102\").s();"));
    }

    #[test]
    fn test_avatar_gate_prefixes_nearest_registration() {
        let doc = concat!(
            "\t// figure0avatar\n",
            "\tthis.shape = new cjs.Shape();\n",
            "\tthis.timeline.addTween(cjs.Tween.get(this.shape).wait(1));\n",
            "\tthis.timeline.addTween(cjs.Tween.get(this.other).wait(1));\n",
        );
        let rewrite = aliased_layers().apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 1);
        assert_eq!(
            rewrite.text,
            concat!(
                "\t// figure0avatar\n",
                "\tthis.shape = new cjs.Shape();\n",
                "if (this.assetPalette.figure == 0)\tthis.timeline.addTween(cjs.Tween.get(this.shape).wait(1));\n",
                "\tthis.timeline.addTween(cjs.Tween.get(this.other).wait(1));\n",
            )
        );
    }

    #[test]
    fn test_adjacent_blocks_gate_independently() {
        let doc = concat!(
            "// figure1avatar\n",
            "a.addTween(x);\n",
            "// figure1avatar\n",
            "b.addTween(y);\n",
        );
        let rewrite = aliased_layers().apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 2);
        for line in rewrite.text.lines().filter(|l| l.contains("addTween")) {
            assert_eq!(line.matches("if (").count(), 1, "line gated more than once: {line}");
            assert!(line.starts_with("if (this.assetPalette.figure == 1)"));
        }
    }

    #[test]
    fn test_accessory_layer_not_gated_by_figure() {
        let doc = "// figure0avatar accessory\nhat.addTween(x);\n";
        let rewrite = aliased_layers().apply(doc, &CTX);
        assert_eq!(rewrite.replacements, 0);
        assert_eq!(rewrite.text, doc);
    }

    #[test]
    fn test_hair_and_eyes_gate_on_variant() {
        let doc = concat!(
            "// figure1hair12\n",
            "h.addTween(x);\n",
            "// figure0eyes3\n",
            "e.addTween(y);\n",
        );
        let rewrite = aliased_layers().apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 2);
        assert!(rewrite.text.contains(
            "if (this.assetPalette.figure == 1 && this.assetPalette.hair == 12)h.addTween(x);"
        ));
        assert!(rewrite.text.contains(
            "if (this.assetPalette.figure == 0 && this.assetPalette.eyes == 3)e.addTween(y);"
        ));
    }

    #[test]
    fn test_figures_beyond_count_left_alone() {
        let doc = "// figure2avatar\na.addTween(x);\n";
        let rewrite = aliased_layers().apply(doc, &CTX);
        assert_eq!(rewrite.replacements, 0);
    }

    #[test]
    fn test_indexed_selection_expression() {
        let palette = PaletteConfig::default();
        let rule = LayerVisibilityRule::new(1, &selection_expr(ExportVariant::Indexed, &palette)).unwrap();
        let rewrite = rule.apply("// figure0avatar\na.addTween(x);\n", &CTX);
        assert!(rewrite.text.contains("if (assetPalettes.selected.figure == 0)a.addTween(x);"));
    }

    #[test]
    fn test_asset_path_rewrites_every_reference() {
        let doc = "{src:\"images/a.png\"},\n{src:\"images/b.png\"},\n{src:\"sounds/images/c.mp3\"}";
        let rewrite = AssetPathRule::new("assets/cached/").apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 2);
        assert!(rewrite.text.contains("\"assets/cached/a.png\""));
        assert!(rewrite.text.contains("\"assets/cached/b.png\""));
        assert!(rewrite.text.contains("\"sounds/images/c.mp3\""));
    }

    #[test]
    fn test_lookup_precedes_namespace_wiring() {
        let doc = "};\n})(createjs = createjs||{}, AdobeAn = AdobeAn||{});\nvar createjs, AdobeAn;";
        let rewrite = FileIdLookupRule.apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 1);
        assert_eq!(
            rewrite.text,
            "};\n\nFILE_TO_ID = window.FILE_TO_ID || {}; FILE_TO_ID[\"walk\"] = lib.properties.id;\n})(createjs = createjs||{}, AdobeAn = AdobeAn||{});\nvar createjs, AdobeAn;"
        );
    }

    #[test]
    fn test_lookup_key_is_escaped() {
        let doc = "})(createjs = createjs||{}, AdobeAn = AdobeAn||{});";
        let ctx = DocumentContext { file_stem: "odd\"name", line_ending: "\n" };
        let rewrite = FileIdLookupRule.apply(doc, &ctx);
        assert!(rewrite.text.contains(r#"FILE_TO_ID["odd\"name"]"#));
    }

    #[test]
    fn test_rule_order_per_variant() {
        let palette = PaletteConfig::default();
        let names = |variant, remap| -> Vec<&'static str> {
            build_rules(&palette, variant, remap).unwrap().iter().map(|r| r.name()).collect()
        };

        assert_eq!(
            names(ExportVariant::Aliased, true),
            ["palette_alias", "palette_colors", "layer_visibility", "asset_path", "file_id_lookup"]
        );
        assert_eq!(
            names(ExportVariant::Indexed, false),
            ["indexed_palette_colors", "layer_visibility", "file_id_lookup"]
        );
    }

    #[test]
    fn test_accessory_without_registration_keeps_next_gate() {
        let doc = concat!(
            "// figure0avatar_accessory\n",
            "this.hat = 1;\n",
            "// figure0avatar\n",
            "body.addTween(x);\n",
        );
        let rewrite = aliased_layers().apply(doc, &CTX);

        assert_eq!(rewrite.replacements, 1);
        assert_eq!(
            rewrite.text,
            concat!(
                "// figure0avatar_accessory\n",
                "this.hat = 1;\n",
                "// figure0avatar\n",
                "if (this.assetPalette.figure == 0)body.addTween(x);\n",
            )
        );
    }

    #[test]
    fn test_accessory_tag_is_case_insensitive() {
        let doc = "// figure0avatarAccessory\nhat.addTween(x);\n// figure1avatarACCESSORY\ncap.addTween(y);\n";
        let rewrite = aliased_layers().apply(doc, &CTX);
        assert_eq!(rewrite.replacements, 0);
        assert_eq!(rewrite.text, doc);
    }

    #[test]
    fn test_gated_line_not_gated_twice() {
        let doc = "// figure0avatar\nif (this.assetPalette.figure == 0)a.addTween(x);\n";
        let rewrite = aliased_layers().apply(doc, &CTX);
        assert_eq!(rewrite.replacements, 1);
        assert_eq!(rewrite.text, doc);
    }

    #[test]
    fn test_lookup_emitted_once() {
        let doc = "})(createjs = createjs||{}, AdobeAn = AdobeAn||{});";
        let once = FileIdLookupRule.apply(doc, &CTX);
        let twice = FileIdLookupRule.apply(&once.text, &CTX);

        assert_eq!(twice.replacements, 1);
        assert_eq!(twice.text, once.text);
        assert_eq!(twice.text.matches("FILE_TO_ID[\"walk\"]").count(), 1);
    }

    #[test]
    fn test_crlf_insertions_follow_document() {
        let doc = "// stage content:\r\n(lib.walk = function(mode,startPosition,loop,reversed) {\r\n})(createjs = createjs||{}, AdobeAn = AdobeAn||{});\r\n";
        let ctx = DocumentContext::new("walk", doc);
        assert_eq!(ctx.line_ending, "\r\n");

        let aliased = PaletteAliasRule::new("avatarPalette").apply(doc, &ctx);
        let rewrite = FileIdLookupRule.apply(&aliased.text, &ctx);

        assert_eq!(aliased.replacements, 1);
        assert_eq!(rewrite.replacements, 1);
        assert!(rewrite.text.contains("reversed) {\r\nthis.assetPalette = avatarPalette;\r\n\r\n"));
        assert!(!rewrite.text.replace("\r\n", "").contains('\n'));
    }
}
