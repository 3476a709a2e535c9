//! Conversion writer
//!
//! Rendering is pure: [`render`] turns plans and the manifest into a map of
//! file contents plus a [`WriteSummary`]. [`write_tree`] is the only place
//! in the pipeline that touches the output tree.
//!
//! Every top-level block of every source file is emitted exactly once, in
//! original order. Converted resources become `module` blocks; everything
//! else keeps its original text, except outputs whose expression a plan
//! rewrites.

use crate::error::PipelineError;
use crate::state::{Issue, IssueKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};
use tf2avm_model::{
    references_address, registry_source, AttributeTarget, ConversionPlan, Manifest, ResourceDecl,
    VariableDecl,
};

/// File that receives new variable declarations
pub const VARIABLES_FILE: &str = "variables.tf";

/// Where a manifest resource ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub address: String,
    pub file: String,
    /// Label of the module block, when converted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_label: Option<String>,
}

impl Placement {
    #[inline]
    #[must_use]
    pub fn is_converted(&self) -> bool {
        self.module_label.is_some()
    }
}

/// What the writer produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub files_written: Vec<String>,
    pub variables_added: Vec<String>,
    pub outputs_rewritten: Vec<String>,
    /// One entry per manifest resource, in manifest order
    pub placements: Vec<Placement>,
    pub issues: Vec<Issue>,
}

impl WriteSummary {
    /// Files that contain at least one converted block or new variable
    #[must_use]
    pub fn converted_files(&self) -> Vec<String> {
        let mut files: BTreeSet<String> = self
            .placements
            .iter()
            .filter(|p| p.is_converted())
            .map(|p| p.file.clone())
            .collect();
        if !self.variables_added.is_empty() {
            files.insert(VARIABLES_FILE.to_string());
        }
        files.into_iter().collect()
    }
}

/// Rendered output tree, not yet on disk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedTree {
    /// Relative path -> file content
    pub files: BTreeMap<String, String>,
    pub summary: WriteSummary,
}

/// Render and write the output tree
pub async fn write(
    plans: &[ConversionPlan],
    passthrough: &[String],
    manifest: &Manifest,
    output_dir: &Path,
) -> Result<WriteSummary, PipelineError> {
    let tree = render(plans, passthrough, manifest);
    write_tree(&tree, output_dir).await?;
    Ok(tree.summary)
}

/// Write a rendered tree below `output_dir`
pub async fn write_tree(tree: &RenderedTree, output_dir: &Path) -> Result<(), PipelineError> {
    for (relative, content) in &tree.files {
        let relative_path = Path::new(relative);
        let escapes = relative_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(PipelineError::io(
                relative_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path escapes the output directory"),
            ));
        }
        let path = output_dir.join(relative_path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io(parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| PipelineError::io(&path, e))?;
    }
    tracing::info!(files = tree.files.len(), dir = %output_dir.display(), "output tree written");
    Ok(())
}

/// Render the output tree
///
/// Only usable plans convert their resource. Resources listed in
/// `passthrough`, or without a usable plan, are copied verbatim.
#[must_use]
pub fn render(plans: &[ConversionPlan], passthrough: &[String], manifest: &Manifest) -> RenderedTree {
    let passthrough: BTreeSet<&str> = passthrough.iter().map(String::as_str).collect();
    let usable: Vec<ConversionPlan> = plans
        .iter()
        .filter(|p| p.is_usable() && !passthrough.contains(p.resource_address.as_str()))
        .filter(|p| manifest.resource(&p.resource_address).is_some())
        .cloned()
        .collect();

    let mut summary = WriteSummary::default();
    let merge = merge_variables(manifest, usable);
    summary.issues.extend(merge.issues);
    let plans: BTreeMap<&str, &ConversionPlan> = merge
        .plans
        .iter()
        .map(|p| (p.resource_address.as_str(), p))
        .collect();

    // (file, ordinal) -> block text
    let mut blocks: BTreeMap<&str, BTreeMap<usize, String>> = manifest
        .files
        .iter()
        .map(|f| (f.as_str(), BTreeMap::new()))
        .collect();

    // Blocks emitted without conversion, checked for dangling references below
    let mut verbatim: Vec<(String, String)> = Vec::new();

    for resource in &manifest.resources {
        let plan = plans.get(resource.address.as_str());
        let text = match plan {
            Some(plan) => render_module(plan, resource),
            None => {
                verbatim.push((resource.address.clone(), resource.span.text.clone()));
                resource.span.text.clone()
            }
        };
        blocks
            .entry(resource.span.file.as_str())
            .or_default()
            .insert(resource.span.ordinal, text);
        summary.placements.push(Placement {
            address: resource.address.clone(),
            file: resource.span.file.clone(),
            module_label: plan.map(|p| p.module_label.clone()),
        });
    }

    let rewrites = collect_rewrites(&merge.plans);
    for output in &manifest.outputs {
        let mut expression = output.expression.clone();
        for (address, rewrite) in &rewrites {
            if !output.references(address) {
                continue;
            }
            if let Some(next) = apply_rewrite(&expression, &rewrite.0, &rewrite.1) {
                expression = next;
            }
        }
        let text = if expression == output.expression {
            output.span.text.clone()
        } else {
            match replace_value(&output.span.text, &output.expression, &expression) {
                Some(text) => {
                    summary.outputs_rewritten.push(output.name.clone());
                    text
                }
                None => {
                    summary.issues.push(Issue::at(
                        IssueKind::Unresolved,
                        format!("output.{}", output.name),
                        format!("could not rewrite output value to `{expression}`; copied unchanged"),
                    ));
                    output.span.text.clone()
                }
            }
        };
        verbatim.push((format!("output \"{}\"", output.name), text.clone()));
        blocks
            .entry(output.span.file.as_str())
            .or_default()
            .insert(output.span.ordinal, text);
    }

    for variable in &manifest.variables {
        if let Some(span) = &variable.span {
            verbatim.push((format!("variable \"{}\"", variable.name), span.text.clone()));
            blocks.entry(span.file.as_str()).or_default().insert(span.ordinal, span.text.clone());
        }
    }
    for call in &manifest.module_calls {
        verbatim.push((format!("module \"{}\"", call.label), call.span.text.clone()));
        blocks
            .entry(call.span.file.as_str())
            .or_default()
            .insert(call.span.ordinal, call.span.text.clone());
    }
    for block in &manifest.other_blocks {
        let label = std::iter::once(block.kind.clone())
            .chain(block.labels.iter().map(|l| format!("\"{l}\"")))
            .collect::<Vec<_>>()
            .join(" ");
        if block.kind != "trivia" {
            verbatim.push((label, block.span.text.clone()));
        }
        blocks
            .entry(block.span.file.as_str())
            .or_default()
            .insert(block.span.ordinal, block.span.text.clone());
    }

    // A converted resource no longer exists under its old address
    for (label, text) in &verbatim {
        for address in plans.keys() {
            if references_address(text, address) {
                summary.issues.push(Issue::at(
                    IssueKind::Unresolved,
                    *address,
                    format!("{label} still references the converted resource"),
                ));
            }
        }
    }

    let mut files: BTreeMap<String, String> = blocks
        .into_iter()
        .map(|(file, blocks)| (file.to_string(), join_blocks(blocks.into_values())))
        .collect();

    if !merge.added.is_empty() {
        let rendered: Vec<String> = merge.added.iter().map(render_variable).collect();
        let content = files.entry(VARIABLES_FILE.to_string()).or_default();
        let mut all: Vec<String> = Vec::new();
        if !content.trim().is_empty() {
            all.push(content.trim_end().to_string());
        }
        all.extend(rendered);
        *content = join_blocks(all.into_iter());
        summary.variables_added = merge.added.iter().map(|v| v.name.clone()).collect();
    }

    summary.files_written = files.keys().cloned().collect();
    tracing::debug!(
        files = summary.files_written.len(),
        converted = plans.len(),
        variables_added = summary.variables_added.len(),
        outputs_rewritten = summary.outputs_rewritten.len(),
        "output tree rendered"
    );
    RenderedTree { files, summary }
}

fn join_blocks(blocks: impl Iterator<Item = String>) -> String {
    let mut out = blocks.collect::<Vec<_>>().join("\n\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Output rewrites keyed by the resource they belong to
fn collect_rewrites(plans: &[ConversionPlan]) -> Vec<(&str, (String, String))> {
    plans
        .iter()
        .flat_map(|p| {
            p.output_rewrites.iter().map(move |r| {
                (
                    p.resource_address.as_str(),
                    (r.original_expression.clone(), r.new_expression.clone()),
                )
            })
        })
        .collect()
}

struct VariableMerge {
    plans: Vec<ConversionPlan>,
    added: Vec<VariableDecl>,
    issues: Vec<Issue>,
}

/// De-duplicate new variables by name; rename on shape conflicts
fn merge_variables(manifest: &Manifest, plans: Vec<ConversionPlan>) -> VariableMerge {
    let existing: BTreeMap<&str, &VariableDecl> =
        manifest.variables.iter().map(|v| (v.name.as_str(), v)).collect();
    let mut added: Vec<VariableDecl> = Vec::new();
    let mut issues = Vec::new();
    let mut merged = Vec::with_capacity(plans.len());

    for mut plan in plans {
        let proposed = std::mem::take(&mut plan.new_variables);
        for variable in proposed {
            let clash = existing
                .get(variable.name.as_str())
                .copied()
                .or_else(|| added.iter().find(|v| v.name == variable.name));
            match clash {
                Some(other) if other.same_shape(&variable) => {
                    plan.new_variables.push(variable);
                }
                Some(_) => {
                    let taken = |name: &str| {
                        existing.contains_key(name) || added.iter().any(|v| v.name == name)
                    };
                    let mut alternate = format!("{}_avm", variable.name);
                    let mut n = 2;
                    while taken(&alternate) {
                        alternate = format!("{}_avm_{n}", variable.name);
                        n += 1;
                    }
                    rename_variable(&mut plan, &variable.name, &alternate);
                    issues.push(Issue::at(
                        IssueKind::WriteConflict,
                        &plan.resource_address,
                        format!(
                            "variable \"{}\" already declared with a different shape; introduced \"{alternate}\"",
                            variable.name
                        ),
                    ));
                    tracing::warn!(
                        resource = %plan.resource_address,
                        variable = %variable.name,
                        alternate = %alternate,
                        "variable name collision"
                    );
                    let renamed = VariableDecl {
                        name: alternate,
                        ..variable
                    };
                    added.push(renamed.clone());
                    plan.new_variables.push(renamed);
                }
                None => {
                    added.push(variable.clone());
                    plan.new_variables.push(variable);
                }
            }
        }
        merged.push(plan);
    }
    VariableMerge {
        plans: merged,
        added,
        issues,
    }
}

/// Point `var.<from>` references of a plan at `var.<to>`
fn rename_variable(plan: &mut ConversionPlan, from: &str, to: &str) {
    let Ok(pattern) = Regex::new(&format!(r"\bvar\.{}\b", regex::escape(from))) else {
        return;
    };
    let replacement = format!("var.{to}");
    let rewrite = |s: &mut String| {
        if pattern.is_match(s) {
            *s = pattern.replace_all(s, regex::NoExpand(&replacement)).into_owned();
        }
    };
    for binding in &mut plan.generated_inputs {
        rewrite(&mut binding.expression);
    }
    for mapping in &mut plan.attribute_map {
        if let AttributeTarget::Input { value: Some(value), .. } = &mut mapping.target {
            rewrite(value);
        }
    }
    for output in &mut plan.output_rewrites {
        rewrite(&mut output.new_expression);
    }
}

/// Apply `original -> new` to `current`
///
/// An exact or contained match is replaced directly. Otherwise the changed
/// segment of `original -> new`, widened to whole reference tokens, is
/// replaced, so several plans can rewrite one output.
#[must_use]
pub fn apply_rewrite(current: &str, original: &str, new: &str) -> Option<String> {
    if current == original {
        return Some(new.to_string());
    }
    if !original.is_empty() && current.contains(original) {
        return Some(current.replace(original, new));
    }
    let (old_segment, new_segment) = changed_segment(original, new);
    if old_segment.is_empty() || !current.contains(old_segment) {
        return None;
    }
    Some(current.replace(old_segment, new_segment))
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn changed_segment<'a>(original: &'a str, new: &'a str) -> (&'a str, &'a str) {
    let mut prefix: usize = original
        .chars()
        .zip(new.chars())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum();
    while let Some(c) = original[..prefix].chars().next_back() {
        if !is_token_char(c) {
            break;
        }
        prefix -= c.len_utf8();
    }

    let mut suffix: usize = original[prefix..]
        .chars()
        .rev()
        .zip(new[prefix..].chars().rev())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| a.len_utf8())
        .sum();
    while let Some(c) = original[original.len() - suffix..].chars().next() {
        if !is_token_char(c) {
            break;
        }
        suffix -= c.len_utf8();
    }

    (
        &original[prefix..original.len() - suffix],
        &new[prefix..new.len() - suffix],
    )
}

/// Replace the `value` expression inside an output block's text
fn replace_value(block: &str, old: &str, new: &str) -> Option<String> {
    let value = Regex::new(r"(?m)^\s*value\s*=\s*").ok()?;
    let found = value.find(block)?;
    let offset = block[found.end()..].find(old)? + found.end();
    let mut text = String::with_capacity(block.len() + new.len());
    text.push_str(&block[..offset]);
    text.push_str(new);
    text.push_str(&block[offset + old.len()..]);
    Some(text)
}

/// Comments before the block keyword, verbatim
///
/// Understands `#`, `//` and `/* */` comments, so a block comment is never
/// cut in half.
fn leading_trivia(text: &str) -> &str {
    let bytes = text.as_bytes();
    let line_end = |from: usize| text[from..].find('\n').map_or(text.len(), |n| from + n + 1);
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], bytes.get(i + 1)) {
            (b' ' | b'\t' | b'\r' | b'\n', _) => i += 1,
            (b'#', _) | (b'/', Some(b'/')) => i = line_end(i),
            (b'/', Some(b'*')) => match text[i + 2..].find("*/") {
                Some(end) => i += end + 4,
                None => return "",
            },
            _ => break,
        }
    }
    text[..i].trim()
}

fn render_module(plan: &ConversionPlan, resource: &ResourceDecl) -> String {
    let mut lines: Vec<String> = Vec::new();
    let trivia = leading_trivia(&resource.span.text);
    if !trivia.is_empty() {
        lines.push(trivia.to_string());
    }
    lines.push(format!("# tf2avm: converted from {}", resource.address));
    lines.push(format!("module \"{}\" {{", plan.module_label));
    lines.push(format!("  source  = \"{}\"", registry_source(&plan.target_module)));
    lines.push(format!("  version = \"{}\"", plan.target_version));

    let has_inputs = !plan.attribute_map.is_empty() || !plan.generated_inputs.is_empty();
    if has_inputs {
        lines.push(String::new());
    }
    for mapping in &plan.attribute_map {
        let original = resource
            .attributes
            .get(&mapping.source_attribute)
            .map(String::as_str)
            .unwrap_or_default();
        match &mapping.target {
            AttributeTarget::Input { name, value } => {
                let expression = value.as_deref().unwrap_or(original);
                lines.push(format!("  {name} = {expression}"));
            }
            AttributeTarget::Unresolved { reason } => {
                lines.push(format!(
                    "  # TODO(tf2avm): unresolved {}: {reason}",
                    mapping.source_attribute
                ));
                let commented = format!("{} = {original}", mapping.source_attribute);
                lines.extend(commented.lines().map(|l| format!("  # {l}")));
            }
        }
    }
    for binding in &plan.generated_inputs {
        lines.push(format!("  {} = {}", binding.input, binding.expression));
    }
    lines.push("}".to_string());
    lines.join("\n")
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace("${", "$${")
        .replace("%{", "%%{")
}

fn render_variable(variable: &VariableDecl) -> String {
    let mut lines = vec![format!("variable \"{}\" {{", variable.name)];
    if let Some(var_type) = &variable.var_type {
        lines.push(format!("  type        = {var_type}"));
    }
    if let Some(description) = &variable.description {
        lines.push(format!("  description = \"{}\"", escape_string(description)));
    }
    if let Some(default) = &variable.default {
        lines.push(format!("  default     = {default}"));
    }
    lines.push("}".to_string());
    lines.join("\n")
}
