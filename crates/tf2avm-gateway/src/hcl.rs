//! HCL block scanner
//!
//! Splits `.tf` files into top-level blocks without evaluating them. Each
//! block keeps its byte-exact text (leading comments included) so it can be
//! copied back verbatim. Bodies of `resource`, `variable`, `output` and
//! `module` blocks are split into top-level attributes; nested blocks become
//! object expressions and repeated nested blocks become lists.

use crate::capability::ManifestScanner;
use crate::error::GatewayError;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use tf2avm_model::{
    provider_of, Manifest, ModuleCallDecl, OutputDecl, RawBlock, ResourceDecl, SourceSpan,
    VariableDecl,
};

/// Scanner for Terraform configuration files
#[derive(Debug, Clone, Copy, Default)]
pub struct HclScanner;

impl HclScanner {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Scan all files, in key order
    pub fn scan_files(&self, files: &BTreeMap<String, String>) -> Result<Manifest, GatewayError> {
        let mut manifest = Manifest::default();
        for (path, text) in files {
            manifest.files.push(path.clone());
            let lexer = Lexer::new(path, text);
            let (blocks, trailing) = lexer.split_blocks()?;
            let mut ordinal = 0;
            for block in blocks {
                add_block(&lexer, &mut manifest, block, ordinal)?;
                ordinal += 1;
            }
            if let Some(text) = trailing {
                manifest.other_blocks.push(RawBlock {
                    kind: "trivia".into(),
                    labels: Vec::new(),
                    span: SourceSpan {
                        file: path.clone(),
                        ordinal,
                        text,
                    },
                });
            }
        }
        let resource_providers: Vec<String> = manifest
            .resources
            .iter()
            .map(|r| r.provider().to_string())
            .collect();
        manifest.providers.extend(resource_providers);
        tracing::debug!(
            files = manifest.files.len(),
            resources = manifest.resources.len(),
            "scanned configuration"
        );
        Ok(manifest)
    }
}

#[async_trait::async_trait]
impl ManifestScanner for HclScanner {
    async fn scan(&self, files: &BTreeMap<String, String>) -> Result<Manifest, GatewayError> {
        self.scan_files(files)
    }
}

fn add_block(
    lexer: &Lexer<'_>,
    manifest: &mut Manifest,
    block: TopBlock,
    ordinal: usize,
) -> Result<(), GatewayError> {
    let span = SourceSpan {
        file: lexer.file.to_string(),
        ordinal,
        text: lexer.src[block.text_start..block.end].to_string(),
    };
    let expect_labels = |n: usize| {
        if block.labels.len() == n {
            Ok(())
        } else {
            Err(lexer.err(
                block.keyword_start,
                format!("{} block expects {n} label(s), found {}", block.keyword, block.labels.len()),
            ))
        }
    };

    match block.keyword.as_str() {
        "resource" => {
            expect_labels(2)?;
            let attributes = lexer.parse_body(block.body_start, block.body_end)?;
            let resource_type = block.labels[0].clone();
            let name = block.labels[1].clone();
            manifest.resources.push(ResourceDecl {
                address: format!("{resource_type}.{name}"),
                resource_type,
                name,
                attributes,
                span,
            });
        }
        "variable" => {
            expect_labels(1)?;
            let mut attributes = lexer.parse_body(block.body_start, block.body_end)?;
            manifest.variables.push(VariableDecl {
                name: block.labels[0].clone(),
                var_type: attributes.shift_remove("type"),
                default: attributes.shift_remove("default"),
                description: attributes.shift_remove("description").map(|d| unquote(&d)),
                span: Some(span),
            });
        }
        "output" => {
            expect_labels(1)?;
            let mut attributes = lexer.parse_body(block.body_start, block.body_end)?;
            let expression = attributes.shift_remove("value").ok_or_else(|| {
                lexer.err(
                    block.keyword_start,
                    format!("output \"{}\" has no value", block.labels[0]),
                )
            })?;
            manifest.outputs.push(OutputDecl {
                name: block.labels[0].clone(),
                expression,
                span,
            });
        }
        "module" => {
            expect_labels(1)?;
            let mut attributes = lexer.parse_body(block.body_start, block.body_end)?;
            manifest.module_calls.push(ModuleCallDecl {
                label: block.labels[0].clone(),
                source: attributes.shift_remove("source").map(|s| unquote(&s)),
                version: attributes.shift_remove("version").map(|s| unquote(&s)),
                span,
            });
        }
        _ => {
            if block.keyword == "provider" {
                if let Some(name) = block.labels.first() {
                    manifest.providers.insert(provider_of(name).to_string());
                }
            }
            manifest.other_blocks.push(RawBlock {
                kind: block.keyword.clone(),
                labels: block.labels.clone(),
                span,
            });
        }
    }
    Ok(())
}

/// Strip one pair of surrounding double quotes
fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        s[1..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

#[derive(Debug)]
struct TopBlock {
    keyword: String,
    labels: Vec<String>,
    /// Start of leading comments (or the keyword)
    text_start: usize,
    keyword_start: usize,
    /// First byte after `{`
    body_start: usize,
    /// Position of the closing `}`
    body_end: usize,
    /// First byte after the closing `}`
    end: usize,
}

struct Lexer<'a> {
    file: &'a str,
    src: &'a str,
    bytes: &'a [u8],
}

impl<'a> Lexer<'a> {
    fn new(file: &'a str, src: &'a str) -> Self {
        Self {
            file,
            src,
            bytes: src.as_bytes(),
        }
    }

    fn err(&self, pos: usize, message: impl Into<String>) -> GatewayError {
        let line = self.src[..pos.min(self.src.len())].matches('\n').count() + 1;
        GatewayError::parse(self.file, line, message)
    }

    #[inline]
    fn at(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    #[inline]
    fn starts_with(&self, pos: usize, s: &str) -> bool {
        self.bytes
            .get(pos..)
            .map_or(false, |rest| rest.starts_with(s.as_bytes()))
    }

    fn is_ident(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
    }

    fn read_ident(&self, pos: usize) -> (&'a str, usize) {
        let mut end = pos;
        while self.at(end).map_or(false, Self::is_ident) {
            end += 1;
        }
        (&self.src[pos..end], end)
    }

    fn skip_whitespace(&self, mut pos: usize) -> usize {
        while self.at(pos).map_or(false, |b| b.is_ascii_whitespace()) {
            pos += 1;
        }
        pos
    }

    /// Skip whitespace and comments; with `inline` stop at a newline
    fn skip_trivia(&self, mut pos: usize, inline: bool) -> Result<usize, GatewayError> {
        loop {
            match self.at(pos) {
                Some(b'\n') if inline => return Ok(pos),
                Some(b) if b.is_ascii_whitespace() => pos += 1,
                Some(b'#') => pos = self.line_end(pos),
                Some(b'/') if self.starts_with(pos, "//") => pos = self.line_end(pos),
                Some(b'/') if self.starts_with(pos, "/*") => pos = self.skip_block_comment(pos)?,
                _ => return Ok(pos),
            }
        }
    }

    fn line_end(&self, pos: usize) -> usize {
        self.src[pos..].find('\n').map_or(self.src.len(), |i| pos + i)
    }

    fn skip_block_comment(&self, pos: usize) -> Result<usize, GatewayError> {
        self.src[pos + 2..]
            .find("*/")
            .map(|i| pos + 2 + i + 2)
            .ok_or_else(|| self.err(pos, "unterminated block comment"))
    }

    /// `pos` at the opening quote; returns the position after the closing quote
    fn skip_string(&self, pos: usize) -> Result<usize, GatewayError> {
        let mut i = pos + 1;
        loop {
            match self.at(i) {
                None | Some(b'\n') => return Err(self.err(pos, "unterminated string")),
                Some(b'\\') => i += 2,
                Some(b'"') => return Ok(i + 1),
                Some(b'$') | Some(b'%') if self.starts_with(i + 1, "{") => {
                    i = self.skip_template(i + 2)?;
                }
                Some(b'$') if self.starts_with(i + 1, "${") => i += 3,
                Some(b'%') if self.starts_with(i + 1, "%{") => i += 3,
                Some(_) => i += 1,
            }
        }
    }

    /// `pos` just after `${`; returns the position after the matching `}`
    fn skip_template(&self, pos: usize) -> Result<usize, GatewayError> {
        let mut depth = 1usize;
        let mut i = pos;
        loop {
            match self.at(i) {
                None => return Err(self.err(pos, "unterminated template interpolation")),
                Some(b'"') => i = self.skip_string(i)?,
                Some(b'{') => {
                    depth += 1;
                    i += 1;
                }
                Some(b'}') => {
                    depth -= 1;
                    i += 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                Some(_) => i += 1,
            }
        }
    }

    /// `pos` at `<<`; `None` when this is not a heredoc opener
    fn skip_heredoc(&self, pos: usize) -> Result<Option<usize>, GatewayError> {
        let mut i = pos + 2;
        if self.at(i) == Some(b'-') {
            i += 1;
        }
        let (marker, after) = self.read_ident(i);
        if marker.is_empty() {
            return Ok(None);
        }
        let header_end = self.line_end(after);
        if !self.src[after..header_end].trim().is_empty() {
            return Ok(None);
        }
        let mut line_start = header_end + 1;
        while line_start <= self.src.len() {
            let line_end = self.line_end(line_start.min(self.src.len()));
            let line = &self.src[line_start.min(self.src.len())..line_end];
            if line.trim() == marker {
                return Ok(Some(line_end));
            }
            if line_end >= self.src.len() {
                break;
            }
            line_start = line_end + 1;
        }
        Err(self.err(pos, format!("unterminated heredoc <<{marker}")))
    }

    /// `pos` at an opening bracket; returns the position after its match
    fn skip_balanced(&self, pos: usize) -> Result<usize, GatewayError> {
        let mut stack = vec![closing(self.bytes[pos])];
        let mut i = pos + 1;
        loop {
            match self.at(i) {
                None => return Err(self.err(pos, "unterminated block")),
                Some(b'"') => i = self.skip_string(i)?,
                Some(b'#') => i = self.line_end(i),
                Some(b'/') if self.starts_with(i, "//") => i = self.line_end(i),
                Some(b'/') if self.starts_with(i, "/*") => i = self.skip_block_comment(i)?,
                Some(b'<') if self.starts_with(i, "<<") => match self.skip_heredoc(i)? {
                    Some(end) => i = end,
                    None => i += 2,
                },
                Some(b @ (b'{' | b'[' | b'(')) => {
                    stack.push(closing(b));
                    i += 1;
                }
                Some(b @ (b'}' | b']' | b')')) => {
                    if stack.pop() != Some(b) {
                        return Err(self.err(i, format!("unexpected '{}'", b as char)));
                    }
                    i += 1;
                    if stack.is_empty() {
                        return Ok(i);
                    }
                }
                Some(_) => i += 1,
            }
        }
    }

    /// Read an attribute expression up to the end of its line
    fn read_expression(&self, pos: usize, limit: usize) -> Result<(String, usize), GatewayError> {
        let mut i = pos;
        while i < limit {
            match self.at(i) {
                None | Some(b'\n') | Some(b'#') => break,
                Some(b'/') if self.starts_with(i, "//") => break,
                Some(b'/') if self.starts_with(i, "/*") => i = self.skip_block_comment(i)?,
                Some(b'"') => i = self.skip_string(i)?,
                Some(b'{' | b'[' | b'(') => i = self.skip_balanced(i)?,
                Some(b'<') if self.starts_with(i, "<<") => match self.skip_heredoc(i)? {
                    Some(end) => i = end,
                    None => i += 2,
                },
                Some(b @ (b'}' | b']' | b')')) => {
                    return Err(self.err(i, format!("unexpected '{}'", b as char)))
                }
                Some(_) => i += 1,
            }
        }
        let expression = self.src[pos..i].trim();
        if expression.is_empty() {
            return Err(self.err(pos, "missing attribute value"));
        }
        Ok((expression.to_string(), i))
    }

    /// Read block labels up to (not including) `{`
    fn read_labels(&self, mut pos: usize) -> Result<(Vec<String>, usize), GatewayError> {
        let mut labels = Vec::new();
        loop {
            pos = self.skip_trivia(pos, true)?;
            match self.at(pos) {
                Some(b'{') => return Ok((labels, pos)),
                Some(b'"') => {
                    let end = self.skip_string(pos)?;
                    labels.push(self.src[pos + 1..end - 1].to_string());
                    pos = end;
                }
                Some(b) if Self::is_ident(b) => {
                    let (ident, end) = self.read_ident(pos);
                    labels.push(ident.to_string());
                    pos = end;
                }
                Some(b'=') => return Err(self.err(pos, "unexpected top-level attribute")),
                Some(b) => return Err(self.err(pos, format!("unexpected '{}'", b as char))),
                None => return Err(self.err(pos, "unexpected end of file")),
            }
        }
    }

    /// Split the file into top-level blocks plus any trailing trivia
    fn split_blocks(&self) -> Result<(Vec<TopBlock>, Option<String>), GatewayError> {
        let mut blocks = Vec::new();
        let mut pos = 0;
        loop {
            let text_start = self.skip_whitespace(pos);
            let keyword_start = self.skip_trivia(pos, false)?;
            if keyword_start >= self.src.len() {
                let trailing = self.src[text_start..].trim_end();
                let trailing = (!trailing.is_empty()).then(|| trailing.to_string());
                return Ok((blocks, trailing));
            }
            let (keyword, after_keyword) = self.read_ident(keyword_start);
            if keyword.is_empty() {
                return Err(self.err(keyword_start, "expected a block keyword"));
            }
            let (labels, brace) = self.read_labels(after_keyword)?;
            let end = self.skip_balanced(brace)?;
            blocks.push(TopBlock {
                keyword: keyword.to_string(),
                labels,
                text_start,
                keyword_start,
                body_start: brace + 1,
                body_end: end - 1,
                end,
            });
            pos = end;
        }
    }

    /// Top-level attributes of a block body
    fn parse_body(&self, start: usize, end: usize) -> Result<IndexMap<String, String>, GatewayError> {
        let mut attributes = IndexMap::new();
        let mut nested: IndexMap<String, Vec<String>> = IndexMap::new();
        let mut pos = start;
        loop {
            pos = self.skip_trivia(pos, false)?;
            if pos >= end {
                break;
            }
            let (name, after_name) = self.read_ident(pos);
            if name.is_empty() {
                return Err(self.err(pos, "expected an attribute or nested block"));
            }
            let next = self.skip_trivia(after_name, true)?;
            if self.at(next) == Some(b'=') && self.at(next + 1) != Some(b'=') {
                let value_start = self.skip_trivia(next + 1, true)?;
                let (expression, after) = self.read_expression(value_start, end)?;
                attributes.insert(name.to_string(), expression);
                pos = after;
            } else {
                let (_, brace) = self.read_labels(after_name)?;
                let block_end = self.skip_balanced(brace)?;
                nested
                    .entry(name.to_string())
                    .or_default()
                    .push(self.src[brace..block_end].to_string());
                pos = block_end;
            }
        }
        for (name, mut bodies) in nested {
            let value = if bodies.len() == 1 {
                bodies.remove(0)
            } else {
                format!("[{}]", bodies.join(", "))
            };
            attributes.entry(name).or_insert(value);
        }
        Ok(attributes)
    }
}

fn closing(open: u8) -> u8 {
    match open {
        b'{' => b'}',
        b'[' => b']',
        _ => b')',
    }
}
