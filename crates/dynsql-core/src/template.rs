//! SQL templates and their metadata.
//!
//! A template is SQL text with two extension points:
//!
//! - `:name` placeholders, always rendered as bind parameters
//! - `{% if name %} ... {% else %} ... {% endif %}` blocks, kept or dropped
//!   depending on the truthiness of parameter `name`
//!
//! Text is parsed once, when the template is constructed, into a tree of
//! [`Segment`]s. Construction also checks that every placeholder and every
//! block guard is a declared parameter, so a [`Template`] that exists is
//! internally consistent.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::params::ParamType;

/// Errors in template text or metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Template syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Placeholder ':{0}' is not a declared parameter")]
    UndeclaredPlaceholder(String),

    #[error("Block guard '{0}' is not a declared parameter")]
    UndeclaredGuard(String),

    #[error("Type declared for undeclared parameter '{0}'")]
    UndeclaredType(String),

    #[error("Parameter '{0}' is declared both required and optional")]
    DuplicateDeclaration(String),

    #[error("Placeholder ':{0}' has no bound value")]
    UnboundPlaceholder(String),
}

impl TemplateError {
    fn syntax(offset: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            offset,
            message: message.into(),
        }
    }
}

fn default_description() -> String {
    "No description available".into()
}

/// Serializable template definition, as written in built-ins or external files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    /// Template text.
    #[serde(alias = "sql")]
    pub template: String,
    #[serde(default = "default_description")]
    pub description: String,
    pub required_params: Vec<String>,
    #[serde(default)]
    pub optional_params: Vec<String>,
    /// Parameter types; undeclared entries default to `string`.
    #[serde(default)]
    pub param_types: IndexMap<String, ParamType>,
}

impl TemplateDefinition {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            description: default_description(),
            required_params: Vec::new(),
            optional_params: Vec::new(),
            param_types: IndexMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_required<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_params.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_optional<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_params.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_type(mut self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.param_types.insert(name.into(), param_type);
        self
    }
}

/// One node of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal SQL text.
    Text(String),
    /// A `:name` placeholder.
    Param(String),
    /// A conditional block guarded by a parameter.
    Block {
        guard: String,
        then: Vec<Segment>,
        otherwise: Vec<Segment>,
    },
}

/// A parsed, validated template for one business type.
#[derive(Debug, Clone)]
pub struct Template {
    biz_type: String,
    definition: TemplateDefinition,
    segments: Vec<Segment>,
}

impl Template {
    /// Parse and validate a template definition.
    pub fn new(
        biz_type: impl Into<String>,
        definition: TemplateDefinition,
    ) -> Result<Self, TemplateError> {
        let segments = parse(&definition.template)?;

        let required: HashSet<&str> = definition
            .required_params
            .iter()
            .map(String::as_str)
            .collect();
        if let Some(dup) = definition
            .optional_params
            .iter()
            .find(|name| required.contains(name.as_str()))
        {
            return Err(TemplateError::DuplicateDeclaration(dup.clone()));
        }

        let declared: HashSet<&str> = definition
            .required_params
            .iter()
            .chain(&definition.optional_params)
            .map(String::as_str)
            .collect();

        if let Some(name) = definition.param_types.keys().find(|k| !declared.contains(k.as_str())) {
            return Err(TemplateError::UndeclaredType(name.clone()));
        }
        check_declared(&segments, &declared)?;

        Ok(Self {
            biz_type: biz_type.into(),
            definition,
            segments,
        })
    }

    pub fn biz_type(&self) -> &str {
        &self.biz_type
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn text(&self) -> &str {
        &self.definition.template
    }

    pub fn required(&self) -> &[String] {
        &self.definition.required_params
    }

    pub fn optional(&self) -> &[String] {
        &self.definition.optional_params
    }

    /// Declared parameter names: required first, then optional.
    pub fn declared(&self) -> impl Iterator<Item = &str> {
        self.definition
            .required_params
            .iter()
            .chain(&self.definition.optional_params)
            .map(String::as_str)
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared().any(|d| d == name)
    }

    pub fn param_type(&self, name: &str) -> ParamType {
        self.definition
            .param_types
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn definition(&self) -> &TemplateDefinition {
        &self.definition
    }
}

fn check_declared(segments: &[Segment], declared: &HashSet<&str>) -> Result<(), TemplateError> {
    for segment in segments {
        match segment {
            Segment::Text(_) => {}
            Segment::Param(name) => {
                if !declared.contains(name.as_str()) {
                    return Err(TemplateError::UndeclaredPlaceholder(name.clone()));
                }
            }
            Segment::Block {
                guard,
                then,
                otherwise,
            } => {
                if !declared.contains(guard.as_str()) {
                    return Err(TemplateError::UndeclaredGuard(guard.clone()));
                }
                check_declared(then, declared)?;
                check_declared(otherwise, declared)?;
            }
        }
    }
    Ok(())
}

// ============================================================================
// Parser
// ============================================================================

enum Directive<'a> {
    If(&'a str),
    Else,
    EndIf,
}

fn parse_directive(body: &str, offset: usize) -> Result<Directive<'_>, TemplateError> {
    let body = body.trim().trim_start_matches('-').trim_end_matches('-').trim();
    let mut words = body.split_whitespace();
    let directive = match (words.next(), words.next(), words.next()) {
        (Some("if"), Some(name), None) if is_identifier(name) => Directive::If(name),
        (Some("if"), _, _) => {
            return Err(TemplateError::syntax(
                offset,
                format!("'if' expects a single parameter name, got '{body}'"),
            ));
        }
        (Some("else"), None, _) => Directive::Else,
        (Some("endif"), None, _) => Directive::EndIf,
        _ => {
            return Err(TemplateError::syntax(
                offset,
                format!("unsupported directive '{body}'"),
            ));
        }
    };
    Ok(directive)
}

/// An open `if` block while parsing.
struct OpenBlock {
    guard: String,
    offset: usize,
    then: Vec<Segment>,
    otherwise: Vec<Segment>,
    in_else: bool,
}

impl OpenBlock {
    fn current(&mut self) -> &mut Vec<Segment> {
        if self.in_else {
            &mut self.otherwise
        } else {
            &mut self.then
        }
    }
}

/// Parse template text into segments.
pub fn parse(text: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut root = Vec::new();
    let mut open: Vec<OpenBlock> = Vec::new();
    let mut rest = text;
    let mut offset = 0;

    while let Some(start) = rest.find("{%") {
        reject_stray_close(&rest[..start], offset)?;
        let target = match open.last_mut() {
            Some(block) => block.current(),
            None => &mut root,
        };
        split_placeholders(&rest[..start], target);

        let directive_at = offset + start;
        let after = &rest[start + 2..];
        let end = after
            .find("%}")
            .ok_or_else(|| TemplateError::syntax(directive_at, "unterminated '{%' directive"))?;

        match parse_directive(&after[..end], directive_at)? {
            Directive::If(guard) => open.push(OpenBlock {
                guard: guard.to_string(),
                offset: directive_at,
                then: Vec::new(),
                otherwise: Vec::new(),
                in_else: false,
            }),
            Directive::Else => match open.last_mut() {
                Some(block) if !block.in_else => block.in_else = true,
                Some(_) => return Err(TemplateError::syntax(directive_at, "duplicate 'else'")),
                None => return Err(TemplateError::syntax(directive_at, "'else' outside of 'if'")),
            },
            Directive::EndIf => {
                let block = open
                    .pop()
                    .ok_or_else(|| TemplateError::syntax(directive_at, "'endif' without 'if'"))?;
                let segment = Segment::Block {
                    guard: block.guard,
                    then: block.then,
                    otherwise: block.otherwise,
                };
                match open.last_mut() {
                    Some(parent) => parent.current().push(segment),
                    None => root.push(segment),
                }
            }
        }

        let consumed = start + 2 + end + 2;
        offset += consumed;
        rest = &rest[consumed..];
    }

    if let Some(block) = open.last() {
        return Err(TemplateError::syntax(
            block.offset,
            format!("'if {}' is never closed", block.guard),
        ));
    }
    reject_stray_close(rest, offset)?;
    split_placeholders(rest, &mut root);

    Ok(root)
}

fn reject_stray_close(run: &str, offset: usize) -> Result<(), TemplateError> {
    match run.find("%}") {
        Some(pos) => Err(TemplateError::syntax(offset + pos, "stray '%}'")),
        None => Ok(()),
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty() && is_ident_start(bytes[0]) && bytes.iter().all(|b| is_ident_char(*b))
}

/// Split a literal run into text and `:name` placeholder segments.
///
/// Colons inside quoted literals or comments, `::` casts and colons glued to
/// an identifier are left alone.
fn split_placeholders(run: &str, out: &mut Vec<Segment>) {
    let bytes = run.as_bytes();
    let mut quote: Option<u8> = None;
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'\'' || b == b'"' {
            quote = Some(b);
            i += 1;
            continue;
        }
        if let Some(end) = comment_end(bytes, i) {
            i = end;
            continue;
        }

        let starts_placeholder = b == b':'
            && bytes.get(i + 1).is_some_and(|n| is_ident_start(*n))
            && (i == 0 || (bytes[i - 1] != b':' && !is_ident_char(bytes[i - 1])));
        if !starts_placeholder {
            i += 1;
            continue;
        }

        let name_end = i + 1 + bytes[i + 1..].iter().take_while(|c| is_ident_char(**c)).count();
        push_text(out, &run[literal_start..i]);
        out.push(Segment::Param(run[i + 1..name_end].to_string()));
        literal_start = name_end;
        i = name_end;
    }

    push_text(out, &run[literal_start..]);
}

/// End offset of a `--` or `/* */` comment starting at `i`. An unterminated
/// comment runs to the end of `bytes`.
fn comment_end(bytes: &[u8], i: usize) -> Option<usize> {
    match (bytes[i], bytes.get(i + 1)) {
        (b'-', Some(b'-')) => Some(
            bytes[i..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(bytes.len(), |p| i + p + 1),
        ),
        (b'/', Some(b'*')) => Some(
            bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(bytes.len(), |p| i + 2 + p + 2),
        ),
        _ => None,
    }
}

fn push_text(out: &mut Vec<Segment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Segment::Text(prev)) = out.last_mut() {
        prev.push_str(text);
    } else {
        out.push(Segment::Text(text.to_string()));
    }
}
