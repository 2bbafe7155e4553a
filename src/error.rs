//! Structured compile- and runtime-error taxonomy.
//!
//! Every error carries enough context (source name, line/column, a snippet)
//! to be rendered the way `Ast::from_str` renders parse failures: a one-line
//! summary, a `file:line:col` location, a caret-marked snippet, and where
//! possible a short actionable suggestion.

use std::fmt;

/// A 1-based line / 0-based column source position, as required by the
/// token and AST node invariants.
#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Renders a one-line caret snippet under the offending column, the way
/// `rustc`-style diagnostics and Askama's own parse errors do.
pub fn caret_snippet(source: &str, span: Span) -> String {
    let line = source.lines().nth(span.line.saturating_sub(1)).unwrap_or("");
    let caret_pos = span.column.min(line.chars().count());
    let caret = " ".repeat(caret_pos) + "^";
    format!("{line}\n{caret}")
}

fn located(
    name: Option<&str>,
    source: Option<&str>,
    span: Span,
    summary: &str,
    suggestion: Option<&str>,
) -> String {
    let loc = match name {
        Some(name) => format!("{name}:{span}"),
        None => format!("<string>:{span}"),
    };
    let mut out = format!("{summary}\n  --> {loc}");
    if let Some(source) = source {
        out.push('\n');
        out.push_str(&caret_snippet(source, span));
    }
    if let Some(suggestion) = suggestion {
        out.push_str("\n  = help: ");
        out.push_str(suggestion);
    }
    out
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", located(.template.as_deref(), .source_text.as_deref(), *.span, .message, .suggestion.as_deref()))]
pub struct LexError {
    pub message: String,
    pub span: Span,
    pub template: Option<String>,
    pub source_text: Option<String>,
    pub suggestion: Option<String>,
}

impl LexError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            template: None,
            source_text: None,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_context(mut self, template: Option<String>, source: Option<String>) -> Self {
        self.template = template;
        self.source_text = source;
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", located(.template.as_deref(), .source_text.as_deref(), *.span, .message, .suggestion.as_deref()))]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    pub template: Option<String>,
    pub source_text: Option<String>,
    pub suggestion: Option<String>,
}

impl ParseError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            template: None,
            source_text: None,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_context(mut self, template: Option<String>, source: Option<String>) -> Self {
        self.template = template;
        self.source_text = source;
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("undefined name {name:?} in template {template:?} at line {line}")]
pub struct UndefinedError {
    pub name: String,
    pub template: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", located(.template.as_deref(), None, *.span, .message, .suggestion.as_deref()))]
pub struct TemplateRuntimeError {
    pub message: String,
    pub span: Span,
    pub template: Option<String>,
    pub expr: Option<String>,
    pub suggestion: Option<String>,
}

impl TemplateRuntimeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            template: None,
            expr: None,
            suggestion: None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("required value was none at {span} in template {template:?}")]
pub struct RequiredValueError {
    pub span: Span,
    pub template: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("cannot compare None at {span} in template {template:?}")]
pub struct NoneComparisonError {
    pub span: Span,
    pub template: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("template not found: {name:?}")]
pub struct TemplateNotFoundError {
    pub name: String,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("block {name:?} not found; available blocks: {available:?}")]
pub struct BlockNotFoundError {
    pub name: String,
    pub available: Vec<String>,
}

/// The umbrella error type returned from the public API. Each compile or
/// render operation bubbles up exactly one of these variants; none of them
/// are downgraded to a silent default unless the caller explicitly asked
/// for `default(...)` / `is defined` semantics or `ignore missing`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Undefined(#[from] UndefinedError),
    #[error(transparent)]
    Runtime(#[from] TemplateRuntimeError),
    #[error(transparent)]
    RequiredValue(#[from] RequiredValueError),
    #[error(transparent)]
    NoneComparison(#[from] NoneComparisonError),
    #[error(transparent)]
    TemplateNotFound(#[from] TemplateNotFoundError),
    #[error(transparent)]
    BlockNotFound(#[from] BlockNotFoundError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
