//! Statement / structural AST family (§3).

use crate::ast::expr::Expr;
use crate::error::Span;

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ForTarget {
    Single(String),
    Tuple(Vec<String>),
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub name: String,
    pub body: Vec<Node>,
    pub scoped: bool,
    pub required: bool,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeNode {
    pub target: Expr,
    pub with_context: bool,
    pub ignore_missing: bool,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ImportNode {
    pub target: Expr,
    pub alias: String,
    pub with_context: bool,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FromImportNode {
    pub target: Expr,
    /// `(imported_name, optional_alias)`.
    pub names: Vec<(String, Option<String>)>,
    pub with_context: bool,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedNode {
    pub target: Expr,
    pub with_context: bool,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct IfNode {
    pub test: Expr,
    pub body: Vec<Node>,
    pub elifs: Vec<(Expr, Vec<Node>)>,
    pub else_body: Vec<Node>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ForNode {
    pub target: ForTarget,
    pub iter: Expr,
    pub body: Vec<Node>,
    pub empty_body: Vec<Node>,
    pub recursive: bool,
    pub filter: Option<Expr>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct WithNode {
    pub bindings: Vec<(String, Expr)>,
    pub body: Vec<Node>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct WithHugoNode {
    pub expr: Expr,
    pub bound_name: Option<String>,
    pub body: Vec<Node>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureNode {
    pub name: String,
    pub body: Vec<Node>,
    pub filter: Option<String>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheNode {
    pub key: Expr,
    pub ttl: Option<Expr>,
    pub depends: Vec<Expr>,
    pub body: Vec<Node>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FilterBlockNode {
    pub filter: String,
    pub args: Vec<Expr>,
    pub body: Vec<Node>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MacroNode {
    pub name: String,
    pub args: Vec<String>,
    pub defaults: Vec<(String, Expr)>,
    pub body: Vec<Node>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct CallBlockNode {
    pub call: Expr,
    pub body: Vec<Node>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Const(crate::ast::expr::Literal),
    Name(String),
    Wildcard,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MatchNode {
    pub subject: Expr,
    pub arms: Vec<(Pattern, Vec<Node>)>,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct UnlessNode {
    pub test: Expr,
    pub body: Vec<Node>,
    pub else_body: Vec<Node>,
}

/// An immutable, tagged tree node carrying its own source position.
#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Data(Span, String),
    Output(Span, Expr, Option<bool>),
    Block(Span, BlockNode),
    Extends(Span, Expr),
    Include(Span, IncludeNode),
    Import(Span, ImportNode),
    FromImport(Span, FromImportNode),
    Raw(Span, String),
    Embed(Span, EmbedNode),
    If(Span, IfNode),
    For(Span, ForNode),
    Set(Span, String, Expr),
    Let(Span, String, Expr),
    Export(Span, String, Expr),
    With(Span, WithNode),
    WithHugo(Span, WithHugoNode),
    Do(Span, Expr),
    Capture(Span, CaptureNode),
    Cache(Span, CacheNode),
    FilterBlock(Span, FilterBlockNode),
    Macro(Span, MacroNode),
    CallBlock(Span, CallBlockNode),
    Match(Span, MatchNode),
    Unless(Span, UnlessNode),
    Break(Span),
    Continue(Span),
    Spaceless(Span, Vec<Node>),
}

impl Node {
    pub fn span(&self) -> Span {
        match self {
            Node::Data(s, _)
            | Node::Output(s, ..)
            | Node::Block(s, _)
            | Node::Extends(s, _)
            | Node::Include(s, _)
            | Node::Import(s, _)
            | Node::FromImport(s, _)
            | Node::Raw(s, _)
            | Node::Embed(s, _)
            | Node::If(s, _)
            | Node::For(s, _)
            | Node::Set(s, ..)
            | Node::Let(s, ..)
            | Node::Export(s, ..)
            | Node::With(s, _)
            | Node::WithHugo(s, _)
            | Node::Do(s, _)
            | Node::Capture(s, _)
            | Node::Cache(s, _)
            | Node::FilterBlock(s, _)
            | Node::Macro(s, _)
            | Node::CallBlock(s, _)
            | Node::Match(s, _)
            | Node::Unless(s, _)
            | Node::Break(s)
            | Node::Continue(s)
            | Node::Spaceless(s, _) => *s,
        }
    }

    /// Walks direct child node sequences (non-recursive); used by tree
    /// utilities like the optimizer and the block-hash fingerprinter.
    pub fn children(&self) -> Vec<&[Node]> {
        match self {
            Node::Block(_, b) => vec![&b.body],
            Node::If(_, n) => {
                let mut v = vec![n.body.as_slice()];
                for (_, body) in &n.elifs {
                    v.push(body.as_slice());
                }
                v.push(n.else_body.as_slice());
                v
            }
            Node::For(_, n) => vec![n.body.as_slice(), n.empty_body.as_slice()],
            Node::With(_, n) => vec![n.body.as_slice()],
            Node::WithHugo(_, n) => vec![n.body.as_slice()],
            Node::Capture(_, n) => vec![n.body.as_slice()],
            Node::Cache(_, n) => vec![n.body.as_slice()],
            Node::FilterBlock(_, n) => vec![n.body.as_slice()],
            Node::Macro(_, n) => vec![n.body.as_slice()],
            Node::CallBlock(_, n) => vec![n.body.as_slice()],
            Node::Match(_, n) => n.arms.iter().map(|(_, b)| b.as_slice()).collect(),
            Node::Unless(_, n) => vec![n.body.as_slice(), n.else_body.as_slice()],
            Node::Spaceless(_, body) => vec![body.as_slice()],
            _ => vec![],
        }
    }
}

/// The parsed, immutable document produced by the parser. Plays the role of
/// the spec's `Template(body)` structural node: the AST root is not itself
/// a `Node` variant because it additionally tracks `extends`.
#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ast {
    pub nodes: Vec<Node>,
    pub extends: Option<Expr>,
}

impl Ast {
    /// Collects every `{% block name %}` at any nesting depth, in document
    /// order, erroring on duplicate names as required by the `Block.name`
    /// uniqueness invariant.
    pub fn collect_blocks(&self) -> Result<Vec<&BlockNode>, String> {
        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        collect_blocks_rec(&self.nodes, &mut out, &mut seen)?;
        Ok(out)
    }
}

fn collect_blocks_rec<'a>(
    nodes: &'a [Node],
    out: &mut Vec<&'a BlockNode>,
    seen: &mut std::collections::HashSet<String>,
) -> Result<(), String> {
    for node in nodes {
        if let Node::Block(_, b) = node {
            if !seen.insert(b.name.clone()) {
                return Err(format!("duplicate block name {:?}", b.name));
            }
            out.push(b);
        }
        for child_seq in node.children() {
            collect_blocks_rec(child_seq, out, seen)?;
        }
    }
    Ok(())
}
