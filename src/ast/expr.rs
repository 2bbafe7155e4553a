//! Expression AST family (§3: `Const`, `Name`, `Getattr`, ...).

use crate::error::Span;

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    None,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    Neg,
    Pos,
    Not,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOpKind {
    And,
    Or,
}

/// An immutable, tagged expression node. Every node carries the `Span` of
/// its leading token so compile/runtime errors can point at it.
#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub span: Span,
    pub kind: ExprKind,
}

#[cfg_attr(feature = "bytecode-cache", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Literal),
    Name(String),
    Getattr {
        base: Box<Expr>,
        attr: String,
        optional: bool,
    },
    Getitem {
        base: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    Slice {
        base: Box<Expr>,
        start: Option<Box<Expr>>,
        stop: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
    },
    FuncCall {
        callee: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        optional: bool,
    },
    Filter {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    InlinedFilter {
        value: Box<Expr>,
        method: String,
    },
    Test {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        negated: bool,
    },
    BinOp {
        op: BinOpKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOpKind,
        operand: Box<Expr>,
    },
    Compare {
        first: Box<Expr>,
        rest: Vec<(CompareOp, Expr)>,
    },
    BoolOp {
        op: BoolOpKind,
        values: Vec<Expr>,
    },
    CondExpr {
        test: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Tuple(Vec<Expr>),
    Concat(Vec<Expr>),
    Range {
        start: Box<Expr>,
        stop: Box<Expr>,
    },
    NullCoalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn new(span: Span, kind: ExprKind) -> Self {
        Self { span, kind }
    }

    /// True for literal/constant-foldable leaves; used by the optimizer's
    /// constant-folding pass to decide whether an expression is "already a
    /// constant" without re-walking it.
    pub fn is_const(&self) -> bool {
        matches!(self.kind, ExprKind::Const(_))
    }

    pub fn as_const(&self) -> Option<&Literal> {
        match &self.kind {
            ExprKind::Const(lit) => Some(lit),
            _ => None,
        }
    }

    /// Walks all identifier names referenced anywhere within this
    /// expression tree (used by introspection's dependency analysis).
    pub fn collect_names(&self, out: &mut Vec<String>) {
        match &self.kind {
            ExprKind::Const(_) => {}
            ExprKind::Name(name) => out.push(name.clone()),
            ExprKind::Getattr { base, .. } => base.collect_names(out),
            ExprKind::Getitem { base, index, .. } => {
                base.collect_names(out);
                index.collect_names(out);
            }
            ExprKind::Slice {
                base,
                start,
                stop,
                step,
            } => {
                base.collect_names(out);
                for e in [start, stop, step].into_iter().flatten() {
                    e.collect_names(out);
                }
            }
            ExprKind::FuncCall {
                callee,
                args,
                kwargs,
                ..
            } => {
                callee.collect_names(out);
                for a in args {
                    a.collect_names(out);
                }
                for (_, v) in kwargs {
                    v.collect_names(out);
                }
            }
            ExprKind::Filter {
                value, args, kwargs, ..
            } => {
                value.collect_names(out);
                for a in args {
                    a.collect_names(out);
                }
                for (_, v) in kwargs {
                    v.collect_names(out);
                }
            }
            ExprKind::InlinedFilter { value, .. } => value.collect_names(out),
            ExprKind::Test { value, args, .. } => {
                value.collect_names(out);
                for a in args {
                    a.collect_names(out);
                }
            }
            ExprKind::BinOp { lhs, rhs, .. } => {
                lhs.collect_names(out);
                rhs.collect_names(out);
            }
            ExprKind::UnaryOp { operand, .. } => operand.collect_names(out),
            ExprKind::Compare { first, rest } => {
                first.collect_names(out);
                for (_, e) in rest {
                    e.collect_names(out);
                }
            }
            ExprKind::BoolOp { values, .. } => {
                for v in values {
                    v.collect_names(out);
                }
            }
            ExprKind::CondExpr {
                test,
                then_branch,
                else_branch,
            } => {
                test.collect_names(out);
                then_branch.collect_names(out);
                if let Some(e) = else_branch {
                    e.collect_names(out);
                }
            }
            ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Concat(items) => {
                for i in items {
                    i.collect_names(out);
                }
            }
            ExprKind::Dict(pairs) => {
                for (k, v) in pairs {
                    k.collect_names(out);
                    v.collect_names(out);
                }
            }
            ExprKind::Range { start, stop } => {
                start.collect_names(out);
                stop.collect_names(out);
            }
            ExprKind::NullCoalesce { lhs, rhs } => {
                lhs.collect_names(out);
                rhs.collect_names(out);
            }
        }
    }
}
