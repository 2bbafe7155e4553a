//! Immutable AST node model (§3): expression family in [`expr`], statement
//! and structural family in [`node`].

pub mod expr;
pub mod node;

pub use expr::{BinOpKind, BoolOpKind, CompareOp, Expr, ExprKind, Literal, UnaryOpKind};
pub use node::{
    Ast, BlockNode, CacheNode, CallBlockNode, CaptureNode, EmbedNode, FilterBlockNode, ForNode,
    ForTarget, FromImportNode, IfNode, ImportNode, IncludeNode, MacroNode, MatchNode, Node,
    Pattern, UnlessNode, WithHugoNode, WithNode,
};
