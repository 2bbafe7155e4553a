//! Rewrites the closed set of pure, argument-free string filters into
//! `InlinedFilter` nodes the interpreter dispatches without a registry
//! lookup, grounded in `optimizer/filter_inliner.py`'s `_INLINABLE_FILTERS`
//! table (the `isdigit`/`isalpha` entries are omitted: this crate has no
//! boolean-returning filter of that shape to fold them into).

use crate::ast::{Expr, ExprKind, Node};
use crate::optimizer::PassStats;

const INLINABLE: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "title", "capitalize", "swapcase", "casefold",
];

pub fn run(nodes: &mut [Node]) -> PassStats {
    let mut stats = PassStats::default();
    for node in nodes {
        walk_node(node, &mut stats);
    }
    stats
}

fn walk_node(node: &mut Node, stats: &mut PassStats) {
    match node {
        Node::Output(_, e, _) | Node::Set(_, _, e) | Node::Let(_, _, e) | Node::Export(_, _, e) | Node::Do(_, e) => {
            walk_expr(e, stats)
        }
        Node::If(_, n) => {
            walk_expr(&mut n.test, stats);
            walk_nodes(&mut n.body, stats);
            for (cond, body) in &mut n.elifs {
                walk_expr(cond, stats);
                walk_nodes(body, stats);
            }
            walk_nodes(&mut n.else_body, stats);
        }
        Node::Unless(_, n) => {
            walk_expr(&mut n.test, stats);
            walk_nodes(&mut n.body, stats);
            walk_nodes(&mut n.else_body, stats);
        }
        Node::For(_, n) => {
            walk_expr(&mut n.iter, stats);
            walk_nodes(&mut n.body, stats);
            walk_nodes(&mut n.empty_body, stats);
        }
        Node::With(_, n) => {
            for (_, e) in &mut n.bindings {
                walk_expr(e, stats);
            }
            walk_nodes(&mut n.body, stats);
        }
        Node::WithHugo(_, n) => {
            walk_expr(&mut n.expr, stats);
            walk_nodes(&mut n.body, stats);
        }
        Node::Capture(_, n) => walk_nodes(&mut n.body, stats),
        Node::Cache(_, n) => {
            walk_expr(&mut n.key, stats);
            walk_nodes(&mut n.body, stats);
        }
        Node::FilterBlock(_, n) => walk_nodes(&mut n.body, stats),
        Node::Macro(_, n) => walk_nodes(&mut n.body, stats),
        Node::CallBlock(_, n) => {
            walk_expr(&mut n.call, stats);
            walk_nodes(&mut n.body, stats);
        }
        Node::Match(_, n) => {
            walk_expr(&mut n.subject, stats);
            for (_, body) in &mut n.arms {
                walk_nodes(body, stats);
            }
        }
        Node::Spaceless(_, body) => walk_nodes(body, stats),
        Node::Block(_, b) => walk_nodes(&mut b.body, stats),
        _ => {}
    }
}

fn walk_nodes(nodes: &mut [Node], stats: &mut PassStats) {
    for n in nodes {
        walk_node(n, stats);
    }
}

fn walk_expr(e: &mut Expr, stats: &mut PassStats) {
    match &mut e.kind {
        ExprKind::Filter { value, args, kwargs, .. } => {
            walk_expr(value, stats);
            for a in args.iter_mut() {
                walk_expr(a, stats);
            }
            for (_, v) in kwargs.iter_mut() {
                walk_expr(v, stats);
            }
        }
        ExprKind::InlinedFilter { value, .. } => walk_expr(value, stats),
        ExprKind::Getattr { base, .. } => walk_expr(base, stats),
        ExprKind::Getitem { base, index, .. } => {
            walk_expr(base, stats);
            walk_expr(index, stats);
        }
        ExprKind::Slice { base, start, stop, step } => {
            walk_expr(base, stats);
            for e in [start, stop, step].into_iter().flatten() {
                walk_expr(e, stats);
            }
        }
        ExprKind::FuncCall { callee, args, kwargs, .. } => {
            walk_expr(callee, stats);
            for a in args.iter_mut() {
                walk_expr(a, stats);
            }
            for (_, v) in kwargs.iter_mut() {
                walk_expr(v, stats);
            }
        }
        ExprKind::Test { value, args, .. } => {
            walk_expr(value, stats);
            for a in args.iter_mut() {
                walk_expr(a, stats);
            }
        }
        ExprKind::BinOp { lhs, rhs, .. } => {
            walk_expr(lhs, stats);
            walk_expr(rhs, stats);
        }
        ExprKind::UnaryOp { operand, .. } => walk_expr(operand, stats),
        ExprKind::Compare { first, rest } => {
            walk_expr(first, stats);
            for (_, e) in rest.iter_mut() {
                walk_expr(e, stats);
            }
        }
        ExprKind::BoolOp { values, .. } => {
            for v in values.iter_mut() {
                walk_expr(v, stats);
            }
        }
        ExprKind::CondExpr { test, then_branch, else_branch } => {
            walk_expr(test, stats);
            walk_expr(then_branch, stats);
            if let Some(e) = else_branch {
                walk_expr(e, stats);
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Concat(items) => {
            for i in items.iter_mut() {
                walk_expr(i, stats);
            }
        }
        ExprKind::Dict(pairs) => {
            for (k, v) in pairs.iter_mut() {
                walk_expr(k, stats);
                walk_expr(v, stats);
            }
        }
        ExprKind::Range { start, stop } => {
            walk_expr(start, stats);
            walk_expr(stop, stats);
        }
        ExprKind::NullCoalesce { lhs, rhs } => {
            walk_expr(lhs, stats);
            walk_expr(rhs, stats);
        }
        ExprKind::Const(_) | ExprKind::Name(_) => {}
    }

    let inlinable = matches!(
        &e.kind,
        ExprKind::Filter { args, kwargs, name, .. }
            if args.is_empty() && kwargs.is_empty() && INLINABLE.contains(&name.as_str())
    );
    if inlinable {
        if let ExprKind::Filter { value, name, .. } = std::mem::replace(&mut e.kind, ExprKind::Name(String::new())) {
            e.kind = ExprKind::InlinedFilter { value, method: name };
            stats.nodes_changed += 1;
        }
    }
}
