//! Folds expressions with constant operands into a single `Const` literal,
//! grounded in `optimizer/constant_folder.py`. Runs first so dead-code
//! elimination can see `{% if %}`/`{% unless %}` tests that collapsed to a
//! literal boolean.

use crate::ast::{BinOpKind, BoolOpKind, CompareOp, Expr, ExprKind, Literal, Node, UnaryOpKind};
use crate::optimizer::PassStats;

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
            fold_expr(e, stats);
        }
        Node::If(_, n) => {
            fold_expr(&mut n.test, stats);
            walk_nodes(&mut n.body, stats);
            for (cond, body) in &mut n.elifs {
                fold_expr(cond, stats);
                walk_nodes(body, stats);
            }
            walk_nodes(&mut n.else_body, stats);
        }
        Node::Unless(_, n) => {
            fold_expr(&mut n.test, stats);
            walk_nodes(&mut n.body, stats);
            walk_nodes(&mut n.else_body, stats);
        }
        Node::For(_, n) => {
            fold_expr(&mut n.iter, stats);
            if let Some(f) = &mut n.filter {
                fold_expr(f, stats);
            }
            walk_nodes(&mut n.body, stats);
            walk_nodes(&mut n.empty_body, stats);
        }
        Node::With(_, n) => {
            for (_, e) in &mut n.bindings {
                fold_expr(e, stats);
            }
            walk_nodes(&mut n.body, stats);
        }
        Node::WithHugo(_, n) => {
            fold_expr(&mut n.expr, stats);
            walk_nodes(&mut n.body, stats);
        }
        Node::Capture(_, n) => walk_nodes(&mut n.body, stats),
        Node::Cache(_, n) => {
            fold_expr(&mut n.key, stats);
            if let Some(ttl) = &mut n.ttl {
                fold_expr(ttl, stats);
            }
            for d in &mut n.depends {
                fold_expr(d, stats);
            }
            walk_nodes(&mut n.body, stats);
        }
        Node::FilterBlock(_, n) => {
            for a in &mut n.args {
                fold_expr(a, stats);
            }
            walk_nodes(&mut n.body, stats);
        }
        Node::Macro(_, n) => {
            for (_, d) in &mut n.defaults {
                fold_expr(d, stats);
            }
            walk_nodes(&mut n.body, stats);
        }
        Node::CallBlock(_, n) => {
            fold_expr(&mut n.call, stats);
            walk_nodes(&mut n.body, stats);
        }
        Node::Match(_, n) => {
            fold_expr(&mut n.subject, stats);
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

/// Folds `e` bottom-up; returns true if `e` itself became a new `Const`.
fn fold_expr(e: &mut Expr, stats: &mut PassStats) -> bool {
    match &mut e.kind {
        ExprKind::Const(_) => return true,
        ExprKind::BinOp { op, lhs, rhs } => {
            let lc = fold_expr(lhs, stats);
            let rc = fold_expr(rhs, stats);
            if lc && rc {
                if let (Some(a), Some(b)) = (lhs.as_const(), rhs.as_const()) {
                    if let Some(result) = fold_binop(*op, a, b) {
                        e.kind = ExprKind::Const(result);
                        stats.nodes_changed += 1;
                        return true;
                    }
                }
            }
        }
        ExprKind::UnaryOp { op, operand } => {
            if fold_expr(operand, stats) {
                if let Some(lit) = operand.as_const() {
                    if let Some(result) = fold_unaryop(*op, lit) {
                        e.kind = ExprKind::Const(result);
                        stats.nodes_changed += 1;
                        return true;
                    }
                }
            }
        }
        ExprKind::BoolOp { op, values } => {
            let mut all_const = true;
            for v in values.iter_mut() {
                if !fold_expr(v, stats) {
                    all_const = false;
                }
            }
            if all_const {
                let bools: Vec<bool> = values.iter().filter_map(|v| v.as_const()).map(literal_truthy).collect();
                if bools.len() == values.len() {
                    let result = match op {
                        BoolOpKind::And => bools.iter().all(|b| *b),
                        BoolOpKind::Or => bools.iter().any(|b| *b),
                    };
                    e.kind = ExprKind::Const(Literal::Bool(result));
                    stats.nodes_changed += 1;
                    return true;
                }
            }
        }
        ExprKind::CondExpr { test, then_branch, else_branch } => {
            let test_const = fold_expr(test, stats);
            fold_expr(then_branch, stats);
            if let Some(eb) = else_branch {
                fold_expr(eb, stats);
            }
            if test_const {
                if let Some(lit) = test.as_const() {
                    let taken = if literal_truthy(lit) {
                        Some((**then_branch).clone())
                    } else {
                        else_branch.as_ref().map(|e| (**e).clone())
                    };
                    if let Some(chosen) = taken {
                        *e = chosen;
                        stats.nodes_changed += 1;
                        return e.is_const();
                    }
                }
            }
        }
        ExprKind::Compare { first, rest } => {
            let mut fc = fold_expr(first, stats);
            for (_, rhs) in rest.iter_mut() {
                fc &= fold_expr(rhs, stats);
            }
            if fc && rest.len() == 1 {
                if let (Some(a), Some(b)) = (first.as_const(), rest[0].1.as_const()) {
                    if let Some(result) = fold_compare(rest[0].0, a, b) {
                        e.kind = ExprKind::Const(Literal::Bool(result));
                        stats.nodes_changed += 1;
                        return true;
                    }
                }
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Concat(items) => {
            for i in items.iter_mut() {
                fold_expr(i, stats);
            }
        }
        ExprKind::Dict(pairs) => {
            for (k, v) in pairs.iter_mut() {
                fold_expr(k, stats);
                fold_expr(v, stats);
            }
        }
        ExprKind::Getattr { base, .. } => {
            fold_expr(base, stats);
        }
        ExprKind::Getitem { base, index, .. } => {
            fold_expr(base, stats);
            fold_expr(index, stats);
        }
        ExprKind::Slice { base, start, stop, step } => {
            fold_expr(base, stats);
            for e in [start, stop, step].into_iter().flatten() {
                fold_expr(e, stats);
            }
        }
        ExprKind::FuncCall { callee, args, kwargs, .. } => {
            fold_expr(callee, stats);
            for a in args.iter_mut() {
                fold_expr(a, stats);
            }
            for (_, v) in kwargs.iter_mut() {
                fold_expr(v, stats);
            }
        }
        ExprKind::Filter { value, args, kwargs, .. } => {
            fold_expr(value, stats);
            for a in args.iter_mut() {
                fold_expr(a, stats);
            }
            for (_, v) in kwargs.iter_mut() {
                fold_expr(v, stats);
            }
        }
        ExprKind::InlinedFilter { value, .. } => {
            fold_expr(value, stats);
        }
        ExprKind::Test { value, args, .. } => {
            fold_expr(value, stats);
            for a in args.iter_mut() {
                fold_expr(a, stats);
            }
        }
        ExprKind::Range { start, stop } => {
            fold_expr(start, stats);
            fold_expr(stop, stats);
        }
        ExprKind::NullCoalesce { lhs, rhs } => {
            let lc = fold_expr(lhs, stats);
            fold_expr(rhs, stats);
            if lc {
                if let Some(lit) = lhs.as_const() {
                    if !matches!(lit, Literal::None) {
                        *e = (**lhs).clone();
                        stats.nodes_changed += 1;
                        return true;
                    }
                }
            }
        }
        ExprKind::Name(_) => {}
    }
    e.is_const()
}

fn literal_truthy(lit: &Literal) -> bool {
    match lit {
        Literal::Bool(b) => *b,
        Literal::None => false,
        Literal::Int(i) => *i != 0,
        Literal::Float(f) => *f != 0.0,
        Literal::Str(s) => !s.is_empty(),
    }
}

fn fold_binop(op: BinOpKind, a: &Literal, b: &Literal) -> Option<Literal> {
    use BinOpKind::*;
    if let (Literal::Str(a), Add) = (a, op) {
        if let Literal::Str(b) = b {
            return Some(Literal::Str(format!("{a}{b}")));
        }
    }
    let (Some(x), Some(y)) = (literal_f64(a), literal_f64(b)) else {
        return None;
    };
    if let (Literal::Int(x), Literal::Int(y)) = (a, b) {
        return Some(match op {
            Add => Literal::Int(x.wrapping_add(*y)),
            Sub => Literal::Int(x.wrapping_sub(*y)),
            Mul => Literal::Int(x.wrapping_mul(*y)),
            Div => Literal::Float(*x as f64 / *y as f64),
            FloorDiv if *y != 0 => Literal::Int(x.div_euclid(*y)),
            Mod if *y != 0 => Literal::Int(x.rem_euclid(*y)),
            Pow => Literal::Int(x.pow((*y).max(0) as u32)),
            _ => return None,
        });
    }
    Some(match op {
        Add => Literal::Float(x + y),
        Sub => Literal::Float(x - y),
        Mul => Literal::Float(x * y),
        Div => Literal::Float(x / y),
        FloorDiv => Literal::Float((x / y).floor()),
        Mod => Literal::Float(x % y),
        Pow => Literal::Float(x.powf(y)),
    })
}

fn fold_unaryop(op: UnaryOpKind, lit: &Literal) -> Option<Literal> {
    Some(match op {
        UnaryOpKind::Not => Literal::Bool(!literal_truthy(lit)),
        UnaryOpKind::Neg => match lit {
            Literal::Int(i) => Literal::Int(-i),
            _ => Literal::Float(-literal_f64(lit)?),
        },
        UnaryOpKind::Pos => lit.clone(),
    })
}

fn fold_compare(op: CompareOp, a: &Literal, b: &Literal) -> Option<bool> {
    use CompareOp::*;
    if matches!(op, Eq | Ne) {
        let eq = a == b;
        return Some(if op == Eq { eq } else { !eq });
    }
    let (x, y) = (literal_f64(a)?, literal_f64(b)?);
    Some(match op {
        Lt => x < y,
        Le => x <= y,
        Gt => x > y,
        Ge => x >= y,
        _ => return None,
    })
}

fn literal_f64(lit: &Literal) -> Option<f64> {
    match lit {
        Literal::Int(i) => Some(*i as f64),
        Literal::Float(f) => Some(*f),
        Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
