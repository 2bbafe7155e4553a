//! Removes `{% if %}` / `{% unless %}` branches whose test folded to a
//! constant boolean, splicing the taken branch's body in place of the
//! statement node. Grounded in `optimizer/dead_code_eliminator.py`.

use crate::ast::{Literal, Node};
use crate::optimizer::PassStats;

pub fn run(nodes: &mut Vec<Node>) -> PassStats {
    let mut stats = PassStats::default();
    *nodes = rewrite(std::mem::take(nodes), &mut stats);
    stats
}

fn rewrite(nodes: Vec<Node>, stats: &mut PassStats) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        recurse_into(&mut node, stats);
        match node {
            Node::If(span, mut n) if n.elifs.is_empty() => {
                if let Some(lit) = n.test.as_const() {
                    stats.nodes_changed += 1;
                    if literal_truthy(lit) {
                        out.extend(std::mem::take(&mut n.body));
                    } else {
                        out.extend(std::mem::take(&mut n.else_body));
                    }
                    continue;
                }
                out.push(Node::If(span, n));
            }
            Node::Unless(span, mut n) => {
                if let Some(lit) = n.test.as_const() {
                    stats.nodes_changed += 1;
                    if !literal_truthy(lit) {
                        out.extend(std::mem::take(&mut n.body));
                    } else {
                        out.extend(std::mem::take(&mut n.else_body));
                    }
                    continue;
                }
                out.push(Node::Unless(span, n));
            }
            other => out.push(other),
        }
    }
    out
}

fn recurse_into(node: &mut Node, stats: &mut PassStats) {
    match node {
        Node::If(_, n) => {
            n.body = rewrite(std::mem::take(&mut n.body), stats);
            for (_, body) in n.elifs.iter_mut() {
                *body = rewrite(std::mem::take(body), stats);
            }
            n.else_body = rewrite(std::mem::take(&mut n.else_body), stats);
        }
        Node::Unless(_, n) => {
            n.body = rewrite(std::mem::take(&mut n.body), stats);
            n.else_body = rewrite(std::mem::take(&mut n.else_body), stats);
        }
        Node::For(_, n) => {
            n.body = rewrite(std::mem::take(&mut n.body), stats);
            n.empty_body = rewrite(std::mem::take(&mut n.empty_body), stats);
        }
        Node::With(_, n) => n.body = rewrite(std::mem::take(&mut n.body), stats),
        Node::WithHugo(_, n) => n.body = rewrite(std::mem::take(&mut n.body), stats),
        Node::Capture(_, n) => n.body = rewrite(std::mem::take(&mut n.body), stats),
        Node::Cache(_, n) => n.body = rewrite(std::mem::take(&mut n.body), stats),
        Node::FilterBlock(_, n) => n.body = rewrite(std::mem::take(&mut n.body), stats),
        Node::Macro(_, n) => n.body = rewrite(std::mem::take(&mut n.body), stats),
        Node::CallBlock(_, n) => n.body = rewrite(std::mem::take(&mut n.body), stats),
        Node::Match(_, n) => {
            for (_, body) in n.arms.iter_mut() {
                *body = rewrite(std::mem::take(body), stats);
            }
        }
        Node::Spaceless(_, body) => *body = rewrite(std::mem::take(body), stats),
        Node::Block(_, b) => b.body = rewrite(std::mem::take(&mut b.body), stats),
        _ => {}
    }
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

