//! Merges adjacent `Data` siblings produced by raw-block flattening and
//! dead-code elimination into a single node, grounded in
//! `optimizer/data_coalescer.py`.

use crate::ast::Node;
use crate::optimizer::PassStats;

pub fn run(nodes: &mut Vec<Node>) -> PassStats {
    let mut stats = PassStats::default();
    *nodes = rewrite(std::mem::take(nodes), &mut stats);
    stats
}

fn rewrite(nodes: Vec<Node>, stats: &mut PassStats) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    for mut node in nodes {
        recurse_into(&mut node, stats);
        if let Node::Data(span, text) = &node {
            if let Some(Node::Data(_, prev_text)) = out.last_mut() {
                prev_text.push_str(text);
                stats.nodes_changed += 1;
                continue;
            }
            out.push(Node::Data(*span, text.clone()));
            continue;
        }
        out.push(node);
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
