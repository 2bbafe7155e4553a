//! Per-block static analysis (§4.7): purity and cache-scope classification,
//! memoized on the compiled `Template` rather than tracked by a separate
//! analyzer object, since results never change for a given AST.
//!
//! Analysis walks only a block's own body; it never evaluates expressions.
//! A name is "free" if it isn't bound by an enclosing `for`/`with`/`macro`/
//! `capture`/`set`/`let` within the same block.

use std::collections::{BTreeMap, HashSet};

use crate::ast::{BlockNode, ForTarget, Node};

const SITE_ROOTS: &[&str] = &["site", "config"];
const PAGE_ROOTS: &[&str] = &["page", "content", "toc"];
const SAFE_ROOTS: &[&str] = &["site", "config", "page", "content", "toc", "loop"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purity {
    Pure,
    Impure,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    Site,
    Page,
    None,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct BlockIntrospection {
    pub is_pure: Purity,
    pub cache_scope: CacheScope,
    pub free_names: Vec<String>,
}

/// Analyzes every `{% block %}` in `nodes`, keyed by block name.
pub fn analyze_blocks(nodes: &[Node]) -> BTreeMap<String, BlockIntrospection> {
    let mut out = BTreeMap::new();
    collect(nodes, &mut out);
    out
}

fn collect(nodes: &[Node], out: &mut BTreeMap<String, BlockIntrospection>) {
    for node in nodes {
        if let Node::Block(_, b) = node {
            out.insert(b.name.clone(), analyze_block(b));
        }
        for child_seq in node.children() {
            collect(child_seq, out);
        }
    }
}

fn analyze_block(block: &BlockNode) -> BlockIntrospection {
    let mut bound = HashSet::new();
    let mut free = Vec::new();
    let mut has_do = false;
    let mut has_external_cache = false;
    let mut has_cross_template_ref = false;
    walk(&block.body, &mut bound, &mut free, &mut has_do, &mut has_external_cache, &mut has_cross_template_ref);

    let free_roots: HashSet<&str> = free.iter().map(|s| s.as_str()).collect();

    if has_cross_template_ref {
        return BlockIntrospection { is_pure: Purity::Unknown, cache_scope: CacheScope::Unknown, free_names: free };
    }

    let all_safe = free_roots.iter().all(|r| SAFE_ROOTS.contains(r));
    let is_pure = !has_do && !has_external_cache && all_safe;

    let cache_scope = if !is_pure {
        CacheScope::None
    } else if free_roots.iter().all(|r| SITE_ROOTS.contains(r) || *r == "loop") {
        CacheScope::Site
    } else if free_roots.iter().any(|r| PAGE_ROOTS.contains(r)) {
        CacheScope::Page
    } else {
        CacheScope::Unknown
    };

    BlockIntrospection { is_pure: if is_pure { Purity::Pure } else { Purity::Impure }, cache_scope, free_names: free }
}

#[allow(clippy::too_many_arguments)]
fn walk(
    nodes: &[Node],
    bound: &mut HashSet<String>,
    free: &mut Vec<String>,
    has_do: &mut bool,
    has_external_cache: &mut bool,
    has_cross_template_ref: &mut bool,
) {
    for node in nodes {
        match node {
            Node::Output(_, e, _) => record_expr(e, bound, free),
            Node::Do(_, e) => {
                *has_do = true;
                record_expr(e, bound, free);
            }
            Node::Set(_, _, e) | Node::Let(_, _, e) | Node::Export(_, _, e) => record_expr(e, bound, free),
            Node::Include(..) | Node::Import(..) | Node::FromImport(..) | Node::Embed(..) => {
                *has_cross_template_ref = true;
            }
            Node::If(_, n) => {
                record_expr(&n.test, bound, free);
                walk(&n.body, bound, free, has_do, has_external_cache, has_cross_template_ref);
                for (cond, body) in &n.elifs {
                    record_expr(cond, bound, free);
                    walk(body, bound, free, has_do, has_external_cache, has_cross_template_ref);
                }
                walk(&n.else_body, bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::Unless(_, n) => {
                record_expr(&n.test, bound, free);
                walk(&n.body, bound, free, has_do, has_external_cache, has_cross_template_ref);
                walk(&n.else_body, bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::For(_, n) => {
                record_expr(&n.iter, bound, free);
                let mut inner_bound = bound.clone();
                match &n.target {
                    ForTarget::Single(name) => {
                        inner_bound.insert(name.clone());
                    }
                    ForTarget::Tuple(names) => {
                        inner_bound.extend(names.iter().cloned());
                    }
                }
                if let Some(f) = &n.filter {
                    record_expr(f, &inner_bound, free);
                }
                walk(&n.body, &mut inner_bound, free, has_do, has_external_cache, has_cross_template_ref);
                walk(&n.empty_body, bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::With(_, n) => {
                let mut inner_bound = bound.clone();
                for (name, e) in &n.bindings {
                    record_expr(e, &inner_bound, free);
                    inner_bound.insert(name.clone());
                }
                walk(&n.body, &mut inner_bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::WithHugo(_, n) => {
                record_expr(&n.expr, bound, free);
                let mut inner_bound = bound.clone();
                if let Some(name) = &n.bound_name {
                    inner_bound.insert(name.clone());
                }
                walk(&n.body, &mut inner_bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::Capture(_, n) => {
                walk(&n.body, bound, free, has_do, has_external_cache, has_cross_template_ref);
                bound.insert(n.name.clone());
            }
            Node::Cache(_, n) => {
                record_expr(&n.key, bound, free);
                if let Some(ttl) = &n.ttl {
                    record_expr(ttl, bound, free);
                }
                if !n.depends.is_empty() {
                    *has_external_cache = true;
                }
                for d in &n.depends {
                    record_expr(d, bound, free);
                }
                walk(&n.body, bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::FilterBlock(_, n) => {
                for a in &n.args {
                    record_expr(a, bound, free);
                }
                walk(&n.body, bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::Macro(_, n) => {
                let mut inner_bound = bound.clone();
                inner_bound.extend(n.args.iter().cloned());
                for (name, d) in &n.defaults {
                    record_expr(d, &inner_bound, free);
                    inner_bound.insert(name.clone());
                }
                walk(&n.body, &mut inner_bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::CallBlock(_, n) => {
                record_expr(&n.call, bound, free);
                walk(&n.body, bound, free, has_do, has_external_cache, has_cross_template_ref);
            }
            Node::Match(_, n) => {
                record_expr(&n.subject, bound, free);
                for (pat, body) in &n.arms {
                    let mut inner_bound = bound.clone();
                    if let crate::ast::Pattern::Name(name) = pat {
                        inner_bound.insert(name.clone());
                    }
                    walk(body, &mut inner_bound, free, has_do, has_external_cache, has_cross_template_ref);
                }
            }
            Node::Spaceless(_, body) => walk(body, bound, free, has_do, has_external_cache, has_cross_template_ref),
            Node::Block(_, b) => walk(&b.body, bound, free, has_do, has_external_cache, has_cross_template_ref),
            Node::Data(..) | Node::Raw(..) | Node::Extends(..) | Node::Break(..) | Node::Continue(..) => {}
        }
    }
}

fn record_expr(expr: &crate::ast::Expr, bound: &HashSet<String>, free: &mut Vec<String>) {
    let mut names = Vec::new();
    expr.collect_names(&mut names);
    for name in names {
        if !bound.contains(&name) && !free.contains(&name) {
            free.push(name);
        }
    }
}
