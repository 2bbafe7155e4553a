//! Site-wide block cache with content-hash change detection (§4.8),
//! grounded in `rendering/block_cache.py::BlockCache`. Reads are lock-free
//! map lookups; writes to `site_blocks`/`block_hashes`/stats are each
//! serialized by their own mutex so concurrent per-page rendering never
//! blocks on cache bookkeeping it doesn't touch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::ast::{BlockNode, Expr, ExprKind, Node};
use crate::environment::Environment;
use crate::error::Result;
use crate::introspection::CacheScope;
use crate::runtime::value::Value;

/// Empirical multiplier converting a measured `render_block` time into an
/// estimate of total time saved per cache hit, accounting for context
/// resolution, AST traversal, and inheritance-chain overhead that an
/// isolated block render doesn't pay. See `block_cache.py` for the
/// measurement methodology this constant is taken from.
pub const SAVINGS_MULTIPLIER: f64 = 25.0;

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    hits: u64,
    misses: u64,
    site_blocks_cached: u64,
    total_render_time_ms: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub site_blocks_cached: u64,
    pub hit_rate_pct: f64,
    pub total_render_time_ms: f64,
    pub time_saved_ms: f64,
}

pub struct BlockCache {
    enabled: bool,
    site_blocks: Mutex<HashMap<String, String>>,
    cacheable_blocks: Mutex<HashMap<String, BTreeMap<String, CacheScope>>>,
    block_hashes: Mutex<HashMap<String, String>>,
    stats: Mutex<Stats>,
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BlockCache {
    pub fn new(enabled: bool) -> Self {
        BlockCache {
            enabled,
            site_blocks: Mutex::new(HashMap::new()),
            cacheable_blocks: Mutex::new(HashMap::new()),
            block_hashes: Mutex::new(HashMap::new()),
            stats: Mutex::new(Stats::default()),
        }
    }

    fn key(template_name: &str, block_name: &str) -> String {
        format!("{template_name}:{block_name}")
    }

    pub fn analyze_template(&self, env: &Arc<Environment>, template_name: &str) -> Result<BTreeMap<String, CacheScope>> {
        if !self.enabled {
            return Ok(BTreeMap::new());
        }
        if let Some(found) = self.cacheable_blocks.lock().unwrap().get(template_name) {
            return Ok(found.clone());
        }
        let cacheable = env.get_cacheable_blocks(template_name)?;
        self.cacheable_blocks.lock().unwrap().insert(template_name.to_string(), cacheable.clone());
        Ok(cacheable)
    }

    pub fn get(&self, template_name: &str, block_name: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let key = Self::key(template_name, block_name);
        let site_blocks = self.site_blocks.lock().unwrap();
        if let Some(html) = site_blocks.get(&key) {
            self.stats.lock().unwrap().hits += 1;
            return Some(html.clone());
        }
        drop(site_blocks);
        self.stats.lock().unwrap().misses += 1;
        None
    }

    pub fn set(&self, template_name: &str, block_name: &str, html: String, scope: CacheScope) {
        if !self.enabled || !matches!(scope, CacheScope::Site) {
            return;
        }
        let key = Self::key(template_name, block_name);
        let mut site_blocks = self.site_blocks.lock().unwrap();
        if let std::collections::hash_map::Entry::Vacant(e) = site_blocks.entry(key) {
            e.insert(html);
            self.stats.lock().unwrap().site_blocks_cached += 1;
        }
    }

    /// Renders and caches every `site`-scoped block of `template_name` not
    /// already cached. Returns the count newly cached.
    pub fn warm_site_blocks(&self, env: &Arc<Environment>, template_name: &str, site_context: HashMap<String, Value>) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let cacheable = self.analyze_template(env, template_name)?;
        if cacheable.is_empty() {
            return Ok(0);
        }
        let template = env.get_template(template_name)?;
        let mut cached_count = 0;
        for (block_name, scope) in &cacheable {
            if !matches!(scope, CacheScope::Site) {
                continue;
            }
            let key = Self::key(template_name, block_name);
            if self.site_blocks.lock().unwrap().contains_key(&key) {
                continue;
            }
            let start = Instant::now();
            let html = match template.render_block(block_name, site_context.clone()) {
                Ok(html) => html,
                Err(_) => continue,
            };
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            self.stats.lock().unwrap().total_render_time_ms += elapsed_ms;
            self.set(template_name, block_name, html, CacheScope::Site);
            cached_count += 1;
        }
        Ok(cached_count)
    }

    pub fn clear(&self, preserve_hashes: bool) {
        self.site_blocks.lock().unwrap().clear();
        *self.stats.lock().unwrap() = Stats::default();
        if !preserve_hashes {
            self.block_hashes.lock().unwrap().clear();
        }
    }

    pub fn get_stats(&self) -> CacheStats {
        let stats = *self.stats.lock().unwrap();
        let total = stats.hits + stats.misses;
        let hit_rate_pct = if total > 0 { stats.hits as f64 / total as f64 * 100.0 } else { 0.0 };
        let avg_render_time = if stats.site_blocks_cached > 0 {
            if stats.total_render_time_ms > 0.0 {
                stats.total_render_time_ms / stats.site_blocks_cached as f64
            } else if stats.hits > 0 {
                1.0
            } else {
                0.0
            }
        } else {
            0.0
        };
        let time_saved_ms = stats.hits as f64 * avg_render_time * SAVINGS_MULTIPLIER;
        CacheStats {
            hits: stats.hits,
            misses: stats.misses,
            site_blocks_cached: stats.site_blocks_cached,
            hit_rate_pct,
            total_render_time_ms: stats.total_render_time_ms,
            time_saved_ms,
        }
    }

    pub fn is_cacheable(&self, template_name: &str, block_name: &str) -> bool {
        self.cacheable_blocks.lock().unwrap().get(template_name).map(|m| m.contains_key(block_name)).unwrap_or(false)
    }

    /// Drops a cached entry so the next `warm_site_blocks`/rewarm re-renders
    /// it; used by the external change-detection coordinator (§4.10) after
    /// a rebuild decision names this block for rewarming.
    pub fn invalidate(&self, template_name: &str, block_name: &str) {
        self.site_blocks.lock().unwrap().remove(&Self::key(template_name, block_name));
    }

    pub fn get_scope(&self, template_name: &str, block_name: &str) -> CacheScope {
        self.cacheable_blocks
            .lock()
            .unwrap()
            .get(template_name)
            .and_then(|m| m.get(block_name))
            .copied()
            .unwrap_or(CacheScope::Unknown)
    }

    // -- Block change detection (§4.9) --------------------------------

    pub fn compute_block_hashes(&self, env: &Arc<Environment>, template_name: &str) -> Result<BTreeMap<String, String>> {
        let template = env.get_template(template_name)?;
        let blocks = template.ast.collect_blocks().unwrap_or_default();
        let mut hashes = BTreeMap::new();
        for block in blocks {
            let content = serialize_block_ast(block);
            let digest = Sha256::digest(content.as_bytes());
            let hex = format!("{digest:x}");
            hashes.insert(block.name.clone(), hex[..16].to_string());
        }
        Ok(hashes)
    }

    /// Compares current fingerprints to stored ones, updating the stored
    /// map per block as it goes, and returns the names that differed.
    pub fn detect_changed_blocks(&self, env: &Arc<Environment>, template_name: &str) -> Result<HashSet<String>> {
        let current = self.compute_block_hashes(env, template_name)?;
        let mut changed = HashSet::new();
        let mut hashes = self.block_hashes.lock().unwrap();
        for (block_name, current_hash) in &current {
            let key = Self::key(template_name, block_name);
            let differs = hashes.get(&key) != Some(current_hash);
            if differs {
                changed.insert(block_name.clone());
                hashes.insert(key, current_hash.clone());
            }
        }
        Ok(changed)
    }

    pub fn update_block_hashes(&self, env: &Arc<Environment>, template_name: &str) -> Result<()> {
        let current = self.compute_block_hashes(env, template_name)?;
        let mut hashes = self.block_hashes.lock().unwrap();
        for (block_name, current_hash) in current {
            hashes.insert(Self::key(template_name, &block_name), current_hash);
        }
        Ok(())
    }
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.get_stats();
        write!(f, "BlockCache {{ site_blocks_cached: {}, hit_rate: {:.1}% }}", stats.site_blocks_cached, stats.hit_rate_pct)
    }
}

/// Depth-first, implementation-detail-free serialization of a block's AST:
/// node type names, `Data`/`Raw` text payloads, and referenced identifier
/// names, joined by `|`. Stable across runs and independent of source
/// position, so whitespace-only reformatting that doesn't touch a `Data`
/// node's text or reorder identifiers produces the same fingerprint.
fn serialize_block_ast(block: &BlockNode) -> String {
    let mut parts = vec!["Block".to_string(), block.name.clone()];
    for node in &block.body {
        visit_node(node, &mut parts);
    }
    parts.join("|")
}

fn visit_node(node: &Node, parts: &mut Vec<String>) {
    parts.push(node_type_name(node).to_string());
    match node {
        Node::Data(_, text) | Node::Raw(_, text) => parts.push(format!("{text:?}")),
        Node::Output(_, e, _) => visit_expr(e, parts),
        Node::Block(_, b) => parts.push(b.name.clone()),
        Node::Extends(_, e) => visit_expr(e, parts),
        Node::Do(_, e) => visit_expr(e, parts),
        Node::Set(_, name, e) | Node::Let(_, name, e) | Node::Export(_, name, e) => {
            parts.push(name.clone());
            visit_expr(e, parts);
        }
        Node::If(_, n) => visit_expr(&n.test, parts),
        Node::Unless(_, n) => visit_expr(&n.test, parts),
        Node::For(_, n) => visit_expr(&n.iter, parts),
        Node::Match(_, n) => visit_expr(&n.subject, parts),
        Node::Macro(_, n) => parts.push(n.name.clone()),
        Node::Capture(_, n) => parts.push(n.name.clone()),
        Node::Cache(_, n) => visit_expr(&n.key, parts),
        Node::CallBlock(_, n) => visit_expr(&n.call, parts),
        _ => {}
    }
    for child_seq in node.children() {
        for child in child_seq {
            visit_node(child, parts);
        }
    }
}

fn visit_expr(expr: &Expr, parts: &mut Vec<String>) {
    parts.push(expr_type_name(&expr.kind).to_string());
    match &expr.kind {
        ExprKind::Const(lit) => parts.push(format!("{lit:?}")),
        ExprKind::Name(name) => parts.push(name.clone()),
        ExprKind::Getattr { base, attr, .. } => {
            visit_expr(base, parts);
            parts.push(attr.clone());
        }
        ExprKind::Getitem { base, index, .. } => {
            visit_expr(base, parts);
            visit_expr(index, parts);
        }
        ExprKind::Slice { base, start, stop, step } => {
            visit_expr(base, parts);
            for e in [start, stop, step].into_iter().flatten() {
                visit_expr(e, parts);
            }
        }
        ExprKind::FuncCall { callee, args, kwargs, .. } => {
            visit_expr(callee, parts);
            for a in args {
                visit_expr(a, parts);
            }
            for (name, v) in kwargs {
                parts.push(name.clone());
                visit_expr(v, parts);
            }
        }
        ExprKind::Filter { value, name, args, kwargs } => {
            visit_expr(value, parts);
            parts.push(name.clone());
            for a in args {
                visit_expr(a, parts);
            }
            for (kw, v) in kwargs {
                parts.push(kw.clone());
                visit_expr(v, parts);
            }
        }
        ExprKind::InlinedFilter { value, method } => {
            visit_expr(value, parts);
            parts.push(method.clone());
        }
        ExprKind::Test { value, name, args, negated } => {
            visit_expr(value, parts);
            parts.push(name.clone());
            parts.push(negated.to_string());
            for a in args {
                visit_expr(a, parts);
            }
        }
        ExprKind::BinOp { op, lhs, rhs } => {
            parts.push(format!("{op:?}"));
            visit_expr(lhs, parts);
            visit_expr(rhs, parts);
        }
        ExprKind::UnaryOp { op, operand } => {
            parts.push(format!("{op:?}"));
            visit_expr(operand, parts);
        }
        ExprKind::Compare { first, rest } => {
            visit_expr(first, parts);
            for (op, e) in rest {
                parts.push(format!("{op:?}"));
                visit_expr(e, parts);
            }
        }
        ExprKind::BoolOp { op, values } => {
            parts.push(format!("{op:?}"));
            for v in values {
                visit_expr(v, parts);
            }
        }
        ExprKind::CondExpr { test, then_branch, else_branch } => {
            visit_expr(test, parts);
            visit_expr(then_branch, parts);
            if let Some(e) = else_branch {
                visit_expr(e, parts);
            }
        }
        ExprKind::List(items) | ExprKind::Tuple(items) | ExprKind::Concat(items) => {
            for i in items {
                visit_expr(i, parts);
            }
        }
        ExprKind::Dict(pairs) => {
            for (k, v) in pairs {
                visit_expr(k, parts);
                visit_expr(v, parts);
            }
        }
        ExprKind::Range { start, stop } => {
            visit_expr(start, parts);
            visit_expr(stop, parts);
        }
        ExprKind::NullCoalesce { lhs, rhs } => {
            visit_expr(lhs, parts);
            visit_expr(rhs, parts);
        }
    }
}

fn node_type_name(node: &Node) -> &'static str {
    match node {
        Node::Data(..) => "Data",
        Node::Output(..) => "Output",
        Node::Block(..) => "Block",
        Node::Extends(..) => "Extends",
        Node::Include(..) => "Include",
        Node::Import(..) => "Import",
        Node::FromImport(..) => "FromImport",
        Node::Raw(..) => "Raw",
        Node::Embed(..) => "Embed",
        Node::If(..) => "If",
        Node::For(..) => "For",
        Node::Set(..) => "Set",
        Node::Let(..) => "Let",
        Node::Export(..) => "Export",
        Node::With(..) => "With",
        Node::WithHugo(..) => "WithHugo",
        Node::Do(..) => "Do",
        Node::Capture(..) => "Capture",
        Node::Cache(..) => "Cache",
        Node::FilterBlock(..) => "FilterBlock",
        Node::Macro(..) => "Macro",
        Node::CallBlock(..) => "CallBlock",
        Node::Match(..) => "Match",
        Node::Unless(..) => "Unless",
        Node::Break(..) => "Break",
        Node::Continue(..) => "Continue",
        Node::Spaceless(..) => "Spaceless",
    }
}

fn expr_type_name(kind: &ExprKind) -> &'static str {
    match kind {
        ExprKind::Const(_) => "Const",
        ExprKind::Name(_) => "Name",
        ExprKind::Getattr { .. } => "Getattr",
        ExprKind::Getitem { .. } => "Getitem",
        ExprKind::Slice { .. } => "Slice",
        ExprKind::FuncCall { .. } => "FuncCall",
        ExprKind::Filter { .. } => "Filter",
        ExprKind::InlinedFilter { .. } => "InlinedFilter",
        ExprKind::Test { .. } => "Test",
        ExprKind::BinOp { .. } => "BinOp",
        ExprKind::UnaryOp { .. } => "UnaryOp",
        ExprKind::Compare { .. } => "Compare",
        ExprKind::BoolOp { .. } => "BoolOp",
        ExprKind::CondExpr { .. } => "CondExpr",
        ExprKind::List(_) => "List",
        ExprKind::Dict(_) => "Dict",
        ExprKind::Tuple(_) => "Tuple",
        ExprKind::Concat(_) => "Concat",
        ExprKind::Range { .. } => "Range",
        ExprKind::NullCoalesce { .. } => "NullCoalesce",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_format_matches_template_colon_block() {
        assert_eq!(BlockCache::key("base.html", "nav"), "base.html:nav");
    }

    #[test]
    fn stats_start_at_zero() {
        let cache = BlockCache::new(true);
        let stats = cache.get_stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.hit_rate_pct, 0.0);
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = BlockCache::new(false);
        cache.set("t", "nav", "<nav></nav>".to_string(), CacheScope::Site);
        assert_eq!(cache.get("t", "nav"), None);
    }
}
