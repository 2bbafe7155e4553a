//! Thin integration coordinator (§4.10) used by a build orchestrator to
//! turn filesystem change events into a rebuild set. Not part of the
//! compiler proper, but specified here because it's the only consumer of
//! the block-cache/rebuild-decision contracts from outside this crate.
//! Grounded in `orchestration/incremental/template_detector.py`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::block_cache::BlockCache;
use crate::environment::Environment;
use crate::rebuild::{PageDependencyIndex, RebuildDecisionEngine};
use crate::runtime::value::Value;

/// Extends the decision engine's page-dependency contract with the
/// per-file "has this changed since last build" check the coordinator
/// needs to decide whether to even look at a template.
pub trait ChangeCache: PageDependencyIndex {
    fn is_changed(&self, path: &Path) -> bool;
}

/// Above this many candidate template files, checking switches from
/// sequential to a scoped thread-per-chunk sweep (§4.10: "parallel checking
/// with an I/O-bound thread pool").
pub const PARALLEL_THRESHOLD: usize = 50;

#[derive(Debug, Default, Clone)]
pub struct DetectionResult {
    pub pages_to_rebuild: HashSet<PathBuf>,
    pub blocks_rewarmed: usize,
}

pub struct ExternalTemplateDetector {
    env: Arc<Environment>,
    block_cache: Arc<BlockCache>,
    decision_engine: Arc<RebuildDecisionEngine>,
    build_cache: Arc<dyn ChangeCache>,
    roots: Vec<PathBuf>,
    /// Whether the render engine advertises "block-level detection"; when
    /// false every change falls back to file-level affected-pages rebuilds.
    block_level_capable: bool,
    site_context: HashMap<String, Value>,
}

impl ExternalTemplateDetector {
    pub fn new(
        env: Arc<Environment>,
        block_cache: Arc<BlockCache>,
        decision_engine: Arc<RebuildDecisionEngine>,
        build_cache: Arc<dyn ChangeCache>,
        roots: Vec<PathBuf>,
        block_level_capable: bool,
        site_context: HashMap<String, Value>,
    ) -> Self {
        ExternalTemplateDetector {
            env,
            block_cache,
            decision_engine,
            build_cache,
            roots,
            block_level_capable,
            site_context,
        }
    }

    pub fn check_templates(&self) -> DetectionResult {
        let files = self.collect_template_files();
        if files.len() > PARALLEL_THRESHOLD {
            self.check_parallel(files)
        } else {
            self.check_sequential(&files)
        }
    }

    fn collect_template_files(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for root in &self.roots {
            walk_dir(root, &mut out);
        }
        out
    }

    fn check_sequential(&self, files: &[PathBuf]) -> DetectionResult {
        let pages = Mutex::new(HashSet::new());
        let rewarmed = Mutex::new(0usize);
        for file in files {
            self.check_one(file, &pages, &rewarmed);
        }
        let blocks_rewarmed = *rewarmed.lock().unwrap();
        DetectionResult {
            pages_to_rebuild: pages.into_inner().unwrap(),
            blocks_rewarmed,
        }
    }

    fn check_parallel(&self, files: Vec<PathBuf>) -> DetectionResult {
        let pages = Mutex::new(HashSet::new());
        let rewarmed = Mutex::new(0usize);
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8).max(1);
        let chunk_size = ((files.len() + worker_count - 1) / worker_count).max(1);
        std::thread::scope(|scope| {
            for chunk in files.chunks(chunk_size) {
                let pages = &pages;
                let rewarmed = &rewarmed;
                scope.spawn(move || {
                    for file in chunk {
                        self.check_one(file, pages, rewarmed);
                    }
                });
            }
        });
        let blocks_rewarmed = *rewarmed.lock().unwrap();
        DetectionResult {
            pages_to_rebuild: pages.into_inner().unwrap(),
            blocks_rewarmed,
        }
    }

    fn check_one(&self, file: &Path, pages: &Mutex<HashSet<PathBuf>>, rewarmed: &Mutex<usize>) {
        if !self.build_cache.is_changed(file) {
            return;
        }
        let Some(template_name) = self.resolve_template_name(file) else {
            return;
        };

        if self.block_level_capable {
            let decision = self.decision_engine.decide(&template_name, file);
            let count = self.rewarm_blocks(&template_name, &decision.blocks_to_rewarm);
            *rewarmed.lock().unwrap() += count;
            pages.lock().unwrap().extend(decision.pages_to_rebuild);
        } else {
            let affected = self.build_cache.get_affected_pages(file);
            pages.lock().unwrap().extend(affected);
        }
    }

    fn rewarm_blocks(&self, template_name: &str, blocks: &HashSet<String>) -> usize {
        if blocks.is_empty() {
            return 0;
        }
        let Ok(template) = self.env.get_template(template_name) else {
            return 0;
        };
        let mut count = 0;
        for block in blocks {
            self.block_cache.invalidate(template_name, block);
            if let Ok(html) = template.render_block(block, self.site_context.clone()) {
                let scope = self.block_cache.get_scope(template_name, block);
                self.block_cache.set(template_name, block, html, scope);
                count += 1;
            }
        }
        count
    }

    fn resolve_template_name(&self, file: &Path) -> Option<String> {
        for root in &self.roots {
            if let Ok(rel) = file.strip_prefix(root) {
                return Some(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        None
    }
}

fn walk_dir(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_dir(&path, out);
        } else {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_template_name_strips_root_and_normalizes_separators() {
        let detector_roots = vec![PathBuf::from("/site/templates")];
        let file = PathBuf::from("/site/templates/partials/nav.html");
        let rel = detector_roots.iter().find_map(|r| file.strip_prefix(r).ok());
        assert_eq!(rel.unwrap().to_string_lossy().replace('\\', "/"), "partials/nav.html");
    }
}
