//! Rebuild-scope decision engine (§4.9), grounded in
//! `orchestration/incremental/rebuild_decision.py::RebuildDecisionEngine`.
//! Turns a changed template's block classification into the minimal set of
//! pages that actually need re-rendering, falling back to a full rebuild of
//! affected pages whenever any input step can't be trusted.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::block_cache::BlockCache;
use crate::change_detector::BlockChangeDetector;
use crate::environment::Environment;

/// The embedding site builder's template-to-page dependency index. This
/// crate only consumes it; the index itself lives outside the compiler
/// boundary (§4.9: "the BuildCache's template-to-page dependency index").
pub trait PageDependencyIndex: Send + Sync {
    fn get_affected_pages(&self, template_path: &Path) -> HashSet<PathBuf>;
}

#[derive(Debug, Clone, Default)]
pub struct RebuildDecision {
    pub blocks_to_rewarm: HashSet<String>,
    pub pages_to_rebuild: HashSet<PathBuf>,
    pub skip_all_pages: bool,
    pub reason: String,
    pub child_templates: HashSet<String>,
}

pub struct RebuildDecisionEngine {
    env: Arc<Environment>,
    block_detector: BlockChangeDetector,
    build_cache: Arc<dyn PageDependencyIndex>,
    inheritance_cache: Mutex<HashMap<String, HashSet<String>>>,
}

impl RebuildDecisionEngine {
    pub fn new(env: Arc<Environment>, block_cache: Arc<BlockCache>, build_cache: Arc<dyn PageDependencyIndex>) -> Self {
        RebuildDecisionEngine {
            env,
            block_detector: BlockChangeDetector::new(block_cache),
            build_cache,
            inheritance_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Never raises: any failure along the way degrades to a conservative
    /// full rebuild of the pages the BuildCache associates with
    /// `template_path`, with `reason` explaining the fallback.
    pub fn decide(&self, template_name: &str, template_path: &Path) -> RebuildDecision {
        let changes = match self.block_detector.detect_and_classify(&self.env, template_name) {
            Ok(c) => c,
            Err(err) => {
                return RebuildDecision {
                    blocks_to_rewarm: HashSet::new(),
                    pages_to_rebuild: self.build_cache.get_affected_pages(template_path),
                    skip_all_pages: false,
                    reason: format!("change detection failed ({err}); rebuilding all affected pages"),
                    child_templates: HashSet::new(),
                };
            }
        };

        let child_templates = self.get_child_templates(template_name);

        // Case 1: file touched, no block content actually changed.
        if changes.is_empty() {
            return RebuildDecision {
                blocks_to_rewarm: HashSet::new(),
                pages_to_rebuild: HashSet::new(),
                skip_all_pages: true,
                reason: "No block content changed".to_string(),
                child_templates: HashSet::new(),
            };
        }

        // Case 2: only site-scoped blocks changed.
        if changes.only_site_scoped() {
            let child_overrides = self.check_child_overrides(&child_templates, &changes.site_scoped);
            if !child_overrides.is_empty() {
                let affected_pages = self.get_affected_pages_from_templates(&child_overrides);
                return RebuildDecision {
                    blocks_to_rewarm: changes.site_scoped,
                    pages_to_rebuild: affected_pages,
                    skip_all_pages: false,
                    reason: format!("Child templates override changed blocks: {child_overrides:?}"),
                    child_templates: child_overrides,
                };
            }
            return RebuildDecision {
                blocks_to_rewarm: changes.site_scoped.clone(),
                pages_to_rebuild: HashSet::new(),
                skip_all_pages: true,
                reason: format!("Only site-scoped blocks changed: {:?}", changes.site_scoped),
                child_templates: HashSet::new(),
            };
        }

        // Case 3: page-scoped or unknown-scoped blocks changed.
        let affected_pages = self.build_cache.get_affected_pages(template_path);
        let reason_blocks: HashSet<&String> = changes.page_scoped.iter().chain(changes.unknown_scoped.iter()).collect();
        RebuildDecision {
            blocks_to_rewarm: changes.site_scoped,
            pages_to_rebuild: affected_pages,
            skip_all_pages: false,
            reason: format!("Page-scoped blocks changed: {reason_blocks:?}"),
            child_templates,
        }
    }

    fn get_child_templates(&self, parent_name: &str) -> HashSet<String> {
        if let Some(cached) = self.inheritance_cache.lock().unwrap().get(parent_name) {
            return cached.clone();
        }
        let mut children = HashSet::new();
        for name in self.env.list_templates() {
            let Ok(template) = self.env.get_template(&name) else {
                continue;
            };
            if template.template_metadata().extends.as_deref() == Some(parent_name) {
                children.insert(name);
            }
        }
        self.inheritance_cache.lock().unwrap().insert(parent_name.to_string(), children.clone());
        children
    }

    fn check_child_overrides(&self, child_templates: &HashSet<String>, changed_blocks: &HashSet<String>) -> HashSet<String> {
        let mut overriding = HashSet::new();
        for child_name in child_templates {
            match self.env.get_template(child_name) {
                Ok(template) => {
                    let child_blocks: HashSet<&String> = template.template_metadata().blocks.keys().collect();
                    if changed_blocks.iter().any(|b| child_blocks.contains(b)) {
                        overriding.insert(child_name.clone());
                    }
                }
                // Can't analyze it: assume it might override (conservative).
                Err(_) => {
                    overriding.insert(child_name.clone());
                }
            }
        }
        overriding
    }

    fn get_affected_pages_from_templates(&self, template_names: &HashSet<String>) -> HashSet<PathBuf> {
        let mut affected = HashSet::new();
        for name in template_names {
            if let Ok(template) = self.env.get_template(name) {
                if let Some(path) = &template.source_path {
                    affected.extend(self.build_cache.get_affected_pages(path));
                }
            }
        }
        affected
    }

    pub fn clear_inheritance_cache(&self) {
        self.inheritance_cache.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_default_is_conservative() {
        let decision = RebuildDecision::default();
        assert!(!decision.skip_all_pages);
        assert!(decision.pages_to_rebuild.is_empty());
    }
}
