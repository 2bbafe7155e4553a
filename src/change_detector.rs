//! Classifies a template's changed blocks by cache scope (§4.9), grounded
//! in `orchestration/incremental/block_detector.py::BlockChangeDetector`.
//! Stateless: safe to call concurrently for different templates.

use std::collections::HashSet;
use std::sync::Arc;

use crate::block_cache::BlockCache;
use crate::environment::Environment;
use crate::error::Result;
use crate::introspection::CacheScope;

#[derive(Debug, Clone, Default)]
pub struct BlockChangeSet {
    pub site_scoped: HashSet<String>,
    pub page_scoped: HashSet<String>,
    pub unknown_scoped: HashSet<String>,
}

impl BlockChangeSet {
    pub fn is_empty(&self) -> bool {
        self.site_scoped.is_empty() && self.page_scoped.is_empty() && self.unknown_scoped.is_empty()
    }

    pub fn only_site_scoped(&self) -> bool {
        !self.site_scoped.is_empty() && self.page_scoped.is_empty() && self.unknown_scoped.is_empty()
    }
}

pub struct BlockChangeDetector {
    block_cache: Arc<BlockCache>,
}

impl BlockChangeDetector {
    pub fn new(block_cache: Arc<BlockCache>) -> Self {
        BlockChangeDetector { block_cache }
    }

    pub fn detect_and_classify(&self, env: &Arc<Environment>, template_name: &str) -> Result<BlockChangeSet> {
        let changed_blocks = self.block_cache.detect_changed_blocks(env, template_name)?;
        if changed_blocks.is_empty() {
            return Ok(BlockChangeSet::default());
        }

        let cacheable = self.block_cache.analyze_template(env, template_name)?;

        let mut changes = BlockChangeSet::default();
        for block_name in changed_blocks {
            match cacheable.get(&block_name) {
                Some(CacheScope::Site) => {
                    changes.site_scoped.insert(block_name);
                }
                Some(CacheScope::Page) => {
                    changes.page_scoped.insert(block_name);
                }
                _ => {
                    changes.unknown_scoped.insert(block_name);
                }
            }
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_reports_empty_and_not_only_site() {
        let changes = BlockChangeSet::default();
        assert!(changes.is_empty());
        assert!(!changes.only_site_scoped());
    }

    #[test]
    fn only_site_scoped_requires_nonempty_site_and_empty_rest() {
        let mut changes = BlockChangeSet::default();
        changes.site_scoped.insert("nav".to_string());
        assert!(changes.only_site_scoped());
        changes.page_scoped.insert("content".to_string());
        assert!(!changes.only_site_scoped());
    }
}
