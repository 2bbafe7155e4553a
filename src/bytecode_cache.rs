//! Content-addressed on-disk cache for compiled ASTs (§6 "Persisted
//! state"), behind the `bytecode-cache` feature. Grounded in
//! `rendering/kida/bytecode_cache.py::BytecodeCache`: files named by a
//! sanitized template name plus a short source-hash suffix, a version
//! token baked into the key so a host upgrade invalidates old entries
//! rather than misreading them, and failure-tolerant reads that delete a
//! corrupt file instead of propagating the error.

use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::ast::Ast;

/// Bumped whenever the cache file format or the `Ast` shape changes in a
/// way that would make an old entry unreadable or semantically wrong.
const CACHE_FORMAT_VERSION: &str = "1";

pub fn hash_source(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

fn sanitize_name(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub file_count: usize,
    pub total_bytes: u64,
}

pub struct BytecodeCache {
    dir: PathBuf,
}

impl BytecodeCache {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(BytecodeCache { dir })
    }

    fn make_path(&self, template_name: &str, source_hash: &str) -> PathBuf {
        let file_name = format!("__kida_{CACHE_FORMAT_VERSION}_b_{}_{source_hash}.cache", sanitize_name(template_name));
        self.dir.join(file_name)
    }

    /// Returns the cached AST for `(template_name, source_hash)`, or
    /// `None` on a miss or a corrupt entry (which is deleted on the spot).
    pub fn get(&self, template_name: &str, source_hash: &str) -> Option<Ast> {
        let path = self.make_path(template_name, source_hash);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<Ast>(&bytes) {
            Ok(ast) => Some(ast),
            Err(_) => {
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Writes via a temp file + rename so concurrent readers never observe
    /// a partially-written entry.
    pub fn set(&self, template_name: &str, source_hash: &str, ast: &Ast) -> std::io::Result<()> {
        let path = self.make_path(template_name, source_hash);
        let tmp_path = path.with_extension("tmp");
        let bytes = serde_json::to_vec(ast).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Removes cache entries. With `current_version_only`, leaves entries
    /// written by a different `CACHE_FORMAT_VERSION` in place.
    pub fn clear(&self, current_version_only: bool) -> usize {
        let prefix = format!("__kida_{CACHE_FORMAT_VERSION}_b_");
        let mut removed = 0;
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if current_version_only && !name.starts_with(&prefix) {
                continue;
            }
            if !current_version_only && !name.starts_with("__kida_") {
                continue;
            }
            if fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return stats;
        };
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    stats.file_count += 1;
                    stats.total_bytes += meta.len();
                }
            }
        }
        stats
    }

    #[cfg(test)]
    fn path_for_test(&self, template_name: &str, source_hash: &str) -> PathBuf {
        self.make_path(template_name, source_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Ast;

    fn temp_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("kida-bytecode-cache-test-{:?}", std::thread::current().id()));
        dir
    }

    #[test]
    fn hash_is_deterministic_and_distinguishes_sources() {
        let h1 = hash_source("Hello, {{ name }}!");
        let h2 = hash_source("Hello, {{ name }}!");
        let h3 = hash_source("Goodbye, {{ name }}!");
        assert_eq!(h1, h2);
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 16);
    }

    #[test]
    fn miss_then_hit_roundtrips_ast() {
        let dir = temp_dir();
        let _ = fs::remove_dir_all(&dir);
        let cache = BytecodeCache::new(&dir).unwrap();
        assert!(cache.get("test.html", "abc").is_none());
        let ast = Ast::default();
        cache.set("test.html", "abc", &ast).unwrap();
        assert_eq!(cache.get("test.html", "abc"), Some(ast));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupted_entry_is_removed_on_read() {
        let dir = temp_dir().join("corrupt");
        let _ = fs::remove_dir_all(&dir);
        let cache = BytecodeCache::new(&dir).unwrap();
        let path = cache.path_for_test("test.html", "abc");
        fs::write(&path, b"not valid json").unwrap();
        assert!(cache.get("test.html", "abc").is_none());
        assert!(!path.exists());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn sanitizes_path_separators_in_template_name() {
        let dir = temp_dir().join("sanitize");
        let _ = fs::remove_dir_all(&dir);
        let cache = BytecodeCache::new(&dir).unwrap();
        let ast = Ast::default();
        cache.set("dir/subdir/test.html", "abc", &ast).unwrap();
        assert_eq!(cache.get("dir/subdir/test.html", "abc"), Some(ast));
        let _ = fs::remove_dir_all(&dir);
    }
}
