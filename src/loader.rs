//! Template source providers, grounded in the predecessor's
//! `environment/loaders.py` (`FileSystemLoader`, a dict-backed loader for
//! tests/embedded templates).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::error::{Error, Result, TemplateNotFoundError};

/// A template source provider. `is_up_to_date` lets the environment skip a
/// recompile when `auto_reload` is on and the backing file hasn't changed.
pub trait Loader: Send + Sync {
    fn get_source(&self, name: &str) -> Result<(String, Option<PathBuf>)>;
    fn is_up_to_date(&self, name: &str, loaded_at: SystemTime) -> bool;
    fn list_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Searches a prioritized list of root directories for `name`, rejecting
/// any path that escapes the roots via `..` traversal.
pub struct FilesystemLoader {
    roots: Vec<PathBuf>,
}

impl FilesystemLoader {
    pub fn new(roots: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        FilesystemLoader {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.split('/').any(|seg| seg == "..") {
            return None;
        }
        for root in &self.roots {
            let candidate = root.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

impl Loader for FilesystemLoader {
    fn get_source(&self, name: &str) -> Result<(String, Option<PathBuf>)> {
        let path = self.resolve(name).ok_or_else(|| {
            Error::from(TemplateNotFoundError {
                name: name.to_string(),
            })
        })?;
        let source = std::fs::read_to_string(&path).map_err(|_| {
            Error::from(TemplateNotFoundError {
                name: name.to_string(),
            })
        })?;
        Ok((source, Some(path)))
    }

    fn is_up_to_date(&self, name: &str, loaded_at: SystemTime) -> bool {
        match self.resolve(name).and_then(|p| p.metadata().ok()).and_then(|m| m.modified().ok()) {
            Some(mtime) => mtime <= loaded_at,
            None => false,
        }
    }
}

/// An in-memory loader for embedded templates and tests; never considered
/// stale by `auto_reload` unless explicitly replaced via `insert`.
#[derive(Default)]
pub struct DictLoader {
    sources: RwLock<HashMap<String, String>>,
}

impl DictLoader {
    pub fn new(sources: HashMap<String, String>) -> Self {
        DictLoader {
            sources: RwLock::new(sources),
        }
    }

    pub fn insert(&self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.write().unwrap().insert(name.into(), source.into());
    }
}

impl Loader for DictLoader {
    fn get_source(&self, name: &str) -> Result<(String, Option<PathBuf>)> {
        self.sources
            .read()
            .unwrap()
            .get(name)
            .map(|s| (s.clone(), None))
            .ok_or_else(|| {
                Error::from(TemplateNotFoundError {
                    name: name.to_string(),
                })
            })
    }

    fn is_up_to_date(&self, _name: &str, _loaded_at: SystemTime) -> bool {
        true
    }

    fn list_names(&self) -> Vec<String> {
        self.sources.read().unwrap().keys().cloned().collect()
    }
}
