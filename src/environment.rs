//! The central configuration and caching hub (§4.6), grounded in the
//! predecessor's `environment/core.py::Environment` dataclass: immutable
//! configuration after construction, copy-on-write filter/test/global
//! registries, two bounded LRU caches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::RwLock;

use crate::error::Result;
use crate::lexer::Delimiters;
use crate::loader::Loader;
use crate::runtime::filters::FilterRegistry;
use crate::runtime::tests::TestRegistry;
use crate::runtime::value::Value;
use crate::template::Template;

pub const DEFAULT_TEMPLATE_CACHE_SIZE: usize = 400;
pub const DEFAULT_FRAGMENT_CACHE_SIZE: usize = 1000;
pub const DEFAULT_FRAGMENT_TTL_SECS: u64 = 300;

pub struct EnvironmentBuilder {
    loader: Option<Arc<dyn Loader>>,
    autoescape: bool,
    auto_reload: bool,
    optimized: bool,
    strict: bool,
    strict_none: bool,
    cache_size: usize,
    fragment_cache_size: usize,
    fragment_ttl: Duration,
    delimiters: Delimiters,
    #[cfg(feature = "bytecode-cache")]
    bytecode_cache: Option<Arc<crate::bytecode_cache::BytecodeCache>>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        EnvironmentBuilder {
            loader: None,
            autoescape: true,
            auto_reload: true,
            optimized: true,
            strict: true,
            strict_none: false,
            cache_size: DEFAULT_TEMPLATE_CACHE_SIZE,
            fragment_cache_size: DEFAULT_FRAGMENT_CACHE_SIZE,
            fragment_ttl: Duration::from_secs(DEFAULT_FRAGMENT_TTL_SECS),
            delimiters: Delimiters::default(),
            #[cfg(feature = "bytecode-cache")]
            bytecode_cache: None,
        }
    }
}

impl EnvironmentBuilder {
    pub fn loader(mut self, loader: Arc<dyn Loader>) -> Self {
        self.loader = Some(loader);
        self
    }
    pub fn autoescape(mut self, v: bool) -> Self {
        self.autoescape = v;
        self
    }
    pub fn auto_reload(mut self, v: bool) -> Self {
        self.auto_reload = v;
        self
    }
    pub fn optimized(mut self, v: bool) -> Self {
        self.optimized = v;
        self
    }
    pub fn strict(mut self, v: bool) -> Self {
        self.strict = v;
        self
    }
    pub fn strict_none(mut self, v: bool) -> Self {
        self.strict_none = v;
        self
    }
    pub fn cache_size(mut self, n: usize) -> Self {
        self.cache_size = n;
        self
    }
    pub fn fragment_cache_size(mut self, n: usize) -> Self {
        self.fragment_cache_size = n;
        self
    }
    pub fn fragment_ttl(mut self, d: Duration) -> Self {
        self.fragment_ttl = d;
        self
    }
    pub fn delimiters(mut self, d: Delimiters) -> Self {
        self.delimiters = d;
        self
    }
    #[cfg(feature = "bytecode-cache")]
    pub fn bytecode_cache(mut self, cache: Arc<crate::bytecode_cache::BytecodeCache>) -> Self {
        self.bytecode_cache = Some(cache);
        self
    }

    pub fn build(self) -> Environment {
        Environment {
            loader: self.loader,
            autoescape: self.autoescape,
            auto_reload: self.auto_reload,
            optimized: self.optimized,
            strict: self.strict,
            strict_none: self.strict_none,
            delimiters: self.delimiters,
            globals: default_globals(),
            filters: RwLock::new(FilterRegistry::default()),
            tests: RwLock::new(TestRegistry::default()),
            template_cache: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(self.cache_size.max(1)).unwrap())),
            fragment_cache: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(self.fragment_cache_size.max(1)).unwrap())),
            fragment_ttl: self.fragment_ttl,
            #[cfg(feature = "bytecode-cache")]
            bytecode_cache: self.bytecode_cache,
        }
    }
}

struct FragmentEntry {
    value: String,
    expires_at: Option<Instant>,
}

/// Thread-safety, per the predecessor's docstring: configuration is
/// immutable after construction; `add_filter`/`add_test`/`add_global` swap
/// in a freshly cloned registry under a short-lived write lock so
/// in-flight renders holding a cloned `Arc` keep seeing the old one.
pub struct Environment {
    pub loader: Option<Arc<dyn Loader>>,
    pub autoescape: bool,
    pub auto_reload: bool,
    pub optimized: bool,
    pub strict: bool,
    pub strict_none: bool,
    pub delimiters: Delimiters,
    pub globals: HashMap<String, Value>,
    filters: RwLock<FilterRegistry>,
    tests: RwLock<TestRegistry>,
    template_cache: Mutex<LruCache<String, Arc<Template>>>,
    fragment_cache: Mutex<LruCache<String, FragmentEntry>>,
    fragment_ttl: Duration,
    #[cfg(feature = "bytecode-cache")]
    bytecode_cache: Option<Arc<crate::bytecode_cache::BytecodeCache>>,
}

fn default_globals() -> HashMap<String, Value> {
    HashMap::new()
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    pub fn new() -> Self {
        EnvironmentBuilder::default().build()
    }

    pub fn filters(&self) -> FilterRegistry {
        self.filters.read().clone()
    }

    pub fn tests(&self) -> TestRegistry {
        self.tests.read().clone()
    }

    pub fn add_filter(&self, name: impl Into<String>, f: crate::runtime::filters::FilterFn) {
        let mut guard = self.filters.write();
        *guard = guard.with(name, f);
    }

    pub fn add_test(&self, name: impl Into<String>, f: crate::runtime::tests::TestFn) {
        let mut guard = self.tests.write();
        *guard = guard.with(name, f);
    }

    /// Compiles `source` directly, bypassing the loader and template cache.
    pub fn from_string(self: &Arc<Self>, source: &str) -> Result<Arc<Template>> {
        Ok(Arc::new(Template::compile(source, Arc::clone(self), None, None)?))
    }

    /// Loads, compiles (or returns a cached compile of), `name` via the
    /// configured loader.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn get_template(self: &Arc<Self>, name: &str) -> Result<Arc<Template>> {
        if self.auto_reload {
            if let Some(cached) = self.cached_if_fresh(name) {
                return Ok(cached);
            }
        } else if let Some(cached) = self.template_cache.lock().unwrap().peek(name).cloned() {
            return Ok(cached);
        }

        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| crate::error::Error::from(crate::error::TemplateNotFoundError { name: name.to_string() }))?;
        let (source, path) = loader.get_source(name)?;

        let template = Arc::new(self.compile_with_bytecode_cache(&source, name, path)?);
        tracing::debug!(template = name, "compiled template");
        self.template_cache.lock().unwrap().put(name.to_string(), Arc::clone(&template));
        Ok(template)
    }

    #[cfg(feature = "bytecode-cache")]
    fn compile_with_bytecode_cache(self: &Arc<Self>, source: &str, name: &str, path: Option<std::path::PathBuf>) -> Result<Template> {
        let Some(bc) = &self.bytecode_cache else {
            return Template::compile(source, Arc::clone(self), Some(name.to_string()), path);
        };
        let hash = crate::bytecode_cache::hash_source(source);
        if let Some(ast) = bc.get(name, &hash) {
            tracing::trace!(template = name, "bytecode cache hit");
            return Template::from_ast(ast, Arc::clone(self), Some(name.to_string()), path);
        }
        let template = Template::compile(source, Arc::clone(self), Some(name.to_string()), path)?;
        if let Err(e) = bc.set(name, &hash, template.ast()) {
            tracing::warn!(template = name, error = %e, "failed to persist bytecode cache entry");
        }
        Ok(template)
    }

    #[cfg(not(feature = "bytecode-cache"))]
    fn compile_with_bytecode_cache(self: &Arc<Self>, source: &str, name: &str, path: Option<std::path::PathBuf>) -> Result<Template> {
        Template::compile(source, Arc::clone(self), Some(name.to_string()), path)
    }

    fn cached_if_fresh(&self, name: &str) -> Option<Arc<Template>> {
        let mut cache = self.template_cache.lock().unwrap();
        let cached = cache.get(name)?.clone();
        let fresh = self.loader.as_ref().map(|l| l.is_up_to_date(name, cached.loaded_at)).unwrap_or(true);
        if fresh {
            Some(cached)
        } else {
            cache.pop(name);
            None
        }
    }

    pub fn fragment_cache_get(&self, key: &str) -> Option<String> {
        let mut cache = self.fragment_cache.lock().unwrap();
        let entry = cache.get(key)?;
        if entry.expires_at.map(|t| Instant::now() >= t).unwrap_or(false) {
            cache.pop(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn fragment_cache_set(&self, key: String, value: String, ttl_secs: Option<f64>) {
        let expires_at = Some(Instant::now() + ttl_secs.map(Duration::from_secs_f64).unwrap_or(self.fragment_ttl));
        self.fragment_cache.lock().unwrap().put(key, FragmentEntry { value, expires_at });
    }

    /// Names known to the configured loader, if it can enumerate them; used
    /// by the rebuild decision engine's inheritance-graph walk (§4.9).
    pub fn list_templates(&self) -> Vec<String> {
        self.loader.as_ref().map(|l| l.list_names()).unwrap_or_default()
    }

    pub fn get_cacheable_blocks(self: &Arc<Self>, name: &str) -> Result<std::collections::BTreeMap<String, crate::introspection::CacheScope>> {
        Ok(self.get_template(name)?.get_cacheable_blocks())
    }

    pub fn cache_info(&self) -> CacheInfo {
        let template = self.template_cache.lock().unwrap();
        let fragment = self.fragment_cache.lock().unwrap();
        CacheInfo {
            template_size: template.len(),
            template_capacity: template.cap().get(),
            fragment_size: fragment.len(),
            fragment_capacity: fragment.cap().get(),
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheInfo {
    pub template_size: usize,
    pub template_capacity: usize,
    pub fragment_size: usize,
    pub fragment_capacity: usize,
}
