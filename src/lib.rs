//! AST-native template compiler and renderer with block-level change
//! detection for incremental rebuilds.
//!
//! A [`Template`] is compiled once from source text and rendered as many
//! times as needed against different contexts; [`Environment`] owns the
//! loader, filter/test/global registries, and the template/fragment
//! caches shared across renders. [`block_cache`]/[`change_detector`]/
//! [`rebuild`] implement the block-level incremental-rebuild pipeline a
//! static-site builder drives from outside this crate.

pub mod ast;
#[cfg(feature = "bytecode-cache")]
pub mod bytecode_cache;
pub mod environment;
pub mod error;
pub mod introspection;
pub mod lexer;
pub mod loader;
pub mod optimizer;
pub mod parser;
pub mod runtime;
pub mod template;

pub mod block_cache;
pub mod change_detector;
pub mod external_detector;
pub mod rebuild;

pub use environment::{Environment, EnvironmentBuilder};
pub use error::{Error, Result};
pub use loader::{DictLoader, FilesystemLoader, Loader};
pub use runtime::{FilterRegistry, Interpreter, TestRegistry, Value};
pub use template::{Template, TemplateMetadata};

pub use block_cache::BlockCache;
pub use change_detector::{BlockChangeDetector, BlockChangeSet};
pub use external_detector::{ChangeCache, ExternalTemplateDetector};
pub use introspection::{BlockIntrospection, CacheScope, Purity};
pub use rebuild::{PageDependencyIndex, RebuildDecision, RebuildDecisionEngine};

#[cfg(feature = "bytecode-cache")]
pub use bytecode_cache::BytecodeCache;
