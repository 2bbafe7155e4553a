//! The render-time half of the crate: the [`value::Value`] type, HTML
//! [`escape`], name-resolution [`context::Scope`], the [`filters`] and
//! [`tests`] registries, and the tree-walking [`interpreter`].

pub mod context;
pub mod escape;
pub mod filters;
pub mod interpreter;
pub mod tests;
pub mod value;

pub use filters::{FilterFn, FilterRegistry};
pub use interpreter::Interpreter;
pub use tests::{TestFn, TestRegistry};
pub use value::Value;
