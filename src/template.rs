//! Compiled template object (§4.4 / §4.6). Immutable and `Send + Sync`
//! once built, mirroring the predecessor's `Template` design note: "the
//! StringBuilder pattern instead of generator yields."

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::SystemTime;

use crate::ast::{Ast, BlockNode, Literal};
use crate::environment::Environment;
use crate::error::{BlockNotFoundError, Error, Result};
use crate::introspection::{self, BlockIntrospection, CacheScope, Purity};
use crate::optimizer::{self, OptimizationReport};
use crate::runtime::context::Scope;
use crate::runtime::interpreter::Interpreter;
use crate::runtime::value::Value;

#[derive(Debug, Clone, Default)]
pub struct TemplateMetadata {
    pub estimated_buffer_bytes: usize,
    pub static_byte_count: usize,
    pub output_op_count: usize,
    pub optimization: Option<OptimizationReport>,
    /// The string-literal target of `{% extends %}`, if any (§4.9's
    /// inheritance-graph walk only follows statically-known parents).
    pub extends: Option<String>,
    pub blocks: BTreeMap<String, BlockIntrospection>,
}

pub struct Template {
    pub name: Option<String>,
    pub source_path: Option<std::path::PathBuf>,
    pub(crate) ast: Ast,
    pub(crate) env: Arc<Environment>,
    pub metadata: TemplateMetadata,
    pub(crate) loaded_at: SystemTime,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("source_path", &self.source_path)
            .field("metadata", &self.metadata)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

impl Template {
    pub fn compile(source: &str, env: Arc<Environment>, name: Option<String>, source_path: Option<std::path::PathBuf>) -> Result<Template> {
        let ast = crate::parser::parse(source, &env.delimiters)?;
        Self::from_ast(ast, env, name, source_path)
    }

    /// Builds a `Template` from an already-parsed `Ast`, skipping the lex/
    /// parse pass entirely. Used by [`Environment::get_template`] on a
    /// bytecode-cache hit, where the persisted artifact already holds the
    /// parsed tree.
    pub(crate) fn from_ast(mut ast: Ast, env: Arc<Environment>, name: Option<String>, source_path: Option<std::path::PathBuf>) -> Result<Template> {
        let extends = match &ast.extends {
            Some(e) => match &e.kind {
                crate::ast::ExprKind::Const(Literal::Str(s)) => Some(s.clone()),
                _ => None,
            },
            None => None,
        };
        let mut metadata = TemplateMetadata {
            static_byte_count: static_byte_count(&ast.nodes),
            extends,
            blocks: introspection::analyze_blocks(&ast.nodes),
            ..Default::default()
        };
        if env.optimized {
            let report = optimizer::optimize(&mut ast);
            metadata.optimization = Some(report);
        }
        metadata.output_op_count = count_output_ops(&ast.nodes);
        metadata.estimated_buffer_bytes = optimizer::buffer_estimate::estimate(metadata.static_byte_count, metadata.output_op_count);
        Ok(Template {
            name,
            source_path,
            ast,
            env,
            metadata,
            loaded_at: SystemTime::now(),
        })
    }

    pub fn template_metadata(&self) -> &TemplateMetadata {
        &self.metadata
    }

    /// The optimized AST, exposed so the bytecode cache can persist it
    /// without re-parsing on the next process start.
    #[cfg(feature = "bytecode-cache")]
    pub(crate) fn ast(&self) -> &Ast {
        &self.ast
    }

    /// Blocks whose introspected scope is `site` or `page` and whose
    /// purity is `pure` (§4.7).
    pub fn get_cacheable_blocks(&self) -> BTreeMap<String, CacheScope> {
        self.metadata
            .blocks
            .iter()
            .filter(|(_, info)| matches!(info.is_pure, Purity::Pure) && matches!(info.cache_scope, CacheScope::Site | CacheScope::Page))
            .map(|(name, info)| (name.clone(), info.cache_scope))
            .collect()
    }

    pub fn render(&self, context: HashMap<String, Value>) -> Result<String> {
        self.render_internal(context)
    }

    /// Used by `{% include %}` / `{% embed %}` with `with context`: merges
    /// the caller's currently-visible names on top of this template's own
    /// globals rather than sharing the caller's `Scope` object directly
    /// (which is tied to the caller's own `Environment` globals reference).
    pub(crate) fn render_with_scope(&self, caller_scope: &Scope) -> Result<String> {
        self.render_internal(caller_scope.snapshot())
    }

    fn render_internal(&self, context: HashMap<String, Value>) -> Result<String> {
        // Resolve the `{% extends %}` chain by loading each ancestor into
        // `owned_parents` (leaf to root); the root's node sequence is what
        // actually gets walked, with each template in the chain
        // contributing block overrides (leaf wins).
        let mut owned_parents: Vec<Arc<Template>> = Vec::new();
        let mut current_ast: &Ast = &self.ast;
        loop {
            let Some(extends_expr) = &current_ast.extends else {
                break;
            };
            let parent_name = match &extends_expr.kind {
                crate::ast::ExprKind::Const(Literal::Str(s)) => s.clone(),
                _ => {
                    return Err(Error::from(crate::error::TemplateRuntimeError::new(
                        "dynamic {% extends %} targets are not supported; use a string literal",
                        extends_expr.span,
                    )))
                }
            };
            let parent = self.env.get_template(&parent_name)?;
            owned_parents.push(parent);
            current_ast = &owned_parents.last().unwrap().ast;
        }

        let root_ast: &Ast = owned_parents.last().map(|t| &t.ast).unwrap_or(&self.ast);
        let mut blocks: HashMap<String, Vec<&BlockNode>> = HashMap::new();
        if let Ok(found) = self.ast.collect_blocks() {
            for b in found {
                blocks.entry(b.name.clone()).or_default().push(b);
            }
        }
        for tmpl in &owned_parents {
            if let Ok(found) = tmpl.ast.collect_blocks() {
                for b in found {
                    blocks.entry(b.name.clone()).or_default().push(b);
                }
            }
        }

        let mut interpreter = Interpreter::new(Arc::clone(&self.env), self.name.as_deref(), self.env.autoescape);
        for (name, chain) in blocks {
            interpreter.register_block_chain(name, chain);
        }
        let mut scope = Scope::new(&self.env.globals, context, self.env.strict);
        interpreter.render(&root_ast.nodes, &mut scope)
    }

    pub fn render_block(&self, name: &str, context: HashMap<String, Value>) -> Result<String> {
        let found = self
            .ast
            .collect_blocks()
            .map_err(|msg| Error::from(crate::error::TemplateRuntimeError::new(msg, crate::error::Span::default())))?;
        let block = found.into_iter().find(|b| b.name == name).ok_or_else(|| {
            let available = self.ast.collect_blocks().map(|bs| bs.iter().map(|b| b.name.clone()).collect()).unwrap_or_default();
            Error::from(BlockNotFoundError {
                name: name.to_string(),
                available,
            })
        })?;
        let mut interpreter = Interpreter::new(Arc::clone(&self.env), self.name.as_deref(), self.env.autoescape);
        let mut scope = Scope::new(&self.env.globals, context, self.env.strict);
        interpreter.render(&block.body, &mut scope)
    }

    /// Evaluates this template's top-level `{% set %}` / `{% let %}` /
    /// `{% macro %}` bindings as a namespace, for `{% import %}` and
    /// `{% from ... import ... %}`. Macros are re-exported as callables
    /// that recompile and invoke their body on each call.
    pub(crate) fn export_namespace(self: &Arc<Self>) -> Result<BTreeMap<String, Value>> {
        let mut interpreter = Interpreter::new(Arc::clone(&self.env), self.name.as_deref(), self.env.autoescape);
        let mut scope = Scope::new(&self.env.globals, HashMap::new(), self.env.strict);
        interpreter.render(&self.ast.nodes, &mut scope)?;
        let mut ns: BTreeMap<String, Value> = scope.snapshot().into_iter().collect();
        for node in &self.ast.nodes {
            if let crate::ast::Node::Macro(_, m) = node {
                let tmpl = Arc::clone(self);
                let macro_name = m.name.clone();
                ns.insert(
                    macro_name.clone(),
                    Value::Callable(Arc::new(move |args: &[Value], kwargs: &[(String, Value)]| tmpl.call_exported_macro(&macro_name, args, kwargs))),
                );
            }
        }
        Ok(ns)
    }

    fn call_exported_macro(&self, name: &str, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value> {
        let macro_node = self.ast.nodes.iter().find_map(|n| match n {
            crate::ast::Node::Macro(_, m) if m.name == name => Some(m),
            _ => None,
        });
        let Some(m) = macro_node else {
            return Ok(Value::Undefined);
        };
        let mut interpreter = Interpreter::new(Arc::clone(&self.env), self.name.as_deref(), self.env.autoescape);
        let mut scope = Scope::new(&self.env.globals, HashMap::new(), self.env.strict);
        interpreter.call_macro_public(m, args, kwargs, &mut scope)
    }
}

fn static_byte_count(nodes: &[crate::ast::Node]) -> usize {
    let mut total = 0;
    for node in nodes {
        if let crate::ast::Node::Data(_, text) = node {
            total += text.len();
        }
        for child_seq in node.children() {
            total += static_byte_count(child_seq);
        }
    }
    total
}

fn count_output_ops(nodes: &[crate::ast::Node]) -> usize {
    let mut total = 0;
    for node in nodes {
        if matches!(node, crate::ast::Node::Output(..)) {
            total += 1;
        }
        for child_seq in node.children() {
            total += count_output_ops(child_seq);
        }
    }
    total
}
