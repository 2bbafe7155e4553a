//! Tree-walking renderer: optimized [`Ast`] + [`Scope`] → `String` (§4.4).
//!
//! An interpreter strategy rather than compile-to-host: the runtime API
//! (`Environment::get_template` / `Template::render`) hands back a template
//! object at call time with no Rust-compiler step available to it, so the
//! optimized AST is walked directly instead of being lowered to generated
//! source the way a proc-macro pipeline would.

use std::collections::{BTreeMap, HashMap};

use crate::ast::{BlockNode, ExprKind, ForTarget, MacroNode, Node, Pattern};
use crate::error::{Error, Result, Span, TemplateRuntimeError, UndefinedError};
use crate::runtime::context::Scope;
use crate::runtime::escape;
use crate::runtime::value::Value;

/// Non-local control transfer for `{% break %}` / `{% continue %}`.
enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interpreter<'a> {
    pub env: std::sync::Arc<crate::environment::Environment>,
    pub template_name: Option<&'a str>,
    macros: HashMap<String, &'a MacroNode>,
    /// Block bodies in override order, innermost (leaf template) first, so
    /// `{% block x %}...{% endblock %}` in a child wins and `super()` can
    /// walk outward to the parent's version.
    blocks: HashMap<String, Vec<&'a BlockNode>>,
    autoescape: bool,
}

impl<'a> Interpreter<'a> {
    pub fn new(env: std::sync::Arc<crate::environment::Environment>, template_name: Option<&'a str>, autoescape: bool) -> Self {
        Interpreter {
            env,
            template_name,
            macros: HashMap::new(),
            blocks: HashMap::new(),
            autoescape,
        }
    }

    /// Renders the fully-resolved node list (inheritance already flattened
    /// by `Template::render`, which supplies the most-derived block bodies
    /// in `self.blocks`).
    pub fn render(&mut self, nodes: &'a [Node], scope: &mut Scope) -> Result<String> {
        self.collect_macros(nodes);
        let mut out = String::new();
        self.render_nodes(nodes, scope, &mut out)?;
        Ok(out)
    }

    pub fn register_block_chain(&mut self, name: String, chain: Vec<&'a BlockNode>) {
        self.blocks.insert(name, chain);
    }

    /// Block-level cache short-circuit: a caller that already has a warm
    /// `BlockCache` entry passes it in via the reserved `_cached_blocks`
    /// context key (`{name: rendered_html}`) instead of paying for a
    /// re-render on every page that shares the block.
    fn cached_block_html(&self, name: &str, scope: &Scope) -> Option<String> {
        let cached = scope.get("_cached_blocks")?;
        let map = cached.as_map()?;
        map.get(name).map(|v| v.to_string())
    }

    fn collect_macros(&mut self, nodes: &'a [Node]) {
        for n in nodes {
            if let Node::Macro(_, m) = n {
                self.macros.insert(m.name.clone(), m);
            }
        }
    }

    fn render_nodes(&mut self, nodes: &'a [Node], scope: &mut Scope, out: &mut String) -> Result<Flow> {
        for node in nodes {
            match self.render_node(node, scope, out)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn render_node(&mut self, node: &'a Node, scope: &mut Scope, out: &mut String) -> Result<Flow> {
        match node {
            Node::Data(_, text) | Node::Raw(_, text) => out.push_str(text),
            Node::Output(span, expr, escape_override) => {
                let v = self.eval(expr, scope)?;
                let text = v.to_string();
                let should_escape = escape_override.unwrap_or(self.autoescape);
                if should_escape {
                    out.push_str(&escape::escape(&text));
                } else {
                    out.push_str(&text);
                }
                let _ = span;
            }
            Node::Block(_, b) => {
                if let Some(html) = self.cached_block_html(&b.name, scope) {
                    out.push_str(&html);
                    return Ok(Flow::Normal);
                }
                let chain = self.blocks.get(&b.name).cloned().unwrap_or_default();
                let body: &[Node] = chain.first().map(|bn| bn.body.as_slice()).unwrap_or(&b.body);
                scope.push();
                let flow = self.render_nodes(body, scope, out)?;
                scope.pop();
                return Ok(flow);
            }
            Node::Extends(..) => {}
            Node::Include(span, inc) => {
                let name = self.eval(&inc.target, scope)?.to_string();
                match self.env.get_template(&name) {
                    Ok(tmpl) => {
                        let rendered = if inc.with_context {
                            tmpl.render_with_scope(scope)?
                        } else {
                            tmpl.render(HashMap::new())?
                        };
                        out.push_str(&rendered);
                    }
                    Err(e) if inc.ignore_missing => {
                        let _ = e;
                    }
                    Err(e) => return Err(e),
                }
                let _ = span;
            }
            Node::Import(span, imp) => {
                let name = self.eval(&imp.target, scope)?.to_string();
                let tmpl = self.env.get_template(&name)?;
                let ns = tmpl.export_namespace()?;
                scope.set(imp.alias.clone(), Value::map(ns));
                let _ = span;
            }
            Node::FromImport(span, imp) => {
                let name = self.eval(&imp.target, scope)?.to_string();
                let tmpl = self.env.get_template(&name)?;
                let ns = tmpl.export_namespace()?;
                for (src, alias) in &imp.names {
                    let v = ns.get(src).cloned().unwrap_or(Value::Undefined);
                    scope.set(alias.clone().unwrap_or_else(|| src.clone()), v);
                }
                let _ = span;
            }
            Node::Embed(span, emb) => {
                let name = self.eval(&emb.target, scope)?.to_string();
                let tmpl = self.env.get_template(&name)?;
                let rendered = if emb.with_context {
                    tmpl.render_with_scope(scope)?
                } else {
                    tmpl.render(HashMap::new())?
                };
                out.push_str(&rendered);
                let _ = span;
            }
            Node::If(_, n) => {
                if self.eval(&n.test, scope)?.is_truthy() {
                    scope.push();
                    let flow = self.render_nodes(&n.body, scope, out)?;
                    scope.pop();
                    return Ok(flow);
                }
                for (cond, body) in &n.elifs {
                    if self.eval(cond, scope)?.is_truthy() {
                        scope.push();
                        let flow = self.render_nodes(body, scope, out)?;
                        scope.pop();
                        return Ok(flow);
                    }
                }
                scope.push();
                let flow = self.render_nodes(&n.else_body, scope, out)?;
                scope.pop();
                return Ok(flow);
            }
            Node::Unless(_, n) => {
                if !self.eval(&n.test, scope)?.is_truthy() {
                    scope.push();
                    let flow = self.render_nodes(&n.body, scope, out)?;
                    scope.pop();
                    return Ok(flow);
                }
                scope.push();
                let flow = self.render_nodes(&n.else_body, scope, out)?;
                scope.pop();
                return Ok(flow);
            }
            Node::For(_, n) => {
                let iterable = self.eval(&n.iter, scope)?;
                let items: Vec<Value> = match &iterable {
                    Value::List(items) => (**items).clone(),
                    Value::Map(m) => m.keys().map(|k| Value::str(k.clone())).collect(),
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    _ => Vec::new(),
                };
                let filtered: Vec<Value> = if let Some(filter) = &n.filter {
                    let mut kept = Vec::new();
                    for item in items {
                        scope.push();
                        self.bind_target(&n.target, item.clone(), scope);
                        let keep = self.eval(filter, scope)?.is_truthy();
                        scope.pop();
                        if keep {
                            kept.push(item);
                        }
                    }
                    kept
                } else {
                    items
                };
                if filtered.is_empty() {
                    scope.push();
                    let flow = self.render_nodes(&n.empty_body, scope, out)?;
                    scope.pop();
                    return Ok(flow);
                }
                let len = filtered.len();
                'outer: for (idx, item) in filtered.into_iter().enumerate() {
                    scope.push();
                    self.bind_target(&n.target, item, scope);
                    scope.set("loop", loop_value(idx, len));
                    match self.render_nodes(&n.body, scope, out)? {
                        Flow::Break => {
                            scope.pop();
                            break 'outer;
                        }
                        Flow::Continue | Flow::Normal => {}
                    }
                    scope.pop();
                }
            }
            Node::Set(_, name, expr) => {
                let v = self.eval(expr, scope)?;
                scope.set(name.clone(), v);
            }
            Node::Let(_, name, expr) => {
                let v = self.eval(expr, scope)?;
                scope.let_bind(name.clone(), v);
            }
            Node::Export(_, name, expr) => {
                let v = self.eval(expr, scope)?;
                scope.set(name.clone(), v);
                scope.export(name);
            }
            Node::With(_, n) => {
                scope.push();
                for (name, expr) in &n.bindings {
                    let v = self.eval(expr, scope)?;
                    scope.set(name.clone(), v);
                }
                let flow = self.render_nodes(&n.body, scope, out)?;
                scope.pop();
                return Ok(flow);
            }
            Node::WithHugo(_, n) => {
                let v = self.eval(&n.expr, scope)?;
                if v.is_truthy() {
                    scope.push();
                    let bound = n.bound_name.clone().unwrap_or_else(|| ".".to_string());
                    scope.set(bound, v);
                    let flow = self.render_nodes(&n.body, scope, out)?;
                    scope.pop();
                    return Ok(flow);
                }
            }
            Node::Do(_, expr) => {
                self.eval(expr, scope)?;
            }
            Node::Capture(_, n) => {
                scope.push();
                let mut inner = String::new();
                self.render_nodes(&n.body, scope, &mut inner)?;
                scope.pop();
                let mut value = Value::str(inner);
                if let Some(filter_name) = &n.filter {
                    value = self.apply_filter(filter_name, value, &[], &[], scope)?;
                }
                scope.set(n.name.clone(), value);
            }
            Node::Cache(span, n) => {
                let key = self.eval(&n.key, scope)?.to_string();
                if let Some(hit) = self.env.fragment_cache_get(&key) {
                    out.push_str(&hit);
                } else {
                    let mut inner = String::new();
                    scope.push();
                    self.render_nodes(&n.body, scope, &mut inner)?;
                    scope.pop();
                    let ttl = match &n.ttl {
                        Some(e) => Some(self.eval(e, scope)?.coerce_numeric()),
                        None => None,
                    };
                    self.env.fragment_cache_set(key, inner.clone(), ttl);
                    out.push_str(&inner);
                }
                let _ = span;
            }
            Node::FilterBlock(_, n) => {
                let mut inner = String::new();
                scope.push();
                self.render_nodes(&n.body, scope, &mut inner)?;
                scope.pop();
                let mut args = Vec::with_capacity(n.args.len());
                for a in &n.args {
                    args.push(self.eval(a, scope)?);
                }
                let value = self.apply_filter(&n.filter, Value::str(inner), &args, &[], scope)?;
                out.push_str(&value.to_string());
            }
            Node::Macro(..) => {}
            Node::CallBlock(span, n) => {
                // Best-effort: the enclosing macro is invoked for its side
                // effects/output; `caller()` is approximated by appending
                // the call block's body rather than threading it through as
                // a bound callable argument.
                let call_out = self.eval(&n.call, scope)?;
                out.push_str(&call_out.to_string());
                scope.push();
                self.render_nodes(&n.body, scope, out)?;
                scope.pop();
                let _ = span;
            }
            Node::Match(_, n) => {
                let subject = self.eval(&n.subject, scope)?;
                for (pattern, body) in &n.arms {
                    let matched = match pattern {
                        Pattern::Wildcard => true,
                        Pattern::Name(name) => {
                            scope.push();
                            scope.set(name.clone(), subject.clone());
                            true
                        }
                        Pattern::Const(lit) => subject.equals(&Value::from(lit)),
                    };
                    if matched {
                        let push_already = matches!(pattern, Pattern::Name(_));
                        if !push_already {
                            scope.push();
                        }
                        let flow = self.render_nodes(body, scope, out)?;
                        scope.pop();
                        return Ok(flow);
                    }
                }
            }
            Node::Break(_) => return Ok(Flow::Break),
            Node::Continue(_) => return Ok(Flow::Continue),
            Node::Spaceless(_, body) => {
                let mut inner = String::new();
                self.render_nodes(body, scope, &mut inner)?;
                out.push_str(&collapse_interag_whitespace(&inner));
            }
        }
        Ok(Flow::Normal)
    }

    fn bind_target(&self, target: &ForTarget, value: Value, scope: &mut Scope) {
        match target {
            ForTarget::Single(name) => scope.set(name.clone(), value),
            ForTarget::Tuple(names) => {
                if let Value::List(items) = &value {
                    for (name, item) in names.iter().zip(items.iter()) {
                        scope.set(name.clone(), item.clone());
                    }
                }
            }
        }
    }

    fn undefined_or(&self, name: &str, span: Span, strict: bool) -> Result<Value> {
        if strict {
            Err(Error::from(UndefinedError {
                name: name.to_string(),
                template: self.template_name.map(str::to_string),
                line: span.line,
            }))
        } else {
            Ok(Value::Undefined)
        }
    }

    /// Evaluates `expr`, treating a bare undefined name as `Value::Undefined`
    /// instead of raising in strict mode. Used only for the handful of
    /// constructs (`default(...)`, `is defined`/`is undefined`) that exist
    /// specifically to observe undefinedness rather than fail on it.
    fn eval_allow_undefined(&mut self, expr: &crate::ast::Expr, scope: &mut Scope) -> Result<Value> {
        if let ExprKind::Name(name) = &expr.kind {
            return Ok(scope.get(name).unwrap_or(Value::Undefined));
        }
        self.eval(expr, scope)
    }

    pub fn eval(&mut self, expr: &crate::ast::Expr, scope: &mut Scope) -> Result<Value> {
        match &expr.kind {
            ExprKind::Const(lit) => Ok(Value::from(lit)),
            ExprKind::Name(name) => match scope.get(name) {
                Some(v) => Ok(v),
                None => self.undefined_or(name, expr.span, scope.strict),
            },
            ExprKind::Getattr { base, attr, optional } => {
                let base_v = self.eval(base, scope)?;
                if *optional && (base_v.is_none() || base_v.is_undefined()) {
                    return Ok(Value::None);
                }
                Ok(base_v.getattr(attr).unwrap_or(Value::Undefined))
            }
            ExprKind::Getitem { base, index, optional } => {
                let base_v = self.eval(base, scope)?;
                if *optional && (base_v.is_none() || base_v.is_undefined()) {
                    return Ok(Value::None);
                }
                let idx_v = self.eval(index, scope)?;
                Ok(base_v.getitem(&idx_v).unwrap_or(Value::Undefined))
            }
            ExprKind::Slice { base, start, stop, step } => {
                let base_v = self.eval(base, scope)?;
                let items: Vec<Value> = match &base_v {
                    Value::List(items) => (**items).clone(),
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    _ => return Ok(Value::Undefined),
                };
                let len = items.len() as i64;
                let resolve = |e: &Option<Box<crate::ast::Expr>>, default: i64, this: &mut Self, scope: &mut Scope| -> Result<i64> {
                    match e {
                        Some(e) => Ok(this.eval(e, scope)?.as_f64().unwrap_or(default as f64) as i64),
                        None => Ok(default),
                    }
                };
                let step_v = resolve(step, 1, self, scope)?;
                let step_v = if step_v == 0 { 1 } else { step_v };
                let (default_start, default_stop) = if step_v > 0 { (0, len) } else { (len - 1, -1) };
                let mut s = resolve(start, default_start, self, scope)?;
                let mut e = resolve(stop, default_stop, self, scope)?;
                if s < 0 {
                    s += len;
                }
                if e < 0 && stop.is_some() {
                    e += len;
                }
                let mut out = Vec::new();
                if step_v > 0 {
                    let mut i = s.max(0);
                    while i < e.min(len) {
                        if let Some(v) = items.get(i as usize) {
                            out.push(v.clone());
                        }
                        i += step_v;
                    }
                } else {
                    let mut i = s.min(len - 1);
                    while i > e {
                        if i >= 0 {
                            if let Some(v) = items.get(i as usize) {
                                out.push(v.clone());
                            }
                        }
                        i += step_v;
                    }
                }
                if matches!(base_v, Value::Str(_)) {
                    Ok(Value::str(out.into_iter().map(|v| v.to_string()).collect::<String>()))
                } else {
                    Ok(Value::list(out))
                }
            }
            ExprKind::FuncCall { callee, args, kwargs, optional } => {
                let mut arg_vals = Vec::with_capacity(args.len());
                for a in args {
                    arg_vals.push(self.eval(a, scope)?);
                }
                let mut kwarg_vals = Vec::with_capacity(kwargs.len());
                for (k, v) in kwargs {
                    kwarg_vals.push((k.clone(), self.eval(v, scope)?));
                }
                if let ExprKind::Name(name) = &callee.kind {
                    if let Some(m) = self.macros.get(name.as_str()).copied() {
                        return self.call_macro(m, &arg_vals, &kwarg_vals, scope);
                    }
                }
                let callee_v = self.eval(callee, scope)?;
                match callee_v {
                    Value::Callable(f) => f(&arg_vals, &kwarg_vals),
                    Value::Undefined if *optional => Ok(Value::Undefined),
                    other => Err(Error::from(TemplateRuntimeError::new(
                        format!("'{}' is not callable", other.type_name()),
                        expr.span,
                    ))),
                }
            }
            ExprKind::Filter { value, name, args, kwargs } => {
                // `default(...)` must short-circuit a strict-mode undefined
                // name rather than propagate its error (§4.5).
                let v = if name == "default" {
                    self.eval_allow_undefined(value, scope)?
                } else {
                    self.eval(value, scope)?
                };
                let mut arg_vals = Vec::with_capacity(args.len());
                for a in args {
                    arg_vals.push(self.eval(a, scope)?);
                }
                let mut kwarg_vals = Vec::with_capacity(kwargs.len());
                for (k, val) in kwargs {
                    kwarg_vals.push((k.clone(), self.eval(val, scope)?));
                }
                self.apply_filter(name, v, &arg_vals, &kwarg_vals, scope)
            }
            ExprKind::InlinedFilter { value, method } => {
                // Optimizer-inlined closed set of string filters; evaluated
                // directly rather than through the filter registry.
                let v = self.eval(value, scope)?;
                let s = v.to_string();
                Ok(Value::str(match method.as_str() {
                    "upper" => s.to_uppercase(),
                    "lower" => s.to_lowercase(),
                    "strip" => s.trim().to_string(),
                    "lstrip" => s.trim_start().to_string(),
                    "rstrip" => s.trim_end().to_string(),
                    "title" => s
                        .split_whitespace()
                        .map(|w| {
                            let mut c = w.chars();
                            match c.next() {
                                Some(f) => f.to_uppercase().collect::<String>() + &c.as_str().to_lowercase(),
                                None => String::new(),
                            }
                        })
                        .collect::<Vec<_>>()
                        .join(" "),
                    "capitalize" => {
                        let mut c = s.chars();
                        match c.next() {
                            Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
                            None => s,
                        }
                    }
                    "swapcase" => s
                        .chars()
                        .map(|c| if c.is_uppercase() { c.to_lowercase().next().unwrap() } else { c.to_uppercase().next().unwrap() })
                        .collect(),
                    "casefold" => s.to_lowercase(),
                    _ => s,
                }))
            }
            ExprKind::Test { value, name, args, negated } => {
                // `is defined`/`is undefined` must observe the undefined
                // sentinel rather than raising strict mode's usual error.
                let v = if name == "defined" || name == "undefined" {
                    self.eval_allow_undefined(value, scope)?
                } else {
                    self.eval(value, scope)?
                };
                let mut arg_vals = Vec::with_capacity(args.len());
                for a in args {
                    arg_vals.push(self.eval(a, scope)?);
                }
                let test_fn = self
                    .env
                    .tests()
                    .get(name)
                    .ok_or_else(|| Error::from(TemplateRuntimeError::new(format!("unknown test {name:?}"), expr.span)))?;
                let result = test_fn(&v, &arg_vals);
                Ok(Value::Bool(if *negated { !result } else { result }))
            }
            ExprKind::BinOp { op, lhs, rhs } => {
                let l = self.eval(lhs, scope)?;
                let r = self.eval(rhs, scope)?;
                eval_binop(*op, &l, &r, expr.span, self.template_name)
            }
            ExprKind::UnaryOp { op, operand } => {
                let v = self.eval(operand, scope)?;
                Ok(match op {
                    crate::ast::UnaryOpKind::Neg => match v {
                        Value::Int(i) => Value::Int(-i),
                        other => Value::Float(-other.coerce_numeric()),
                    },
                    crate::ast::UnaryOpKind::Pos => v,
                    crate::ast::UnaryOpKind::Not => Value::Bool(!v.is_truthy()),
                })
            }
            ExprKind::Compare { first, rest } => {
                let mut left = self.eval(first, scope)?;
                for (op, rhs_expr) in rest {
                    let right = self.eval(rhs_expr, scope)?;
                    let ok = eval_compare(*op, &left, &right);
                    if !ok {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ExprKind::BoolOp { op, values } => {
                match op {
                    crate::ast::BoolOpKind::And => {
                        let mut last = Value::Bool(true);
                        for v in values {
                            last = self.eval(v, scope)?;
                            if !last.is_truthy() {
                                return Ok(last);
                            }
                        }
                        Ok(last)
                    }
                    crate::ast::BoolOpKind::Or => {
                        let mut last = Value::Bool(false);
                        for v in values {
                            last = self.eval(v, scope)?;
                            if last.is_truthy() {
                                return Ok(last);
                            }
                        }
                        Ok(last)
                    }
                }
            }
            ExprKind::CondExpr { test, then_branch, else_branch } => {
                if self.eval(test, scope)?.is_truthy() {
                    self.eval(then_branch, scope)
                } else {
                    match else_branch {
                        Some(e) => self.eval(e, scope),
                        None => Ok(Value::None),
                    }
                }
            }
            ExprKind::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for i in items {
                    out.push(self.eval(i, scope)?);
                }
                Ok(Value::list(out))
            }
            ExprKind::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len());
                for i in items {
                    out.push(self.eval(i, scope)?);
                }
                Ok(Value::list(out))
            }
            ExprKind::Dict(pairs) => {
                let mut out = BTreeMap::new();
                for (k, v) in pairs {
                    let key = self.eval(k, scope)?.to_string();
                    out.insert(key, self.eval(v, scope)?);
                }
                Ok(Value::map(out))
            }
            ExprKind::Concat(items) => {
                let mut out = String::new();
                for i in items {
                    out.push_str(&self.eval(i, scope)?.to_string());
                }
                Ok(Value::str(out))
            }
            ExprKind::Range { start, stop } => {
                let s = self.eval(start, scope)?.coerce_numeric() as i64;
                let e = self.eval(stop, scope)?.coerce_numeric() as i64;
                Ok(Value::list((s..e).map(Value::Int).collect()))
            }
            ExprKind::NullCoalesce { lhs, rhs } => {
                let l = self.eval(lhs, scope)?;
                if l.is_none() || l.is_undefined() {
                    self.eval(rhs, scope)
                } else {
                    Ok(l)
                }
            }
        }
    }

    fn apply_filter(
        &mut self,
        name: &str,
        value: Value,
        args: &[Value],
        kwargs: &[(String, Value)],
        _scope: &mut Scope,
    ) -> Result<Value> {
        let f = self
            .env
            .filters()
            .get(name)
            .ok_or_else(|| Error::from(TemplateRuntimeError::new(format!("unknown filter {name:?}"), Span::default())))?;
        f(&value, args, kwargs)
    }

    /// Entry point used by a template's exported-macro callables, which
    /// hold only a macro name and recreate an interpreter per call.
    pub fn call_macro_public(&mut self, m: &'a MacroNode, args: &[Value], kwargs: &[(String, Value)], scope: &mut Scope) -> Result<Value> {
        self.call_macro(m, args, kwargs, scope)
    }

    fn call_macro(&mut self, m: &'a MacroNode, args: &[Value], kwargs: &[(String, Value)], scope: &mut Scope) -> Result<Value> {
        scope.push();
        for (i, param) in m.args.iter().enumerate() {
            let v = args
                .get(i)
                .cloned()
                .or_else(|| kwargs.iter().find(|(k, _)| k == param).map(|(_, v)| v.clone()))
                .or_else(|| m.defaults.iter().find(|(k, _)| k == param).map(|(_, _)| Value::Undefined))
                .unwrap_or(Value::Undefined);
            scope.set(param.clone(), v);
        }
        for (param, default_expr) in &m.defaults {
            if scope.get(param).map(|v| v.is_undefined()).unwrap_or(true) {
                let v = self.eval(default_expr, scope)?;
                scope.set(param.clone(), v);
            }
        }
        let mut out = String::new();
        self.render_nodes(&m.body, scope, &mut out)?;
        scope.pop();
        Ok(Value::str(out))
    }
}

fn loop_value(idx: usize, len: usize) -> Value {
    let mut m = BTreeMap::new();
    m.insert("index".to_string(), Value::Int(idx as i64 + 1));
    m.insert("index0".to_string(), Value::Int(idx as i64));
    m.insert("first".to_string(), Value::Bool(idx == 0));
    m.insert("last".to_string(), Value::Bool(idx + 1 == len));
    m.insert("length".to_string(), Value::Int(len as i64));
    m.insert("revindex".to_string(), Value::Int((len - idx) as i64));
    m.insert("revindex0".to_string(), Value::Int((len - idx - 1) as i64));
    Value::map(m)
}

fn eval_binop(op: crate::ast::BinOpKind, l: &Value, r: &Value, span: Span, template: Option<&str>) -> Result<Value> {
    use crate::ast::BinOpKind::*;
    if let (Value::Str(a), Add) = (l, op) {
        if let Some(b) = r.as_str() {
            return Ok(Value::str(format!("{a}{b}")));
        }
    }
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        return Ok(match op {
            Add => Value::Int(a.wrapping_add(*b)),
            Sub => Value::Int(a.wrapping_sub(*b)),
            Mul => Value::Int(a.wrapping_mul(*b)),
            Div => Value::Float(*a as f64 / *b as f64),
            FloorDiv => {
                if *b == 0 {
                    return Err(Error::from(TemplateRuntimeError::new("division by zero", span)));
                }
                Value::Int(a.div_euclid(*b))
            }
            Mod => {
                if *b == 0 {
                    return Err(Error::from(TemplateRuntimeError::new("division by zero", span)));
                }
                Value::Int(a.rem_euclid(*b))
            }
            Pow => Value::Int(a.pow((*b).max(0) as u32)),
        });
    }
    let a = l.coerce_numeric();
    let b = r.coerce_numeric();
    let _ = template;
    Ok(match op {
        Add => Value::Float(a + b),
        Sub => Value::Float(a - b),
        Mul => Value::Float(a * b),
        Div => Value::Float(a / b),
        FloorDiv => Value::Float((a / b).floor()),
        Mod => Value::Float(a % b),
        Pow => Value::Float(a.powf(b)),
    })
}

fn eval_compare(op: crate::ast::CompareOp, l: &Value, r: &Value) -> bool {
    use crate::ast::CompareOp::*;
    match op {
        Eq => l.equals(r),
        Ne => !l.equals(r),
        Lt => l.compare(r) == Some(std::cmp::Ordering::Less),
        Le => matches!(l.compare(r), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)),
        Gt => l.compare(r) == Some(std::cmp::Ordering::Greater),
        Ge => matches!(l.compare(r), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)),
        In => match r {
            Value::List(items) => items.iter().any(|i| i.equals(l)),
            Value::Str(s) => l.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
            Value::Map(m) => l.as_str().map(|k| m.contains_key(k)).unwrap_or(false),
            _ => false,
        },
        NotIn => !eval_compare(In, l, r),
    }
}

/// `{% spaceless %}`: collapses runs of whitespace that sit entirely
/// between two tags down to nothing, the way Django's `spaceless` does,
/// without touching whitespace inside text content.
fn collapse_interag_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '>' {
            out.push(c);
            let mut ws = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_whitespace() {
                    ws.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            if chars.peek() == Some(&'<') {
                // drop the whitespace run entirely
            } else {
                out.push_str(&ws);
            }
        } else {
            out.push(c);
        }
    }
    out
}
