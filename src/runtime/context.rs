//! Name-resolution scope stack used while walking a template's optimized
//! AST. Layers, from outermost to innermost: environment globals, the
//! caller-supplied render context, then one frame per nested `{% for %}`,
//! `{% with %}`, `{% block %}`, or macro call.

use std::collections::HashMap;

use crate::runtime::value::Value;

/// A single lexical frame. `{% set %}` mutates the innermost frame;
/// `{% let %}` writes through to the template-wide frame at index 1
/// (just above globals), making the binding visible to sibling blocks.
#[derive(Default)]
struct Frame {
    vars: HashMap<String, Value>,
}

pub struct Scope<'a> {
    globals: &'a HashMap<String, Value>,
    frames: Vec<Frame>,
    /// Index of the frame `{% let %}` writes into (the template root frame).
    template_frame: usize,
    pub strict: bool,
}

impl<'a> Scope<'a> {
    pub fn new(globals: &'a HashMap<String, Value>, context: HashMap<String, Value>, strict: bool) -> Self {
        let root = Frame { vars: context };
        Scope {
            globals,
            frames: vec![root],
            template_frame: 0,
            strict,
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// Resolves `name`, searching innermost-frame-first, falling back to
    /// globals. Returns `None` (caller decides strict-vs-lenient policy)
    /// rather than `Value::Undefined` directly, so callers can attach the
    /// name/line to `UndefinedError` in strict mode.
    pub fn get(&self, name: &str) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.vars.get(name) {
                return Some(v.clone());
            }
        }
        self.globals.get(name).cloned()
    }

    /// `{% set name = expr %}`: binds in the current (innermost) frame.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.frames.last_mut().expect("scope always has a frame").vars.insert(name.into(), value);
    }

    /// `{% let name = expr %}`: binds in the template-wide frame so later
    /// sibling blocks (which push/pop their own frames on top) can see it.
    pub fn let_bind(&mut self, name: impl Into<String>, value: Value) {
        self.frames[self.template_frame].vars.insert(name.into(), value);
    }

    /// `{% export name %}`: re-surfaces a binding from the current frame
    /// into the parent frame, so it outlives the block that defined it.
    pub fn export(&mut self, name: &str) {
        let value = self.get_in_current(name);
        if let Some(value) = value {
            if self.frames.len() >= 2 {
                let parent = self.frames.len() - 2;
                self.frames[parent].vars.insert(name.to_string(), value);
            }
        }
    }

    fn get_in_current(&self, name: &str) -> Option<Value> {
        self.frames.last().and_then(|f| f.vars.get(name).cloned())
    }

    /// Flattens every visible binding (globals, then each frame outer to
    /// inner) into one map, for `{% include %}`/`{% embed %} with context`
    /// and `{% import %}` namespace capture.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut out = self.globals.clone();
        for frame in &self.frames {
            for (k, v) in &frame.vars {
                out.insert(k.clone(), v.clone());
            }
        }
        out
    }
}
