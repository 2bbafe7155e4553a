//! Built-in filter registry, grounded in the predecessor's
//! `environment/filters.py` table and in askama's `filters::*` signature
//! conventions (`value, args -> Result<Output>`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::runtime::value::Value;

/// `Send + Sync` so a populated registry can be shared across the worker
/// threads compiling templates concurrently (environment §5); the `Value`
/// arguments/return are confined to whichever thread calls it.
pub type FilterFn = Arc<dyn Fn(&Value, &[Value], &[(String, Value)]) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub struct FilterRegistry(Arc<HashMap<String, FilterFn>>);

impl FilterRegistry {
    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.0.get(name).cloned()
    }

    /// Copy-on-write insert: returns a new registry, leaving any in-flight
    /// render holding the old `Arc` untouched.
    pub fn with(&self, name: impl Into<String>, f: FilterFn) -> Self {
        let mut map = (*self.0).clone();
        map.insert(name.into(), f);
        FilterRegistry(Arc::new(map))
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        FilterRegistry(Arc::new(default_filters()))
    }
}

fn wrap<F>(f: F) -> FilterFn
where
    F: Fn(&Value, &[Value], &[(String, Value)]) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn runtime_err(msg: impl Into<String>) -> Error {
    crate::error::TemplateRuntimeError::new(msg.into(), crate::error::Span::default()).into()
}

fn default_filters() -> HashMap<String, FilterFn> {
    let mut m: HashMap<String, FilterFn> = HashMap::new();

    m.insert(
        "default".into(),
        wrap(|v, args, _kw| {
            let fallback = args.first().cloned().unwrap_or(Value::str(""));
            if v.is_undefined() || (args.len() > 1 && args[1].is_truthy() && !v.is_truthy()) {
                Ok(fallback)
            } else if v.is_undefined() {
                Ok(fallback)
            } else {
                Ok(v.clone())
            }
        }),
    );
    m.insert(
        "upper".into(),
        wrap(|v, _a, _k| Ok(Value::str(v.to_string().to_uppercase()))),
    );
    m.insert(
        "lower".into(),
        wrap(|v, _a, _k| Ok(Value::str(v.to_string().to_lowercase()))),
    );
    m.insert(
        "strip".into(),
        wrap(|v, _a, _k| Ok(Value::str(v.to_string().trim().to_string()))),
    );
    m.insert(
        "trim".into(),
        wrap(|v, _a, _k| Ok(Value::str(v.to_string().trim().to_string()))),
    );
    m.insert(
        "lstrip".into(),
        wrap(|v, _a, _k| Ok(Value::str(v.to_string().trim_start().to_string()))),
    );
    m.insert(
        "rstrip".into(),
        wrap(|v, _a, _k| Ok(Value::str(v.to_string().trim_end().to_string()))),
    );
    m.insert(
        "title".into(),
        wrap(|v, _a, _k| {
            let s = v.to_string();
            let mut out = String::with_capacity(s.len());
            let mut cap_next = true;
            for ch in s.chars() {
                if ch.is_alphanumeric() {
                    out.extend(if cap_next { ch.to_uppercase().collect::<Vec<_>>() } else { ch.to_lowercase().collect::<Vec<_>>() });
                    cap_next = false;
                } else {
                    out.push(ch);
                    cap_next = true;
                }
            }
            Ok(Value::str(out))
        }),
    );
    m.insert(
        "capitalize".into(),
        wrap(|v, _a, _k| {
            let s = v.to_string();
            let mut chars = s.chars();
            let out = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            };
            Ok(Value::str(out))
        }),
    );
    m.insert(
        "length".into(),
        wrap(|v, _a, _k| {
            let n = match v {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(m) => m.len(),
                _ => return Err(runtime_err(format!("'{}' has no length", v.type_name()))),
            };
            Ok(Value::Int(n as i64))
        }),
    );
    m.insert(
        "first".into(),
        wrap(|v, _a, _k| match v {
            Value::List(items) => Ok(items.first().cloned().unwrap_or(Value::Undefined)),
            Value::Str(s) => Ok(s.chars().next().map(|c| Value::str(c.to_string())).unwrap_or(Value::Undefined)),
            _ => Err(runtime_err("'first' requires a sequence")),
        }),
    );
    m.insert(
        "last".into(),
        wrap(|v, _a, _k| match v {
            Value::List(items) => Ok(items.last().cloned().unwrap_or(Value::Undefined)),
            Value::Str(s) => Ok(s.chars().last().map(|c| Value::str(c.to_string())).unwrap_or(Value::Undefined)),
            _ => Err(runtime_err("'last' requires a sequence")),
        }),
    );
    m.insert(
        "join".into(),
        wrap(|v, args, _k| {
            let sep = args.first().map(|a| a.to_string()).unwrap_or_default();
            let items = v.as_list().ok_or_else(|| runtime_err("'join' requires a list"))?;
            let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
            Ok(Value::str(parts.join(&sep)))
        }),
    );
    m.insert(
        "reverse".into(),
        wrap(|v, _a, _k| match v {
            Value::List(items) => {
                let mut items = (**items).clone();
                items.reverse();
                Ok(Value::list(items))
            }
            Value::Str(s) => Ok(Value::str(s.chars().rev().collect::<String>())),
            _ => Err(runtime_err("'reverse' requires a sequence")),
        }),
    );
    m.insert(
        "sort".into(),
        wrap(|v, _a, _k| {
            let items = v.as_list().ok_or_else(|| runtime_err("'sort' requires a list"))?;
            let mut items = items.to_vec();
            items.sort_by(|a, b| a.compare(b).unwrap_or(std::cmp::Ordering::Equal));
            Ok(Value::list(items))
        }),
    );
    m.insert(
        "replace".into(),
        wrap(|v, args, _k| {
            if args.len() < 2 {
                return Err(runtime_err("'replace' requires (old, new) arguments"));
            }
            Ok(Value::str(v.to_string().replace(&args[0].to_string(), &args[1].to_string())))
        }),
    );
    m.insert(
        "truncate".into(),
        wrap(|v, args, _k| {
            let s = v.to_string();
            let n = args.first().and_then(|a| a.as_f64()).unwrap_or(255.0) as usize;
            if s.chars().count() <= n {
                Ok(Value::str(s))
            } else {
                let truncated: String = s.chars().take(n).collect();
                Ok(Value::str(format!("{truncated}...")))
            }
        }),
    );
    m.insert(
        "round".into(),
        wrap(|v, args, _k| {
            let precision = args.first().and_then(|a| a.as_f64()).unwrap_or(0.0) as i32;
            let factor = 10f64.powi(precision);
            let n = v.as_f64().unwrap_or(0.0);
            Ok(Value::Float((n * factor).round() / factor))
        }),
    );
    m.insert(
        "abs".into(),
        wrap(|v, _a, _k| match v {
            Value::Int(i) => Ok(Value::Int(i.abs())),
            _ => Ok(Value::Float(v.as_f64().unwrap_or(0.0).abs())),
        }),
    );
    m.insert(
        "escape".into(),
        wrap(|v, _a, _k| Ok(Value::str(crate::runtime::escape::escape(&v.to_string()).into_owned()))),
    );
    m.insert("e".into(), m.get("escape").unwrap().clone());

    #[cfg(feature = "urlencode")]
    m.insert(
        "urlencode".into(),
        wrap(|v, _a, _k| {
            Ok(Value::str(
                percent_encoding::utf8_percent_encode(&v.to_string(), percent_encoding::NON_ALPHANUMERIC).to_string(),
            ))
        }),
    );

    m
}
