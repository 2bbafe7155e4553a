//! Built-in `is` tests, grounded in the predecessor's
//! `environment/tests.py::DEFAULT_TESTS` table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::runtime::value::Value;

pub type TestFn = Arc<dyn Fn(&Value, &[Value]) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct TestRegistry(Arc<HashMap<String, TestFn>>);

impl TestRegistry {
    pub fn get(&self, name: &str) -> Option<TestFn> {
        self.0.get(name).cloned()
    }

    pub fn with(&self, name: impl Into<String>, f: TestFn) -> Self {
        let mut map = (*self.0).clone();
        map.insert(name.into(), f);
        TestRegistry(Arc::new(map))
    }
}

impl Default for TestRegistry {
    fn default() -> Self {
        TestRegistry(Arc::new(default_tests()))
    }
}

fn wrap<F>(f: F) -> TestFn
where
    F: Fn(&Value, &[Value]) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

fn default_tests() -> HashMap<String, TestFn> {
    let mut m: HashMap<String, TestFn> = HashMap::new();

    m.insert("defined".into(), wrap(|v, _a| !v.is_undefined()));
    m.insert("undefined".into(), wrap(|v, _a| v.is_undefined()));
    m.insert("none".into(), wrap(|v, _a| v.is_none()));
    m.insert("true".into(), wrap(|v, _a| matches!(v, Value::Bool(true))));
    m.insert("false".into(), wrap(|v, _a| matches!(v, Value::Bool(false))));
    m.insert(
        "even".into(),
        wrap(|v, _a| matches!(v, Value::Int(i) if i % 2 == 0)),
    );
    m.insert(
        "odd".into(),
        wrap(|v, _a| matches!(v, Value::Int(i) if i.rem_euclid(2) == 1)),
    );
    m.insert(
        "divisibleby".into(),
        wrap(|v, a| match (v, a.first()) {
            (Value::Int(i), Some(Value::Int(n))) if *n != 0 => i % n == 0,
            _ => false,
        }),
    );
    m.insert(
        "number".into(),
        wrap(|v, _a| matches!(v, Value::Int(_) | Value::Float(_))),
    );
    m.insert("string".into(), wrap(|v, _a| matches!(v, Value::Str(_))));
    m.insert("mapping".into(), wrap(|v, _a| matches!(v, Value::Map(_))));
    m.insert(
        "sequence".into(),
        wrap(|v, _a| matches!(v, Value::List(_) | Value::Str(_))),
    );
    m.insert(
        "iterable".into(),
        wrap(|v, _a| matches!(v, Value::List(_) | Value::Str(_) | Value::Map(_))),
    );
    m.insert("callable".into(), wrap(|v, _a| matches!(v, Value::Callable(_))));
    let eq = wrap(|v, a| a.first().map(|other| v.equals(other)).unwrap_or(false));
    m.insert("equalto".into(), eq.clone());
    m.insert("eq".into(), eq.clone());
    m.insert("sameas".into(), eq);
    m.insert(
        "gt".into(),
        wrap(|v, a| {
            a.first()
                .and_then(|o| v.compare(o))
                .map(|o| o == std::cmp::Ordering::Greater)
                .unwrap_or(false)
        }),
    );
    m.insert(
        "lt".into(),
        wrap(|v, a| {
            a.first()
                .and_then(|o| v.compare(o))
                .map(|o| o == std::cmp::Ordering::Less)
                .unwrap_or(false)
        }),
    );
    m.insert(
        "ge".into(),
        wrap(|v, a| {
            a.first()
                .and_then(|o| v.compare(o))
                .map(|o| o != std::cmp::Ordering::Less)
                .unwrap_or(false)
        }),
    );
    m.insert(
        "le".into(),
        wrap(|v, a| {
            a.first()
                .and_then(|o| v.compare(o))
                .map(|o| o != std::cmp::Ordering::Greater)
                .unwrap_or(false)
        }),
    );
    m.insert(
        "in".into(),
        wrap(|v, a| match a.first() {
            Some(Value::List(items)) => items.iter().any(|i| i.equals(v)),
            Some(Value::Str(s)) => v.as_str().map(|needle| s.contains(needle)).unwrap_or(false),
            _ => false,
        }),
    );

    m
}
