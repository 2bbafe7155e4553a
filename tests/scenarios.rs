//! End-to-end scenarios exercised through the public `Environment`/
//! `Template` API, one per concrete example in the behavioral spec.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kida::{CacheScope, DictLoader, Environment, Purity, Value};

fn env_with(sources: &[(&str, &str)]) -> Arc<Environment> {
    let mut map = HashMap::new();
    for (name, src) in sources {
        map.insert(name.to_string(), src.to_string());
    }
    Arc::new(Environment::builder().loader(Arc::new(DictLoader::new(map))).build())
}

#[test]
fn a_variable_with_filter() {
    let env = env_with(&[("t", "Hello, {{ name | upper }}!")]);
    let tmpl = env.get_template("t").unwrap();
    let mut ctx = HashMap::new();
    ctx.insert("name".to_string(), Value::str("world"));
    assert_eq!(tmpl.render(ctx).unwrap(), "Hello, WORLD!");
}

#[test]
fn b_inheritance_override() {
    let env = env_with(&[
        ("p", "<h1>{% block t %}default{% end %}</h1>"),
        ("c", "{% extends 'p' %}{% block t %}custom{% end %}"),
    ]);
    let tmpl = env.get_template("c").unwrap();
    assert_eq!(tmpl.render(HashMap::new()).unwrap(), "<h1>custom</h1>");
}

#[test]
fn c_constant_folding_and_dce() {
    let env = env_with(&[("t", "{% if 1 + 2 == 3 %}yes{% else %}no{% end %}")]);
    let tmpl = env.get_template("t").unwrap();
    assert_eq!(tmpl.render(HashMap::new()).unwrap(), "yes");
}

#[test]
fn d_hugo_style_with_is_nil_resilient() {
    let env = env_with(&[("t", "{% with page.author as a %}By {{ a.name }}{% end %}")]);
    let tmpl = env.get_template("t").unwrap();

    let mut absent = BTreeMap::new();
    absent.insert("author".to_string(), Value::None);
    let mut ctx = HashMap::new();
    ctx.insert("page".to_string(), Value::map(absent));
    assert_eq!(tmpl.render(ctx).unwrap(), "");

    let mut author = BTreeMap::new();
    author.insert("name".to_string(), Value::str("Ada"));
    let mut page = BTreeMap::new();
    page.insert("author".to_string(), Value::map(author));
    let mut ctx = HashMap::new();
    ctx.insert("page".to_string(), Value::map(page));
    assert_eq!(tmpl.render(ctx).unwrap(), "By Ada");
}

#[test]
fn e_site_scoped_block_classification() {
    let source = "{% block nav %}<nav>{{ site.title }}</nav>{% end %}{% block content %}{{ page.title }}{% end %}";
    let env = env_with(&[("t", source)]);
    let tmpl = env.get_template("t").unwrap();
    let cacheable = tmpl.get_cacheable_blocks();
    assert_eq!(cacheable.get("nav"), Some(&CacheScope::Site));
    assert_eq!(cacheable.get("content"), Some(&CacheScope::Page));

    let blocks = &tmpl.template_metadata().blocks;
    assert_eq!(blocks["nav"].is_pure, Purity::Pure);
    assert_eq!(blocks["content"].is_pure, Purity::Pure);
}

#[test]
fn f_mismatched_end_tag_is_a_parse_error() {
    let env = env_with(&[("t", "{% if x %}{% endfor %}")]);
    let err = env.get_template("t").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("if"), "expected the error to name the open `if` block: {message}");
}

#[test]
fn strict_mode_undefined_name_raises() {
    let env = env_with(&[("t", "{{ x }}")]);
    let tmpl = env.get_template("t").unwrap();
    assert!(tmpl.render(HashMap::new()).is_err());
}

#[test]
fn strict_mode_default_filter_short_circuits() {
    let env = env_with(&[("t", "{{ x | default('d') }}")]);
    let tmpl = env.get_template("t").unwrap();
    assert_eq!(tmpl.render(HashMap::new()).unwrap(), "d");
}

#[test]
fn include_with_context_shares_caller_bindings() {
    let env = env_with(&[("partial", "{{ name }}"), ("page", "{% set name = 'Ada' %}Hi, {% include 'partial' %}")]);
    let tmpl = env.get_template("page").unwrap();
    assert_eq!(tmpl.render(HashMap::new()).unwrap(), "Hi, Ada");
}
