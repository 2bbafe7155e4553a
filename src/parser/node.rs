//! Statement dispatch: consumes one `{% ... %}` tag (and, for compound
//! statements, everything up to and including its matching end tag) and
//! produces the corresponding [`crate::ast::Node`].

use crate::ast::*;
use crate::error::{ParseError, Span};
use crate::lexer::TokenKind;
use crate::parser::{Dialect, ParseResult, Parser, Stop};

/// End-tag forms accepted for a given compound statement in the default
/// dialect: the unified `end` plus its specific spelling.
fn accepted_ends(open: &str) -> &'static [&'static str] {
    match open {
        "if" => &["end", "endif"],
        "for" => &["end", "endfor"],
        "block" => &["end", "endblock"],
        "with" => &["end", "endwith"],
        "macro" | "def" => &["end", "endmacro", "enddef"],
        "call" => &["end", "endcall"],
        "capture" => &["end", "endcapture"],
        "cache" => &["end", "endcache"],
        "filter" => &["end", "endfilter"],
        "spaceless" => &["end", "endspaceless"],
        "embed" => &["end", "endembed"],
        "match" => &["end", "endmatch"],
        "unless" => &["end", "endunless"],
        _ => &["end"],
    }
}

fn compat_end(open: &str) -> &'static str {
    match open {
        "if" => "endif",
        "for" => "endfor",
        "block" => "endblock",
        "with" => "endwith",
        "macro" | "def" => "endmacro",
        "call" => "endcall",
        "capture" => "endcapture",
        "cache" => "endcache",
        "filter" => "endfilter",
        "spaceless" => "endspaceless",
        "embed" => "endembed",
        "match" => "endmatch",
        "unless" => "endunless",
        _ => "end",
    }
}

/// Consumes the body of a compound statement and its end tag, erroring
/// with the opening block's own position if the end tag present doesn't
/// match (or, in the compat dialect, isn't the one specific spelling).
fn parse_matching_body(
    p: &mut Parser<'_>,
    open_kind: &str,
    open_span: Span,
    stop_on: &[&str],
) -> ParseResult<(Vec<Node>, String)> {
    let (body, stop) = p.parse_body()?;
    let (kw, kw_span) = match stop {
        Stop::Eof => {
            return Err(mismatch_error(open_kind, open_span, None));
        }
        Stop::Keyword(kw, span) => (kw, span),
    };
    if !stop_on.contains(&kw.as_str()) {
        return Err(mismatch_error(open_kind, open_span, Some((&kw, kw_span))));
    }
    // The stop keyword's own `{% kw %}` tag is left unconsumed; the caller
    // consumes it (and any clause-specific trailer) per continuation form.
    Ok((body, kw))
}

fn mismatch_error(open_kind: &str, open_span: Span, found: Option<(&str, Span)>) -> ParseError {
    let accepted = accepted_ends(open_kind);
    let suggestion = format!("close with {{% end %}} or {{% {} %}}", compat_end(open_kind));
    match found {
        None => ParseError::new(
            format!("unclosed {{% {open_kind} %}}, missing one of {accepted:?}"),
            open_span,
        )
        .with_suggestion(suggestion),
        Some((kw, _span)) => ParseError::new(
            format!("mismatched end tag {{% {kw} %}} for {{% {open_kind} %}} opened here"),
            open_span,
        )
        .with_suggestion(suggestion),
    }
}

fn expect_specific_end(p: &mut Parser<'_>, open_kind: &str, open_span: Span) -> ParseResult<()> {
    // Called once we already know the next tag's keyword is a legal
    // closer for this frame; consumes `{%`, the keyword, and `%}`.
    p.expect_block_start()?;
    let kw = p.peek().text.clone();
    let accepted = accepted_ends(open_kind);
    if p.dialect == Dialect::Compat {
        let specific = compat_end(open_kind);
        if kw != specific {
            return Err(mismatch_error(open_kind, open_span, Some((&kw, p.peek().span))));
        }
    } else if !accepted.contains(&kw.as_str()) {
        return Err(mismatch_error(open_kind, open_span, Some((&kw, p.peek().span))));
    }
    p.bump();
    p.expect_block_end()?;
    Ok(())
}

pub(super) fn parse_statement(p: &mut Parser<'_>) -> ParseResult<Node> {
    let open_span = p.bump().span; // consumes '{%'
    let kw = p.peek().clone();
    if kw.kind != TokenKind::Keyword && kw.kind != TokenKind::Name {
        return Err(ParseError::new(format!("expected a tag keyword, found {:?}", kw.text), kw.span));
    }
    match kw.text.as_str() {
        "if" => parse_if(p, open_span),
        "for" => parse_for(p, open_span),
        "block" => parse_block(p, open_span),
        "extends" => parse_extends(p, open_span),
        "include" => parse_include(p, open_span),
        "import" => parse_import(p, open_span),
        "from" => parse_from_import(p, open_span),
        "embed" => parse_embed(p, open_span),
        "let" => parse_let_set_export(p, open_span, Kind::Let),
        "set" => parse_let_set_export(p, open_span, Kind::Set),
        "export" => parse_let_set_export(p, open_span, Kind::Export),
        "with" => parse_with(p, open_span),
        "do" => parse_do(p, open_span),
        "capture" => parse_capture(p, open_span),
        "cache" => parse_cache(p, open_span),
        "filter" => parse_filter_block(p, open_span),
        "macro" | "def" => parse_macro(p, open_span),
        "call" => parse_call_block(p, open_span),
        "match" => parse_match(p, open_span),
        "unless" => parse_unless(p, open_span),
        "break" => {
            p.bump();
            p.expect_block_end()?;
            if !p.is_in_loop() {
                return Err(ParseError::new("break used outside a for loop", open_span));
            }
            Ok(Node::Break(open_span))
        }
        "continue" => {
            p.bump();
            p.expect_block_end()?;
            if !p.is_in_loop() {
                return Err(ParseError::new("continue used outside a for loop", open_span));
            }
            Ok(Node::Continue(open_span))
        }
        "raw" => parse_raw(p, open_span),
        "spaceless" => parse_spaceless(p, open_span),
        other => Err(ParseError::new(format!("unknown tag {other:?}"), kw.span)),
    }
}

enum Kind {
    Let,
    Set,
    Export,
}

fn parse_let_set_export(p: &mut Parser<'_>, span: Span, kind: Kind) -> ParseResult<Node> {
    p.bump();
    let name = p.expect_name_text()?;
    p.bump_op_or_err("=")?;
    let value = p.parse_expr()?;
    p.expect_block_end()?;
    Ok(match kind {
        Kind::Let => Node::Let(span, name, value),
        Kind::Set => Node::Set(span, name, value),
        Kind::Export => Node::Export(span, name, value),
    })
}

fn parse_do(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let expr = p.parse_expr()?;
    p.expect_block_end()?;
    Ok(Node::Do(span, expr))
}

fn parse_extends(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let target = p.parse_expr()?;
    p.expect_block_end()?;
    Ok(Node::Extends(span, target))
}

fn parse_include(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let target = p.parse_expr()?;
    let mut with_context = true;
    let mut ignore_missing = false;
    if p.eat_keyword("without") {
        p.expect_keyword("context")?;
        with_context = false;
    } else if p.eat_keyword("with") {
        p.expect_keyword("context")?;
        with_context = true;
    }
    if p.eat_keyword("ignore") {
        p.expect_keyword("missing")?;
        ignore_missing = true;
    }
    p.expect_block_end()?;
    Ok(Node::Include(span, IncludeNode { target, with_context, ignore_missing }))
}

fn parse_import(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let target = p.parse_expr()?;
    p.expect_keyword("as")?;
    let alias = p.expect_name_text()?;
    let with_context = p.eat_keyword("with") && p.expect_keyword("context").is_ok();
    p.expect_block_end()?;
    Ok(Node::Import(span, ImportNode { target, alias, with_context }))
}

fn parse_from_import(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let target = p.parse_expr()?;
    p.expect_keyword("import")?;
    let mut names = Vec::new();
    loop {
        let name = p.expect_name_text()?;
        let alias = if p.eat_keyword("as") {
            Some(p.expect_name_text()?)
        } else {
            None
        };
        names.push((name, alias));
        if !p.eat_op_opt(",") {
            break;
        }
    }
    let with_context = p.eat_keyword("with") && p.expect_keyword("context").is_ok();
    p.expect_block_end()?;
    Ok(Node::FromImport(span, FromImportNode { target, names, with_context }))
}

fn parse_embed(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let target = p.parse_expr()?;
    let with_context = !(p.eat_keyword("without") && p.expect_keyword("context").is_ok());
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "embed", span, accepted_ends("embed"))?;
    expect_end_after_stop(p, "embed", span, &kw)?;
    let _ = body;
    Ok(Node::Embed(span, EmbedNode { target, with_context }))
}

/// After `parse_matching_body` has peeked (not consumed) the closer
/// keyword, consumes `{%`, the keyword, and `%}` for good.
fn expect_end_after_stop(p: &mut Parser<'_>, open_kind: &str, open_span: Span, kw: &str) -> ParseResult<()> {
    let _ = kw;
    expect_specific_end(p, open_kind, open_span)
}

fn parse_if(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let test = p.parse_expr()?;
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "if", span, &["elif", "else", "end", "endif"])?;

    let mut elifs = Vec::new();
    let mut else_body = Vec::new();
    let mut next_kw = kw;
    loop {
        match next_kw.as_str() {
            "elif" => {
                p.expect_block_start()?;
                p.bump(); // 'elif'
                let elif_test = p.parse_expr()?;
                p.expect_block_end()?;
                let (elif_body, kw2) = parse_matching_body(p, "if", span, &["elif", "else", "end", "endif"])?;
                elifs.push((elif_test, elif_body));
                next_kw = kw2;
            }
            "else" => {
                p.expect_block_start()?;
                p.bump(); // 'else'
                p.expect_block_end()?;
                let (else_nodes, kw2) = parse_matching_body(p, "if", span, &["end", "endif"])?;
                else_body = else_nodes;
                expect_end_after_stop(p, "if", span, &kw2)?;
                break;
            }
            "end" | "endif" => {
                expect_end_after_stop(p, "if", span, &next_kw)?;
                break;
            }
            _ => unreachable!("parse_matching_body only returns accepted closers"),
        }
    }
    Ok(Node::If(span, IfNode { test, body, elifs, else_body }))
}

fn parse_for(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let mut names = vec![p.expect_name_text()?];
    while p.eat_op_opt(",") {
        names.push(p.expect_name_text()?);
    }
    let target = if names.len() == 1 {
        ForTarget::Single(names.pop().unwrap())
    } else {
        ForTarget::Tuple(names)
    };
    p.expect_keyword("in")?;
    let iter = p.parse_expr()?;
    let filter = if p.eat_keyword("if") {
        Some(p.parse_expr()?)
    } else {
        None
    };
    let recursive = p.eat_keyword("recursive");
    p.expect_block_end()?;

    p.enter_loop();
    let parsed = parse_matching_body(p, "for", span, &["empty", "end", "endfor"]);
    let (body, kw) = match parsed {
        Ok(v) => v,
        Err(e) => {
            p.leave_loop();
            return Err(e);
        }
    };
    let mut empty_body = Vec::new();
    match kw.as_str() {
        "empty" => {
            p.expect_block_start()?;
            p.bump();
            p.expect_block_end()?;
            let (e, kw2) = parse_matching_body(p, "for", span, &["end", "endfor"])?;
            empty_body = e;
            expect_end_after_stop(p, "for", span, &kw2)?;
        }
        "end" | "endfor" => {
            expect_end_after_stop(p, "for", span, &kw)?;
        }
        _ => unreachable!(),
    }
    p.leave_loop();
    Ok(Node::For(span, ForNode { target, iter, body, empty_body, recursive, filter }))
}

fn parse_block(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let name = p.expect_name_text()?;
    let scoped = p.eat_keyword("scoped");
    let required = p.eat_keyword("required");
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "block", span, accepted_ends("block"))?;
    expect_end_after_stop(p, "block", span, &kw)?;
    Ok(Node::Block(span, BlockNode { name, body, scoped, required }))
}

fn parse_with(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    // Hugo-style: `with expr as name`. Jinja-style: `with a=1, b=2`.
    let first_expr_pos = p.pos;
    if let Ok(expr) = p.parse_expr() {
        if p.eat_keyword("as") {
            let bound_name = if p.peek().kind == TokenKind::Name {
                Some(p.expect_name_text()?)
            } else {
                None
            };
            p.expect_block_end()?;
            let (body, kw) = parse_matching_body(p, "with", span, accepted_ends("with"))?;
            expect_end_after_stop(p, "with", span, &kw)?;
            return Ok(Node::WithHugo(span, WithHugoNode { expr, bound_name, body }));
        }
        if p.peek().kind == TokenKind::BlockEnd {
            p.expect_block_end()?;
            let (body, kw) = parse_matching_body(p, "with", span, accepted_ends("with"))?;
            expect_end_after_stop(p, "with", span, &kw)?;
            return Ok(Node::WithHugo(span, WithHugoNode { expr, bound_name: Some("it".into()), body }));
        }
    }
    p.pos = first_expr_pos;
    let mut bindings = Vec::new();
    loop {
        let name = p.expect_name_text()?;
        p.bump_op_or_err("=")?;
        let value = p.parse_expr()?;
        bindings.push((name, value));
        if !p.eat_op_opt(",") {
            break;
        }
    }
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "with", span, accepted_ends("with"))?;
    expect_end_after_stop(p, "with", span, &kw)?;
    Ok(Node::With(span, WithNode { bindings, body }))
}

fn parse_capture(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let name = p.expect_name_text()?;
    let filter = if p.eat_op_opt("|") {
        Some(p.expect_name_text()?)
    } else {
        None
    };
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "capture", span, accepted_ends("capture"))?;
    expect_end_after_stop(p, "capture", span, &kw)?;
    Ok(Node::Capture(span, CaptureNode { name, body, filter }))
}

fn parse_cache(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let key = p.parse_expr()?;
    let mut ttl = None;
    let mut depends = Vec::new();
    while p.eat_op_opt(",") {
        let name = p.expect_name_text()?;
        p.bump_op_or_err("=")?;
        match name.as_str() {
            "ttl" => ttl = Some(p.parse_expr()?),
            "depends" => {
                let e = p.parse_expr()?;
                match e.kind {
                    ExprKind::List(items) => depends = items,
                    _ => depends = vec![e],
                }
            }
            other => return Err(ParseError::new(format!("unknown cache option {other:?}"), span)),
        }
    }
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "cache", span, accepted_ends("cache"))?;
    expect_end_after_stop(p, "cache", span, &kw)?;
    Ok(Node::Cache(span, CacheNode { key, ttl, depends, body }))
}

fn parse_filter_block(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let filter = p.expect_name_text()?;
    let args = if p.peek().kind == TokenKind::Op && p.peek().text == "(" {
        p.bump();
        let mut args = Vec::new();
        while p.peek().text != ")" {
            args.push(p.parse_expr()?);
            if !p.eat_op_opt(",") {
                break;
            }
        }
        p.bump_op_or_err(")")?;
        args
    } else {
        Vec::new()
    };
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "filter", span, accepted_ends("filter"))?;
    expect_end_after_stop(p, "filter", span, &kw)?;
    Ok(Node::FilterBlock(span, FilterBlockNode { filter, args, body }))
}

fn parse_macro(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    let open_kind = p.peek().text.clone();
    p.bump();
    let name = p.expect_name_text()?;
    p.bump_op_or_err("(")?;
    let mut args = Vec::new();
    let mut defaults = Vec::new();
    while p.peek().text != ")" {
        let arg_name = p.expect_name_text()?;
        if p.eat_op_opt("=") {
            let default_value = p.parse_expr()?;
            defaults.push((arg_name.clone(), default_value));
        }
        args.push(arg_name);
        if !p.eat_op_opt(",") {
            break;
        }
    }
    p.bump_op_or_err(")")?;
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, &open_kind, span, accepted_ends("macro"))?;
    expect_end_after_stop(p, &open_kind, span, &kw)?;
    Ok(Node::Macro(span, MacroNode { name, args, defaults, body }))
}

fn parse_call_block(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let call = p.parse_expr()?;
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "call", span, accepted_ends("call"))?;
    expect_end_after_stop(p, "call", span, &kw)?;
    Ok(Node::CallBlock(span, CallBlockNode { call, body }))
}

fn parse_match(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let subject = p.parse_expr()?;
    p.expect_block_end()?;
    let mut arms = Vec::new();
    loop {
        p.expect_block_start()?;
        if p.peek().text == "case" {
            p.bump();
            let pattern = parse_pattern(p)?;
            p.expect_block_end()?;
            let (body, kw) = parse_matching_body(p, "match", span, &["case", "end", "endmatch"])?;
            arms.push((pattern, body));
            if kw == "case" {
                continue;
            }
            expect_specific_end(p, "match", span)?;
            break;
        } else {
            let (body, kw) = parse_matching_body(p, "match", span, accepted_ends("match"))?;
            arms.push((Pattern::Wildcard, body));
            let _ = kw;
            expect_specific_end(p, "match", span)?;
            break;
        }
    }
    Ok(Node::Match(span, MatchNode { subject, arms }))
}

fn parse_pattern(p: &mut Parser<'_>) -> ParseResult<Pattern> {
    if p.eat_op_opt("_") {
        return Ok(Pattern::Wildcard);
    }
    let e = p.parse_expr()?;
    match e.kind {
        ExprKind::Const(lit) => Ok(Pattern::Const(lit)),
        ExprKind::Name(name) if name == "_" => Ok(Pattern::Wildcard),
        ExprKind::Name(name) => Ok(Pattern::Name(name)),
        _ => Err(ParseError::new("unsupported match pattern", e.span)),
    }
}

fn parse_unless(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    let test = p.parse_expr()?;
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "unless", span, &["else", "end", "endunless"])?;
    let mut else_body = Vec::new();
    match kw.as_str() {
        "else" => {
            p.expect_block_start()?;
            p.bump();
            p.expect_block_end()?;
            let (e, kw2) = parse_matching_body(p, "unless", span, &["end", "endunless"])?;
            else_body = e;
            expect_end_after_stop(p, "unless", span, &kw2)?;
        }
        "end" | "endunless" => expect_end_after_stop(p, "unless", span, &kw)?,
        _ => unreachable!(),
    }
    Ok(Node::Unless(span, UnlessNode { test, body, else_body }))
}

fn parse_raw(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump(); // 'raw'
    p.expect_block_end()?;
    let text = if p.peek().kind == TokenKind::Data {
        p.bump().text
    } else {
        String::new()
    };
    p.expect_block_start()?;
    p.expect_keyword("endraw")?;
    p.expect_block_end()?;
    Ok(Node::Raw(span, text))
}

fn parse_spaceless(p: &mut Parser<'_>, span: Span) -> ParseResult<Node> {
    p.bump();
    p.expect_block_end()?;
    let (body, kw) = parse_matching_body(p, "spaceless", span, accepted_ends("spaceless"))?;
    expect_end_after_stop(p, "spaceless", span, &kw)?;
    Ok(Node::Spaceless(span, body))
}

impl<'t> Parser<'t> {
    pub(crate) fn eat_op_opt(&mut self, text: &str) -> bool {
        if (self.peek().kind == TokenKind::Op || self.peek().kind == TokenKind::Keyword) && self.peek().text == text {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn bump_op_or_err(&mut self, text: &str) -> ParseResult<()> {
        if self.eat_op_opt(text) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected {text:?}, found {:?}", self.peek().text),
                self.peek().span,
            ))
        }
    }
}
