//! Recursive-descent parser: token stream → [`crate::ast::Ast`].
//!
//! Two dialects share this module's block/statement machinery:
//! [`Dialect::Default`] (unified `{% end %}`, `def`, `let`/`set`/`export`,
//! Hugo-style `with ... as`, `unless`, `break`/`continue`, `??`, `?.`, `..`)
//! and [`Dialect::Compat`], a predecessor syntax that requires explicit
//! `endif`/`endfor`/... closers and rejects the Kida-only operators.

pub mod expr;
mod node;

use crate::ast::Ast;
use crate::error::ParseError;
use crate::lexer::{Delimiters, Lexer, Token, TokenKind};

pub(crate) type ParseResult<T> = Result<T, ParseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Default,
    Compat,
}

/// Keywords that close a compound block or introduce a continuation
/// clause; encountering one outside a frame that expects it propagates up
/// through [`Parser::parse_body`] as a "stop" rather than an error, so the
/// innermost open block can report the mismatch with its own position.
pub(crate) const CLOSERS: &[&str] = &[
    "elif", "else", "empty", "case", "end", "endif", "endfor", "endblock", "endwith",
    "endmacro", "enddef", "endcall", "endcapture", "endcache", "endfilter", "endraw",
    "endspaceless", "endembed", "endmatch", "endunless",
];

pub(crate) enum Stop {
    Eof,
    Keyword(String, crate::error::Span),
}

pub struct Parser<'t> {
    pub(crate) toks: &'t [Token],
    pub(crate) pos: usize,
    pub(crate) dialect: Dialect,
    loop_depth: usize,
}

impl<'t> Parser<'t> {
    fn new(toks: &'t [Token], dialect: Dialect) -> Self {
        Self {
            toks,
            pos: 0,
            dialect,
            loop_depth: 0,
        }
    }

    pub(crate) fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.toks.len() - 1);
        &self.toks[idx]
    }

    pub(crate) fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    pub(crate) fn expect_kind(&mut self, kind: TokenKind, what: &str) -> ParseResult<Token> {
        if self.peek().kind == kind {
            Ok(self.bump())
        } else {
            Err(ParseError::new(
                format!("expected {what}, found {:?}", self.peek().text),
                self.peek().span,
            ))
        }
    }

    pub(crate) fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek().kind == TokenKind::Keyword && self.peek().text == kw {
            self.bump();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_keyword(&mut self, kw: &str) -> ParseResult<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(ParseError::new(
                format!("expected keyword {kw:?}, found {:?}", self.peek().text),
                self.peek().span,
            ))
        }
    }

    pub(crate) fn parse_expr(&mut self) -> ParseResult<crate::ast::Expr> {
        let mut e = expr::ExprParser::new(self.toks, self.pos, self.dialect);
        let result = e.parse()?;
        self.pos = e.pos();
        Ok(result)
    }

    pub(crate) fn expect_name_text(&mut self) -> ParseResult<String> {
        let t = self.peek().clone();
        if matches!(t.kind, TokenKind::Name | TokenKind::Keyword) {
            self.bump();
            Ok(t.text)
        } else {
            Err(ParseError::new(format!("expected identifier, found {:?}", t.text), t.span))
        }
    }

    pub(crate) fn is_in_loop(&self) -> bool {
        self.loop_depth > 0
    }

    pub(crate) fn enter_loop(&mut self) {
        self.loop_depth += 1;
    }

    pub(crate) fn leave_loop(&mut self) {
        self.loop_depth -= 1;
    }

    /// Expects `{%` (consuming any `-` trim marker already handled by the
    /// lexer) at the current position.
    pub(crate) fn expect_block_start(&mut self) -> ParseResult<()> {
        self.expect_kind(TokenKind::BlockStart, "'{%'")?;
        Ok(())
    }

    pub(crate) fn expect_block_end(&mut self) -> ParseResult<()> {
        self.expect_kind(TokenKind::BlockEnd, "'%}'")?;
        Ok(())
    }

    pub(crate) fn expect_var_end(&mut self) -> ParseResult<()> {
        self.expect_kind(TokenKind::VarEnd, "'}}'")?;
        Ok(())
    }

    /// Parses nodes until EOF or a closer keyword is encountered. Data and
    /// `{{ }}` output are handled here directly; compound statements are
    /// dispatched to `node::parse_statement`.
    pub(crate) fn parse_body(&mut self) -> ParseResult<(Vec<crate::ast::Node>, Stop)> {
        let mut nodes = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Eof => return Ok((nodes, Stop::Eof)),
                TokenKind::Data => {
                    let t = self.bump();
                    nodes.push(crate::ast::Node::Data(t.span, t.text));
                }
                TokenKind::VarStart => {
                    let span = self.bump().span;
                    let expr = self.parse_expr()?;
                    self.expect_var_end()?;
                    nodes.push(crate::ast::Node::Output(span, expr, None));
                }
                TokenKind::BlockStart => {
                    let kw_tok = self.peek_at(1).clone();
                    if CLOSERS.contains(&kw_tok.text.as_str()) {
                        return Ok((nodes, Stop::Keyword(kw_tok.text, kw_tok.span)));
                    }
                    nodes.push(node::parse_statement(self)?);
                }
                _ => {
                    return Err(ParseError::new(
                        format!("unexpected token {:?}", self.peek().text),
                        self.peek().span,
                    ))
                }
            }
        }
    }
}

fn build_ast(toks: Vec<Token>, dialect: Dialect) -> Result<Ast, ParseError> {
    let mut parser = Parser::new(&toks, dialect);
    let (nodes, stop) = parser.parse_body()?;
    if let Stop::Keyword(kw, span) = stop {
        return Err(ParseError::new(
            format!("orphan {kw:?} tag outside any open block"),
            span,
        )
        .with_suggestion("remove this tag or open the matching block first"));
    }
    if parser.peek().kind != TokenKind::Eof {
        return Err(ParseError::new(
            format!("unexpected trailing token {:?}", parser.peek().text),
            parser.peek().span,
        ));
    }

    let extends = match nodes.first() {
        Some(crate::ast::Node::Extends(_, target)) => Some(target.clone()),
        _ => None,
    };
    for (idx, n) in nodes.iter().enumerate() {
        if matches!(n, crate::ast::Node::Extends(..)) && idx != 0 {
            return Err(ParseError::new(
                "{% extends %} must be the first node in the template",
                n.span(),
            ));
        }
    }

    let ast = Ast { nodes, extends };
    if let Err(msg) = ast.collect_blocks() {
        return Err(ParseError::new(msg, crate::error::Span::new(1, 0)));
    }
    Ok(ast)
}

/// Compiles `source` using the default Kida syntax.
pub fn parse(source: &str, delims: &Delimiters) -> Result<Ast, ParseError> {
    let toks = Lexer::new(source, delims)
        .tokenize()
        .map_err(|e| ParseError::new(e.message, e.span).with_suggestion(e.suggestion.unwrap_or_default()))?;
    build_ast(toks, Dialect::Default)
}

/// Compiles `source` using the predecessor compatibility dialect: explicit
/// end tags only, no `??` / `?.` / `..`.
pub fn parse_compat(source: &str, delims: &Delimiters) -> Result<Ast, ParseError> {
    let toks = Lexer::new(source, delims)
        .tokenize()
        .map_err(|e| ParseError::new(e.message, e.span).with_suggestion(e.suggestion.unwrap_or_default()))?;
    build_ast(toks, Dialect::Compat)
}
