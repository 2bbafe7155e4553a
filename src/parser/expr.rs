//! Expression grammar: precedence-climbing recursive descent over the
//! token stream produced by [`crate::lexer`].
//!
//! Precedence, loosest to tightest (per spec §4.2, with the filter pipe
//! binding tighter than comparisons so `x | length > 0` parses as
//! `(x | length) > 0`):
//! `if/else` conditional, `or`, `and`, `not`, `??`, comparisons, `~`
//! concat, `+ -`, `* / // %`, unary `- +`, `**`, postfix
//! (`.` `[]` `()` `|filter` `is test` `?.` range `..`).

use crate::ast::expr::*;
use crate::error::{ParseError, Span};
use crate::lexer::{Token, TokenKind};
use crate::parser::{Dialect, ParseResult};

pub struct ExprParser<'t> {
    toks: &'t [Token],
    pos: usize,
    pub(crate) dialect: Dialect,
}

impl<'t> ExprParser<'t> {
    pub fn new(toks: &'t [Token], pos: usize, dialect: Dialect) -> Self {
        Self { toks, pos, dialect }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn peek(&self) -> &Token {
        &self.toks[self.pos.min(self.toks.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.toks.len() - 1);
        &self.toks[idx]
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn at_op(&self, text: &str) -> bool {
        let t = self.peek();
        (t.kind == TokenKind::Op || t.kind == TokenKind::Keyword) && t.text == text
    }

    fn at_kw(&self, text: &str) -> bool {
        self.peek().kind == TokenKind::Keyword && self.peek().text == text
    }

    fn eat_op(&mut self, text: &str) -> bool {
        if self.at_op(text) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, text: &str) -> ParseResult<()> {
        if self.eat_op(text) {
            Ok(())
        } else {
            let span = self.peek().span;
            Err(ParseError::new(
                format!("expected {text:?}, found {:?}", self.peek().text),
                span,
            ))
        }
    }

    fn require_default_dialect(&self, feature: &str) -> ParseResult<()> {
        if self.dialect == Dialect::Compat {
            return Err(ParseError::new(
                format!("{feature} is not available in the compatibility dialect"),
                self.peek().span,
            ));
        }
        Ok(())
    }

    pub fn parse(&mut self) -> ParseResult<Expr> {
        self.parse_cond()
    }

    fn parse_cond(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let value = self.parse_or()?;
        if self.at_kw("if") {
            self.bump();
            let test = self.parse_or()?;
            let else_branch = if self.at_kw("else") {
                self.bump();
                Some(Box::new(self.parse_cond()?))
            } else {
                None
            };
            return Ok(Expr::new(
                span,
                ExprKind::CondExpr {
                    test: Box::new(test),
                    then_branch: Box::new(value),
                    else_branch,
                },
            ));
        }
        Ok(value)
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut values = vec![self.parse_and()?];
        while self.at_kw("or") {
            self.bump();
            values.push(self.parse_and()?);
        }
        Ok(if values.len() == 1 {
            values.pop().unwrap()
        } else {
            Expr::new(
                span,
                ExprKind::BoolOp {
                    op: BoolOpKind::Or,
                    values,
                },
            )
        })
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut values = vec![self.parse_not()?];
        while self.at_kw("and") {
            self.bump();
            values.push(self.parse_not()?);
        }
        Ok(if values.len() == 1 {
            values.pop().unwrap()
        } else {
            Expr::new(
                span,
                ExprKind::BoolOp {
                    op: BoolOpKind::And,
                    values,
                },
            )
        })
    }

    fn parse_not(&mut self) -> ParseResult<Expr> {
        if self.at_kw("not") {
            let span = self.bump().span;
            let operand = self.parse_not()?;
            return Ok(Expr::new(
                span,
                ExprKind::UnaryOp {
                    op: UnaryOpKind::Not,
                    operand: Box::new(operand),
                },
            ));
        }
        self.parse_null_coalesce()
    }

    fn parse_null_coalesce(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut lhs = self.parse_compare()?;
        while self.at_op("??") {
            self.require_default_dialect("null coalescing `??`")?;
            self.bump();
            let rhs = self.parse_compare()?;
            lhs = Expr::new(
                span,
                ExprKind::NullCoalesce {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
        Ok(lhs)
    }

    fn parse_compare(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut value = self.parse_concat()?;
        let mut rest = Vec::new();
        loop {
            if self.at_kw("is") {
                // `is`/`is not` wrap everything parsed so far into a `Test`
                // node; any comparisons already accumulated are flushed
                // into a `Compare` node first so precedence stays flat.
                value = if rest.is_empty() {
                    value
                } else {
                    Expr::new(span, ExprKind::Compare { first: Box::new(value), rest: std::mem::take(&mut rest) })
                };
                self.bump();
                let negated = if self.at_kw("not") {
                    self.bump();
                    true
                } else {
                    false
                };
                let name = self.expect_name()?;
                let args = if self.at_op("(") {
                    self.parse_call_args()?.0
                } else if !self.at_block_boundary() {
                    vec![self.parse_concat()?]
                } else {
                    vec![]
                };
                value = Expr::new(
                    span,
                    ExprKind::Test {
                        value: Box::new(value),
                        name,
                        args,
                        negated,
                    },
                );
                continue;
            }
            let op = if self.at_op("==") {
                CompareOp::Eq
            } else if self.at_op("!=") {
                CompareOp::Ne
            } else if self.at_op("<") {
                CompareOp::Lt
            } else if self.at_op("<=") {
                CompareOp::Le
            } else if self.at_op(">") {
                CompareOp::Gt
            } else if self.at_op(">=") {
                CompareOp::Ge
            } else if self.at_kw("in") {
                CompareOp::In
            } else if self.at_kw("not") && self.peek_at(1).text == "in" {
                self.bump();
                CompareOp::NotIn
            } else {
                break;
            };
            self.bump();
            let rhs = self.parse_concat()?;
            rest.push((op, rhs));
        }
        Ok(if rest.is_empty() {
            value
        } else {
            Expr::new(span, ExprKind::Compare { first: Box::new(value), rest })
        })
    }

    fn at_block_boundary(&self) -> bool {
        let t = self.peek();
        matches!(t.kind, TokenKind::BlockEnd | TokenKind::VarEnd | TokenKind::Eof)
            || self.at_op(")")
            || self.at_op("]")
            || self.at_op(",")
            || self.at_kw("else")
            || self.at_kw("as")
    }

    fn parse_concat(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut parts = vec![self.parse_additive()?];
        while self.at_op("~") {
            self.bump();
            parts.push(self.parse_additive()?);
        }
        Ok(if parts.len() == 1 {
            parts.pop().unwrap()
        } else {
            Expr::new(span, ExprKind::Concat(parts))
        })
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.at_op("+") {
                BinOpKind::Add
            } else if self.at_op("-") {
                BinOpKind::Sub
            } else {
                break;
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::new(span, ExprKind::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.at_op("*") {
                BinOpKind::Mul
            } else if self.at_op("//") {
                BinOpKind::FloorDiv
            } else if self.at_op("/") {
                BinOpKind::Div
            } else if self.at_op("%") {
                BinOpKind::Mod
            } else {
                break;
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::new(span, ExprKind::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        if self.eat_op("-") {
            let operand = self.parse_unary()?;
            return Ok(Expr::new(span, ExprKind::UnaryOp { op: UnaryOpKind::Neg, operand: Box::new(operand) }));
        }
        if self.eat_op("+") {
            let operand = self.parse_unary()?;
            return Ok(Expr::new(span, ExprKind::UnaryOp { op: UnaryOpKind::Pos, operand: Box::new(operand) }));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let base = self.parse_range()?;
        if self.eat_op("**") {
            let exp = self.parse_unary()?;
            return Ok(Expr::new(span, ExprKind::BinOp { op: BinOpKind::Pow, lhs: Box::new(base), rhs: Box::new(exp) }));
        }
        Ok(base)
    }

    fn parse_range(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let start = self.parse_postfix()?;
        if self.at_op("..") {
            self.require_default_dialect("range literal `..`")?;
            self.bump();
            let stop = self.parse_postfix()?;
            return Ok(Expr::new(span, ExprKind::Range { start: Box::new(start), stop: Box::new(stop) }));
        }
        Ok(start)
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let span = self.peek().span;
        let mut expr = self.parse_primary()?;
        loop {
            if self.at_op(".") || self.at_op("?.") {
                let optional = self.eat_op("?.");
                if !optional {
                    self.bump();
                }
                let attr = self.expect_name()?;
                expr = Expr::new(span, ExprKind::Getattr { base: Box::new(expr), attr, optional });
            } else if self.eat_op("[") {
                expr = self.parse_subscript(expr, span)?;
            } else if self.at_op("(") {
                let (args, kwargs) = self.parse_call_args()?;
                expr = Expr::new(span, ExprKind::FuncCall { callee: Box::new(expr), args, kwargs, optional: false });
            } else if self.at_op("|") {
                self.bump();
                let name = self.expect_name()?;
                let (args, kwargs) = if self.at_op("(") {
                    self.parse_call_args()?
                } else {
                    (vec![], vec![])
                };
                expr = Expr::new(span, ExprKind::Filter { value: Box::new(expr), name, args, kwargs });
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self, base: Expr, span: Span) -> ParseResult<Expr> {
        // already consumed '['
        if self.at_op(":") {
            return self.parse_slice_tail(base, span, None);
        }
        let first = self.parse()?;
        if self.at_op(":") {
            return self.parse_slice_tail(base, span, Some(first));
        }
        self.expect_op("]")?;
        Ok(Expr::new(span, ExprKind::Getitem { base: Box::new(base), index: Box::new(first), optional: false }))
    }

    fn parse_slice_tail(&mut self, base: Expr, span: Span, start: Option<Expr>) -> ParseResult<Expr> {
        self.expect_op(":")?;
        let stop = if self.at_op(":") || self.at_op("]") {
            None
        } else {
            Some(self.parse()?)
        };
        let step = if self.eat_op(":") {
            if self.at_op("]") {
                None
            } else {
                Some(self.parse()?)
            }
        } else {
            None
        };
        self.expect_op("]")?;
        Ok(Expr::new(
            span,
            ExprKind::Slice {
                base: Box::new(base),
                start: start.map(Box::new),
                stop: stop.map(Box::new),
                step: step.map(Box::new),
            },
        ))
    }

    fn parse_call_args(&mut self) -> ParseResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        self.expect_op("(")?;
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        while !self.at_op(")") {
            if self.peek().kind == TokenKind::Name && self.peek_at(1).text == "=" {
                let name = self.expect_name()?;
                self.expect_op("=")?;
                let value = self.parse()?;
                kwargs.push((name, value));
            } else {
                args.push(self.parse()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok((args, kwargs))
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        let t = self.peek().clone();
        if t.kind == TokenKind::Name || t.kind == TokenKind::Keyword {
            self.bump();
            Ok(t.text)
        } else {
            Err(ParseError::new(format!("expected identifier, found {:?}", t.text), t.span))
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::String => {
                self.bump();
                Ok(Expr::new(tok.span, ExprKind::Const(Literal::Str(tok.text))))
            }
            TokenKind::Int => {
                self.bump();
                let value: i64 = tok.text.parse().map_err(|_| {
                    ParseError::new(format!("invalid integer literal {:?}", tok.text), tok.span)
                })?;
                Ok(Expr::new(tok.span, ExprKind::Const(Literal::Int(value))))
            }
            TokenKind::Float => {
                self.bump();
                let value: f64 = tok.text.parse().map_err(|_| {
                    ParseError::new(format!("invalid float literal {:?}", tok.text), tok.span)
                })?;
                Ok(Expr::new(tok.span, ExprKind::Const(Literal::Float(value))))
            }
            TokenKind::Keyword if tok.text == "true" || tok.text == "True" => {
                self.bump();
                Ok(Expr::new(tok.span, ExprKind::Const(Literal::Bool(true))))
            }
            TokenKind::Keyword if tok.text == "false" || tok.text == "False" => {
                self.bump();
                Ok(Expr::new(tok.span, ExprKind::Const(Literal::Bool(false))))
            }
            TokenKind::Keyword if tok.text == "none" || tok.text == "None" => {
                self.bump();
                Ok(Expr::new(tok.span, ExprKind::Const(Literal::None)))
            }
            TokenKind::Name => {
                self.bump();
                Ok(Expr::new(tok.span, ExprKind::Name(tok.text)))
            }
            TokenKind::Op if tok.text == "(" => {
                self.bump();
                let mut items = vec![self.parse()?];
                let mut trailing_comma = false;
                while self.eat_op(",") {
                    if self.at_op(")") {
                        trailing_comma = true;
                        break;
                    }
                    items.push(self.parse()?);
                }
                self.expect_op(")")?;
                if items.len() == 1 && !trailing_comma {
                    Ok(items.pop().unwrap())
                } else {
                    Ok(Expr::new(tok.span, ExprKind::Tuple(items)))
                }
            }
            TokenKind::Op if tok.text == "[" => {
                self.bump();
                let mut items = Vec::new();
                while !self.at_op("]") {
                    items.push(self.parse()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                Ok(Expr::new(tok.span, ExprKind::List(items)))
            }
            TokenKind::Op if tok.text == "{" => {
                self.bump();
                let mut pairs = Vec::new();
                while !self.at_op("}") {
                    let key = self.parse()?;
                    self.expect_op(":")?;
                    let value = self.parse()?;
                    pairs.push((key, value));
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("}")?;
                Ok(Expr::new(tok.span, ExprKind::Dict(pairs)))
            }
            _ => Err(ParseError::new(
                format!("unexpected token {:?} while parsing expression", tok.text),
                tok.span,
            )),
        }
    }
}
