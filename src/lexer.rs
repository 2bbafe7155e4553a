//! Token stream for Kida template source.
//!
//! The lexer is split into two scanning modes: `Data`, which copies source
//! text verbatim until the next delimiter, and `Tag`, which recognizes
//! literals, names, keywords and operators inside `{% %}` / `{{ }}` / `{# #}`.
//! Sub-lexemes (strings, numbers, identifiers) are recognized with `nom`
//! combinators; the outer drive loop is a manual scan so that we can track
//! `(line, column)` precisely, the way `Ast::from_str` recovers position
//! from a byte offset in the upstream parser.

use std::borrow::Cow;

use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, take_while1};
use nom::character::complete::{char, digit1, one_of};
use nom::combinator::{opt, recognize, value};
use nom::multi::many0;
use nom::sequence::{pair, tuple};
use nom::IResult;

use crate::error::{LexError, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Data,
    BlockStart,
    BlockEnd,
    VarStart,
    VarEnd,
    Name,
    Keyword,
    String,
    Int,
    Float,
    Op,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }
}

/// Delimiter configuration; the environment exposes this as `Syntax`.
#[derive(Debug, Clone)]
pub struct Delimiters {
    pub block_start: String,
    pub block_end: String,
    pub var_start: String,
    pub var_end: String,
    pub comment_start: String,
    pub comment_end: String,
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            block_start: "{%".into(),
            block_end: "%}".into(),
            var_start: "{{".into(),
            var_end: "}}".into(),
            comment_start: "{#".into(),
            comment_end: "#}".into(),
            trim_blocks: false,
            lstrip_blocks: false,
        }
    }
}

pub const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "end", "endif", "for", "endfor", "in", "is", "not", "and", "or",
    "true", "false", "none", "True", "False", "None", "block", "endblock", "extends", "include",
    "import", "from", "as", "with", "endwith", "macro", "def", "endmacro", "enddef", "call",
    "endcall", "let", "set", "export", "do", "capture", "endcapture", "cache", "endcache",
    "filter", "endfilter", "raw", "endraw", "spaceless", "endspaceless", "embed", "endembed",
    "match", "endmatch", "case", "unless", "endunless", "break", "continue", "recursive",
    "scoped", "required", "ignore", "missing", "without", "context",
];

fn is_keyword(s: &str) -> bool {
    KEYWORDS.contains(&s)
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            col: 0,
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn advance(&mut self, n: usize) {
        for ch in self.src[self.pos..self.pos + n].chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 0;
            } else {
                self.col += 1;
            }
        }
        self.pos += n;
    }

    fn starts_with(&self, needle: &str) -> bool {
        self.rest().starts_with(needle)
    }
}

/// Lazily tokenizes the whole source into a finite vector terminated by
/// `Eof`; Kida templates are small enough in practice that a fully
/// materialized token vector is simpler for the parser to backtrack over
/// than a true streaming iterator.
pub struct Lexer<'a> {
    cur: Cursor<'a>,
    delims: &'a Delimiters,
    in_tag: bool,
    strip_next_data_leading_ws: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, delims: &'a Delimiters) -> Self {
        Self {
            cur: Cursor::new(src),
            delims,
            in_tag: false,
            strip_next_data_leading_ws: false,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            if self.cur.rest().is_empty() {
                tokens.push(Token::new(TokenKind::Eof, "", self.cur.span()));
                return Ok(tokens);
            }
            if !self.in_tag {
                self.lex_data(&mut tokens)?;
            } else {
                self.lex_tag(&mut tokens)?;
                self.maybe_consume_raw_block(&mut tokens)?;
            }
        }
    }

    /// After a `{% raw %}` tag has just closed, switches into verbatim
    /// scanning up to (but not including) the matching `{% endraw %}`.
    fn maybe_consume_raw_block(&mut self, tokens: &mut Vec<Token>) -> Result<(), LexError> {
        let n = tokens.len();
        if n < 3 || self.in_tag {
            return Ok(());
        }
        let is_raw_open = tokens[n - 1].kind == TokenKind::BlockEnd
            && tokens[n - 2].kind == TokenKind::Keyword
            && tokens[n - 2].text == "raw"
            && tokens[n - 3].kind == TokenKind::BlockStart;
        if !is_raw_open {
            return Ok(());
        }
        let span = self.cur.span();
        let text = self.consume_raw_until_endraw()?;
        tokens.push(Token::new(TokenKind::Data, text, span));
        Ok(())
    }

    fn lex_data(&mut self, tokens: &mut Vec<Token>) -> Result<(), LexError> {
        let start = self.cur.span();
        let rest = self.cur.rest();
        let mut search = rest;
        let mut offset = 0usize;
        let found = loop {
            if search.is_empty() {
                break None;
            }
            if search.starts_with(self.delims.comment_start.as_str())
                || search.starts_with(self.delims.block_start.as_str())
                || search.starts_with(self.delims.var_start.as_str())
            {
                break Some(offset);
            }
            let step = search.chars().next().map(|c| c.len_utf8()).unwrap_or(1);
            search = &search[step..];
            offset += step;
        };
        let data_len = found.unwrap_or(rest.len());
        let mut text = &rest[..data_len];
        if self.strip_next_data_leading_ws {
            text = text.trim_start_matches([' ', '\t']);
            if self.delims.trim_blocks {
                text = text.strip_prefix('\n').unwrap_or(text);
            }
            self.strip_next_data_leading_ws = false;
        }

        // Comments are consumed entirely and never produce a token.
        if rest[data_len..].starts_with(self.delims.comment_start.as_str()) {
            if !text.is_empty() {
                tokens.push(Token::new(TokenKind::Data, text, start));
            }
            self.cur.advance(data_len);
            return self.lex_comment();
        }

        if !text.is_empty() {
            tokens.push(Token::new(TokenKind::Data, text, start));
        }
        self.cur.advance(data_len);

        if self.cur.starts_with(self.delims.block_start.as_str()) {
            self.emit_open_delim(tokens, TokenKind::BlockStart, &self.delims.block_start.clone());
        } else if self.cur.starts_with(self.delims.var_start.as_str()) {
            self.emit_open_delim(tokens, TokenKind::VarStart, &self.delims.var_start.clone());
        }
        Ok(())
    }

    fn emit_open_delim(&mut self, tokens: &mut Vec<Token>, kind: TokenKind, delim: &str) {
        let span = self.cur.span();
        self.cur.advance(delim.len());
        let trimmed = self.cur.starts_with("-");
        if trimmed {
            self.cur.advance(1);
            if let Some(last) = tokens.last() {
                if last.kind == TokenKind::Data {
                    let idx = tokens.len() - 1;
                    tokens[idx].text = tokens[idx].text.trim_end().to_string();
                }
            }
        }
        tokens.push(Token::new(kind, delim, span));
        self.in_tag = true;
    }

    fn lex_comment(&mut self) -> Result<(), LexError> {
        let start = self.cur.span();
        self.cur.advance(self.delims.comment_start.len());
        match self.cur.rest().find(self.delims.comment_end.as_str()) {
            Some(idx) => {
                self.cur.advance(idx + self.delims.comment_end.len());
                Ok(())
            }
            None => Err(LexError::new("unterminated comment", start)
                .with_suggestion(format!("close with {:?}", self.delims.comment_end))),
        }
    }

    fn lex_tag(&mut self, tokens: &mut Vec<Token>) -> Result<(), LexError> {
        // Skip inter-token whitespace inside a tag.
        let ws_len = self
            .cur
            .rest()
            .chars()
            .take_while(|c| c.is_whitespace())
            .map(|c| c.len_utf8())
            .sum::<usize>();
        self.cur.advance(ws_len);

        if self.cur.starts_with("-") && self.ends_with_block_or_var_close_after_dash() {
            self.cur.advance(1);
            self.close_tag(tokens, true);
            return Ok(());
        }
        if self.cur.starts_with(self.delims.block_end.as_str())
            || self.cur.starts_with(self.delims.var_end.as_str())
        {
            self.close_tag(tokens, false);
            return Ok(());
        }
        if self.cur.rest().is_empty() {
            return Err(LexError::new("unexpected end of input inside tag", self.cur.span()));
        }

        let span = self.cur.span();
        let rest = self.cur.rest();

        if let Ok((_, text)) = lex_string(rest) {
            self.cur.advance(string_raw_len(rest));
            tokens.push(Token::new(TokenKind::String, text, span));
            return Ok(());
        }
        if let Ok((remaining, text)) = lex_number(rest) {
            let consumed = rest.len() - remaining.len();
            let kind = if text.contains('.') || text.contains(['e', 'E']) {
                TokenKind::Float
            } else {
                TokenKind::Int
            };
            self.cur.advance(consumed);
            tokens.push(Token::new(kind, text, span));
            return Ok(());
        }
        if let Ok((remaining, text)) = lex_name(rest) {
            let consumed = rest.len() - remaining.len();
            self.cur.advance(consumed);
            let kind = if is_keyword(text) {
                TokenKind::Keyword
            } else {
                TokenKind::Name
            };
            tokens.push(Token::new(kind, text, span));
            return Ok(());
        }
        if let Ok((remaining, text)) = lex_operator(rest) {
            let consumed = rest.len() - remaining.len();
            self.cur.advance(consumed);
            tokens.push(Token::new(TokenKind::Op, text, span));
            return Ok(());
        }

        Err(LexError::new(
            format!("unexpected character {:?}", rest.chars().next().unwrap()),
            span,
        ))
    }

    fn ends_with_block_or_var_close_after_dash(&self) -> bool {
        let rest = &self.cur.rest()[1..];
        rest.starts_with(self.delims.block_end.as_str()) || rest.starts_with(self.delims.var_end.as_str())
    }

    fn close_tag(&mut self, tokens: &mut Vec<Token>, strip_after: bool) {
        let span = self.cur.span();
        let (kind, delim) = if self.cur.starts_with(self.delims.block_end.as_str()) {
            (TokenKind::BlockEnd, self.delims.block_end.clone())
        } else {
            (TokenKind::VarEnd, self.delims.var_end.clone())
        };
        self.cur.advance(delim.len());
        tokens.push(Token::new(kind, delim, span));
        self.in_tag = false;
        self.strip_next_data_leading_ws = strip_after;
        if !strip_after && self.delims.lstrip_blocks && kind == TokenKind::BlockEnd {
            // lstrip_blocks only trims data preceding the *next* block tag,
            // which is handled on the opening side in `lex_data`; nothing
            // to do here but keep the flag false to avoid double-trimming.
        }
    }

    /// Entered right after a `{% raw %}` tag has been fully tokenized.
    /// Resumes raw-text mode: everything up to the matching
    /// `{% endraw %}` (ignoring any other delimiters) is returned as a
    /// single verbatim string, and the cursor is left positioned right
    /// before the `{%` of `endraw`.
    pub fn consume_raw_until_endraw(&mut self) -> Result<String, LexError> {
        let start = self.cur.span();
        let needle_start = &self.delims.block_start;
        let mut search = self.cur.rest();
        let mut offset = 0usize;
        loop {
            match search.find(needle_start.as_str()) {
                None => {
                    return Err(LexError::new("unterminated {% raw %} block", start)
                        .with_suggestion("close with {% endraw %}"))
                }
                Some(idx) => {
                    let candidate = &search[idx..];
                    let after = candidate[needle_start.len()..].trim_start();
                    let after = after.strip_prefix('-').unwrap_or(after).trim_start();
                    if after.starts_with("endraw") {
                        let raw_text = &self.cur.rest()[..offset + idx];
                        self.cur.advance(offset + idx);
                        return Ok(raw_text.to_string());
                    }
                    let step = idx + needle_start.len();
                    offset += step;
                    search = &candidate[needle_start.len()..];
                }
            }
        }
    }

    pub fn in_tag(&self) -> bool {
        self.in_tag
    }
}

fn string_raw_len(input: &str) -> usize {
    let quote = input.as_bytes()[0];
    let mut i = 1;
    let bytes = input.as_bytes();
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    input.len()
}

fn lex_string(input: &str) -> IResult<&str, String> {
    alt((
        delimited_string('\''),
        delimited_string('"'),
    ))(input)
}

fn delimited_string<'a>(quote: char) -> impl FnMut(&'a str) -> IResult<&'a str, String> {
    move |input: &'a str| {
        let (input, _) = char(quote)(input)?;
        let (input, content) = opt(escaped_transform(
            is_not(match quote {
                '\'' => "'\\",
                _ => "\"\\",
            }),
            '\\',
            alt((
                value('\\', char('\\')),
                value(quote, char(quote)),
                value('\n', char('n')),
                value('\t', char('t')),
                value('\r', char('r')),
            )),
        ))(input)?;
        let (input, _) = char(quote)(input)?;
        Ok((input, content.unwrap_or_default()))
    }
}

fn lex_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        digit1,
        opt(alt((
            recognize(tuple((
                char('.'),
                digit1,
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
            ))),
            recognize(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
    ))(input)
}

fn lex_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        many0(nom::character::complete::satisfy(|c| {
            c.is_alphanumeric() || c == '_'
        })),
    ))(input)
}

const MULTI_CHAR_OPS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "??", "?.", "..", "~", "|", "&&", "||",
];

fn lex_operator(input: &str) -> IResult<&str, &str> {
    for op in MULTI_CHAR_OPS {
        if input.starts_with(op) {
            return Ok((&input[op.len()..], op));
        }
    }
    recognize(one_of("+-*/%<>=.,:()[]{}|~"))(input)
}

#[allow(dead_code)]
fn unused_import_anchor(_: Cow<'_, str>) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Token> {
        let delims = Delimiters::default();
        Lexer::new(src, &delims).tokenize().unwrap()
    }

    #[test]
    fn data_only() {
        let t = toks("hello world");
        assert_eq!(t[0].kind, TokenKind::Data);
        assert_eq!(t[0].text, "hello world");
        assert_eq!(t[1].kind, TokenKind::Eof);
    }

    #[test]
    fn variable_expression() {
        let t = toks("Hi {{ name }}!");
        let kinds: Vec<_> = t.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Data,
                TokenKind::VarStart,
                TokenKind::Name,
                TokenKind::VarEnd,
                TokenKind::Data,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comment_is_dropped() {
        let t = toks("a{# hidden #}b");
        assert_eq!(t.len(), 3);
        assert_eq!(t[0].text, "a");
        assert_eq!(t[1].text, "b");
    }

    #[test]
    fn unterminated_comment_errors() {
        let delims = Delimiters::default();
        let err = Lexer::new("{# oops", &delims).tokenize().unwrap_err();
        assert!(err.message.contains("unterminated comment"));
    }

    #[test]
    fn string_literal_escapes() {
        let t = toks(r#"{{ "a\"b" }}"#);
        assert_eq!(t[2].text, "a\"b");
    }

    #[test]
    fn whitespace_trim() {
        let t = toks("A \n{%- if x %}B{% end -%}\n C");
        let data: Vec<_> = t
            .iter()
            .filter(|tok| tok.kind == TokenKind::Data)
            .map(|tok| tok.text.as_str())
            .collect();
        assert_eq!(data, vec!["A", "B", "C"]);
    }
}
