//! ABOUTME: Lexing — shared expression-token scanning plus the two dialect-specific
//! tokenizers built on top of it (`template`: delimiter/mode-switching; `script`:
//! line-oriented).
//!
//! The low-level literal scanners (numbers, quoted strings with escapes) are
//! built with `nom` combinators, the same library the teacher's `parser.rs`
//! uses for its atom-level parsing; the stateful delimiter/mode switching
//! that the two dialects need is not naturally expressed as `nom` combinators
//! and is hand-rolled, matching how mainstream Rust template engines split a
//! char-level scanner from a combinator-based literal reader.

pub mod script;
pub mod template;

use crate::error::{EngineError, SourceSpan};
use crate::token::{Token, TokenKind};
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, tag};
use nom::character::complete::{char, digit1, none_of};
use nom::combinator::{opt, recognize, value};
use nom::multi::many0;
use nom::sequence::pair;
use nom::IResult;

/// Tracks line/col while scanning so tokens carry accurate spans.
pub struct Cursor<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(input: &'a str) -> Self {
        Cursor { input, pos: 0, line: 1, col: 1 }
    }

    pub fn span(&self) -> SourceSpan {
        SourceSpan { line: self.line, col: self.col }
    }

    pub fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    pub fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn starts_with(&self, s: &str) -> bool {
        self.rest().starts_with(s)
    }

    /// Advances the cursor past `consumed` bytes of `self.rest()`, updating line/col.
    pub fn advance(&mut self, consumed: &str) {
        for ch in consumed.chars() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        self.pos += consumed.len();
    }

    pub fn snippet(&self, max: usize) -> String {
        self.rest().chars().take(max).collect()
    }
}

/// Skips ASCII whitespace that isn't a newline-significant boundary; used
/// inside expression-mode scanning where newlines are not meaningful.
pub fn skip_ws(cur: &mut Cursor) {
    let rest = cur.rest();
    let trimmed = rest.trim_start_matches([' ', '\t', '\r', '\n']);
    let consumed_len = rest.len() - trimmed.len();
    let consumed = rest[..consumed_len].to_string();
    cur.advance(&consumed);
}

fn nom_number(input: &str) -> IResult<&str, f64> {
    recognize(pair(
        digit1,
        opt(pair(char('.'), digit1)),
    ))(input)
    .map(|(rest, matched)| (rest, matched.parse::<f64>().unwrap_or(f64::NAN)))
}

fn nom_quoted(quote: char) -> impl Fn(&str) -> IResult<&str, String> {
    move |input: &str| {
        let (rest, content) = nom::sequence::delimited(
            char(quote),
            opt(escaped_transform(
                none_of(['\\', quote]),
                '\\',
                alt((
                    value('\\', char('\\')),
                    value('\n', char('n')),
                    value('\t', char('t')),
                    value(quote, char(quote)),
                )),
            )),
            char(quote),
        )(input)?;
        Ok((rest, content.unwrap_or_default()))
    }
}

fn nom_ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((nom::character::complete::alpha1, tag("_"))),
        many0(alt((nom::character::complete::alphanumeric1, tag("_")))),
    ))(input)
}

/// Scans a single expression-mode token at the cursor (after whitespace has
/// been skipped by the caller). Shared by both dialects' tokenizers.
pub fn next_expr_token(cur: &mut Cursor) -> Result<Token, EngineError> {
    let span = cur.span();
    let rest = cur.rest();

    if let Ok((remaining, n)) = nom_number(rest) {
        let consumed = &rest[..rest.len() - remaining.len()];
        cur.advance(consumed);
        return Ok(Token::new(TokenKind::Number(n), consumed, span));
    }
    if rest.starts_with('"') || rest.starts_with('\'') || rest.starts_with('`') {
        let quote = rest.chars().next().unwrap();
        match nom_quoted(quote)(rest) {
            Ok((remaining, s)) => {
                let consumed_len = rest.len() - remaining.len();
                let consumed = rest[..consumed_len].to_string();
                cur.advance(&consumed);
                return Ok(Token::new(TokenKind::Str(s), consumed, span));
            }
            Err(_) => {
                return Err(EngineError::syntax(
                    "unterminated string literal",
                    span,
                    cur.snippet(20),
                ))
            }
        }
    }
    if let Ok((remaining, id)) = nom_ident(rest) {
        let consumed = id.to_string();
        cur.advance(&consumed);
        let _ = remaining;
        return Ok(Token::new(TokenKind::Ident, consumed, span));
    }

    macro_rules! op {
        ($s:expr, $kind:expr) => {
            if rest.starts_with($s) {
                cur.advance($s);
                return Ok(Token::new($kind, $s, span));
            }
        };
    }
    op!("**", TokenKind::DStar);
    op!("//", TokenKind::DSlash);
    op!("==", TokenKind::Eq);
    op!("!=", TokenKind::Ne);
    op!("<=", TokenKind::Le);
    op!(">=", TokenKind::Ge);
    op!("+", TokenKind::Plus);
    op!("-", TokenKind::Minus);
    op!("*", TokenKind::Star);
    op!("/", TokenKind::Slash);
    op!("%", TokenKind::Percent);
    op!("<", TokenKind::Lt);
    op!(">", TokenKind::Gt);
    op!("=", TokenKind::Assign);
    op!("|", TokenKind::Pipe);
    op!(",", TokenKind::Comma);
    op!(".", TokenKind::Dot);
    op!(":", TokenKind::Colon);
    op!("(", TokenKind::LParen);
    op!(")", TokenKind::RParen);
    op!("[", TokenKind::LBracket);
    op!("]", TokenKind::RBracket);
    op!("{", TokenKind::LBrace);
    op!("}", TokenKind::RBrace);
    op!("@", TokenKind::At);

    Err(EngineError::syntax(
        format!("unexpected character {:?}", rest.chars().next()),
        span,
        cur.snippet(20),
    ))
}

