//! ABOUTME: Template-dialect lexer — literal/expression mode switching over `{{ }}`, `{% %}`, `{# #}`

use super::{next_expr_token, skip_ws, Cursor};
use crate::error::{EngineError, EngineResult};
use crate::token::{Token, TokenKind};

/// Tokenizes a full template source into a flat token stream: `Text` runs
/// interleaved with the expression tokens found inside `{{ }}`/`{% %}`
/// delimiters. `{# #}` comments are emitted as `Comment` tokens the parser
/// discards. Trim markers (`{%-`, `-%}`, `{{-`, `-}}`) strip adjacent
/// whitespace from the surrounding `Text` tokens as a post-pass.
pub fn tokenize(src: &str) -> EngineResult<Vec<Token>> {
    let mut cur = Cursor::new(src);
    let mut tokens = Vec::new();

    while !cur.is_eof() {
        let text_start_span = cur.span();
        let mut text = String::new();
        while !cur.is_eof()
            && !cur.starts_with("{{")
            && !cur.starts_with("{%")
            && !cur.starts_with("{#")
        {
            let ch = cur.peek_char().unwrap();
            let s = ch.to_string();
            text.push(ch);
            cur.advance(&s);
        }
        if !text.is_empty() {
            tokens.push(Token::new(TokenKind::Text, text, text_start_span));
        }
        if cur.is_eof() {
            break;
        }

        if cur.starts_with("{#") {
            tokenize_comment(&mut cur, &mut tokens)?;
        } else if cur.starts_with("{{") {
            tokenize_delim(&mut cur, &mut tokens, "{{", "}}", TokenKind::OpenVar, TokenKind::OpenVarTrim, TokenKind::CloseVar, TokenKind::CloseVarTrim)?;
        } else {
            tokenize_delim(&mut cur, &mut tokens, "{%", "%}", TokenKind::OpenTag, TokenKind::OpenTagTrim, TokenKind::CloseTag, TokenKind::CloseTagTrim)?;
        }
    }

    tokens.push(Token::new(TokenKind::Eof, "", cur.span()));
    apply_trim_markers(&mut tokens);
    Ok(tokens)
}

fn tokenize_comment(cur: &mut Cursor, tokens: &mut Vec<Token>) -> EngineResult<()> {
    let span = cur.span();
    cur.advance("{#");
    let mut content = String::new();
    loop {
        if cur.is_eof() {
            return Err(EngineError::syntax("unterminated comment", span, "{#"));
        }
        if cur.starts_with("#}") {
            cur.advance("#}");
            break;
        }
        let ch = cur.peek_char().unwrap();
        content.push(ch);
        cur.advance(&ch.to_string());
    }
    tokens.push(Token::new(TokenKind::Comment, content, span));
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn tokenize_delim(
    cur: &mut Cursor,
    tokens: &mut Vec<Token>,
    open: &str,
    close: &str,
    open_kind: TokenKind,
    open_trim_kind: TokenKind,
    close_kind: TokenKind,
    close_trim_kind: TokenKind,
) -> EngineResult<()> {
    let span = cur.span();
    cur.advance(open);
    let trim_left = cur.starts_with("-");
    if trim_left {
        cur.advance("-");
        tokens.push(Token::new(open_trim_kind, format!("{}-", open), span));
    } else {
        tokens.push(Token::new(open_kind, open, span));
    }

    loop {
        skip_ws(cur);
        if cur.is_eof() {
            return Err(EngineError::syntax(
                format!("unterminated `{}` block", open),
                span,
                cur.snippet(20),
            ));
        }
        if cur.starts_with("-") && cur.rest()[1..].starts_with(close) {
            let close_span = cur.span();
            cur.advance("-");
            cur.advance(close);
            tokens.push(Token::new(close_trim_kind, format!("-{}", close), close_span));
            return Ok(());
        }
        if cur.starts_with(close) {
            let close_span = cur.span();
            cur.advance(close);
            tokens.push(Token::new(close_kind, close, close_span));
            return Ok(());
        }
        tokens.push(next_expr_token(cur)?);
    }
}

/// Strips whitespace adjacent to trim-marked delimiters from the `Text`
/// tokens immediately before/after them.
fn apply_trim_markers(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        match tokens[i].kind {
            TokenKind::OpenVarTrim | TokenKind::OpenTagTrim => {
                if i > 0 {
                    if let Some(prev) = tokens.get_mut(i - 1) {
                        if prev.kind == TokenKind::Text {
                            prev.text = prev.text.trim_end().to_string();
                        }
                    }
                }
            }
            TokenKind::CloseVarTrim | TokenKind::CloseTagTrim => {
                if let Some(next) = tokens.get_mut(i + 1) {
                    if next.kind == TokenKind::Text {
                        next.text = next.text.trim_start().to_string();
                    }
                }
            }
            _ => {}
        }
    }
}
