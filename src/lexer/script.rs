//! ABOUTME: Script-dialect lexer — line-oriented tokenizing over the shared expression grammar

use super::{next_expr_token, Cursor};
use crate::error::EngineResult;
use crate::token::{Token, TokenKind};

/// Tokenizes script-dialect source: the same expression-token grammar as
/// the template dialect, but statements are newline-terminated and
/// indentation is purely informational (skipped, never tokenized).
pub fn tokenize(src: &str) -> EngineResult<Vec<Token>> {
    let mut cur = Cursor::new(src);
    let mut tokens = Vec::new();

    loop {
        // Skip horizontal whitespace; newlines are significant statement separators.
        let rest = cur.rest();
        let trimmed = rest.trim_start_matches([' ', '\t', '\r']);
        let consumed_len = rest.len() - trimmed.len();
        let ws = rest[..consumed_len].to_string();
        cur.advance(&ws);

        if cur.is_eof() {
            break;
        }
        if cur.peek_char() == Some('\n') {
            let span = cur.span();
            cur.advance("\n");
            if !matches!(tokens.last().map(|t: &Token| &t.kind), Some(TokenKind::Newline) | None) {
                tokens.push(Token::new(TokenKind::Newline, "\n", span));
            }
            continue;
        }
        if cur.peek_char() == Some(';') {
            // Line comment: discard to end of line.
            while !cur.is_eof() && cur.peek_char() != Some('\n') {
                let ch = cur.peek_char().unwrap();
                cur.advance(&ch.to_string());
            }
            continue;
        }
        tokens.push(next_expr_token(&mut cur)?);
    }

    tokens.push(Token::new(TokenKind::Newline, "\n", cur.span()));
    tokens.push(Token::new(TokenKind::Eof, "", cur.span()));
    Ok(tokens)
}
