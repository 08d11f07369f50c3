//! ABOUTME: Template-dialect statement parser — `{% if %}`, `{% for %}`, macros,
//! inheritance, `call`/`caller`, `switch`, and registered extension tags.

use super::{parse_args, parse_expr, TokenStream};
use crate::ast::{Args, CallBlock, IfBranch, MacroDef, Stmt, SwitchCase, Template};
use crate::error::{EngineError, EngineResult, SourceSpan};
use crate::registry::ExtensionRegistry;
use crate::token::{Token, TokenKind};
use std::rc::Rc;

/// Parses a full template token stream into a `Template`, extracting any
/// top-level `{% extends %}` and `{% block %}` definitions for the
/// inheritance machinery (§4.7).
pub fn parse(tokens: &[Token], specs: &ExtensionRegistry) -> EngineResult<Template> {
    let mut ts = TokenStream::new(tokens);
    let (body, _) = parse_stmt_list_until(&mut ts, &[], specs)?;

    let extends = body.iter().find_map(|s| match s {
        Stmt::Extends { expr, .. } => Some(expr.clone()),
        _ => None,
    });
    let blocks = body
        .iter()
        .filter_map(|s| match s {
            Stmt::Block { name, body } => Some((name.clone(), body.clone())),
            _ => None,
        })
        .collect();

    Ok(Template { body, extends, blocks })
}

fn open_tag(ts: &mut TokenStream) -> EngineResult<()> {
    if ts.eat_kind(&TokenKind::OpenTag) || ts.eat_kind(&TokenKind::OpenTagTrim) {
        Ok(())
    } else {
        Err(EngineError::syntax(
            "expected a `{%` tag",
            ts.peek().span,
            ts.peek().text.clone(),
        ))
    }
}

fn close_tag(ts: &mut TokenStream) -> EngineResult<()> {
    if ts.eat_kind(&TokenKind::CloseTag) || ts.eat_kind(&TokenKind::CloseTagTrim) {
        Ok(())
    } else {
        Err(EngineError::syntax(
            format!("expected `%}}`, found `{}`", ts.peek().text),
            ts.peek().span,
            ts.peek().text.clone(),
        ))
    }
}

fn close_var(ts: &mut TokenStream) -> EngineResult<()> {
    if ts.eat_kind(&TokenKind::CloseVar) || ts.eat_kind(&TokenKind::CloseVarTrim) {
        Ok(())
    } else {
        Err(EngineError::syntax(
            format!("expected `}}}}`, found `{}`", ts.peek().text),
            ts.peek().span,
            ts.peek().text.clone(),
        ))
    }
}

fn consume_tag_word(ts: &mut TokenStream, word: &str) -> EngineResult<()> {
    open_tag(ts)?;
    ts.expect_ident(word)
}

/// Parses statements until the stream is at EOF, or sitting right before a
/// `{%` tag whose keyword is one of `stop_words` (which is left unconsumed
/// for the caller to dispatch on).
fn parse_stmt_list_until(
    ts: &mut TokenStream,
    stop_words: &[&str],
    specs: &ExtensionRegistry,
) -> EngineResult<(Vec<Stmt>, String)> {
    let mut body = Vec::new();
    loop {
        if matches!(ts.peek().kind, TokenKind::Comment) {
            ts.advance();
            continue;
        }
        if ts.is_eof() {
            if stop_words.is_empty() {
                return Ok((body, String::new()));
            }
            return Err(EngineError::syntax(
                format!("unterminated block, expected one of {:?}", stop_words),
                ts.peek().span,
                "<eof>",
            ));
        }
        let at_tag = matches!(ts.peek().kind, TokenKind::OpenTag | TokenKind::OpenTagTrim);
        if at_tag && matches!(ts.peek_at(1).kind, TokenKind::Ident) {
            let word = ts.peek_at(1).text.clone();
            if stop_words.contains(&word.as_str()) {
                return Ok((body, word));
            }
        }
        body.push(parse_stmt(ts, specs)?);
    }
}

fn parse_stmt(ts: &mut TokenStream, specs: &ExtensionRegistry) -> EngineResult<Stmt> {
    match &ts.peek().kind {
        TokenKind::Text => {
            let tok = ts.advance();
            Ok(Stmt::RawText(tok.text))
        }
        TokenKind::OpenVar | TokenKind::OpenVarTrim => {
            ts.advance();
            let expr = parse_expr(ts)?;
            close_var(ts)?;
            Ok(Stmt::Output(expr))
        }
        TokenKind::OpenTag | TokenKind::OpenTagTrim => {
            ts.advance();
            let span = ts.peek().span;
            let name = ts.expect_identifier_name()?;
            match name.as_str() {
                "if" => parse_if(ts, specs),
                "for" => parse_for(ts, specs, span),
                "set" => parse_set(ts, specs),
                "macro" => parse_macro(ts, specs),
                "call" => parse_call(ts, specs, span),
                "include" => parse_include(ts, span),
                "extends" => parse_extends(ts, span),
                "block" => parse_block_tag(ts, specs),
                "switch" => parse_switch(ts, specs),
                "do" => parse_do(ts),
                other => parse_extension_tag(ts, specs, other, span),
            }
        }
        _ => Err(EngineError::syntax(
            format!("unexpected token `{}`", ts.peek().text),
            ts.peek().span,
            ts.peek().text.clone(),
        )),
    }
}

fn parse_if(ts: &mut TokenStream, specs: &ExtensionRegistry) -> EngineResult<Stmt> {
    let cond = parse_expr(ts)?;
    close_tag(ts)?;
    let (body, mut stop) = parse_stmt_list_until(ts, &["elif", "else", "endif"], specs)?;
    let mut branches = vec![IfBranch { cond, body }];
    let mut else_body = None;
    loop {
        match stop.as_str() {
            "elif" => {
                consume_tag_word(ts, "elif")?;
                let c = parse_expr(ts)?;
                close_tag(ts)?;
                let (b, s) = parse_stmt_list_until(ts, &["elif", "else", "endif"], specs)?;
                branches.push(IfBranch { cond: c, body: b });
                stop = s;
            }
            "else" => {
                consume_tag_word(ts, "else")?;
                close_tag(ts)?;
                let (b, s) = parse_stmt_list_until(ts, &["endif"], specs)?;
                else_body = Some(b);
                stop = s;
            }
            "endif" => {
                consume_tag_word(ts, "endif")?;
                close_tag(ts)?;
                break;
            }
            _ => unreachable!(),
        }
    }
    Ok(Stmt::If { branches, else_body })
}

fn parse_for(ts: &mut TokenStream, specs: &ExtensionRegistry, span: SourceSpan) -> EngineResult<Stmt> {
    let mut targets = vec![ts.expect_identifier_name()?];
    while ts.eat_kind(&TokenKind::Comma) {
        targets.push(ts.expect_identifier_name()?);
    }
    ts.expect_ident("in")?;
    let iter = parse_expr(ts)?;
    close_tag(ts)?;
    let (body, mut stop) = parse_stmt_list_until(ts, &["else", "endfor"], specs)?;
    let mut else_body = None;
    if stop == "else" {
        consume_tag_word(ts, "else")?;
        close_tag(ts)?;
        let (b, s) = parse_stmt_list_until(ts, &["endfor"], specs)?;
        else_body = Some(b);
        stop = s;
    }
    let _ = stop;
    consume_tag_word(ts, "endfor")?;
    close_tag(ts)?;
    Ok(Stmt::For { targets, iter, body, else_body, span })
}

fn parse_set(ts: &mut TokenStream, specs: &ExtensionRegistry) -> EngineResult<Stmt> {
    let mut targets = vec![ts.expect_identifier_name()?];
    while ts.eat_kind(&TokenKind::Comma) {
        targets.push(ts.expect_identifier_name()?);
    }
    if ts.eat_kind(&TokenKind::Assign) {
        let expr = parse_expr(ts)?;
        close_tag(ts)?;
        Ok(Stmt::Set { targets, expr, declare: false })
    } else {
        close_tag(ts)?;
        let name = targets.into_iter().next().unwrap();
        let (body, _) = parse_stmt_list_until(ts, &["endset"], specs)?;
        consume_tag_word(ts, "endset")?;
        close_tag(ts)?;
        Ok(Stmt::SetBlock { name, body })
    }
}

fn parse_macro(ts: &mut TokenStream, specs: &ExtensionRegistry) -> EngineResult<Stmt> {
    let name = ts.expect_identifier_name()?;
    ts.expect_kind(TokenKind::LParen)?;
    let mut params = Vec::new();
    let mut defaults = Vec::new();
    if !ts.check_kind(&TokenKind::RParen) {
        loop {
            params.push(ts.expect_identifier_name()?);
            let default = if ts.eat_kind(&TokenKind::Assign) {
                Some(parse_expr(ts)?)
            } else {
                None
            };
            defaults.push(default);
            if !ts.eat_kind(&TokenKind::Comma) {
                break;
            }
        }
    }
    ts.expect_kind(TokenKind::RParen)?;
    close_tag(ts)?;
    let (body, _) = parse_stmt_list_until(ts, &["endmacro"], specs)?;
    consume_tag_word(ts, "endmacro")?;
    close_tag(ts)?;
    Ok(Stmt::Macro(Rc::new(MacroDef { name, params, defaults, body })))
}

fn parse_call(ts: &mut TokenStream, specs: &ExtensionRegistry, span: SourceSpan) -> EngineResult<Stmt> {
    let mut caller_params = Vec::new();
    if ts.check_kind(&TokenKind::LParen) && matches!(ts.peek_at(1).kind, TokenKind::Ident | TokenKind::RParen) {
        // Only a caller-parameter list if it isn't actually the callee's own
        // argument list — disambiguated by requiring a bare identifier next.
        let save = ts.peek().span;
        ts.advance();
        let mut params = Vec::new();
        let mut is_param_list = true;
        if !ts.check_kind(&TokenKind::RParen) {
            loop {
                if !matches!(ts.peek().kind, TokenKind::Ident) {
                    is_param_list = false;
                    break;
                }
                params.push(ts.expect_identifier_name()?);
                if !ts.eat_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        if is_param_list && ts.check_kind(&TokenKind::RParen) {
            ts.advance();
            caller_params = params;
        } else {
            return Err(EngineError::syntax("malformed `call` parameter list", save, ""));
        }
    }
    let callee = ts.expect_identifier_name()?;
    let args = parse_args(ts)?;
    close_tag(ts)?;
    let (body, _) = parse_stmt_list_until(ts, &["endcall"], specs)?;
    consume_tag_word(ts, "endcall")?;
    close_tag(ts)?;
    Ok(Stmt::Call(CallBlock { callee, args, caller_params, caller_body: body, span }))
}

fn parse_include(ts: &mut TokenStream, span: SourceSpan) -> EngineResult<Stmt> {
    let expr = parse_expr(ts)?;
    let mut ignore_missing = false;
    if ts.eat_ident("ignore") {
        ts.expect_ident("missing")?;
        ignore_missing = true;
    }
    close_tag(ts)?;
    Ok(Stmt::Include { expr, ignore_missing, span })
}

fn parse_extends(ts: &mut TokenStream, span: SourceSpan) -> EngineResult<Stmt> {
    let expr = parse_expr(ts)?;
    close_tag(ts)?;
    Ok(Stmt::Extends { expr, span })
}

fn parse_block_tag(ts: &mut TokenStream, specs: &ExtensionRegistry) -> EngineResult<Stmt> {
    let name = ts.expect_identifier_name()?;
    close_tag(ts)?;
    let (body, _) = parse_stmt_list_until(ts, &["endblock"], specs)?;
    consume_tag_word(ts, "endblock")?;
    if matches!(ts.peek().kind, TokenKind::Ident) {
        ts.advance();
    }
    close_tag(ts)?;
    Ok(Stmt::Block { name, body })
}

fn parse_switch(ts: &mut TokenStream, specs: &ExtensionRegistry) -> EngineResult<Stmt> {
    let disc = parse_expr(ts)?;
    close_tag(ts)?;
    let mut cases = Vec::new();
    let mut default = None;
    let (_preamble, mut stop) = parse_stmt_list_until(ts, &["case", "default", "endswitch"], specs)?;
    loop {
        match stop.as_str() {
            "case" => {
                consume_tag_word(ts, "case")?;
                let value = parse_expr(ts)?;
                close_tag(ts)?;
                let (body, s) = parse_stmt_list_until(ts, &["case", "default", "endswitch"], specs)?;
                cases.push(SwitchCase { value, body });
                stop = s;
            }
            "default" => {
                consume_tag_word(ts, "default")?;
                close_tag(ts)?;
                let (body, s) = parse_stmt_list_until(ts, &["endswitch"], specs)?;
                default = Some(body);
                stop = s;
            }
            "endswitch" => {
                consume_tag_word(ts, "endswitch")?;
                close_tag(ts)?;
                break;
            }
            _ => unreachable!(),
        }
    }
    Ok(Stmt::Switch { disc, cases, default })
}

fn parse_do(ts: &mut TokenStream) -> EngineResult<Stmt> {
    let expr = parse_expr(ts)?;
    close_tag(ts)?;
    Ok(Stmt::Do(expr))
}

/// Registered tag names delegate parsing to their declared shape: a flat
/// argument list, and a body closed by `end<name>` if the extension
/// declared one (§4.2, §4.8).
fn parse_extension_tag(
    ts: &mut TokenStream,
    specs: &ExtensionRegistry,
    name: &str,
    span: SourceSpan,
) -> EngineResult<Stmt> {
    if !specs.is_registered(name) {
        return Err(EngineError::syntax(
            format!("unknown tag `{}`", name),
            span,
            name.to_string(),
        ));
    }
    let args = if ts.check_kind(&TokenKind::LParen) {
        parse_args(ts)?
    } else {
        let mut positional = Vec::new();
        while !matches!(ts.peek().kind, TokenKind::CloseTag | TokenKind::CloseTagTrim) {
            positional.push(parse_expr(ts)?);
        }
        Args { positional, keyword: Vec::new() }
    };
    close_tag(ts)?;
    let body = if specs.has_body(name) {
        let end_word = format!("end{}", name);
        let (body, _) = parse_stmt_list_until(ts, &[end_word.as_str()], specs)?;
        consume_tag_word(ts, &end_word)?;
        close_tag(ts)?;
        Some(body)
    } else {
        None
    };
    Ok(Stmt::ExtensionCall { name: name.to_string(), args, body, span })
}
