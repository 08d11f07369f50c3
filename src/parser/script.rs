//! ABOUTME: Script-dialect statement parser — line-oriented `var`/`extern`/assignment/
//! `for`/`if`/`capture`/`@handle` commands over the shared expression grammar (§4.9).

use super::{expect_eol_or_eof, parse_args, parse_expr, TokenStream};
use crate::ast::{DataOp, IfBranch, Stmt};
use crate::error::{EngineError, EngineResult};
use crate::token::{Token, TokenKind};

/// A parsed script: the root output-handle name declared by its `:handle`
/// header, and the line-oriented statement body.
#[derive(Debug, Clone)]
pub struct ScriptProgram {
    pub handle: String,
    pub body: Vec<Stmt>,
}

pub fn parse(tokens: &[Token]) -> EngineResult<ScriptProgram> {
    let mut ts = TokenStream::new(tokens);
    skip_newlines(&mut ts);
    let handle = parse_header(&mut ts)?;
    skip_newlines(&mut ts);
    let (body, _) = parse_stmt_list_until(&mut ts, &[])?;
    Ok(ScriptProgram { handle, body })
}

fn skip_newlines(ts: &mut TokenStream) {
    while ts.eat_kind(&TokenKind::Newline) {}
}

/// `:data` — declares the name of the script's root output handle.
fn parse_header(ts: &mut TokenStream) -> EngineResult<String> {
    ts.expect_kind(TokenKind::Colon)?;
    let name = ts.expect_identifier_name()?;
    expect_eol_or_eof(ts)?;
    Ok(name)
}

fn parse_stmt_list_until(ts: &mut TokenStream, stop_words: &[&str]) -> EngineResult<(Vec<Stmt>, String)> {
    let mut body = Vec::new();
    loop {
        skip_newlines(ts);
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
        if matches!(ts.peek().kind, TokenKind::Ident) && stop_words.contains(&ts.peek().text.as_str()) {
            return Ok((body, ts.peek().text.clone()));
        }
        body.push(parse_stmt(ts)?);
    }
}

fn parse_stmt(ts: &mut TokenStream) -> EngineResult<Stmt> {
    if ts.check_kind(&TokenKind::At) {
        return parse_data_command(ts);
    }
    if ts.check_ident("var") {
        return parse_var(ts);
    }
    if ts.check_ident("extern") {
        return parse_extern(ts);
    }
    if ts.check_ident("for") {
        return parse_for(ts);
    }
    if ts.check_ident("if") {
        return parse_if(ts);
    }
    if ts.check_ident("capture") {
        return parse_capture(ts);
    }
    if matches!(ts.peek().kind, TokenKind::Ident) {
        return parse_assignment(ts);
    }
    Err(EngineError::syntax(
        format!("unexpected token `{}`", ts.peek().text),
        ts.peek().span,
        ts.peek().text.clone(),
    ))
}

/// `@handle.path.set(expr)` / `@handle.path.push(expr)` / `@handle.path = expr`.
fn parse_data_command(ts: &mut TokenStream) -> EngineResult<Stmt> {
    let span = ts.peek().span;
    ts.expect_kind(TokenKind::At)?;
    let handle = ts.expect_identifier_name()?;
    let mut path = Vec::new();
    loop {
        if !ts.eat_kind(&TokenKind::Dot) {
            break;
        }
        let name = ts.expect_identifier_name()?;
        if (name == "set" || name == "push") && ts.check_kind(&TokenKind::LParen) {
            let op = if name == "set" { DataOp::Set } else { DataOp::Push };
            let mut args = parse_args(ts)?;
            if args.positional.len() != 1 || !args.keyword.is_empty() {
                return Err(EngineError::syntax(
                    format!("`.{}(...)` takes exactly one argument", name),
                    span,
                    name,
                ));
            }
            let expr = args.positional.remove(0);
            expect_eol_or_eof(ts)?;
            return Ok(Stmt::DataCommand { handle, path, op, expr, span });
        }
        path.push(name);
    }
    ts.expect_kind(TokenKind::Assign)?;
    let expr = parse_expr(ts)?;
    expect_eol_or_eof(ts)?;
    Ok(Stmt::DataCommand { handle, path, op: DataOp::Set, expr, span })
}

/// `var x = expr` / `var a, b = expr` (multi-target binds every name to the
/// same evaluated value, per §4.3).
fn parse_var(ts: &mut TokenStream) -> EngineResult<Stmt> {
    ts.expect_ident("var")?;
    let mut targets = vec![ts.expect_identifier_name()?];
    while ts.eat_kind(&TokenKind::Comma) {
        targets.push(ts.expect_identifier_name()?);
    }
    ts.expect_kind(TokenKind::Assign)?;
    let expr = parse_expr(ts)?;
    expect_eol_or_eof(ts)?;
    Ok(Stmt::Set { targets, expr, declare: true })
}

/// `extern a, b` — initializing an extern declaration is a syntax error (§4.3).
fn parse_extern(ts: &mut TokenStream) -> EngineResult<Stmt> {
    ts.expect_ident("extern")?;
    let mut names = vec![ts.expect_identifier_name()?];
    while ts.eat_kind(&TokenKind::Comma) {
        names.push(ts.expect_identifier_name()?);
    }
    if ts.check_kind(&TokenKind::Assign) {
        return Err(EngineError::syntax(
            "initializing an `extern` declaration is a syntax error",
            ts.peek().span,
            ts.peek().text.clone(),
        ));
    }
    expect_eol_or_eof(ts)?;
    Ok(Stmt::Extern { names })
}

/// Bare `x = expr` / `a, b = expr` — requires every target to already be
/// declared; enforced by the evaluator (`Frame::assign_existing`), not here.
fn parse_assignment(ts: &mut TokenStream) -> EngineResult<Stmt> {
    let mut targets = vec![ts.expect_identifier_name()?];
    while ts.eat_kind(&TokenKind::Comma) {
        targets.push(ts.expect_identifier_name()?);
    }
    ts.expect_kind(TokenKind::Assign)?;
    let expr = parse_expr(ts)?;
    expect_eol_or_eof(ts)?;
    Ok(Stmt::Set { targets, expr, declare: false })
}

fn parse_for(ts: &mut TokenStream) -> EngineResult<Stmt> {
    let span = ts.peek().span;
    ts.expect_ident("for")?;
    let mut targets = vec![ts.expect_identifier_name()?];
    while ts.eat_kind(&TokenKind::Comma) {
        targets.push(ts.expect_identifier_name()?);
    }
    ts.expect_ident("in")?;
    let iter = parse_expr(ts)?;
    expect_eol_or_eof(ts)?;
    let (body, _) = parse_stmt_list_until(ts, &["endfor"])?;
    ts.expect_ident("endfor")?;
    expect_eol_or_eof(ts)?;
    Ok(Stmt::For { targets, iter, body, else_body: None, span })
}

fn parse_if(ts: &mut TokenStream) -> EngineResult<Stmt> {
    ts.expect_ident("if")?;
    let cond = parse_expr(ts)?;
    expect_eol_or_eof(ts)?;
    let (body, mut stop) = parse_stmt_list_until(ts, &["elif", "else", "endif"])?;
    let mut branches = vec![IfBranch { cond, body }];
    let mut else_body = None;
    loop {
        match stop.as_str() {
            "elif" => {
                ts.expect_ident("elif")?;
                let c = parse_expr(ts)?;
                expect_eol_or_eof(ts)?;
                let (b, s) = parse_stmt_list_until(ts, &["elif", "else", "endif"])?;
                branches.push(IfBranch { cond: c, body: b });
                stop = s;
            }
            "else" => {
                ts.expect_ident("else")?;
                expect_eol_or_eof(ts)?;
                let (b, s) = parse_stmt_list_until(ts, &["endif"])?;
                else_body = Some(b);
                stop = s;
            }
            "endif" => {
                ts.expect_ident("endif")?;
                expect_eol_or_eof(ts)?;
                break;
            }
            _ => unreachable!(),
        }
    }
    Ok(Stmt::If { branches, else_body })
}

/// `capture :handle ... endcapture` — a local sub-object built by `@handle.*`
/// commands within the block, bound as a normal variable named `handle` in
/// the enclosing frame once the block completes (see the evaluator's
/// handling of `Stmt::Capture` for the binding step; parsing only captures
/// the handle name and body).
fn parse_capture(ts: &mut TokenStream) -> EngineResult<Stmt> {
    ts.expect_ident("capture")?;
    ts.expect_kind(TokenKind::Colon)?;
    let handle = ts.expect_identifier_name()?;
    expect_eol_or_eof(ts)?;
    let (body, _) = parse_stmt_list_until(ts, &["endcapture"])?;
    ts.expect_ident("endcapture")?;
    expect_eol_or_eof(ts)?;
    Ok(Stmt::Capture { handle, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::script::tokenize;

    fn parse_src(src: &str) -> ScriptProgram {
        let tokens = tokenize(src).unwrap();
        parse(&tokens).unwrap()
    }

    #[test]
    fn parses_header_and_data_assignment() {
        let prog = parse_src(":data\nvar u = fetchUser(1)\n@data.n = u.name\n");
        assert_eq!(prog.handle, "data");
        assert_eq!(prog.body.len(), 2);
        assert!(matches!(prog.body[0], Stmt::Set { declare: true, .. }));
        assert!(matches!(prog.body[1], Stmt::DataCommand { op: DataOp::Set, .. }));
    }

    #[test]
    fn parses_push_command() {
        let prog = parse_src(":data\n@data.items.push(1)\n");
        match &prog.body[0] {
            Stmt::DataCommand { op: DataOp::Push, path, .. } => assert_eq!(path, &vec!["items".to_string()]),
            _ => panic!("expected data command"),
        }
    }

    #[test]
    fn extern_with_initializer_is_rejected() {
        let tokens = tokenize(":data\nextern a = 1\n").unwrap();
        assert!(parse(&tokens).is_err());
    }

    #[test]
    fn parses_for_and_if() {
        let prog = parse_src(":data\nfor x in items\nif x\n@data.seen.push(x)\nendif\nendfor\n");
        assert!(matches!(prog.body[0], Stmt::For { .. }));
    }
}
