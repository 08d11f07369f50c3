//! ABOUTME: Template-dialect statement evaluation — control flow, inheritance, macros
//!
//! The counterpart to `eval::eval_expr` for the statement layer: walks a
//! `Vec<Stmt>` sequentially into an `OutputBuffer` (§4.4 "statement
//! sequences use `sequential(xs)`" — trivially true here since each
//! statement's side effects must be visible to the next, so the `.await`
//! points are simply ordered one after another rather than run through the
//! `sequential()` helper explicitly).

use super::{await_value, bind_targets, BlockChains, Ctx, Evaluator};
use crate::ast::{Stmt, Template};
use crate::deferred::Deferred;
use crate::error::{EngineError, EngineResult, SourceSpan};
use crate::frame::Frame;
use crate::output::OutputBuffer;
use crate::value::{CallerClosure, MacroClosure, Value};
use async_recursion::async_recursion;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::rc::Rc;

impl Evaluator {
    /// Renders a parsed template, resolving any `{% extends %}` chain first.
    pub(crate) async fn render_template(&self, template: Rc<Template>, frame: Rc<Frame>) -> EngineResult<String> {
        if template.extends.is_some() {
            return self.render_with_inheritance(template, &frame).await;
        }
        let ctx = Ctx::root(frame);
        let mut buf = OutputBuffer::new();
        self.eval_template_stmts(&template.body, &ctx, &mut buf).await?;
        Ok(buf.finish())
    }

    #[async_recursion(?Send)]
    async fn resolve_inheritance_chain(
        &self,
        template: Rc<Template>,
        frame: &Rc<Frame>,
        depth: usize,
    ) -> EngineResult<Vec<Rc<Template>>> {
        if depth > self.config.max_include_depth {
            return Err(EngineError::runtime("maximum `extends` depth exceeded — likely a cyclic inheritance chain"));
        }
        match &template.extends {
            Some(extends_expr) => {
                let ctx = Ctx::root(Rc::clone(frame));
                let name_v = await_value(self.eval_expr(extends_expr, &ctx).await?).await?;
                let name = template_name(&name_v)?;
                let parent = self.load_and_parse(&name, None)?;
                let mut chain = vec![Rc::clone(&template)];
                let mut rest = self.resolve_inheritance_chain(parent, frame, depth + 1).await?;
                chain.append(&mut rest);
                Ok(chain)
            }
            None => Ok(vec![template]),
        }
    }

    async fn render_with_inheritance(&self, template: Rc<Template>, frame: &Rc<Frame>) -> EngineResult<String> {
        let chain = self.resolve_inheritance_chain(template, frame, 0).await?;
        let blocks = Rc::new(build_block_chains(&chain));
        let root_template = chain.last().expect("chain always has at least one level");
        let ctx = Ctx {
            frame: Rc::clone(frame),
            blocks,
            super_chain: Rc::new(Vec::new()),
        };
        let mut buf = OutputBuffer::new();
        self.eval_template_stmts(&root_template.body, &ctx, &mut buf).await?;
        Ok(buf.finish())
    }

    #[async_recursion(?Send)]
    pub(crate) async fn eval_template_stmts(&self, stmts: &[Stmt], ctx: &Ctx, buf: &mut OutputBuffer) -> EngineResult<()> {
        for stmt in stmts {
            self.eval_template_stmt(stmt, ctx, buf).await?;
        }
        Ok(())
    }

    #[async_recursion(?Send)]
    async fn eval_template_stmt(&self, stmt: &Stmt, ctx: &Ctx, buf: &mut OutputBuffer) -> EngineResult<()> {
        match stmt {
            Stmt::Output(expr) => {
                let v = await_value(self.eval_expr(expr, ctx).await?).await?;
                buf.push_text(v.to_string());
            }
            Stmt::RawText(s) => buf.push_text(s.clone()),
            Stmt::If { branches, else_body } => {
                for branch in branches {
                    let cond = await_value(self.eval_expr(&branch.cond, ctx).await?).await?;
                    if cond.is_truthy() {
                        return self.eval_template_stmts(&branch.body, ctx, buf).await;
                    }
                }
                if let Some(body) = else_body {
                    return self.eval_template_stmts(body, ctx, buf).await;
                }
            }
            Stmt::For { targets, iter, body, else_body, span } => {
                self.eval_for(targets, iter, body, else_body, *span, ctx, buf).await?;
            }
            Stmt::Set { targets, expr, .. } => {
                let v = await_value(self.eval_expr(expr, ctx).await?).await?;
                bind_targets(&ctx.frame, targets, vec![v])?;
            }
            Stmt::SetBlock { name, body } => {
                let child = Frame::child(&ctx.frame);
                let inner_ctx = ctx.with_frame(child);
                let mut nested = OutputBuffer::new();
                self.eval_template_stmts(body, &inner_ctx, &mut nested).await?;
                ctx.frame.set_shadowing(name.clone(), Deferred::ready(Value::str(nested.finish())));
            }
            Stmt::Extern { .. } | Stmt::Capture { .. } | Stmt::DataCommand { .. } => {
                return Err(EngineError::runtime("script-dialect statement used inside a template"));
            }
            Stmt::Macro(def) => {
                let closure = MacroClosure {
                    name: def.name.clone(),
                    def: Rc::clone(def),
                    defining_frame: Rc::clone(&ctx.frame),
                };
                ctx.frame
                    .set_shadowing(def.name.clone(), Deferred::ready(Value::Macro(Rc::new(closure))));
            }
            Stmt::Call(call) => {
                let binding = ctx
                    .frame
                    .get(&call.callee)
                    .ok_or_else(|| EngineError::name_at(format!("Can not look up unknown variable '{}'", call.callee), call.span))?;
                let macro_v = await_value(binding.await_value().await?).await?;
                let Value::Macro(m) = macro_v else {
                    return Err(EngineError::type_error("call", "macro", macro_v.type_name()));
                };
                let (pos, kw) = self.eval_args(&call.args, ctx).await?;
                let caller = Value::Caller(Rc::new(CallerClosure {
                    params: call.caller_params.clone(),
                    body: call.caller_body.clone(),
                    call_site_frame: Rc::clone(&ctx.frame),
                }));
                let rendered = self.invoke_macro(&m, pos, kw, Some(caller), ctx, call.span).await?;
                buf.push_text(rendered);
            }
            Stmt::Include { expr, ignore_missing, span } => {
                let name_v = await_value(self.eval_expr(expr, ctx).await?).await?;
                let name = template_name(&name_v)?;
                match self.load_and_parse(&name, None) {
                    Ok(included) => {
                        let rendered = if included.extends.is_some() {
                            self.render_with_inheritance(included, &ctx.frame).await?
                        } else {
                            let mut nested = OutputBuffer::new();
                            let inner_ctx = Ctx::root(Rc::clone(&ctx.frame));
                            self.eval_template_stmts(&included.body, &inner_ctx, &mut nested).await?;
                            nested.finish()
                        };
                        buf.push_text(rendered);
                    }
                    Err(e) if *ignore_missing && e.is_template_not_found() => {}
                    Err(e) => return Err(e.with_span(*span)),
                }
            }
            Stmt::Extends { .. } => {}
            Stmt::Block { name, body } => {
                if let Some(chain) = ctx.blocks.by_name.get(name) {
                    self.render_block_chain(chain, ctx, buf).await?;
                } else {
                    let child = Frame::child(&ctx.frame);
                    let inner_ctx = ctx.with_frame(child);
                    self.eval_template_stmts(body, &inner_ctx, buf).await?;
                }
            }
            Stmt::Switch { disc, cases, default } => {
                let d = await_value(self.eval_expr(disc, ctx).await?).await?;
                for case in cases {
                    let cv = await_value(self.eval_expr(&case.value, ctx).await?).await?;
                    if cv.structural_eq(&d) {
                        return self.eval_template_stmts(&case.body, ctx, buf).await;
                    }
                }
                if let Some(body) = default {
                    return self.eval_template_stmts(body, ctx, buf).await;
                }
            }
            Stmt::Do(expr) => {
                await_value(self.eval_expr(expr, ctx).await?).await?;
            }
            Stmt::ExtensionCall { name, args, body, span } => {
                let (pos, _) = self.eval_args(args, ctx).await?;
                let body_output = match body {
                    Some(b) => {
                        let child = Frame::child(&ctx.frame);
                        let inner_ctx = ctx.with_frame(child);
                        let mut nested = OutputBuffer::new();
                        self.eval_template_stmts(b, &inner_ctx, &mut nested).await?;
                        Some(nested.finish())
                    }
                    None => None,
                };
                let ext = self
                    .registries
                    .extensions
                    .get(name)
                    .ok_or_else(|| EngineError::runtime_at(format!("unknown extension tag '{}'", name), *span))?;
                let result = ext.run(name, pos, body_output).await?;
                buf.push_text(result.to_string());
            }
        }
        Ok(())
    }

    async fn render_block_chain(&self, chain: &[Rc<Vec<Stmt>>], ctx: &Ctx, buf: &mut OutputBuffer) -> EngineResult<()> {
        let (first, rest) = chain.split_first().expect("a block chain is never empty");
        let child = Frame::child(&ctx.frame);
        let inner_ctx = Ctx {
            frame: child,
            blocks: Rc::clone(&ctx.blocks),
            super_chain: Rc::new(rest.to_vec()),
        };
        self.eval_template_stmts(first, &inner_ctx, buf).await
    }

    pub(crate) async fn invoke_macro(
        &self,
        closure: &MacroClosure,
        pos: Vec<Value>,
        kw: Vec<(String, Value)>,
        caller: Option<Value>,
        ctx: &Ctx,
        span: SourceSpan,
    ) -> EngineResult<String> {
        tracing::debug!(macro_name = %closure.name, "entering macro frame");
        let invocation_frame = Frame::child(&closure.defining_frame);
        invocation_frame.set_shadowing("caller", Deferred::ready(caller.unwrap_or(Value::Null)));
        let param_ctx = ctx.with_frame(Rc::clone(&invocation_frame));
        for (i, param) in closure.def.params.iter().enumerate() {
            let value = if let Some(v) = pos.get(i) {
                v.clone()
            } else if let Some((_, v)) = kw.iter().find(|(k, _)| k == param) {
                v.clone()
            } else {
                match &closure.def.defaults[i] {
                    Some(default_expr) => await_value(self.eval_expr(default_expr, &param_ctx).await?).await?,
                    None => {
                        return Err(EngineError::runtime_at(
                            format!("macro '{}' missing required argument '{}'", closure.name, param),
                            span,
                        ))
                    }
                }
            };
            invocation_frame.set_shadowing(param.clone(), Deferred::ready(value));
        }
        let inner_ctx = Ctx {
            frame: invocation_frame,
            blocks: Rc::new(BlockChains::default()),
            super_chain: Rc::new(Vec::new()),
        };
        let mut buf = OutputBuffer::new();
        self.eval_template_stmts(&closure.def.body, &inner_ctx, &mut buf).await?;
        tracing::trace!(macro_name = %closure.name, "exiting macro frame");
        Ok(buf.finish())
    }

    #[allow(clippy::too_many_arguments)]
    async fn eval_for(
        &self,
        targets: &[String],
        iter: &crate::ast::Expr,
        body: &[Stmt],
        else_body: &Option<Vec<Stmt>>,
        span: SourceSpan,
        ctx: &Ctx,
        buf: &mut OutputBuffer,
    ) -> EngineResult<()> {
        let seq = await_value(self.eval_expr(iter, ctx).await?).await?;
        match seq {
            Value::Map(m) => {
                let entries: Vec<(String, Value)> = m.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                if entries.is_empty() {
                    if let Some(eb) = else_body {
                        self.eval_template_stmts(eb, ctx, buf).await?;
                    }
                    return Ok(());
                }
                let len = entries.len();
                for (i, (k, v)) in entries.into_iter().enumerate() {
                    let values = if targets.len() >= 2 { vec![Value::str(k), v] } else { vec![Value::str(k)] };
                    self.run_for_body(targets, values, i, len_loop_meta(i, len), body, ctx, buf).await?;
                }
            }
            Value::Array(arr) => {
                let items = arr.borrow().clone();
                if items.is_empty() {
                    if let Some(eb) = else_body {
                        self.eval_template_stmts(eb, ctx, buf).await?;
                    }
                    return Ok(());
                }
                let len = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    let values = if targets.len() > 1 {
                        match &item {
                            Value::Array(a) => a.borrow().clone(),
                            _ => vec![item.clone()],
                        }
                    } else {
                        vec![item]
                    };
                    self.run_for_body(targets, values, i, len_loop_meta(i, len), body, ctx, buf).await?;
                }
            }
            Value::Generator(gen) => {
                let mut maybe_current = gen.clone().next().await.map_err(|e| e.with_span(span))?;
                let mut index0 = 0usize;
                let mut produced_any = false;
                loop {
                    let Some(current) = maybe_current.take() else { break };
                    produced_any = true;
                    let next_item = gen.clone().next().await.map_err(|e| e.with_span(span))?;
                    let is_last = next_item.is_none();
                    let meta = loop_meta(index0, is_last, if is_last { Some(index0 + 1) } else { None });
                    self.run_for_body(targets, vec![current], index0, meta, body, ctx, buf).await?;
                    maybe_current = next_item;
                    index0 += 1;
                }
                if !produced_any {
                    if let Some(eb) = else_body {
                        self.eval_template_stmts(eb, ctx, buf).await?;
                    }
                }
            }
            other => return Err(EngineError::type_error("for ... in", "array, mapping, or generator", other.type_name()).with_span(span)),
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_for_body(
        &self,
        targets: &[String],
        values: Vec<Value>,
        _index: usize,
        loop_value: Value,
        body: &[Stmt],
        ctx: &Ctx,
        buf: &mut OutputBuffer,
    ) -> EngineResult<()> {
        let child = Frame::child(&ctx.frame);
        bind_targets(&child, targets, values)?;
        child.set_shadowing("loop", Deferred::ready(loop_value));
        let inner_ctx = ctx.with_frame(child);
        self.eval_template_stmts(body, &inner_ctx, buf).await
    }
}

fn len_loop_meta(index0: usize, len: usize) -> Value {
    loop_meta(index0, index0 + 1 == len, Some(len))
}

/// Builds the `loop` mapping exposed inside a `for` body: `index`/`index0`
/// (1- and 0-based), `first`/`last`, and `length`/`revindex`/`revindex0`.
/// The latter three are only known once the total count is known — eager
/// for array/mapping iteration, but only as of the final item for a
/// generator source, where earlier iterations see `null` (§4.4 "loop.length
/// may itself be a deferred that resolves once the source is drained" —
/// approximated here as available-on-last-item rather than a true
/// cross-iteration deferred, since by construction the total is only ever
/// discovered exactly when the last item is produced).
fn loop_meta(index0: usize, is_last: bool, length: Option<usize>) -> Value {
    let mut m = IndexMap::new();
    m.insert("index".to_string(), Value::Number((index0 + 1) as f64));
    m.insert("index0".to_string(), Value::Number(index0 as f64));
    m.insert("first".to_string(), Value::Bool(index0 == 0));
    m.insert("last".to_string(), Value::Bool(is_last));
    match length {
        Some(len) => {
            m.insert("length".to_string(), Value::Number(len as f64));
            m.insert("revindex".to_string(), Value::Number((len - index0) as f64));
            m.insert("revindex0".to_string(), Value::Number((len - index0 - 1) as f64));
        }
        None => {
            m.insert("length".to_string(), Value::Null);
            m.insert("revindex".to_string(), Value::Null);
            m.insert("revindex0".to_string(), Value::Null);
        }
    }
    Value::map(m)
}

fn template_name(v: &Value) -> EngineResult<String> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(EngineError::type_error("extends/include", "string", other.type_name())),
    }
}

/// Builds the most-derived-first block chain for every block name appearing
/// anywhere in the inheritance chain, root included last so a block with no
/// override anywhere still has exactly one body to render (§4.7).
fn build_block_chains(chain: &[Rc<Template>]) -> BlockChains {
    let mut by_name: HashMap<String, Vec<Rc<Vec<Stmt>>>> = HashMap::new();
    for level in chain {
        for (name, body) in &level.blocks {
            by_name.entry(name.clone()).or_default().push(Rc::new(body.clone()));
        }
    }
    BlockChains { by_name }
}
