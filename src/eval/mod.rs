//! ABOUTME: The async evaluator — walks the AST over possibly-deferred values
//!
//! Generalizes the teacher's `eval_with_macros` (a trampolined match over a
//! `Value` tree, `Rc<Environment>` threaded by value, tail-loop instead of
//! recursion) to an async tree-walker: every recursive descent is a genuine
//! `.await` point instead of a loop iteration, `#[async_recursion(?Send)]`
//! plays the role the teacher's explicit trampoline loop played (both exist
//! to let a recursive-shaped evaluator run without blowing the native stack
//! or, here, to let the recursion cross `async fn` boundaries at all), and
//! the teacher's by-value `Rc<Environment>` becomes an `Rc<Frame>` carried
//! inside a small `Ctx` alongside the block-inheritance/`super()` state
//! (§4.7) that has no analogue in the teacher's Lisp evaluator.

pub mod script;
pub mod template;

use crate::ast::{Args, BinOp, CmpOp, Expr, Literal, LogicalOp, Stmt, Template, UnaryOp};
use crate::config::EngineConfig;
use crate::deferred::{parallel, Deferred};
use crate::error::{EngineError, EngineResult, SourceSpan};
use crate::frame::{Dialect, Frame};
use crate::loader::Loader;
use crate::registry::Registries;
use crate::value::Value;
use async_recursion::async_recursion;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::rc::Rc;

/// Resolves a `Value` down past any chain of `Value::Deferred` wrappers —
/// the "auto-await of values appearing in operations" rule of §4.4. Most
/// `Value`s returned from `eval_expr` are already concrete; this matters for
/// context values supplied as a raw deferred, and for native/macro calls
/// whose result is itself another pending computation.
pub async fn await_value(v: Value) -> EngineResult<Value> {
    let mut v = v;
    loop {
        match v {
            Value::Deferred(d) => v = d.await_value().await?,
            other => return Ok(other),
        }
    }
}

/// Per-ancestor-template block bodies, most-derived first, keyed by block
/// name — built once per inheritance chain and threaded immutably through a
/// render (§4.7 "each level's blocks overriding").
#[derive(Default)]
pub(crate) struct BlockChains {
    pub(crate) by_name: HashMap<String, Vec<Rc<Vec<Stmt>>>>,
}

/// The evaluator's ambient, cheaply-clonable state: the active frame, the
/// block-inheritance chains for the current render, and the slice of the
/// current block's ancestor bodies still available to `super()`. Threaded
/// through every `eval_expr`/`eval_*_stmts` call instead of a bare `Frame`
/// because `super()` resolution needs to travel with the recursion the same
/// way the frame does.
#[derive(Clone)]
pub(crate) struct Ctx {
    pub frame: Rc<Frame>,
    pub blocks: Rc<BlockChains>,
    pub super_chain: Rc<Vec<Rc<Vec<Stmt>>>>,
}

impl Ctx {
    pub fn root(frame: Rc<Frame>) -> Self {
        Ctx {
            frame,
            blocks: Rc::new(BlockChains::default()),
            super_chain: Rc::new(Vec::new()),
        }
    }

    pub fn with_frame(&self, frame: Rc<Frame>) -> Self {
        Ctx {
            frame,
            blocks: Rc::clone(&self.blocks),
            super_chain: Rc::clone(&self.super_chain),
        }
    }
}

/// Owns the read-only registries, the optional loader, render configuration,
/// and the copy-on-write AST cache (§5 "immutable after population") — the
/// "environment object" of the design notes, passed explicitly into renders
/// rather than reached through global mutable state.
pub struct Evaluator {
    pub(crate) registries: Rc<Registries>,
    pub(crate) loader: Option<Rc<dyn Loader>>,
    pub(crate) config: EngineConfig,
    cache: std::cell::RefCell<HashMap<String, Rc<Template>>>,
}

impl Evaluator {
    pub fn new(registries: Rc<Registries>, loader: Option<Rc<dyn Loader>>, config: EngineConfig) -> Self {
        Evaluator {
            registries,
            loader,
            config,
            cache: std::cell::RefCell::new(HashMap::new()),
        }
    }

    pub fn build_root_frame(&self, context: IndexMap<String, Value>, dialect: Dialect) -> Rc<Frame> {
        let root = Frame::root(dialect);
        for (name, value) in context {
            let d = match value {
                Value::Deferred(d) => d,
                other => Deferred::ready(other),
            };
            root.declare_extern(name, d);
        }
        root
    }

    /// Parses (or retrieves from cache) the named template's source through
    /// the configured loader.
    pub(crate) fn load_and_parse(&self, name: &str, from: Option<&str>) -> EngineResult<Rc<Template>> {
        if let Some(cached) = self.cache.borrow().get(name) {
            tracing::trace!(template = name, "ast cache hit");
            return Ok(Rc::clone(cached));
        }
        tracing::debug!(template = name, from, "resolving template through loader");
        let loader = self
            .loader
            .as_ref()
            .ok_or_else(|| EngineError::template_not_found(name))?;
        let source = loader.get_source(name, from)?;
        let tokens = crate::lexer::template::tokenize(&source.src)?;
        let parsed = crate::parser::template::parse(&tokens, &self.registries.extensions)?;
        let rc = Rc::new(parsed);
        if !source.no_cache {
            self.cache.borrow_mut().insert(name.to_string(), Rc::clone(&rc));
        }
        Ok(rc)
    }

    /// Evaluates `args.positional`/`args.keyword` concurrently (two
    /// independent batches, each internally ordered) — the "call arguments"
    /// use of `parallel(xs)` in §4.4.
    #[async_recursion(?Send)]
    pub(crate) async fn eval_args(&self, args: &Args, ctx: &Ctx) -> EngineResult<(Vec<Value>, Vec<(String, Value)>)> {
        let pos_futs: Vec<_> = args.positional.iter().map(|e| self.eval_expr(e, ctx)).collect();
        let kw_futs: Vec<_> = args.keyword.iter().map(|(_, e)| self.eval_expr(e, ctx)).collect();
        let (pos_res, kw_res) = futures::join!(parallel(pos_futs), parallel(kw_futs));
        let pos = pos_res?;
        let mut pos_awaited = Vec::with_capacity(pos.len());
        for v in pos {
            pos_awaited.push(await_value(v).await?);
        }
        let kw_vals = kw_res?;
        let mut kw = Vec::with_capacity(kw_vals.len());
        for ((name, _), v) in args.keyword.iter().zip(kw_vals) {
            kw.push((name.clone(), await_value(v).await?));
        }
        Ok((pos_awaited, kw))
    }

    #[async_recursion(?Send)]
    pub(crate) async fn eval_expr(&self, expr: &Expr, ctx: &Ctx) -> EngineResult<Value> {
        match expr {
            Expr::Literal(lit, _) => Ok(literal_value(lit)),
            Expr::Symbol(name, span) => {
                let binding = ctx
                    .frame
                    .get(name)
                    .ok_or_else(|| EngineError::name_at(format!("Can not look up unknown variable '{}'", name), *span))?;
                binding.await_value().await.map_err(|e| e.with_span(*span))
            }
            Expr::CallerRef(_) => match ctx.frame.get("caller") {
                Some(d) => d.await_value().await,
                None => Ok(Value::Null),
            },
            Expr::SuperRef(span) => Err(EngineError::syntax(
                "`super` must be called as `super()`",
                *span,
                "super",
            )),
            Expr::Lookup { target, key, .. } => {
                let target_v = await_value(self.eval_expr(target, ctx).await?).await?;
                if matches!(target_v, Value::Null) {
                    return Ok(Value::Null);
                }
                let key_v = await_value(self.eval_expr(key, ctx).await?).await?;
                Ok(lookup_value(&target_v, &key_v))
            }
            Expr::Call { callee, args, span } => self.eval_call(callee, args, ctx, *span).await,
            Expr::FilterCall { input, name, args, span } => {
                let input_v = await_value(self.eval_expr(input, ctx).await?).await?;
                let (pos, _) = self.eval_args(args, ctx).await?;
                let handler = self
                    .registries
                    .filters
                    .get(name)
                    .ok_or_else(|| EngineError::name_at(format!("no such filter '{}'", name), *span))?;
                handler(input_v, pos).await
            }
            Expr::TestCall { input, name, args, negate, span } => {
                let input_v = await_value(self.eval_expr(input, ctx).await?).await?;
                let (pos, _) = self.eval_args(args, ctx).await?;
                let handler = self
                    .registries
                    .tests
                    .get(name)
                    .ok_or_else(|| EngineError::name_at(format!("no such test '{}'", name), *span))?;
                let result = handler(input_v, pos).await?;
                Ok(Value::Bool(result ^ negate))
            }
            Expr::BinOp { op, a, b, span } => {
                let (ra, rb) = futures::join!(self.eval_expr(a, ctx), self.eval_expr(b, ctx));
                let av = await_value(ra?).await?;
                let bv = await_value(rb?).await?;
                apply_binop(*op, av, bv).map_err(|e| e.with_span(*span))
            }
            Expr::UnaryOp { op, a, span } => {
                let av = await_value(self.eval_expr(a, ctx).await?).await?;
                apply_unaryop(*op, av).map_err(|e| e.with_span(*span))
            }
            Expr::Logical { op, a, b, .. } => {
                let av = await_value(self.eval_expr(a, ctx).await?).await?;
                match op {
                    LogicalOp::And => {
                        if av.is_truthy() {
                            self.eval_expr(b, ctx).await
                        } else {
                            Ok(av)
                        }
                    }
                    LogicalOp::Or => {
                        if av.is_truthy() {
                            Ok(av)
                        } else {
                            self.eval_expr(b, ctx).await
                        }
                    }
                }
            }
            Expr::If { cond, then_branch, else_branch, .. } => {
                let cv = await_value(self.eval_expr(cond, ctx).await?).await?;
                if cv.is_truthy() {
                    self.eval_expr(then_branch, ctx).await
                } else if let Some(eb) = else_branch {
                    self.eval_expr(eb, ctx).await
                } else {
                    Ok(Value::Null)
                }
            }
            Expr::Compare { first, rest, span } => {
                let mut prev = await_value(self.eval_expr(first, ctx).await?).await?;
                for (op, next_expr) in rest {
                    let next = await_value(self.eval_expr(next_expr, ctx).await?).await?;
                    if !apply_cmp(*op, &prev, &next).map_err(|e| e.with_span(*span))? {
                        return Ok(Value::Bool(false));
                    }
                    prev = next;
                }
                Ok(Value::Bool(true))
            }
            Expr::InOp { item, seq, negate, span } => {
                let item_v = await_value(self.eval_expr(item, ctx).await?).await?;
                let seq_v = await_value(self.eval_expr(seq, ctx).await?).await?;
                let found = apply_in(&item_v, &seq_v).map_err(|e| e.with_span(*span))?;
                Ok(Value::Bool(found ^ negate))
            }
            Expr::Array(items, _) => {
                let futs: Vec<_> = items.iter().map(|e| self.eval_expr(e, ctx)).collect();
                let vals = parallel(futs).await?;
                let mut out = Vec::with_capacity(vals.len());
                for v in vals {
                    out.push(await_value(v).await?);
                }
                Ok(Value::array(out))
            }
            Expr::Dict(pairs, _) => {
                let key_futs: Vec<_> = pairs.iter().map(|(k, _)| self.eval_expr(k, ctx)).collect();
                let val_futs: Vec<_> = pairs.iter().map(|(_, v)| self.eval_expr(v, ctx)).collect();
                let (keys, vals) = futures::join!(parallel(key_futs), parallel(val_futs));
                let keys = keys?;
                let vals = vals?;
                let mut map = IndexMap::new();
                for (k, v) in keys.into_iter().zip(vals) {
                    let k = await_value(k).await?;
                    let key_str = match k {
                        Value::Str(s) => s.to_string(),
                        other => other.to_string(),
                    };
                    map.insert(key_str, await_value(v).await?);
                }
                Ok(Value::map(map))
            }
            Expr::Group(items, _) => {
                let futs: Vec<_> = items.iter().map(|e| self.eval_expr(e, ctx)).collect();
                let vals = parallel(futs).await?;
                let mut last = Value::Null;
                for v in vals {
                    last = await_value(v).await?;
                }
                Ok(last)
            }
        }
    }

    async fn eval_call(&self, callee: &Expr, args: &Args, ctx: &Ctx, span: SourceSpan) -> EngineResult<Value> {
        if let Expr::CallerRef(_) = callee {
            let (pos, _) = self.eval_args(args, ctx).await?;
            let binding = ctx.frame.get("caller");
            let caller_val = match binding {
                Some(d) => d.await_value().await?,
                None => Value::Null,
            };
            return match caller_val {
                Value::Caller(c) => self.invoke_caller(&c, pos).await,
                Value::Null => Err(EngineError::runtime_at("caller() invoked with no active {% call %} block", span)),
                other => Err(EngineError::type_error("caller()", "caller", other.type_name())),
            };
        }
        if let Expr::SuperRef(_) = callee {
            return self.eval_super(ctx, span).await;
        }
        let callee_v = await_value(self.eval_expr(callee, ctx).await?).await?;
        let (pos, kw) = self.eval_args(args, ctx).await?;
        self.invoke_callable(callee_v, pos, kw, ctx, span).await
    }

    async fn invoke_callable(
        &self,
        callee: Value,
        pos: Vec<Value>,
        kw: Vec<(String, Value)>,
        ctx: &Ctx,
        span: SourceSpan,
    ) -> EngineResult<Value> {
        match callee {
            Value::Macro(m) => {
                let s = self.invoke_macro(&m, pos, kw, None, ctx, span).await?;
                Ok(Value::str(s))
            }
            Value::Native(f) => {
                if !kw.is_empty() {
                    return Err(EngineError::runtime_at("native functions do not accept keyword arguments", span));
                }
                await_value(f(pos).await?).await
            }
            Value::Caller(c) => self.invoke_caller(&c, pos).await,
            other => Err(EngineError::type_error("call", "macro or function", other.type_name())),
        }
    }

    async fn invoke_caller(&self, closure: &crate::value::CallerClosure, args: Vec<Value>) -> EngineResult<Value> {
        let child = Frame::child(&closure.call_site_frame);
        bind_targets(&child, &closure.params, args)?;
        let inner_ctx = Ctx {
            frame: child,
            blocks: Rc::new(BlockChains::default()),
            super_chain: Rc::new(Vec::new()),
        };
        let mut buf = crate::output::OutputBuffer::new();
        self.eval_template_stmts(&closure.body, &inner_ctx, &mut buf).await?;
        Ok(Value::str(buf.finish()))
    }

    async fn eval_super(&self, ctx: &Ctx, span: SourceSpan) -> EngineResult<Value> {
        let (first, rest) = ctx
            .super_chain
            .split_first()
            .ok_or_else(|| EngineError::runtime_at("no parent block to call super() on", span))?;
        let inner_ctx = Ctx {
            frame: Rc::clone(&ctx.frame),
            blocks: Rc::clone(&ctx.blocks),
            super_chain: Rc::new(rest.to_vec()),
        };
        let mut buf = crate::output::OutputBuffer::new();
        self.eval_template_stmts(first, &inner_ctx, &mut buf).await?;
        Ok(Value::str(buf.finish()))
    }
}

pub(crate) fn bind_targets(frame: &Rc<Frame>, targets: &[String], values: Vec<Value>) -> EngineResult<()> {
    if targets.len() == 1 {
        let v = if values.len() == 1 {
            values.into_iter().next().unwrap()
        } else {
            Value::array(values)
        };
        frame.set_shadowing(targets[0].clone(), Deferred::ready(v));
        return Ok(());
    }
    if values.len() != targets.len() {
        return Err(EngineError::runtime(format!(
            "cannot unpack {} value(s) into {} target(s)",
            values.len(),
            targets.len()
        )));
    }
    for (t, v) in targets.iter().zip(values) {
        frame.set_shadowing(t.clone(), Deferred::ready(v));
    }
    Ok(())
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::str(s.as_str()),
    }
}

/// The single explicit lookup operator of the design notes: awaits nothing
/// itself (caller has already awaited the base), handles mapping/array/
/// string indexing, and is forgiving (an unsupported lookup yields `Null`
/// rather than raising) — consistent with "attribute lookup on nullish
/// yields nullish" generalized to "a lookup miss yields nullish," which is
/// how the wider Jinja/Nunjucks family treats undefined attribute access.
fn lookup_value(target: &Value, key: &Value) -> Value {
    let found = match target {
        Value::Map(m) => match key {
            Value::Str(k) => m.borrow().get(k.as_ref()).cloned(),
            _ => None,
        },
        Value::Array(a) => match key {
            Value::Number(n) => {
                let items = a.borrow();
                let idx = *n as i64;
                if idx < 0 || idx as usize >= items.len() {
                    None
                } else {
                    Some(items[idx as usize].clone())
                }
            }
            _ => None,
        },
        Value::Str(s) => match key {
            Value::Number(n) => {
                let idx = *n as i64;
                if idx < 0 {
                    None
                } else {
                    s.chars().nth(idx as usize).map(|c| Value::str(c.to_string()))
                }
            }
            _ => None,
        },
        _ => None,
    };
    found.unwrap_or(Value::Null)
}

fn numeric_binop(a: Value, b: Value, name: &str, f: impl Fn(f64, f64) -> f64) -> EngineResult<Value> {
    let x = a
        .as_number()
        .ok_or_else(|| EngineError::type_error(name, "number", a.type_name()))?;
    let y = b
        .as_number()
        .ok_or_else(|| EngineError::type_error(name, "number", b.type_name()))?;
    Ok(Value::Number(f(x, y)))
}

fn apply_binop(op: BinOp, a: Value, b: Value) -> EngineResult<Value> {
    match op {
        BinOp::Add => {
            if let (Value::Number(x), Value::Number(y)) = (&a, &b) {
                return Ok(Value::Number(x + y));
            }
            if matches!(a, Value::Str(_)) || matches!(b, Value::Str(_)) {
                return Ok(Value::str(format!("{}{}", a, b)));
            }
            if let (Value::Array(x), Value::Array(y)) = (&a, &b) {
                let mut items = x.borrow().clone();
                items.extend(y.borrow().iter().cloned());
                return Ok(Value::array(items));
            }
            let actual = format!("{} and {}", a.type_name(), b.type_name());
            Err(EngineError::type_error("+", "number, string, or array", &actual))
        }
        BinOp::Sub => numeric_binop(a, b, "-", |x, y| x - y),
        BinOp::Mul => numeric_binop(a, b, "*", |x, y| x * y),
        BinOp::Div => numeric_binop(a, b, "/", |x, y| x / y),
        BinOp::Mod => numeric_binop(a, b, "%", |x, y| x % y),
        BinOp::Pow => numeric_binop(a, b, "**", |x, y| x.powf(y)),
        BinOp::FloorDiv => numeric_binop(a, b, "//", |x, y| (x / y).floor()),
    }
}

fn apply_unaryop(op: UnaryOp, a: Value) -> EngineResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!a.is_truthy())),
        UnaryOp::Neg => a
            .as_number()
            .map(|n| Value::Number(-n))
            .ok_or_else(|| EngineError::type_error("-", "number", a.type_name())),
        UnaryOp::Pos => a
            .as_number()
            .map(Value::Number)
            .ok_or_else(|| EngineError::type_error("+", "number", a.type_name())),
    }
}

fn compare_ord(a: &Value, b: &Value) -> EngineResult<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| EngineError::type_error("compare", "comparable numbers", "NaN")),
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        _ => {
            let actual = format!("{} and {}", a.type_name(), b.type_name());
            Err(EngineError::type_error("compare", "two numbers or two strings", &actual))
        }
    }
}

fn apply_cmp(op: CmpOp, a: &Value, b: &Value) -> EngineResult<bool> {
    match op {
        CmpOp::Eq => Ok(a.structural_eq(b)),
        CmpOp::Ne => Ok(!a.structural_eq(b)),
        _ => {
            let ord = compare_ord(a, b)?;
            Ok(match op {
                CmpOp::Lt => ord.is_lt(),
                CmpOp::Le => ord.is_le(),
                CmpOp::Gt => ord.is_gt(),
                CmpOp::Ge => ord.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!(),
            })
        }
    }
}

fn apply_in(item: &Value, seq: &Value) -> EngineResult<bool> {
    match seq {
        Value::Array(arr) => Ok(arr.borrow().iter().any(|x| x.structural_eq(item))),
        Value::Str(s) => match item {
            Value::Str(sub) => Ok(s.contains(sub.as_ref())),
            _ => Err(EngineError::type_error("in", "string", item.type_name())),
        },
        Value::Map(m) => match item {
            Value::Str(k) => Ok(m.borrow().contains_key(k.as_ref())),
            _ => Err(EngineError::type_error("in", "string key", item.type_name())),
        },
        other => Err(EngineError::type_error("in", "array, string, or map", other.type_name())),
    }
}
