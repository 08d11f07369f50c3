//! ABOUTME: Script-dialect statement evaluation — data commands over a handle tree
//!
//! Executes a parsed `ScriptProgram` for its side effects on one or more
//! named "handles" (structured-data roots, `Value::Map`/`Value::Array` trees
//! reached through `Rc<RefCell<_>>` sharing) rather than for textual output
//! — the counterpart to `eval::template`'s `OutputBuffer`-threading for the
//! template dialect. `@handle.path.set(...)`/`.push(...)`/`= ...` commands
//! autovivify intermediate maps along `path`, mirroring how a JS
//! `obj.a.b.c = x` assignment is commonly implemented by walking and
//! creating intermediate objects.

use super::{await_value, bind_targets, Ctx, Evaluator};
use crate::ast::{DataOp, Expr, Stmt};
use crate::deferred::Deferred;
use crate::error::{EngineError, EngineResult, SourceSpan};
use crate::frame::Frame;
use crate::parser::script::ScriptProgram;
use crate::value::Value;
use async_recursion::async_recursion;
use std::rc::Rc;

impl Evaluator {
    /// Runs a script's body against `root_frame` (already populated with the
    /// host's `extern`-supplied context) and returns the final value bound to
    /// its declared root handle.
    pub(crate) async fn run_script(&self, program: &ScriptProgram, root_frame: Rc<Frame>) -> EngineResult<Value> {
        root_frame.declare_extern(program.handle.clone(), Deferred::ready(Value::empty_map()));
        let ctx = Ctx::root(root_frame);
        self.eval_script_stmts(&program.body, &ctx).await?;
        let binding = ctx
            .frame
            .get(&program.handle)
            .expect("root handle is declared before the body runs");
        binding.await_value().await
    }

    #[async_recursion(?Send)]
    pub(crate) async fn eval_script_stmts(&self, stmts: &[Stmt], ctx: &Ctx) -> EngineResult<()> {
        for stmt in stmts {
            self.eval_script_stmt(stmt, ctx).await?;
        }
        Ok(())
    }

    #[async_recursion(?Send)]
    async fn eval_script_stmt(&self, stmt: &Stmt, ctx: &Ctx) -> EngineResult<()> {
        match stmt {
            Stmt::Set { targets, expr, declare } => {
                let value = await_value(self.eval_expr(expr, ctx).await?).await?;
                if *declare {
                    for t in targets {
                        ctx.frame.declare_no_shadow(t.clone(), Deferred::ready(value.clone()))?;
                    }
                } else {
                    for t in targets {
                        ctx.frame.assign_existing(t, Deferred::ready(value.clone()))?;
                    }
                }
            }
            Stmt::Extern { names } => {
                for name in names {
                    let existing = ctx
                        .frame
                        .get(name)
                        .ok_or_else(|| EngineError::name(format!("'{}' is not defined in an enclosing scope", name)))?;
                    ctx.frame.declare_extern(name.clone(), existing);
                }
            }
            Stmt::If { branches, else_body } => {
                for branch in branches {
                    let cond = await_value(self.eval_expr(&branch.cond, ctx).await?).await?;
                    if cond.is_truthy() {
                        return self.eval_script_stmts(&branch.body, ctx).await;
                    }
                }
                if let Some(body) = else_body {
                    return self.eval_script_stmts(body, ctx).await;
                }
            }
            Stmt::For { targets, iter, body, else_body, span } => {
                self.eval_script_for(targets, iter, body, else_body, *span, ctx).await?;
            }
            Stmt::Capture { handle, body } => {
                let child = Frame::child(&ctx.frame);
                child.declare_extern(handle.clone(), Deferred::ready(Value::empty_map()));
                let inner_ctx = ctx.with_frame(Rc::clone(&child));
                self.eval_script_stmts(body, &inner_ctx).await?;
                let accumulated = child
                    .get(handle)
                    .expect("capture handle is declared before its body runs")
                    .await_value()
                    .await?;
                ctx.frame.declare_no_shadow(handle.clone(), Deferred::ready(accumulated))?;
            }
            Stmt::DataCommand { handle, path, op, expr, span } => {
                self.eval_data_command(handle, path, *op, expr, *span, ctx).await?;
            }
            Stmt::Output(_)
            | Stmt::RawText(_)
            | Stmt::SetBlock { .. }
            | Stmt::Macro(_)
            | Stmt::Call(_)
            | Stmt::Include { .. }
            | Stmt::Extends { .. }
            | Stmt::Block { .. }
            | Stmt::Switch { .. }
            | Stmt::Do(_)
            | Stmt::ExtensionCall { .. } => {
                return Err(EngineError::runtime("template-dialect statement used inside a script"));
            }
        }
        Ok(())
    }

    async fn eval_data_command(
        &self,
        handle: &str,
        path: &[String],
        op: DataOp,
        expr: &Expr,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> EngineResult<()> {
        let value = await_value(self.eval_expr(expr, ctx).await?).await?;
        let binding = ctx
            .frame
            .get(handle)
            .ok_or_else(|| EngineError::name_at(format!("unknown data handle '{}'", handle), span))?;
        let root_value = binding.await_value().await?;

        if path.is_empty() {
            match op {
                DataOp::Set => ctx.frame.set_shadowing(handle.to_string(), Deferred::ready(value)),
                DataOp::Push => match &root_value {
                    Value::Array(arr) => arr.borrow_mut().push(value),
                    Value::Map(m) if m.borrow().is_empty() => {
                        ctx.frame.set_shadowing(handle.to_string(), Deferred::ready(Value::array(vec![value])));
                    }
                    other => return Err(EngineError::type_error("push", "array", other.type_name()).with_span(span)),
                },
            }
            return Ok(());
        }

        if !matches!(root_value, Value::Map(_)) {
            return Err(EngineError::type_error("data path", "map", root_value.type_name()).with_span(span));
        }
        let mut current = root_value;
        for segment in &path[..path.len() - 1] {
            current = get_or_create_map_child(&current, segment).map_err(|e| e.with_span(span))?;
        }
        let Value::Map(parent_map) = current else {
            return Err(EngineError::type_error("data path", "map", "non-map").with_span(span));
        };
        let last = path.last().expect("non-empty path");
        match op {
            DataOp::Set => {
                parent_map.borrow_mut().insert(last.clone(), value);
            }
            DataOp::Push => {
                let existing = parent_map.borrow().get(last).cloned();
                let can_create_array = match &existing {
                    None => true,
                    Some(Value::Map(m)) => m.borrow().is_empty(),
                    _ => false,
                };
                if can_create_array {
                    parent_map.borrow_mut().insert(last.clone(), Value::array(vec![value]));
                } else if let Some(Value::Array(arr)) = &existing {
                    arr.borrow_mut().push(value);
                } else {
                    let actual = existing.map(|v| v.type_name()).unwrap_or("null");
                    return Err(EngineError::type_error("push", "array", actual).with_span(span));
                }
            }
        }
        Ok(())
    }

    async fn eval_script_for(
        &self,
        targets: &[String],
        iter: &Expr,
        body: &[Stmt],
        else_body: &Option<Vec<Stmt>>,
        span: SourceSpan,
        ctx: &Ctx,
    ) -> EngineResult<()> {
        let seq = await_value(self.eval_expr(iter, ctx).await?).await?;
        match seq {
            Value::Map(m) => {
                let entries: Vec<(String, Value)> = m.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                if entries.is_empty() {
                    if let Some(eb) = else_body {
                        self.eval_script_stmts(eb, ctx).await?;
                    }
                    return Ok(());
                }
                for (k, v) in entries {
                    let values = if targets.len() >= 2 { vec![Value::str(k), v] } else { vec![Value::str(k)] };
                    self.run_script_for_body(targets, values, body, ctx).await?;
                }
            }
            Value::Array(arr) => {
                let items = arr.borrow().clone();
                if items.is_empty() {
                    if let Some(eb) = else_body {
                        self.eval_script_stmts(eb, ctx).await?;
                    }
                    return Ok(());
                }
                for item in items {
                    let values = if targets.len() > 1 {
                        match &item {
                            Value::Array(a) => a.borrow().clone(),
                            _ => vec![item.clone()],
                        }
                    } else {
                        vec![item]
                    };
                    self.run_script_for_body(targets, values, body, ctx).await?;
                }
            }
            Value::Generator(gen) => {
                let mut maybe_current = gen.clone().next().await.map_err(|e| e.with_span(span))?;
                let mut produced_any = false;
                while let Some(current) = maybe_current.take() {
                    produced_any = true;
                    self.run_script_for_body(targets, vec![current], body, ctx).await?;
                    maybe_current = gen.clone().next().await.map_err(|e| e.with_span(span))?;
                }
                if !produced_any {
                    if let Some(eb) = else_body {
                        self.eval_script_stmts(eb, ctx).await?;
                    }
                }
            }
            other => {
                return Err(EngineError::type_error("for ... in", "array, mapping, or generator", other.type_name()).with_span(span))
            }
        }
        Ok(())
    }

    async fn run_script_for_body(&self, targets: &[String], values: Vec<Value>, body: &[Stmt], ctx: &Ctx) -> EngineResult<()> {
        let child = Frame::child(&ctx.frame);
        bind_targets(&child, targets, values)?;
        let inner_ctx = ctx.with_frame(child);
        self.eval_script_stmts(body, &inner_ctx).await
    }
}

/// Reads (or creates, if absent or still `null`-shaped) the map-valued child
/// of `parent` at `key`.
fn get_or_create_map_child(parent: &Value, key: &str) -> EngineResult<Value> {
    let Value::Map(m) = parent else {
        return Err(EngineError::type_error("data path", "map", parent.type_name()));
    };
    let existing = m.borrow().get(key).cloned();
    match existing {
        Some(Value::Map(_)) => Ok(existing.unwrap()),
        None => {
            let fresh = Value::empty_map();
            m.borrow_mut().insert(key.to_string(), fresh.clone());
            Ok(fresh)
        }
        Some(other) => Err(EngineError::type_error("data path", "map", other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Dialect;
    use crate::registry::Registries;

    fn run(src: &str) -> Value {
        let tokens = crate::lexer::script::tokenize(src).unwrap();
        let program = crate::parser::script::parse(&tokens).unwrap();
        let evaluator = Evaluator::new(Rc::new(Registries::default()), None, crate::config::EngineConfig::default());
        let frame = Frame::root(Dialect::Script);
        futures::executor::block_on(evaluator.run_script(&program, frame)).unwrap()
    }

    #[test]
    fn set_command_autovivifies_nested_maps() {
        let v = run(":data\n@data.user.name = \"ada\"\n");
        let Value::Map(m) = v else { panic!("expected map") };
        let Some(Value::Map(user)) = m.borrow().get("user").cloned() else { panic!("expected nested map") };
        assert_eq!(user.borrow().get("name").unwrap().to_string(), "ada");
    }

    #[test]
    fn push_command_creates_array_on_first_use() {
        let v = run(":data\n@data.items.push(1)\n@data.items.push(2)\n");
        let Value::Map(m) = v else { panic!("expected map") };
        let Some(Value::Array(items)) = m.borrow().get("items").cloned() else { panic!("expected array") };
        assert_eq!(items.borrow().len(), 2);
    }

    #[test]
    fn capture_binds_accumulated_handle_as_variable() {
        let v = run(":data\ncapture :tmp\n@tmp.x = 1\nendcapture\n@data.result = tmp.x\n");
        let Value::Map(m) = v else { panic!("expected map") };
        assert_eq!(m.borrow().get("result").unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn for_loop_over_array_runs_body_sequentially() {
        let v = run(":data\nvar total = 0\nfor x in [1, 2, 3]\ntotal = total + x\nendfor\n@data.total = total\n");
        let Value::Map(m) = v else { panic!("expected map") };
        assert_eq!(m.borrow().get("total").unwrap().as_number(), Some(6.0));
    }
}
