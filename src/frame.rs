//! ABOUTME: Lexical variable scopes with parent links and dialect-specific shadowing rules
//!
//! Grounded on the teacher's `env.rs` `Environment` (parent-linked bindings
//! behind `Rc`, `RefCell`-guarded map, recursive `get`/`set`), generalized to
//! store `Deferred` bindings (so `{% set %}` need not eagerly resolve its
//! right-hand side) and to carry the two dialects' different declaration
//! rules (`Dialect::Template` allows shadowing; `Dialect::Script` forbids
//! redeclaring a name visible from an enclosing frame).

use crate::deferred::Deferred;
use crate::error::EngineError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Template,
    Script,
}

#[derive(Debug)]
pub struct Frame {
    bindings: RefCell<HashMap<String, Deferred>>,
    parent: Option<Rc<Frame>>,
    dialect: Dialect,
}

impl Frame {
    pub fn root(dialect: Dialect) -> Rc<Self> {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
            dialect,
        })
    }

    /// Opens a child scope — used at macro entry, `for` iteration, `block`
    /// entry, and `capture` entry.
    pub fn child(parent: &Rc<Frame>) -> Rc<Self> {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
            dialect: parent.dialect,
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Looks up a symbol in this scope and parent scopes recursively.
    pub fn get(&self, name: &str) -> Option<Deferred> {
        if let Some(v) = self.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.bindings.borrow().contains_key(name) || self.parent.as_ref().is_some_and(|p| p.is_declared(name))
    }

    /// Template-dialect `{% set %}`: creates or overwrites in the innermost
    /// frame unconditionally. Shadowing of an outer binding is allowed.
    pub fn set_shadowing(&self, name: impl Into<String>, value: Deferred) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Script-dialect `var x = expr`: declares in the current frame, but
    /// rejects redeclaration of a name visible from any enclosing frame.
    pub fn declare_no_shadow(&self, name: impl Into<String>, value: Deferred) -> Result<(), EngineError> {
        let name = name.into();
        if self.is_declared(&name) {
            return Err(EngineError::name(format!(
                "Cannot redeclare variable '{}': already declared in an enclosing scope",
                name
            )));
        }
        self.bindings.borrow_mut().insert(name, value);
        Ok(())
    }

    /// Script-dialect `x = expr`: requires `x` to be declared somewhere
    /// reachable; rewrites the binding at the frame that owns it.
    pub fn assign_existing(&self, name: &str, value: Deferred) -> Result<(), EngineError> {
        if self.bindings.borrow().contains_key(name) {
            self.bindings.borrow_mut().insert(name.to_string(), value);
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign_existing(name, value),
            None => Err(EngineError::name(format!(
                "Cannot assign to undeclared variable '{}'",
                name
            ))),
        }
    }

    /// Script-dialect `extern a, b`: declares names bound from the caller's
    /// context without checking for shadowing (the names are expected to
    /// come from outside this script entirely).
    pub fn declare_extern(&self, name: impl Into<String>, value: Deferred) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn shadowing_allowed_in_template_dialect() {
        let root = Frame::root(Dialect::Template);
        root.set_shadowing("x", Deferred::ready(Value::Number(1.0)));
        let child = Frame::child(&root);
        child.set_shadowing("x", Deferred::ready(Value::Number(2.0)));
        assert!(child.get("x").is_some());
        assert!(root.get("x").is_some());
    }

    #[test]
    fn script_dialect_rejects_redeclaration_from_enclosing_scope() {
        let root = Frame::root(Dialect::Script);
        root.declare_no_shadow("x", Deferred::ready(Value::Number(1.0))).unwrap();
        let child = Frame::child(&root);
        let err = child.declare_no_shadow("x", Deferred::ready(Value::Number(2.0)));
        assert!(err.is_err());
    }

    #[test]
    fn script_dialect_assign_requires_prior_declaration() {
        let root = Frame::root(Dialect::Script);
        let err = root.assign_existing("y", Deferred::ready(Value::Number(1.0)));
        assert!(err.is_err());
        root.declare_no_shadow("y", Deferred::ready(Value::Number(1.0))).unwrap();
        assert!(root.assign_existing("y", Deferred::ready(Value::Number(2.0))).is_ok());
    }

    #[test]
    fn parent_lookup_walks_chain() {
        let root = Frame::root(Dialect::Template);
        root.set_shadowing("x", Deferred::ready(Value::Number(42.0)));
        let child = Frame::child(&root);
        assert!(child.get("x").is_some());
        assert!(child.get("missing").is_none());
    }
}
