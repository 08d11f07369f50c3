//! ABOUTME: Value types representing template/script data, closures, and callables
//!
//! Grounded on the teacher's `value.rs` `Value` enum (tagged union of the
//! data types an interpreter manipulates), generalized from Lisp S-expression
//! data to the engine's JSON-like data model plus macro/native closures and
//! async generators. Reference-typed variants (`Array`, `Map`) use `Rc<RefCell<_>>`
//! so script-mode `@handle.path.push(...)`/`.set(...)` commands can mutate a
//! tree reachable from multiple bindings, the way a JS object reference is shared.

use crate::ast::{MacroDef, Stmt};
use crate::deferred::Deferred;
use crate::error::EngineError;
use crate::frame::Frame;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::pin::Pin;
use std::rc::Rc;

/// An async generator yields deferred values one at a time. Implementations
/// back `for` loops over sources that cannot be eagerly materialized into an
/// array (the "pull-based iterator interface" of the design notes).
pub trait AsyncGenerator {
    /// Pulls the next item, or `None` once the generator is exhausted.
    fn next(self: Rc<Self>) -> Pin<Box<dyn std::future::Future<Output = Result<Option<Value>, EngineError>>>>;
}

pub type NativeFn = Rc<dyn Fn(Vec<Value>) -> Pin<Box<dyn std::future::Future<Output = Result<Value, EngineError>>>>>;

/// A closure value: `{ params, defaults, body, definingFrame }` from the
/// design notes — captures the frame at definition site, not call site.
pub struct MacroClosure {
    pub name: String,
    pub def: Rc<MacroDef>,
    pub defining_frame: Rc<Frame>,
}

/// The anonymous caller-macro built from a `{% call %}` body, bound as
/// `caller` inside the callee's invocation frame. Stored as plain data
/// (body + defining frame) rather than an opaque render closure, since it is
/// the evaluator — not `Value` — that knows how to walk a `Stmt` body; this
/// avoids a closure cycle between the value and evaluator modules.
pub struct CallerClosure {
    /// Names bound from `caller(args...)`'s own arguments, if any.
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    /// The frame active at the `{% call %}` site — `caller()` renders under
    /// the caller's own bindings, not the callee macro's.
    pub call_site_frame: Rc<Frame>,
}

#[derive(Clone)]
pub enum Value {
    /// The nullish value: both "no such key" and an explicit `null` literal.
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<IndexMap<String, Value>>>),
    Macro(Rc<MacroClosure>),
    Caller(Rc<CallerClosure>),
    Native(NativeFn),
    Generator(Rc<dyn AsyncGenerator>),
    /// A deferred value observed before it resolved — context values and
    /// function return values may flow through the tree still pending;
    /// every consuming operation auto-awaits this variant away.
    Deferred(Deferred),
}

impl Value {
    pub fn str(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn map(entries: IndexMap<String, Value>) -> Self {
        Value::Map(Rc::new(RefCell::new(entries)))
    }

    pub fn empty_map() -> Self {
        Value::map(IndexMap::new())
    }

    /// Falsy: `false`, nullish, `0`, `NaN`, empty string, empty array, empty mapping.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(a) => !a.borrow().is_empty(),
            Value::Map(m) => !m.borrow().is_empty(),
            Value::Macro(_) | Value::Native(_) | Value::Generator(_) => true,
            Value::Caller(_) => true,
            Value::Deferred(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Macro(_) => "macro",
            Value::Caller(_) => "caller",
            Value::Native(_) => "function",
            Value::Generator(_) => "generator",
            Value::Deferred(_) => "deferred",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Macro(_) | Value::Native(_) | Value::Caller(_))
    }

    /// Structural equality on awaited values, used by the `in` operator on
    /// arrays and by `==`/`!=` comparisons.
    pub fn structural_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| v.structural_eq(bv)))
            }
            _ => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to the structured-data representation used by script-mode
    /// rendering and by the public `serde_json::Value` surface.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.to_string()),
            Value::Array(a) => serde_json::Value::Array(a.borrow().iter().map(Value::to_json).collect()),
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m.borrow().iter() {
                    obj.insert(k.clone(), v.to_json());
                }
                serde_json::Value::Object(obj)
            }
            Value::Macro(_) | Value::Native(_) | Value::Caller(_) | Value::Generator(_) => serde_json::Value::Null,
            Value::Deferred(_) => serde_json::Value::Null,
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::str(s.as_str()),
            serde_json::Value::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(obj) => {
                let mut map = IndexMap::new();
                for (k, v) in obj.iter() {
                    map.insert(k.clone(), Value::from_json(v));
                }
                Value::map(map)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, item) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Macro(m) => write!(f, "<macro {}>", m.name),
            Value::Caller(_) => write!(f, "<caller>"),
            Value::Native(_) => write!(f, "<function>"),
            Value::Generator(_) => write!(f, "<generator>"),
            Value::Deferred(_) => write!(f, "<deferred>"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({})", self)
    }
}
