//! ABOUTME: Filter, test, and tag-extension registries
//!
//! Three `mapping(name -> handler)` registries per §4.8, generalized from the
//! teacher's `MacroRegistry` (a `HashMap<String, _>` behind a small owning
//! struct) to the engine's three invocation contracts. Handlers are stored as
//! type-erased `Rc<dyn Fn(..) -> BoxFuture<..>>` closures so both a plain
//! synchronous Rust function and a hand-written async closure can register
//! under the same API; the `arvo-macros` `#[filter]`/`#[test_fn]` attributes
//! generate the synchronous-function registration call shown in `register_filter`.

use crate::error::EngineError;
use crate::value::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

pub type FilterFn = Rc<dyn Fn(Value, Vec<Value>) -> BoxFuture<'static, Result<Value, EngineError>>>;
pub type TestFn = Rc<dyn Fn(Value, Vec<Value>) -> BoxFuture<'static, Result<bool, EngineError>>>;

#[derive(Default, Clone)]
pub struct FilterRegistry {
    handlers: HashMap<String, FilterFn>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plain synchronous filter, the shape the `#[filter]`
    /// attribute macro emits — the legacy "callback" adaptation of §4.8 is
    /// just wrapping the already-available result into a ready future.
    pub fn register_filter(&mut self, name: &str, f: fn(Value, &[Value]) -> Result<Value, EngineError>) {
        self.handlers.insert(
            name.to_string(),
            Rc::new(move |v: Value, args: Vec<Value>| -> BoxFuture<'static, Result<Value, EngineError>> {
                let result = f(v, &args);
                Box::pin(async move { result })
            }),
        );
    }

    /// Registers a filter whose handler itself returns a future, for
    /// genuinely asynchronous filters (`handler(value, ...args) -> deferred<value>`).
    pub fn register_async<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(Value, Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<Value, EngineError>> + 'static,
    {
        self.handlers
            .insert(name.to_string(), Rc::new(move |v, args| Box::pin(f(v, args)) as BoxFuture<'static, _>));
    }

    pub fn get(&self, name: &str) -> Option<FilterFn> {
        self.handlers.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

#[derive(Default, Clone)]
pub struct TestRegistry {
    handlers: HashMap<String, TestFn>,
}

impl TestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_test(&mut self, name: &str, f: fn(Value, &[Value]) -> Result<bool, EngineError>) {
        self.handlers.insert(
            name.to_string(),
            Rc::new(move |v: Value, args: Vec<Value>| -> BoxFuture<'static, Result<bool, EngineError>> {
                let result = f(v, &args);
                Box::pin(async move { result })
            }),
        );
    }

    pub fn register_async<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(Value, Vec<Value>) -> Fut + 'static,
        Fut: Future<Output = Result<bool, EngineError>> + 'static,
    {
        self.handlers
            .insert(name.to_string(), Rc::new(move |v, args| Box::pin(f(v, args)) as BoxFuture<'static, _>));
    }

    pub fn get(&self, name: &str) -> Option<TestFn> {
        self.handlers.get(name).cloned()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// A registered tag extension: `{ tags, parse(parser)->Node, run(context, ...args) }`
/// from §4.8. Parsing is represented declaratively here (`has_body`) rather
/// than as a real `parse(parser)` hook into the recursive-descent parser,
/// since the parser only needs to know the tag's argument/body shape to
/// consume tokens correctly (§4.2); `run` receives the already-evaluated
/// arguments and, if the extension declared a body, that body's rendered
/// text — the moral equivalent of "may request a body" in §4.2.
pub trait Extension {
    /// Tag names this extension registers under; an extension may answer to
    /// more than one spelling of the same tag.
    fn tags(&self) -> &[&str];

    /// Whether this tag expects a `{% tagname %}...{% endtagname %}` body.
    fn has_body(&self, _tag: &str) -> bool {
        false
    }

    /// `run(context, ...args) -> string|deferred<string>`. `body_output` is
    /// `Some(rendered)` when `has_body` answered true for this invocation.
    fn run(&self, tag: &str, args: Vec<Value>, body_output: Option<String>) -> BoxFuture<'static, Result<Value, EngineError>>;
}

#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    by_tag: HashMap<String, Rc<dyn Extension>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ext: Rc<dyn Extension>) {
        for tag in ext.tags() {
            self.by_tag.insert(tag.to_string(), Rc::clone(&ext));
        }
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.by_tag.contains_key(tag)
    }

    pub fn has_body(&self, tag: &str) -> bool {
        self.by_tag.get(tag).is_some_and(|ext| ext.has_body(tag))
    }

    pub fn get(&self, tag: &str) -> Option<Rc<dyn Extension>> {
        self.by_tag.get(tag).cloned()
    }
}


/// The three registries an `Engine` owns, read-only for the duration of any
/// render (§5 "Shared-resource policy").
#[derive(Default, Clone)]
pub struct Registries {
    pub filters: FilterRegistry,
    pub tests: TestRegistry,
    pub extensions: ExtensionRegistry,
}
