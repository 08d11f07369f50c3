//! ABOUTME: Library root — the public `Engine` type and render entry points
//!
//! Mirrors the teacher's `lib.rs` (a flat `pub mod` list exposing the
//! interpreter's internals for its own integration tests) but adds the one
//! thing a Lisp REPL never needed: a small façade type binding the
//! registries, optional loader, and config together so a host only ever
//! touches one object, matching §6's `renderString`/`renderTemplate`/
//! `renderScriptString`/`addFilter`/`addTest`/`addExtension` surface.

pub mod ast;
pub mod config;
pub mod deferred;
pub mod error;
pub mod frame;
pub mod lexer;
pub mod loader;
pub mod output;
pub mod parser;
pub mod registry;
pub mod token;
pub mod value;

mod eval;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, SourceSpan};
pub use value::Value;

use crate::eval::Evaluator;
use crate::frame::Dialect;
use crate::loader::Loader;
use crate::registry::{Extension, Registries};
use indexmap::IndexMap;
use std::rc::Rc;

/// The engine: owns the three registries (§4.8), an optional template
/// `Loader` (§6), and render configuration. Registries are mutated freely
/// before the first render and treated as read-only for the duration of any
/// one (§5 "Shared-resource policy") — nothing here enforces that beyond the
/// convention, the same trust boundary the teacher's `Environment`/
/// `MacroRegistry` pair relies on.
pub struct Engine {
    registries: Registries,
    loader: Option<Rc<dyn Loader>>,
    config: EngineConfig,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            registries: Registries::default(),
            loader: None,
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            registries: Registries::default(),
            loader: None,
            config,
        }
    }

    /// Installs the loader consulted by `render_template`/`include`/`extends`.
    pub fn set_loader(&mut self, loader: impl Loader + 'static) {
        self.loader = Some(Rc::new(loader));
    }

    /// `addFilter(name, handler)` for a plain synchronous filter.
    pub fn add_filter(&mut self, name: &str, f: fn(Value, &[Value]) -> EngineResult<Value>) {
        self.registries.filters.register_filter(name, f);
    }

    /// `addFilter(name, handler)` for a genuinely asynchronous filter.
    pub fn add_filter_async<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(Value, Vec<Value>) -> Fut + 'static,
        Fut: std::future::Future<Output = EngineResult<Value>> + 'static,
    {
        self.registries.filters.register_async(name, f);
    }

    /// `addTest(name, handler)` for a plain synchronous test predicate.
    pub fn add_test(&mut self, name: &str, f: fn(Value, &[Value]) -> EngineResult<bool>) {
        self.registries.tests.register_test(name, f);
    }

    /// `addTest(name, handler)` for a genuinely asynchronous test predicate.
    pub fn add_test_async<F, Fut>(&mut self, name: &str, f: F)
    where
        F: Fn(Value, Vec<Value>) -> Fut + 'static,
        Fut: std::future::Future<Output = EngineResult<bool>> + 'static,
    {
        self.registries.tests.register_async(name, f);
    }

    /// `addExtension(name, ext)` — registers a tag extension under every
    /// name it declares via `Extension::tags`.
    pub fn add_extension(&mut self, ext: impl Extension + 'static) {
        let ext: Rc<dyn Extension> = Rc::new(ext);
        self.registries.extensions.register(ext);
    }

    fn evaluator(&self) -> Evaluator {
        Evaluator::new(Rc::new(self.registries.clone()), self.loader.clone(), self.config.clone())
    }

    /// `renderString(template, context) -> deferred<string>`.
    pub async fn render_string(&self, template: &str, context: IndexMap<String, Value>) -> EngineResult<String> {
        let tokens = crate::lexer::template::tokenize(template)?;
        let parsed = crate::parser::template::parse(&tokens, &self.registries.extensions)?;
        let evaluator = self.evaluator();
        let frame = evaluator.build_root_frame(context, Dialect::Template);
        evaluator.render_template(Rc::new(parsed), frame).await
    }

    /// `renderTemplate(name, context) -> deferred<string>` — resolved through
    /// the configured `Loader`.
    pub async fn render_template(&self, name: &str, context: IndexMap<String, Value>) -> EngineResult<String> {
        let evaluator = self.evaluator();
        let parsed = evaluator.load_and_parse(name, None)?;
        let frame = evaluator.build_root_frame(context, Dialect::Template);
        evaluator.render_template(parsed, frame).await
    }

    /// `renderScriptString(script, context) -> deferred<object>` — the
    /// script dialect (§4.9), returning the structured-data tree built under
    /// its declared `:handle` rather than rendered text.
    pub async fn render_script_string(&self, script: &str, context: IndexMap<String, Value>) -> EngineResult<Value> {
        let tokens = crate::lexer::script::tokenize(script)?;
        let program = crate::parser::script::parse(&tokens)?;
        let evaluator = self.evaluator();
        let frame = evaluator.build_root_frame(context, Dialect::Script);
        evaluator.run_script(&program, frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn render_string_substitutes_variables() {
        let engine = Engine::new();
        let mut ctx = IndexMap::new();
        ctx.insert("name".to_string(), Value::str("Alice"));
        let out = engine.render_string("Hi {{ name }}!", ctx).await.unwrap();
        assert_eq!(out, "Hi Alice!");
    }

    #[tokio::test]
    async fn render_script_string_returns_structured_data() {
        let engine = Engine::new();
        let out = engine
            .render_script_string(":data\n@data.n = 1 + 2\n", IndexMap::new())
            .await
            .unwrap();
        assert_eq!(out.to_json(), serde_json::json!({"n": 3.0}));
    }
}
