//! ABOUTME: Async-generator `for` iteration (§4.4 "async iteration", §9 open
//! question (b) on `loop.length`'s one-ahead-buffered resolution)

use arvo::value::{AsyncGenerator, Value};
use arvo::Engine;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

/// A pull-based source over a fixed list, each item resolved after a short
/// sleep — stands in for a true streaming source (e.g. rows from a cursor)
/// that cannot be eagerly materialized into an array.
struct VecGenerator {
    remaining: RefCell<std::vec::IntoIter<f64>>,
}

impl VecGenerator {
    fn new(items: Vec<f64>) -> Rc<Self> {
        Rc::new(VecGenerator {
            remaining: RefCell::new(items.into_iter()),
        })
    }
}

impl AsyncGenerator for VecGenerator {
    fn next(self: Rc<Self>) -> Pin<Box<dyn Future<Output = Result<Option<Value>, arvo::EngineError>>>> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(self.remaining.borrow_mut().next().map(Value::Number))
        })
    }
}

#[tokio::test]
async fn for_loop_drains_a_generator_source_in_order() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("src".to_string(), Value::Generator(VecGenerator::new(vec![1.0, 2.0, 3.0])));
    let out = engine.render_string("{% for x in src %}{{ x }}{% endfor %}", ctx).await.unwrap();
    assert_eq!(out, "123");
}

#[tokio::test]
async fn loop_length_is_unknown_until_the_generator_is_known_to_be_exhausted() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("src".to_string(), Value::Generator(VecGenerator::new(vec![1.0, 2.0, 3.0])));
    let src = "{% for x in src %}{{ loop.index0 }}:{{ loop.length }}:{{ loop.last }} {% endfor %}";
    let out = engine.render_string(src, ctx).await.unwrap();
    // Only the last iteration has drained one item ahead far enough to know
    // the generator is exhausted, so `loop.length`/`loop.last` resolve there
    // and nowhere earlier (decided lazily, per the design notes).
    assert_eq!(out, "0::false 1::false 2:3:true ");
}

#[tokio::test]
async fn empty_generator_runs_the_for_loop_else_branch() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("src".to_string(), Value::Generator(VecGenerator::new(vec![])));
    let out = engine
        .render_string("{% for x in src %}{{ x }}{% else %}empty{% endfor %}", ctx)
        .await
        .unwrap();
    assert_eq!(out, "empty");
}

#[tokio::test]
async fn script_dialect_for_loop_also_drains_a_generator_source() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("src".to_string(), Value::Generator(VecGenerator::new(vec![10.0, 20.0])));
    let src = ":data\nfor x in src\n@data.seen.push(x)\nendfor\n";
    let out = engine.render_script_string(src, ctx).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"seen": [10.0, 20.0]}));
}
