//! ABOUTME: End-to-end script-dialect scenarios (spec §8 seed scenario 6, §4.9)

use arvo::deferred::Deferred;
use arvo::value::Value;
use arvo::{EngineError, Engine};
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

fn native_fn<F, Fut>(f: F) -> Value
where
    F: Fn(Vec<Value>) -> Fut + 'static,
    Fut: Future<Output = Result<Value, EngineError>> + 'static,
{
    Value::Native(Rc::new(move |args| Box::pin(f(args)) as Pin<Box<dyn Future<Output = Result<Value, EngineError>>>>))
}

/// Scenario 6: `var u = fetchUser(1)` then `@data.n = u.name` against an
/// async host function — the declared root handle ends up holding the
/// structured result, not rendered text.
#[tokio::test]
async fn var_binds_async_call_result_into_a_data_path() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "fetchUser".to_string(),
        native_fn(|args: Vec<Value>| async move {
            tokio::time::sleep(Duration::from_millis(3)).await;
            let id = args[0].as_number().unwrap();
            let mut m = IndexMap::new();
            m.insert("id".to_string(), Value::Number(id));
            m.insert("name".to_string(), Value::str("Alice"));
            Ok(Value::map(m))
        }),
    );
    let src = ":data\nvar u = fetchUser(1)\n@data.n = u.name\n";
    let out = engine.render_script_string(src, ctx).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"n": "Alice"}));
}

#[tokio::test]
async fn push_appends_to_an_array_path_autovivifying_intermediate_maps() {
    let engine = Engine::new();
    let src = ":data\n@data.items.push(1)\n@data.items.push(2)\n";
    let out = engine.render_script_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"items": [1.0, 2.0]}));
}

#[tokio::test]
async fn extern_exposes_a_host_supplied_binding_without_reinitializing_it() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("config".to_string(), Value::str("prod"));
    let src = ":data\nextern config\n@data.env = config\n";
    let out = engine.render_script_string(src, ctx).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"env": "prod"}));
}

#[tokio::test]
async fn extern_with_initializer_is_a_syntax_error() {
    let engine = Engine::new();
    let err = engine.render_script_string(":data\nextern a = 1\n", IndexMap::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Syntax { .. }));
}

#[tokio::test]
async fn bare_assignment_to_an_undeclared_name_is_a_name_error() {
    let engine = Engine::new();
    let err = engine.render_script_string(":data\nx = 1\n", IndexMap::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Name { .. }));
}

#[tokio::test]
async fn for_over_array_with_if_filters_into_a_pushed_result() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "items".to_string(),
        Value::array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0), Value::Number(4.0)]),
    );
    let src = ":data\nfor x in items\nif x\n@data.seen.push(x)\nendif\nendfor\n";
    let out = engine.render_script_string(src, ctx).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"seen": [1.0, 2.0, 3.0, 4.0]}));
}

#[tokio::test]
async fn for_over_map_binds_key_and_value_targets() {
    let engine = Engine::new();
    let mut m = IndexMap::new();
    m.insert("a".to_string(), Value::Number(1.0));
    m.insert("b".to_string(), Value::Number(2.0));
    let mut ctx = IndexMap::new();
    ctx.insert("m".to_string(), Value::map(m));
    let src = ":data\nfor k, v in m\n@data.pairs.push(v)\nendfor\n";
    let out = engine.render_script_string(src, ctx).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"pairs": [1.0, 2.0]}));
}

#[tokio::test]
async fn capture_builds_a_nested_handle_bound_into_the_enclosing_scope() {
    let engine = Engine::new();
    let src = ":data\ncapture :profile\n@profile.name = \"Bob\"\nendcapture\n@data.user = profile\n";
    let out = engine.render_script_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"user": {"name": "Bob"}}));
}

#[tokio::test]
async fn deferred_context_values_resolve_before_being_written_into_the_tree() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "slow".to_string(),
        Value::Deferred(Deferred::from_future(async move {
            tokio::time::sleep(Duration::from_millis(3)).await;
            Ok(Value::Number(42.0))
        })),
    );
    let src = ":data\n@data.n = slow\n";
    let out = engine.render_script_string(src, ctx).await.unwrap();
    assert_eq!(out.to_json(), serde_json::json!({"n": 42.0}));
}
