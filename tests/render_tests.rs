//! ABOUTME: End-to-end template-dialect render scenarios (spec §8 seed tests 1, 2, 4)

use arvo::deferred::Deferred;
use arvo::value::Value;
use arvo::{EngineError, Engine};
use indexmap::IndexMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

fn delayed_number(n: f64, ms: u64) -> Value {
    Value::Deferred(Deferred::from_future(async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::Number(n))
    }))
}

/// Wraps a plain async closure as a `Value::Native`, erasing its future into
/// the trait-object shape `NativeFn` expects (the same cast `FilterRegistry`/
/// `TestRegistry` perform internally for their own async handlers).
fn native_fn<F, Fut>(f: F) -> Value
where
    F: Fn(Vec<Value>) -> Fut + 'static,
    Fut: Future<Output = Result<Value, EngineError>> + 'static,
{
    Value::Native(Rc::new(move |args| Box::pin(f(args)) as Pin<Box<dyn Future<Output = Result<Value, EngineError>>>>))
}

/// Scenario 1: `{{ add(a, b) }}` with `a`, `b` deferred numbers and an async
/// `add` — result is correct regardless of the components' relative delay.
#[tokio::test]
async fn async_function_over_deferred_arguments() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("a".to_string(), delayed_number(3.0, 5));
    ctx.insert("b".to_string(), delayed_number(7.0, 5));
    ctx.insert(
        "add".to_string(),
        native_fn(|args: Vec<Value>| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let a = args[0].as_number().unwrap();
            let b = args[1].as_number().unwrap();
            Ok(Value::Number(a + b))
        }),
    );
    let out = engine.render_string("{{ add(a, b) }}", ctx).await.unwrap();
    assert_eq!(out, "10");
}

/// Scenario 2: `A and B` where `A` is falsy and `B` would reject if awaited —
/// the render must not observe `B`'s rejection (invariant 3, short-circuit).
#[tokio::test]
async fn short_circuit_and_never_awaits_the_rejecting_branch() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("a".to_string(), Value::Bool(false));
    ctx.insert(
        "b".to_string(),
        Value::Deferred(Deferred::from_future(async move {
            Err(EngineError::runtime("b must not be evaluated"))
        })),
    );
    let out = engine
        .render_string("{% if a and b %}yes{% else %}no{% endif %}", ctx)
        .await
        .unwrap();
    assert_eq!(out, "no");
}

/// Scenario 2's `or` counterpart: a truthy left operand must short-circuit
/// `or` the same way a falsy left operand short-circuits `and`.
#[tokio::test]
async fn short_circuit_or_never_awaits_the_rejecting_branch() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("a".to_string(), Value::Bool(true));
    ctx.insert(
        "b".to_string(),
        Value::Deferred(Deferred::from_future(async move {
            Err(EngineError::runtime("b must not be evaluated"))
        })),
    );
    let out = engine
        .render_string("{% if a or b %}yes{% else %}no{% endif %}", ctx)
        .await
        .unwrap();
    assert_eq!(out, "yes");
}

/// Ternary short-circuit: the branch not taken must not execute either.
#[tokio::test]
async fn ternary_does_not_evaluate_the_untaken_branch() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "boom".to_string(),
        Value::Deferred(Deferred::from_future(async move {
            Err(EngineError::runtime("must not be evaluated"))
        })),
    );
    let out = engine.render_string("{{ 'safe' if true else boom }}", ctx).await.unwrap();
    assert_eq!(out, "safe");
}

/// Scenario 4: a macro invoked with an async-resolved argument.
#[tokio::test]
async fn macro_invocation_with_async_argument() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "name".to_string(),
        native_fn(|_args: Vec<Value>| async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(Value::str("Alice"))
        }),
    );
    let src = "{% macro g(n) %}Hi {{ n }}!{% endmacro %}{{ g(name()) }}";
    let out = engine.render_string(src, ctx).await.unwrap();
    assert_eq!(out, "Hi Alice!");
}

#[tokio::test]
async fn unresolved_symbol_is_a_name_error_not_silent_undefined() {
    let engine = Engine::new();
    let err = engine.render_string("{{ nope }}", IndexMap::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::Name { .. }));
}

#[tokio::test]
async fn attribute_lookup_on_nullish_yields_nullish() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("maybe".to_string(), Value::Null);
    let out = engine.render_string("[{{ maybe.field }}]", ctx).await.unwrap();
    assert_eq!(out, "[]");
}

#[tokio::test]
async fn trim_markers_strip_adjacent_whitespace() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "items".to_string(),
        Value::array(vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]),
    );
    let src = "{%- for x in items -%}\n{{ x }}\n{%- endfor -%}";
    let out = engine.render_string(src, ctx).await.unwrap();
    assert_eq!(out, "123");
}

#[tokio::test]
async fn set_block_captures_rendered_body() {
    let engine = Engine::new();
    let src = "{% set greeting %}Hello, {{ 1 + 1 }}!{% endset %}{{ greeting }} {{ greeting }}";
    let out = engine.render_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out, "Hello, 2! Hello, 2!");
}

#[tokio::test]
async fn filter_pipe_invokes_registered_filter() {
    let mut engine = Engine::new();
    engine.add_filter("upper", |v, _args| match v {
        Value::Str(s) => Ok(Value::str(s.to_uppercase())),
        other => Err(EngineError::type_error("upper", "string", other.type_name())),
    });
    let out = engine.render_string("{{ 'abc' | upper }}", IndexMap::new()).await.unwrap();
    assert_eq!(out, "ABC");
}

#[tokio::test]
async fn is_test_invokes_registered_predicate_and_supports_negation() {
    let mut engine = Engine::new();
    engine.add_test("even", |v, _args| Ok(v.as_number().map(|n| n % 2.0 == 0.0).unwrap_or(false)));
    let out = engine
        .render_string("{{ 'yes' if 4 is even else 'no' }}-{{ 'yes' if 3 is not even else 'no' }}", IndexMap::new())
        .await
        .unwrap();
    assert_eq!(out, "yes-yes");
}

#[tokio::test]
async fn switch_dispatches_to_matching_case_or_default() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("x".to_string(), Value::Number(2.0));
    let src = "{% switch x %}{% case 1 %}one{% case 2 %}two{% default %}other{% endswitch %}";
    let out = engine.render_string(src, ctx).await.unwrap();
    assert_eq!(out, "two");
}

#[tokio::test]
async fn include_renders_under_current_frame_bindings() {
    use arvo::loader::MapLoader;
    let mut engine = Engine::new();
    engine.set_loader(MapLoader::new().with("greet.txt", "Hello, {{ name }}!"));
    let mut ctx = IndexMap::new();
    ctx.insert("name".to_string(), Value::str("Bob"));
    let out = engine.render_string("{% include 'greet.txt' %}", ctx).await.unwrap();
    assert_eq!(out, "Hello, Bob!");
}

#[tokio::test]
async fn include_ignore_missing_swallows_not_found() {
    let engine = Engine::new();
    let out = engine
        .render_string("before[{% include 'missing.txt' ignore missing %}]after", IndexMap::new())
        .await
        .unwrap();
    assert_eq!(out, "before[]after");
}

#[tokio::test]
async fn extends_overrides_parent_blocks_and_super_renders_parent_body() {
    use arvo::loader::MapLoader;
    let mut engine = Engine::new();
    engine.set_loader(
        MapLoader::new().with("base.txt", "<{% block body %}base{% endblock %}>"),
    );
    let src = "{% extends 'base.txt' %}{% block body %}child+{{ super() }}{% endblock %}";
    let out = engine.render_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out, "<child+base>");
}
