//! ABOUTME: Order-preservation properties (spec §8 seed scenario 3, invariants 1-3 and 7)
//!
//! Every scenario here deliberately inverts completion order relative to
//! source order — the fastest-resolving deferred is placed last in source —
//! so a test that accidentally observed completion order instead of source
//! order would fail loudly rather than passing by coincidence.

use arvo::deferred::Deferred;
use arvo::value::Value;
use arvo::Engine;
use indexmap::IndexMap;
use std::time::Duration;

fn delayed_number(n: f64, ms: u64) -> Value {
    Value::Deferred(Deferred::from_future(async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(Value::Number(n))
    }))
}

/// Scenario 3: a `for` loop over items whose per-item async lookups resolve
/// out of order must still render in source order (invariant 1).
#[tokio::test]
async fn for_loop_output_follows_source_order_regardless_of_completion_order() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "items".to_string(),
        Value::array(vec![
            delayed_number(1.0, 30),
            delayed_number(2.0, 20),
            delayed_number(3.0, 10),
            delayed_number(4.0, 0),
        ]),
    );
    let out = engine.render_string("{% for x in items %}{{ x }}{% endfor %}", ctx).await.unwrap();
    assert_eq!(out, "1234");
}

/// An array literal's elements resolve to their source-order slots even when
/// later elements settle first (invariant 1, "parallel" join order).
#[tokio::test]
async fn array_literal_preserves_source_order_of_its_elements() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("a".to_string(), delayed_number(1.0, 25));
    ctx.insert("b".to_string(), delayed_number(2.0, 5));
    ctx.insert("c".to_string(), delayed_number(3.0, 15));
    let out = engine.render_string("{% for x in [a, b, c] %}{{ x }}{% endfor %}", ctx).await.unwrap();
    assert_eq!(out, "123");
}

/// Call arguments evaluate concurrently but are joined back in their
/// declared order, independent of which argument's deferred settles first.
#[tokio::test]
async fn call_arguments_join_in_declared_order_not_completion_order() {
    let mut engine = Engine::new();
    engine.add_filter("noop", |v, _args| Ok(v));
    let mut ctx = IndexMap::new();
    ctx.insert("a".to_string(), delayed_number(1.0, 40));
    ctx.insert("b".to_string(), delayed_number(2.0, 20));
    ctx.insert("c".to_string(), delayed_number(3.0, 0));
    ctx.insert(
        "join3".to_string(),
        Value::Native(std::rc::Rc::new(move |args: Vec<Value>| {
            Box::pin(async move {
                let parts: Vec<String> = args.iter().map(|v| v.as_number().unwrap().to_string()).collect();
                Ok(Value::str(parts.join(",")))
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, arvo::EngineError>>>>
        }),
    );
    let out = engine.render_string("{{ join3(a, b, c) }}", ctx).await.unwrap();
    assert_eq!(out, "1,2,3");
}

/// Same property repeated under several distinct delay permutations — a
/// lightweight stand-in for property-based perturbation of timing (§8
/// "randomly perturb delays and assert invariants 1-3 and 7").
#[tokio::test]
async fn order_preservation_holds_under_varied_delay_permutations() {
    let permutations: [[u64; 5]; 4] = [
        [50, 40, 30, 20, 10],
        [10, 20, 30, 40, 50],
        [25, 5, 45, 15, 35],
        [0, 0, 0, 0, 0],
    ];
    for delays in permutations {
        let engine = Engine::new();
        let mut ctx = IndexMap::new();
        let items: Vec<Value> = delays.iter().enumerate().map(|(i, ms)| delayed_number(i as f64, *ms)).collect();
        ctx.insert("items".to_string(), Value::array(items));
        let out = engine.render_string("{% for x in items %}{{ x }}{% endfor %}", ctx).await.unwrap();
        assert_eq!(out, "01234", "delays {:?} must not perturb output order", delays);
    }
}

/// Invariant 7: a rejected deferred surfaces as a runtime error rather than
/// silently truncating or reordering the remaining output.
#[tokio::test]
async fn a_rejected_deferred_propagates_as_an_error_not_a_silent_gap() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert(
        "items".to_string(),
        Value::array(vec![
            delayed_number(1.0, 5),
            Value::Deferred(Deferred::from_future(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                Err(arvo::EngineError::runtime("upstream fetch failed"))
            })),
            delayed_number(3.0, 0),
        ]),
    );
    let err = engine.render_string("{% for x in items %}{{ x }}{% endfor %}", ctx).await.unwrap_err();
    assert!(matches!(err, arvo::EngineError::Runtime { .. }));
}
