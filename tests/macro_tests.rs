//! ABOUTME: Macro closure and `{% call %}`/`caller()` semantics (§4.5 invariants 4, 5)

use arvo::value::Value;
use arvo::Engine;
use indexmap::IndexMap;

/// Invariant 4: a macro closes over its *defining* frame, not the frame of
/// whichever call site later invokes it.
#[tokio::test]
async fn macro_closure_sees_its_defining_scope_not_the_call_site() {
    let engine = Engine::new();
    let src = "{% set label = 'outer' %}\
{% macro show() %}{{ label }}{% endmacro %}\
{% set label = 'shadowed-at-call-site' %}\
{{ show() }}";
    let out = engine.render_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out, "outer");
}

/// A macro invoked as a plain expression call (no `{% call %}` block) sees
/// `caller` bound to null — invariant 5, the "no active call block" half.
#[tokio::test]
async fn caller_is_null_when_macro_is_invoked_without_a_call_block() {
    let engine = Engine::new();
    let src = "{% macro wrapper() %}[{% if caller %}{{ caller() }}{% else %}empty{% endif %}]{% endmacro %}{{ wrapper() }}";
    let out = engine.render_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out, "[empty]");
}

/// Invoking the same macro through `{% call %}...{% endcall %}` binds
/// `caller` to the block's rendered body — invariant 5, the truthy half.
#[tokio::test]
async fn caller_is_truthy_and_renders_the_call_block_body() {
    let engine = Engine::new();
    let src = "{% macro wrapper() %}[{% if caller %}{{ caller() }}{% else %}empty{% endif %}]{% endmacro %}\
{% call wrapper() %}filled{% endcall %}";
    let out = engine.render_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out, "[filled]");
}

/// `{% call(x) name() %}` binds parameters the callee passes into `caller()`
/// so the call-block body can use them — params come from the call site's
/// bindings, the body still closes over the call-site frame (not the
/// macro's), distinguishing caller closures from macro closures.
#[tokio::test]
async fn call_block_parameters_are_bound_from_the_macro_supplied_arguments() {
    let engine = Engine::new();
    let src = "{% macro each_item() %}{% for n in [1, 2, 3] %}{{ caller(n) }}{% endfor %}{% endmacro %}\
{% call(n) each_item() %}<{{ n }}>{% endcall %}";
    let out = engine.render_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out, "<1><2><3>");
}

/// Macro default parameters are evaluated in the invocation frame (so they
/// may reference other already-bound parameters) when the caller omits them.
#[tokio::test]
async fn macro_default_parameters_fill_in_when_the_caller_omits_them() {
    let engine = Engine::new();
    let src = "{% macro greet(name, greeting='Hello') %}{{ greeting }}, {{ name }}!{% endmacro %}{{ greet('Ann') }}";
    let out = engine.render_string(src, IndexMap::new()).await.unwrap();
    assert_eq!(out, "Hello, Ann!");
}

/// A macro missing a required argument is a runtime error, not a silent null.
#[tokio::test]
async fn macro_missing_required_argument_is_a_runtime_error() {
    let engine = Engine::new();
    let src = "{% macro greet(name) %}Hi {{ name }}{% endmacro %}{{ greet() }}";
    let err = engine.render_string(src, IndexMap::new()).await.unwrap_err();
    assert!(matches!(err, arvo::EngineError::Runtime { .. }));
}

/// Macros are first-class values: one can be passed into another and invoked
/// there, still bound to its own defining scope.
#[tokio::test]
async fn a_macro_reference_can_be_passed_around_as_a_value() {
    let engine = Engine::new();
    let mut ctx = IndexMap::new();
    ctx.insert("dummy".to_string(), Value::Null);
    let src = "{% macro shout(s) %}{{ s }}!!!{% endmacro %}\
{% set fn = shout %}\
{{ fn('hi') }}";
    let out = engine.render_string(src, ctx).await.unwrap();
    assert_eq!(out, "hi!!!");
}
