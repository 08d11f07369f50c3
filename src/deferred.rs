//! ABOUTME: The uniform deferred-value wrapper and its scheduling primitives
//!
//! A synchronous value is trivially a fulfilled deferred; an asynchronous one
//! is a suspended computation. Rust's own `Future` trait already models that
//! duality, so `Deferred` is a thin, memoizing wrapper (`futures::Shared`)
//! around a type-erased future — used everywhere the specification's data
//! model calls for *stored, possibly multiply-read* deferred state: frame
//! bindings, output-buffer slots, and macro/caller closures. Plain
//! `async`/`.await` carries the deferred-ness of every other expression
//! evaluation, with `parallel`/`sequential` below providing the two
//! scheduling primitives the evaluator needs.

use crate::error::EngineError;
use crate::value::Value;
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use futures::stream::{FuturesOrdered, StreamExt};
use std::future::Future;

/// A deferred value: pending, fulfilled, or rejected — a value "now" or "later".
///
/// Cloning a `Deferred` is cheap (an `Rc`-style handle into shared state);
/// every clone observes the same eventual resolution, computed at most once.
#[derive(Clone)]
pub struct Deferred(Shared<LocalBoxFuture<'static, Result<Value, EngineError>>>);

impl Deferred {
    /// A deferred that is already fulfilled.
    pub fn ready(value: Value) -> Self {
        Deferred(futures::future::ready(Ok(value)).boxed_local().shared())
    }

    /// A deferred that is already rejected.
    pub fn rejected(err: EngineError) -> Self {
        Deferred(futures::future::ready(Err(err)).boxed_local().shared())
    }

    /// Wraps an arbitrary (possibly suspended) computation as a deferred.
    /// The computation does not run until first polled (the first `.await`).
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Value, EngineError>> + 'static,
    {
        Deferred(fut.boxed_local().shared())
    }

    /// Blocks the logical evaluator coroutine on this deferred.
    pub async fn await_value(&self) -> Result<Value, EngineError> {
        self.clone().0.await
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Deferred(..)")
    }
}

/// `all([d1..dn])`: resolves to the vector of results in source order, or
/// rejects with the first error encountered (not necessarily the first to
/// complete — component order is preserved for a deterministic diagnostic).
pub async fn all(items: Vec<Deferred>) -> Result<Vec<Value>, EngineError> {
    let mut ordered: FuturesOrdered<_> = items.iter().map(|d| d.await_value()).collect();
    let mut out = Vec::with_capacity(ordered.len());
    while let Some(res) = ordered.next().await {
        out.push(res?);
    }
    Ok(out)
}

/// Evaluates a set of independent futures concurrently and joins the results
/// in their original (source) order. Used for call arguments, array/dict
/// elements, binary operator operands, and other positions the evaluator
/// identifies as mutually independent.
pub async fn parallel<T, F>(futures_in: Vec<F>) -> Result<Vec<T>, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let mut ordered: FuturesOrdered<F> = futures_in.into_iter().collect();
    let mut out = Vec::with_capacity(ordered.len());
    while let Some(res) = ordered.next().await {
        out.push(res?);
    }
    Ok(out)
}

/// Evaluates a sequence of futures one at a time, awaiting each before the
/// next is even constructed by its producer closure. Used for statement
/// sequences, `for` iterations, and short-circuit `and`/`or`/ternary.
pub async fn sequential<T, I, F, Fut>(items: I, mut f: F) -> Result<Vec<T>, EngineError>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut out = Vec::new();
    for item in items {
        out.push(f(item).await?);
    }
    Ok(out)
}
