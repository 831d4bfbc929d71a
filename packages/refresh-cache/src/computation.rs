//! The opaque 0-arity computation a [`Worker`](crate::worker::Worker) owns,
//! and the isolation boundary between it and the worker's event loop.
//!
//! Represented as a plain boxed async closure rather than a trait, since the
//! cache only ever needs to call it, never to dispatch on its type. Each run
//! is spawned on its own task so a panic inside `fun` is caught by
//! `tokio::spawn`'s `JoinHandle` instead of unwinding into the worker loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, `'static` future -- the erased return type of a registered
/// computation.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased 0-arity computation. Cloning is cheap (`Arc` underneath);
/// every refresh calls the same `fun` again.
pub(crate) type ComputeFn<V> = Arc<dyn Fn() -> BoxFuture<anyhow::Result<V>> + Send + Sync>;

/// Wraps a user closure into a [`ComputeFn`].
pub(crate) fn erase<F, Fut, V>(fun: F) -> ComputeFn<V>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    V: 'static,
{
    Arc::new(move || Box::pin(fun()) as BoxFuture<anyhow::Result<V>>)
}

/// Outcome of one execution of a registered computation.
///
/// `Failure` and `Crash` are distinguished only for logging -- the state
/// machine and the reader protocol treat them identically.
#[derive(Debug)]
pub(crate) enum ComputeOutcome<V> {
    Success(V),
    Failure,
    Crash,
}

/// Runs `fun` in its own task and reports the outcome back on `tx`, tagged
/// with `epoch` so the worker loop can discard late or stale reports.
///
/// The computation never runs on the worker's event-loop task: a `fun` that
/// blocks or takes a long time cannot stall timer handling or
/// `await_current` requests, and a panic inside `fun` is caught by
/// `tokio::spawn`'s `JoinHandle` rather than unwinding into the loop.
pub(crate) fn spawn_computation<V>(
    fun: ComputeFn<V>,
    epoch: u64,
    tx: tokio::sync::mpsc::UnboundedSender<crate::worker::WorkerEvent<V>>,
) where
    V: Send + 'static,
{
    let handle = tokio::spawn(async move { fun().await });
    tokio::spawn(async move {
        let outcome = match handle.await {
            Ok(Ok(value)) => ComputeOutcome::Success(value),
            Ok(Err(_failure)) => ComputeOutcome::Failure,
            Err(_crash) => ComputeOutcome::Crash,
        };
        let _ = tx.send(crate::worker::WorkerEvent::Finished(epoch, outcome));
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn erase_invokes_the_wrapped_closure_each_call() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter2 = Arc::clone(&counter);
        let f: ComputeFn<u32> = erase(move || {
            let counter = Arc::clone(&counter2);
            async move {
                let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                Ok(n)
            }
        });

        assert_eq!(f().await.unwrap(), 1);
        assert_eq!(f().await.unwrap(), 2);
    }
}
