//! Effect interpretation
//!
//! Recursion goes through boxed futures, and `Concatenate` is flattened into a
//! work queue, so deep effect trees grow the heap rather than the stack.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tokio::sync::mpsc;

use super::StoreInner;
use crate::cancel::CancelToken;
use crate::diagnostics::Diagnostic;
use crate::effect::{Effect, EffectFuture, TickMapper};
use crate::errors::StoreError;
use crate::id::Id;
use crate::timer::PeriodicTimer;

/// Cancellation context an effect is interpreted in.
#[derive(Clone, Debug)]
pub(super) struct ReduceScope {
    /// Token of the activation; cancelled on deactivate.
    lifecycle: CancelToken,
    /// Token observed by `Sleep`: the enclosing task's, or the lifecycle's.
    current: CancelToken,
}

impl ReduceScope {
    pub(super) fn root(lifecycle: CancelToken) -> Self {
        Self {
            current: lifecycle.clone(),
            lifecycle,
        }
    }

    pub(super) fn within(lifecycle: CancelToken, current: CancelToken) -> Self {
        Self { lifecycle, current }
    }
}

/// Single consumer of the intake, one effect at a time in submission order.
pub(super) async fn reduce_loop<S, E>(
    store: Weak<StoreInner<S, E>>,
    mut effects: mpsc::UnboundedReceiver<Effect<S>>,
    lifecycle: CancelToken,
) where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    loop {
        let effect = tokio::select! {
            biased;
            _ = lifecycle.cancelled() => break,
            effect = effects.recv() => match effect {
                Some(effect) => effect,
                None => break,
            },
        };
        let Some(inner) = store.upgrade() else {
            break;
        };
        reduce_root(inner, effect, ReduceScope::root(lifecycle.clone())).await;
    }
    tracing::trace!("reduce loop stopped");
}

/// Interpret an effect that enters the reducer from outside a parent effect.
pub(super) fn reduce_root<S, E>(
    inner: Arc<StoreInner<S, E>>,
    effect: Effect<S>,
    scope: ReduceScope,
) -> BoxFuture<'static, ()>
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    if effect.has_concatenated_debounce() {
        inner.diagnostics.emit(Diagnostic::ConcatenatedDebounce);
    }
    reduce(inner, effect, scope, false)
}

fn reduce<S, E>(
    inner: Arc<StoreInner<S, E>>,
    effect: Effect<S>,
    scope: ReduceScope,
    await_tasks: bool,
) -> BoxFuture<'static, ()>
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async move {
        // Work left over from a previous activation is dropped.
        if scope.lifecycle.is_cancelled() {
            return;
        }

        match effect {
            Effect::None => {}
            Effect::Set(mutator) => inner.apply(mutator),
            Effect::Task { operation, id } => {
                spawn_operation(&inner, operation, id, &scope, await_tasks).await;
            }
            Effect::Debounce {
                operation,
                id,
                delay,
            } => {
                let delayed = async move {
                    tokio::time::sleep(delay).await;
                    operation.await
                }
                .boxed();
                spawn_operation(&inner, delayed, Some(id), &scope, await_tasks).await;
            }
            Effect::Sleep(duration) => sleep(inner, duration, scope).await,
            Effect::Timer {
                interval,
                id,
                map_effect,
            } => start_timer(&inner, interval, id, map_effect, &scope),
            Effect::Cancel(id) => {
                inner.cancellables.cancel(&id);
            }
            Effect::Merge(effects) => {
                let members = effects
                    .into_iter()
                    .map(|effect| reduce(inner.clone(), effect, scope.clone(), await_tasks));
                join_all(members).await;
            }
            Effect::Concatenate(effects) => {
                let mut queue = VecDeque::from(effects);
                while let Some(effect) = queue.pop_front() {
                    match effect {
                        Effect::Concatenate(nested) => {
                            for effect in nested.into_iter().rev() {
                                queue.push_front(effect);
                            }
                        }
                        effect => reduce(inner.clone(), effect, scope.clone(), true).await,
                    }
                }
            }
        }
    }
    .boxed()
}

async fn sleep<S, E>(inner: Arc<StoreInner<S, E>>, duration: Duration, scope: ReduceScope)
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let cancelled = tokio::select! {
        biased;
        _ = scope.current.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    };
    if cancelled {
        let effect = inner.map_error(StoreError::Cancelled);
        reduce_root(inner, effect, ReduceScope::root(scope.lifecycle)).await;
    }
}

/// Register the task token under `id`, then spawn. The token is stored before
/// the task exists so a prior task under `id` is cancelled first.
async fn spawn_operation<S, E>(
    inner: &Arc<StoreInner<S, E>>,
    operation: EffectFuture<S>,
    id: Option<Id>,
    scope: &ReduceScope,
    await_task: bool,
) where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let token = scope.lifecycle.child();
    if let Some(id) = &id {
        inner.cancellables.store(id.clone(), token.clone());
    }

    let task = inner.runtime.spawn(run_operation(
        Arc::downgrade(inner),
        operation,
        id,
        token,
        scope.lifecycle.clone(),
    ));

    if await_task {
        if let Err(error) = task.await {
            tracing::warn!(%error, "store task did not complete");
        }
    }
}

/// Releases a finished task's registration, including when reducing its
/// result panics.
struct ReleaseOnDrop<S, E> {
    store: Weak<StoreInner<S, E>>,
    id: Option<Id>,
    token: CancelToken,
}

impl<S, E> Drop for ReleaseOnDrop<S, E> {
    fn drop(&mut self) {
        let (Some(id), Some(inner)) = (self.id.take(), self.store.upgrade()) else {
            return;
        };
        inner.cancellables.release(&id, &self.token);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn run_operation<S, E>(
    store: Weak<StoreInner<S, E>>,
    operation: EffectFuture<S>,
    id: Option<Id>,
    token: CancelToken,
    lifecycle: CancelToken,
) where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let _release = ReleaseOnDrop {
        store: store.clone(),
        id,
        token: token.clone(),
    };

    let operation = AssertUnwindSafe(operation).catch_unwind();
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(StoreError::Cancelled),
        result = operation => result.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "store operation panicked");
            Err(StoreError::operation(format!("operation panicked: {message}")))
        }),
    };

    let Some(inner) = store.upgrade() else {
        return;
    };
    match result {
        Ok(effect) => {
            let scope = ReduceScope::within(lifecycle, token);
            reduce_root(inner, effect, scope).await;
        }
        Err(error) => {
            let effect = inner.map_error(error);
            reduce_root(inner, effect, ReduceScope::root(lifecycle)).await;
        }
    }
}

fn start_timer<S, E>(
    inner: &Arc<StoreInner<S, E>>,
    interval: Duration,
    id: Id,
    map_effect: TickMapper<S>,
    scope: &ReduceScope,
) where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    let token = scope.lifecycle.child();
    inner.cancellables.store(id.clone(), token.clone());

    let mut timer = PeriodicTimer::with_cancel(interval, token.clone())
        .with_diagnostics(inner.diagnostics.clone());
    let store = Arc::downgrade(inner);
    let lifecycle = scope.lifecycle.clone();

    inner.runtime.spawn(async move {
        while let Some(tick) = timer.next().await {
            let Some(inner) = store.upgrade() else {
                return;
            };
            let scope = ReduceScope::within(lifecycle.clone(), token.clone());
            reduce_root(inner, map_effect(tick), scope).await;
        }
        if let Some(inner) = store.upgrade() {
            inner.cancellables.release(&id, &token);
        }
    });
}
