//! Bindings: effects driven by streams of values

use std::fmt;
use std::sync::Arc;

use futures::{Stream, StreamExt};

use super::reducer::{reduce_root, ReduceScope};
use super::Store;
use crate::diagnostics::Diagnostic;
use crate::effect::{Effect, Lens};
use crate::errors::{StoreError, StoreResult};
use crate::id::Id;
use crate::stream_ext::StoreStreamExt;

impl<S, E> Store<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Drive effects from this store's own derived stream.
    ///
    /// Equivalent to [`Store::bind_stream`] over [`Store::stream`] opened
    /// under the same `id`.
    pub fn bind<T>(
        &self,
        id: impl Into<Id>,
        selector: impl Fn(&S) -> T + Send + 'static,
        map_effect: impl Fn(T) -> Effect<S> + Send + 'static,
    ) -> StoreResult<()>
    where
        T: PartialEq + Clone + Send + 'static,
    {
        let id = id.into();
        let values = self.stream(id.clone(), selector, None);
        self.bind_stream(id, values, map_effect)
    }

    /// Drive effects from another store's derived stream.
    pub fn bind_store<U, F, T>(
        &self,
        id: impl Into<Id>,
        upstream: &Store<U, F>,
        selector: impl Fn(&U) -> T + Send + 'static,
        map_effect: impl Fn(T) -> Effect<S> + Send + 'static,
    ) -> StoreResult<()>
    where
        U: Clone + Send + Sync + 'static,
        F: Send + Sync + 'static,
        T: PartialEq + Clone + Send + 'static,
    {
        let id = id.into();
        let values = upstream.stream(id.clone(), selector, None);
        self.bind_stream(id, values, map_effect)
    }

    /// Map every distinct consecutive value of `values` to an effect and
    /// reduce it.
    ///
    /// The driving task is registered under `id`: cancelling `id`, binding
    /// again under it, or deactivating the store stops it. Fails with
    /// [`StoreError::Inactive`] on an inactive store.
    pub fn bind_stream<T, St>(
        &self,
        id: impl Into<Id>,
        values: St,
        map_effect: impl Fn(T) -> Effect<S> + Send + 'static,
    ) -> StoreResult<()>
    where
        St: Stream<Item = T> + Send + 'static,
        T: PartialEq + Clone + Send + 'static,
    {
        let id = id.into();
        let lifecycle = self.inner.lifecycle_token().ok_or(StoreError::Inactive)?;
        self.inner
            .diagnostics
            .emit(Diagnostic::BindingStarted { id: id.clone() });

        let token = lifecycle.child();
        self.inner.cancellables.store(id.clone(), token.clone());

        let mut effects = values.boxed().remove_duplicates().map(map_effect).boxed();
        let store = Arc::downgrade(&self.inner);

        self.inner.runtime.spawn(async move {
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    next = effects.next() => next,
                };
                let Some(effect) = next else {
                    break;
                };
                let Some(inner) = store.upgrade() else {
                    return;
                };
                let scope = ReduceScope::within(lifecycle.clone(), token.clone());
                reduce_root(inner, effect, scope).await;
            }
            if let Some(inner) = store.upgrade() {
                inner.cancellables.release(&id, &token);
            }
        });
        Ok(())
    }
}

/// Read/write capability on one field of a store's state.
///
/// Reads observe the current snapshot; writes are submitted as effects.
pub struct Binding<S, E, T> {
    store: Store<S, E>,
    lens: Lens<S, T>,
}

impl<S, E, T> Binding<S, E, T>
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
    T: Send + 'static,
{
    pub(super) fn new(store: Store<S, E>, lens: Lens<S, T>) -> Self {
        Self { store, lens }
    }

    /// Current value of the field
    pub fn get(&self) -> T {
        self.store.with_state(|state| self.lens.get(state))
    }

    /// Submit an effect setting the field to `value`
    pub fn set(&self, value: T) {
        self.store.receive(Effect::assign(&self.lens, value));
    }
}

impl<S, E, T> Clone for Binding<S, E, T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lens: self.lens.clone(),
        }
    }
}

impl<S, E, T> fmt::Debug for Binding<S, E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("lens", &self.lens)
            .finish_non_exhaustive()
    }
}
