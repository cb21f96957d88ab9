//! Effect-interpreting state container
//!
//! A [`Store`] owns one state value. The state changes only through
//! [`Effect::Set`], applied by a single serialized writer. Every snapshot the
//! writer produces is published to the store's derived streams.
//!
//! # Lifecycle
//!
//! An active store runs one reduce loop that takes effects from an unbounded
//! intake in submission order. [`Store::deactivate`] stops the loop, cancels
//! every registered identifier and every task of the current activation, and
//! closes all derived streams. The state is kept, and [`Store::activate`]
//! starts fresh machinery around it.
//!
//! # Blocking Lock Usage
//!
//! The state sits behind a `parking_lot::RwLock` and the lifecycle behind a
//! `parking_lot::Mutex`. Neither is held across an `.await`, and mutators run
//! to completion without suspending.

mod binding;
mod builder;
mod reducer;

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::cancel::{CancelToken, CancellationRegistry};
use crate::config::StoreConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::distributor::{BufferingPolicy, Distributor};
use crate::effect::{Effect, Lens, Mutator};
use crate::errors::{StoreError, StoreResult};
use crate::id::Id;
use crate::stream_ext::StoreStreamExt;

pub use binding::Binding;
pub use builder::StoreBuilder;

/// Caller-supplied mapping from a failure to a substitute effect.
pub type ErrorMapper<S> = Arc<dyn Fn(StoreError) -> Effect<S> + Send + Sync>;

/// Buffered will-change notifications per subscriber before it lags.
const WILL_CHANGE_CAPACITY: usize = 256;

/// Shared handle to an effect-interpreting state container.
///
/// Cloning is cheap and every clone addresses the same store. Tasks, timers
/// and bindings hold the store weakly, so dropping the last handle stops them.
pub struct Store<S, E = ()> {
    inner: Arc<StoreInner<S, E>>,
}

struct StoreInner<S, E> {
    state: RwLock<S>,
    env: E,
    error_mapper: ErrorMapper<S>,
    config: StoreConfig,
    diagnostics: Diagnostics,
    cancellables: CancellationRegistry,
    distributor: Distributor<S>,
    will_change: broadcast::Sender<()>,
    runtime: Handle,
    writer_thread: Option<ThreadId>,
    lifecycle: Mutex<Lifecycle<S>>,
}

struct Lifecycle<S> {
    intake: Option<mpsc::UnboundedSender<Effect<S>>>,
    reduce_loop: Option<JoinHandle<()>>,
    token: Option<CancelToken>,
}

impl<S> Lifecycle<S> {
    fn inactive() -> Self {
        Self {
            intake: None,
            reduce_loop: None,
            token: None,
        }
    }

    fn is_active(&self) -> bool {
        self.intake.is_some()
    }

    /// Returns whether the lifecycle was active.
    fn stop(&mut self) -> bool {
        let was_active = self.intake.take().is_some();
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        if let Some(reduce_loop) = self.reduce_loop.take() {
            reduce_loop.abort();
        }
        was_active
    }
}

impl<S, E> StoreInner<S, E> {
    /// Serialized writer: notify, mutate, publish, all under the write lock.
    /// Diagnostics from publishing are emitted after the lock is released.
    fn apply(&self, mutator: Mutator<S>)
    where
        S: Clone + Send,
    {
        let deferred = {
            let mut state = self.state.write();
            let _ = self.will_change.send(());
            mutator(&mut state);
            self.distributor.publish_deferred(&state).1
        };
        deferred.emit(&self.diagnostics);
    }

    fn map_error(&self, error: StoreError) -> Effect<S> {
        self.diagnostics.emit(Diagnostic::ErrorMapped {
            error: error.clone(),
        });
        (self.error_mapper)(error)
    }

    fn lifecycle_token(&self) -> Option<CancelToken> {
        self.lifecycle.lock().token.clone()
    }
}

impl<S, E> Drop for StoreInner<S, E> {
    fn drop(&mut self) {
        self.lifecycle.get_mut().stop();
    }
}

impl<S, E> Store<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Build and activate a store with default configuration.
    ///
    /// Fails with [`StoreError::NoRuntime`] outside a Tokio runtime.
    pub fn new(
        state: S,
        env: E,
        map_error: impl Fn(StoreError) -> Effect<S> + Send + Sync + 'static,
    ) -> StoreResult<Self> {
        StoreBuilder::new(state, env).map_error(map_error).build()
    }

    /// Start building a store
    pub fn builder(state: S, env: E) -> StoreBuilder<S, E> {
        StoreBuilder::new(state, env)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Open the intake and start the reduce loop. No-op while active.
    pub fn activate(&self) {
        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.is_active() {
                return;
            }

            let (intake, effects) = mpsc::unbounded_channel();
            let token = CancelToken::new();
            let reduce_loop = self.inner.runtime.spawn(reducer::reduce_loop(
                Arc::downgrade(&self.inner),
                effects,
                token.clone(),
            ));
            *lifecycle = Lifecycle {
                intake: Some(intake),
                reduce_loop: Some(reduce_loop),
                token: Some(token),
            };
        }
        self.inner.diagnostics.emit(Diagnostic::Activated);
    }

    /// Stop reducing, cancel everything registered and close derived streams.
    ///
    /// The state is left as it is.
    pub fn deactivate(&self) {
        if !self.inner.lifecycle.lock().stop() {
            return;
        }
        let cancelled = self.inner.cancellables.cancel_all();
        let closed = self.inner.distributor.close_all();
        tracing::trace!(cancelled, closed, "released store registrations");
        self.inner.diagnostics.emit(Diagnostic::Deactivated);
    }

    /// Whether the reduce loop is running
    pub fn is_active(&self) -> bool {
        self.inner.lifecycle.lock().is_active()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Intake
    // ─────────────────────────────────────────────────────────────────────────

    /// Submit an effect for interpretation.
    ///
    /// Effects are picked up in submission order. On an inactive store the
    /// effect is dropped with a diagnostic.
    pub fn receive(&self, effect: Effect<S>) {
        self.check_writer_context();

        let rejected = {
            let lifecycle = self.inner.lifecycle.lock();
            match &lifecycle.intake {
                Some(intake) => intake.send(effect).err().map(|rejected| {
                    Diagnostic::IntakeTerminated {
                        effect: rejected.0.to_string(),
                    }
                }),
                None => Some(Diagnostic::ReceiveWhileInactive {
                    effect: effect.to_string(),
                }),
            }
        };

        if let Some(diagnostic) = rejected {
            self.inner.diagnostics.emit(diagnostic);
        }
    }

    fn check_writer_context(&self) {
        if !self.inner.config.warn_on_foreign_context {
            return;
        }
        let Some(writer) = self.inner.writer_thread else {
            return;
        };
        let current = std::thread::current();
        if current.id() != writer {
            let thread = current
                .name()
                .map(str::to_owned)
                .unwrap_or_else(|| format!("{:?}", current.id()));
            self.inner
                .diagnostics
                .emit(Diagnostic::ForeignWriterContext { thread });
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Clone of the current state
    pub fn state(&self) -> S {
        self.inner.state.read().clone()
    }

    /// Run `f` against the current state
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.state.read())
    }

    /// Project one value out of the current state
    pub fn select<T>(&self, selector: impl Fn(&S) -> T) -> T {
        selector(&self.inner.state.read())
    }

    /// Immutable environment
    pub fn env(&self) -> &E {
        &self.inner.env
    }

    /// Configuration the store was built with
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Whether a task, timer, debounce or binding is registered under `id`
    pub fn is_registered(&self, id: &Id) -> bool {
        self.inner.cancellables.contains(id)
    }

    /// Subscribe to "state is about to change" notifications
    pub fn subscribe_will_change(&self) -> broadcast::Receiver<()> {
        self.inner.will_change.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Derived streams
    // ─────────────────────────────────────────────────────────────────────────

    /// Stream of `selector` applied to every snapshot, starting with the
    /// current one. Consecutive duplicates are removed.
    ///
    /// `policy` defaults to the configured buffering. Opening a stream under a
    /// live identifier closes the previous one.
    pub fn stream<T>(
        &self,
        id: impl Into<Id>,
        selector: impl Fn(&S) -> T + Send + 'static,
        policy: Option<BufferingPolicy>,
    ) -> BoxStream<'static, T>
    where
        T: PartialEq + Clone + Send + 'static,
    {
        let policy = policy.unwrap_or(self.inner.config.default_buffering);
        let (snapshots, deferred) = {
            // Holding the read lock orders the seed against concurrent writes.
            let state = self.inner.state.read();
            self.inner
                .distributor
                .open_channel_deferred(id.into(), state.clone(), policy)
        };
        deferred.emit(&self.inner.diagnostics);
        snapshots
            .map(move |state| selector(&state))
            .boxed()
            .remove_duplicates()
            .boxed()
    }

    /// Close the derived stream opened under `id`
    pub fn close_stream(&self, id: &Id) -> bool {
        self.inner.distributor.close(id)
    }

    /// Read/write handle on one field of the state
    pub fn binding<T>(&self, lens: Lens<S, T>) -> Binding<S, E, T>
    where
        T: Send + 'static,
    {
        Binding::new(self.clone(), lens)
    }
}

impl<S, E> Clone for Store<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, E> fmt::Debug for Store<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("component", &self.inner.diagnostics.component())
            .field("active", &self.inner.lifecycle.lock().is_active())
            .field("registered", &self.inner.cancellables.len())
            .field("streams", &self.inner.distributor.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store(value: u32) -> Store<u32> {
        Store::new(value, (), |_| Effect::None).unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_runtime_context() {
        let store = store(3);
        assert!(store.is_active());
        assert_eq!(store.state(), 3);
        assert_eq!(store.select(|s| s * 2), 6);
    }

    #[test]
    fn test_build_outside_runtime_fails() {
        let result = Store::new(0u32, (), |_| Effect::None);
        assert!(matches!(result, Err(StoreError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_set_reaches_stream_in_order() {
        let store = store(0);
        let mut values = store.stream("s", |s| *s, None);
        assert_eq!(values.next().await, Some(0));

        for i in 1..=3 {
            store.receive(Effect::set(move |s| *s = i));
        }
        for expected in 1..=3 {
            assert_eq!(values.next().await, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_will_change_precedes_publish() {
        let store = store(0);
        let mut will_change = store.subscribe_will_change();
        let mut values = store.stream("s", |s| *s, None);
        values.next().await;

        store.receive(Effect::set(|s| *s += 1));
        assert_eq!(values.next().await, Some(1));
        assert!(will_change.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_keeps_state_and_drops_receives() {
        let store = store(0);
        store.receive(Effect::set(|s| *s = 5));
        tokio::time::sleep(Duration::from_millis(1)).await;

        store.deactivate();
        assert!(!store.is_active());
        store.receive(Effect::set(|s| *s = 9));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.state(), 5);

        store.activate();
        store.receive(Effect::set(|s| *s += 1));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.state(), 6);
    }

    #[tokio::test]
    async fn test_deactivate_closes_streams() {
        let store = store(0);
        let mut values = store.stream("s", |s| *s, None);
        assert_eq!(values.next().await, Some(0));

        store.deactivate();
        assert_eq!(values.next().await, None);
    }

    #[tokio::test]
    async fn test_debug_reports_open_streams() {
        let store = store(0);
        let _values = store.stream("s", |s| *s, None);

        let rendered = format!("{store:?}");
        assert!(rendered.contains("streams: 1"));
        assert!(rendered.contains("active: true"));
    }
}
