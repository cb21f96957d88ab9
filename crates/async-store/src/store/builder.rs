//! Store construction

use std::fmt;
use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use super::{ErrorMapper, Lifecycle, Store, StoreInner, WILL_CHANGE_CAPACITY};
use crate::cancel::CancellationRegistry;
use crate::config::StoreConfig;
use crate::diagnostics::{DiagnosticSink, Diagnostics};
use crate::distributor::Distributor;
use crate::effect::Effect;
use crate::errors::{StoreError, StoreResult};

const DEFAULT_COMPONENT: &str = "AsyncStore";

/// Assembles a [`Store`].
///
/// ```ignore
/// let store = Store::builder(State::default(), Env::default())
///     .map_error(|error| Effect::set(move |s: &mut State| s.last_error = Some(error)))
///     .config(StoreConfig::default())
///     .build()?;
/// ```
pub struct StoreBuilder<S, E = ()> {
    state: S,
    env: E,
    error_mapper: Option<ErrorMapper<S>>,
    config: StoreConfig,
    sink: Option<Arc<dyn DiagnosticSink>>,
    component: Option<String>,
    writer_thread: Option<ThreadId>,
    runtime: Option<Handle>,
    activate: bool,
}

impl<S, E> StoreBuilder<S, E>
where
    S: Clone + Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Builder with default configuration and an error mapper returning
    /// [`Effect::None`]
    pub fn new(state: S, env: E) -> Self {
        Self {
            state,
            env,
            error_mapper: None,
            config: StoreConfig::default(),
            sink: None,
            component: None,
            writer_thread: None,
            runtime: None,
            activate: true,
        }
    }

    /// Map operation failures and cancellations to effects
    pub fn map_error(
        mut self,
        map_error: impl Fn(StoreError) -> Effect<S> + Send + Sync + 'static,
    ) -> Self {
        self.error_mapper = Some(Arc::new(map_error));
        self
    }

    /// Use `config` instead of the defaults
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Forward diagnostics at or above the configured minimum level to `sink`
    pub fn diagnostic_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Component name attached to diagnostics (default `AsyncStore`)
    pub fn component(mut self, name: impl Into<String>) -> Self {
        self.component = Some(name.into());
        self
    }

    /// Designate `thread` as the only context expected to call `receive`
    pub fn writer_thread(mut self, thread: ThreadId) -> Self {
        self.writer_thread = Some(thread);
        self
    }

    /// Designate the calling thread as the writer context
    pub fn writer_is_current_thread(self) -> Self {
        self.writer_thread(std::thread::current().id())
    }

    /// Spawn onto `runtime` instead of the runtime current at `build`
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Leave the store inactive after building
    pub fn inactive(mut self) -> Self {
        self.activate = false;
        self
    }

    /// Build the store, activating it unless [`StoreBuilder::inactive`] was set.
    pub fn build(self) -> StoreResult<Store<S, E>> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| StoreError::NoRuntime)?,
        };

        let component = self
            .component
            .unwrap_or_else(|| DEFAULT_COMPONENT.to_string());
        let mut diagnostics = Diagnostics::new(component);
        if let Some(sink) = self.sink {
            diagnostics = diagnostics.with_sink(sink, self.config.min_diagnostic_level);
        }

        let error_mapper: ErrorMapper<S> = match self.error_mapper {
            Some(mapper) => mapper,
            None => Arc::new(|_: StoreError| Effect::None),
        };
        let strategy = self.config.map_strategy;
        let (will_change, _) = broadcast::channel(WILL_CHANGE_CAPACITY);

        tracing::debug!(
            component = diagnostics.component(),
            ?strategy,
            buffering = ?self.config.default_buffering,
            "building store"
        );

        let store = Store {
            inner: Arc::new(StoreInner {
                state: RwLock::new(self.state),
                env: self.env,
                error_mapper,
                cancellables: CancellationRegistry::new(strategy, diagnostics.clone()),
                distributor: Distributor::new(strategy, diagnostics.clone()),
                config: self.config,
                diagnostics,
                will_change,
                runtime,
                writer_thread: self.writer_thread,
                lifecycle: Mutex::new(Lifecycle::inactive()),
            }),
        };

        if self.activate {
            store.activate();
        }
        Ok(store)
    }
}

impl<S, E> fmt::Debug for StoreBuilder<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("config", &self.config)
            .field("component", &self.component)
            .field("has_sink", &self.sink.is_some())
            .field("writer_thread", &self.writer_thread)
            .field("activate", &self.activate)
            .finish_non_exhaustive()
    }
}
