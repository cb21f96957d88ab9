//! Effect algebra
//!
//! An [`Effect`] describes a state change or asynchronous action. Effects are
//! values; nothing happens until a [`Store`](crate::Store) interprets them.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::errors::StoreResult;
use crate::id::Id;
use crate::timer::Tick;

/// Asynchronous operation producing the next effect.
pub type EffectFuture<S> = BoxFuture<'static, StoreResult<Effect<S>>>;

/// Synchronous state mutator.
pub type Mutator<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Maps a timer tick to an effect.
pub type TickMapper<S> = Arc<dyn Fn(Tick) -> Effect<S> + Send + Sync>;

/// Closed set of effects over a state `S`.
pub enum Effect<S> {
    /// No-op
    None,
    /// Mutate the state through the serialized writer
    Set(Mutator<S>),
    /// Run an operation and interpret the effect it produces
    Task {
        /// The operation
        operation: EffectFuture<S>,
        /// Registration identifier; a later task under the same id cancels this one
        id: Option<Id>,
    },
    /// Suspend the current interpretation path
    Sleep(Duration),
    /// Interpret an effect for every tick of a periodic timer
    Timer {
        /// Target tick spacing
        interval: Duration,
        /// Registration identifier
        id: Id,
        /// Tick to effect mapping
        map_effect: TickMapper<S>,
    },
    /// A task preceded by a cancellable delay
    Debounce {
        /// The operation run once the delay elapses
        operation: EffectFuture<S>,
        /// Registration identifier shared by the whole burst
        id: Id,
        /// Quiet period
        delay: Duration,
    },
    /// Cancel whatever is registered under an identifier
    Cancel(Id),
    /// Interpret all members concurrently
    Merge(Vec<Effect<S>>),
    /// Interpret members one after another, each fully awaited
    Concatenate(Vec<Effect<S>>),
}

impl<S: 'static> Effect<S> {
    /// Mutate the state
    pub fn set(mutator: impl FnOnce(&mut S) + Send + 'static) -> Self {
        Self::Set(Box::new(mutator))
    }

    /// Set one field of the state through `lens`
    pub fn assign<T: Send + 'static>(lens: &Lens<S, T>, value: T) -> Self {
        let lens = lens.clone();
        Self::set(move |state| lens.set(state, value))
    }

    /// Unregistered task
    pub fn task<F>(operation: F) -> Self
    where
        F: Future<Output = StoreResult<Effect<S>>> + Send + 'static,
    {
        Self::Task {
            operation: operation.boxed(),
            id: None,
        }
    }

    /// Task registered under `id`
    pub fn task_with_id<F>(id: impl Into<Id>, operation: F) -> Self
    where
        F: Future<Output = StoreResult<Effect<S>>> + Send + 'static,
    {
        Self::Task {
            operation: operation.boxed(),
            id: Some(id.into()),
        }
    }

    /// Task whose operation receives `data`
    pub fn data_task<D, F, Fut>(data: D, operation: F, id: Option<Id>) -> Self
    where
        F: FnOnce(D) -> Fut,
        Fut: Future<Output = StoreResult<Effect<S>>> + Send + 'static,
    {
        Self::Task {
            operation: operation(data).boxed(),
            id,
        }
    }

    /// Suspend for `duration`
    pub fn sleep(duration: Duration) -> Self {
        Self::Sleep(duration)
    }

    /// Periodic timer registered under `id`
    pub fn timer(
        interval: Duration,
        id: impl Into<Id>,
        map_effect: impl Fn(Tick) -> Effect<S> + Send + Sync + 'static,
    ) -> Self {
        Self::Timer {
            interval,
            id: id.into(),
            map_effect: Arc::new(map_effect),
        }
    }

    /// Debounced task registered under `id`
    pub fn debounce<F>(operation: F, id: impl Into<Id>, delay: Duration) -> Self
    where
        F: Future<Output = StoreResult<Effect<S>>> + Send + 'static,
    {
        Self::Debounce {
            operation: operation.boxed(),
            id: id.into(),
            delay,
        }
    }

    /// Cancel the registration under `id`
    pub fn cancel(id: impl Into<Id>) -> Self {
        Self::Cancel(id.into())
    }

    /// Concurrent composition
    pub fn merge(effects: impl IntoIterator<Item = Effect<S>>) -> Self {
        Self::Merge(effects.into_iter().collect())
    }

    /// Sequential composition
    pub fn concatenate(effects: impl IntoIterator<Item = Effect<S>>) -> Self {
        Self::Concatenate(effects.into_iter().collect())
    }
}

impl<S> Effect<S> {
    /// Whether this is the no-op effect
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Whether this is a `Debounce`
    pub fn is_debounce(&self) -> bool {
        matches!(self, Self::Debounce { .. })
    }

    /// Whether a `Debounce` appears anywhere beneath a `Concatenate`.
    ///
    /// Such a debounce never has a competing entry to cancel, so it is never
    /// debounced.
    pub fn has_concatenated_debounce(&self) -> bool {
        let mut pending = vec![(self, false)];
        while let Some((effect, under_concatenate)) = pending.pop() {
            match effect {
                Self::Debounce { .. } if under_concatenate => return true,
                Self::Merge(effects) => {
                    pending.extend(effects.iter().map(|e| (e, under_concatenate)));
                }
                Self::Concatenate(effects) => {
                    pending.extend(effects.iter().map(|e| (e, true)));
                }
                _ => {}
            }
        }
        false
    }
}

impl<S> Default for Effect<S> {
    fn default() -> Self {
        Self::None
    }
}

fn write_list<S>(f: &mut fmt::Formatter<'_>, name: &str, effects: &[Effect<S>]) -> fmt::Result {
    write!(f, "{name}([")?;
    for (i, effect) in effects.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{effect}")?;
    }
    f.write_str("])")
}

impl<S> fmt::Display for Effect<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Set(_) => write!(f, "Set({})", std::any::type_name::<S>()),
            Self::Task { id: Some(id), .. } => write!(f, "Task({id})"),
            Self::Task { id: None, .. } => f.write_str("Task"),
            Self::Sleep(duration) => write!(f, "Sleep({duration:?})"),
            Self::Timer { interval, id, .. } => write!(f, "Timer({id}, {interval:?})"),
            Self::Debounce { id, delay, .. } => write!(f, "Debounce({id}, {delay:?})"),
            Self::Cancel(id) => write!(f, "Cancel({id})"),
            Self::Merge(effects) => write_list(f, "Merge", effects),
            Self::Concatenate(effects) => write_list(f, "Concatenate", effects),
        }
    }
}

impl<S> fmt::Debug for Effect<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lens
// ─────────────────────────────────────────────────────────────────────────────

/// Explicit getter/setter pair addressing a `T` inside an `S`.
pub struct Lens<S, T> {
    get: Arc<dyn Fn(&S) -> T + Send + Sync>,
    set: Arc<dyn Fn(&mut S, T) + Send + Sync>,
}

impl<S, T> Lens<S, T> {
    /// Build a lens from a getter and a setter
    pub fn new(
        get: impl Fn(&S) -> T + Send + Sync + 'static,
        set: impl Fn(&mut S, T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            get: Arc::new(get),
            set: Arc::new(set),
        }
    }

    /// Read the field
    pub fn get(&self, state: &S) -> T {
        (self.get)(state)
    }

    /// Write the field
    pub fn set(&self, state: &mut S, value: T) {
        (self.set)(state, value);
    }
}

impl<S: Clone + 'static> Lens<S, S> {
    /// Lens over the whole state
    pub fn identity() -> Self {
        Self::new(S::clone, |state, value| *state = value)
    }
}

impl<S, T> Clone for Lens<S, T> {
    fn clone(&self) -> Self {
        Self {
            get: self.get.clone(),
            set: self.set.clone(),
        }
    }
}

impl<S, T> fmt::Debug for Lens<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lens<{}, {}>",
            std::any::type_name::<S>(),
            std::any::type_name::<T>()
        )
    }
}
