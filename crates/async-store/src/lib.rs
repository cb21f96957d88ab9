//! Async Store - Effect-Interpreting State Container
//!
//! One piece of state, mutated only through a small closed algebra of
//! [`Effect`]s that a central reducer interprets.
//!
//! # Components
//!
//! - [`KeyedAtomicMap`]: mutually exclusive `Id -> V` map with a mutex-backed
//!   and a lock-free strategy
//! - [`CancellationRegistry`]: at most one live cancel action per identifier
//! - [`Distributor`]: fans every published value out to per-subscriber
//!   channels
//! - [`PeriodicTimer`]: drift-corrected tick sequence
//! - [`StoreStreamExt::debounce`]: last value of each burst after a quiet period
//! - [`Store`]: the reducer, serialized writer and lifecycle
//!
//! # Guarantees
//!
//! - Effects submitted through [`Store::receive`] are picked up in order.
//! - `Set` mutations never interleave, and each published snapshot is the
//!   result of exactly one mutation.
//! - `Concatenate` members never overlap; `Merge` members may.
//! - Reusing an identifier cancels whatever was registered under it first.
//!
//! ```ignore
//! let store = Store::new(0u32, (), |_| Effect::None)?;
//! store.receive(Effect::concatenate([
//!     Effect::sleep(Duration::from_millis(10)),
//!     Effect::set(|count| *count += 1),
//! ]));
//! ```

#![warn(missing_docs)]

/// Keyed maps with interchangeable mutual-exclusion strategies
pub mod atomic_map;

/// Cancel tokens and the keyed cancellation registry
pub mod cancel;

/// Waiting for a condition on a store with a deadline
pub mod condition;

/// Store configuration
pub mod config;

/// Leveled diagnostics and sinks
pub mod diagnostics;

/// Multi-subscriber value distributor
pub mod distributor;

/// Effect algebra and field accessors
pub mod effect;

/// Unified error handling
pub mod errors;

/// Type-erased identifiers
pub mod id;

/// The effect-interpreting store
pub mod store;

/// Stream combinators
pub mod stream_ext;

/// Drift-corrected periodic timer
pub mod timer;

// === Public API Re-exports ===

pub use atomic_map::{KeyedAtomicMap, KeyedStore, LockedMap, MapStrategy, SpinMap};
pub use cancel::{CancelToken, CancellationRegistry, Canceller};
pub use condition::{StoreCondition, WaitState};
pub use config::StoreConfig;
pub use diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticSink, Diagnostics};
pub use distributor::{BufferingPolicy, ChannelStream, Deferred, Distributor, YieldResult};
pub use effect::{Effect, EffectFuture, Lens};
pub use errors::{StoreError, StoreResult};
pub use id::Id;
pub use store::{Binding, ErrorMapper, Store, StoreBuilder};
pub use stream_ext::{Debounce, RemoveDuplicates, StoreStreamExt};
pub use timer::{PeriodicTimer, Tick};
