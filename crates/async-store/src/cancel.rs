//! Keyed cancellation
//!
//! [`CancelToken`] is a cooperative cancellation signal built on a Tokio
//! `watch` channel. Tokens form chains: a child observes its own signal and
//! every ancestor's, which lets a store-wide lifecycle token stop every task
//! spawned during one activation.
//!
//! [`CancellationRegistry`] maps identifiers to cancel actions or task tokens
//! and enforces at most one live entry per identifier.

use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::atomic_map::{KeyedAtomicMap, KeyedStore, MapStrategy};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::id::Id;

static NEXT_TOKEN_SERIAL: AtomicU64 = AtomicU64::new(1);

struct TokenState {
    serial: u64,
    tx: watch::Sender<bool>,
}

impl TokenState {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            serial: NEXT_TOKEN_SERIAL.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Cooperative cancellation token.
///
/// Cloning shares the signal. Cancelling is idempotent.
#[derive(Clone)]
pub struct CancelToken {
    // Own state first, then ancestors.
    chain: Arc<[Arc<TokenState>]>,
}

impl CancelToken {
    /// Create a root token
    pub fn new() -> Self {
        Self {
            chain: Arc::from(vec![Arc::new(TokenState::new())]),
        }
    }

    /// Create a token that is cancelled by itself or by any ancestor of
    /// `self` (including `self`).
    pub fn child(&self) -> Self {
        let mut chain = Vec::with_capacity(self.chain.len() + 1);
        chain.push(Arc::new(TokenState::new()));
        chain.extend(self.chain.iter().cloned());
        Self {
            chain: Arc::from(chain),
        }
    }

    /// Request cancellation of this token and its descendants
    pub fn cancel(&self) {
        self.chain[0].tx.send_replace(true);
    }

    /// Non-blocking cancellation check
    pub fn is_cancelled(&self) -> bool {
        self.chain.iter().any(|state| state.is_cancelled())
    }

    /// Resolves once this token or an ancestor is cancelled
    pub async fn cancelled(&self) {
        let waits = self.chain.iter().map(|state| Box::pin(state.wait()));
        futures::future::select_all(waits).await;
    }

    /// Unique serial of this token, used to match registry entries
    pub fn serial(&self) -> u64 {
        self.chain[0].serial
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("serial", &self.serial())
            .field("depth", &self.chain.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A registered way of stopping something.
pub enum Canceller {
    /// Arbitrary cancel action, invoked at most once
    Action(Box<dyn FnOnce() + Send>),
    /// Running task observing a cancellation token
    Token(CancelToken),
}

impl Canceller {
    /// Wrap a cancel action
    pub fn action(action: impl FnOnce() + Send + 'static) -> Self {
        Self::Action(Box::new(action))
    }

    /// Invoke the cancellation
    pub fn cancel(self) {
        match self {
            Self::Action(action) => action(),
            Self::Token(token) => token.cancel(),
        }
    }

    fn token_serial(&self) -> Option<u64> {
        match self {
            Self::Action(_) => None,
            Self::Token(token) => Some(token.serial()),
        }
    }
}

impl From<CancelToken> for Canceller {
    fn from(token: CancelToken) -> Self {
        Self::Token(token)
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(_) => f.write_str("Canceller::Action"),
            Self::Token(token) => f.debug_tuple("Canceller::Token").field(token).finish(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier → cancel action registry.
///
/// Cancellers are always removed from the map before they are invoked, and
/// invoked outside the map's critical section, so an action may itself call
/// back into the registry.
pub struct CancellationRegistry {
    entries: KeyedAtomicMap<Canceller>,
    diagnostics: Diagnostics,
}

impl CancellationRegistry {
    /// Create an empty registry
    pub fn new(strategy: MapStrategy, diagnostics: Diagnostics) -> Self {
        Self {
            entries: KeyedAtomicMap::new(strategy),
            diagnostics,
        }
    }

    /// Register `canceller` under `id`, cancelling any existing entry first.
    pub fn store(&self, id: Id, canceller: impl Into<Canceller>) {
        let mut pending = canceller.into();
        loop {
            if let Some(previous) = self.entries.take(&id) {
                self.diagnostics
                    .emit(Diagnostic::IdentifierOverridden { id: id.clone() });
                previous.cancel();
            }

            // Only install into a vacant slot; a concurrent store that slipped
            // in between is cancelled on the next pass.
            let rejected = self.entries.perform(|entries| match entries.entry(id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(pending);
                    None
                }
                Entry::Occupied(_) => Some(pending),
            });
            match rejected {
                None => return,
                Some(canceller) => pending = canceller,
            }
        }
    }

    /// Invoke and remove the entry for `id`, if any
    pub fn cancel(&self, id: &Id) -> bool {
        match self.entries.take(id) {
            Some(canceller) => {
                tracing::trace!(%id, "cancelling registered entry");
                canceller.cancel();
                true
            }
            None => false,
        }
    }

    /// Invoke and remove every entry
    pub fn cancel_all(&self) -> usize {
        let drained = self.entries.clear();
        let count = drained.len();
        for (_, canceller) in drained {
            canceller.cancel();
        }
        count
    }

    /// Remove the entry for `id` without invoking it, but only if it is the
    /// token of the task that just finished.
    pub fn release(&self, id: &Id, token: &CancelToken) -> bool {
        let serial = token.serial();
        self.entries.perform(|entries| {
            if entries.get(id).and_then(Canceller::token_serial) == Some(serial) {
                entries.remove(id);
                true
            } else {
                false
            }
        })
    }

    /// Whether an entry exists for `id`
    pub fn contains(&self, id: &Id) -> bool {
        self.entries.perform(|entries| entries.contains_key(id))
    }

    /// Identifiers currently registered
    pub fn ids(&self) -> Vec<Id> {
        self.entries.keys()
    }

    /// Number of registered entries
    pub fn len(&self) -> usize {
        self.entries.count()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new(MapStrategy::default(), Diagnostics::default())
    }
}

impl Drop for CancellationRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

impl fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("strategy", &self.entries.strategy())
            .field("len", &self.len())
            .finish()
    }
}
