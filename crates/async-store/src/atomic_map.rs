//! Keyed atomic maps
//!
//! A concurrency-safe `Id -> V` map whose operations are mutually exclusive,
//! including whole read-modify-write sequences run through
//! [`KeyedStore::perform`]. Two interchangeable strategies implement the same
//! contract:
//!
//! - [`LockedMap`] guards the map with a `parking_lot::Mutex`.
//! - [`SpinMap`] tags the map `ready`/`busy` with an atomic byte and acquires
//!   it with a compare-and-swap retry loop, never parking the thread.
//!
//! Operations never suspend and must not re-enter the same map.

// SpinMap hands out `&mut` access to its entries after winning the CAS; that
// needs an `UnsafeCell`, which is confined to this module.
#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::id::Id;

/// Mutual-exclusion contract shared by both map strategies.
pub trait KeyedStore<V>: Send + Sync {
    /// Run `operation` with exclusive access to the entries.
    fn perform<R>(&self, operation: impl FnOnce(&mut HashMap<Id, V>) -> R) -> R;

    /// Clone of the value stored under `id`
    fn get(&self, id: &Id) -> Option<V>
    where
        V: Clone,
    {
        self.perform(|entries| entries.get(id).cloned())
    }

    /// Store `value` under `id` (or remove it with `None`), returning the
    /// previous value.
    fn set(&self, id: Id, value: Option<V>) -> Option<V> {
        self.perform(|entries| match value {
            Some(value) => entries.insert(id, value),
            None => entries.remove(&id),
        })
    }

    /// Remove and return the value stored under `id`
    fn take(&self, id: &Id) -> Option<V> {
        self.perform(|entries| entries.remove(id))
    }

    /// Snapshot of the current identifiers
    fn keys(&self) -> Vec<Id> {
        self.perform(|entries| entries.keys().cloned().collect())
    }

    /// Number of entries
    fn count(&self) -> usize {
        self.perform(|entries| entries.len())
    }

    /// Remove every entry, returning them
    fn clear(&self) -> Vec<(Id, V)> {
        self.perform(|entries| entries.drain().collect())
    }
}

/// Which mutual-exclusion strategy backs a [`KeyedAtomicMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStrategy {
    /// `parking_lot::Mutex` around a `HashMap`
    Locked,
    /// Lock-free ready/busy tag with compare-and-swap retry
    #[default]
    Spin,
}

impl std::str::FromStr for MapStrategy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "locked" | "mutex" => Ok(Self::Locked),
            "spin" | "atomic" => Ok(Self::Spin),
            other => Err(StoreError::config(format!("unknown map strategy '{other}'"))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Locked strategy
// ─────────────────────────────────────────────────────────────────────────────

/// Mutex-guarded keyed map.
#[derive(Debug)]
pub struct LockedMap<V> {
    entries: Mutex<HashMap<Id, V>>,
}

impl<V> LockedMap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Exclusive access to the entries, without requiring `V: Send`
    pub fn with_entries<R>(&self, operation: impl FnOnce(&mut HashMap<Id, V>) -> R) -> R {
        operation(&mut self.entries.lock())
    }
}

impl<V> Default for LockedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send> KeyedStore<V> for LockedMap<V> {
    fn perform<R>(&self, operation: impl FnOnce(&mut HashMap<Id, V>) -> R) -> R {
        self.with_entries(operation)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Spin strategy
// ─────────────────────────────────────────────────────────────────────────────

const READY: u8 = 0;
const BUSY: u8 = 1;

/// Busy-wait iterations before yielding the thread between CAS attempts.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Lock-free keyed map guarded by an atomic ready/busy tag.
pub struct SpinMap<V> {
    state: AtomicU8,
    entries: UnsafeCell<HashMap<Id, V>>,
}

// SAFETY: `entries` is only reachable through `perform`, which holds the BUSY
// tag for the whole borrow, so at most one thread touches it at a time.
unsafe impl<V: Send> Sync for SpinMap<V> {}

impl<V> SpinMap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(READY),
            entries: UnsafeCell::new(HashMap::new()),
        }
    }

    fn acquire(&self) -> SpinGuard<'_> {
        let mut spins = 0u32;
        while self
            .state
            .compare_exchange_weak(READY, BUSY, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if spins < SPINS_BEFORE_YIELD {
                spins += 1;
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        SpinGuard { state: &self.state }
    }

    /// Exclusive access to the entries, without requiring `V: Send`
    pub fn with_entries<R>(&self, operation: impl FnOnce(&mut HashMap<Id, V>) -> R) -> R {
        let _guard = self.acquire();
        // SAFETY: the guard holds the BUSY tag until it drops at the end of
        // this scope, after the borrow below has ended.
        let entries = unsafe { &mut *self.entries.get() };
        operation(entries)
    }
}

impl<V> Default for SpinMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> std::fmt::Debug for SpinMap<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpinMap")
            .field("busy", &(self.state.load(Ordering::Relaxed) == BUSY))
            .finish_non_exhaustive()
    }
}

impl<V: Send> KeyedStore<V> for SpinMap<V> {
    fn perform<R>(&self, operation: impl FnOnce(&mut HashMap<Id, V>) -> R) -> R {
        self.with_entries(operation)
    }
}

/// Releases the BUSY tag on drop, including during unwinding.
struct SpinGuard<'a> {
    state: &'a AtomicU8,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.state.store(READY, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategy selection
// ─────────────────────────────────────────────────────────────────────────────

/// Keyed map whose strategy is chosen at construction.
#[derive(Debug)]
pub enum KeyedAtomicMap<V> {
    /// Mutex-guarded
    Locked(LockedMap<V>),
    /// CAS spin
    Spin(SpinMap<V>),
}

impl<V> KeyedAtomicMap<V> {
    /// Create an empty map using `strategy`
    pub fn new(strategy: MapStrategy) -> Self {
        match strategy {
            MapStrategy::Locked => Self::Locked(LockedMap::new()),
            MapStrategy::Spin => Self::Spin(SpinMap::new()),
        }
    }

    /// Strategy backing this map
    pub fn strategy(&self) -> MapStrategy {
        match self {
            Self::Locked(_) => MapStrategy::Locked,
            Self::Spin(_) => MapStrategy::Spin,
        }
    }

    /// Exclusive access to the entries, without requiring `V: Send`
    pub fn with_entries<R>(&self, operation: impl FnOnce(&mut HashMap<Id, V>) -> R) -> R {
        match self {
            Self::Locked(map) => map.with_entries(operation),
            Self::Spin(map) => map.with_entries(operation),
        }
    }
}

impl<V> Default for KeyedAtomicMap<V> {
    fn default() -> Self {
        Self::new(MapStrategy::default())
    }
}

impl<V: Send> KeyedStore<V> for KeyedAtomicMap<V> {
    fn perform<R>(&self, operation: impl FnOnce(&mut HashMap<Id, V>) -> R) -> R {
        self.with_entries(operation)
    }
}
