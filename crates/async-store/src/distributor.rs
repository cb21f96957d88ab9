//! Multi-subscriber value distributor
//!
//! Each subscriber owns one [`ChannelStream`], opened under an identifier with
//! its own [`BufferingPolicy`]. [`Distributor::publish`] pushes a value into
//! every open channel without suspending; channels whose consumer went away
//! are pruned on the next publish.
//!
//! Per channel, values arrive in publish order. Nothing is promised about the
//! relative timing of different channels.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::task::AtomicWaker;
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::atomic_map::{KeyedAtomicMap, KeyedStore, MapStrategy};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::errors::StoreError;
use crate::id::Id;

/// How a channel buffers values its consumer has not read yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferingPolicy {
    /// Never drop; memory grows with the backlog
    #[default]
    Unbounded,
    /// Keep only the `n` most recent unread values, dropping older ones
    BufferNewest(usize),
}

impl std::str::FromStr for BufferingPolicy {
    type Err = StoreError;

    /// Parses `unbounded` or `newest:<n>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "unbounded" {
            return Ok(Self::Unbounded);
        }
        s.strip_prefix("newest:")
            .and_then(|n| n.trim().parse::<usize>().ok())
            .map(Self::BufferNewest)
            .ok_or_else(|| {
                StoreError::config(format!(
                    "unknown buffering policy '{s}' (expected 'unbounded' or 'newest:<n>')"
                ))
            })
    }
}

/// Outcome of pushing one value into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldResult {
    /// Buffered for the consumer
    Enqueued,
    /// Buffered, but the policy discarded an older (or this) value
    Dropped,
    /// The consumer is gone or the channel was finished
    Terminated,
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel
// ─────────────────────────────────────────────────────────────────────────────

struct ChannelQueue<V> {
    buffer: VecDeque<V>,
    finished: bool,
    consumer_alive: bool,
}

struct ChannelShared<V> {
    queue: Mutex<ChannelQueue<V>>,
    waker: AtomicWaker,
}

struct ChannelSender<V> {
    shared: Arc<ChannelShared<V>>,
    policy: BufferingPolicy,
}

impl<V> ChannelSender<V> {
    fn yield_value(&self, value: V) -> YieldResult {
        let result = {
            let mut queue = self.shared.queue.lock();
            if queue.finished || !queue.consumer_alive {
                return YieldResult::Terminated;
            }
            match self.policy {
                BufferingPolicy::Unbounded => {
                    queue.buffer.push_back(value);
                    YieldResult::Enqueued
                }
                BufferingPolicy::BufferNewest(0) => YieldResult::Dropped,
                BufferingPolicy::BufferNewest(limit) => {
                    let mut result = YieldResult::Enqueued;
                    while queue.buffer.len() >= limit {
                        queue.buffer.pop_front();
                        result = YieldResult::Dropped;
                    }
                    queue.buffer.push_back(value);
                    result
                }
            }
        };
        self.shared.waker.wake();
        result
    }

    fn finish(&self) {
        self.shared.queue.lock().finished = true;
        self.shared.waker.wake();
    }
}

// A removed or dropped sender always ends its consumer's stream.
impl<V> Drop for ChannelSender<V> {
    fn drop(&mut self) {
        self.finish();
    }
}

fn channel<V>(id: Id, policy: BufferingPolicy) -> (ChannelSender<V>, ChannelStream<V>) {
    let shared = Arc::new(ChannelShared {
        queue: Mutex::new(ChannelQueue {
            buffer: VecDeque::new(),
            finished: false,
            consumer_alive: true,
        }),
        waker: AtomicWaker::new(),
    });
    (
        ChannelSender {
            shared: shared.clone(),
            policy,
        },
        ChannelStream { id, shared },
    )
}

/// Consumer half of a distributor channel.
///
/// Yields buffered values in publish order and ends once the channel is
/// closed and drained. Dropping it terminates the channel.
pub struct ChannelStream<V> {
    id: Id,
    shared: Arc<ChannelShared<V>>,
}

impl<V> ChannelStream<V> {
    /// Identifier the channel was opened under
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// `Some(Some(v))` for a value, `Some(None)` at end of stream, `None` if
    /// nothing is buffered yet.
    fn poll_queue(&self) -> Option<Option<V>> {
        let mut queue = self.shared.queue.lock();
        match queue.buffer.pop_front() {
            Some(value) => Some(Some(value)),
            None if queue.finished => Some(None),
            None => None,
        }
    }

    /// Take a buffered value without waiting
    pub fn try_recv(&mut self) -> Option<V> {
        self.poll_queue().flatten()
    }

    /// Wait for the next value; `None` once the channel is closed and drained
    pub async fn recv(&mut self) -> Option<V> {
        futures::StreamExt::next(self).await
    }
}

impl<V> Stream for ChannelStream<V> {
    type Item = V;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<V>> {
        let this = self.get_mut();
        if let Some(next) = this.poll_queue() {
            return Poll::Ready(next);
        }
        this.shared.waker.register(cx.waker());
        match this.poll_queue() {
            Some(next) => Poll::Ready(next),
            None => Poll::Pending,
        }
    }
}

impl<V> Drop for ChannelStream<V> {
    fn drop(&mut self) {
        let mut queue = self.shared.queue.lock();
        queue.consumer_alive = false;
        queue.buffer.clear();
    }
}

impl<V> fmt::Debug for ChannelStream<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("ChannelStream")
            .field("id", &self.id)
            .field("buffered", &queue.buffer.len())
            .field("finished", &queue.finished)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Distributor
// ─────────────────────────────────────────────────────────────────────────────

/// Fans every published value out to all open subscriber channels.
pub struct Distributor<V> {
    channels: KeyedAtomicMap<ChannelSender<V>>,
    diagnostics: Diagnostics,
}

/// Diagnostics a distributor operation produced but has not emitted yet.
///
/// Returned by the `*_deferred` operations so a caller holding a lock can
/// emit them once the lock is released.
#[derive(Debug, Default)]
#[must_use = "deferred diagnostics are lost unless emitted"]
pub struct Deferred {
    diagnostics: Vec<Diagnostic>,
}

impl Deferred {
    /// Diagnostics waiting to be emitted
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Emit everything through `diagnostics`
    pub fn emit(self, diagnostics: &Diagnostics) {
        for diagnostic in self.diagnostics {
            diagnostics.emit(diagnostic);
        }
    }
}

impl<V> Distributor<V> {
    /// Whether a channel is open under `id`
    pub fn contains(&self, id: &Id) -> bool {
        self.channels.with_entries(|channels| channels.contains_key(id))
    }

    /// Number of open channels
    pub fn len(&self) -> usize {
        self.channels.with_entries(|channels| channels.len())
    }

    /// Whether no channel is open
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handle the distributor reports through
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

impl<V: Clone + Send> Distributor<V> {
    /// Create a distributor with no channels
    pub fn new(strategy: MapStrategy, diagnostics: Diagnostics) -> Self {
        Self {
            channels: KeyedAtomicMap::new(strategy),
            diagnostics,
        }
    }

    /// Open a channel under `id`, seeded with `initial`.
    ///
    /// An existing channel under the same identifier is finished first.
    pub fn open_channel(&self, id: Id, initial: V, policy: BufferingPolicy) -> ChannelStream<V> {
        let (stream, deferred) = self.open_channel_deferred(id, initial, policy);
        deferred.emit(&self.diagnostics);
        stream
    }

    /// [`Distributor::open_channel`], handing diagnostics back to the caller.
    pub fn open_channel_deferred(
        &self,
        id: Id,
        initial: V,
        policy: BufferingPolicy,
    ) -> (ChannelStream<V>, Deferred) {
        let (sender, stream) = channel(id.clone(), policy);
        sender.yield_value(initial);

        let mut deferred = Deferred::default();
        if let Some(previous) = self.channels.set(id.clone(), Some(sender)) {
            deferred
                .diagnostics
                .push(Diagnostic::ChannelOverridden { id });
            previous.finish();
        }
        (stream, deferred)
    }

    /// Deliver `value` to every open channel, returning how many accepted it.
    pub fn publish(&self, value: &V) -> usize {
        let (delivered, deferred) = self.publish_deferred(value);
        deferred.emit(&self.diagnostics);
        delivered
    }

    /// [`Distributor::publish`], handing diagnostics back to the caller.
    pub fn publish_deferred(&self, value: &V) -> (usize, Deferred) {
        let mut dropped = Vec::new();
        let mut terminated = Vec::new();

        let delivered = self.channels.perform(|channels| {
            let mut delivered = 0;
            for (id, sender) in channels.iter() {
                match sender.yield_value(value.clone()) {
                    YieldResult::Enqueued => delivered += 1,
                    YieldResult::Dropped => {
                        delivered += 1;
                        dropped.push(id.clone());
                    }
                    YieldResult::Terminated => terminated.push(id.clone()),
                }
            }
            for id in &terminated {
                channels.remove(id);
            }
            delivered
        });

        let mut deferred = Deferred::default();
        if delivered == 0 && terminated.is_empty() {
            deferred.diagnostics.push(Diagnostic::NoSubscribers);
        }
        deferred
            .diagnostics
            .extend(dropped.into_iter().map(|id| Diagnostic::ValueDropped { id }));
        deferred
            .diagnostics
            .extend(terminated.into_iter().map(|id| Diagnostic::ChannelTerminated { id }));
        (delivered, deferred)
    }

    /// Finish and remove the channel for `id`
    pub fn close(&self, id: &Id) -> bool {
        match self.channels.take(id) {
            Some(sender) => {
                sender.finish();
                true
            }
            None => false,
        }
    }

    /// Finish and remove every channel
    pub fn close_all(&self) -> usize {
        let drained = self.channels.clear();
        let count = drained.len();
        for (_, sender) in drained {
            sender.finish();
        }
        count
    }
}

impl<V: Clone + Send> Default for Distributor<V> {
    fn default() -> Self {
        Self::new(MapStrategy::default(), Diagnostics::default())
    }
}

impl<V> fmt::Debug for Distributor<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distributor")
            .field("strategy", &self.channels.strategy())
            .finish_non_exhaustive()
    }
}
