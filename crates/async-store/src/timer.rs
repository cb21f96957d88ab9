//! Drift-corrected periodic timer
//!
//! Each step sleeps for the interval minus the overrun measured on the
//! previous step. An overrun of a whole interval or more is not compensated.

use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::diagnostics::{Diagnostic, Diagnostics};

/// One timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// When the tick fired
    pub at: Instant,
    /// 1-based tick number
    pub sequence: u64,
}

/// Lazy, infinite, single-pass sequence of [`Tick`]s.
#[derive(Debug)]
pub struct PeriodicTimer {
    interval: Duration,
    offset: Duration,
    sequence: u64,
    cancel: Option<CancelToken>,
    diagnostics: Diagnostics,
    finished: bool,
}

impl PeriodicTimer {
    /// Timer that only stops when dropped
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            offset: Duration::ZERO,
            sequence: 0,
            cancel: None,
            diagnostics: Diagnostics::new("PeriodicTimer"),
            finished: false,
        }
    }

    /// Timer that ends once `token` is cancelled
    pub fn with_cancel(interval: Duration, token: CancelToken) -> Self {
        Self {
            cancel: Some(token),
            ..Self::new(interval)
        }
    }

    /// Report cancellation through `diagnostics`
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Target interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next tick. `None` once cancelled.
    pub async fn next(&mut self) -> Option<Tick> {
        if self.finished {
            return None;
        }

        let start = Instant::now();
        let target = if self.offset < self.interval {
            self.interval - self.offset
        } else {
            self.interval
        };

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        self.finished = true;
                        self.diagnostics.emit(Diagnostic::TimerCancelled);
                        return None;
                    }
                    _ = tokio::time::sleep(target) => {}
                }
            }
            None => tokio::time::sleep(target).await,
        }

        let now = Instant::now();
        self.offset = now.duration_since(start).saturating_sub(target);
        self.sequence += 1;
        Some(Tick {
            at: now,
            sequence: self.sequence,
        })
    }

    /// Consume the timer as a stream of ticks
    pub fn into_stream(self) -> BoxStream<'static, Tick> {
        futures::stream::unfold(self, |mut timer| async move {
            timer.next().await.map(|tick| (tick, timer))
        })
        .boxed()
    }
}
