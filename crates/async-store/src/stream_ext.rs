//! Stream combinators used by derived streams and bindings

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{ready, Stream, StreamExt};
use tokio::time::{Instant, Sleep};

/// Extension methods for [`Stream`]s of store values.
pub trait StoreStreamExt: Stream + Sized {
    /// Skip items equal to the one emitted just before them.
    fn remove_duplicates(self) -> RemoveDuplicates<Self>
    where
        Self: Unpin,
        Self::Item: PartialEq + Clone,
    {
        RemoveDuplicates {
            upstream: self,
            previous: None,
        }
    }

    /// Emit only the last item of each burst, `delay` after the burst's last
    /// item. A pending item is still emitted after upstream ends.
    fn debounce(self, delay: Duration) -> Debounce<Self>
    where
        Self: Unpin,
    {
        Debounce {
            upstream: Some(self),
            delay,
            pending: None,
            sleep: None,
        }
    }
}

impl<St: Stream> StoreStreamExt for St {}

// ─────────────────────────────────────────────────────────────────────────────
// Remove duplicates
// ─────────────────────────────────────────────────────────────────────────────

/// Stream returned by [`StoreStreamExt::remove_duplicates`].
#[must_use = "streams do nothing unless polled"]
pub struct RemoveDuplicates<St: Stream> {
    upstream: St,
    previous: Option<St::Item>,
}

impl<St: Stream + Unpin> Unpin for RemoveDuplicates<St> {}

impl<St: Stream> std::fmt::Debug for RemoveDuplicates<St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoveDuplicates")
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

impl<St> Stream for RemoveDuplicates<St>
where
    St: Stream + Unpin,
    St::Item: PartialEq + Clone,
{
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match ready!(this.upstream.poll_next_unpin(cx)) {
                Some(item) if this.previous.as_ref() == Some(&item) => continue,
                Some(item) => {
                    this.previous = Some(item.clone());
                    return Poll::Ready(Some(item));
                }
                None => return Poll::Ready(None),
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Debounce
// ─────────────────────────────────────────────────────────────────────────────

/// Stream returned by [`StoreStreamExt::debounce`].
#[must_use = "streams do nothing unless polled"]
pub struct Debounce<St: Stream> {
    upstream: Option<St>,
    delay: Duration,
    pending: Option<St::Item>,
    // Created on first item so construction needs no runtime.
    sleep: Option<Pin<Box<Sleep>>>,
}

impl<St: Stream + Unpin> Unpin for Debounce<St> {}

impl<St: Stream + Unpin> Stream for Debounce<St> {
    type Item = St::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        while let Some(upstream) = this.upstream.as_mut() {
            match upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => {
                    this.pending = Some(item);
                    let deadline = Instant::now() + this.delay;
                    match this.sleep.as_mut() {
                        Some(sleep) => sleep.as_mut().reset(deadline),
                        None => this.sleep = Some(Box::pin(tokio::time::sleep_until(deadline))),
                    }
                }
                Poll::Ready(None) => this.upstream = None,
                Poll::Pending => break,
            }
        }

        if this.pending.is_some() {
            if let Some(sleep) = this.sleep.as_mut() {
                ready!(sleep.as_mut().poll(cx));
                return Poll::Ready(this.pending.take());
            }
        }

        if this.upstream.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

impl<St: Stream> std::fmt::Debug for Debounce<St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debounce")
            .field("delay", &self.delay)
            .field("pending", &self.pending.is_some())
            .field("upstream_done", &self.upstream.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, BoxStream};
    use tokio::sync::mpsc;

    fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|v| (v, rx)) }).boxed()
    }

    #[tokio::test]
    async fn test_remove_duplicates() {
        let values: Vec<u32> = stream::iter([1, 1, 2, 2, 2, 1, 3, 3])
            .remove_duplicates()
            .collect()
            .await;
        assert_eq!(values, vec![1, 2, 1, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_emits_last_value_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let delay = Duration::from_millis(250);
        let started = Instant::now();
        let consumer = tokio::spawn(async move {
            receiver_stream(rx)
                .debounce(delay)
                .map(|v: u32| (v, Instant::now()))
                .collect::<Vec<_>>()
                .await
        });

        for value in 0..=100 {
            tx.send(value).unwrap();
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(tx);

        let emitted = consumer.await.unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, 100);
        assert!(emitted[0].1 - started >= delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_separate_bursts_each_emit() {
        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(async move {
            receiver_stream(rx)
                .debounce(Duration::from_millis(100))
                .collect::<Vec<u32>>()
                .await
        });

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(3).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(4).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(tx);

        assert_eq!(consumer.await.unwrap(), vec![2, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_value_emitted_after_upstream_ends() {
        let values: Vec<u32> = stream::iter([1, 2, 3])
            .debounce(Duration::from_millis(100))
            .collect()
            .await;
        assert_eq!(values, vec![3]);
    }

    #[tokio::test]
    async fn test_empty_upstream_ends() {
        let values: Vec<u32> = stream::empty::<u32>()
            .debounce(Duration::from_millis(100))
            .collect()
            .await;
        assert!(values.is_empty());
    }
}
