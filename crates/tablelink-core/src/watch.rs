//! One-shot subscriptions with a deadline.
//!
//! Both the issuer's wait for a terminal record status and the agent's watch
//! for the tabletop's own roll result are expressed as a `Subscription`: a
//! stream of candidate values that resolves on the first item, or times
//! out. The stream is dropped as soon as `resolve_once` returns, which is
//! what tears down the poll timer or the log receiver.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};

/// How a subscription ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome<T> {
    /// The first matching value arrived inside the window.
    Resolved(T),
    /// The window elapsed first.
    TimedOut,
    /// The source closed before anything matched.
    Closed,
}

impl<T> WatchOutcome<T> {
    /// Returns the resolved value, if any.
    pub fn resolved(self) -> Option<T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::TimedOut | Self::Closed => None,
        }
    }
}

/// A stream that resolves at most once within a fixed window.
pub struct Subscription<T> {
    stream: BoxStream<'static, T>,
    window: Duration,
}

impl<T: Send + 'static> Subscription<T> {
    /// Wraps an arbitrary stream.
    pub fn new<S>(stream: S, window: Duration) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            stream: stream.boxed(),
            window,
        }
    }

    /// Calls `probe` every `period` (the first call is immediate) and yields
    /// whatever it returns as `Some`.
    pub fn polling<F, Fut>(period: Duration, window: Duration, probe: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stream = stream::unfold((ticker, probe), |(mut ticker, mut probe)| async move {
            loop {
                ticker.tick().await;
                if let Some(found) = probe().await {
                    return Some((found, (ticker, probe)));
                }
            }
        });
        Self::new(stream, window)
    }

    /// Watches a broadcast receiver for the first message `matcher` maps to
    /// `Some`. Lagged messages are skipped.
    pub fn from_broadcast<M, F>(receiver: broadcast::Receiver<M>, window: Duration, matcher: F) -> Self
    where
        M: Clone + Send + 'static,
        F: FnMut(M) -> Option<T> + Send + 'static,
    {
        let stream = stream::unfold((receiver, matcher), |(mut receiver, mut matcher)| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        if let Some(found) = matcher(message) {
                            return Some((found, (receiver, matcher)));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "log watch lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Self::new(stream, window)
    }

    /// Waits for the first item, then unsubscribes.
    pub async fn resolve_once(mut self) -> WatchOutcome<T> {
        let outcome = match time::timeout(self.window, self.stream.next()).await {
            Ok(Some(value)) => WatchOutcome::Resolved(value),
            Ok(None) => WatchOutcome::Closed,
            Err(_) => WatchOutcome::TimedOut,
        };
        drop(self.stream);
        outcome
    }
}
