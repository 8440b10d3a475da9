//! Per-subscriber fanout of session events, built on [`tokio::sync::broadcast`].
//!
//! Publishing never waits on a consumer. Each subscriber reads at its own
//! pace from the shared ring; one that falls more than the capacity behind
//! skips its oldest unread events and resumes at the oldest retained one, so
//! a slow viewer loses history but always ends up holding the most recent
//! event. Receive order equals publish order.
//!
//! The channel rounds the capacity up to a power of two.
//!
//! A [`Subscription`] detaches on [`Subscription::unsubscribe`] or on drop.
//! Dropping the [`Fanout`] closes every subscription; pending events can
//! still be drained and then `recv` returns `None`.

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("no event pending")]
    Empty,
    #[error("subscription closed")]
    Closed,
}

pub struct Fanout<T> {
    tx: broadcast::Sender<T>,
    next_id: AtomicU64,
}

impl<T: Clone> Fanout<T> {
    /// `capacity` is the per-subscriber backlog bound; values below 1 are
    /// raised to 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(subscriber = id, "subscriber attached");
        Subscription {
            id,
            rx: Some(self.tx.subscribe()),
            dropped: 0,
        }
    }

    /// Delivers `event` to every current subscriber and returns how many
    /// received it.
    pub fn publish(&self, event: T) -> usize {
        // Fails only when nobody is subscribed.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription<T> {
    id: u64,
    rx: Option<broadcast::Receiver<T>>,
    dropped: u64,
}

impl<T: Clone> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn lagged(&mut self, missed: u64) {
        self.dropped += missed;
        tracing::debug!(subscriber = self.id, missed, "slow subscriber skipped events");
    }

    /// Waits for the next event. Returns `None` once the subscription is
    /// closed and its backlog is drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let result = self.rx.as_mut()?.recv().await;
            match result {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => self.lagged(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        use broadcast::error::TryRecvError as ChannelError;
        loop {
            let Some(rx) = self.rx.as_mut() else {
                return Err(TryRecvError::Closed);
            };
            match rx.try_recv() {
                Ok(event) => return Ok(event),
                Err(ChannelError::Lagged(missed)) => self.lagged(missed),
                Err(ChannelError::Empty) => return Err(TryRecvError::Empty),
                Err(ChannelError::Closed) => return Err(TryRecvError::Closed),
            }
        }
    }

    /// Events skipped because this subscriber fell too far behind.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Detaches from the fanout. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if self.rx.take().is_some() {
            tracing::debug!(subscriber = self.id, "subscriber detached");
        }
    }
}
