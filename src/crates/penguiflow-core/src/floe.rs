//! Bounded FIFO queue connecting two nodes.
//!
//! A [`Floe`] is a thin, typed wrapper over `tokio::sync::mpsc`: a bounded
//! channel gives us backpressure (`put` suspends the producer once the
//! channel is full) for free, and FIFO ordering is the channel's own
//! guarantee. Multiple producers can hold clones of [`FloeSender`]; there is
//! exactly one [`FloeReceiver`] per floe, matching the spec's "multi-producer
//! / single-consumer" shape.

use crate::error::FloeError;
use tokio::sync::mpsc;

/// Default bounded capacity for a floe when the edge does not override it.
pub const DEFAULT_CAPACITY: usize = 64;

/// Construction-time configuration for one edge's queue.
#[derive(Debug, Clone, Copy)]
pub struct FloeConfig {
    pub capacity: usize,
}

impl Default for FloeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// The producer half of a floe. Cheap to clone for fan-in.
#[derive(Clone)]
pub struct FloeSender<T> {
    inner: mpsc::Sender<T>,
}

/// The consumer half of a floe. Not cloneable: exactly one consumer per floe.
pub struct FloeReceiver<T> {
    inner: mpsc::Receiver<T>,
}

/// Construct a bounded floe, returning its producer and consumer halves.
pub fn floe<T>(config: FloeConfig) -> (FloeSender<T>, FloeReceiver<T>) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    (FloeSender { inner: tx }, FloeReceiver { inner: rx })
}

impl<T> FloeSender<T> {
    /// Await capacity, then enqueue `item`. This is the only way items enter
    /// a floe; it is the suspension point backpressure is expressed through.
    pub async fn put(&self, item: T) -> Result<(), FloeError> {
        self.inner.send(item).await.map_err(|_| FloeError::Closed)
    }

    /// Enqueue without waiting; fails immediately if the floe is full.
    pub fn put_nowait(&self, item: T) -> Result<(), FloeError> {
        self.inner.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => FloeError::Full,
            mpsc::error::TrySendError::Closed(_) => FloeError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Approximate number of items currently queued, derived from the
    /// channel's remaining capacity. Used only for best-effort telemetry on
    /// [`crate::events::FlowEvent`]; tokio's bounded channel does not expose
    /// an exact length.
    pub fn depth_hint(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    pub fn max_capacity(&self) -> usize {
        self.inner.max_capacity()
    }
}

impl<T> FloeReceiver<T> {
    /// Await the next item in FIFO order.
    pub async fn get(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    /// Pop an item if one is already queued, without suspending.
    pub fn try_get(&mut self) -> Result<T, FloeError> {
        self.inner.try_recv().map_err(|e| match e {
            mpsc::error::TryRecvError::Empty => FloeError::Empty,
            mpsc::error::TryRecvError::Disconnected => FloeError::Closed,
        })
    }

    /// Non-suspending poll used by [`crate::merge::FairMerge`] to implement
    /// fair round-robin selection across several receivers.
    pub(crate) fn poll_get(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<T>> {
        self.inner.poll_recv(cx)
    }
}
