use std::collections::VecDeque;

use dp_query_types::TransportError;
use tokio::sync::{Mutex, Notify};

struct BufferState<T> {
    queue: VecDeque<T>,
    accepting: bool,
}

/// Bounded, blocking FIFO queue (C1) acting as the seam between Stream
/// Workers (producers) and the Correlator (consumer).
///
/// FIFO is guaranteed per producer; there is no ordering promise across
/// concurrent producers (§5). Built directly on `Mutex` + `Notify` rather
/// than `tokio::sync::mpsc` because the spec's `shutdown`/`shutdownNow`/
/// `awaitEmpty` contract needs more control over waiter wake-up than a
/// plain channel exposes.
pub struct MessageBuffer<T> {
    state: Mutex<BufferState<T>>,
    capacity: usize,
    space_available: Notify,
    item_available: Notify,
    became_empty: Notify,
}

impl<T> MessageBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "MessageBuffer capacity must be positive");
        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::with_capacity(capacity),
                accepting: true,
            }),
            capacity,
            space_available: Notify::new(),
            item_available: Notify::new(),
            became_empty: Notify::new(),
        }
    }

    /// Enqueues `msg`, blocking while the buffer is full. Fails with
    /// `NotAccepting` once `shutdown`/`shutdown_now` has been called.
    pub async fn offer(&self, msg: T) -> Result<(), TransportError> {
        let mut msg = Some(msg);
        loop {
            let space_notified = self.space_available.notified();
            {
                let mut state = self.state.lock().await;
                if !state.accepting {
                    return Err(TransportError::NotAccepting);
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(msg.take().expect("msg consumed at most once"));
                    self.item_available.notify_one();
                    return Ok(());
                }
                // Full: fall through to wait and retry.
            }
            space_notified.await;
        }
    }

    /// Dequeues the next message, blocking while the buffer is empty.
    /// Fails with `Closed` once the buffer has been drained *and*
    /// `shutdown`/`shutdown_now` has been called.
    pub async fn take(&self) -> Result<T, TransportError> {
        loop {
            let item_notified = self.item_available.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.queue.pop_front() {
                    self.space_available.notify_one();
                    if state.queue.is_empty() {
                        self.became_empty.notify_waiters();
                    }
                    return Ok(item);
                }
                if !state.accepting {
                    return Err(TransportError::Closed);
                }
            }
            item_notified.await;
        }
    }

    /// Like `take`, but gives up after `timeout` and returns `Ok(None)`
    /// instead of blocking indefinitely.
    pub async fn poll(&self, timeout: std::time::Duration) -> Result<Option<T>, TransportError> {
        match tokio::time::timeout(timeout, self.take()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Stops accepting new messages, then waits for the queue to drain
    /// naturally via `take`/`poll` calls from the consumer side.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            state.accepting = false;
        }
        self.item_available.notify_waiters();
        self.await_empty().await;
    }

    /// Stops accepting new messages and immediately discards whatever is
    /// still queued, without waiting for a consumer to drain it.
    pub async fn shutdown_now(&self) {
        let mut state = self.state.lock().await;
        state.accepting = false;
        state.queue.clear();
        drop(state);
        self.item_available.notify_waiters();
        self.became_empty.notify_waiters();
    }

    /// Blocks until the queue size reaches zero. All concurrent waiters are
    /// released together once it does.
    pub async fn await_empty(&self) {
        loop {
            let empty_notified = self.became_empty.notified();
            {
                let state = self.state.lock().await;
                if state.queue.is_empty() {
                    return;
                }
            }
            empty_notified.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_accepting(&self) -> bool {
        self.state.lock().await.accepting
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;

    #[tokio::test]
    async fn offer_then_take_is_fifo_per_producer() {
        let buf = MessageBuffer::new(4);
        buf.offer(1).await.unwrap();
        buf.offer(2).await.unwrap();
        buf.offer(3).await.unwrap();
        assert_eq!(buf.take().await.unwrap(), 1);
        assert_eq!(buf.take().await.unwrap(), 2);
        assert_eq!(buf.take().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn offer_blocks_when_full_until_space_frees_up() {
        let buf = Arc::new(MessageBuffer::new(1));
        buf.offer(1).await.unwrap();

        let producer = {
            let buf = buf.clone();
            tokio::spawn(async move {
                buf.offer(2).await.unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(buf.len().await, 1, "second offer should still be blocked");

        assert_eq!(buf.take().await.unwrap(), 1);
        producer.await.unwrap();
        assert_eq!(buf.take().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn offer_after_shutdown_fails() {
        let buf = MessageBuffer::new(4);
        buf.shutdown().await;
        assert_eq!(buf.offer(1).await, Err(TransportError::NotAccepting));
    }

    #[tokio::test]
    async fn take_after_drain_and_shutdown_fails() {
        let buf = MessageBuffer::new(4);
        buf.offer(1).await.unwrap();
        let buf = Arc::new(buf);
        let shutdown = {
            let buf = buf.clone();
            tokio::spawn(async move { buf.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(buf.take().await.unwrap(), 1);
        shutdown.await.unwrap();
        assert_eq!(buf.take().await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn shutdown_now_discards_queued_messages() {
        let buf = MessageBuffer::new(4);
        buf.offer(1).await.unwrap();
        buf.offer(2).await.unwrap();
        buf.shutdown_now().await;
        assert_eq!(buf.len().await, 0);
        assert_eq!(buf.take().await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn await_empty_releases_all_waiters_together() {
        let buf = Arc::new(MessageBuffer::new(4));
        buf.offer(1).await.unwrap();

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let buf = buf.clone();
            waiters.push(tokio::spawn(async move {
                buf.await_empty().await;
            }));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.take().await.unwrap();
        for waiter in waiters {
            tokio::time::timeout(Duration::from_millis(200), waiter)
                .await
                .expect("await_empty waiter should resolve")
                .unwrap();
        }
    }
}
