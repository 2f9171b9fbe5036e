//! In-memory transport backends for testing or local pipelines.

use std::{sync::Arc, time::Duration};

use tokio::sync::{mpsc, Mutex};

use crate::{
    transport::{RawPayload, ReceiveError, Receiver, Sender},
    Dispatch,
};

/// In-memory recording sender.
///
/// Stores every submitted [`Dispatch`] in a shared queue. It is useful for:
/// - Unit and integration testing
/// - Simulating message delivery without a real broker
/// - Debugging dispatch flows
pub struct InMemory<T> {
    dispatches: Arc<Mutex<Vec<Dispatch<T>>>>,
}

impl<T> InMemory<T> {
    /// Return all dispatches that have been "sent" and clear the internal
    /// queue.
    ///
    /// This consumes the internal queue and is primarily intended for
    /// testing purposes.
    pub async fn sent_dispatches(self) -> Vec<Dispatch<T>> {
        let mut queue = self.dispatches.lock_owned().await;
        std::mem::take(&mut *queue)
    }
}

impl<T> Clone for InMemory<T> {
    fn clone(&self) -> Self {
        Self {
            dispatches: Arc::clone(&self.dispatches),
        }
    }
}

impl<T> Default for InMemory<T> {
    /// Create a new empty in-memory sender.
    fn default() -> Self {
        Self {
            dispatches: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait::async_trait]
impl<T> Sender<T> for InMemory<T>
where
    T: Send,
{
    type Error = std::io::Error;

    /// "Send" a dispatch by appending it to the in-memory queue.
    ///
    /// The whole dispatch is stored under one lock acquisition, matching
    /// the atomic-submission contract.
    #[tracing::instrument(skip_all)]
    async fn send(&mut self, dispatch: Dispatch<T>) -> Result<(), Self::Error> {
        let mut queue = self.dispatches.lock().await;
        tracing::info!(
            partition_key = ?dispatch.partition_key,
            items = dispatch.items.len(),
            "Dispatch sent to in-memory queue",
        );
        queue.push(dispatch);
        Ok(())
    }
}

/// Create a loopback queue: a byte-oriented sender wired to a receiver.
///
/// Dispatched payloads come out of the receiver in submission order, which
/// makes full send → transport → mediator round-trips possible without a
/// broker.
pub fn queue() -> (InMemoryQueue, InMemoryReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (InMemoryQueue { tx }, InMemoryReceiver { rx })
}

/// Sending half of an in-memory loopback queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    tx: mpsc::UnboundedSender<RawPayload>,
}

impl InMemoryQueue {
    /// Push a raw payload directly, bypassing the dispatch pipeline.
    ///
    /// Useful for injecting malformed messages in tests.
    pub fn push_raw(&self, payload: impl Into<RawPayload>) -> Result<(), std::io::Error> {
        self.tx
            .send(payload.into())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "receiver dropped"))
    }
}

#[async_trait::async_trait]
impl Sender<RawPayload> for InMemoryQueue {
    type Error = std::io::Error;

    /// Forward every payload of the dispatch to the receiving half, in
    /// order.
    #[tracing::instrument(skip_all)]
    async fn send(&mut self, dispatch: Dispatch<RawPayload>) -> Result<(), Self::Error> {
        for payload in dispatch.items {
            self.push_raw(payload)?;
        }
        Ok(())
    }
}

/// Receiving half of an in-memory loopback queue.
pub struct InMemoryReceiver {
    rx: mpsc::UnboundedReceiver<RawPayload>,
}

#[async_trait::async_trait]
impl Receiver for InMemoryReceiver {
    /// Pull the next payload, waiting up to `timeout` when the queue is
    /// empty.
    async fn pull(&mut self, timeout: Duration) -> Result<Option<RawPayload>, ReceiveError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(payload) => Ok(payload),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Stop accepting new payloads; already-queued payloads remain pullable.
    async fn close(&mut self) -> Result<(), ReceiveError> {
        self.rx.close();
        Ok(())
    }
}
