//! Send pipeline over a transport.
//!
//! [`MessageBus`] is the publishing entry point: it resolves partition
//! keys, validates batches through [`Dispatch::prepare`], and forwards
//! validated dispatches to a Tower [`transport::Transport`] stack. All
//! argument validation happens synchronously, before any transport I/O.

use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing_error::SpanTrace;

use crate::{
    dispatch::PartitionKeyMismatch, transport, Dispatch, Envelope, Partitioned, ScheduledEnvelope,
};

/// Publishing side of the message bus.
///
/// Wraps a [`transport::Transport`] and exposes single, batch, and
/// scheduled send operations. The bus holds no shared mutable state, so
/// concurrent sends over clones of the same bus need no coordination.
///
/// ## Cancellation
///
/// Every send operation observes its [`CancellationToken`] at entry: a
/// token that is already cancelled fails the call with
/// [`SendErrorKind::Cancelled`] before any transport I/O. Once the
/// transport call is in flight, cancellation does not abort it; the
/// underlying transport decides when the submission completes.
#[derive(Clone)]
pub struct MessageBus<S> {
    transport: transport::Transport<S>,
}

impl<S> MessageBus<S> {
    /// Create a bus over the given transport stack.
    pub fn new(transport: transport::Transport<S>) -> Self {
        Self { transport }
    }

    /// Send a single envelope.
    ///
    /// The envelope's partition key is resolved through the
    /// [`Partitioned`] capability and the envelope is forwarded as a
    /// one-element dispatch, making this equivalent to
    /// [`send_batch`](MessageBus::send_batch) with one element.
    #[tracing::instrument(skip(self, envelope, cancel))]
    pub async fn send<M>(
        &mut self,
        envelope: Envelope<M>,
        cancel: CancellationToken,
    ) -> Result<(), SendError>
    where
        M: Partitioned + Send + 'static,
        S: Service<Dispatch<Envelope<M>>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<tower::BoxError>,
    {
        if cancel.is_cancelled() {
            return Err(SendError::cancelled());
        }

        let dispatch = Dispatch::single(envelope);
        self.transport
            .send(dispatch)
            .await
            .map_err(SendError::transport)
    }

    /// Send a batch of envelopes atomically.
    ///
    /// The batch is validated first: every envelope must resolve to the
    /// same partition key (absent keys are equal to each other), and the
    /// first divergent envelope fails the whole batch with
    /// [`SendErrorKind::InvalidArgument`] without any transport call. An
    /// empty batch completes successfully with zero transport calls.
    ///
    /// On success the transport receives one submission containing the
    /// envelopes in their original order.
    #[tracing::instrument(skip(self, envelopes, cancel))]
    pub async fn send_batch<M>(
        &mut self,
        envelopes: impl IntoIterator<Item = Envelope<M>> + Send,
        cancel: CancellationToken,
    ) -> Result<(), SendError>
    where
        M: Partitioned + Send + 'static,
        S: Service<Dispatch<Envelope<M>>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<tower::BoxError>,
    {
        if cancel.is_cancelled() {
            return Err(SendError::cancelled());
        }

        match Dispatch::prepare(envelopes).map_err(SendError::invalid_argument)? {
            None => Ok(()),
            Some(dispatch) => self
                .transport
                .send(dispatch)
                .await
                .map_err(SendError::transport),
        }
    }

    /// Send a single envelope with a scheduling hint.
    ///
    /// The enqueue time is forwarded verbatim to the transport; validation
    /// is identical to [`send`](MessageBus::send).
    #[tracing::instrument(skip(self, scheduled, cancel))]
    pub async fn send_scheduled<M>(
        &mut self,
        scheduled: ScheduledEnvelope<M>,
        cancel: CancellationToken,
    ) -> Result<(), SendError>
    where
        M: Partitioned + Send + 'static,
        S: Service<Dispatch<Envelope<M>>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<tower::BoxError>,
    {
        if cancel.is_cancelled() {
            return Err(SendError::cancelled());
        }

        let dispatch = Dispatch::single(scheduled.envelope).with_enqueue_time(scheduled.enqueue_time);
        self.transport
            .send(dispatch)
            .await
            .map_err(SendError::transport)
    }
}

/// Error returned when a send operation fails.
#[derive(Debug)]
pub struct SendError {
    context: SpanTrace,
    kind: SendErrorKind,
}

/// Classification of send failures.
#[derive(Debug)]
pub enum SendErrorKind {
    /// The batch violated an argument contract; no transport call was made.
    InvalidArgument(PartitionKeyMismatch),
    /// The transport rejected or failed the submission.
    Transport(transport::TransportError),
    /// The cancellation token was already triggered at entry; no transport
    /// call was made.
    Cancelled,
}

impl SendError {
    fn invalid_argument(err: PartitionKeyMismatch) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: SendErrorKind::InvalidArgument(err),
        }
    }

    fn transport(err: transport::TransportError) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: SendErrorKind::Transport(err),
        }
    }

    fn cancelled() -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: SendErrorKind::Cancelled,
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> &SendErrorKind {
        &self.kind
    }

    /// Whether the operation was cancelled rather than failed.
    ///
    /// Cancellation is distinct from failure; metrics should not count it
    /// as an error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, SendErrorKind::Cancelled)
    }
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SendErrorKind::InvalidArgument(err) => writeln!(f, "Invalid argument: {err}"),
            SendErrorKind::Transport(err) => writeln!(f, "Transport error: {err}"),
            SendErrorKind::Cancelled => writeln!(f, "Send cancelled before transport submission"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            SendErrorKind::InvalidArgument(err) => Some(err),
            SendErrorKind::Transport(err) => Some(err),
            SendErrorKind::Cancelled => None,
        }
    }
}
