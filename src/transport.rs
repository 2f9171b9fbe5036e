//! Transport seams: dispatch submission and message pulls.
//!
//! A backend interacts with the rest of the crate through two narrow
//! contracts. On the send side it accepts whole [`Dispatch`]es — an ordered
//! item list bound to one partition key — as single submissions; on the
//! receive side it hands out raw payloads one pull at a time to the
//! mediator.
//!
//! Sends travel through a `tower::Service` stack so middleware
//! (serialization, timeouts, tracing) can be layered in front of any
//! backend without the backend knowing. Pulls bypass Tower: the mediator is
//! the only consumer and drives the loop itself.
//!
//! ## Key components
//!
//! - [`Transport`]: send-side entry point wrapping a service stack
//! - [`SenderService`]: bridges a [`Sender`] backend into that stack
//! - [`Sender`]: submission contract implemented by backends
//! - [`Receiver`]: pull contract implemented by backends
//! - [`TransportError`] / [`ReceiveError`]: error types carrying a tracing
//!   span backtrace

pub mod inmemory;
pub mod layers;

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tower::Service;
use tracing_error::SpanTrace;

use crate::Dispatch;

pub use inmemory::InMemory;

/// Send-side entry point over a backend service stack.
///
/// `Transport` owns the Tower stack a [`Dispatch`] travels through on its
/// way to a backend. Whatever error a stacked service or the backend
/// produces comes back as a [`TransportError`], so callers see one failure
/// type regardless of how the stack is composed.
///
/// Start from a backend with [`Transport::new`], then stack middleware with
/// [`Transport::layer`].
#[derive(Clone)]
pub struct Transport<S> {
    service: S,
}

impl<D> Transport<SenderService<D>> {
    /// Create a transport whose stack is just the given backend.
    ///
    /// The backend is wrapped in a [`SenderService`] so further layers can
    /// sit in front of it.
    pub fn new(sender: D) -> Self {
        Self {
            service: SenderService::new(sender),
        }
    }
}

impl<S> Transport<S> {
    /// Stack a Tower layer in front of the current service.
    ///
    /// Layers run in the order they are applied, outermost last; the
    /// serializer layer is the typical occupant.
    pub fn layer<L>(self, layer: L) -> Transport<L::Service>
    where
        L: tower::Layer<S>,
    {
        Transport {
            service: layer.layer(self.service),
        }
    }

    /// Submit a [`Dispatch`] through the stack.
    ///
    /// One call is one submission: the backend accepts the whole dispatch
    /// or the call fails, and item order is preserved as given. Use this
    /// instead of the `tower::Service` API when readiness handling is not
    /// needed.
    pub async fn send<T>(&mut self, dispatch: Dispatch<T>) -> Result<(), TransportError>
    where
        T: Send + 'static,
        S: Service<Dispatch<T>> + Clone + Send + 'static,
        S::Future: Send + 'static,
        S::Error: Into<tower::BoxError>,
    {
        let mut service = self.service.clone();
        service
            .call(dispatch)
            .await
            .map_err(|e| TransportError::sender(e.into()))?;
        Ok(())
    }
}

/// `tower::Service` face of the transport, for callers that drive
/// readiness themselves. Inner-stack errors surface as [`TransportError`].
impl<R, S> Service<R> for Transport<S>
where
    S: Service<R> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<tower::BoxError>,
    R: Send + 'static,
{
    type Response = ();
    type Error = TransportError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service
            .poll_ready(cx)
            .map_err(|e| TransportError::sender(e.into()))
    }

    fn call(&mut self, req: R) -> Self::Future {
        let mut service = self.service.clone();

        Box::pin(async move {
            service
                .call(req)
                .await
                .map_err(|e| TransportError::sender(e.into()))?;
            Ok(())
        })
    }
}

/// Error returned when a dispatch submission fails.
///
/// Pairs the failure kind with the tracing span backtrace captured at the
/// point of failure.
#[derive(Debug)]
pub struct TransportError {
    context: SpanTrace,
    kind: TransportErrorKind,
}

/// Transport error kinds.
#[derive(Debug)]
pub enum TransportErrorKind {
    /// Errors originating from the sender backend.
    Sender(tower::BoxError),
    /// Errors related to serialization or deserialization.
    Serde(tower::BoxError),
}

impl TransportError {
    /// Create a sender-related transport error.
    pub fn sender(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: TransportErrorKind::Sender(err),
        }
    }

    /// Create a serialization-related transport error.
    pub fn serde(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: TransportErrorKind::Serde(err),
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> &TransportErrorKind {
        &self.kind
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            TransportErrorKind::Sender(err) => writeln!(f, "Sender error: {err}"),
            TransportErrorKind::Serde(err) => writeln!(f, "Serde error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            TransportErrorKind::Sender(err) => Some(err.as_ref()),
            TransportErrorKind::Serde(err) => Some(err.as_ref()),
        }
    }
}

/// Bridges a [`Sender`] backend into a Tower stack.
///
/// Sits at the bottom of every [`Transport`]; layers stack on top of it.
#[derive(Clone)]
pub struct SenderService<D> {
    sender: D,
}

impl<D> SenderService<D> {
    /// Wrap a backend for use in a service stack.
    pub fn new(sender: D) -> Self {
        Self { sender }
    }
}

/// `tower::Service` implementation delegating each dispatch to the wrapped
/// [`Sender`].
impl<T, D> Service<Dispatch<T>> for SenderService<D>
where
    T: Send + 'static,
    D: Sender<T> + Clone + Send + 'static,
{
    type Response = ();
    type Error = tower::BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Dispatch<T>) -> Self::Future {
        let mut sender = self.sender.clone();
        Box::pin(async move {
            sender.send(req).await.map_err(Into::into)?;
            Ok(())
        })
    }
}

/// Trait implemented by concrete sender backends.
///
/// A sender delivers a whole [`Dispatch`] to an external system as one
/// submission, honoring the dispatch's partition key and enqueue time and
/// preserving item order.
#[async_trait::async_trait]
pub trait Sender<T> {
    /// Backend-specific error type.
    type Error: Into<tower::BoxError>;

    /// Submit a dispatch through the underlying transport.
    async fn send(&mut self, dispatch: Dispatch<T>) -> Result<(), Self::Error>;
}

/// Trait implemented by concrete receiver backends.
///
/// A receiver hands out raw transport payloads one at a time; the mediator
/// owns the handle exclusively and drives the pull loop.
#[async_trait::async_trait]
pub trait Receiver {
    /// Pull the next available payload.
    ///
    /// Returns `Ok(None)` when no message arrives within `timeout`; the
    /// caller retries without treating this as an error.
    async fn pull(&mut self, timeout: Duration) -> Result<Option<RawPayload>, ReceiveError>;

    /// Release the underlying transport handle.
    async fn close(&mut self) -> Result<(), ReceiveError>;
}

/// Error returned by receive operations.
///
/// The kind tells the mediator whether the failure is worth retrying:
/// transient errors (network blips, throttling) cause a delayed retry,
/// fatal errors (entity deleted, handle revoked) terminate the loop.
#[derive(Debug)]
pub struct ReceiveError {
    context: SpanTrace,
    kind: ReceiveErrorKind,
}

/// Receive error kinds.
#[derive(Debug)]
pub enum ReceiveErrorKind {
    /// Retryable failure; the pull loop retries after a delay.
    Transient(tower::BoxError),
    /// Non-retryable failure; the pull loop terminates.
    Fatal(tower::BoxError),
}

impl ReceiveError {
    /// Create a retryable receive error.
    pub fn transient(err: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: ReceiveErrorKind::Transient(err.into()),
        }
    }

    /// Create a non-retryable receive error.
    pub fn fatal(err: impl Into<tower::BoxError>) -> Self {
        Self {
            context: SpanTrace::capture(),
            kind: ReceiveErrorKind::Fatal(err.into()),
        }
    }

    /// Whether the pull loop should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ReceiveErrorKind::Transient(_))
    }
}

impl std::fmt::Display for ReceiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ReceiveErrorKind::Transient(err) => writeln!(f, "Transient receive error: {err}"),
            ReceiveErrorKind::Fatal(err) => writeln!(f, "Fatal receive error: {err}"),
        }?;
        self.context.fmt(f)
    }
}

impl std::error::Error for ReceiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ReceiveErrorKind::Transient(err) => Some(err.as_ref()),
            ReceiveErrorKind::Fatal(err) => Some(err.as_ref()),
        }
    }
}

/// Wrapper type for raw byte payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload(Vec<u8>);

impl RawPayload {
    /// View the payload as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for RawPayload {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for RawPayload {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
