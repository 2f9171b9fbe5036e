//! Mediator receive loop bridging a transport receiver to a handler.
//!
//! The mediator runs one long-lived background task that:
//!
//! - Pulls raw payloads from a [`Receiver`]
//! - Deserializes them into [`Envelope`]s with an [`EnvelopeSerializer`]
//! - Dispatches each envelope to an application [`Handler`], one at a time
//! - Exposes lifecycle hooks for observability and customization
//!
//! The loop runs until:
//! - [`MediatorHandle::close`] is called
//! - A fatal (non-retryable) receive error occurs
//!
//! Nothing blocks on the receive side, so receive failures never surface to
//! a caller; they are reported through the [`MediatorHook`].

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    serializer::EnvelopeSerializer,
    transport::{ReceiveError, Receiver},
    Envelope,
};

const STOPPED: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;

/// Lifecycle state of a mediator's receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediatorState {
    /// The loop is not running.
    Stopped,
    /// The loop is pulling and dispatching messages.
    Running,
    /// The loop has been told to stop and is draining its in-flight
    /// dispatch.
    Stopping,
}

impl MediatorState {
    fn from_u8(value: u8) -> Self {
        match value {
            RUNNING => MediatorState::Running,
            STOPPING => MediatorState::Stopping,
            _ => MediatorState::Stopped,
        }
    }
}

/// Receive-side component bridging a transport to an application handler.
///
/// Construct one with [`Mediator::start`] for the defaults or
/// [`Mediator::builder`] to tune polling, retry, and observability.
pub struct Mediator;

impl Mediator {
    /// Start a mediator with the default configuration.
    ///
    /// The loop transitions `Stopped → Running` immediately; the returned
    /// handle is the idempotent stop trigger.
    pub fn start<R, H, SER, M>(receiver: R, handler: H, serializer: SER) -> MediatorHandle
    where
        R: Receiver + Send + 'static,
        H: Handler<M> + Send + 'static,
        SER: EnvelopeSerializer<M> + Send + 'static,
        M: Send + 'static,
    {
        Self::builder().start(receiver, handler, serializer)
    }

    /// Configure a mediator before starting it.
    pub fn builder() -> MediatorBuilder<DefaultMediatorHook> {
        MediatorBuilder {
            poll_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            hook: DefaultMediatorHook,
        }
    }
}

/// Builder for creating a running mediator.
///
/// Configures the pull timeout, the delay before retrying a transient
/// receive error, and the lifecycle hook.
pub struct MediatorBuilder<HK> {
    poll_timeout: Duration,
    retry_delay: Duration,
    hook: HK,
}

impl<HK> MediatorBuilder<HK> {
    /// Set how long a single pull waits for a message before retrying.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the delay before retrying after a transient receive error.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Replace the mediator hook while keeping all other settings
    /// unchanged.
    ///
    /// This allows customizing behavior (logging, metrics, alerting)
    /// without rebuilding the mediator.
    pub fn hook<HK2>(self, hook: HK2) -> MediatorBuilder<HK2> {
        MediatorBuilder {
            poll_timeout: self.poll_timeout,
            retry_delay: self.retry_delay,
            hook,
        }
    }

    /// Start the receive loop in the background.
    ///
    /// The loop:
    /// - Observes the stop signal before every pull, so a message arriving
    ///   after [`MediatorHandle::close`] begins is never dispatched
    /// - Retries silently when a pull times out with no message
    /// - Skips a message that fails to deserialize and keeps pulling
    /// - Reports a failed handler invocation through the hook and keeps
    ///   pulling (log-and-continue)
    /// - Retries after `retry_delay` on a transient receive error and
    ///   terminates on a fatal one
    ///
    /// Envelopes are dispatched one at a time; the handler's view of
    /// delivery order matches transport order.
    pub fn start<R, H, SER, M>(self, mut receiver: R, mut handler: H, serializer: SER) -> MediatorHandle
    where
        R: Receiver + Send + 'static,
        H: Handler<M> + Send + 'static,
        SER: EnvelopeSerializer<M> + Send + 'static,
        HK: MediatorHook<M> + 'static,
        M: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let state = Arc::new(AtomicU8::new(RUNNING));

        let loop_cancel = cancel.clone();
        let loop_state = Arc::clone(&state);
        let poll_timeout = self.poll_timeout;
        let retry_delay = self.retry_delay;
        let hook = self.hook;

        let task = tokio::spawn(async move {
            hook.on_startup();

            loop {
                tokio::select! {
                    // The stop signal wins every race with a pull.
                    biased;

                    _ = loop_cancel.cancelled() => break,

                    pulled = receiver.pull(poll_timeout) => match pulled {
                        Ok(Some(payload)) => match serializer.deserialize(payload.as_bytes()) {
                            Ok(envelope) => {
                                hook.on_envelope_received(&envelope);
                                let message_id = envelope.message_id;
                                match handler.handle(envelope).await {
                                    Ok(()) => hook.on_envelope_handled(message_id),
                                    Err(err) => {
                                        hook.on_handler_error(message_id, err.into().as_ref());
                                    }
                                }
                            }
                            Err(err) => hook.on_deserialization_error(&err),
                        },
                        // No message within the poll timeout; retry.
                        Ok(None) => {}
                        Err(err) => {
                            hook.on_pull_error(&err);
                            if !err.is_transient() {
                                break;
                            }
                            tokio::select! {
                                _ = loop_cancel.cancelled() => break,
                                _ = tokio::time::sleep(retry_delay) => {}
                            }
                        }
                    },
                }
            }

            hook.on_shutdown();

            if let Err(err) = receiver.close().await {
                hook.on_receiver_close_error(&err);
            }

            loop_state.store(STOPPED, Ordering::SeqCst);
        });

        MediatorHandle {
            cancel,
            state,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to a running mediator: state probe and idempotent stop trigger.
pub struct MediatorHandle {
    cancel: CancellationToken,
    state: Arc<AtomicU8>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MediatorHandle {
    /// Current lifecycle state of the receive loop.
    pub fn state(&self) -> MediatorState {
        MediatorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Stop the receive loop and wait for it to drain.
    ///
    /// Signals the loop to stop accepting new pulls, awaits completion of
    /// the in-flight dispatch, and releases the transport receiver.
    /// Calling `close` again (or after the loop terminated on its own) is
    /// safe; concurrent callers all return only once the drain has
    /// completed, because the join handle lock is held across the await.
    pub async fn close(&self) {
        self.cancel.cancel();

        let mut task = self.task.lock().await;
        if let Some(task) = task.take() {
            let _ = self
                .state
                .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst);
            // The loop task stores `Stopped` as its last action.
            let _ = task.await;
        }
    }
}

/// Application-supplied message handler.
///
/// The mediator invokes the handler once per delivered envelope, never
/// concurrently from a single loop instance.
#[async_trait::async_trait]
pub trait Handler<M>: Send {
    /// Handler-specific error type.
    type Error: Into<tower::BoxError> + Send;

    /// Process one delivered envelope.
    async fn handle(&mut self, envelope: Envelope<M>) -> Result<(), Self::Error>;
}

/// Any async closure taking an envelope is a handler.
#[async_trait::async_trait]
impl<M, F, Fut, E> Handler<M> for F
where
    M: Send + 'static,
    F: FnMut(Envelope<M>) -> Fut + Send,
    Fut: std::future::Future<Output = Result<(), E>> + Send,
    E: Into<tower::BoxError> + Send,
{
    type Error = E;

    async fn handle(&mut self, envelope: Envelope<M>) -> Result<(), Self::Error> {
        (self)(envelope).await
    }
}

/// Hook trait for observing mediator lifecycle events.
///
/// Hooks are invoked synchronously from the receive loop and should avoid
/// heavy or blocking work. Typical use cases include logging, metrics, and
/// tracing integration. Since no caller blocks on receive, the hook is the
/// only place receive-side failures become visible.
pub trait MediatorHook<M>: Send + Sync {
    fn on_startup(&self);
    fn on_shutdown(&self);
    fn on_envelope_received(&self, envelope: &Envelope<M>);
    fn on_envelope_handled(&self, message_id: Uuid);
    fn on_handler_error(&self, message_id: Uuid, error: &dyn std::error::Error);
    fn on_deserialization_error(&self, error: &dyn std::error::Error);
    fn on_pull_error(&self, error: &ReceiveError);
    fn on_receiver_close_error(&self, error: &dyn std::error::Error);
}

/// Default mediator hook implementation.
///
/// Logs lifecycle events using `tracing`.
pub struct DefaultMediatorHook;

impl<M> MediatorHook<M> for DefaultMediatorHook {
    fn on_startup(&self) {
        tracing::info!("Mediator is starting up");
    }

    fn on_shutdown(&self) {
        tracing::info!("Mediator is shutting down");
    }

    fn on_envelope_received(&self, envelope: &Envelope<M>) {
        tracing::debug!(message_id = %envelope.message_id, "Envelope received");
    }

    fn on_envelope_handled(&self, message_id: Uuid) {
        tracing::debug!(%message_id, "Envelope handled successfully");
    }

    fn on_handler_error(&self, message_id: Uuid, error: &dyn std::error::Error) {
        tracing::error!(%message_id, ?error, "Handler failed; resuming the loop");
    }

    fn on_deserialization_error(&self, error: &dyn std::error::Error) {
        tracing::error!(?error, "Skipping message that failed to deserialize");
    }

    fn on_pull_error(&self, error: &ReceiveError) {
        if error.is_transient() {
            tracing::warn!(%error, "Transient receive error; retrying");
        } else {
            tracing::error!(%error, "Fatal receive error; stopping the loop");
        }
    }

    fn on_receiver_close_error(&self, error: &dyn std::error::Error) {
        tracing::error!(?error, "Failed to close the transport receiver");
    }
}
