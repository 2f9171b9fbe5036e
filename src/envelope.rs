use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message container used by the send pipeline and the mediator.
///
/// `Envelope` bundles an application message payload together with its
/// identity and correlation metadata. It is intentionally generic and
/// transport-agnostic.
///
/// ## Design
///
/// - `message_id` is assigned once at construction and identifies the
///   envelope across the send/receive boundary
/// - `operation_id`, `correlation_id` and `contributor` are optional
///   correlation metadata, set at construction and immutable afterwards
/// - `M` is the application payload; the type system guarantees it is
///   always present
///
/// An envelope is constructed once, consumed by exactly one send or receive
/// operation, and has no independent teardown.
///
/// ## Example
///
/// ```rust
/// use courier::Envelope;
/// use uuid::Uuid;
///
/// let envelope = Envelope::new("order placed")
///     .with_operation_id("op-7")
///     .with_correlation_id(Uuid::new_v4())
///     .with_contributor("checkout-service");
///
/// assert_eq!(envelope.message, "order placed");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    /// Unique identifier, assigned at creation.
    pub message_id: Uuid,
    /// Application payload.
    pub message: M,
    /// Identifier of the operation this message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// Identifier correlating this message with the one that caused it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    /// Name of the system that produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contributor: Option<String>,
}

impl<M> Envelope<M> {
    /// Create a new envelope with a fresh `message_id` and no correlation
    /// metadata.
    pub fn new(message: M) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            message,
            operation_id: None,
            correlation_id: None,
            contributor: None,
        }
    }

    /// Set the operation identifier.
    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    /// Set the correlation identifier.
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Set the contributor.
    pub fn with_contributor(mut self, contributor: impl Into<String>) -> Self {
        self.contributor = Some(contributor.into());
        self
    }

    /// Attach an enqueue time, turning this envelope into a
    /// [`ScheduledEnvelope`].
    pub fn scheduled(self, enqueue_time: DateTime<Utc>) -> ScheduledEnvelope<M> {
        ScheduledEnvelope {
            envelope: self,
            enqueue_time,
        }
    }
}

/// An [`Envelope`] with a scheduling hint.
///
/// The enqueue time is forwarded verbatim to the transport, which decides
/// when the message becomes visible to consumers. Scheduling does not change
/// any validation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEnvelope<M> {
    /// The wrapped envelope.
    pub envelope: Envelope<M>,
    /// Earliest time at which the transport should make the message visible.
    pub enqueue_time: DateTime<Utc>,
}

/// Optional partition-affinity capability for message types.
///
/// Partitioned transports route all messages carrying the same key to one
/// ordered sub-stream. A message type opts into partition affinity by
/// overriding [`partition_key`](Partitioned::partition_key); the default
/// implementation returns `None`, so messages need not be partition-aware.
///
/// ```rust
/// use courier::Partitioned;
///
/// struct AccountDebited { account: String }
///
/// impl Partitioned for AccountDebited {
///     fn partition_key(&self) -> Option<&str> {
///         Some(&self.account)
///     }
/// }
///
/// struct Heartbeat;
///
/// // No affinity: the default `None` applies.
/// impl Partitioned for Heartbeat {}
/// ```
pub trait Partitioned {
    /// The partition key this message is routed by, if any.
    fn partition_key(&self) -> Option<&str> {
        None
    }
}
