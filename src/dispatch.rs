//! Validated dispatch units handed to transport senders.
//!
//! A [`Dispatch`] is the only thing a sender backend ever receives: an
//! ordered list of items, a single resolved partition key, and an optional
//! enqueue time. [`Dispatch::prepare`] is the batch validator enforcing the
//! single-partition contract at the boundary, before any transport I/O.

use chrono::{DateTime, Utc};
use tracing_error::SpanTrace;

use crate::{Envelope, Partitioned};

/// An ordered batch bound for one transport submission.
///
/// Within a dispatch, item order is submission order; the transport
/// guarantees ordered delivery within a partition, so the single
/// `partition_key` keeps that guarantee unambiguous. Submission is one
/// logical operation: either the transport accepts the whole dispatch or
/// the operation fails, and partial submission is never exposed.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch<T> {
    /// Partition key shared by every item, if any.
    pub partition_key: Option<String>,
    /// Scheduling hint forwarded verbatim to the transport.
    pub enqueue_time: Option<DateTime<Utc>>,
    /// Items in submission order.
    pub items: Vec<T>,
}

impl<M> Dispatch<Envelope<M>>
where
    M: Partitioned,
{
    /// Build a one-element dispatch from a single envelope, resolving its
    /// partition key through the [`Partitioned`] capability.
    pub fn single(envelope: Envelope<M>) -> Self {
        let partition_key = envelope.message.partition_key().map(ToOwned::to_owned);
        Self {
            partition_key,
            enqueue_time: None,
            items: vec![envelope],
        }
    }

    /// Validate a batch of envelopes into a dispatch.
    ///
    /// The input is materialized exactly once, so lazily produced iterators
    /// are never enumerated twice. An empty batch is a successful no-op and
    /// yields `Ok(None)`; the caller must not issue any transport call for
    /// it.
    ///
    /// The partition key of the first envelope (resolved through the
    /// [`Partitioned`] capability, `None` when the capability yields
    /// nothing) becomes the reference key. Every later envelope must carry
    /// an equal key, where two absent keys are equal and present keys
    /// compare by exact string equality. The first divergent envelope fails
    /// the whole batch with [`PartitionKeyMismatch`].
    pub fn prepare(
        envelopes: impl IntoIterator<Item = Envelope<M>>,
    ) -> Result<Option<Self>, PartitionKeyMismatch> {
        let envelopes: Vec<Envelope<M>> = envelopes.into_iter().collect();

        if envelopes.is_empty() {
            return Ok(None);
        }

        let reference = envelopes[0].message.partition_key();

        for (index, envelope) in envelopes.iter().enumerate().skip(1) {
            if envelope.message.partition_key() != reference {
                return Err(PartitionKeyMismatch::new(index));
            }
        }

        let partition_key = reference.map(ToOwned::to_owned);
        Ok(Some(Self {
            partition_key,
            enqueue_time: None,
            items: envelopes,
        }))
    }

    /// Set the enqueue time forwarded to the transport.
    pub fn with_enqueue_time(mut self, enqueue_time: DateTime<Utc>) -> Self {
        self.enqueue_time = Some(enqueue_time);
        self
    }
}

impl<T> Dispatch<T> {
    /// Map every item of the dispatch, keeping key and enqueue time.
    ///
    /// Used by serialization layers to turn envelopes into raw payloads
    /// without touching routing metadata.
    pub fn map_items<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Dispatch<U>, E> {
        let items = self.items.into_iter().map(f).collect::<Result<Vec<U>, E>>()?;
        Ok(Dispatch {
            partition_key: self.partition_key,
            enqueue_time: self.enqueue_time,
            items,
        })
    }
}

/// Error raised when a batch mixes distinct partition keys.
///
/// Captures the index of the first envelope whose key diverges from the
/// reference key and a tracing span backtrace for diagnostics.
#[derive(Debug)]
pub struct PartitionKeyMismatch {
    context: SpanTrace,
    index: usize,
}

impl PartitionKeyMismatch {
    fn new(index: usize) -> Self {
        Self {
            context: SpanTrace::capture(),
            index,
        }
    }

    /// Index of the first envelope whose partition key diverges.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Display for PartitionKeyMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "all messages should have same partition key (envelope at index {} diverges)",
            self.index
        )?;
        self.context.fmt(f)
    }
}

impl std::error::Error for PartitionKeyMismatch {}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Keyed(Option<String>);

    impl Partitioned for Keyed {
        fn partition_key(&self) -> Option<&str> {
            self.0.as_deref()
        }
    }

    fn keyed(key: Option<&str>) -> Envelope<Keyed> {
        Envelope::new(Keyed(key.map(ToOwned::to_owned)))
    }

    #[test]
    fn empty_batch_is_a_successful_no_op() {
        let prepared = Dispatch::<Envelope<Keyed>>::prepare([]).unwrap();
        assert!(prepared.is_none());
    }

    #[test]
    fn uniform_key_batch_resolves_that_key_and_preserves_order() {
        let envelopes = vec![keyed(Some("a")), keyed(Some("a")), keyed(Some("a"))];
        let ids: Vec<_> = envelopes.iter().map(|e| e.message_id).collect();

        let dispatch = Dispatch::prepare(envelopes).unwrap().unwrap();

        assert_eq!(dispatch.partition_key.as_deref(), Some("a"));
        let got: Vec<_> = dispatch.items.iter().map(|e| e.message_id).collect();
        assert_eq!(got, ids);
    }

    #[test]
    fn all_absent_keys_are_uniform() {
        let dispatch = Dispatch::prepare(vec![keyed(None), keyed(None)])
            .unwrap()
            .unwrap();
        assert_eq!(dispatch.partition_key, None);
        assert_eq!(dispatch.items.len(), 2);
    }

    #[test]
    fn absent_key_diverges_from_present_key() {
        let err = Dispatch::prepare(vec![keyed(Some("a")), keyed(Some("a")), keyed(None)])
            .unwrap_err();
        assert_eq!(err.index(), 2);
    }

    #[test]
    fn present_key_diverges_from_absent_reference() {
        let err = Dispatch::prepare(vec![keyed(None), keyed(Some("b"))]).unwrap_err();
        assert_eq!(err.index(), 1);
    }

    #[test]
    fn first_divergent_index_is_reported() {
        let err = Dispatch::prepare(vec![
            keyed(Some("a")),
            keyed(Some("b")),
            keyed(Some("c")),
        ])
        .unwrap_err();
        assert_eq!(err.index(), 1);
        assert!(err
            .to_string()
            .contains("all messages should have same partition key"));
    }

    #[test]
    fn single_resolves_the_envelope_key() {
        let dispatch = Dispatch::single(keyed(Some("k")));
        assert_eq!(dispatch.partition_key.as_deref(), Some("k"));
        assert_eq!(dispatch.items.len(), 1);
    }
}
