use chrono::{TimeZone, Utc};
use courier::{
    transport::{InMemory, Transport},
    Envelope, MessageBus, Partitioned, SendErrorKind,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Event {
    key: Option<String>,
    seq: u32,
}

impl Partitioned for Event {
    fn partition_key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

fn event(key: Option<&str>, seq: u32) -> Envelope<Event> {
    Envelope::new(Event {
        key: key.map(ToOwned::to_owned),
        seq,
    })
}

fn bus(backend: InMemory<Envelope<Event>>) -> MessageBus<courier::transport::SenderService<InMemory<Envelope<Event>>>> {
    MessageBus::new(Transport::new(backend))
}

#[tokio::test]
async fn uniform_key_batch_forwards_key_and_ordered_list() {
    let backend = InMemory::default();
    let mut bus = bus(backend.clone());

    let envelopes = vec![event(Some("a"), 1), event(Some("a"), 2), event(Some("a"), 3)];
    let ids: Vec<_> = envelopes.iter().map(|e| e.message_id).collect();

    bus.send_batch(envelopes, CancellationToken::new())
        .await
        .unwrap();

    let dispatches = backend.sent_dispatches().await;
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].partition_key.as_deref(), Some("a"));
    let got: Vec<_> = dispatches[0].items.iter().map(|e| e.message_id).collect();
    assert_eq!(got, ids);
}

#[tokio::test]
async fn all_absent_keys_batch_forwards_absent_key_in_order() {
    let backend = InMemory::default();
    let mut bus = bus(backend.clone());

    let e1 = event(None, 1);
    let e2 = event(None, 2);
    let expected = vec![e1.clone(), e2.clone()];

    bus.send_batch(vec![e1, e2], CancellationToken::new())
        .await
        .unwrap();

    let dispatches = backend.sent_dispatches().await;
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].partition_key, None);
    assert_eq!(dispatches[0].items, expected);
}

#[tokio::test]
async fn mixed_keys_fail_without_invoking_the_sender() {
    let backend = InMemory::default();
    let mut bus = bus(backend.clone());

    let err = bus
        .send_batch(
            vec![event(Some("a"), 1), event(Some("b"), 2)],
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), SendErrorKind::InvalidArgument(_)));
    assert!(backend.sent_dispatches().await.is_empty());
}

#[tokio::test]
async fn absent_key_mixed_with_present_key_fails() {
    let backend = InMemory::default();
    let mut bus = bus(backend.clone());

    let err = bus
        .send_batch(
            vec![event(Some("a"), 1), event(Some("a"), 2), event(None, 3)],
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.kind(), SendErrorKind::InvalidArgument(_)));
    assert!(backend.sent_dispatches().await.is_empty());
}

#[tokio::test]
async fn empty_batch_succeeds_with_zero_transport_calls() {
    let backend = InMemory::default();
    let mut bus = bus(backend.clone());

    bus.send_batch(Vec::new(), CancellationToken::new())
        .await
        .unwrap();

    assert!(backend.sent_dispatches().await.is_empty());
}

#[tokio::test]
async fn single_send_is_equivalent_to_a_one_element_batch() {
    let single_backend = InMemory::default();
    let mut single_bus = bus(single_backend.clone());
    let batch_backend = InMemory::default();
    let mut batch_bus = bus(batch_backend.clone());

    let envelope = event(Some("k"), 7);

    single_bus
        .send(envelope.clone(), CancellationToken::new())
        .await
        .unwrap();
    batch_bus
        .send_batch(vec![envelope], CancellationToken::new())
        .await
        .unwrap();

    let single = single_backend.sent_dispatches().await;
    let batch = batch_backend.sent_dispatches().await;
    assert_eq!(single, batch);
    assert_eq!(single[0].partition_key.as_deref(), Some("k"));
}

#[tokio::test]
async fn pre_cancelled_token_fails_before_any_transport_call() {
    let backend = InMemory::default();
    let mut bus = bus(backend.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = bus.send(event(Some("a"), 1), cancel.clone()).await.unwrap_err();
    assert!(err.is_cancelled());

    let err = bus
        .send_batch(vec![event(Some("a"), 1)], cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    assert!(backend.sent_dispatches().await.is_empty());
}

#[tokio::test]
async fn scheduled_send_forwards_the_enqueue_time() {
    let backend = InMemory::default();
    let mut bus = bus(backend.clone());

    let enqueue_time = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
    let scheduled = event(Some("a"), 1).scheduled(enqueue_time);

    bus.send_scheduled(scheduled, CancellationToken::new())
        .await
        .unwrap();

    let dispatches = backend.sent_dispatches().await;
    assert_eq!(dispatches.len(), 1);
    assert_eq!(dispatches[0].enqueue_time, Some(enqueue_time));
    assert_eq!(dispatches[0].partition_key.as_deref(), Some("a"));
}
