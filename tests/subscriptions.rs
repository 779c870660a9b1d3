//! Subscription registry behavior over a scripted event stream.

mod common;

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use common::{test_config, wait_until, within, MockLedger};
use ledger_client::ledger::{EventQuery, LedgerError};
use ledger_client::subscription::{Subscription, SubscriptionRegistry};

const WAIT: Duration = Duration::from_secs(2);

fn setup() -> (Arc<MockLedger>, SubscriptionRegistry) {
    let ledger = Arc::new(MockLedger::new());
    let registry = SubscriptionRegistry::new(ledger.clone(), &test_config().subscription);
    (ledger, registry)
}

fn transfers() -> EventQuery {
    EventQuery::new_blocks().and_eq("transfer.recipient", "iaa1grantee")
}

async fn next_height(subscription: &mut Subscription) -> u64 {
    within(subscription.recv()).await.unwrap().unwrap().height
}

/// Nothing arrives within a short window.
async fn assert_quiet(subscription: &mut Subscription) {
    let next = tokio::time::timeout(Duration::from_millis(50), subscription.recv()).await;
    assert!(next.is_err(), "unexpected delivery: {:?}", next);
}

#[tokio::test]
async fn test_events_arrive_in_order_exactly_once() {
    let (ledger, registry) = setup();
    let query = EventQuery::new_blocks();
    let mut subscription = registry.subscribe(query.clone()).await.unwrap();
    assert!(ledger.events.is_subscribed(&query));

    for height in 1..=5 {
        ledger.events.publish(&query, height);
    }
    // Replays at or below the delivered height are discarded.
    ledger.events.publish(&query, 3);
    ledger.events.publish(&query, 6);

    for expected in 1..=6 {
        assert_eq!(next_height(&mut subscription).await, expected);
    }
    assert_quiet(&mut subscription).await;
}

#[tokio::test]
async fn test_identical_queries_share_one_transport_subscription() {
    let (ledger, registry) = setup();
    let query = EventQuery::new_blocks();
    let mut first = registry.subscribe(query.clone()).await.unwrap();
    let mut second = registry.subscribe(query.clone()).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(ledger.events.subscribe_calls(&query), 1);
    assert_eq!(ledger.events.connects(), 1);

    ledger.events.publish(&query, 10);
    assert_eq!(next_height(&mut first).await, 10);
    assert_eq!(next_height(&mut second).await, 10);

    assert!(registry.unsubscribe(first.id()));
    ledger.events.publish(&query, 11);
    assert_eq!(next_height(&mut second).await, 11);
    assert_eq!(ledger.events.unsubscribe_calls(&query), 0);

    assert!(registry.unsubscribe(second.id()));
    assert!(wait_until(|| ledger.events.unsubscribe_calls(&query) == 1, WAIT).await);
    assert!(!registry.unsubscribe(second.id()));
}

#[tokio::test]
async fn test_queries_are_routed_independently() {
    let (ledger, registry) = setup();
    let mut blocks = registry.subscribe(EventQuery::new_blocks()).await.unwrap();
    let mut filtered = registry.subscribe(transfers()).await.unwrap();

    ledger.events.publish(&transfers(), 7);
    assert_eq!(next_height(&mut filtered).await, 7);
    assert_quiet(&mut blocks).await;
}

#[tokio::test]
async fn test_reconnect_is_transparent() {
    let (ledger, registry) = setup();
    let query = EventQuery::new_blocks();
    let mut subscription = registry.subscribe(query.clone()).await.unwrap();

    ledger.events.publish(&query, 1);
    assert_eq!(next_height(&mut subscription).await, 1);

    ledger.events.drop_connections();
    assert!(wait_until(|| ledger.events.connects() == 2 && ledger.events.is_subscribed(&query), WAIT).await);

    // A replay of height 1 on the new connection is filtered out.
    ledger.events.publish(&query, 1);
    ledger.events.publish(&query, 2);
    assert_eq!(next_height(&mut subscription).await, 2);
    assert!(registry.is_active(subscription.id()));
}

#[tokio::test]
async fn test_exhausted_reconnect_reports_lost_once() {
    let (ledger, registry) = setup();
    let query = EventQuery::new_blocks();
    let mut first = registry.subscribe(query.clone()).await.unwrap();
    let mut second = registry.subscribe(transfers()).await.unwrap();

    ledger.events.refuse_connects(true);
    ledger.events.drop_connections();

    for subscription in [&mut first, &mut second] {
        let id = subscription.id();
        match within(subscription.recv()).await {
            Some(Err(LedgerError::SubscriptionLost { id: lost, .. })) => assert_eq!(lost, id),
            other => panic!("expected lost notice, got {:?}", other),
        }
        assert!(within(subscription.recv()).await.is_none());
    }
    assert_eq!(registry.active_count(), 0);

    // The registry recovers once the node is reachable again.
    ledger.events.refuse_connects(false);
    let mut fresh = registry.subscribe(query.clone()).await.unwrap();
    ledger.events.publish(&query, 42);
    assert_eq!(next_height(&mut fresh).await, 42);
}

#[tokio::test]
async fn test_unsubscribe_during_reconnect_is_not_resurrected() {
    let (ledger, registry) = setup();
    let kept = registry.subscribe(EventQuery::new_blocks()).await.unwrap();
    let mut cancelled = registry.subscribe(transfers()).await.unwrap();

    ledger.events.refuse_connects(true);
    ledger.events.drop_connections();
    assert!(registry.unsubscribe(cancelled.id()));
    ledger.events.refuse_connects(false);

    assert!(wait_until(|| ledger.events.is_subscribed(&EventQuery::new_blocks()), WAIT).await);
    assert!(!ledger.events.is_subscribed(&transfers()));
    assert!(registry.is_active(kept.id()));

    ledger.events.publish(&transfers(), 3);
    assert!(cancelled.is_cancelled());
    assert!(within(cancelled.recv()).await.is_none());
}

#[tokio::test]
async fn test_buffered_events_are_discarded_after_unsubscribe() {
    let (ledger, registry) = setup();
    let query = EventQuery::new_blocks();
    let mut subscription = registry.subscribe(query.clone()).await.unwrap();

    ledger.events.publish(&query, 1);
    ledger.events.publish(&query, 2);
    tokio::time::sleep(Duration::from_millis(50)).await;

    registry.unsubscribe(subscription.id());
    assert!(subscription.recv().await.is_none());
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn test_subscription_as_stream() {
    let (ledger, registry) = setup();
    let query = EventQuery::new_blocks();
    let subscription = registry.subscribe(query.clone()).await.unwrap();

    for height in [5, 6, 7] {
        ledger.events.publish(&query, height);
    }
    let heights: Vec<u64> = within(subscription.take(3).map(|item| item.unwrap().height).collect()).await;
    assert_eq!(heights, vec![5, 6, 7]);
}

#[tokio::test]
async fn test_dropped_receiver_is_pruned() {
    let (ledger, registry) = setup();
    let query = EventQuery::new_blocks();
    let subscription = registry.subscribe(query.clone()).await.unwrap();
    drop(subscription);

    ledger.events.publish(&query, 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    ledger.events.publish(&query, 2);
    assert!(wait_until(|| registry.active_count() == 0, WAIT).await);
    assert!(wait_until(|| ledger.events.unsubscribe_calls(&query) == 1, WAIT).await);
}

#[tokio::test]
async fn test_idle_consumer_does_not_stall_others() {
    let ledger = Arc::new(MockLedger::new());
    let mut config = test_config().subscription;
    config.channel_capacity = 1;
    let registry = SubscriptionRegistry::new(ledger.clone(), &config);
    let query = EventQuery::new_blocks();

    let mut idle = registry.subscribe(query.clone()).await.unwrap();
    for height in 1..=3 {
        ledger.events.publish(&query, height);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The driver keeps serving commands and events while `idle` is full.
    let mut active = within(registry.subscribe(query.clone())).await.unwrap();
    let mut other = within(registry.subscribe(transfers())).await.unwrap();
    ledger.events.publish(&query, 4);
    ledger.events.publish(&transfers(), 9);
    assert_eq!(next_height(&mut active).await, 4);
    assert_eq!(next_height(&mut other).await, 9);

    // Nothing queued behind the full channel is lost or reordered.
    for expected in 1..=4 {
        assert_eq!(next_height(&mut idle).await, expected);
    }
}

#[tokio::test]
async fn test_subscribe_fails_when_node_unreachable() {
    let (ledger, registry) = setup();
    ledger.events.refuse_connects(true);

    let err = within(registry.subscribe(EventQuery::new_blocks())).await.unwrap_err();
    assert!(matches!(err, LedgerError::Transport(_)), "{err}");
    assert_eq!(registry.active_count(), 0);
}

#[tokio::test]
async fn test_shutdown_closes_everything() {
    let (_ledger, registry) = setup();
    let mut subscription = registry.subscribe(EventQuery::new_blocks()).await.unwrap();

    within(registry.shutdown()).await;
    assert!(subscription.recv().await.is_none());
    assert!(matches!(
        registry.subscribe(EventQuery::new_blocks()).await,
        Err(LedgerError::RegistryClosed)
    ));
}
