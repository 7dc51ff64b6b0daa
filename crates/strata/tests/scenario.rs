// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end behavior of a two-tier node.

use std::{sync::Arc, time::Duration};

use strata::{
    Action, ConsistencyMode, Coordinator, Delivery, InvalidationBus, InvalidationMessage, Placement, PolicyKind, TieredCache,
    WriteOptions,
    testing::{MockStore, StoreOp},
};
use tick::{Clock, ClockControl};

fn hot_and_cold(clock: Clock) -> Arc<TieredCache<i64>> {
    Arc::new(
        TieredCache::builder(clock)
            .tier("hot", 2, PolicyKind::Lru)
            .tier("cold", 10, PolicyKind::Lfu)
            .build()
            .unwrap(),
    )
}

#[test]
fn set_cold_get_promotes_delete_everywhere() {
    let cache = hot_and_cold(Clock::new_frozen());
    let a = "a".to_string();

    cache.set("a", 1, WriteOptions::default().placement(Placement::Cold)).unwrap();

    assert_eq!(cache.get("a"), Some(1));
    assert!(cache.tiers()[0].contains(&a));

    assert!(cache.delete("a"));
    assert!(!cache.tiers()[0].contains(&a));
    assert!(!cache.tiers()[1].contains(&a));
    assert_eq!(cache.get("a"), None);
}

#[test]
fn promoted_copy_outlives_cold_delete() {
    let cache = hot_and_cold(Clock::new_frozen());
    let a = "a".to_string();
    cache.set("a", 1, WriteOptions::default().placement(Placement::Cold)).unwrap();
    let _ = cache.get("a");

    assert!(cache.tiers()[1].delete(&a));

    assert_eq!(cache.get("a"), Some(1));
}

#[test]
fn ttl_entry_is_gone_after_expiry() {
    let control = ClockControl::new();
    let cache = hot_and_cold(control.to_clock());
    cache
        .set("a", 1, WriteOptions::default().ttl(Duration::from_millis(100)))
        .unwrap();

    control.advance(Duration::from_millis(150));

    assert_eq!(cache.get("a"), None);
    assert!(!cache.contains("a"));
}

#[test]
fn hot_tier_never_exceeds_capacity_under_promotion() {
    let cache = hot_and_cold(Clock::new_frozen());
    for i in 0..10 {
        cache.set(&format!("k{i}"), i, WriteOptions::default()).unwrap();
    }

    for i in 0..10 {
        assert_eq!(cache.get(&format!("k{i}")), Some(i));
        assert!(cache.tiers()[0].len() <= 2);
    }

    let stats = cache.stats();
    assert_eq!(stats.tiers[0].len, 2);
    assert_eq!(stats.tiers[1].len, 10);
}

#[test]
fn same_delete_twice_equals_once() {
    let cache = hot_and_cold(Clock::new_frozen());
    cache.set("a", 1, WriteOptions::default()).unwrap();
    cache.set("b", 2, WriteOptions::default()).unwrap();
    let bus = InvalidationBus::builder(Arc::clone(&cache), Clock::new_frozen())
        .origin_id("node-b")
        .build();
    let bytes = InvalidationMessage {
        action: Action::Delete,
        key: Some("a".to_string()),
        pattern: None,
        tag: None,
        origin_id: "node-a".to_string(),
        timestamp: 7,
        payload: None,
    }
    .encode()
    .unwrap();

    bus.handle(&bytes);
    let once = (cache.contains("a"), cache.get("b"));
    bus.handle(&bytes);

    assert_eq!((cache.contains("a"), cache.get("b")), once);
    assert_eq!(once, (false, Some(2)));
}

#[test]
fn own_origin_is_never_applied() {
    let cache = hot_and_cold(Clock::new_frozen());
    cache.set("a", 1, WriteOptions::default()).unwrap();
    let bus = InvalidationBus::builder(Arc::clone(&cache), Clock::new_frozen())
        .origin_id("node-a")
        .build();
    let clear = InvalidationMessage {
        action: Action::Clear,
        key: None,
        pattern: None,
        tag: None,
        origin_id: bus.origin_id().to_string(),
        timestamp: 1,
        payload: None,
    };

    assert_eq!(bus.handle(&clear.encode().unwrap()), Delivery::Echo);
    assert_eq!(cache.get("a"), Some(1));
}

#[tokio::test]
async fn write_through_failure_keeps_previous_state() {
    let clock = Clock::new_frozen();
    let store = MockStore::new();
    let coordinator = Coordinator::builder(hot_and_cold(clock.clone()), store.clone(), clock)
        .mode(ConsistencyMode::WriteThrough)
        .build()
        .unwrap();
    coordinator.write("existing", 1, WriteOptions::default()).await.unwrap();
    store.fail_when(|op| matches!(op, StoreOp::Write { .. }));

    assert!(coordinator.write("existing", 2, WriteOptions::default()).await.is_err());
    assert!(coordinator.write("fresh", 3, WriteOptions::default()).await.is_err());

    assert_eq!(coordinator.get("existing"), Some(1));
    assert!(!coordinator.cache().contains("fresh"));
}
