// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests for the tiered cache: placement, promotion and invalidation.

use std::time::Duration;

use rstest::rstest;
use strata::{
    CacheConfig, Error, Level, Placement, PlacementHints, PolicyKind, SizeClass, TelemetryConfig, TierSpec, TieredCache,
    TieredLookup, WriteOptions,
};
use tick::{Clock, ClockControl};

fn two_tiers(clock: Clock) -> TieredCache<String> {
    TieredCache::builder(clock)
        .tier("hot", 2, PolicyKind::Lru)
        .tier("cold", 10, PolicyKind::Lfu)
        .build()
        .unwrap()
}

fn value(s: &str) -> String {
    s.to_string()
}

#[test]
fn default_placement_is_slowest_tier() {
    let cache = two_tiers(Clock::new_frozen());

    let tier = cache.set("k", value("v"), WriteOptions::default()).unwrap();

    assert_eq!(tier, 1);
    assert!(cache.tiers()[1].contains(&"k".to_string()));
    assert!(!cache.tiers()[0].contains(&"k".to_string()));
}

#[test]
fn hit_in_slow_tier_is_promoted() {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("k", value("v"), WriteOptions::default()).unwrap();

    assert_eq!(
        cache.lookup("k"),
        TieredLookup::Hit {
            value: value("v"),
            tier: 1
        }
    );
    assert_eq!(
        cache.lookup("k"),
        TieredLookup::Hit {
            value: value("v"),
            tier: 0
        }
    );
}

#[test]
fn delete_is_idempotent() {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("k", value("v"), WriteOptions::default()).unwrap();
    let _ = cache.get("k");

    assert!(cache.delete("k"));
    assert!(!cache.delete("k"));
    assert!(!cache.contains("k"));
    assert_eq!(cache.get("k"), None);
}

#[test]
fn expired_entry_is_reported_then_gone() {
    let control = ClockControl::new();
    let cache = two_tiers(control.to_clock());
    cache
        .set("k", value("v"), WriteOptions::default().ttl(Duration::from_secs(5)))
        .unwrap();

    control.advance(Duration::from_secs(4));
    assert_eq!(cache.get("k"), Some(value("v")));

    control.advance(Duration::from_secs(2));
    assert_eq!(cache.lookup("k"), TieredLookup::Expired { stale: value("v") });
    assert_eq!(cache.lookup("k"), TieredLookup::Miss);
}

#[test]
fn promoted_copy_keeps_expiry() {
    let control = ClockControl::new();
    let cache = two_tiers(control.to_clock());
    cache
        .set("k", value("v"), WriteOptions::default().ttl(Duration::from_secs(5)))
        .unwrap();
    let _ = cache.get("k");

    control.advance(Duration::from_secs(6));

    assert_eq!(cache.get("k"), None);
    assert!(!cache.contains("k"));
}

#[test]
fn invalidate_tag_removes_tagged_entries_in_every_tier() {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("a", value("1"), WriteOptions::default().tag("users")).unwrap();
    cache
        .set("b", value("2"), WriteOptions::default().tag("users").placement(Placement::Hot))
        .unwrap();
    cache.set("c", value("3"), WriteOptions::default().tag("orders")).unwrap();
    let _ = cache.get("a");

    assert_eq!(cache.invalidate_tag("users"), 2);

    assert!(!cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
}

#[rstest]
#[case::bare("user:")]
#[case::star("user:*")]
fn invalidate_pattern_matches_prefix(#[case] pattern: &str) {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("user:1", value("a"), WriteOptions::default()).unwrap();
    cache.set("user:2", value("b"), WriteOptions::default()).unwrap();
    cache.set("order:1", value("c"), WriteOptions::default()).unwrap();

    assert_eq!(cache.invalidate_pattern(pattern), 2);

    assert!(!cache.contains("user:1"));
    assert!(!cache.contains("user:2"));
    assert!(cache.contains("order:1"));
}

#[test]
fn delete_cascades_through_dependency_chain() {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("user:1", value("alice"), WriteOptions::default()).unwrap();
    cache
        .set("profile:1", value("p"), WriteOptions::default().depends_on("user:1"))
        .unwrap();
    cache
        .set("avatar:1", value("img"), WriteOptions::default().depends_on("profile:1"))
        .unwrap();
    cache.set("user:2", value("bob"), WriteOptions::default()).unwrap();

    cache.delete("user:1");

    assert!(!cache.contains("profile:1"));
    assert!(!cache.contains("avatar:1"));
    assert!(cache.contains("user:2"));
}

#[test]
fn dependency_cycle_terminates() {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("a", value("1"), WriteOptions::default().depends_on("b")).unwrap();
    cache.set("b", value("2"), WriteOptions::default().depends_on("a")).unwrap();

    assert!(cache.delete("a"));

    assert!(!cache.contains("b"));
}

#[test]
fn tag_invalidation_counts_dependents() {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("root", value("r"), WriteOptions::default().tag("t")).unwrap();
    cache.set("leaf", value("l"), WriteOptions::default().depends_on("root")).unwrap();

    assert_eq!(cache.invalidate_tag("t"), 2);
}

#[rstest]
#[case::high_priority(Level::High, Level::Low, SizeClass::Large, 0)]
#[case::frequent_small(Level::Low, Level::High, SizeClass::Small, 0)]
#[case::medium_priority(Level::Medium, Level::Low, SizeClass::Large, 1)]
#[case::everything_else(Level::Low, Level::Medium, SizeClass::Medium, 2)]
fn smart_placement_follows_hints(
    #[case] priority: Level,
    #[case] frequency: Level,
    #[case] size: SizeClass,
    #[case] expected: usize,
) {
    let cache = TieredCache::builder(Clock::new_frozen())
        .tier("hot", 4, PolicyKind::Lru)
        .tier("warm", 4, PolicyKind::Lru)
        .tier("cold", 4, PolicyKind::Fifo)
        .build()
        .unwrap();

    let tier = cache
        .smart_placement("k", 1, PlacementHints { priority, frequency, size })
        .unwrap();

    assert_eq!(tier, expected);
    assert!(cache.tiers()[expected].contains(&"k".to_string()));
}

#[test]
fn explicit_tier_out_of_range_is_rejected() {
    let cache = two_tiers(Clock::new_frozen());

    let error = cache
        .set("k", value("v"), WriteOptions::default().placement(Placement::Tier(5)))
        .unwrap_err();

    assert!(matches!(error, Error::Config(_)));
    assert!(!cache.contains("k"));
}

#[test]
fn builder_rejects_zero_capacity_and_empty_tier_list() {
    let zero = TieredCache::builder::<i32>(Clock::new_frozen())
        .tier("hot", 0, PolicyKind::Lru)
        .build();
    assert!(matches!(zero, Err(Error::Capacity(_))));

    let empty = TieredCache::builder::<i32>(Clock::new_frozen()).build();
    assert!(matches!(empty, Err(Error::Config(_))));
}

#[test]
fn config_builds_matching_cache() {
    let config = CacheConfig {
        tiers: vec![
            TierSpec::new("memory", 3, PolicyKind::Lru),
            TierSpec::new("disk", 30, PolicyKind::ttl(Duration::from_secs(60))),
        ],
        ..CacheConfig::default()
    };

    let cache = config
        .build_cache::<u64>(Clock::new_frozen(), TelemetryConfig::new())
        .unwrap();

    let stats = cache.stats();
    assert_eq!(stats.tiers.len(), 2);
    assert_eq!(stats.tiers[0].name, "memory");
    assert_eq!(stats.tiers[0].capacity, 3);
    assert_eq!(stats.tiers[1].name, "disk");
}

#[test]
fn clear_empties_every_tier() {
    let cache = two_tiers(Clock::new_frozen());
    cache.set("a", value("1"), WriteOptions::default()).unwrap();
    cache.set("b", value("2"), WriteOptions::default()).unwrap();
    let _ = cache.get("a");

    assert_eq!(cache.clear(), 3);
    assert!(cache.stats().tiers.iter().all(|tier| tier.len == 0));
}

fn wide_tiers() -> TieredCache<u64> {
    TieredCache::builder(Clock::new_frozen())
        .tier("hot", 512, PolicyKind::Lru)
        .tier("cold", 100_000, PolicyKind::Lfu)
        .build()
        .unwrap()
}

#[test]
fn racing_reads_never_resurrect_an_overwritten_value() {
    const WRITES: u64 = 2_000;
    let cache = wide_tiers();
    cache.set("k", 0, WriteOptions::default()).unwrap();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for value in 1..=WRITES {
                cache.set("k", value, WriteOptions::default()).unwrap();
            }
        });

        scope.spawn(|| {
            let mut last_seen = 0;
            for _ in 0..WRITES {
                if let Some(value) = cache.get("k") {
                    assert!(value >= last_seen, "read {value} after {last_seen}");
                    last_seen = value;
                }
            }
        });
    });

    for _ in 0..3 {
        assert_eq!(cache.get("k"), Some(WRITES));
    }
}

#[test]
fn writes_to_other_keys_do_not_block_promotion() {
    const KEYS: u64 = 200;
    let cache = wide_tiers();
    for i in 0..KEYS {
        cache.set(&format!("read:{i}"), i, WriteOptions::default()).unwrap();
    }

    std::thread::scope(|scope| {
        let writer = scope.spawn(|| {
            for i in 0..20_000_u64 {
                cache.set(&format!("noise:{}", i % 1_000), i, WriteOptions::default()).unwrap();
            }
        });

        for i in 0..KEYS {
            assert_eq!(cache.lookup(&format!("read:{i}")), TieredLookup::Hit { value: i, tier: 1 });
        }

        writer.join().unwrap();
    });

    for i in 0..KEYS {
        assert_eq!(cache.lookup(&format!("read:{i}")), TieredLookup::Hit { value: i, tier: 0 });
    }
}

#[test]
fn mixed_operations_from_many_threads_finish() {
    let cache = TieredCache::builder::<u64>(Clock::new_frozen())
        .tier("hot", 8, PolicyKind::Lru)
        .tier("warm", 32, PolicyKind::Fifo)
        .tier("cold", 128, PolicyKind::Lfu)
        .build()
        .unwrap();

    std::thread::scope(|scope| {
        for worker in 0..4_u64 {
            let cache = &cache;
            scope.spawn(move || {
                for i in 0..500_u64 {
                    let key = format!("k:{}", (i + worker) % 40);
                    let options = WriteOptions::default()
                        .placement(Placement::Tier(usize::try_from(i % 3).unwrap()))
                        .tag(format!("t:{}", i % 5))
                        .depends_on(format!("k:{}", (i + 1) % 40));
                    cache.set(&key, i, options).unwrap();
                    let _ = cache.get(&format!("k:{}", i % 40));

                    match (i + worker) % 50 {
                        0 => {
                            cache.clear();
                        }
                        10 => {
                            cache.invalidate_tag(&format!("t:{worker}"));
                        }
                        20 => {
                            cache.invalidate_pattern("k:1*");
                        }
                        30 => {
                            cache.delete(&key);
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    cache.clear();
    assert!(cache.stats().tiers.iter().all(|tier| tier.len == 0));
}
