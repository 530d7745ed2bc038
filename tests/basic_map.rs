mod support;

use std::{sync::Arc, thread};

use mapmaker::{MapMaker, RemovalCause};
use support::EventLog;

#[test]
fn insert_get_remove_roundtrip() {
    let log = EventLog::new();
    let map = MapMaker::new()
        .removal_listener(log.listener())
        .make_map();

    assert!(map.insert(Arc::new("a"), Arc::new(1_i32)).is_none());
    assert_eq!(map.get(&"a").as_deref(), Some(&1));
    assert_eq!(map.remove(&"a").as_deref(), Some(&1));
    assert!(map.get(&"a").is_none());

    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0.as_deref(), Some(&"a"));
    assert_eq!(events[0].1.as_deref(), Some(&1));
    assert_eq!(events[0].2, RemovalCause::Explicit);
}

#[test]
fn insert_returns_previous_and_fires_replaced() {
    let log = EventLog::new();
    let map = MapMaker::new()
        .removal_listener(log.listener())
        .make_map();

    map.insert(Arc::new(7_u32), Arc::new("old"));
    let previous = map.insert(Arc::new(7_u32), Arc::new("new"));
    assert_eq!(previous.as_deref(), Some(&"old"));
    assert_eq!(map.get(&7).as_deref(), Some(&"new"));
    assert_eq!(map.len(), 1);
    assert_eq!(log.causes(), vec![RemovalCause::Replaced]);
}

#[test]
fn insert_if_absent_keeps_existing() {
    let map = MapMaker::new().make_map();
    assert!(map.insert_if_absent(Arc::new(1_u32), Arc::new("first")).is_none());
    assert_eq!(
        map.insert_if_absent(Arc::new(1_u32), Arc::new("second"))
            .as_deref(),
        Some(&"first")
    );
    assert_eq!(map.get(&1).as_deref(), Some(&"first"));
}

#[test]
fn replace_requires_presence() {
    let map = MapMaker::new().make_map();
    assert!(map.replace(&1_u32, Arc::new("x")).is_none());
    assert!(map.get(&1).is_none());

    map.insert(Arc::new(1_u32), Arc::new("x"));
    assert_eq!(map.replace(&1, Arc::new("y")).as_deref(), Some(&"x"));
    assert_eq!(map.get(&1).as_deref(), Some(&"y"));
}

#[test]
fn replace_if_equals_checks_expected() {
    let map = MapMaker::new().make_map();
    map.insert(Arc::new(1_u32), Arc::new("x"));

    assert!(!map.replace_if_equals(&1, &"wrong", Arc::new("y")));
    assert_eq!(map.get(&1).as_deref(), Some(&"x"));

    assert!(map.replace_if_equals(&1, &"x", Arc::new("y")));
    assert_eq!(map.get(&1).as_deref(), Some(&"y"));
}

#[test]
fn remove_if_equals_checks_expected() {
    let map = MapMaker::new().make_map();
    map.insert(Arc::new(1_u32), Arc::new("x"));

    assert!(!map.remove_if_equals(&1, &"wrong"));
    assert!(map.contains_key(&1));

    assert!(map.remove_if_equals(&1, &"x"));
    assert!(!map.contains_key(&1));
}

#[test]
fn contains_len_and_emptiness() {
    let map = MapMaker::new().make_map();
    assert!(map.is_empty());

    for i in 0..50_u32 {
        map.insert(Arc::new(i), Arc::new(i * 2));
    }
    assert_eq!(map.len(), 50);
    assert!(map.contains_key(&49));
    assert!(!map.contains_key(&50));
    assert!(map.contains_value(&98));
    assert!(!map.contains_value(&99));
}

#[test]
fn clear_notifies_explicit_for_each_entry() {
    let log = EventLog::new();
    let map = MapMaker::new()
        .removal_listener(log.listener())
        .make_map();

    for i in 0..10_u32 {
        map.insert(Arc::new(i), Arc::new(i));
    }
    map.clear();

    assert!(map.is_empty());
    assert_eq!(log.len(), 10);
    assert!(log.causes().iter().all(|c| *c == RemovalCause::Explicit));
}

#[test]
fn iteration_yields_live_entries() {
    let map = MapMaker::new().make_map();
    for i in 0..20_u32 {
        map.insert(Arc::new(i), Arc::new(i + 100));
    }
    map.remove(&3);

    let mut seen: Vec<(u32, u32)> = map.iter().map(|(k, v)| (*k, *v)).collect();
    seen.sort_unstable();
    assert_eq!(seen.len(), 19);
    assert!(!seen.iter().any(|(k, _)| *k == 3));
    assert!(seen.iter().all(|(k, v)| *v == *k + 100));
}

#[test]
fn resize_preserves_entries() {
    // Push each segment well past its initial bucket threshold.
    let map = MapMaker::new().initial_capacity(4).make_map();
    for i in 0..1_000_u32 {
        map.insert(Arc::new(i), Arc::new(i));
    }
    assert_eq!(map.len(), 1_000);
    for i in 0..1_000_u32 {
        assert_eq!(map.get(&i).as_deref(), Some(&i), "key {i} lost in resize");
    }
}

#[test]
fn concurrent_access_across_threads() {
    let map = MapMaker::new().concurrency_level(8).make_map();
    let threads: Vec<_> = (0..8_u32)
        .map(|id| {
            let map = map.clone();
            thread::spawn(move || {
                for i in 0..250_u32 {
                    let key = id * 1_000 + i;
                    map.insert(Arc::new(key), Arc::new(key));
                    assert_eq!(map.get(&key).as_deref(), Some(&key));
                }
                for i in 0..250_u32 {
                    if i % 2 == 0 {
                        map.remove(&(id * 1_000 + i));
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(map.len(), 8 * 125);
}

#[test]
fn stats_record_hits_and_misses() {
    let map = MapMaker::new().record_stats().make_map();
    map.insert(Arc::new(1_u32), Arc::new(1_u32));
    map.get(&1);
    map.get(&1);
    map.get(&2);

    let stats = map.stats();
    assert_eq!(stats.hit_count(), 2);
    assert_eq!(stats.miss_count(), 1);
    assert_eq!(stats.eviction_count(), 0);
}

#[test]
fn debug_renders_entries() {
    let map = MapMaker::new().make_map();
    map.insert(Arc::new(1_u32), Arc::new("one"));
    let rendered = format!("{map:?}");
    assert!(rendered.contains("1"));
    assert!(rendered.contains("one"));
}
