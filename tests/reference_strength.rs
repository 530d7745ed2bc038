mod support;

use std::sync::Arc;

use mapmaker::{MapMaker, RemovalCause};
use support::EventLog;

#[test]
fn weak_keys_use_identity_equality() {
    let map = MapMaker::new().weak_keys().make_map();

    let k1 = Arc::new("key".to_string());
    map.insert(Arc::clone(&k1), Arc::new(1_i32));

    // A logically equal key from a different allocation never matches.
    let k2 = Arc::new("key".to_string());
    assert!(map.get(&k2).is_none());
    assert!(!map.contains_key(&k2));

    assert_eq!(map.get(&k1).as_deref(), Some(&1));
}

#[test]
fn weak_keys_are_collected_when_dropped() {
    let log = EventLog::new();
    let map = MapMaker::new()
        .weak_keys()
        .removal_listener(log.listener())
        .make_map();

    let key = Arc::new(42_u32);
    map.insert(Arc::clone(&key), Arc::new("v"));
    assert_eq!(map.len(), 1);

    drop(key);
    map.cleanup();

    assert_eq!(map.len(), 0);
    let events = log.events();
    assert_eq!(events.len(), 1);
    // The key reference is already dead, so the notification carries no key.
    assert!(events[0].0.is_none());
    assert_eq!(events[0].1.as_deref(), Some(&"v"));
    assert_eq!(events[0].2, RemovalCause::Collected);
}

#[test]
fn weak_values_are_collected_when_dropped() {
    let log = EventLog::new();
    let map = MapMaker::new()
        .weak_values()
        .removal_listener(log.listener())
        .make_map();

    let value = Arc::new("v".to_string());
    map.insert(Arc::new(1_u32), Arc::clone(&value));
    assert_eq!(map.get(&1).as_deref(), Some(&"v".to_string()));

    drop(value);
    // The reader observes the dead reference and the collection fires
    // before the read returns.
    assert!(map.get(&1).is_none());

    assert_eq!(map.len(), 0);
    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0.as_deref(), Some(&1));
    assert!(events[0].1.is_none());
    assert_eq!(events[0].2, RemovalCause::Collected);
}

#[test]
fn weak_values_stay_visible_while_externally_held() {
    let map = MapMaker::new().weak_values().make_map();
    let value = Arc::new(7_i32);
    map.insert(Arc::new(1_u32), Arc::clone(&value));

    for _ in 0..10 {
        assert_eq!(map.get(&1).as_deref(), Some(&7));
    }
    drop(value);
    assert!(map.get(&1).is_none());
}

#[test]
fn soft_values_survive_until_the_pressure_signal() {
    let log = EventLog::new();
    let map = MapMaker::new()
        .soft_values()
        .removal_listener(log.listener())
        .make_map();

    let value = Arc::new("v".to_string());
    map.insert(Arc::new(1_u32), Arc::clone(&value));
    drop(value);

    // Softly held: the map still owns the referent.
    assert_eq!(map.get(&1).as_deref(), Some(&"v".to_string()));

    map.release_soft_references();

    assert!(map.get(&1).is_none());
    assert_eq!(map.len(), 0);
    let events = log.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0.as_deref(), Some(&1));
    assert!(events[0].1.is_none());
    assert_eq!(events[0].2, RemovalCause::Collected);
}

#[test]
fn soft_keys_use_identity_equality_and_release() {
    let log = EventLog::new();
    let map = MapMaker::new()
        .soft_keys()
        .removal_listener(log.listener())
        .make_map();

    let key = Arc::new("k".to_string());
    map.insert(Arc::clone(&key), Arc::new(1_i32));

    let other = Arc::new("k".to_string());
    assert!(map.get(&other).is_none());
    assert_eq!(map.get(&key).as_deref(), Some(&1));

    map.release_soft_references();
    assert_eq!(map.len(), 0);
    assert_eq!(log.causes(), vec![RemovalCause::Collected]);
}

#[test]
fn weak_values_switch_value_equality_to_identity() {
    let map = MapMaker::new().weak_values().make_map();
    let value = Arc::new("v".to_string());
    map.insert(Arc::new(1_u32), Arc::clone(&value));

    // A logically equal value from a different allocation does not match.
    let lookalike = Arc::new("v".to_string());
    assert!(!map.contains_value(&lookalike));
    assert!(!map.remove_if_equals(&1, &lookalike));

    assert!(map.contains_value(&value));
    assert!(map.remove_if_equals(&1, &value));
    assert!(map.is_empty());
}

#[test]
fn strong_maps_ignore_the_pressure_signal() {
    let map = MapMaker::new().make_map();
    map.insert(Arc::new(1_u32), Arc::new("v"));
    map.release_soft_references();
    assert_eq!(map.get(&1).as_deref(), Some(&"v"));
}

#[test]
fn collected_entries_never_resurface_in_iteration() {
    let map = MapMaker::new().weak_values().make_map();
    let keep = Arc::new(1_i32);
    let lose = Arc::new(2_i32);
    map.insert(Arc::new(1_u32), Arc::clone(&keep));
    map.insert(Arc::new(2_u32), Arc::clone(&lose));
    drop(lose);

    let seen: Vec<u32> = map.iter().map(|(k, _)| *k).collect();
    assert_eq!(seen, vec![1]);
}
