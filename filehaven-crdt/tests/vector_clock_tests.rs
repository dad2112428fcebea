use filehaven_crdt::{CausalOrder, VectorClock};
use filehaven_types::DeviceId;

fn dev(s: &str) -> DeviceId {
    DeviceId::new(s)
}

#[test]
fn new_clock_is_empty() {
    let clock = VectorClock::new();
    assert!(clock.is_empty());
    assert_eq!(clock.len(), 0);
}

#[test]
fn default_is_empty() {
    let clock = VectorClock::default();
    assert!(clock.is_empty());
}

#[test]
fn get_unknown_device_returns_zero() {
    let clock = VectorClock::new();
    assert_eq!(clock.get(&dev("phone")), 0);
}

#[test]
fn increment_returns_new_clock() {
    let clock = VectorClock::new();
    let bumped = clock.increment(&dev("phone"));

    assert_eq!(bumped.get(&dev("phone")), 1);
    // Original unchanged — the clock is a pure value type.
    assert_eq!(clock.get(&dev("phone")), 0);
    assert!(clock.is_empty());
}

#[test]
fn increment_chains() {
    let clock = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("phone"))
        .increment(&dev("laptop"));

    assert_eq!(clock.get(&dev("phone")), 2);
    assert_eq!(clock.get(&dev("laptop")), 1);
    assert_eq!(clock.len(), 2);
}

#[test]
fn observe_raises_to_count() {
    let clock = VectorClock::new().observe(&dev("phone"), 5);
    assert_eq!(clock.get(&dev("phone")), 5);
}

#[test]
fn observe_lower_count_is_noop() {
    let clock = VectorClock::new()
        .observe(&dev("phone"), 10)
        .observe(&dev("phone"), 3);
    assert_eq!(clock.get(&dev("phone")), 10);
}

#[test]
fn devices_iterator() {
    let clock = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("laptop"));
    let devices: Vec<_> = clock.devices().collect();
    assert_eq!(devices.len(), 2);
}

// ── Compare ──────────────────────────────────────────────────────

#[test]
fn compare_empty_clocks_are_equal() {
    let a = VectorClock::new();
    let b = VectorClock::new();
    assert_eq!(a.compare(&b), CausalOrder::Equal);
}

#[test]
fn compare_equal_clocks() {
    let a = VectorClock::new().increment(&dev("phone"));
    let b = VectorClock::new().increment(&dev("phone"));
    assert_eq!(a.compare(&b), CausalOrder::Equal);
    assert_eq!(a, b);
}

#[test]
fn compare_before_after() {
    let a = VectorClock::new().increment(&dev("phone"));
    let b = a.increment(&dev("phone"));

    assert_eq!(a.compare(&b), CausalOrder::Before);
    assert_eq!(b.compare(&a), CausalOrder::After);
    assert!(a.happens_before(&b));
    assert!(!b.happens_before(&a));
}

#[test]
fn happens_before_is_antisymmetric() {
    let a = VectorClock::new().increment(&dev("phone"));
    let b = a.increment(&dev("laptop"));

    assert!(a.happens_before(&b));
    assert!(!b.happens_before(&a));
}

#[test]
fn compare_concurrent() {
    let a = VectorClock::new().increment(&dev("phone"));
    let b = VectorClock::new().increment(&dev("laptop"));

    assert_eq!(a.compare(&b), CausalOrder::Concurrent);
    assert!(a.is_concurrent_with(&b));
    assert!(!a.happens_before(&b));
    assert!(!b.happens_before(&a));
}

#[test]
fn equal_clocks_are_not_concurrent() {
    let a = VectorClock::new().increment(&dev("phone"));
    let b = VectorClock::new().increment(&dev("phone"));
    assert!(!a.is_concurrent_with(&b));
}

#[test]
fn dominates_after_and_equal() {
    let a = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("phone"));
    let b = VectorClock::new().increment(&dev("phone"));

    assert!(a.dominates(&b));
    assert!(!b.dominates(&a));
    assert!(a.dominates(&a.clone()));
}

// ── Merge ────────────────────────────────────────────────────────

#[test]
fn merge_takes_elementwise_maximum() {
    let a = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("phone"));
    let b = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("laptop"))
        .increment(&dev("laptop"))
        .increment(&dev("laptop"));

    let merged = a.merge(&b);
    assert_eq!(merged.get(&dev("phone")), 2);
    assert_eq!(merged.get(&dev("laptop")), 3);
}

#[test]
fn merge_is_least_upper_bound() {
    let a = VectorClock::new().observe(&dev("phone"), 4).observe(&dev("tablet"), 1);
    let b = VectorClock::new().observe(&dev("phone"), 2).observe(&dev("laptop"), 7);

    let merged = a.merge(&b);
    for device in ["phone", "tablet", "laptop"] {
        let d = dev(device);
        assert_eq!(merged.get(&d), a.get(&d).max(b.get(&d)));
    }
}

#[test]
fn merge_is_commutative() {
    let a = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("phone"));
    let b = VectorClock::new().increment(&dev("laptop"));

    assert_eq!(a.merge(&b), b.merge(&a));
}

#[test]
fn merge_is_idempotent() {
    let clock = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("phone"));

    let once = clock.merge(&clock);
    let twice = once.merge(&clock);
    assert_eq!(once, twice);
    assert_eq!(once, clock);
}

#[test]
fn merge_is_associative() {
    let a = VectorClock::new().increment(&dev("phone"));
    let b = VectorClock::new().increment(&dev("laptop"));
    let c = VectorClock::new().increment(&dev("tablet"));

    let ab_c = a.merge(&b).merge(&c);
    let a_bc = a.merge(&b.merge(&c));
    assert_eq!(ab_c, a_bc);
}

#[test]
fn merge_leaves_inputs_unchanged() {
    let a = VectorClock::new().increment(&dev("phone"));
    let b = VectorClock::new().increment(&dev("laptop"));

    let _ = a.merge(&b);
    assert_eq!(a.get(&dev("phone")), 1);
    assert_eq!(a.get(&dev("laptop")), 0);
}

// ── Serde ────────────────────────────────────────────────────────

#[test]
fn serialization_roundtrip() {
    let clock = VectorClock::new()
        .increment(&dev("phone"))
        .increment(&dev("phone"))
        .increment(&dev("laptop"));

    let json = serde_json::to_string(&clock).unwrap();
    let parsed: VectorClock = serde_json::from_str(&json).unwrap();
    assert_eq!(clock, parsed);
}
