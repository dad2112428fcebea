//! Vector clock for causality tracking across devices.
//!
//! Each device carries a monotonic counter; comparing clocks determines
//! whether two observations are causally ordered or concurrent.
//!
//! Use cases:
//! - Detecting concurrent offline edits during reconciliation
//! - Deciding when the conflict resolver must be consulted
//!
//! Unlike a register, the clock is a pure value type: `increment` and
//! `merge` return new clocks and never mutate in place, so a clock held
//! by one component can never be advanced out from under another.

use filehaven_types::DeviceId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Causality relationship between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    /// First clock happened before second.
    Before,
    /// First clock happened after second.
    After,
    /// Clocks are concurrent (neither happened before the other).
    Concurrent,
    /// Clocks are identical.
    Equal,
}

/// A vector clock mapping device ids to monotonic counters.
///
/// Counters for devices absent from the map read as zero. No observer
/// ever sees a device's counter decrease: `increment` only adds one and
/// `merge` takes the elementwise maximum.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorClock {
    /// Map from device id to that device's logical time.
    clocks: HashMap<DeviceId, u64>,
}

impl VectorClock {
    /// Creates a new empty vector clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clocks: HashMap::new(),
        }
    }

    /// Returns the counter for a device (0 if not present).
    #[must_use]
    pub fn get(&self, device_id: &DeviceId) -> u64 {
        self.clocks.get(device_id).copied().unwrap_or(0)
    }

    /// Returns all devices and their counters.
    pub fn devices(&self) -> impl Iterator<Item = (&DeviceId, &u64)> {
        self.clocks.iter()
    }

    /// Returns the number of devices in the clock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Returns true if the clock has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Returns a new clock with the device's counter incremented by one
    /// (from a default of 0), all other entries unchanged.
    #[must_use]
    pub fn increment(&self, device_id: &DeviceId) -> Self {
        let mut clocks = self.clocks.clone();
        *clocks.entry(device_id.clone()).or_insert(0) += 1;
        Self { clocks }
    }

    /// Returns a new clock whose entry for the device is raised to
    /// `count` if that is higher than the current value.
    ///
    /// Used when folding in an externally observed counter, e.g. the
    /// highest record version seen from a device.
    #[must_use]
    pub fn observe(&self, device_id: &DeviceId, count: u64) -> Self {
        let mut clocks = self.clocks.clone();
        let entry = clocks.entry(device_id.clone()).or_insert(0);
        if count > *entry {
            *entry = count;
        }
        Self { clocks }
    }

    /// Returns the least upper bound of the two clocks: for every device
    /// present in either, the maximum of the two counters.
    ///
    /// Commutative, associative, and idempotent.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut clocks = self.clocks.clone();
        for (device_id, &count) in &other.clocks {
            let entry = clocks.entry(device_id.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
        Self { clocks }
    }

    /// Compares this clock with another to determine causal ordering.
    #[must_use]
    pub fn compare(&self, other: &Self) -> CausalOrder {
        let mut dominated_by_self = true; // self >= other for all devices
        let mut dominated_by_other = true; // other >= self for all devices

        let all_devices: std::collections::HashSet<_> = self
            .clocks
            .keys()
            .chain(other.clocks.keys())
            .collect();

        for device_id in all_devices {
            let self_count = self.get(device_id);
            let other_count = other.get(device_id);

            if self_count < other_count {
                dominated_by_self = false;
            }
            if other_count < self_count {
                dominated_by_other = false;
            }
        }

        match (dominated_by_self, dominated_by_other) {
            (true, true) => CausalOrder::Equal,
            (true, false) => CausalOrder::After,
            (false, true) => CausalOrder::Before,
            (false, false) => CausalOrder::Concurrent,
        }
    }

    /// True iff every entry of self is ≤ the corresponding entry of
    /// other and at least one is strictly smaller.
    #[must_use]
    pub fn happens_before(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Before
    }

    /// True iff neither clock happens-before the other and they are not
    /// equal.
    #[must_use]
    pub fn is_concurrent_with(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Concurrent
    }

    /// Returns true if this clock dominates the other (is >= for all
    /// devices).
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        matches!(self.compare(other), CausalOrder::After | CausalOrder::Equal)
    }
}

impl PartialEq for VectorClock {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == CausalOrder::Equal
    }
}

impl Eq for VectorClock {}
