//! Property-based tests for CRDT correctness.
//!
//! These verify the fundamental properties both replicated types must
//! satisfy for convergence:
//! - Commutativity: merge(A, B) == merge(B, A)
//! - Associativity: merge(merge(A, B), C) == merge(A, merge(B, C))
//! - Idempotence: merge(A, A) == A

use filehaven_crdt::{FileMetadata, VectorClock};
use filehaven_types::DeviceId;
use proptest::prelude::*;

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn device_id_strategy() -> impl Strategy<Value = DeviceId> {
    prop::string::string_regex("[a-z]{1,8}-[0-9]{1,4}")
        .unwrap()
        .prop_map(DeviceId::new)
}

fn clock_strategy() -> impl Strategy<Value = VectorClock> {
    prop::collection::vec((device_id_strategy(), 0u64..100), 0..6).prop_map(|entries| {
        entries
            .into_iter()
            .fold(VectorClock::new(), |clock, (device, count)| {
                clock.observe(&device, count)
            })
    })
}

fn metadata_strategy() -> impl Strategy<Value = FileMetadata> {
    (1u64..1000, device_id_strategy(), any::<u32>(), any::<bool>()).prop_map(
        |(version, device, size, deleted)| {
            let mut meta =
                FileMetadata::new("/shared/path.txt", "path.txt", size as u64, false, device);
            meta.version = version;
            meta.deleted = deleted;
            meta
        },
    )
}

// =============================================================================
// VECTOR CLOCK PROPERTIES
// =============================================================================

mod vector_clock_properties {
    use super::*;

    proptest! {
        #[test]
        fn merge_is_commutative(a in clock_strategy(), b in clock_strategy()) {
            prop_assert_eq!(a.merge(&b), b.merge(&a));
        }

        #[test]
        fn merge_is_associative(
            a in clock_strategy(),
            b in clock_strategy(),
            c in clock_strategy(),
        ) {
            prop_assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
        }

        #[test]
        fn merge_is_idempotent(a in clock_strategy()) {
            prop_assert_eq!(a.merge(&a), a);
        }

        /// merge(A, B)[d] == max(A[d], B[d]) for every device d.
        #[test]
        fn merge_is_least_upper_bound(a in clock_strategy(), b in clock_strategy()) {
            let merged = a.merge(&b);
            for (device, _) in a.devices().chain(b.devices()) {
                prop_assert_eq!(merged.get(device), a.get(device).max(b.get(device)));
            }
        }

        /// If A happens-before B then NOT B happens-before A.
        #[test]
        fn happens_before_is_antisymmetric(a in clock_strategy(), b in clock_strategy()) {
            if a.happens_before(&b) {
                prop_assert!(!b.happens_before(&a));
            }
        }

        /// Incrementing always produces a strictly later clock.
        #[test]
        fn increment_is_strictly_later(a in clock_strategy(), d in device_id_strategy()) {
            let bumped = a.increment(&d);
            prop_assert!(a.happens_before(&bumped));
        }

        /// A merged clock dominates both inputs.
        #[test]
        fn merge_dominates_inputs(a in clock_strategy(), b in clock_strategy()) {
            let merged = a.merge(&b);
            prop_assert!(merged.dominates(&a));
            prop_assert!(merged.dominates(&b));
        }
    }
}

// =============================================================================
// FILE METADATA PROPERTIES
// =============================================================================

mod file_metadata_properties {
    use super::*;

    proptest! {
        #[test]
        fn merge_is_commutative(a in metadata_strategy(), b in metadata_strategy()) {
            prop_assert_eq!(a.merge(&b).unwrap(), b.merge(&a).unwrap());
        }

        #[test]
        fn merge_is_associative(
            a in metadata_strategy(),
            b in metadata_strategy(),
            c in metadata_strategy(),
        ) {
            let left = a.merge(&b).unwrap().merge(&c).unwrap();
            let right = a.merge(&b.merge(&c).unwrap()).unwrap();
            prop_assert_eq!(left, right);
        }

        #[test]
        fn merge_is_idempotent(a in metadata_strategy()) {
            prop_assert_eq!(a.merge(&a).unwrap(), a);
        }

        /// The merge winner is always one of the two inputs.
        #[test]
        fn merge_selects_an_input(a in metadata_strategy(), b in metadata_strategy()) {
            let merged = a.merge(&b).unwrap();
            prop_assert!(merged == a || merged == b);
        }

        /// increment_version never decreases version or modified_at.
        #[test]
        fn increment_version_is_monotonic(a in metadata_strategy(), d in device_id_strategy()) {
            let next = a.increment_version(d);
            prop_assert!(next.version > a.version);
            prop_assert!(next.modified_at >= a.modified_at);
        }
    }
}
