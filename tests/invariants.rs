//! Property-based tests for the universal invariants discovery relies on:
//! deterministic ID stability, acronym-normalization equivalence, and the
//! confidence ratchet never downgrading.

use incentive_finder::cache::Confidence;
use incentive_finder::identity::{compute_program_id, normalize_program_name};
use proptest::prelude::*;

fn confidence_strategy() -> impl Strategy<Value = Confidence> {
    prop_oneof![
        Just(Confidence::Low),
        Just(Confidence::Medium),
        Just(Confidence::High),
    ]
}

fn program_name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z ]{1,40}"
}

proptest! {
    /// Computing a program ID from the same normalized name/level/location must
    /// always reproduce the same ID, regardless of how many times it's computed.
    #[test]
    fn program_id_is_stable_across_repeated_computation(
        name in program_name_strategy(),
        level in prop_oneof![Just("federal"), Just("state"), Just("county"), Just("city")],
        location in "[a-z_]{1,20}",
    ) {
        let normalized = normalize_program_name(&name);
        let first = compute_program_id(&normalized, level, &location);
        let second = compute_program_id(&normalized, level, &location);
        prop_assert_eq!(first, second);
    }

    /// A program ID is always 16 lowercase hex characters, for any input.
    #[test]
    fn program_id_is_always_16_hex_chars(
        name in program_name_strategy(),
        level in "[a-z]{1,10}",
        location in "[a-z_]{0,20}",
    ) {
        let normalized = normalize_program_name(&name);
        let id = compute_program_id(&normalized, &level, &location);
        prop_assert_eq!(id.len(), 16);
        prop_assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Normalizing is idempotent: normalizing an already-normalized name is a no-op.
    #[test]
    fn normalize_program_name_is_idempotent(name in program_name_strategy()) {
        let once = normalize_program_name(&name);
        let twice = normalize_program_name(&once);
        prop_assert_eq!(once, twice);
    }

    /// "WOTC" and its full expansion must normalize identically, and that
    /// equivalence must survive arbitrary surrounding whitespace/punctuation.
    #[test]
    fn acronym_and_expansion_normalize_equivalently(
        prefix in "[ ,.-]{0,5}",
        suffix in "[ ,.-]{0,5}",
    ) {
        let acronym = format!("{prefix}WOTC{suffix}");
        let expansion = format!("{prefix}Work Opportunity Tax Credit{suffix}");
        prop_assert_eq!(normalize_program_name(&acronym), normalize_program_name(&expansion));
    }

    /// Ratcheting confidence with any value never produces something lower than
    /// either input — the ratchet is a max, so it's commutative and idempotent.
    #[test]
    fn confidence_ratchet_never_downgrades(
        a in confidence_strategy(),
        b in confidence_strategy(),
    ) {
        let ratcheted = a.ratchet(b);
        prop_assert!(ratcheted >= a);
        prop_assert!(ratcheted >= b);
        prop_assert_eq!(a.ratchet(b), b.ratchet(a));
    }

    /// Ratcheting is idempotent: ratcheting a value with itself is a no-op.
    #[test]
    fn confidence_ratchet_with_self_is_identity(a in confidence_strategy()) {
        prop_assert_eq!(a.ratchet(a), a);
    }
}
