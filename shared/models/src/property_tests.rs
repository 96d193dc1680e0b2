//! Property-based tests for the resolution engine and boundary types.

use proptest::prelude::*;
use std::collections::HashSet;

use crate::{
    is_valid_cas, merge_assertion, resolve_parent, transition, InformationSource, PfasStatus,
    SearchScope, StatusAssessment,
};

fn arb_status() -> impl Strategy<Value = PfasStatus> {
    prop_oneof![
        Just(PfasStatus::Yes),
        Just(PfasStatus::No),
        Just(PfasStatus::Pending),
    ]
}

fn arb_source() -> impl Strategy<Value = InformationSource> {
    prop::sample::select(InformationSource::ALL.to_vec())
}

prop_compose! {
    fn arb_assessment()(status in arb_status(), source in arb_source()) -> StatusAssessment {
        StatusAssessment::new(status, source)
    }
}

prop_compose! {
    fn arb_children_and_permutation()(
        children in prop::collection::vec(arb_assessment(), 0..12)
    )(
        shuffled in Just(children.clone()).prop_shuffle(),
        children in Just(children)
    ) -> (Vec<StatusAssessment>, Vec<StatusAssessment>) {
        (children, shuffled)
    }
}

prop_compose! {
    fn arb_valid_cas()(body in 1_000u32..1_000_000_000u32) -> String {
        let digits = body.to_string();
        let sum: u32 = digits
            .chars()
            .rev()
            .filter_map(|c| c.to_digit(10))
            .enumerate()
            .map(|(i, d)| d * (i as u32 + 1))
            .sum();
        let (head, tail) = digits.split_at(digits.len() - 2);
        format!("{}-{}-{}", head, tail, sum % 10)
    }
}

proptest! {
    /// Any ordering of the same children resolves to the same parent.
    #[test]
    fn property_aggregation_is_order_independent(
        (children, shuffled) in arb_children_and_permutation()
    ) {
        prop_assert_eq!(resolve_parent(&children), resolve_parent(&shuffled));
    }

    #[test]
    fn property_yes_dominates(
        mut children in prop::collection::vec(arb_assessment(), 0..8),
        source in arb_source(),
        position in any::<prop::sample::Index>()
    ) {
        let index = position.index(children.len() + 1);
        children.insert(index, StatusAssessment::new(PfasStatus::Yes, source));
        prop_assert_eq!(resolve_parent(&children).status, PfasStatus::Yes);
    }

    /// The reported source always belongs to a child with the winning status.
    #[test]
    fn property_parent_source_is_backed_by_a_child(
        children in prop::collection::vec(arb_assessment(), 1..10)
    ) {
        let parent = resolve_parent(&children);
        if parent.source != InformationSource::None {
            prop_assert!(children
                .iter()
                .any(|child| child.status == parent.status && child.source == parent.source));
        }
    }

    /// Re-applying the same evidence changes nothing.
    #[test]
    fn property_merge_is_idempotent(
        existing in arb_assessment(),
        incoming in arb_assessment()
    ) {
        if let Ok(merged) = merge_assertion(existing, incoming) {
            prop_assert_eq!(merge_assertion(merged, incoming), Ok(merged));
        }
    }

    #[test]
    fn property_merge_rejects_exactly_the_illegal_pairs(
        existing in arb_assessment(),
        incoming in arb_assessment()
    ) {
        let legal = transition(existing.source, incoming.source).is_some();
        prop_assert_eq!(merge_assertion(existing, incoming).is_ok(), legal);

        use InformationSource::*;
        let illegal = match (existing.source, incoming.source) {
            (_, None) | (None, _) => false,
            (Echa, _) | (_, Echa) => true,
            (Manual, Oecd) | (Oecd, Manual) => true,
            _ => false,
        };
        prop_assert_eq!(legal, !illegal);
    }

    #[test]
    fn property_generated_cas_numbers_validate(cas in arb_valid_cas()) {
        prop_assert!(is_valid_cas(&cas));
    }

    #[test]
    fn property_scope_union_has_no_case_duplicates(
        local in prop::collection::vec("[A-Za-z]{1,6}", 0..6),
        global in prop::collection::vec("[A-Za-z]{1,6}", 0..6)
    ) {
        let resolved = SearchScope::Both.resolve(&local, &global);
        let unique: HashSet<String> = resolved.iter().map(|k| k.to_lowercase()).collect();
        prop_assert_eq!(unique.len(), resolved.len());
        for keyword in local.iter().chain(global.iter()) {
            prop_assert!(unique.contains(&keyword.to_lowercase()));
        }
    }
}
