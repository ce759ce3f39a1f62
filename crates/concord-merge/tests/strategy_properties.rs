//! Cross-strategy properties of the merge engine

use concord_merge::array::{concat, ConcatOptions};
use concord_merge::categorical::{weighted_vote, VoteOptions};
use concord_merge::consensus::require_consensus;
use concord_merge::continuous::{weighted_average, AverageOptions};
use concord_merge::custom::custom;
use concord_merge::object::{fieldwise, FieldwiseOptions};
use concord_merge::{MergeError, MergeSpec, MergeStrategy, StrategyRegistry, BUILTIN_STRATEGIES};
use concord_owned::Owned;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

fn owned<T>(value: T, confidence: f64) -> Owned<T> {
    Owned::new(value, confidence, "branch").unwrap()
}

/// Merge a singleton, then merge the output again as a singleton
fn assert_idempotent<T, S>(strategy: &S, input: Owned<T>)
where
    T: Clone + PartialEq + std::fmt::Debug,
    S: MergeStrategy<T, Output = T>,
{
    let first = strategy.merge(std::slice::from_ref(&input)).unwrap();
    assert_eq!(first.value(), input.value(), "{}", strategy.name());
    assert_eq!(first.confidence(), input.confidence(), "{}", strategy.name());

    let second = strategy.merge(&[first.value.clone()]).unwrap();
    assert_eq!(second.value(), first.value());
    assert_eq!(second.confidence(), first.confidence());
    assert_eq!(second.consensus_level(), first.consensus_level());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Route {
    queue: String,
    sla_hours: u32,
}

#[test]
fn every_builtin_strategy_is_idempotent_on_singletons() {
    assert_idempotent(&weighted_vote(VoteOptions::default()), owned("urgent", 0.37));
    assert_idempotent(&weighted_average(AverageOptions::default().with_outlier_threshold(2.0)), owned(12.5, 0.61));
    assert_idempotent(
        &fieldwise::<Route>(FieldwiseOptions::default()),
        owned(
            Route {
                queue: "billing".to_string(),
                sla_hours: 4,
            },
            0.83,
        ),
    );
    assert_idempotent(&concat::<u8>(ConcatOptions::default()), owned(vec![3, 1, 2], 0.44));
    assert_idempotent(&require_consensus::<i64>(1), owned(7, 0.52));
    assert_idempotent(
        &custom(|results: &[Owned<i64>]| Ok(*results[0].value())),
        owned(11, 0.29),
    );
}

#[test]
fn every_builtin_strategy_rejects_empty_input() {
    let empty_str: [Owned<&str>; 0] = [];
    let empty_f64: [Owned<f64>; 0] = [];
    let empty_vec: [Owned<Vec<u8>>; 0] = [];

    assert!(matches!(
        weighted_vote(VoteOptions::default()).merge(&empty_str),
        Err(MergeError::EmptyResults)
    ));
    assert!(matches!(
        weighted_average(AverageOptions::default()).merge(&empty_f64),
        Err(MergeError::EmptyResults)
    ));
    assert!(matches!(
        concat::<u8>(ConcatOptions::default()).merge(&empty_vec),
        Err(MergeError::EmptyResults)
    ));
    assert!(matches!(
        require_consensus::<&str>(1).merge(&empty_str),
        Err(MergeError::EmptyResults)
    ));
}

#[test]
fn registry_covers_every_configurable_strategy() {
    let registry = StrategyRegistry::with_defaults();
    assert_eq!(registry.len(), BUILTIN_STRATEGIES.len());

    for document in [
        r#"strategy = "categorical.weighted_vote""#,
        r#"strategy = "continuous.weighted_average""#,
        r#"strategy = "object.fieldwise""#,
        r#"strategy = "array.concat""#,
        "strategy = \"consensus.require\"\nk = 1",
    ] {
        let spec = MergeSpec::from_toml_str(document).unwrap();
        assert!(registry.contains(spec.name()));
        assert_eq!(spec.build().unwrap().name(), spec.name());
    }
}

#[test]
fn provenance_indices_refer_to_original_positions() {
    let results = vec![owned("a", 0.1), owned("b", 0.9), owned("a", 0.2), owned("b", 0.8)];
    let merged = weighted_vote(VoteOptions::default().with_min_confidence(0.5))
        .merge(&results)
        .unwrap();
    assert_eq!(merged.provenance.contributing_branches, vec![1, 3]);
    let rejected: Vec<usize> = merged.provenance.rejected_values.iter().map(|r| r.branch).collect();
    assert_eq!(rejected, vec![0, 2]);
}

#[test]
fn single_branch_concat_honors_max_items() {
    let strategy = concat::<&str>(ConcatOptions::default().with_max_items(2));
    let merged = strategy.merge(&[owned(vec!["a", "a", "b", "c", "d"], 0.9)]).unwrap();
    assert_eq!(merged.value(), &vec!["a", "b"]);

    let filtered = concat::<&str>(ConcatOptions::default().with_min_confidence(0.5))
        .merge(&[owned(vec!["a", "a", "b"], 0.9), owned(vec!["z"], 0.1)])
        .unwrap();
    assert_eq!(filtered.value(), &vec!["a", "b"]);
}

fn label() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("low"), Just("normal"), Just("high"), Just("urgent")]
}

proptest! {
    #[test]
    fn prop_vote_scores_in_unit_interval(
        entries in proptest::collection::vec((label(), 0.0..=1.0f64), 1..10),
        min_confidence in 0.0..0.5f64,
    ) {
        let results: Vec<Owned<&str>> = entries.iter().map(|(l, c)| owned(*l, *c)).collect();
        if let Ok(merged) = weighted_vote(VoteOptions::default().with_min_confidence(min_confidence)).merge(&results) {
            prop_assert!((0.0..=1.0).contains(&merged.confidence()));
            prop_assert!((0.0..=1.0).contains(&merged.consensus_level()));
            let accounted = merged.provenance.contributing_branches.len()
                + merged.provenance.rejected_values.len();
            prop_assert!(accounted <= results.len());
        }
    }

    #[test]
    fn prop_consensus_level_in_unit_interval(
        values in proptest::collection::vec((0i32..4, 0.0..=1.0f64), 1..10),
        k in 1usize..6,
    ) {
        let results: Vec<Owned<i32>> = values.iter().map(|(v, c)| owned(*v, *c)).collect();
        match require_consensus::<i32>(k).merge(&results) {
            Ok(merged) => {
                prop_assert!((0.0..=1.0).contains(&merged.confidence()));
                prop_assert!((0.0..=1.0).contains(&merged.consensus_level()));
            }
            Err(MergeError::ConsensusImpossible { .. }) => prop_assert!(k > results.len()),
            Err(other) => prop_assert!(false, "unexpected error {other}"),
        }
    }

    #[test]
    fn prop_concat_dedup_has_no_duplicates(
        lists in proptest::collection::vec(proptest::collection::vec(0u8..10, 0..6), 1..5),
        max_items in 1usize..8,
    ) {
        let results: Vec<Owned<Vec<u8>>> = lists.iter().map(|l| owned(l.clone(), 0.5)).collect();
        let merged = concat::<u8>(ConcatOptions::default().with_max_items(max_items))
            .merge(&results)
            .unwrap();
        let mut seen = std::collections::HashSet::new();
        prop_assert!(merged.value().iter().all(|item| seen.insert(*item)));
        prop_assert!(merged.value().len() <= max_items);
        prop_assert!((0.0..=1.0).contains(&merged.consensus_level()));
    }
}
