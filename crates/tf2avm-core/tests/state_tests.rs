use proptest::prelude::*;
use tf2avm_core::state::{allowed_transitions, validate_transition};
use tf2avm_core::Stage;

fn any_stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        Just(Stage::Scanning),
        Just(Stage::KnowledgeFetch),
        Just(Stage::Mapping),
        Just(Stage::DetailFetch),
        Just(Stage::ReviewMapping),
        Just(Stage::DetailFetchFinal),
        Just(Stage::Planning),
        Just(Stage::Writing),
        Just(Stage::Validating),
        Just(Stage::FixPlanning),
        Just(Stage::Terminal),
    ]
}

/// Position in the pipeline; both detail fetches share the review branch slot
fn rank(stage: Stage) -> u8 {
    match stage {
        Stage::Scanning => 0,
        Stage::KnowledgeFetch => 1,
        Stage::Mapping => 2,
        Stage::DetailFetch => 3,
        Stage::ReviewMapping => 4,
        Stage::DetailFetchFinal => 5,
        Stage::Planning => 6,
        Stage::Writing => 7,
        Stage::Validating => 8,
        Stage::FixPlanning => 9,
        Stage::Terminal => 10,
    }
}

#[test]
fn test_review_branch_is_optional() {
    assert!(validate_transition(Stage::Mapping, Stage::DetailFetchFinal).is_ok());
    assert!(validate_transition(Stage::Mapping, Stage::DetailFetch).is_ok());
    assert!(validate_transition(Stage::DetailFetch, Stage::ReviewMapping).is_ok());
    assert!(validate_transition(Stage::ReviewMapping, Stage::DetailFetchFinal).is_ok());

    // Review cannot be entered without its detail fetch
    assert!(validate_transition(Stage::Mapping, Stage::ReviewMapping).is_err());
}

#[test]
fn test_fix_planning_only_after_validation() {
    assert!(validate_transition(Stage::Validating, Stage::FixPlanning).is_ok());
    assert!(validate_transition(Stage::Writing, Stage::FixPlanning).is_err());
    assert!(validate_transition(Stage::FixPlanning, Stage::Validating).is_err());
}

#[test]
fn test_terminal_is_final() {
    assert!(allowed_transitions(Stage::Terminal).is_empty());
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(from in any_stage(), to in any_stage()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);

        if res.is_ok() {
            assert!(allowed.contains(&to));
        } else {
            assert!(!allowed.contains(&to));
        }
    }

    #[test]
    fn prop_no_backward_transitions(from in any_stage(), to in any_stage()) {
        if validate_transition(from, to).is_ok() {
            prop_assert!(rank(to) > rank(from));
        }
    }

    #[test]
    fn prop_every_running_stage_can_fail(from in any_stage()) {
        if from != Stage::Terminal {
            prop_assert!(validate_transition(from, Stage::Terminal).is_ok());
        }
    }
}
