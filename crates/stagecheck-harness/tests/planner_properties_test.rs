//! Integration test: matrix planner properties.
//!
//! Validates, across every combination of operator switches and case
//! constraints, that:
//! 1. A plan is an ordered subset of the candidate list.
//! 2. A plan never contains two entries with the same description.
//! 3. Planning twice gives the same answer.
//! 4. Every planned entry honours the switches that selected it.
//!
//! Run: cargo test -p stagecheck-harness --test planner_properties_test

use stagecheck_harness::matrix::{
    CaseConstraints, MatrixEntry, MatrixFilter, MatrixPlanner, OptimizeMode, ThreadingFilter,
};
use stagecheck_harness::target::{Abi, Arch, Os};
use stagecheck_harness::{Host, Target};

const HOSTS: [Host; 3] = [
    Host::new(Os::Linux, Arch::X86_64),
    Host::new(Os::Linux, Arch::Aarch64),
    Host::new(Os::Macos, Arch::Aarch64),
];

fn filters() -> Vec<MatrixFilter> {
    let mode_sets = [
        OptimizeMode::ALL.to_vec(),
        vec![OptimizeMode::Debug],
        vec![OptimizeMode::ReleaseFast, OptimizeMode::ReleaseSmall],
        Vec::new(),
    ];
    let mut out = Vec::new();
    for skip_non_native in [false, true] {
        for skip_libc in [false, true] {
            for threading in [
                ThreadingFilter::Any,
                ThreadingFilter::Single,
                ThreadingFilter::Multi,
            ] {
                for modes in &mode_sets {
                    out.push(MatrixFilter {
                        skip_non_native,
                        skip_libc,
                        threading,
                        modes: modes.clone(),
                    });
                }
            }
        }
    }
    out
}

const DEBUG_ONLY: [OptimizeMode; 1] = [OptimizeMode::Debug];

fn constraints() -> Vec<CaseConstraints<'static>> {
    vec![
        CaseConstraints::unconstrained(),
        CaseConstraints {
            link_libc: true,
            ..CaseConstraints::unconstrained()
        },
        CaseConstraints {
            modes: &DEBUG_ONLY,
            ..CaseConstraints::unconstrained()
        },
    ]
}

fn position(candidates: &[MatrixEntry], entry: &MatrixEntry) -> usize {
    candidates
        .iter()
        .position(|c| c == entry)
        .unwrap_or_else(|| panic!("planned entry {entry:?} is not a candidate"))
}

#[test]
fn plans_are_ordered_subsets_without_duplicates() {
    for host in HOSTS {
        for filter in filters() {
            let planner = MatrixPlanner::with_default_candidates(host, filter.clone()).unwrap();
            for case in constraints() {
                let plan = planner.plan(&case);

                let indices: Vec<usize> = plan
                    .iter()
                    .map(|e| position(planner.candidates(), e))
                    .collect();
                assert!(
                    indices.windows(2).all(|w| w[0] < w[1]),
                    "plan must keep candidate order for {filter:?} on {host}"
                );

                let mut described: Vec<String> = plan.iter().map(|e| e.describe(&host)).collect();
                described.sort();
                let before = described.len();
                described.dedup();
                assert_eq!(before, described.len(), "duplicate entries for {filter:?} on {host}");

                assert_eq!(plan, planner.plan(&case), "planning must be idempotent");
            }
        }
    }
}

#[test]
fn planned_entries_honour_every_switch() {
    for host in HOSTS {
        for filter in filters() {
            let planner = MatrixPlanner::with_default_candidates(host, filter.clone()).unwrap();
            for case in constraints() {
                for entry in planner.plan(&case) {
                    assert!(planner.admits(&entry, &case).is_ok());
                    assert!(filter.modes.contains(&entry.mode));
                    assert!(case.modes.contains(&entry.mode));
                    assert!(filter.threading.admits(entry.single_threaded));
                    if filter.skip_non_native {
                        assert!(entry.target.matches_host(&host), "{entry:?} is not native");
                    }
                    if filter.skip_libc {
                        assert!(!entry.link_libc);
                    }
                    if case.link_libc {
                        assert!(entry.effective_link_libc(&host));
                    }
                    if entry.disable_on_native_host_match {
                        assert!(!entry.target.matches_host(&host));
                    }
                    if entry.link_libc {
                        assert!(!entry.target.requires_libc(&host));
                    }
                }
            }
        }
    }
}

#[test]
fn empty_mode_selection_plans_nothing() {
    let filter = MatrixFilter {
        modes: Vec::new(),
        ..MatrixFilter::default()
    };
    let planner = MatrixPlanner::with_default_candidates(HOSTS[0], filter).unwrap();
    assert!(planner.plan(&CaseConstraints::unconstrained()).is_empty());
}

#[test]
fn override_yields_at_most_one_entry() {
    let pinned = Target::cross(Arch::Wasm32, Os::Wasi, Abi::Musl);
    for host in HOSTS {
        for filter in filters() {
            let planner = MatrixPlanner::with_default_candidates(host, filter.clone()).unwrap();
            let case = CaseConstraints {
                target_override: Some(&pinned),
                ..CaseConstraints::unconstrained()
            };
            let plan = planner.plan(&case);
            assert!(plan.len() <= 1);
            if filter.skip_non_native {
                assert!(plan.is_empty(), "a foreign override is skipped when non-native is off");
            }
            if let Some(entry) = plan.first() {
                assert_eq!(entry.target, pinned);
            }
        }
    }
}

#[test]
fn native_variants_come_first_for_debug() {
    let host = HOSTS[0];
    let planner = MatrixPlanner::with_default_candidates(host, MatrixFilter::default()).unwrap();
    let plan = planner.plan(&CaseConstraints::unconstrained());
    let first = plan.first().expect("default matrix is not empty");
    assert_eq!(first.target, Target::Native);
    assert_eq!(first.mode, OptimizeMode::Debug);
    assert_eq!(first.describe(&host), "native-Debug-bare-multi");
}
