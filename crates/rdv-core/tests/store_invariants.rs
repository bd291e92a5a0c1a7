//! Accounting invariants of the on-disk result store.

use std::collections::BTreeSet;

use rdv_core::store::OverallRecord;
use rdv_core::{Action, AgentActions, PairVerdict, ResultStore, TrajectoryMetrics};

const EXPECTED: AgentActions = AgentActions {
    alice: Action::TurnRight,
    bob: Action::Forward,
};

fn verdict(index: usize, correct: bool) -> PairVerdict {
    let predicted = if correct {
        EXPECTED
    } else {
        AgentActions::new(Action::Stay, Action::Stay)
    };
    PairVerdict::from_prediction(index, predicted, EXPECTED, None, None)
}

fn declared(n: usize) -> BTreeSet<usize> {
    (0..n).collect()
}

#[test]
fn successive_merges_are_additive() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::open(dir.path()).unwrap();

    let mut running = TrajectoryMetrics::default();
    for chunk in [vec![0, 1], vec![2], vec![3, 4, 5]] {
        let batch: Vec<PairVerdict> = chunk.iter().map(|&i| verdict(i, i % 2 == 0)).collect();
        let added = TrajectoryMetrics::from_verdicts(&batch);
        let merged = store.merge(4, batch).unwrap();
        running += added;
        assert_eq!(merged, running);
        assert_eq!(store.load_existing(4).unwrap(), Some(running));
    }
    assert_eq!(running, TrajectoryMetrics::new(3, 6));
}

#[test]
fn pending_empty_iff_fully_evaluated() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::open(dir.path()).unwrap();
    let all = declared(3);

    assert_eq!(store.pending_pairs(1, &all).unwrap(), all);
    assert!(!store.already_fully_evaluated(1, &all).unwrap());

    store.merge(1, vec![verdict(0, true), verdict(2, false)]).unwrap();
    assert_eq!(store.pending_pairs(1, &all).unwrap(), BTreeSet::from([1]));
    assert!(!store.already_fully_evaluated(1, &all).unwrap());

    store.merge(1, vec![verdict(1, true)]).unwrap();
    assert!(store.pending_pairs(1, &all).unwrap().is_empty());
    assert!(store.already_fully_evaluated(1, &all).unwrap());

    // A newly annotated pair reopens the trajectory.
    assert!(!store.already_fully_evaluated(1, &declared(4)).unwrap());
}

#[test]
fn overall_is_sum_of_trajectory_files() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::open(dir.path()).unwrap();
    store.merge(0, vec![verdict(0, true), verdict(1, true)]).unwrap();
    store.merge(3, vec![verdict(0, false)]).unwrap();
    store.replace(12, vec![verdict(0, true), verdict(1, false), verdict(2, true)]).unwrap();

    let overall = store.save_overall().unwrap();
    assert_eq!(overall.totals, TrajectoryMetrics::new(4, 6));
    assert!(overall.is_consistent());

    let persisted: OverallRecord = store.load_overall().unwrap().unwrap();
    assert_eq!(persisted.overall_metrics, overall.totals);
    assert_eq!(
        persisted.trajectory_metrics.keys().cloned().collect::<Vec<_>>(),
        vec!["traj0", "traj12", "traj3"]
    );
    let summed = persisted
        .trajectory_metrics
        .values()
        .fold(TrajectoryMetrics::default(), |acc, m| acc + *m);
    assert_eq!(summed, persisted.overall_metrics);
}

#[test]
fn rejected_merge_leaves_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = ResultStore::open(dir.path()).unwrap();
    store.merge(2, vec![verdict(0, true)]).unwrap();
    let path = dir.path().join("traj2").join(rdv_core::store::TRAJECTORY_RESULTS_FILE);
    let before = std::fs::read(&path).unwrap();

    let err = store.merge(2, vec![verdict(1, true), verdict(0, false)]).unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}
