//! Accuracy counts per trajectory and across a run.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use super::verdict::PairVerdict;

/// Correct / total counts for one trajectory. `accuracy` is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "MetricsSnapshot", into = "MetricsSnapshot")]
pub struct TrajectoryMetrics {
    pub correct: u64,
    pub total: u64,
}

impl TrajectoryMetrics {
    pub fn new(correct: u64, total: u64) -> Self {
        Self { correct, total }
    }

    pub fn from_verdicts<'a>(verdicts: impl IntoIterator<Item = &'a PairVerdict>) -> Self {
        verdicts.into_iter().fold(Self::default(), |mut acc, v| {
            acc.total += 1;
            if v.correct {
                acc.correct += 1;
            }
            acc
        })
    }

    /// `correct / total`, or `0.0` when nothing was graded.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

impl Add for TrajectoryMetrics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            correct: self.correct + rhs.correct,
            total: self.total + rhs.total,
        }
    }
}

impl AddAssign for TrajectoryMetrics {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// On-disk shape: counts plus the derived ratio.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MetricsSnapshot {
    correct: u64,
    total: u64,
    #[serde(default)]
    accuracy: f64,
}

impl From<MetricsSnapshot> for TrajectoryMetrics {
    fn from(s: MetricsSnapshot) -> Self {
        Self::new(s.correct, s.total)
    }
}

impl From<TrajectoryMetrics> for MetricsSnapshot {
    fn from(m: TrajectoryMetrics) -> Self {
        Self {
            correct: m.correct,
            total: m.total,
            accuracy: m.accuracy(),
        }
    }
}

/// Run-wide roll-up of every trajectory stored in an output directory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverallMetrics {
    pub totals: TrajectoryMetrics,
    pub per_trajectory: BTreeMap<u32, TrajectoryMetrics>,
}

impl OverallMetrics {
    pub fn from_trajectories(per_trajectory: BTreeMap<u32, TrajectoryMetrics>) -> Self {
        let totals = per_trajectory
            .values()
            .copied()
            .fold(TrajectoryMetrics::default(), Add::add);
        Self {
            totals,
            per_trajectory,
        }
    }

    /// Totals equal the sum of the per-trajectory entries.
    pub fn is_consistent(&self) -> bool {
        let sum = self
            .per_trajectory
            .values()
            .copied()
            .fold(TrajectoryMetrics::default(), Add::add);
        sum == self.totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::action::{Action, AgentActions};

    #[test]
    fn test_accuracy_of_empty_is_zero() {
        assert_eq!(TrajectoryMetrics::default().accuracy(), 0.0);
        assert_eq!(TrajectoryMetrics::new(3, 4).accuracy(), 0.75);
    }

    #[test]
    fn test_from_verdicts_counts_unparseable_as_total() {
        let a = AgentActions::new(Action::Stay, Action::Stay);
        let verdicts = vec![
            PairVerdict::from_prediction(0, a, a, None, None),
            PairVerdict::unparseable(1, a, "garbage", None),
        ];
        assert_eq!(
            TrajectoryMetrics::from_verdicts(&verdicts),
            TrajectoryMetrics::new(1, 2)
        );
    }

    #[test]
    fn test_serialized_form_carries_accuracy() {
        let json = serde_json::to_value(TrajectoryMetrics::new(1, 4)).unwrap();
        assert_eq!(json["accuracy"], 0.25);
        let back: TrajectoryMetrics =
            serde_json::from_str(r#"{"correct": 2, "total": 5, "accuracy": 0.9}"#).unwrap();
        assert_eq!(back, TrajectoryMetrics::new(2, 5));
    }

    #[test]
    fn test_overall_totals_are_sum() {
        let mut per = BTreeMap::new();
        per.insert(0, TrajectoryMetrics::new(2, 3));
        per.insert(4, TrajectoryMetrics::new(1, 5));
        let overall = OverallMetrics::from_trajectories(per);
        assert_eq!(overall.totals, TrajectoryMetrics::new(3, 8));
        assert!(overall.is_consistent());
    }
}
