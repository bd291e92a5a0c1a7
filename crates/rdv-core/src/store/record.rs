//! On-disk result file shapes and the atomic JSON writer.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::domain::{EvalError, OverallMetrics, PairVerdict, Result, TrajectoryMetrics};

/// `traj<id>/trajectory_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub traj_id: u32,
    pub correct: u64,
    pub total: u64,
    pub accuracy: f64,
    #[serde(default)]
    pub pairs: Vec<PairVerdict>,
}

impl TrajectoryRecord {
    /// Build a record whose counts are derived from `pairs`.
    pub fn from_pairs(traj_id: u32, mut pairs: Vec<PairVerdict>) -> Self {
        pairs.sort_by_key(|p| p.pair_index);
        let metrics = TrajectoryMetrics::from_verdicts(&pairs);
        Self {
            traj_id,
            correct: metrics.correct,
            total: metrics.total,
            accuracy: metrics.accuracy(),
            pairs,
        }
    }

    /// Counts as stored, not as recomputed from `pairs`.
    pub fn metrics(&self) -> TrajectoryMetrics {
        TrajectoryMetrics::new(self.correct, self.total)
    }
}

/// `overall_results.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallRecord {
    pub overall_metrics: TrajectoryMetrics,
    pub trajectory_metrics: BTreeMap<String, TrajectoryMetrics>,
}

impl From<&OverallMetrics> for OverallRecord {
    fn from(overall: &OverallMetrics) -> Self {
        Self {
            overall_metrics: overall.totals,
            trajectory_metrics: overall
                .per_trajectory
                .iter()
                .map(|(id, m)| (trajectory_key(*id), *m))
                .collect(),
        }
    }
}

/// Directory / map key for a trajectory id.
pub fn trajectory_key(id: u32) -> String {
    format!("traj{id}")
}

/// Inverse of [`trajectory_key`].
pub fn parse_trajectory_key(name: &str) -> Option<u32> {
    let digits = name.strip_prefix("traj")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Writes to a temp file in the destination directory, then renames, so a
/// reader sees either the old file or the new one.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| EvalError::Config(format!("{path:?} has no parent directory")))?;
    fs::create_dir_all(dir)?;

    let content = serde_json::to_string_pretty(value)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
