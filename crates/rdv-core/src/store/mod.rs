//! Durable per-trajectory and overall results.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/traj<id>/trajectory_results.json
//! <root>/overall_results.json
//! ```
//!
//! The store is the single writer of these files. Every trajectory write is
//! a whole-file atomic replace, so an interrupted session never leaves a
//! half-merged record behind.

pub mod record;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::{EvalError, OverallMetrics, PairVerdict, Result, TrajectoryMetrics};

pub use record::{
    parse_trajectory_key, trajectory_key, write_json_atomic, OverallRecord, TrajectoryRecord,
};

pub const TRAJECTORY_RESULTS_FILE: &str = "trajectory_results.json";
pub const OVERALL_RESULTS_FILE: &str = "overall_results.json";

/// Filesystem-backed result store rooted at a session output directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Open (and create if needed) the store at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn trajectory_dir(&self, id: u32) -> PathBuf {
        self.root.join(trajectory_key(id))
    }

    fn record_path(&self, id: u32) -> PathBuf {
        self.trajectory_dir(id).join(TRAJECTORY_RESULTS_FILE)
    }

    pub fn overall_path(&self) -> PathBuf {
        self.root.join(OVERALL_RESULTS_FILE)
    }

    /// Read the stored record for `id`, if any.
    pub fn load_record(&self, id: u32) -> Result<Option<TrajectoryRecord>> {
        let path = self.record_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Stored metrics for `id`, or `None` when nothing was recorded yet.
    pub fn load_existing(&self, id: u32) -> Result<Option<TrajectoryMetrics>> {
        Ok(self.load_record(id)?.map(|r| r.metrics()))
    }

    /// Indices that already carry a stored verdict.
    pub fn graded_indices(&self, id: u32) -> Result<BTreeSet<usize>> {
        Ok(self
            .load_record(id)?
            .map(|r| r.pairs.iter().map(|p| p.pair_index).collect())
            .unwrap_or_default())
    }

    /// Declared pairs minus the ones already graded.
    pub fn pending_pairs(&self, id: u32, declared: &BTreeSet<usize>) -> Result<BTreeSet<usize>> {
        let graded = self.graded_indices(id)?;
        Ok(declared.difference(&graded).copied().collect())
    }

    /// True iff every declared pair has a stored verdict.
    pub fn already_fully_evaluated(&self, id: u32, declared: &BTreeSet<usize>) -> Result<bool> {
        Ok(self.pending_pairs(id, declared)?.is_empty())
    }

    /// Fold `new_verdicts` into the stored record for `id`.
    ///
    /// The merged counts must equal the previously stored counts plus the
    /// counts of `new_verdicts`. On any violation the stored file is left
    /// exactly as it was.
    pub fn merge(&self, id: u32, new_verdicts: Vec<PairVerdict>) -> Result<TrajectoryMetrics> {
        let prior = self.load_record(id)?;
        let prior_metrics = prior.as_ref().map(|r| r.metrics()).unwrap_or_default();

        if new_verdicts.is_empty() {
            return Ok(prior_metrics);
        }

        let violation = |detail: String| EvalError::MergeInvariantViolation {
            trajectory: id,
            detail,
        };

        let mut pairs: BTreeMap<usize, PairVerdict> = BTreeMap::new();
        for verdict in prior.map(|r| r.pairs).unwrap_or_default() {
            let index = verdict.pair_index;
            if pairs.insert(index, verdict).is_some() {
                return Err(violation(format!("stored record lists pair {index} twice")));
            }
        }

        let added = TrajectoryMetrics::from_verdicts(&new_verdicts);
        for verdict in new_verdicts {
            let index = verdict.pair_index;
            if pairs.insert(index, verdict).is_some() {
                return Err(violation(format!("pair {index} already has a verdict")));
            }
        }

        let record = TrajectoryRecord::from_pairs(id, pairs.into_values().collect());
        let expected = prior_metrics + added;
        if record.metrics() != expected {
            return Err(violation(format!(
                "merged {}/{} but stored {}/{} plus new {}/{}",
                record.correct,
                record.total,
                prior_metrics.correct,
                prior_metrics.total,
                added.correct,
                added.total
            )));
        }

        write_json_atomic(&self.record_path(id), &record)?;
        debug!(traj_id = id, correct = record.correct, total = record.total, "merged trajectory");
        Ok(record.metrics())
    }

    /// Overwrite the stored record for `id` with exactly `verdicts`.
    pub fn replace(&self, id: u32, verdicts: Vec<PairVerdict>) -> Result<TrajectoryMetrics> {
        let record = TrajectoryRecord::from_pairs(id, verdicts);
        write_json_atomic(&self.record_path(id), &record)?;
        debug!(traj_id = id, correct = record.correct, total = record.total, "replaced trajectory");
        Ok(record.metrics())
    }

    /// Ids of every `traj<id>` directory holding a result file, ascending.
    pub fn stored_trajectories(&self) -> Result<Vec<u32>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().and_then(parse_trajectory_key) else {
                continue;
            };
            if entry.path().join(TRAJECTORY_RESULTS_FILE).is_file() {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Sum the stored counts of every trajectory file currently on disk.
    pub fn compute_overall(&self) -> Result<OverallMetrics> {
        let mut per = BTreeMap::new();
        for id in self.stored_trajectories()? {
            match self.load_record(id) {
                Ok(Some(record)) => {
                    per.insert(id, record.metrics());
                }
                Ok(None) => {}
                Err(e) => warn!(traj_id = id, error = %e, "unreadable trajectory results, not counted"),
            }
        }
        Ok(OverallMetrics::from_trajectories(per))
    }

    /// Recompute the overall roll-up from disk and persist it.
    pub fn save_overall(&self) -> Result<OverallMetrics> {
        let overall = self.compute_overall()?;
        debug_assert!(overall.is_consistent());
        write_json_atomic(&self.overall_path(), &OverallRecord::from(&overall))?;
        Ok(overall)
    }

    /// Read the persisted overall file without recomputing.
    pub fn load_overall(&self) -> Result<Option<OverallRecord>> {
        match fs::read_to_string(self.overall_path()) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
