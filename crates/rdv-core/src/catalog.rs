//! Trajectory discovery and eligibility under a `textdata` root.
//!
//! Layout: `<root>/traj<id>/metainfo.json` (descriptor) and, once
//! annotated, `<root>/traj<id>/answer.json` (ground truth).

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::warn;

use crate::domain::{EvalError, GroundTruth, Result, Trajectory, TrajectoryDescriptor};
use crate::store::parse_trajectory_key;

pub const METAINFO_FILE: &str = "metainfo.json";
pub const ANSWER_FILE: &str = "answer.json";

/// Which trajectories an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TrajectorySelector {
    #[default]
    All,
    Single(u32),
    /// Inclusive on both ends.
    Range { start: u32, end: u32 },
    List(Vec<u32>),
}

impl TrajectorySelector {
    pub fn matches(&self, id: u32) -> bool {
        match self {
            TrajectorySelector::All => true,
            TrajectorySelector::Single(x) => *x == id,
            TrajectorySelector::Range { start, end } => (*start..=*end).contains(&id),
            TrajectorySelector::List(ids) => ids.contains(&id),
        }
    }
}

impl FromStr for TrajectorySelector {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let bad = |detail: &str| EvalError::Config(format!("invalid trajectory selector {s:?}: {detail}"));
        let id = |part: &str| part.trim().parse::<u32>().map_err(|_| bad("expected an integer id"));

        if s.eq_ignore_ascii_case("all") {
            return Ok(TrajectorySelector::All);
        }
        if s.contains(',') {
            let ids = s
                .split(',')
                .filter(|p| !p.trim().is_empty())
                .map(id)
                .collect::<Result<Vec<_>>>()?;
            if ids.is_empty() {
                return Err(bad("empty list"));
            }
            return Ok(TrajectorySelector::List(ids));
        }
        if let Some((a, b)) = s.split_once('-') {
            let (start, end) = (id(a)?, id(b)?);
            if start > end {
                return Err(bad("range start is after end"));
            }
            return Ok(TrajectorySelector::Range { start, end });
        }
        Ok(TrajectorySelector::Single(id(s)?))
    }
}

impl fmt::Display for TrajectorySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrajectorySelector::All => f.write_str("all"),
            TrajectorySelector::Single(id) => write!(f, "{id}"),
            TrajectorySelector::Range { start, end } => write!(f, "{start}-{end}"),
            TrajectorySelector::List(ids) => {
                let parts: Vec<String> = ids.iter().map(u32::to_string).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

/// A discovered trajectory directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrajectoryRef {
    pub id: u32,
    pub dir: PathBuf,
}

impl TrajectoryRef {
    pub fn metainfo_path(&self) -> PathBuf {
        self.dir.join(METAINFO_FILE)
    }

    pub fn answer_path(&self) -> PathBuf {
        self.dir.join(ANSWER_FILE)
    }

    /// Shared membership test for eligibility and the annotation helper.
    pub fn has_ground_truth(&self) -> bool {
        self.answer_path().is_file()
    }
}

/// Read-only view over a `textdata` root.
#[derive(Debug, Clone)]
pub struct TrajectoryCatalog {
    root: PathBuf,
}

impl TrajectoryCatalog {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(EvalError::Config(format!(
                "trajectory root {root:?} is not a readable directory"
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every `traj<id>` directory, sorted by id.
    pub fn discover(&self) -> Result<Vec<TrajectoryRef>> {
        let mut refs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(parse_trajectory_key) {
                refs.push(TrajectoryRef {
                    id,
                    dir: entry.path(),
                });
            }
        }
        refs.sort_by_key(|r| r.id);
        Ok(refs)
    }

    /// Look up one trajectory directory by id.
    pub fn get(&self, id: u32) -> Option<TrajectoryRef> {
        let dir = self.root.join(format!("traj{id}"));
        dir.is_dir().then_some(TrajectoryRef { id, dir })
    }

    pub fn select(&self, selector: &TrajectorySelector) -> Result<Vec<TrajectoryRef>> {
        let found = self.discover()?;
        let explicit: &[u32] = match selector {
            TrajectorySelector::Single(id) => std::slice::from_ref(id),
            TrajectorySelector::List(ids) => ids,
            _ => &[],
        };
        for id in explicit {
            if !found.iter().any(|r| r.id == *id) {
                warn!(traj_id = id, "requested trajectory does not exist");
            }
        }
        Ok(found.into_iter().filter(|r| selector.matches(r.id)).collect())
    }

    /// Selected trajectories that carry ground truth. The rest are dropped
    /// with a warning.
    pub fn list_eligible(&self, selector: &TrajectorySelector) -> Result<Vec<TrajectoryRef>> {
        let mut eligible = Vec::new();
        for r in self.select(selector)? {
            if r.has_ground_truth() {
                eligible.push(r);
            } else {
                warn!(
                    traj_id = r.id,
                    path = %r.answer_path().display(),
                    "no ground truth, trajectory excluded"
                );
            }
        }
        Ok(eligible)
    }

    /// Selected trajectories still awaiting annotation.
    pub fn list_unannotated(&self, selector: &TrajectorySelector) -> Result<Vec<TrajectoryRef>> {
        Ok(self
            .select(selector)?
            .into_iter()
            .filter(|r| !r.has_ground_truth())
            .collect())
    }

    /// Read descriptor and ground truth for `r`.
    pub fn load(&self, r: &TrajectoryRef) -> Result<Trajectory> {
        let meta_path = r.metainfo_path();
        let raw = fs::read_to_string(&meta_path).map_err(|e| EvalError::InvalidTrajectory {
            trajectory: r.id,
            reason: format!("cannot read {}: {e}", meta_path.display()),
        })?;
        let descriptor: TrajectoryDescriptor =
            serde_json::from_str(&raw).map_err(|e| EvalError::InvalidTrajectory {
                trajectory: r.id,
                reason: format!("{}: {e}", meta_path.display()),
            })?;

        let answer_path = r.answer_path();
        let raw = match fs::read_to_string(&answer_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EvalError::MissingGroundTruth {
                    trajectory: r.id,
                    path: answer_path,
                })
            }
            Err(e) => {
                return Err(EvalError::InvalidGroundTruth {
                    trajectory: r.id,
                    reason: format!("cannot read {}: {e}", answer_path.display()),
                })
            }
        };
        let ground_truth = GroundTruth::from_json_str(r.id, &raw)?;

        Trajectory::new(r.id, descriptor, ground_truth)
    }
}
