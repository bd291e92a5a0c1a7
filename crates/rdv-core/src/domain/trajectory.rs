//! Trajectory descriptors (`metainfo.json`) and waypoint pairs.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{EvalError, Result};
use super::ground_truth::{GroundTruth, GroundTruthAnswer};

/// Place identifier as written by the sampler (numeric or textual).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlaceId {
    Number(u64),
    Text(String),
}

impl fmt::Display for PlaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaceId::Number(n) => write!(f, "{n}"),
            PlaceId::Text(s) => f.write_str(s),
        }
    }
}

/// Route metadata produced by the trajectory sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryDescriptor {
    pub place: PlaceId,

    #[serde(rename = "rendezvous point")]
    pub rendezvous_point: String,

    #[serde(rename = "Alice points")]
    pub alice_points: Vec<String>,

    #[serde(rename = "Bob points")]
    pub bob_points: Vec<String>,
}

impl TrajectoryDescriptor {
    pub fn validate(&self, trajectory: u32) -> Result<()> {
        if self.alice_points.len() != self.bob_points.len() {
            return Err(EvalError::InvalidTrajectory {
                trajectory,
                reason: format!(
                    "Alice has {} points but Bob has {}",
                    self.alice_points.len(),
                    self.bob_points.len()
                ),
            });
        }
        Ok(())
    }

    /// Number of addressable pairs: every waypoint plus the rendezvous.
    pub fn pair_count(&self) -> usize {
        self.alice_points.len() + 1
    }

    /// Resolve pair `index`. The index one past the last waypoint is the
    /// rendezvous point, shared by both agents.
    pub fn pair(&self, trajectory: u32, index: usize) -> Result<WaypointPair> {
        let waypoints = self.alice_points.len();
        let (alice_pano, bob_pano, is_rendezvous) = if index < waypoints {
            (
                self.alice_points[index].clone(),
                self.bob_points[index].clone(),
                false,
            )
        } else if index == waypoints {
            (
                self.rendezvous_point.clone(),
                self.rendezvous_point.clone(),
                true,
            )
        } else {
            return Err(EvalError::InvalidTrajectory {
                trajectory,
                reason: format!("pair {index} out of range (0..={waypoints})"),
            });
        };

        Ok(WaypointPair {
            trajectory,
            index,
            place: self.place.clone(),
            alice_pano,
            bob_pano,
            is_rendezvous,
        })
    }
}

/// One timestep: where each agent stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaypointPair {
    pub trajectory: u32,
    pub index: usize,
    pub place: PlaceId,
    pub alice_pano: String,
    pub bob_pano: String,
    pub is_rendezvous: bool,
}

/// A loaded, annotated trajectory. Read-only to the evaluation core.
#[derive(Debug, Clone)]
pub struct Trajectory {
    pub id: u32,
    pub descriptor: TrajectoryDescriptor,
    pub ground_truth: GroundTruth,
}

impl Trajectory {
    /// Bind a descriptor to its ground truth, rejecting annotations that
    /// point past the rendezvous pair.
    pub fn new(id: u32, descriptor: TrajectoryDescriptor, ground_truth: GroundTruth) -> Result<Self> {
        descriptor.validate(id)?;
        let limit = descriptor.pair_count();
        if let Some(bad) = ground_truth.indices().into_iter().find(|i| *i >= limit) {
            return Err(EvalError::InvalidGroundTruth {
                trajectory: id,
                reason: format!("pair {bad} annotated but trajectory has {limit} pairs"),
            });
        }
        Ok(Self {
            id,
            descriptor,
            ground_truth,
        })
    }

    /// Pairs subject to grading: exactly the annotated ones, in index order.
    pub fn declared_pairs(&self) -> BTreeSet<usize> {
        self.ground_truth.indices()
    }

    pub fn pair(&self, index: usize) -> Result<WaypointPair> {
        self.descriptor.pair(self.id, index)
    }

    pub fn truth(&self, index: usize) -> Option<&GroundTruthAnswer> {
        self.ground_truth.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> TrajectoryDescriptor {
        serde_json::from_str(
            r#"{
                "place": 3,
                "rendezvous point": "R",
                "Alice points": ["A0", "A1"],
                "Bob points": ["B0", "B1"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_pairs_resolve_waypoints_then_rendezvous() {
        let d = descriptor();
        assert_eq!(d.pair_count(), 3);

        let p1 = d.pair(0, 1).unwrap();
        assert_eq!(p1.alice_pano, "A1");
        assert_eq!(p1.bob_pano, "B1");
        assert!(!p1.is_rendezvous);

        let r = d.pair(0, 2).unwrap();
        assert_eq!(r.alice_pano, "R");
        assert_eq!(r.bob_pano, "R");
        assert!(r.is_rendezvous);

        assert!(d.pair(0, 3).is_err());
    }

    #[test]
    fn test_place_accepts_number_or_text() {
        assert_eq!(descriptor().place.to_string(), "3");
        let d: TrajectoryDescriptor = serde_json::from_str(
            r#"{"place": "x9", "rendezvous point": "R", "Alice points": [], "Bob points": []}"#,
        )
        .unwrap();
        assert_eq!(d.place, PlaceId::Text("x9".into()));
    }

    #[test]
    fn test_unequal_point_lists_are_invalid() {
        let mut d = descriptor();
        d.bob_points.pop();
        assert!(matches!(
            d.validate(5),
            Err(EvalError::InvalidTrajectory { trajectory: 5, .. })
        ));
    }

    #[test]
    fn test_annotation_past_rendezvous_is_rejected() {
        let gt = GroundTruth::from_json_str(
            0,
            r#"{"3": {"Answer": {"Alice": "stay", "Bob": "stay"}}}"#,
        )
        .unwrap();
        assert!(Trajectory::new(0, descriptor(), gt).is_err());
    }

    #[test]
    fn test_declared_pairs_follow_ground_truth() {
        let gt = GroundTruth::from_json_str(
            0,
            r#"{"2": {"Answer": {"Alice": "stay", "Bob": "stay"}},
                "0": {"Answer": {"Alice": "forward", "Bob": "forward"}}}"#,
        )
        .unwrap();
        let t = Trajectory::new(0, descriptor(), gt).unwrap();
        assert_eq!(t.declared_pairs().into_iter().collect::<Vec<_>>(), vec![0, 2]);
    }
}
