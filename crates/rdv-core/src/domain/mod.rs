//! Domain models for rendezvous evaluation.
//!
//! Canonical definitions for the core entities:
//! - `Action` / `AgentActions`: the discrete decision vocabulary
//! - `Trajectory`: route descriptor bound to its ground truth
//! - `PairVerdict`: outcome of grading one waypoint pair
//! - `TrajectoryMetrics`: correct / total roll-ups

pub mod action;
pub mod error;
pub mod ground_truth;
pub mod metrics;
pub mod trajectory;
pub mod verdict;

pub use action::{Action, AgentActions, Rotation};
pub use error::{EvalError, ParseError, RequestError, Result};
pub use ground_truth::{GroundTruth, GroundTruthAnswer};
pub use metrics::{OverallMetrics, TrajectoryMetrics};
pub use trajectory::{PlaceId, Trajectory, TrajectoryDescriptor, WaypointPair};
pub use verdict::{AugmentationInfo, PairFailure, PairOutcome, PairVerdict};
