//! Per-pair grading outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::{AgentActions, Rotation};

/// Rotations applied to each agent's views when a pair was augmented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AugmentationInfo {
    pub alice_rotation: Rotation,
    pub bob_rotation: Rotation,
}

impl AugmentationInfo {
    pub fn is_identity(&self) -> bool {
        self.alice_rotation == Rotation::None && self.bob_rotation == Rotation::None
    }
}

/// Outcome of grading one waypoint pair. Counts toward `total`.
///
/// `expected` is the ground truth as the model was asked to see it, i.e.
/// already rotated when augmentation was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairVerdict {
    pub pair_index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted: Option<AgentActions>,

    pub expected: AgentActions,

    pub correct: bool,

    /// Set when the model replied but the reply was unusable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub augmentation: Option<AugmentationInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<Value>,

    pub graded_at: DateTime<Utc>,
}

impl PairVerdict {
    /// Verdict for a reply that mapped onto the action vocabulary.
    pub fn from_prediction(
        pair_index: usize,
        predicted: AgentActions,
        expected: AgentActions,
        thought: Option<Value>,
        augmentation: Option<AugmentationInfo>,
    ) -> Self {
        Self {
            pair_index,
            predicted: Some(predicted),
            expected,
            correct: predicted == expected,
            parse_error: None,
            augmentation,
            thought,
            graded_at: Utc::now(),
        }
    }

    /// Verdict for a reply that arrived but could not be parsed. Incorrect,
    /// yet still counted.
    pub fn unparseable(
        pair_index: usize,
        expected: AgentActions,
        reason: impl Into<String>,
        augmentation: Option<AugmentationInfo>,
    ) -> Self {
        Self {
            pair_index,
            predicted: None,
            expected,
            correct: false,
            parse_error: Some(reason.into()),
            augmentation,
            thought: None,
            graded_at: Utc::now(),
        }
    }
}

/// A pair that could not be graded at all (request or image failure).
/// Not counted in any total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairFailure {
    pub pair_index: usize,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    Graded(PairVerdict),
    Failed(PairFailure),
}

impl PairOutcome {
    pub fn pair_index(&self) -> usize {
        match self {
            PairOutcome::Graded(v) => v.pair_index,
            PairOutcome::Failed(f) => f.pair_index,
        }
    }
}
