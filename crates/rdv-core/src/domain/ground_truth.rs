//! Annotated expected actions per waypoint pair (`answer.json`).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::action::AgentActions;
use super::error::{EvalError, Result};

/// Ground truth for one waypoint pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthAnswer {
    /// Annotator's detection / orientation rationale, kept opaque.
    #[serde(rename = "Thought", default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<Value>,

    #[serde(rename = "Answer")]
    pub answer: AgentActions,
}

/// All ground-truth answers of a trajectory, ordered by pair index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroundTruth {
    answers: BTreeMap<usize, GroundTruthAnswer>,
}

impl GroundTruth {
    pub fn new(answers: BTreeMap<usize, GroundTruthAnswer>) -> Self {
        Self { answers }
    }

    /// Parse an `answer.json` document.
    ///
    /// Accepts either an object keyed by pair index (`{"0": {...}}`) or a
    /// plain array where position is the pair index.
    pub fn from_json_str(trajectory: u32, raw: &str) -> Result<Self> {
        let invalid = |reason: String| EvalError::InvalidGroundTruth { trajectory, reason };

        let value: Value = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        let mut answers = BTreeMap::new();

        match value {
            Value::Object(map) => {
                for (key, entry) in map {
                    let index: usize = key
                        .trim()
                        .parse()
                        .map_err(|_| invalid(format!("pair key {key:?} is not an index")))?;
                    let answer: GroundTruthAnswer = serde_json::from_value(entry)
                        .map_err(|e| invalid(format!("pair {index}: {e}")))?;
                    answers.insert(index, answer);
                }
            }
            Value::Array(items) => {
                for (index, entry) in items.into_iter().enumerate() {
                    let answer: GroundTruthAnswer = serde_json::from_value(entry)
                        .map_err(|e| invalid(format!("pair {index}: {e}")))?;
                    answers.insert(index, answer);
                }
            }
            other => {
                return Err(invalid(format!(
                    "expected object or array, found {}",
                    json_kind(&other)
                )))
            }
        }

        Ok(Self { answers })
    }

    pub fn get(&self, index: usize) -> Option<&GroundTruthAnswer> {
        self.answers.get(&index)
    }

    /// Pair indices that carry an annotation.
    pub fn indices(&self) -> BTreeSet<usize> {
        self.answers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &GroundTruthAnswer)> {
        self.answers.iter().map(|(k, v)| (*k, v))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
