//! Discrete navigation actions and view rotations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::ParseError;

/// One agent's next move at a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Forward,
    TurnLeft,
    TurnRight,
    TurnBackward,
    Stay,
}

impl Action {
    /// Every action, in prompt order.
    pub const ALL: [Action; 5] = [
        Action::Forward,
        Action::TurnLeft,
        Action::TurnRight,
        Action::TurnBackward,
        Action::Stay,
    ];

    /// Canonical lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            Action::Forward => "forward",
            Action::TurnLeft => "turn left",
            Action::TurnRight => "turn right",
            Action::TurnBackward => "turn backward",
            Action::Stay => "stay",
        }
    }

    /// Position on the clockwise compass, `None` for `Stay`.
    fn compass_index(&self) -> Option<u8> {
        match self {
            Action::Forward => Some(0),
            Action::TurnRight => Some(1),
            Action::TurnBackward => Some(2),
            Action::TurnLeft => Some(3),
            Action::Stay => None,
        }
    }

    fn from_compass_index(index: u8) -> Action {
        match index % 4 {
            0 => Action::Forward,
            1 => Action::TurnRight,
            2 => Action::TurnBackward,
            _ => Action::TurnLeft,
        }
    }

    /// Re-express this action after the agent's views were rotated clockwise.
    pub fn rotate(self, rotation: Rotation) -> Action {
        match self.compass_index() {
            Some(index) => Action::from_compass_index(index + rotation.steps()),
            None => self,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let collapsed = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        match collapsed.as_str() {
            "forward" => Ok(Action::Forward),
            "turn left" => Ok(Action::TurnLeft),
            "turn right" => Ok(Action::TurnRight),
            "turn backward" => Ok(Action::TurnBackward),
            "stay" | "stop" => Ok(Action::Stay),
            _ => Err(ParseError::UnknownAction(s.to_string())),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Clockwise rotation applied to an agent's four heading views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    None,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::None,
        Rotation::Quarter,
        Rotation::Half,
        Rotation::ThreeQuarter,
    ];

    pub fn degrees(&self) -> u16 {
        match self {
            Rotation::None => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarter => 270,
        }
    }

    /// Number of 90° steps.
    pub fn steps(&self) -> u8 {
        (self.degrees() / 90) as u8
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Quarter),
            180 => Ok(Rotation::Half),
            270 => Ok(Rotation::ThreeQuarter),
            other => Err(format!("rotation must be 0, 90, 180 or 270, got {other}")),
        }
    }
}

impl From<Rotation> for u16 {
    fn from(rotation: Rotation) -> Self {
        rotation.degrees()
    }
}

/// The pair of actions for both agents at one waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentActions {
    #[serde(rename = "Alice")]
    pub alice: Action,

    #[serde(rename = "Bob")]
    pub bob: Action,
}

impl AgentActions {
    pub fn new(alice: Action, bob: Action) -> Self {
        Self { alice, bob }
    }

    /// Rotate each agent's action independently.
    pub fn rotated(self, alice: Rotation, bob: Rotation) -> Self {
        Self {
            alice: self.alice.rotate(alice),
            bob: self.bob.rotate(bob),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive_and_accepts_stop_alias() {
        assert_eq!("Forward".parse::<Action>().unwrap(), Action::Forward);
        assert_eq!(" TURN  left ".parse::<Action>().unwrap(), Action::TurnLeft);
        assert_eq!("stop".parse::<Action>().unwrap(), Action::Stay);
        assert_eq!("Stay".parse::<Action>().unwrap(), Action::Stay);
        assert!(matches!(
            "sprint".parse::<Action>(),
            Err(ParseError::UnknownAction(a)) if a == "sprint"
        ));
    }

    #[test]
    fn test_quarter_rotation_table() {
        let r = Rotation::Quarter;
        assert_eq!(Action::Forward.rotate(r), Action::TurnRight);
        assert_eq!(Action::TurnLeft.rotate(r), Action::Forward);
        assert_eq!(Action::TurnRight.rotate(r), Action::TurnBackward);
        assert_eq!(Action::TurnBackward.rotate(r), Action::TurnLeft);
        assert_eq!(Action::Stay.rotate(r), Action::Stay);
    }

    #[test]
    fn test_half_and_three_quarter_rotation_table() {
        assert_eq!(Action::Forward.rotate(Rotation::Half), Action::TurnBackward);
        assert_eq!(Action::TurnLeft.rotate(Rotation::Half), Action::TurnRight);
        assert_eq!(Action::Forward.rotate(Rotation::ThreeQuarter), Action::TurnLeft);
        assert_eq!(Action::TurnLeft.rotate(Rotation::ThreeQuarter), Action::TurnBackward);
        assert_eq!(Action::TurnRight.rotate(Rotation::ThreeQuarter), Action::Forward);
        assert_eq!(Action::TurnBackward.rotate(Rotation::ThreeQuarter), Action::TurnRight);
    }

    #[test]
    fn test_rotation_none_is_identity() {
        for action in Action::ALL {
            assert_eq!(action.rotate(Rotation::None), action);
        }
    }

    #[test]
    fn test_rotation_serializes_as_degrees() {
        assert_eq!(serde_json::to_string(&Rotation::Half).unwrap(), "180");
        let parsed: Rotation = serde_json::from_str("270").unwrap();
        assert_eq!(parsed, Rotation::ThreeQuarter);
        assert!(serde_json::from_str::<Rotation>("45").is_err());
    }

    #[test]
    fn test_agent_actions_use_capitalized_keys() {
        let raw = r#"{"Alice": "turn right", "Bob": "STOP"}"#;
        let actions: AgentActions = serde_json::from_str(raw).unwrap();
        assert_eq!(actions, AgentActions::new(Action::TurnRight, Action::Stay));
        let json = serde_json::to_value(actions).unwrap();
        assert_eq!(json["Alice"], "turn right");
        assert_eq!(json["Bob"], "stay");
    }
}
