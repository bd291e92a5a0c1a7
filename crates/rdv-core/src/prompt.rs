//! Prompt templates and model reply parsing.

use serde_json::{json, Value};

use crate::augment::rotation_note;
use crate::domain::{AgentActions, AugmentationInfo, ParseError};

const PREAMBLE: &str = "You are an intelligent AI assistant. Please analyze the following street view images. \
These images represent the perspectives of two people (Alice and Bob) who are trying to meet in a city. \
The first group of images is Alice's view (front, right, back, left), followed by Bob's view in the same order.";

const ACTION_CHOICES: &str = "forward, turn left, turn right, turn backward, stay";

/// Build the text part of a grading request.
pub fn build_prompt(include_thought: bool, augmentation: Option<&AugmentationInfo>) -> String {
    let mut out = String::new();
    out.push_str(PREAMBLE);
    out.push_str("\n\n");

    if include_thought {
        out.push_str(
            "1. First, describe in detail the main features and landmarks you see in the images.\n\
             2. Then, analyze the relative positions of Alice and Bob.\n\
             3. Finally, recommend their next actions to help them meet.\n\n",
        );
        out.push_str("Please answer in JSON format as follows:\n");
        out.push_str(&format!(
            r#"{{
    "Thought": {{
        "Detection": "Description of main features and landmarks seen in the images",
        "Orientation": {{
            "Alice": "Description of Alice's position",
            "Bob": "Description of Bob's position"
        }},
        "Conclusion": "Analysis of their spatial relationship and recommended action plan"
    }},
    "Answer": {{
        "Alice": "Recommended next action for Alice (only use one of these exact words: {ACTION_CHOICES})",
        "Bob": "Recommended next action for Bob (only use one of these exact words: {ACTION_CHOICES})"
    }}
}}
"#
        ));
    } else {
        out.push_str(
            "Look at the images and provide directions for Alice and Bob to help them meet each other as efficiently as possible.\n\n",
        );
        out.push_str("Please answer in JSON format as follows:\n");
        out.push_str(&format!(
            r#"{{
    "Answer": {{
        "Alice": "Recommended next action for Alice (only use one of these exact words: {ACTION_CHOICES})",
        "Bob": "Recommended next action for Bob (only use one of these exact words: {ACTION_CHOICES})"
    }}
}}

Do not include any explanations or reasoning in your response, just the JSON with the recommended actions.
"#
        ));
    }

    if let Some(info) = augmentation.filter(|i| !i.is_identity()) {
        out.push('\n');
        out.push_str(&rotation_note(info));
        out.push('\n');
    }
    out
}

/// Actions (and optional reasoning) extracted from a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnswer {
    pub actions: AgentActions,
    pub thought: Option<Value>,
}

/// Placeholder stored when reasoning was requested but not returned.
pub fn empty_thought() -> Value {
    json!({
        "Detection": "",
        "Orientation": {"Alice": "", "Bob": ""},
        "Conclusion": ""
    })
}

/// Parse a reply that may wrap its JSON in prose or code fences.
pub fn parse_response(content: &str, include_thought: bool) -> Result<ParsedAnswer, ParseError> {
    let start = content.find('{').ok_or(ParseError::NoJson)?;
    let end = content.rfind('}').ok_or(ParseError::NoJson)?;
    if end < start {
        return Err(ParseError::NoJson);
    }

    let value: Value =
        serde_json::from_str(&content[start..=end]).map_err(|e| ParseError::Json(e.to_string()))?;

    let answer = value.get("Answer").ok_or(ParseError::MissingField("Answer"))?;
    let alice = answer
        .get("Alice")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("Answer.Alice"))?;
    let bob = answer
        .get("Bob")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("Answer.Bob"))?;

    let actions = AgentActions::new(alice.parse()?, bob.parse()?);

    let thought = match value.get("Thought") {
        Some(t) => Some(t.clone()),
        None if include_thought => Some(empty_thought()),
        None => None,
    };

    Ok(ParsedAnswer { actions, thought })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, Rotation};

    #[test]
    fn test_prompt_variants() {
        let plain = build_prompt(false, None);
        assert!(!plain.contains("\"Thought\""));
        assert!(plain.contains("turn backward"));

        let thought = build_prompt(true, None);
        assert!(thought.contains("\"Thought\""));
        assert!(thought.contains("\"Conclusion\""));
    }

    #[test]
    fn test_prompt_mentions_rotation_only_when_applied() {
        let identity = AugmentationInfo::default();
        assert!(!build_prompt(false, Some(&identity)).contains("rotated"));

        let rotated = AugmentationInfo {
            alice_rotation: Rotation::Quarter,
            bob_rotation: Rotation::None,
        };
        assert!(build_prompt(false, Some(&rotated)).contains("rotated 90 degrees for Alice"));
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "Sure!\n```json\n{\"Answer\": {\"Alice\": \"Turn Left\", \"Bob\": \"stop\"}}\n```";
        let parsed = parse_response(reply, false).unwrap();
        assert_eq!(parsed.actions, AgentActions::new(Action::TurnLeft, Action::Stay));
        assert!(parsed.thought.is_none());
    }

    #[test]
    fn test_missing_thought_gets_placeholder() {
        let reply = r#"{"Answer": {"Alice": "forward", "Bob": "forward"}}"#;
        let parsed = parse_response(reply, true).unwrap();
        assert_eq!(parsed.thought.unwrap()["Conclusion"], "");
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(parse_response("no idea", false), Err(ParseError::NoJson));
        assert_eq!(parse_response("} oops {", false), Err(ParseError::NoJson));
        assert!(matches!(parse_response("{not json}", false), Err(ParseError::Json(_))));
        assert_eq!(
            parse_response(r#"{"Answer": {"Alice": "forward"}}"#, false),
            Err(ParseError::MissingField("Answer.Bob"))
        );
        assert!(matches!(
            parse_response(r#"{"Answer": {"Alice": "jump", "Bob": "stay"}}"#, false),
            Err(ParseError::UnknownAction(_))
        ));
    }
}
