use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{PairVerdict, TrajectoryMetrics, WaypointPair};
use crate::imagery::PairImages;

pub const SESSION_LOG_FILE: &str = "evaluation_log.txt";

const THOUGHT_PREVIEW_CHARS: usize = 600;

/// Configuration flags recorded with every session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    pub resume: bool,
    pub augmentation: bool,
    pub include_thought: bool,
    pub use_batch: bool,
    pub batch_size: usize,
    pub request_delay_ms: u64,
}

/// One append-only block in `evaluation_log.txt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub model: String,
    pub flags: SessionFlags,
    pub trajectories_processed: usize,
    pub cumulative: TrajectoryMetrics,
    pub interrupted: bool,
}

impl fmt::Display for SessionLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== {} session {} ===",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.session_id
        )?;
        writeln!(f, "Model: {}", self.model)?;
        writeln!(
            f,
            "Flags: resume={} augmentation={} include_thought={} use_batch={} batch_size={} request_delay_ms={}",
            self.flags.resume,
            self.flags.augmentation,
            self.flags.include_thought,
            self.flags.use_batch,
            self.flags.batch_size,
            self.flags.request_delay_ms
        )?;
        writeln!(f, "Trajectories processed: {}", self.trajectories_processed)?;
        writeln!(
            f,
            "Cumulative accuracy: {:.4} ({}/{})",
            self.cumulative.accuracy(),
            self.cumulative.correct,
            self.cumulative.total
        )?;
        if self.interrupted {
            writeln!(f, "Status: interrupted")?;
        }
        Ok(())
    }
}

/// Append `entry` to `<output>/evaluation_log.txt`, creating it if needed.
pub fn append_session_log(output_dir: &Path, entry: &SessionLogEntry) -> Result<PathBuf> {
    let path = output_dir.join(SESSION_LOG_FILE);
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {:?}", path))?;
    writeln!(file, "{entry}").with_context(|| format!("append {:?}", path))?;
    Ok(path)
}

/// Render a markdown card for one graded pair.
pub fn render_pair_card_md(
    pair: &WaypointPair,
    images: Option<&PairImages>,
    verdict: &PairVerdict,
) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Trajectory {} / pair {}\n\n",
        pair.trajectory, pair.index
    ));
    out.push_str(&format!(
        "- place: {}\n- Alice pano: `{}`\n- Bob pano: `{}`\n- rendezvous: {}\n\n",
        pair.place, pair.alice_pano, pair.bob_pano, pair.is_rendezvous
    ));

    if let Some(images) = images {
        out.push_str("## Views\n");
        for (agent, views) in [("Alice", &images.alice), ("Bob", &images.bob)] {
            for view in views.iter() {
                out.push_str(&format!("- {} {}: `{}`\n", agent, view.heading, view.path.display()));
            }
        }
        out.push('\n');
    }

    out.push_str("## Decision\n");
    out.push_str("| agent | predicted | expected |\n|---|---|---|\n");
    let predicted = |pick: fn(&crate::domain::AgentActions) -> String| {
        verdict.predicted.as_ref().map(pick).unwrap_or_else(|| "-".into())
    };
    out.push_str(&format!(
        "| Alice | {} | {} |\n",
        predicted(|a| a.alice.to_string()),
        verdict.expected.alice
    ));
    out.push_str(&format!(
        "| Bob | {} | {} |\n\n",
        predicted(|a| a.bob.to_string()),
        verdict.expected.bob
    ));

    out.push_str(&format!(
        "**Verdict:** {}\n",
        if verdict.correct { "correct" } else { "incorrect" }
    ));
    if let Some(reason) = &verdict.parse_error {
        out.push_str(&format!("\nParse error: {}\n", reason));
    }
    if let Some(aug) = &verdict.augmentation {
        out.push_str(&format!(
            "\nRotations: Alice {}°, Bob {}°\n",
            aug.alice_rotation.degrees(),
            aug.bob_rotation.degrees()
        ));
    }
    if let Some(thought) = &verdict.thought {
        let text = thought.to_string();
        let preview: String = text.chars().take(THOUGHT_PREVIEW_CHARS).collect();
        out.push_str("\n## Thought\n```json\n");
        out.push_str(&preview);
        if preview.len() < text.len() {
            out.push_str(" …");
        }
        out.push_str("\n```\n");
    }
    out
}

/// Write `<output>/traj<id>/visualizations/eval_<pair>.md`.
pub fn write_pair_card(
    output_dir: &Path,
    pair: &WaypointPair,
    images: Option<&PairImages>,
    verdict: &PairVerdict,
) -> Result<PathBuf> {
    let dir = output_dir
        .join(format!("traj{}", pair.trajectory))
        .join("visualizations");
    std::fs::create_dir_all(&dir).with_context(|| format!("create {:?}", dir))?;
    let path = dir.join(format!("eval_{}.md", pair.index));
    std::fs::write(&path, render_pair_card_md(pair, images, verdict))
        .with_context(|| format!("write {:?}", path))?;
    Ok(path)
}

/// Default output directory: `eval/<model>-<MM-DD-HH-MM-SS>`.
pub fn default_output_dir(model: &str, now: DateTime<Utc>) -> PathBuf {
    let model = model.replace('/', "-");
    PathBuf::from("eval").join(format!("{}-{}", model, now.format("%m-%d-%H-%M-%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Action, AgentActions, AugmentationInfo, PlaceId, Rotation};

    fn entry(correct: u64, total: u64) -> SessionLogEntry {
        SessionLogEntry {
            timestamp: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
                .expect("parse RFC3339")
                .with_timezone(&Utc),
            session_id: "s-1".into(),
            model: "gpt-4o-mini".into(),
            flags: SessionFlags {
                resume: true,
                augmentation: false,
                include_thought: true,
                use_batch: true,
                batch_size: 2,
                request_delay_ms: 1000,
            },
            trajectories_processed: 2,
            cumulative: TrajectoryMetrics::new(correct, total),
            interrupted: false,
        }
    }

    fn pair() -> WaypointPair {
        WaypointPair {
            trajectory: 3,
            index: 1,
            place: PlaceId::Number(12),
            alice_pano: "pa".into(),
            bob_pano: "pb".into(),
            is_rendezvous: false,
        }
    }

    #[test]
    fn session_log_appends_blocks() {
        let dir = tempfile::tempdir().unwrap();
        append_session_log(dir.path(), &entry(1, 2)).unwrap();
        let path = append_session_log(dir.path(), &entry(3, 4)).unwrap();

        let log = std::fs::read_to_string(path).unwrap();
        assert_eq!(log.matches("=== 2026-01-01").count(), 2);
        assert!(log.contains("Cumulative accuracy: 0.5000 (1/2)"));
        assert!(log.contains("Cumulative accuracy: 0.7500 (3/4)"));
        assert!(log.contains("include_thought=true"));
    }

    #[test]
    fn pair_card_shows_prediction_and_rotation() {
        let expected = AgentActions::new(Action::Forward, Action::TurnLeft);
        let mut verdict = PairVerdict::from_prediction(
            1,
            AgentActions::new(Action::Forward, Action::Stay),
            expected,
            None,
            Some(AugmentationInfo {
                alice_rotation: Rotation::Half,
                bob_rotation: Rotation::None,
            }),
        );
        verdict.thought = Some(serde_json::json!({"Conclusion": "meet at the bank"}));

        let md = render_pair_card_md(&pair(), None, &verdict);
        assert!(md.contains("# Trajectory 3 / pair 1"));
        assert!(md.contains("| Bob | stay | turn left |"));
        assert!(md.contains("**Verdict:** incorrect"));
        assert!(md.contains("Alice 180°"));
        assert!(md.contains("meet at the bank"));
    }

    #[test]
    fn unparseable_card_uses_placeholder() {
        let verdict = PairVerdict::unparseable(
            1,
            AgentActions::new(Action::Stay, Action::Stay),
            "no JSON object found",
            None,
        );
        let md = render_pair_card_md(&pair(), None, &verdict);
        assert!(md.contains("| Alice | - | stay |"));
        assert!(md.contains("Parse error: no JSON object found"));
    }

    #[test]
    fn pair_card_lands_under_visualizations() {
        let dir = tempfile::tempdir().unwrap();
        let a = AgentActions::new(Action::Stay, Action::Stay);
        let verdict = PairVerdict::from_prediction(1, a, a, None, None);
        let path = write_pair_card(dir.path(), &pair(), None, &verdict).unwrap();
        assert!(path.ends_with("traj3/visualizations/eval_1.md"));
        assert!(path.is_file());
    }

    #[test]
    fn default_output_dir_sanitizes_model() {
        let now = DateTime::parse_from_rfc3339("2026-03-04T05:06:07Z")
            .expect("parse RFC3339")
            .with_timezone(&Utc);
        assert_eq!(
            default_output_dir("openai/gpt-4o", now),
            PathBuf::from("eval/openai-gpt-4o-03-04-05-06-07")
        );
    }
}
