//! Offline batch-results ingestion.
//!
//! Each line of a results file looks like
//!
//! ```text
//! {"custom_id": "<traj>_<pair>_<uuid>", "response": {"body": {"choices": [...]}}}
//! ```
//!
//! Lines that cannot be attributed to a pair are logged and dropped.

use std::collections::HashSet;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::client::openai::extract_message_content;
use crate::domain::Result;

/// One attributed entry of a results file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResultLine {
    pub trajectory: u32,
    pub pair_index: usize,
    /// Reply text, absent when the upstream request failed.
    pub content: Option<String>,
    pub error: Option<String>,
}

/// Split `"<traj>_<pair>_<uuid>"` into trajectory and pair. A leading
/// `traj` on the first segment is tolerated.
pub fn parse_custom_id(custom_id: &str) -> Option<(u32, usize)> {
    let mut parts = custom_id.splitn(3, '_');
    let traj = parts.next()?;
    let pair = parts.next()?;
    let traj = traj.strip_prefix("traj").unwrap_or(traj);
    Some((traj.parse().ok()?, pair.parse().ok()?))
}

/// Reply text of one results line, wrapped or bare.
pub fn extract_content(line: &Value) -> Option<&str> {
    line.get("response")
        .and_then(|r| r.get("body"))
        .and_then(extract_message_content)
        .or_else(|| extract_message_content(line))
}

fn line_error(line: &Value) -> Option<String> {
    let err = line.get("error").filter(|e| !e.is_null())?;
    Some(
        err.get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    )
}

/// Parse a results document. Duplicate pairs keep their first line.
pub fn parse_batch_results(raw: &str) -> Vec<BatchResultLine> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for (lineno, text) in raw.lines().enumerate() {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let line: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "skipping malformed results line");
                continue;
            }
        };
        let Some((trajectory, pair_index)) = line
            .get("custom_id")
            .and_then(Value::as_str)
            .and_then(parse_custom_id)
        else {
            warn!(line = lineno + 1, "skipping results line without a usable custom_id");
            continue;
        };
        if !seen.insert((trajectory, pair_index)) {
            warn!(traj_id = trajectory, pair = pair_index, "duplicate result line ignored");
            continue;
        }

        let content = extract_content(&line).map(str::to_string);
        let error = match (&content, line_error(&line)) {
            (_, Some(e)) => Some(e),
            (None, None) => Some("no message content".to_string()),
            (Some(_), None) => None,
        };
        out.push(BatchResultLine {
            trajectory,
            pair_index,
            content,
            error,
        });
    }
    out
}

pub async fn read_batch_results(path: &Path) -> Result<Vec<BatchResultLine>> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(parse_batch_results(&raw))
}
