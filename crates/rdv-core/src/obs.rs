//! Structured observability hooks for evaluation sessions.
//!
//! This module provides:
//! - Session- and trajectory-scoped tracing spans via RAII guards
//! - Emission functions for lifecycle events: session start/finish,
//!   pair graded/failed, trajectory skipped/merged
//!
//! Verbosity follows `RDV_LOG` (see [`crate::telemetry`]).

use tracing::{info, warn};

use crate::domain::TrajectoryMetrics;

/// RAII guard that enters a session-scoped span. Synchronous code only;
/// async code should use [`session_span`] with `Instrument`.
///
/// ```ignore
/// let _span = SessionSpan::enter(&session_id.to_string(), "gpt-4o-mini");
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str, model: &str) -> Self {
        Self {
            _span: session_span(session_id, model).entered(),
        }
    }
}

/// RAII guard tagging everything inside with the trajectory id.
pub struct TrajectorySpan {
    _span: tracing::span::EnteredSpan,
}

impl TrajectorySpan {
    pub fn enter(traj_id: u32) -> Self {
        Self {
            _span: trajectory_span(traj_id).entered(),
        }
    }
}

/// Session span for async code; attach with `tracing::Instrument`.
pub fn session_span(session_id: &str, model: &str) -> tracing::Span {
    tracing::info_span!("rdv.session", session_id = %session_id, model = %model)
}

pub fn trajectory_span(traj_id: u32) -> tracing::Span {
    tracing::info_span!("rdv.trajectory", traj_id = traj_id)
}

pub fn emit_session_started(session_id: &str, model: &str, eligible: usize, resume: bool) {
    info!(
        event = "session.started",
        session_id = %session_id,
        model = %model,
        eligible = eligible,
        resume = resume,
    );
}

/// Emit event: trajectory left out of this session.
pub fn emit_trajectory_skipped(traj_id: u32, reason: &dyn std::fmt::Display) {
    warn!(event = "trajectory.skipped", traj_id = traj_id, reason = %reason);
}

pub fn emit_pair_graded(traj_id: u32, pair: usize, correct: bool, parse_error: bool) {
    info!(
        event = "pair.graded",
        traj_id = traj_id,
        pair = pair,
        correct = correct,
        parse_error = parse_error,
    );
}

/// Emit event: pair given up after retries (warning level).
pub fn emit_pair_failed(traj_id: u32, pair: usize, error: &dyn std::fmt::Display) {
    warn!(event = "pair.failed", traj_id = traj_id, pair = pair, error = %error);
}

pub fn emit_trajectory_merged(traj_id: u32, metrics: &TrajectoryMetrics, replaced: bool) {
    info!(
        event = "trajectory.merged",
        traj_id = traj_id,
        correct = metrics.correct,
        total = metrics.total,
        accuracy = metrics.accuracy(),
        replaced = replaced,
    );
}

pub fn emit_session_finished(
    session_id: &str,
    duration_ms: u64,
    overall: &TrajectoryMetrics,
    interrupted: bool,
) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        duration_ms = duration_ms,
        correct = overall.correct,
        total = overall.total,
        accuracy = overall.accuracy(),
        interrupted = interrupted,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_nest() {
        let _session = SessionSpan::enter("s-1", "model");
        let _traj = TrajectorySpan::enter(3);
        emit_pair_graded(3, 0, true, false);
    }
}
