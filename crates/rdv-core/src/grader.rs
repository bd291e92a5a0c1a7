//! Grading of one waypoint pair against the model.
//!
//! Failure asymmetry:
//! - a reply that cannot be parsed yields an *incorrect* verdict (counted);
//! - a request that still fails after retries, or a pair whose images
//!   cannot be found, yields an error (excluded from totals).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::augment::{rotate_views, Augmenter};
use crate::client::{EncodedImage, VlmClient, VlmRequest};
use crate::domain::{
    AgentActions, AugmentationInfo, GroundTruthAnswer, PairFailure, PairOutcome, PairVerdict,
    RequestError, Result, WaypointPair,
};
use crate::imagery::{encode_image, AgentView, ImageResolver};
use crate::metrics::METRICS;
use crate::obs;
use crate::prompt::{build_prompt, parse_response};

/// Upper bound on any single wait between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GradeOptions {
    pub model: String,
    pub include_thought: bool,
    pub use_augmentation: bool,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Base backoff; doubles after every failed attempt.
    pub request_delay: Duration,
}

impl Default for GradeOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            include_thought: false,
            use_augmentation: false,
            max_attempts: 5,
            request_delay: Duration::from_secs(1),
        }
    }
}

/// Wait before attempt `attempt + 1`, given that attempt `attempt` failed.
///
/// A server-provided hint replaces the exponential schedule. Both are
/// clamped to [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempt: u32, hint: Option<Duration>) -> Duration {
    let delay = hint.unwrap_or_else(|| {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(factor)
    });
    delay.min(MAX_BACKOFF)
}

/// Turn raw reply text into a verdict. Parse failures become incorrect
/// verdicts rather than errors.
pub fn verdict_from_content(
    pair_index: usize,
    content: &str,
    expected: AgentActions,
    include_thought: bool,
    augmentation: Option<AugmentationInfo>,
) -> PairVerdict {
    match parse_response(content, include_thought) {
        Ok(parsed) => PairVerdict::from_prediction(
            pair_index,
            parsed.actions,
            expected,
            parsed.thought,
            augmentation,
        ),
        Err(e) => {
            METRICS.inc_parse_failures();
            debug!(pair = pair_index, error = %e, "unparseable model reply");
            PairVerdict::unparseable(pair_index, expected, e.to_string(), augmentation)
        }
    }
}

pub struct PairGrader {
    client: Arc<dyn VlmClient>,
    resolver: Arc<dyn ImageResolver>,
    options: GradeOptions,
    augmenter: Option<Augmenter>,
}

impl PairGrader {
    pub fn new(
        client: Arc<dyn VlmClient>,
        resolver: Arc<dyn ImageResolver>,
        options: GradeOptions,
    ) -> Self {
        let augmenter = options.use_augmentation.then(Augmenter::from_entropy);
        Self {
            client,
            resolver,
            options,
            augmenter,
        }
    }

    /// Replace the augmentation source (e.g. with a seeded one).
    pub fn with_augmenter(mut self, augmenter: Augmenter) -> Self {
        if self.options.use_augmentation {
            self.augmenter = Some(augmenter);
        }
        self
    }

    pub fn options(&self) -> &GradeOptions {
        &self.options
    }

    /// Resolve images, apply augmentation and assemble the request.
    pub async fn prepare(
        &self,
        pair: &WaypointPair,
    ) -> Result<(VlmRequest, Option<AugmentationInfo>)> {
        let mut images = self.resolver.resolve(pair)?;
        let augmentation = self.augmenter.as_ref().map(Augmenter::draw);
        if let Some(info) = &augmentation {
            rotate_views(&mut images.alice, info.alice_rotation);
            rotate_views(&mut images.bob, info.bob_rotation);
        }

        let mut encoded = Vec::with_capacity(images.alice.len() + images.bob.len());
        for (agent, views) in [("alice", &images.alice), ("bob", &images.bob)] {
            for AgentView { heading, path } in views {
                encoded.push(EncodedImage {
                    label: format!("{agent}/{heading}"),
                    data_base64: encode_image(path).await?,
                });
            }
        }

        let request = VlmRequest {
            trajectory: pair.trajectory,
            pair_index: pair.index,
            model: self.options.model.clone(),
            prompt: build_prompt(self.options.include_thought, augmentation.as_ref()),
            images: encoded,
        };
        Ok((request, augmentation))
    }

    async fn send_with_retry(&self, request: &VlmRequest) -> std::result::Result<String, RequestError> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            METRICS.inc_requests();
            match self.client.complete(request).await {
                Ok(content) => return Ok(content),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let delay = backoff_delay(self.options.request_delay, attempt, e.retry_after);
                    warn!(
                        traj_id = request.trajectory,
                        pair = request.pair_index,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "model request failed, retrying"
                    );
                    METRICS.inc_retries();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Grade one pair. `truth` is the unrotated ground truth.
    pub async fn grade(&self, pair: &WaypointPair, truth: &GroundTruthAnswer) -> Result<PairVerdict> {
        let (request, augmentation) = self.prepare(pair).await?;
        let expected = match &augmentation {
            Some(info) => truth.answer.rotated(info.alice_rotation, info.bob_rotation),
            None => truth.answer,
        };

        let content = self.send_with_retry(&request).await?;
        Ok(verdict_from_content(
            pair.index,
            &content,
            expected,
            self.options.include_thought,
            augmentation,
        ))
    }

    /// Like [`grade`](Self::grade) but never fails: hard failures become
    /// [`PairOutcome::Failed`].
    pub async fn grade_outcome(&self, pair: &WaypointPair, truth: &GroundTruthAnswer) -> PairOutcome {
        match self.grade(pair, truth).await {
            Ok(verdict) => {
                obs::emit_pair_graded(
                    pair.trajectory,
                    pair.index,
                    verdict.correct,
                    verdict.parse_error.is_some(),
                );
                PairOutcome::Graded(verdict)
            }
            Err(e) => {
                METRICS.inc_pair_failures();
                obs::emit_pair_failed(pair.trajectory, pair.index, &e);
                PairOutcome::Failed(PairFailure {
                    pair_index: pair.index,
                    error: e.to_string(),
                })
            }
        }
    }
}
