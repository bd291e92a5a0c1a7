//! Evaluation session driver.
//!
//! ```text
//! Scanning -> Grading(t) -> Merging(t) -> ... -> Finalizing -> Done
//! ```
//!
//! Verdicts for a trajectory reach the [`ResultStore`] in one write, after
//! every pending pair of that trajectory has been attempted. An interrupt
//! while grading drops the in-flight verdicts; the next resumed run finds
//! those pairs still pending.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::augment::Augmenter;
use crate::batcher::{RequestBatcher, TaskFailure};
use crate::catalog::{TrajectoryCatalog, TrajectorySelector};
use crate::client::{OfflineClient, VlmClient};
use crate::config::SessionConfig;
use crate::domain::{
    EvalError, OverallMetrics, PairFailure, PairOutcome, PairVerdict, Result, Trajectory,
    TrajectoryMetrics, WaypointPair,
};
use crate::grader::{verdict_from_content, PairGrader};
use crate::imagery::{FsImageResolver, ImageResolver};
use crate::ingest::BatchResultLine;
use crate::metrics::METRICS;
use crate::obs::{self, SessionSpan, TrajectorySpan};
use crate::reporting::{append_session_log, write_pair_card, SessionLogEntry};
use crate::store::ResultStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Scanning,
    Grading { trajectory: u32 },
    Merging { trajectory: u32 },
    Finalizing,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrajectoryStatus {
    /// New verdicts folded into prior results.
    Merged,
    /// Prior results overwritten (resume disabled).
    Replaced,
    /// Nothing pending; not graded this session.
    AlreadyComplete,
    Skipped { reason: String },
    /// Grading was cut short; nothing was written.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryReport {
    pub id: u32,
    /// Verdicts produced this session (parse failures included).
    pub graded: usize,
    /// Pairs excluded from totals this session.
    pub failed: Vec<PairFailure>,
    /// Stored metrics after this session touched the trajectory.
    pub metrics: Option<TrajectoryMetrics>,
    pub status: TrajectoryStatus,
}

impl TrajectoryReport {
    fn without_grading(id: u32, status: TrajectoryStatus, metrics: Option<TrajectoryMetrics>) -> Self {
        Self {
            id,
            graded: 0,
            failed: Vec::new(),
            metrics,
            status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub trajectories: Vec<TrajectoryReport>,
    pub overall: OverallMetrics,
    pub interrupted: bool,
}

impl SessionReport {
    pub fn report_for(&self, id: u32) -> Option<&TrajectoryReport> {
        self.trajectories.iter().find(|t| t.id == id)
    }
}

/// Graded pairs kept for visualization at finalize time.
type Graded = Vec<(WaypointPair, PairVerdict)>;

pub struct EvaluationSession {
    config: SessionConfig,
    session_id: Uuid,
    catalog: TrajectoryCatalog,
    store: ResultStore,
    resolver: Arc<dyn ImageResolver>,
    grader: Arc<PairGrader>,
    batcher: RequestBatcher,
    phases: Vec<SessionPhase>,
}

impl EvaluationSession {
    pub fn new(config: SessionConfig, client: Arc<dyn VlmClient>) -> Result<Self> {
        let resolver = Arc::new(FsImageResolver::new(&config.googledata_root));
        Self::with_parts(config, client, resolver)
    }

    /// Build a session around an explicit image resolver.
    pub fn with_parts(
        config: SessionConfig,
        client: Arc<dyn VlmClient>,
        resolver: Arc<dyn ImageResolver>,
    ) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, client, resolver)
    }

    /// Session for [`ingest`](Self::ingest). It never contacts a model, and
    /// the image root is required only when visualizing.
    pub fn offline(config: SessionConfig) -> Result<Self> {
        config.validate_offline()?;
        let resolver = Arc::new(FsImageResolver::new(&config.googledata_root));
        Self::assemble(config, Arc::new(OfflineClient), resolver)
    }

    fn assemble(
        config: SessionConfig,
        client: Arc<dyn VlmClient>,
        resolver: Arc<dyn ImageResolver>,
    ) -> Result<Self> {
        let catalog = TrajectoryCatalog::new(&config.textdata_root)?;
        let store = ResultStore::open(&config.output_dir)?;

        let mut grader = PairGrader::new(client, resolver.clone(), config.grade_options());
        if let Some(seed) = config.augmentation_seed {
            grader = grader.with_augmenter(Augmenter::seeded(seed));
        }

        Ok(Self {
            batcher: RequestBatcher::new(config.batch_config()),
            session_id: Uuid::new_v4(),
            catalog,
            store,
            resolver,
            grader: Arc::new(grader),
            config,
            phases: Vec::new(),
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn catalog(&self) -> &TrajectoryCatalog {
        &self.catalog
    }

    pub fn phase(&self) -> Option<&SessionPhase> {
        self.phases.last()
    }

    /// Every phase entered so far, in order.
    pub fn phase_history(&self) -> &[SessionPhase] {
        &self.phases
    }

    fn transition(&mut self, next: SessionPhase) {
        debug!(from = ?self.phases.last(), to = ?next, "session phase");
        self.phases.push(next);
    }

    /// Run to completion without an external interrupt source.
    pub async fn run_to_completion(&mut self, selector: &TrajectorySelector) -> Result<SessionReport> {
        let (_tx, rx) = watch::channel(false);
        self.run(selector, rx).await
    }

    /// Evaluate every eligible trajectory matched by `selector`.
    ///
    /// Only configuration-level problems (including an empty eligible set)
    /// are returned as errors; everything else is reported per trajectory.
    pub async fn run(
        &mut self,
        selector: &TrajectorySelector,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SessionReport> {
        let span = obs::session_span(&self.session_id.to_string(), &self.config.model);
        self.run_inner(selector, &mut shutdown).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        selector: &TrajectorySelector,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionReport> {
        let started = Instant::now();
        let session_id = self.session_id.to_string();

        self.transition(SessionPhase::Scanning);
        let (worklist, mut reports) = self.scan(selector)?;
        obs::emit_session_started(&session_id, &self.config.model, worklist.len(), self.config.resume);

        let mut graded: Graded = Vec::new();
        let mut interrupted = false;

        for trajectory in worklist {
            if *shutdown.borrow() {
                interrupted = true;
                break;
            }
            let id = trajectory.id;
            let outcome = self
                .process(&trajectory, shutdown, &mut graded)
                .instrument(obs::trajectory_span(id))
                .await;
            match outcome {
                Ok(report) => {
                    let stop = report.status == TrajectoryStatus::Interrupted;
                    reports.push(report);
                    if stop {
                        interrupted = true;
                        break;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    obs::emit_trajectory_skipped(id, &e);
                    reports.push(TrajectoryReport::without_grading(
                        id,
                        TrajectoryStatus::Skipped {
                            reason: e.to_string(),
                        },
                        self.store.load_existing(id).ok().flatten(),
                    ));
                }
            }
        }

        Ok(self.finalize(started, reports, graded, interrupted))
    }

    /// Build the worklist; drop complete and unloadable trajectories.
    fn scan(&self, selector: &TrajectorySelector) -> Result<(Vec<Trajectory>, Vec<TrajectoryReport>)> {
        let eligible = self.catalog.list_eligible(selector)?;
        if eligible.is_empty() {
            return Err(EvalError::Config(format!(
                "no eligible trajectories for selector {selector} under {:?}",
                self.catalog.root()
            )));
        }

        let mut worklist = Vec::new();
        let mut reports = Vec::new();
        for r in eligible {
            let trajectory = match self.catalog.load(&r) {
                Ok(t) => t,
                Err(e) => {
                    obs::emit_trajectory_skipped(r.id, &e);
                    reports.push(TrajectoryReport::without_grading(
                        r.id,
                        TrajectoryStatus::Skipped {
                            reason: e.to_string(),
                        },
                        None,
                    ));
                    continue;
                }
            };

            if self.config.resume {
                match self.store.already_fully_evaluated(r.id, &trajectory.declared_pairs()) {
                    Ok(true) => {
                        info!(traj_id = r.id, "already fully evaluated");
                        reports.push(TrajectoryReport::without_grading(
                            r.id,
                            TrajectoryStatus::AlreadyComplete,
                            self.store.load_existing(r.id).ok().flatten(),
                        ));
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        obs::emit_trajectory_skipped(r.id, &e);
                        reports.push(TrajectoryReport::without_grading(
                            r.id,
                            TrajectoryStatus::Skipped {
                                reason: e.to_string(),
                            },
                            None,
                        ));
                        continue;
                    }
                }
            }
            worklist.push(trajectory);
        }
        Ok((worklist, reports))
    }

    async fn process(
        &mut self,
        trajectory: &Trajectory,
        shutdown: &mut watch::Receiver<bool>,
        graded: &mut Graded,
    ) -> Result<TrajectoryReport> {
        let id = trajectory.id;
        self.transition(SessionPhase::Grading { trajectory: id });
        let declared = trajectory.declared_pairs();
        let pending: BTreeSet<usize> = if self.config.resume {
            self.store.pending_pairs(id, &declared)?
        } else {
            declared
        };
        info!(traj_id = id, pending = pending.len(), "grading trajectory");

        let mut items = Vec::with_capacity(pending.len());
        for index in &pending {
            let truth = trajectory
                .truth(*index)
                .cloned()
                .ok_or_else(|| EvalError::InvalidGroundTruth {
                    trajectory: id,
                    reason: format!("pair {index} has no annotation"),
                })?;
            items.push((trajectory.pair(*index)?, truth));
        }
        let pairs: Vec<WaypointPair> = items.iter().map(|(p, _)| p.clone()).collect();

        let grader = self.grader.clone();
        let dispatch = self.batcher.dispatch(items, move |(pair, truth)| {
            let grader = grader.clone();
            async move { grader.grade_outcome(&pair, &truth).await }
        });

        let report = tokio::select! {
            report = dispatch => report,
            _ = shutdown_requested(shutdown) => {
                warn!(traj_id = id, "interrupted, discarding in-flight verdicts");
                return Ok(TrajectoryReport::without_grading(
                    id,
                    TrajectoryStatus::Interrupted,
                    self.store.load_existing(id).ok().flatten(),
                ));
            }
        };

        let mut verdicts = Vec::new();
        let mut failed = Vec::new();
        for (pair, result) in pairs.into_iter().zip(report.results) {
            match result {
                Ok(PairOutcome::Graded(verdict)) => {
                    if self.config.visualize {
                        graded.push((pair, verdict.clone()));
                    }
                    verdicts.push(verdict);
                }
                Ok(PairOutcome::Failed(failure)) => failed.push(failure),
                Err(task) => {
                    METRICS.inc_pair_failures();
                    obs::emit_pair_failed(id, pair.index, &task);
                    failed.push(task_failure(pair.index, task));
                }
            }
        }

        self.transition(SessionPhase::Merging { trajectory: id });
        let graded_count = verdicts.len();
        let (metrics, status) = if self.config.resume {
            (self.store.merge(id, verdicts)?, TrajectoryStatus::Merged)
        } else {
            (self.store.replace(id, verdicts)?, TrajectoryStatus::Replaced)
        };
        obs::emit_trajectory_merged(id, &metrics, status == TrajectoryStatus::Replaced);

        Ok(TrajectoryReport {
            id,
            graded: graded_count,
            failed,
            metrics: Some(metrics),
            status,
        })
    }

    fn finalize(
        &mut self,
        started: Instant,
        trajectories: Vec<TrajectoryReport>,
        graded: Graded,
        interrupted: bool,
    ) -> SessionReport {
        self.transition(SessionPhase::Finalizing);

        let overall = match self.store.save_overall() {
            Ok(overall) => overall,
            Err(e) => {
                warn!(error = %e, "failed to save overall results");
                self.store.compute_overall().unwrap_or_default()
            }
        };

        let processed = trajectories
            .iter()
            .filter(|t| matches!(t.status, TrajectoryStatus::Merged | TrajectoryStatus::Replaced))
            .count();
        let entry = SessionLogEntry {
            timestamp: Utc::now(),
            session_id: self.session_id.to_string(),
            model: self.config.model.clone(),
            flags: self.config.flags(),
            trajectories_processed: processed,
            cumulative: overall.totals,
            interrupted,
        };
        if let Err(e) = append_session_log(self.store.root(), &entry) {
            warn!(error = %e, "failed to append session log");
        }

        for (pair, verdict) in &graded {
            self.visualize(pair, verdict);
        }

        METRICS.flush();
        obs::emit_session_finished(
            &self.session_id.to_string(),
            started.elapsed().as_millis() as u64,
            &overall.totals,
            interrupted,
        );
        self.transition(SessionPhase::Done);

        SessionReport {
            session_id: self.session_id,
            trajectories,
            overall,
            interrupted,
        }
    }

    fn visualize(&self, pair: &WaypointPair, verdict: &PairVerdict) {
        let images = self.resolver.resolve(pair).ok();
        match write_pair_card(self.store.root(), pair, images.as_ref(), verdict) {
            Ok(path) => debug!(path = %path.display(), "wrote pair card"),
            Err(e) => warn!(traj_id = pair.trajectory, pair = pair.index, error = %e, "visualization failed"),
        }
    }

    /// Grade one pair without touching stored results.
    pub async fn grade_single(&self, trajectory_id: u32, pair_index: usize) -> Result<PairVerdict> {
        let r = self.catalog.get(trajectory_id).ok_or_else(|| {
            EvalError::Config(format!(
                "trajectory {trajectory_id} not found under {:?}",
                self.catalog.root()
            ))
        })?;
        let trajectory = self.catalog.load(&r)?;
        let truth = trajectory
            .truth(pair_index)
            .ok_or_else(|| EvalError::InvalidGroundTruth {
                trajectory: trajectory_id,
                reason: format!("pair {pair_index} has no annotation"),
            })?;
        let pair = trajectory.pair(pair_index)?;

        let verdict = self.grader.grade(&pair, truth).await?;
        if self.config.visualize {
            self.visualize(&pair, &verdict);
        }
        Ok(verdict)
    }

    /// Fold pre-computed model replies into the store as a live run would.
    ///
    /// Replies are graded against unrotated ground truth. With resume
    /// enabled, lines for already-graded pairs are ignored.
    pub async fn ingest(&mut self, lines: Vec<BatchResultLine>) -> Result<SessionReport> {
        let started = Instant::now();
        let session_id = self.session_id.to_string();
        let _span = SessionSpan::enter(&session_id, &self.config.model);

        self.transition(SessionPhase::Scanning);
        let mut by_trajectory: BTreeMap<u32, Vec<BatchResultLine>> = BTreeMap::new();
        for line in lines {
            by_trajectory.entry(line.trajectory).or_default().push(line);
        }
        if by_trajectory.is_empty() {
            return Err(EvalError::Config("results file contains no usable lines".into()));
        }
        obs::emit_session_started(&session_id, &self.config.model, by_trajectory.len(), self.config.resume);

        let mut reports = Vec::new();
        let mut graded: Graded = Vec::new();
        for (id, lines) in by_trajectory {
            let _span = TrajectorySpan::enter(id);
            match self.ingest_trajectory(id, lines, &mut graded) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    obs::emit_trajectory_skipped(id, &e);
                    reports.push(TrajectoryReport::without_grading(
                        id,
                        TrajectoryStatus::Skipped {
                            reason: e.to_string(),
                        },
                        self.store.load_existing(id).ok().flatten(),
                    ));
                }
            }
        }

        Ok(self.finalize(started, reports, graded, false))
    }

    fn ingest_trajectory(
        &mut self,
        id: u32,
        lines: Vec<BatchResultLine>,
        graded: &mut Graded,
    ) -> Result<TrajectoryReport> {
        let r = self.catalog.get(id).ok_or_else(|| EvalError::InvalidTrajectory {
            trajectory: id,
            reason: "trajectory directory not found".into(),
        })?;
        let trajectory = self.catalog.load(&r)?;
        let declared = trajectory.declared_pairs();
        let pending = if self.config.resume {
            self.store.pending_pairs(id, &declared)?
        } else {
            declared.clone()
        };

        self.transition(SessionPhase::Merging { trajectory: id });
        let mut verdicts = Vec::new();
        let mut failed = Vec::new();
        for line in lines {
            let index = line.pair_index;
            if !declared.contains(&index) {
                warn!(traj_id = id, pair = index, "result for unannotated pair ignored");
                continue;
            }
            if !pending.contains(&index) {
                debug!(traj_id = id, pair = index, "pair already graded, result ignored");
                continue;
            }
            let Some(truth) = trajectory.truth(index) else {
                continue;
            };
            match line.content {
                Some(content) => {
                    let verdict = verdict_from_content(
                        index,
                        &content,
                        truth.answer,
                        self.config.include_thought,
                        None,
                    );
                    obs::emit_pair_graded(id, index, verdict.correct, verdict.parse_error.is_some());
                    if self.config.visualize {
                        graded.push((trajectory.pair(index)?, verdict.clone()));
                    }
                    verdicts.push(verdict);
                }
                None => {
                    let error = line.error.unwrap_or_else(|| "no content".to_string());
                    METRICS.inc_pair_failures();
                    obs::emit_pair_failed(id, index, &error);
                    failed.push(PairFailure {
                        pair_index: index,
                        error,
                    });
                }
            }
        }

        let graded_count = verdicts.len();
        let (metrics, status) = if self.config.resume {
            (self.store.merge(id, verdicts)?, TrajectoryStatus::Merged)
        } else {
            (self.store.replace(id, verdicts)?, TrajectoryStatus::Replaced)
        };
        obs::emit_trajectory_merged(id, &metrics, status == TrajectoryStatus::Replaced);

        Ok(TrajectoryReport {
            id,
            graded: graded_count,
            failed,
            metrics: Some(metrics),
            status,
        })
    }
}

fn task_failure(pair_index: usize, failure: TaskFailure) -> PairFailure {
    PairFailure {
        pair_index,
        error: failure.to_string(),
    }
}

/// Resolves once `true` is observed. Never resolves if the sender is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
