//! Rendezvous evaluation core library.
//!
//! Grades a vision-language model's navigation decisions for two agents
//! (Alice and Bob) trying to meet, against annotated ground truth, with
//! resumable per-trajectory results.

pub mod augment;
pub mod batcher;
pub mod catalog;
pub mod client;
pub mod config;
pub mod domain;
pub mod fakes;
pub mod grader;
pub mod imagery;
pub mod ingest;
pub mod metrics;
pub mod obs;
pub mod prompt;
pub mod reporting;
pub mod session;
pub mod store;
pub mod telemetry;

/// Crate version, as reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use domain::{
    Action, AgentActions, AugmentationInfo, EvalError, GroundTruth, GroundTruthAnswer,
    OverallMetrics, PairFailure, PairOutcome, PairVerdict, ParseError, PlaceId, RequestError,
    Result, Rotation, Trajectory, TrajectoryDescriptor, TrajectoryMetrics, WaypointPair,
};

pub use batcher::{BatchConfig, BatchReport, RequestBatcher, TaskFailure};
pub use catalog::{TrajectoryCatalog, TrajectoryRef, TrajectorySelector};
pub use client::{EncodedImage, OfflineClient, OpenAiClient, OpenAiConfig, VlmClient, VlmRequest};
pub use config::{SessionConfig, DEFAULT_MODEL};
pub use grader::{backoff_delay, GradeOptions, PairGrader};
pub use imagery::{FsImageResolver, Heading, ImageResolver, PairImages};
pub use ingest::{read_batch_results, BatchResultLine};
pub use reporting::{SessionFlags, SessionLogEntry};
pub use session::{
    EvaluationSession, SessionPhase, SessionReport, TrajectoryReport, TrajectoryStatus,
};
pub use store::{OverallRecord, ResultStore, TrajectoryRecord};
