//! Rendezvous VLM evaluation CLI
//!
//! The `rdv` command grades a vision-language model on Alice/Bob rendezvous
//! trajectories and keeps resumable results on disk.
//!
//! ## Commands
//!
//! - `eval`: Grade every pending pair of the selected trajectories
//! - `grade-pair`: Grade one pair and print the verdict, without storing it
//! - `ingest`: Fold a JSONL file of offline model replies into the results
//! - `unannotated`: List trajectories that still lack ground truth
//! - `summary`: Recompute and print accuracy from stored results

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

use rdv_core::{
    read_batch_results, EvalError, EvaluationSession, OpenAiClient, OpenAiConfig,
    ResultStore, SessionConfig, SessionReport, TrajectoryCatalog, TrajectorySelector,
    TrajectoryStatus, VlmClient, DEFAULT_MODEL,
};

#[derive(Parser)]
#[command(name = "rdv")]
#[command(version = rdv_core::VERSION)]
#[command(about = "Rendezvous VLM evaluation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Dataset and output locations shared by every session command.
#[derive(clap::Args, Debug, Clone)]
struct DataArgs {
    /// Root holding traj<id>/metainfo.json and answer.json
    #[arg(long, default_value = "textdata")]
    textdata: PathBuf,

    /// Root holding place<id>/id_<pano>_<heading>.jpg
    #[arg(long, default_value = "googledata")]
    googledata: PathBuf,

    /// Results directory (default: eval/<model>-<timestamp>)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Model name sent to the endpoint
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Ask the model for a Thought before its Answer
    #[arg(long)]
    include_thought: bool,

    /// Write a Markdown card per graded pair
    #[arg(long)]
    visualize: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct EndpointArgs {
    /// API key for the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_BASE_URL")]
    base_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade every pending pair of the selected trajectories
    Eval {
        /// Trajectories to evaluate: all, 7, 3-10 or 1,4,9
        #[arg(short, long, default_value = "all")]
        traj: TrajectorySelector,

        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        endpoint: EndpointArgs,

        /// Regrade everything and overwrite prior results
        #[arg(long)]
        no_resume: bool,

        /// Randomly rotate each agent's views and adjust the expected answer
        #[arg(long)]
        use_augmentation: bool,

        /// Seed for the augmentation draw
        #[arg(long)]
        seed: Option<u64>,

        /// Send one request at a time
        #[arg(long)]
        no_batch: bool,

        /// Requests dispatched concurrently per batch
        #[arg(long, default_value = "10")]
        batch_size: usize,

        /// Minimum spacing between batch starts, in milliseconds
        #[arg(long, default_value = "1000")]
        request_delay_ms: u64,

        /// Attempts per request before the pair is given up
        #[arg(long, default_value = "5")]
        max_attempts: u32,
    },

    /// Grade a single pair and print the verdict without storing it
    GradePair {
        /// Trajectory id
        #[arg(short, long)]
        traj: u32,

        /// Pair index within the trajectory
        #[arg(short, long)]
        pair: usize,

        #[command(flatten)]
        data: DataArgs,

        #[command(flatten)]
        endpoint: EndpointArgs,

        /// Randomly rotate each agent's views and adjust the expected answer
        #[arg(long)]
        use_augmentation: bool,
    },

    /// Fold a JSONL file of offline model replies into the results
    Ingest {
        /// Results file, one `custom_id`-tagged reply per line
        #[arg(short, long)]
        results: PathBuf,

        #[command(flatten)]
        data: DataArgs,

        /// Regrade every line and overwrite prior results
        #[arg(long)]
        no_resume: bool,
    },

    /// List trajectories that still lack ground truth
    Unannotated {
        /// Trajectories to inspect
        #[arg(short, long, default_value = "all")]
        traj: TrajectorySelector,

        /// Root holding traj<id>/ directories
        #[arg(long, default_value = "textdata")]
        textdata: PathBuf,
    },

    /// Recompute and print accuracy from stored results
    Summary {
        /// Results directory of a previous session
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Also rewrite overall_results.json from the per-trajectory files
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    rdv_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Eval {
            traj,
            data,
            endpoint,
            no_resume,
            use_augmentation,
            seed,
            no_batch,
            batch_size,
            request_delay_ms,
            max_attempts,
        } => {
            let config = SessionConfig {
                resume: !no_resume,
                use_augmentation,
                augmentation_seed: seed,
                use_batch: !no_batch,
                batch_size,
                request_delay_ms,
                max_attempts,
                ..session_config(&data)
            };
            cmd_eval(config, &endpoint, &traj).await
        }
        Commands::GradePair {
            traj,
            pair,
            data,
            endpoint,
            use_augmentation,
        } => {
            let config = SessionConfig {
                use_augmentation,
                ..session_config(&data)
            };
            cmd_grade_pair(config, &endpoint, traj, pair).await
        }
        Commands::Ingest {
            results,
            data,
            no_resume,
        } => {
            let config = SessionConfig {
                resume: !no_resume,
                ..session_config(&data)
            };
            cmd_ingest(config, &results).await
        }
        Commands::Unannotated { traj, textdata } => cmd_unannotated(&textdata, &traj),
        Commands::Summary { output_dir, save } => cmd_summary(&output_dir, save),
    }
}

fn session_config(data: &DataArgs) -> SessionConfig {
    let output_dir = data
        .output_dir
        .clone()
        .unwrap_or_else(|| rdv_core::reporting::default_output_dir(&data.model, chrono::Utc::now()));
    SessionConfig {
        textdata_root: data.textdata.clone(),
        googledata_root: data.googledata.clone(),
        output_dir,
        model: data.model.clone(),
        include_thought: data.include_thought,
        visualize: data.visualize,
        ..SessionConfig::default()
    }
}

fn build_client(endpoint: &EndpointArgs) -> Result<Arc<dyn VlmClient>> {
    let mut config = OpenAiConfig::default().with_timeout_secs(endpoint.timeout_secs);
    if let Some(key) = &endpoint.api_key {
        config = config.with_api_key(key);
    }
    if let Some(url) = &endpoint.base_url {
        config = config.with_base_url(url);
    }
    let client = OpenAiClient::new(config).context("Failed to configure model client")?;
    Ok(Arc::new(client))
}

/// Only configuration errors end the process with a failure status.
fn finish(result: rdv_core::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            error!(error = %e, "command did not complete");
            Ok(())
        }
    }
}

/// Grade every pending pair of the selected trajectories
async fn cmd_eval(config: SessionConfig, endpoint: &EndpointArgs, selector: &TrajectorySelector) -> Result<()> {
    let client = build_client(endpoint)?;
    let mut session = EvaluationSession::new(config, client)?;
    info!(
        session_id = %session.session_id(),
        output = %session.store().root().display(),
        "starting evaluation"
    );

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current trajectory bookkeeping");
            let _ = tx.send(true);
        }
    });

    match session.run(selector, rx).await {
        Ok(report) => {
            print_report(&report, session.store().root());
            Ok(())
        }
        Err(e) => finish(Err(e)),
    }
}

/// Grade one pair and print the verdict as JSON
async fn cmd_grade_pair(
    config: SessionConfig,
    endpoint: &EndpointArgs,
    traj: u32,
    pair: usize,
) -> Result<()> {
    let client = build_client(endpoint)?;
    let session = EvaluationSession::new(config, client)?;
    match session.grade_single(traj, pair).await {
        Ok(verdict) => {
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
        Err(e) => finish(Err(e)),
    }
}

/// Fold offline replies into the results directory
async fn cmd_ingest(config: SessionConfig, results: &Path) -> Result<()> {
    let lines = read_batch_results(results)
        .await
        .with_context(|| format!("Failed to read results file {:?}", results))?;
    info!(lines = lines.len(), "read results file");

    let mut session = EvaluationSession::offline(config)?;
    match session.ingest(lines).await {
        Ok(report) => {
            print_report(&report, session.store().root());
            Ok(())
        }
        Err(e) => finish(Err(e)),
    }
}

/// List trajectories without an answer file
fn cmd_unannotated(textdata: &Path, selector: &TrajectorySelector) -> Result<()> {
    let catalog = TrajectoryCatalog::new(textdata)?;
    let missing = catalog.list_unannotated(selector)?;
    if missing.is_empty() {
        println!("Every selected trajectory has ground truth.");
        return Ok(());
    }
    for r in &missing {
        println!("traj{}\t{}", r.id, r.dir.display());
    }
    println!("{} trajectories without ground truth", missing.len());
    Ok(())
}

/// Print per-trajectory and overall accuracy from stored results
fn cmd_summary(output_dir: &Path, save: bool) -> Result<()> {
    if !output_dir.is_dir() {
        return Err(EvalError::Config(format!("{:?} is not a results directory", output_dir)).into());
    }
    let store = ResultStore::open(output_dir)?;
    let overall = if save {
        store.save_overall()?
    } else {
        store.compute_overall()?
    };

    if overall.per_trajectory.is_empty() {
        println!("No stored trajectory results under {:?}", output_dir);
        return Ok(());
    }
    for (id, m) in &overall.per_trajectory {
        println!(
            "traj{:<6} {:>5}/{:<5} {:.4}",
            id,
            m.correct,
            m.total,
            m.accuracy()
        );
    }
    println!(
        "overall     {:>5}/{:<5} {:.4}",
        overall.totals.correct,
        overall.totals.total,
        overall.totals.accuracy()
    );
    Ok(())
}

fn print_report(report: &SessionReport, output_dir: &Path) {
    for t in &report.trajectories {
        let status = match &t.status {
            TrajectoryStatus::Merged => "merged".to_string(),
            TrajectoryStatus::Replaced => "replaced".to_string(),
            TrajectoryStatus::AlreadyComplete => "complete".to_string(),
            TrajectoryStatus::Skipped { reason } => format!("skipped: {reason}"),
            TrajectoryStatus::Interrupted => "interrupted".to_string(),
        };
        let counts = t
            .metrics
            .map(|m| format!("{}/{} ({:.4})", m.correct, m.total, m.accuracy()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "traj{:<6} graded {:>4}  failed {:>3}  {:<20} {}",
            t.id,
            t.graded,
            t.failed.len(),
            counts,
            status
        );
    }
    let totals = report.overall.totals;
    println!(
        "Overall accuracy: {:.4} ({}/{})",
        totals.accuracy(),
        totals.correct,
        totals.total
    );
    if report.interrupted {
        println!("Session interrupted; rerun with the same output directory to resume.");
    }
    println!("Results: {:?}", output_dir);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_defaults() {
        let cli = Cli::try_parse_from(["rdv", "eval"]).unwrap();
        match cli.command {
            Commands::Eval {
                traj,
                data,
                no_resume,
                batch_size,
                request_delay_ms,
                max_attempts,
                ..
            } => {
                assert_eq!(traj, TrajectorySelector::All);
                assert_eq!(data.model, DEFAULT_MODEL);
                assert!(!no_resume);
                assert_eq!(batch_size, 10);
                assert_eq!(request_delay_ms, 1000);
                assert_eq!(max_attempts, 5);
            }
            _ => panic!("expected eval"),
        }
    }

    #[test]
    fn test_eval_flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "rdv",
            "--verbose",
            "eval",
            "--traj",
            "3-5",
            "--no-resume",
            "--no-batch",
            "--output-dir",
            "out",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Eval {
            traj,
            data,
            no_resume,
            no_batch,
            ..
        } = cli.command
        else {
            panic!("expected eval");
        };
        assert_eq!(traj, TrajectorySelector::Range { start: 3, end: 5 });
        let config = SessionConfig {
            resume: !no_resume,
            use_batch: !no_batch,
            ..session_config(&data)
        };
        assert!(!config.resume);
        assert_eq!(config.batch_config().effective_batch_size(), 1);
        assert_eq!(config.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_version_comes_from_core() {
        let cmd = Cli::command();
        assert_eq!(cmd.get_version(), Some(rdv_core::VERSION));
        cmd.debug_assert();
    }

    #[test]
    fn test_bad_selector_rejected() {
        assert!(Cli::try_parse_from(["rdv", "eval", "--traj", "x-y"]).is_err());
    }

    #[test]
    fn test_grade_pair_requires_ids() {
        assert!(Cli::try_parse_from(["rdv", "grade-pair", "--traj", "1"]).is_err());
        let cli = Cli::try_parse_from(["rdv", "grade-pair", "--traj", "1", "--pair", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::GradePair { traj: 1, pair: 2, .. }));
    }

    #[test]
    fn test_summary_of_missing_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_summary(&dir.path().join("nope"), false).unwrap_err();
        let eval = err.downcast_ref::<EvalError>().unwrap();
        assert!(eval.is_fatal());
    }
}
