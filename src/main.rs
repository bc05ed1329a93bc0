//! Plan Consensus CLI
//!
//! Thin binary over the engine library: runs a manifest of documents and
//! scripted analyzer outputs through the pipeline, inspects run history,
//! and resolves staged approval requests (`approve <request_id>` /
//! `reject <request_id>`, exit code 0 on successful resolution).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::EnvFilter;

use plan_consensus::engine::approval::ApprovalGate;
use plan_consensus::utils::paths;
use plan_consensus::{
    default_phase_graph, Analyzer, ApprovalDecision, Database, Document, EngineConfig,
    EngineResult, Orchestrator, Recommendation,
};

#[derive(Parser)]
#[command(name = "plan-consensus", about = "Recommendation consensus and plan-lifecycle engine")]
struct Cli {
    /// Data directory (defaults to ~/.plan-consensus)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute one engine run from a manifest of documents and analyzer outputs
    Run {
        /// Manifest JSON path
        #[arg(long)]
        manifest: PathBuf,
        /// Run identifier (reuse an id to resume an interrupted run)
        #[arg(long)]
        run_id: Option<String>,
        /// Engine config JSON path (defaults to <data_dir>/config.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the stored report for a run
    Status { run_id: String },
    /// List interrupted runs that can be resumed
    Runs,
    /// List approval requests still pending
    Pending,
    /// Approve a pending approval request
    Approve { request_id: String },
    /// Reject a pending approval request
    Reject { request_id: String },
    /// Reverse every mutation recorded for a run
    Rollback { run_id: String },
}

/// Manifest consumed by `run`: the documents plus scripted analyzer outputs
/// standing in for real analyzer integrations.
#[derive(Debug, Deserialize)]
struct Manifest {
    documents: Vec<Document>,
    analyzers: Vec<ScriptedAnalyzerSpec>,
}

#[derive(Debug, Deserialize)]
struct ScriptedAnalyzerSpec {
    analyzer_id: String,
    /// Document id -> recommendations this analyzer emits for it
    outputs: HashMap<String, Vec<Recommendation>>,
}

/// Analyzer that replays recommendations scripted in the manifest.
struct ScriptedAnalyzer {
    analyzer_id: String,
    outputs: HashMap<String, Vec<Recommendation>>,
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    fn id(&self) -> &str {
        &self.analyzer_id
    }

    async fn analyze(&self, document: &Document) -> EngineResult<Vec<Recommendation>> {
        Ok(self
            .outputs
            .get(&document.document_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn open_database(data_dir: &Option<PathBuf>) -> Result<Database> {
    let db = match data_dir {
        Some(dir) => Database::open_at(dir.join("engine.db"))?,
        None => Database::open_default()?,
    };
    Ok(db)
}

fn load_config(data_dir: &Option<PathBuf>, explicit: &Option<PathBuf>) -> Result<EngineConfig> {
    let path = match (explicit, data_dir) {
        (Some(path), _) => path.clone(),
        (None, Some(dir)) => dir.join("config.json"),
        (None, None) => paths::config_path()?,
    };
    Ok(EngineConfig::load_or_default(path))
}

async fn run_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run {
            manifest,
            run_id,
            config,
        } => {
            let content = std::fs::read_to_string(&manifest)
                .with_context(|| format!("reading manifest {}", manifest.display()))?;
            let manifest: Manifest =
                serde_json::from_str(&content).context("parsing manifest JSON")?;
            if manifest.documents.is_empty() {
                bail!("manifest contains no documents");
            }

            let config = load_config(&cli.data_dir, &config)?;
            let db = open_database(&cli.data_dir)?;
            let orchestrator = Arc::new(Orchestrator::new(config, db)?);

            let analyzers: Vec<Arc<dyn Analyzer>> = manifest
                .analyzers
                .into_iter()
                .map(|spec| {
                    Arc::new(ScriptedAnalyzer {
                        analyzer_id: spec.analyzer_id,
                        outputs: spec.outputs,
                    }) as Arc<dyn Analyzer>
                })
                .collect();

            let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let graph = default_phase_graph(&manifest.documents);

            spawn_reviewer(orchestrator.approval_gate()).await;

            let result = orchestrator
                .clone()
                .run_once(&run_id, graph, analyzers, manifest.documents)
                .await?;

            println!(
                "run {}: {} ({} phases, {} applied, {} pending approval, {} errors)",
                result.run_id,
                result.status,
                result.phases_completed,
                result.proposals_applied,
                result.proposals_pending_approval,
                result.errors.len(),
            );
            for error in &result.errors {
                eprintln!("  error: {}", error);
            }
            println!("inspect with: plan-consensus status {}", result.run_id);
        }

        Command::Status { run_id } => {
            let db = open_database(&cli.data_dir)?;
            let Some(row) = db.get_run(&run_id)? else {
                bail!("unknown run: {}", run_id);
            };
            match row.report {
                Some(report) => {
                    let parsed: plan_consensus::PhaseReport = serde_json::from_str(&report)?;
                    print!("{}", parsed.human_summary());
                }
                None => println!("run {} is {} (no report yet)", row.run_id, row.status),
            }
        }

        Command::Runs => {
            let db = open_database(&cli.data_dir)?;
            let incomplete = db.incomplete_runs()?;
            if incomplete.is_empty() {
                println!("no interrupted runs");
            }
            for run in incomplete {
                println!(
                    "{}  {}  started {}  ({} checkpoints)",
                    run.run_id, run.status, run.started_at, run.checkpoint_count
                );
            }
        }

        Command::Pending => {
            let db = open_database(&cli.data_dir)?;
            let pending = ApprovalGate::pending_persisted(&db.pool())?;
            if pending.is_empty() {
                println!("no pending approval requests");
            }
            for request in pending {
                println!("{}  {}", request.request_id, request.proposal.summary());
            }
        }

        Command::Approve { request_id } => {
            let db = open_database(&cli.data_dir)?;
            ApprovalGate::resolve_persisted(&db.pool(), &request_id, ApprovalDecision::Approve)?;
            println!("approved {}", request_id);
        }

        Command::Reject { request_id } => {
            let db = open_database(&cli.data_dir)?;
            ApprovalGate::resolve_persisted(&db.pool(), &request_id, ApprovalDecision::Reject)?;
            println!("rejected {}", request_id);
        }

        Command::Rollback { run_id } => {
            let config = load_config(&cli.data_dir, &None)?;
            let db = open_database(&cli.data_dir)?;
            let orchestrator = Orchestrator::new(config, db)?;
            let rolled = orchestrator.editor().rollback_run(&run_id).await?;
            println!("rolled back {} mutation(s) from run {}", rolled, run_id);
        }
    }
    Ok(())
}

/// Connect an interactive reviewer: prompts print to stdout, decisions are
/// read from stdin as `approve <request_id>` / `reject <request_id>`.
async fn spawn_reviewer(gate: Arc<ApprovalGate>) {
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);
    gate.set_prompt_tx(tx).await;

    tokio::spawn(async move {
        while let Some(prompt) = rx.recv().await {
            println!(
                "approval needed [{}] {}\n  resolve with: approve {0} | reject {0}",
                prompt.request_id, prompt.summary
            );
        }
    });

    let gate_for_stdin = gate.clone();
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut parts = line.split_whitespace();
            let decision = match parts.next() {
                Some("approve") => ApprovalDecision::Approve,
                Some("reject") => ApprovalDecision::Reject,
                Some(other) => {
                    eprintln!("unknown command: {}", other);
                    continue;
                }
                None => continue,
            };
            let Some(request_id) = parts.next() else {
                eprintln!("usage: approve <request_id> | reject <request_id>");
                continue;
            };
            if !gate_for_stdin.resolve(request_id, decision).await {
                eprintln!("no waiting request: {}", request_id);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    run_command(cli).await
}
