//! Retrace CLI - record, inspect, replay and diff runs of the demo graph

mod demo;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use retrace_core::prelude::*;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "retrace")]
#[command(about = "Record, replay and diff instrumented graph runs", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to retrace.toml and RETRACE_* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Run store directory, overriding the configured one
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Keep runs in memory for this invocation only
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the demo graph as a new recorded run
    Run {
        /// Branch iterations before the graph ends
        #[arg(long, default_value_t = 3)]
        max_steps: u32,
        /// Seed for the random tool
        #[arg(long)]
        seed: Option<u64>,
        /// Replay policy stored on the run
        #[arg(long)]
        policy: Option<ReplayPolicy>,
        /// Thread id (generated when omitted)
        #[arg(long)]
        thread_id: Option<String>,
        /// JSON object of fingerprint -> canned response
        #[arg(long)]
        stubs: Option<PathBuf>,
    },
    /// List stored runs, newest first
    Runs,
    /// Print the spans of a run
    Spans {
        run_id: String,
    },
    /// Diff the spans of two runs
    Diff {
        left: String,
        right: String,
    },
    /// Re-run with tool responses stubbed from a recorded run and diff the result
    Replay {
        run_id: String,
    },
    /// Print the demo graph's topology and signature
    Signature,
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RetraceConfig::from_file(path)?,
        None => RetraceConfig::load()?,
    };
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.storage.data_dir.clone());

    match cli.command {
        Commands::Version => {
            println!("retrace {}", env!("CARGO_PKG_VERSION"));
            println!("retrace-core {}", retrace_core::VERSION);
            return Ok(());
        }
        Commands::Signature => {
            let inst = Instrumentor::new(Arc::new(StubRegistry::new()), Arc::new(SpanRecorder::new()));
            let (_, recorded) = demo::build(&inst, demo::rng(Some(0)))?;
            print_json(&json!({
                "signature": recorded.signature(),
                "graph": recorded,
            }))?;
            return Ok(());
        }
        _ => {}
    }

    let store = open_store(cli.memory, &data_dir).await?;
    match cli.command {
        Commands::Version | Commands::Signature => {}
        Commands::Run {
            max_steps,
            seed,
            policy,
            thread_id,
            stubs,
        } => {
            let session = Session::new(&config, store);
            if let Some(path) = stubs {
                let count = session.load_stubs(&path).await?;
                tracing::info!(count, path = %path.display(), "stubs loaded");
            }

            let mut request = RunRequest::new();
            if let Some(policy) = policy {
                request = request.policy(policy);
            }
            if let Some(thread_id) = thread_id {
                request = request.thread_id(thread_id);
            }
            let outcome = session.run_demo(request, max_steps, seed).await?;
            print_json(&json!({
                "run": outcome.run,
                "output": outcome.output,
                "span_count": outcome.span_count,
            }))?;
        }
        Commands::Runs => {
            print_json(&store.list_runs().await?)?;
        }
        Commands::Spans { run_id } => {
            if store.get_run(&run_id).await?.is_none() {
                bail!(TraceError::RunNotFound(run_id));
            }
            print_json(&store.list_spans(&run_id).await?)?;
        }
        Commands::Diff { left, right } => {
            let engine = DiffEngine::from_config(&config.diff);
            let report = diff_runs(store.as_ref(), &left, &right, &engine).await?;
            print_json(&report)?;
        }
        Commands::Replay { run_id } => {
            let session = Session::new(&config, store);
            let original = session
                .repo
                .get_run(&run_id)
                .await?
                .ok_or_else(|| TraceError::RunNotFound(run_id.clone()))?;
            let seeded = seed_from_run(session.repo.as_ref(), &run_id, session.inst.stubs()).await?;
            tracing::info!(run_id = %run_id, seeded, "stubs seeded from run");

            let max_steps = original
                .metadata
                .get("max_steps")
                .and_then(Value::as_u64)
                .map(|n| n as u32)
                .unwrap_or(3);
            let request = RunRequest::new()
                .policy(original.policy)
                .metadata("replay_of", json!(run_id));
            let replay = session.run_demo(request, max_steps, None).await?;

            let engine = DiffEngine::from_config(&config.diff);
            let report = diff_runs(session.repo.as_ref(), &run_id, &replay.run.id, &engine).await?;
            print_json(&json!({
                "replay_run": replay.run.id,
                "stubs_seeded": seeded,
                "output": replay.output,
                "diff": report,
            }))?;
        }
    }

    Ok(())
}

async fn open_store(memory: bool, data_dir: &std::path::Path) -> Result<Arc<dyn RunRepository>> {
    if memory {
        return Ok(Arc::new(InMemoryRunStore::new()));
    }
    let store = JsonlRunStore::open(data_dir)
        .await
        .with_context(|| format!("opening run store at {}", data_dir.display()))?;
    Ok(Arc::new(store))
}

/// Store, instrumentor and executor for commands that execute the graph
struct Session {
    repo: Arc<dyn RunRepository>,
    inst: Instrumentor,
    executor: RunExecutor,
}

impl Session {
    fn new(config: &RetraceConfig, repo: Arc<dyn RunRepository>) -> Self {
        let recorder = SpanRecorder::global();
        let inst = Instrumentor::new(StubRegistry::global(), recorder.clone())
            .with_config(config.recording.clone());
        let executor = RunExecutor::new(repo.clone(), recorder)
            .with_default_policy(config.replay.default_policy);
        Self {
            repo,
            inst,
            executor,
        }
    }

    async fn load_stubs(&self, path: &std::path::Path) -> Result<usize> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading stubs from {}", path.display()))?;
        let stubs: BTreeMap<String, Value> = serde_json::from_str(&text)
            .with_context(|| format!("{} must be a JSON object of fingerprint -> response", path.display()))?;
        let count = stubs.len();
        self.inst.stubs().extend(stubs);
        Ok(count)
    }

    async fn run_demo(
        &self,
        request: RunRequest,
        max_steps: u32,
        seed: Option<u64>,
    ) -> Result<RunOutcome<Value>> {
        let (graph, recorded) = demo::build(&self.inst, demo::rng(seed))?;
        let graph = graph
            .compile()?
            .with_recursion_limit(demo::recursion_limit(max_steps));

        let mut request = request
            .graph_signature(recorded.signature())
            .metadata("max_steps", json!(max_steps));
        if let Some(seed) = seed {
            request = request.metadata("seed", json!(seed));
        }

        let outcome = self
            .executor
            .execute(request, |run| async move {
                graph
                    .invoke(&run.thread_id, demo::initial_state(max_steps))
                    .await
            })
            .await?;
        Ok(outcome)
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
