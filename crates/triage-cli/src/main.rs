//! triage CLI
//!
//! Load driver for the dispatch engine: simulated sources push chat-like
//! events through a keyword classifier into simulated handlers, then the
//! metrics snapshot is printed as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use triage_core::{
    Classification, Classifier, Engine, EngineBuilder, EngineConfig, HandlerError, Priority,
    SourceId, SubmissionResult, TaskHandler, TaskKind,
};

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Drive the priority dispatch engine with simulated traffic", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated sources against the engine and print the metrics snapshot
    Run(RunArgs),

    /// Print the default engine configuration as JSON
    Config,

    /// Validate a configuration file
    Validate {
        /// Path to a JSON configuration file
        path: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// JSON configuration file (defaults are used for missing fields)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of simulated sources
    #[arg(short, long, default_value_t = 20)]
    sources: usize,

    /// Events each source submits
    #[arg(short, long, default_value_t = 8)]
    events: usize,

    /// Pause between two events of the same source, in milliseconds
    #[arg(long, default_value_t = 250)]
    spread_ms: u64,

    /// Probability that a handler invocation fails transiently
    #[arg(long, default_value_t = 0.1)]
    failure_rate: f64,

    /// Upper bound of simulated handler latency, in milliseconds
    #[arg(long, default_value_t = 200)]
    max_latency_ms: u64,
}

const MODERATION: &str = "moderation.check";
const RESPOND: &str = "conversation.respond";
const ARCHIVE: &str = "message.archive";

/// A chat message as it arrives from the gateway.
#[derive(Debug, Clone, Serialize)]
struct ChatEvent {
    author: String,
    channel: String,
    content: String,
}

/// Structural keyword rules; content inspection proper lives elsewhere.
struct KeywordClassifier;

impl Classifier<ChatEvent> for KeywordClassifier {
    fn source_of(&self, event: &ChatEvent) -> SourceId {
        SourceId::new(event.author.clone())
    }

    fn classify(&self, event: &ChatEvent) -> Classification {
        let content = event.content.to_lowercase();
        let (priority, kind) = if content.contains("scam") || content.contains("http://") {
            (Priority::Critical, MODERATION)
        } else if content.contains("@bot") {
            (Priority::High, RESPOND)
        } else if content.ends_with('?') {
            (Priority::Normal, RESPOND)
        } else {
            (Priority::Low, ARCHIVE)
        };
        Classification {
            priority,
            kind: TaskKind::new(kind),
            payload: serde_json::to_value(event).unwrap_or_default(),
        }
    }
}

/// Sleeps for a random latency and fails now and then.
struct SimulatedHandler {
    name: &'static str,
    failure_rate: f64,
    max_latency: Duration,
}

#[async_trait]
impl TaskHandler for SimulatedHandler {
    async fn handle(
        &self,
        _payload: Arc<serde_json::Value>,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        let (latency, fails) = {
            let mut rng = rand::thread_rng();
            let max_ms = self.max_latency.as_millis().max(1) as u64;
            (
                Duration::from_millis(rng.gen_range(0..=max_ms)),
                rng.gen_bool(self.failure_rate.clamp(0.0, 1.0)),
            )
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(HandlerError::transient(format!("{} interrupted", self.name)));
            }
            _ = tokio::time::sleep(latency) => {}
        }
        if fails {
            return Err(HandlerError::transient(format!("{} upstream busy", self.name)));
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging();

    match cli.command {
        Commands::Run(args) => run(args).await?,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&EngineConfig::default())?);
        }
        Commands::Validate { path } => {
            let config = EngineConfig::from_json_file(&path)
                .with_context(|| format!("invalid configuration in {}", path.display()))?;
            info!(path = %path.display(), "configuration is valid");
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_engine(config: EngineConfig, args: &RunArgs) -> Result<Engine<ChatEvent>> {
    let max_latency = Duration::from_millis(args.max_latency_ms);
    let handler = |name: &'static str| SimulatedHandler {
        name,
        failure_rate: args.failure_rate,
        max_latency,
    };

    let engine = EngineBuilder::<ChatEvent>::new()
        .config(config)
        .classifier(KeywordClassifier)
        .register(MODERATION, handler("moderation"))?
        .register(RESPOND, handler("responder"))?
        .register(ARCHIVE, handler("archiver"))?
        .expect_kinds(&[MODERATION, RESPOND, ARCHIVE])
        .build()?;
    Ok(engine)
}

fn message(author: usize, n: usize) -> ChatEvent {
    let mut rng = rand::thread_rng();
    let content = match rng.gen_range(0..20) {
        0 => "free nitro scam http://example.invalid".to_string(),
        1..=3 => format!("@bot what's the weather #{n}"),
        4..=8 => format!("anyone around #{n}?"),
        _ => format!("just chatting #{n}"),
    };
    ChatEvent {
        author: format!("user-{author}"),
        channel: "general".to_string(),
        content,
    }
}

#[derive(Debug, Default, Serialize)]
struct SubmitTally {
    accepted: usize,
    rate_limited: usize,
    queue_full: usize,
    unknown_kind: usize,
    shutting_down: usize,
}

impl SubmitTally {
    fn record(&mut self, result: SubmissionResult) {
        match result {
            SubmissionResult::Accepted(_) => self.accepted += 1,
            SubmissionResult::RateLimited => self.rate_limited += 1,
            SubmissionResult::QueueFull => self.queue_full += 1,
            SubmissionResult::UnknownKind => self.unknown_kind += 1,
            SubmissionResult::ShuttingDown => self.shutting_down += 1,
        }
    }

    fn merge(&mut self, other: SubmitTally) {
        self.accepted += other.accepted;
        self.rate_limited += other.rate_limited;
        self.queue_full += other.queue_full;
        self.unknown_kind += other.unknown_kind;
        self.shutting_down += other.shutting_down;
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let engine = Arc::new(build_engine(config, &args)?);
    info!(sources = args.sources, events = args.events, "starting simulated traffic");

    let mut producers = Vec::with_capacity(args.sources);
    for author in 0..args.sources {
        let engine = Arc::clone(&engine);
        let events = args.events;
        let spread = Duration::from_millis(args.spread_ms);
        producers.push(tokio::spawn(async move {
            let mut tally = SubmitTally::default();
            for n in 0..events {
                tally.record(engine.submit(&message(author, n)));
                tokio::time::sleep(spread).await;
            }
            tally
        }));
    }

    let mut tally = SubmitTally::default();
    for producer in producers {
        tally.merge(producer.await.context("producer task failed")?);
    }
    info!(?tally, "all sources done, waiting for the queues to drain");

    let mut poll = tokio::time::interval(Duration::from_millis(100));
    tokio::select! {
        _ = async {
            while engine.live_tasks() > 0 {
                poll.tick().await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => warn!("interrupted, shutting down"),
    }

    let report = engine.shutdown().await;
    let output = serde_json::json!({
        "submissions": tally,
        "shutdown": report,
        "metrics": engine.snapshot_metrics(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
