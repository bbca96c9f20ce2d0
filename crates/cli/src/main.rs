mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use db::{MemoryStore, SequenceStore, SqliteStore};
use engine::{Engine, EngineConfig, SimulatedGateway, DEFAULT_CONFIG_FILE};
use events::Event;
use sequencer_core::ResourceKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::plan::SequencePlan;

const DEFAULT_DB_URL: &str = "sqlite:sequences.db";

#[derive(Parser)]
#[command(name = "sequencer")]
#[command(about = "Run admission-controlled command sequences", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file and create the database
    Init,
    /// Run a sequence plan against the simulated gateway
    Run {
        plan: PathBuf,

        /// Simulated duration of every sub-command
        #[arg(long, default_value_t = 200)]
        delay_ms: u64,
    },
    /// List recorded sequences
    History {
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init => init(&cli.config).await,
        Commands::Run { plan, delay_ms } => {
            init_tracing();
            run(&cli.config, &plan, Duration::from_millis(delay_ms)).await
        }
        Commands::History { limit } => history(&cli.config, limit).await,
    }
}

async fn init(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("Configuration already present at {}", config_path.display());
        return Ok(());
    }

    let config = EngineConfig {
        database_url: Some(DEFAULT_DB_URL.to_string()),
        ..Default::default()
    };
    config
        .write(config_path)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    db::connect(DEFAULT_DB_URL)
        .await
        .context("Failed to create database")?;

    println!("Created:");
    println!("  {}", config_path.display());
    println!("  {}", DEFAULT_DB_URL.trim_start_matches("sqlite:"));
    println!();
    println!("Next: 'sequencer run PLAN.toml'");
    Ok(())
}

async fn open_store(config: &EngineConfig) -> Result<Arc<dyn SequenceStore>> {
    Ok(match config.database_url {
        Some(ref url) => {
            tracing::info!("Database: {}", url);
            Arc::new(
                SqliteStore::open(url)
                    .await
                    .context("Failed to open sequence database")?,
            )
        }
        None => Arc::new(MemoryStore::new()),
    })
}

async fn run(config_path: &Path, plan_path: &Path, delay: Duration) -> Result<()> {
    let config = EngineConfig::read(config_path).await;
    let plan = SequencePlan::load(plan_path).await?;
    let store = open_store(&config).await?;

    let sequence = plan.to_sequence(
        config.default_time_limit(),
        &format!("sequencer run {}", plan_path.display()),
    )?;

    let engine = Engine::builder(Arc::new(SimulatedGateway::new(delay)))
        .with_config(config)
        .with_store(store)
        .build()
        .await?;
    for target in plan.targets() {
        engine.registry().add(ResourceKind::Peer, &target);
    }

    let mut notifications = engine.bus().subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = notifications.recv().await {
            if let Event::SubCommandWarning { target, text, .. } = &envelope.event {
                eprintln!("warning {target}: {text}");
            } else if let Some(line) = envelope.event.status_line() {
                println!("{line}");
            }
        }
    });

    let job = engine.submit(sequence).await?;
    let outcome = tokio::select! {
        outcome = job.wait() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(sequence_id = job.id(), "Interrupted, aborting sequence");
            job.abort().await;
            job.wait().await
        }
    };

    println!();
    println!("{}", job.sequence().status_line());
    outcome.with_context(|| format!("sequence {} did not finish", job.id()))
}

async fn history(config_path: &Path, limit: i64) -> Result<()> {
    let config = EngineConfig::read(config_path).await;
    let Some(url) = config.database_url else {
        println!("No database configured in {}", config_path.display());
        println!("Run 'sequencer init' first.");
        return Ok(());
    };

    let store = SqliteStore::open(&url)
        .await
        .context("Failed to open sequence database")?;
    let entries = store.history(limit).await?;

    if entries.is_empty() {
        println!("No sequences yet.");
        return Ok(());
    }

    println!("Sequences ({}):", entries.len());
    for entry in &entries {
        let (flag, output) = entry
            .status
            .as_ref()
            .map(|s| (s.status_flag, s.output.as_str()))
            .unwrap_or((-1, ""));
        println!(
            "  {:>5} {:<20} {:>2} \"{}\" {} {}",
            entry.sequence.id,
            entry.sequence.sequence_type,
            flag,
            entry.sequence.name,
            entry.sequence.created_at.format("%Y-%m-%d %H:%M:%S"),
            output
        );
    }
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sequencer=info,engine=info,db=warn".into()),
        )
        .init();
}
