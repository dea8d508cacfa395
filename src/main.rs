//! `loanflow` - conversation engine for multi-stage loan origination
//!
//! This binary drives the engine interactively or from a script, and exposes
//! the underwriting calculations directly.

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::cli::{render, Cli, Commands, ConfigCommand};
use loanflow_core::config::StorageBackend;
use loanflow_core::conversation::{LoanPurpose, LoanRequest};
use loanflow_core::router::RoutingStrategy;
use loanflow_core::services::{ConversationStore, JsonFileStore, MemoryStore, SyntheticBureau};
use loanflow_core::underwriting::{emi, format_rupees, round2, Application, Verdict};
use loanflow_core::{EngineConfig, LoanEngine, Stage};

mod cli;

const LOG_ENV: &str = "LOANFLOW_LOG";
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        let blue = Style::new().blue();
        println!(
            "{} v{} ({})",
            blue.apply_to("loanflow"),
            env!("CARGO_PKG_VERSION"),
            env!("GIT_HASH")
        );
        return Ok(());
    }

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => EngineConfig::default_path().context("Failed to locate configuration directory")?,
    };
    let config = EngineConfig::load(Some(&config_path))
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    init_logging(&config.log_level);
    log::debug!("configuration loaded from {}", config_path.display());

    match cli.command {
        None => handle_chat(config, None, None).await?,
        Some(Commands::Chat { id, strategy }) => handle_chat(config, id, strategy).await?,
        Some(Commands::Run { script, id, json }) => handle_run(config, &script, id, json).await?,
        Some(Commands::Emi { amount, rate, tenure }) => handle_emi(&config, amount, rate, tenure),
        Some(Commands::Decide {
            amount,
            tenure,
            purpose,
            score,
            limit,
            income,
            json,
        }) => handle_decide(&config, amount, tenure, purpose, score, limit, income, json)?,
        Some(Commands::Config { cmd }) => handle_config(&config, &config_path, cmd)?,
    }

    Ok(())
}

/// `LOANFLOW_LOG` wins over the configured level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &EngineConfig) -> Result<Arc<dyn ConversationStore>> {
    Ok(match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Json => {
            let dir = config
                .storage
                .dir
                .clone()
                .or_else(EngineConfig::default_data_dir)
                .context("No data directory available; set storage.dir")?;
            log::info!("persisting conversations under {}", dir.display());
            Arc::new(JsonFileStore::new_in(dir))
        }
    })
}

fn build_engine(mut config: EngineConfig, strategy: Option<RoutingStrategy>) -> Result<Arc<LoanEngine>> {
    if let Some(strategy) = strategy {
        config.router.strategy = strategy;
    }
    let bureau = Arc::new(SyntheticBureau::new());
    let store = open_store(&config)?;
    let engine = LoanEngine::new(&config, bureau.clone(), bureau, store).context("Failed to start engine")?;
    Ok(Arc::new(engine))
}

fn new_conversation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

async fn handle_chat(config: EngineConfig, id: Option<String>, strategy: Option<RoutingStrategy>) -> Result<()> {
    let engine = build_engine(config, strategy)?;
    let id = id.unwrap_or_else(new_conversation_id);
    let dim = Style::new().dim();
    println!(
        "{}",
        dim.apply_to(format!(
            "conversation {} (routing: {}). Type 'help' for guidance, 'bye' to leave.",
            id,
            engine.router().strategy()
        ))
    );
    println!();

    let sweeper = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let report = engine.sweep().await;
                if !report.abandoned.is_empty() {
                    log::info!("{} idle conversations abandoned", report.abandoned.len());
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"you> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = engine.handle(&id, &line).await;
        render::print_reply(&reply);
        if reply.stage == Stage::Done {
            engine.end(&id);
            break;
        }
        if engine.state().is_paused(&id) {
            break;
        }
    }

    sweeper.abort();
    Ok(())
}

async fn handle_run(config: EngineConfig, script: &Path, id: Option<String>, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(script)
        .await
        .with_context(|| format!("Failed to read script {}", script.display()))?;
    let engine = build_engine(config, None)?;
    let id = id.unwrap_or_else(new_conversation_id);

    let messages = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'));

    let mut last = None;
    for message in messages {
        let reply = engine.handle(&id, message).await;
        if json {
            println!("{}", serde_json::to_string(&reply).context("Failed to encode reply")?);
        } else {
            render::print_user(message);
            render::print_reply(&reply);
        }
        last = Some(reply.stage);
    }

    if !json {
        match last {
            Some(stage) => println!("conversation {} ended at stage {}", id, stage),
            None => println!("script {} contained no messages", script.display()),
        }
    }
    Ok(())
}

fn handle_emi(config: &EngineConfig, amount: f64, rate: f64, tenure: u32) {
    let installment = emi(amount, rate, tenure);
    let total = round2(installment * tenure as f64);
    let fee = round2(amount * config.underwriting.processing_fee_pct / 100.0);
    println!("EMI:             ₹{} per month", format_rupees(installment));
    println!("Tenure:          {} months at {}% p.a.", tenure, rate);
    println!("Processing fee:  ₹{}", format_rupees(fee));
    println!("Total repayment: ₹{}", format_rupees(total));
    println!("Total interest:  ₹{}", format_rupees(round2(total - amount)));
}

#[allow(clippy::too_many_arguments)]
fn handle_decide(
    config: &EngineConfig,
    amount: f64,
    tenure: u32,
    purpose: LoanPurpose,
    score: u32,
    limit: f64,
    income: Option<f64>,
    json: bool,
) -> Result<()> {
    let loan = LoanRequest::new(amount, tenure, purpose).context("Invalid loan request")?;
    let policy = &config.underwriting;
    let mut outcome = policy.evaluate(&Application::new(&loan, score, limit));

    if let Some(income) = income {
        if outcome.verdict() == Verdict::NeedsIncomeProof {
            policy
                .review_income(&mut outcome, income)
                .context("Income review failed")?;
        } else {
            log::info!("--income ignored: outcome does not need income proof");
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        render::print_outcome(&outcome);
    }
    Ok(())
}

fn handle_config(config: &EngineConfig, path: &Path, cmd: ConfigCommand) -> Result<()> {
    match cmd {
        ConfigCommand::Show => {
            print!("{}", config.to_toml().context("Failed to render configuration")?);
        }
        ConfigCommand::Path => {
            println!("{}", path.display());
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            EngineConfig::default()
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let green = Style::new().green();
            println!("{} {}", green.apply_to("wrote"), path.display());
        }
    }
    Ok(())
}
