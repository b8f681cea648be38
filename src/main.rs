mod config;
mod db;
mod evaluator;
mod models;
mod notifier;
mod pipeline;
mod source;

use anyhow::{Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use db::Store;
use evaluator::Evaluator;
use pipeline::Pipeline;
use source::{EvalMode, FeedFileSource, JobSource};

#[derive(Parser)]
#[command(name = "jobscout")]
#[command(about = "Job hunt automation - score scraped postings against your profile and get notified")]
struct Cli {
    /// JSON feed of job-board postings (standard rubric)
    #[arg(long, value_name = "FILE")]
    board_feed: Option<PathBuf>,

    /// JSON feed of social posts (strict rubric)
    #[arg(long, value_name = "FILE")]
    social_feed: Option<PathBuf>,

    /// Evaluate and persist, but don't notify
    #[arg(long)]
    dry_run: bool,

    /// Re-evaluate postings that were already seen
    #[arg(long)]
    force: bool,

    /// Seconds to wait between postings
    #[arg(long, default_value = "10")]
    pace: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut sources: Vec<Box<dyn JobSource>> = Vec::new();
    if let Some(path) = cli.board_feed {
        sources.push(Box::new(FeedFileSource::new(
            "board",
            EvalMode::Standard,
            path,
        )));
    }
    if let Some(path) = cli.social_feed {
        sources.push(Box::new(FeedFileSource::new(
            "social",
            EvalMode::Strict,
            path,
        )));
    }
    if sources.is_empty() {
        bail!("No sources configured. Pass --board-feed and/or --social-feed.");
    }

    let config = Config::load()?;

    // Schema trouble is fatal: nothing below is safe without durable state.
    let store = Store::open(&config.db_path)?;
    info!(db = %store.path().display(), "store ready");

    let min_score = config.profile.min_score_to_notify;
    let evaluator = Evaluator::new(
        config.api_key,
        config.model,
        config.base_url,
        config.resume,
        config.profile,
        config.eval_timeout,
    )?;
    let notifier = notifier::from_config(config.telegram_bot_token, config.telegram_chat_id);

    let pipeline = Pipeline::new(
        &store,
        &evaluator,
        notifier.as_ref(),
        min_score,
        cli.dry_run,
        cli.force,
        Duration::from_secs(cli.pace),
    );

    let stats = pipeline.run(&mut sources);

    println!(
        "Run complete: {} fetched, {} already seen, {} evaluated, {} failed, {} notified, {} saved",
        stats.fetched, stats.seen, stats.evaluated, stats.failed, stats.notified, stats.saved
    );

    Ok(())
}
