use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use realtime::{JudgingClient, RealtimeUpdate, ScoreApi, SyncConfig, Topic};
use storage::Database;
use storage::dto::parse_rankings;
use storage::models::{RankingEntry, RowDirection};
use storage::repository::PendingScoreRepository;
use storage::services::PositionTracker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "judge-sync")]
#[command(about = "Offline score queue and live ranking tools for judging clients", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "OFFLINE_DB_URL", default_value = "sqlite://judge-sync.db")]
    offline_db_url: String,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List score sheets waiting in the offline queue
    Pending {
        #[arg(long)]
        competition: Option<i64>,
    },
    /// Push queued score sheets to the server now
    Flush,
    /// Follow the live ranking board of a competition
    Rankings {
        #[arg(long)]
        competition: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("judge_sync={},realtime={},storage={}", log_level, log_level, log_level)
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Pending { competition } => list_pending(&cli.offline_db_url, competition).await,
        Commands::Flush => flush(cli.offline_db_url).await,
        Commands::Rankings { competition } => follow_rankings(cli.offline_db_url, competition).await,
    }
}

fn load_config(offline_db_url: String) -> Result<SyncConfig> {
    let mut config = SyncConfig::from_env()?;
    config.offline_db_url = offline_db_url;
    Ok(config)
}

async fn list_pending(offline_db_url: &str, competition: Option<i64>) -> Result<()> {
    let database = Database::new(offline_db_url)
        .await
        .context("Failed to open offline store")?;
    let pool = database.pool().await?;
    let queue = PendingScoreRepository::new(pool);

    let mut pending = match competition {
        Some(competition_id) => queue.list_for_competition(competition_id).await?,
        None => queue.list_pending().await?,
    };
    pending.sort_by_key(|submission| (submission.timestamp, submission.id));

    if pending.is_empty() {
        println!("Offline queue is empty");
        return Ok(());
    }

    println!(
        "{:>6}  {:>11}  {:>11}  {:>5}  {:>6}  {}",
        "id", "competition", "participant", "judge", "marks", "queued at"
    );
    for submission in &pending {
        println!(
            "{:>6}  {:>11}  {:>11}  {:>5}  {:>6}  {}",
            submission.id,
            submission.competition_id,
            submission.participant_id,
            submission.judge_id,
            submission.score_data.len(),
            submission.timestamp.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    println!("{} submission(s) pending", pending.len());

    database.close().await;
    Ok(())
}

async fn flush(offline_db_url: String) -> Result<()> {
    let config = load_config(offline_db_url)?;
    let client = JudgingClient::connect(&config)
        .await
        .context("Failed to start judging client")?;

    if !client.refresh_connectivity().await {
        anyhow::bail!("Server unreachable at {}, queue left untouched", config.probe_target());
    }

    let report = client.coordinator().sync_pending_actions().await?;
    tracing::info!(
        attempted = report.attempted,
        synced = report.synced,
        failed = report.failed.len(),
        "Flush finished"
    );

    if !report.failed.is_empty() {
        println!("Still queued: {:?}", report.failed);
    }
    client.database().close().await;
    Ok(())
}

async fn follow_rankings(offline_db_url: String, competition_id: i64) -> Result<()> {
    let config = load_config(offline_db_url)?;
    let client = JudgingClient::connect(&config)
        .await
        .context("Failed to start judging client")?;

    let tracker = Arc::new(Mutex::new(PositionTracker::new()));

    match client.sync().api().fetch_rankings(competition_id).await {
        Ok(entries) => render(&tracker, entries),
        Err(e) => tracing::warn!(error = %e, "Initial rankings unavailable, waiting for live data"),
    }

    let board = tracker.clone();
    let subscription = client
        .sync()
        .subscribe(Topic::rankings(competition_id), move |update: RealtimeUpdate| {
            match parse_rankings(&update.payload) {
                Ok(entries) => render(&board, entries),
                Err(e) => tracing::warn!(source = %update.source, error = %e, "Unreadable rankings update"),
            }
        })
        .await;

    tracing::info!(competition_id, "Following rankings, Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    subscription.unsubscribe().await?;
    tracker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .reset();
    Ok(())
}

fn render(tracker: &Mutex<PositionTracker>, entries: Vec<RankingEntry>) {
    let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
    let previous: Vec<Option<u32>> = entries
        .iter()
        .map(|entry| tracker.previous_position(entry.participant_id))
        .collect();
    let entries = tracker.apply(entries);

    println!();
    println!("{:>3}  {:<4} {:<28} {:<20} {:>7}", "pos", "", "rider", "horse", "%");
    for (entry, previous) in entries.iter().zip(previous) {
        let marker = match entry.direction {
            RowDirection::Up => "up",
            RowDirection::Down => "down",
            RowDirection::New => "new",
            RowDirection::None => "",
        };
        let highlight = previous
            .is_some_and(|previous| PositionTracker::is_significant(previous, entry));

        println!(
            "{:>3}  {:<4} {:<28} {:<20} {:>7.2}{}",
            entry.position,
            marker,
            entry.rider.name,
            entry.horse.name,
            entry.percentage,
            if highlight { "  *" } else { "" },
        );
    }
}
