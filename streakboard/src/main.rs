//! `streakboard`: optimistic task list with daily completion streaks.
//!
//! Two subcommands:
//!
//! ```bash
//! # Streak over a set of completion instants
//! cargo run --bin streakboard -- streak --now 2025-01-15T12:00:00Z \
//!     2025-01-15T08:00:00Z 2025-01-14T20:00:00Z
//!
//! # Scripted session: optimistic edits, a rollback, live events and the
//! # polling fallback, all against the in-memory store
//! cargo run --bin streakboard -- demo
//! ```
//!
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/streakboard/config.toml`).

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;

use streakboard::config::{CliArgs, ClientConfig, Command};
use streakboard::feed::LocalFeed;
use streakboard::store::{InMemoryStore, StoreError, StoreOp, TaskStore};
use streakboard::streak::{StreakError, compute_streak, parse_instant};
use streakboard::sync::{DeliveryMode, LiveSync, SyncError, TaskSynchronizer};
use streakboard_proto::task::{NewTask, Priority, TaskPatch, UserId};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(user_id = %config.user_id, "streakboard starting");

    let code = match &cli.command {
        Some(Command::Streak { now, instants }) => match run_streak(now.as_deref(), instants) {
            Ok(streak) => {
                println!("{streak}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
        Some(Command::Demo) | None => match run_demo(&config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(err = %e, "demo aborted");
                eprintln!("error: {e}");
                ExitCode::FAILURE
            }
        },
    };

    tracing::info!("streakboard exiting");
    code
}

/// Initialize logging.
///
/// With a usable `--log-file` logs go through a non-blocking file writer
/// and the returned [`WorkerGuard`] must be held until shutdown so
/// buffered entries are flushed. Otherwise logs go to stderr, leaving
/// stdout for command output.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let target = file_path.map(|path| (path, log_file_target(path)));
    if let Some((_, Some((log_dir, file_name)))) = target {
        let file_appender = tracing_appender::rolling::never(log_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::fmt()
            .with_writer(non_blocking)
            .with_env_filter(env_filter)
            .with_ansi(false)
            .init();
        return Some(guard);
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(env_filter)
        .init();
    if let Some((path, None)) = target {
        tracing::warn!(path = %path.display(), "unusable log file path, logging to stderr");
    }
    None
}

/// Splits a log file path into the directory and file name the appender
/// wants. A bare file name lives in the current directory; a path without
/// a UTF-8 file name is unusable.
fn log_file_target(path: &Path) -> Option<(&Path, &str)> {
    let file_name = path.file_name()?.to_str()?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Some((dir, file_name))
}

/// Parses every instant and computes the streak relative to `now`
/// (default: the current instant). The first malformed instant aborts.
fn run_streak(now: Option<&str>, instants: &[String]) -> Result<u32, StreakError> {
    let now = match now {
        Some(raw) => parse_instant(raw)?,
        None => Utc::now(),
    };
    let completions = instants
        .iter()
        .map(String::as_str)
        .map(parse_instant)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(compute_streak(completions, now))
}

/// Scripted session against the in-memory store and change feed.
async fn run_demo(config: &ClientConfig) -> Result<(), SyncError> {
    let feed = LocalFeed::new(config.feed_buffer, 1);
    let store = InMemoryStore::with_feed(feed.clone());
    store.set_latency(config.store_latency);
    let user = UserId::new(config.user_id.clone());
    let sync = Arc::new(TaskSynchronizer::new(
        store.clone(),
        user.clone(),
        config.sync_config(),
    ));
    let wait_limit = config.poll_interval * 3 + config.op_timeout;

    sync.load().await?;
    let (live, mut mode) = LiveSync::new(Arc::clone(&sync), feed.clone()).spawn();
    wait_for_mode(&mut mode, DeliveryMode::Streaming, wait_limit).await;
    println!("Signed in as {user}, delivery: {}", *mode.borrow());

    let plants = sync
        .create(NewTask::new("Water the plants").with_priority(Priority::Low))
        .await?;
    let report = sync
        .create(NewTask::new("Write weekly report").with_priority(Priority::High))
        .await?;
    sync.toggle_complete(&plants.id).await?;
    println!("\nCreated two tasks and completed one:");
    print_tasks(&sync);
    println!("Streak: {}", sync.current_streak(Utc::now()));

    store.fail_next(
        StoreOp::Update,
        StoreError::Unavailable("simulated outage".to_string()),
    );
    if let Err(e) = sync
        .update(&report.id, TaskPatch::title("Write monthly report"))
        .await
    {
        println!("\nRename rejected ({e}); local state rolled back:");
        print_tasks(&sync);
    }
    if let Some(failure) = sync.last_failure() {
        println!("Failure signal: {failure}");
        sync.acknowledge_failure();
    }

    let remote = store
        .insert(&user, &NewTask::new("Added from another device"))
        .await?;
    let streamed = wait_until(wait_limit, || sync.task(&remote.id).is_some()).await;
    println!("\nInsert from another session (streamed: {streamed}):");
    print_tasks(&sync);

    feed.set_available(false);
    feed.disconnect_all();
    wait_for_mode(&mut mode, DeliveryMode::Polling, wait_limit).await;
    println!("\nChange feed down, delivery: {}", *mode.borrow());

    let offline = store
        .insert(&user, &NewTask::new("Added while the feed was down"))
        .await?;
    let polled = wait_until(wait_limit, || sync.task(&offline.id).is_some()).await;
    println!("Insert picked up by polling: {polled}");

    feed.set_available(true);
    wait_for_mode(&mut mode, DeliveryMode::Streaming, wait_limit).await;
    println!("Change feed back, delivery: {}", *mode.borrow());

    println!("\nFinal list:");
    print_tasks(&sync);
    println!("Streak: {}", sync.current_streak(Utc::now()));

    live.abort();
    Ok(())
}

fn print_tasks(sync: &TaskSynchronizer<InMemoryStore>) {
    for task in sync.current_tasks() {
        let mark = if task.status.is_done() { "x" } else { " " };
        println!("  [{mark}] {} ({})", task.title, task.id);
    }
}

async fn wait_for_mode(
    rx: &mut watch::Receiver<DeliveryMode>,
    mode: DeliveryMode,
    limit: Duration,
) -> bool {
    let reached = matches!(
        tokio::time::timeout(limit, rx.wait_for(|m| *m == mode)).await,
        Ok(Ok(_))
    );
    if !reached {
        tracing::warn!(%mode, "delivery mode not reached in time");
    }
    reached
}

async fn wait_until(limit: Duration, mut ready: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(limit, async {
        while !ready() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}
