//! catchlog - operator CLI for the offline catch queue
//!
//! Catches are added to a local queue and pushed to the catch API by
//! `catchlog sync` (one pass) or `catchlog watch` (sync on every reconnect).
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/catchlog/queue.db (~/.local/share/catchlog/queue.db)
//! - Logs: $XDG_STATE_HOME/catchlog/catchlog.log (~/.local/state/catchlog/catchlog.log)
//! - Config: $XDG_CONFIG_HOME/catchlog/config.toml (~/.config/catchlog/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use catchlog_core::{
    CatchClient, CatchCreateInput, Config, ConnectivityMonitor, Database, NetworkStatus,
    OfflineQueue, PassOutcome, PendingCatchMutation, QueueReason, SubmitOutcome, SyncEvent,
    SyncReport,
};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::{acquire_drain_guard, try_acquire_drain_guard};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Parser)]
#[command(name = "catchlog")]
#[command(about = "Queue catches offline and sync them to the catch API")]
#[command(version)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and queue status
    Status,

    /// Queue a catch
    Add(AddArgs),

    /// List queued catches, oldest first
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one sync pass now
    Sync,

    /// Sync on every reconnect until Ctrl+C
    Watch,

    /// Make a failed catch eligible for sync again
    Retry {
        /// Local id of the queued catch
        local_id: String,
    },

    /// Drop a queued catch without sending it
    Discard {
        /// Local id of the queued catch
        local_id: String,
    },
}

#[derive(ClapArgs)]
struct AddArgs {
    /// Fishing spot id
    #[arg(long)]
    spot: String,

    /// Species id
    #[arg(long)]
    species: String,

    /// Weight in kg
    #[arg(long)]
    weight: Option<f64>,

    /// Length in cm
    #[arg(long)]
    length: Option<f64>,

    #[arg(long)]
    technique: Option<String>,

    #[arg(long)]
    bait: Option<String>,

    #[arg(long)]
    image_url: Option<String>,

    #[arg(long)]
    notes: Option<String>,

    /// Fish was released
    #[arg(long)]
    released: bool,

    /// When the fish was caught (RFC 3339, default: now)
    #[arg(long, value_parser = parse_timestamp)]
    caught_at: Option<DateTime<Utc>>,

    /// Try to send right away instead of only queueing
    #[arg(long)]
    send: bool,
}

impl AddArgs {
    fn into_input(self) -> CatchCreateInput {
        let mut input = CatchCreateInput::new(
            self.spot,
            self.species,
            self.caught_at.unwrap_or_else(Utc::now),
        );
        input.weight = self.weight;
        input.length = self.length;
        input.technique = self.technique;
        input.bait = self.bait;
        input.image_url = self.image_url;
        input.notes = self.notes;
        input.released = self.released;
        input
    }
}

fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 timestamp {:?}: {}", value, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard =
        catchlog_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::debug!(verbose = args.verbose, "catchlog starting");

    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    let db = Arc::new(db);

    match args.command {
        Command::Status => cmd_status(&config, &db, &db_path),
        Command::Add(add) => cmd_add(&config, db, &db_path, add).await,
        Command::List { json } => cmd_list(&config, &db, json, args.verbose),
        Command::Sync => cmd_sync(&config, db, &db_path).await,
        Command::Watch => cmd_watch(&config, db, &db_path).await,
        Command::Retry { local_id } => cmd_retry(&db, &local_id),
        Command::Discard { local_id } => cmd_discard(&db, &local_id),
    }
}

fn cmd_status(config: &Config, db: &Database, db_path: &Path) -> Result<()> {
    println!("Catch Queue Status");
    println!("==================");
    println!();

    println!("Database:        {}", db_path.display());
    println!(
        "Server URL:      {}",
        config.api.server_url.as_deref().unwrap_or("<not set>")
    );
    println!(
        "API token:       {}",
        if config.api.api_token.is_some() {
            "<set>"
        } else {
            "<not set>"
        }
    );
    println!("Auto sync:       {}", config.sync.auto_sync);
    println!("Max attempts:    {}", config.sync.max_attempts);
    println!();

    let pending = db.count().context("failed to count queued catches")?;
    let attention = db
        .list_needing_attention(config.sync.max_attempts)
        .context("failed to read failed catches")?;

    println!("Pending:         {}", pending);
    println!("Needs attention: {}", attention.len());

    match db.last_sync_pass().context("failed to read sync history")? {
        Some(pass) => {
            let outcome = pass.aborted.as_deref().unwrap_or("completed");
            println!(
                "Last sync:       {} ({} synced, {} failed, {})",
                pass.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
                pass.synced,
                pass.failed + pass.terminal,
                outcome
            );
        }
        None => println!("Last sync:       never"),
    }

    if !attention.is_empty() {
        println!();
        println!("Needs attention:");
        for mutation in &attention {
            println!(
                "  {}  {}",
                mutation.local_id,
                mutation.last_error.as_deref().unwrap_or("unknown error")
            );
        }
        println!();
        println!("Use `catchlog retry <id>` or `catchlog discard <id>`.");
    }

    if !config.api.is_ready() {
        println!();
        println!("Catch API is not configured. Add it to config.toml:");
        println!();
        println!("  [api]");
        println!("  server_url = \"https://your-catch-api.example.com\"");
        println!("  api_token = \"xxxxxxxxxxxx\"");
    }

    Ok(())
}

async fn cmd_add(config: &Config, db: Arc<Database>, db_path: &Path, add: AddArgs) -> Result<()> {
    let send = add.send;
    let input = add.into_input();

    // Sending needs the drain lock; if another process holds it, that process
    // will pick the catch up from the queue
    let drain_guard = if send {
        try_acquire_drain_guard(db_path).context("failed to acquire process lock")?
    } else {
        None
    };

    let Some(_drain_guard) = drain_guard else {
        let local_id = db.enqueue(&input).context("failed to queue catch")?;
        println!("Queued {}", local_id);
        return Ok(());
    };

    let client = Arc::new(CatchClient::new(&config.api).context("catch API is not configured")?);
    let status = if client.health_check().await {
        NetworkStatus::Online
    } else {
        NetworkStatus::Offline
    };
    let monitor = Arc::new(ConnectivityMonitor::new(status));
    let queue = OfflineQueue::new(db, client, monitor, &config.sync)
        .context("failed to open offline queue")?;
    let mut events = queue.subscribe();

    match queue.submit(input).await.context("failed to submit catch")? {
        SubmitOutcome::Created(record) => println!("Created {}", record.id),
        SubmitOutcome::Queued { local_id, reason } => {
            let behind_queue = reason == QueueReason::BehindQueue;
            let why = match reason {
                QueueReason::Offline => "server unreachable".to_string(),
                QueueReason::BehindQueue => "older catches still queued".to_string(),
                QueueReason::Transient(err) => err.to_string(),
            };
            println!("Queued {} ({})", local_id, why);

            // The submission started a pass for the backlog; let it finish
            if behind_queue {
                while let Some(event) = events.recv().await {
                    if let SyncEvent::PassFinished(report) = event {
                        print_report(&report);
                        break;
                    }
                }
            }
        }
        SubmitOutcome::Rejected(err) => anyhow::bail!("catch rejected: {}", err),
    }

    Ok(())
}

fn cmd_list(config: &Config, db: &Database, json: bool, verbose: bool) -> Result<()> {
    let entries = db.list().context("failed to read queue")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<8}  {:>8}  {:<20}  CATCH",
        "LOCAL ID", "STATUS", "ATTEMPTS", "CREATED"
    );
    for mutation in &entries {
        print_entry(mutation, config.sync.max_attempts, verbose);
    }
    println!();
    println!("{} catch(es) queued", entries.len());

    Ok(())
}

fn print_entry(mutation: &PendingCatchMutation, max_attempts: u32, verbose: bool) {
    let status = if mutation.needs_attention(max_attempts) {
        "FAILED!".to_string()
    } else {
        mutation.status.to_string()
    };
    println!(
        "{:<36}  {:<8}  {:>8}  {:<20}  {} @ {}",
        mutation.local_id,
        status,
        mutation.attempts,
        mutation.created_at.format("%Y-%m-%d %H:%M:%S"),
        mutation.payload.species_id,
        mutation.payload.spot_id
    );
    if verbose {
        if let Some(err) = &mutation.last_error {
            println!("    last error: {}", err);
        }
    }
}

async fn cmd_sync(config: &Config, db: Arc<Database>, db_path: &Path) -> Result<()> {
    let client = Arc::new(CatchClient::new(&config.api).context("catch API is not configured")?);
    let _drain_guard = acquire_drain_guard(db_path).context("failed to acquire process lock")?;

    let monitor = Arc::new(ConnectivityMonitor::new(NetworkStatus::Offline));
    let queue = OfflineQueue::new(db.clone(), client.clone(), monitor.clone(), &config.sync)
        .context("failed to open offline queue")?;

    let pending = db.list_syncable(config.sync.max_attempts)?.len();
    if pending == 0 {
        println!("Nothing to sync.");
        return Ok(());
    }

    monitor.set_online(client.health_check().await);
    if queue.is_offline() {
        println!(
            "Server {} unreachable; {} catch(es) stay queued.",
            client.base_url(),
            pending
        );
        return Ok(());
    }

    let pb = ProgressBar::new(pending as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut events = queue.subscribe();
    let Some(pass) = queue.sync_now() else {
        anyhow::bail!("a sync pass is already running");
    };

    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::ItemSynced { local_id, .. } => {
                pb.inc(1);
                pb.set_message(local_id);
            }
            SyncEvent::ItemFailed { local_id, .. } => {
                pb.inc(1);
                pb.set_message(format!("{} failed", local_id));
            }
            SyncEvent::PassFinished(_) => break,
            _ => {}
        }
    }
    pb.finish_and_clear();

    match pass.await.context("sync task panicked")? {
        PassOutcome::Completed(report) => print_report(&report),
        PassOutcome::AlreadyRunning => println!("A sync pass was already running."),
    }

    Ok(())
}

fn print_report(report: &SyncReport) {
    if report.is_clean() {
        println!("Sync complete:");
    } else {
        println!("Sync finished with problems:");
    }
    println!("  Submitted:        {}", report.submitted);
    println!("  Synced:           {}", report.synced);
    println!("  Failed (retry):   {}", report.failed);
    println!("  Needs attention:  {}", report.terminal);
    if let Some(reason) = &report.aborted {
        println!("  Aborted:          {}", reason);
    }
}

async fn cmd_watch(config: &Config, db: Arc<Database>, db_path: &Path) -> Result<()> {
    let client = Arc::new(CatchClient::new(&config.api).context("catch API is not configured")?);
    let _drain_guard = acquire_drain_guard(db_path).context("failed to acquire process lock")?;

    // Start offline so the first successful probe counts as a reconnect
    let monitor = Arc::new(ConnectivityMonitor::new(NetworkStatus::Offline));
    let queue = OfflineQueue::new(db, client.clone(), monitor.clone(), &config.sync)
        .context("failed to open offline queue")?;
    let mut events = queue.subscribe();
    queue.start();
    let poller = monitor.spawn_poller(client, config.sync.poll_interval());

    let shutdown = Arc::new(Notify::new());
    let s = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        s.notify_one();
    })
    .context("failed to set Ctrl+C handler")?;

    println!(
        "Watch mode active (probe every {}s). Press Ctrl+C to stop.",
        config.sync.poll_interval_secs
    );
    if !config.sync.auto_sync {
        println!("Auto sync is disabled in config; only connectivity is reported.");
    }
    println!();

    let mut connectivity = monitor.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = connectivity.borrow_and_update().status;
                println!("[{}] {:?}", timestamp(), status);
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&event);
            }
        }
    }

    poller.abort();
    queue.stop();
    println!("Watch mode stopped.");
    tracing::info!(pending = queue.pending_count()?, "catchlog watch stopped");

    Ok(())
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::ItemSynced {
            local_id,
            remote_id,
        } => println!("[{}] Synced {} -> {}", timestamp(), local_id, remote_id),
        SyncEvent::ItemFailed {
            local_id,
            error,
            attempts,
            terminal,
        } => {
            let next = if *terminal { "needs attention" } else { "will retry" };
            println!(
                "[{}] Failed {} (attempt {}): {}; {}",
                timestamp(),
                local_id,
                attempts,
                error,
                next
            );
        }
        SyncEvent::PassFinished(report) if report.submitted > 0 || report.aborted.is_some() => {
            println!(
                "[{}] Pass finished: {} synced, {} failed, {} need attention",
                timestamp(),
                report.synced,
                report.failed,
                report.terminal
            );
            if let Some(reason) = &report.aborted {
                println!("  Aborted: {}", reason);
            }
        }
        _ => {}
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

fn cmd_retry(db: &Database, local_id: &str) -> Result<()> {
    db.retry_mutation(local_id)
        .with_context(|| format!("failed to retry {}", local_id))?;
    println!("{} will be sent on the next sync", local_id);
    Ok(())
}

fn cmd_discard(db: &Database, local_id: &str) -> Result<()> {
    db.discard_mutation(local_id)
        .with_context(|| format!("failed to discard {}", local_id))?;
    println!("Discarded {}", local_id);
    Ok(())
}
