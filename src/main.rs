use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use console_backup::context::AppContext;
use console_backup::core::TriggerOrigin;
use console_backup::logging::{self, LogConfig};
use console_backup::web::{ApiClient, WebServer};
use console_backup::{config, core::ScheduledJob};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "console-backup")]
#[command(about = "Nightly retrieval of network console backups", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the HTTP API
    Daemon,
    /// Perform one backup now and print the result
    Run,
    /// Connect and authenticate against the console, then disconnect
    TestConnection,
    /// Send a test report through the configured channel
    TestNotify,
    /// Print the per-day history
    History {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Ask a running daemon for its status
    Status,
}

#[derive(Args, Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    log_json: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    backup_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    http_bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::AppConfig::load(&cli.config, Some(&cli.overrides))
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    logging::init(LogConfig {
        json: config.log_json,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Daemon => run_daemon(config).await.context("Daemon failed"),
        Commands::Run => run_once(config).await,
        Commands::TestConnection => test_connection(config).await,
        Commands::TestNotify => test_notify(config).await,
        Commands::History { limit } => print_history(config, limit).await,
        Commands::Status => print_status(config).await,
    }
}

async fn run_daemon(config: config::AppConfig) -> Result<()> {
    let addr = config.http_addr()?;
    let (ctx, scheduler) = AppContext::build(config)?;

    let job: Arc<dyn ScheduledJob> = ctx.runner.clone();
    let scheduler_task = scheduler.spawn(job);

    let shutdown = CancellationToken::new();
    let server = WebServer::new(ctx.clone(), addr, shutdown.clone());
    let server_task = tokio::spawn(async move { server.start().await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    ctx.scheduler.shutdown();
    shutdown.cancel();

    scheduler_task.await.context("Scheduler task panicked")?;
    server_task.await.context("HTTP task panicked")??;
    Ok(())
}

async fn run_once(config: config::AppConfig) -> Result<()> {
    let (ctx, _scheduler) = AppContext::build(config)?;
    let result = ctx.runner.run_now(TriggerOrigin::Manual).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.success {
        bail!("Backup failed: {}", result.message);
    }
    Ok(())
}

async fn test_connection(config: config::AppConfig) -> Result<()> {
    let (ctx, _scheduler) = AppContext::build(config)?;
    ctx.runner
        .test_connection()
        .await
        .context("SSH connection failed")?;
    println!("SSH connection successful");
    Ok(())
}

async fn test_notify(config: config::AppConfig) -> Result<()> {
    let (ctx, _scheduler) = AppContext::build(config)?;
    ctx.runner
        .test_notification()
        .await
        .context("Test notification failed")?;
    println!("Test notification sent");
    Ok(())
}

async fn print_history(config: config::AppConfig, limit: usize) -> Result<()> {
    let (ctx, _scheduler) = AppContext::build(config)?;
    for (date, record) in ctx.runner.history_entries(limit).await {
        let state = if record.success { "ok" } else { "FAILED" };
        let files = record.files.map(|f| f.join(", ")).unwrap_or_default();
        let message = record.message.unwrap_or_default();
        println!("{date}  {state:<6}  {files}  {message}");
    }
    Ok(())
}

async fn print_status(config: config::AppConfig) -> Result<()> {
    let client = ApiClient::new(config.http_addr()?);
    let status = client.status().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
