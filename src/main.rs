use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod models;
mod remote;
mod services;
mod sync;
mod traits;

#[cfg(test)]
mod testing;

use config::Config;
use db::Repository;
use error::{AppError, Result};
use remote::BoardClient;
use services::{HtmlSanitizer, HttpTransport};
use sync::{DownloadExecutor, Scheduler, SyncEngine, SyncSettings};
use traits::{DownloadLedger, EntityStore};

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    config_path: Option<PathBuf>,
    once: bool,
    stats: bool,
}

impl CliArgs {
    /// `args[0]` is the program name.
    fn parse(args: &[String]) -> Result<Self> {
        let mut cli = CliArgs::default();
        let mut rest = args.iter().skip(1);
        while let Some(arg) = rest.next() {
            match arg.as_str() {
                "--config" => match rest.next() {
                    Some(path) if !path.starts_with("--") => {
                        cli.config_path = Some(PathBuf::from(path))
                    }
                    _ => return Err(AppError::Config("--config needs a file path".into())),
                },
                "--once" => cli.once = true,
                "--stats" => cli.stats = true,
                _ => {}
            }
        }
        Ok(cli)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let CliArgs {
        config_path,
        once,
        stats,
    } = CliArgs::parse(&args)?;

    let config = Config::load(config_path.as_deref())?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let repo = Arc::new(Repository::new(&config.db_path).await?);

    if stats {
        print_stats(&repo).await?;
        return Ok(());
    }

    let boards = config.boards()?;
    let fetcher = Arc::new(BoardClient::new(&config)?);
    let mut engine = SyncEngine::new(
        fetcher,
        Arc::new(HtmlSanitizer::new()),
        Arc::new(repo.live()),
        Arc::new(repo.dead()),
        SyncSettings::from_config(&config),
    );

    if config.download_files {
        let transport = HttpTransport::new(&config)?;
        engine = engine.with_downloads(DownloadExecutor::new(
            Arc::new(transport),
            repo.clone(),
            &config.files_dir,
            config.base_url()?,
            config.download_workers,
            config.request_timeout(),
        ));
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    info!(
        boards = ?config.boards,
        db = %config.db_path,
        "Starting board archiver"
    );

    if once {
        for board in &boards {
            if cancel.is_cancelled() {
                break;
            }
            engine.run_cycle(board, &cancel).await.log_summary();
        }
    } else {
        Scheduler::new(config.poll_interval(), config.poll_fallback())
            .run(&engine, &boards, &cancel)
            .await;
    }

    Ok(())
}

async fn print_stats(repo: &Repository) -> Result<()> {
    let live = repo.live().counts().await?;
    let dead = repo.dead().counts().await?;
    println!("live: {} threads, {} posts", live.threads, live.posts);
    println!("dead: {} threads, {} posts", dead.threads, dead.posts);
    println!("files: {}", repo.recorded_count().await?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, finishing current work..."),
            _ = sigterm.recv() => info!("Received SIGTERM, finishing current work..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, finishing current work...");
    }
}
