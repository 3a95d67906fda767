use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use issuecache_core::{Config, RepoId};
use issuecache_github::GitHubClient;
use issuecache_store::SqliteStore;
use issuecache_sync::{
    progress_channel, ProgressPhase, RetryPolicy, SyncEngine, SyncEvent, SyncRequest,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "issuecache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Keep an offline mirror of GitHub issues and comments current")]
struct Cli {
    /// Ignore the stored watermark and run a full pass, pruning deleted issues
    #[arg(long)]
    full: bool,

    /// Configuration file (default: <config dir>/issuecache/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Repositories to sync as owner/name (default: the configured list)
    #[arg(value_name = "OWNER/NAME")]
    repos: Vec<RepoId>,
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Phase { repo, phase } => println!("{}: {}", repo, phase),
        SyncEvent::Progress(p) => {
            let what = match p.phase {
                ProgressPhase::Issues => "issues",
                ProgressPhase::Comments => "comment threads",
            };
            match p.total {
                Some(total) => println!("{}: {} {}/{}", p.repo, what, p.fetched, total),
                None => println!("{}: {} {}", p.repo, what, p.fetched),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    issuecache_core::init()?;

    let cli = Cli::parse();
    let (config, _) = Config::load_validated(cli.config.as_deref())?;

    let repos = if cli.repos.is_empty() {
        config.repository_ids()?
    } else {
        cli.repos
    };
    if repos.is_empty() {
        tracing::warn!("No repositories to sync");
        return Ok(());
    }

    let token = config.resolve_token()?;
    let client = GitHubClient::from_config(&config.github, token)?;

    let db_path = config.database_path()?;
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open cache at {}", db_path.display()))?,
    );
    let engine = Arc::new(
        SyncEngine::new(client, store)
            .with_retry_policy(RetryPolicy::from_config(&config.sync)),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received, cancelling sync");
                cancel.cancel();
            }
        });
    }

    let (progress, mut events) = progress_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    tracing::info!(repositories = repos.len(), full = cli.full, "issuecache sync started");
    let requests = repos
        .into_iter()
        .map(|repo| SyncRequest {
            repo,
            force_full: cli.full,
        })
        .collect::<Vec<_>>();
    let total = requests.len();
    let results = engine.sync_all(requests, &cancel, &progress).await;

    drop(progress);
    printer.await.context("Progress printer failed")?;

    let mut failures = 0;
    for (repo, result) in results {
        match result {
            Ok(report) => println!(
                "{}: {} sync done, {} issues ({} new, {} pruned, {} removed), {} comments",
                repo,
                report.mode,
                report.issues_fetched,
                report.issues_inserted,
                report.issues_pruned,
                report.issues_removed,
                report.comments_fetched
            ),
            Err(err) if err.is_cancelled() => {
                failures += 1;
                println!("{}: cancelled, partial progress kept", repo);
            }
            Err(err) => {
                failures += 1;
                eprintln!("{}: {} ({})", repo, err.user_message(), err);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} repositories did not sync", failures, total);
    }
    Ok(())
}
