use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use repo_sentinel::digest::DigestBuilder;
use repo_sentinel::github::GitHubClient;
use repo_sentinel::model::RepoId;
use repo_sentinel::orchestrator::{CycleSummary, Orchestrator};
use repo_sentinel::report::{ReportRenderer, ReportSettings};
use repo_sentinel::store::{SqliteStore, SubscriptionStore};
use repo_sentinel::subscriptions::Registry;
use repo_sentinel::{ai, config, notify};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write an example config file
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Manage subscriptions
    #[command(subcommand)]
    Subscribe(SubscribeCommand),
    /// Run one update cycle over every subscription
    Update,
    /// Check a single repository and print its report
    Check {
        repo: String,
        /// Preview the last N days without recording or notifying, even for a
        /// subscribed repository. Omitted: a subscribed repository is checked from
        /// its last update and recorded; any other uses app.window_days.
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        days: Option<u32>,
        /// Also write the report to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show stored update history for a subscription
    History {
        repo: String,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Run update cycles every app.interval_minutes until Ctrl-C
    Start,
}

#[derive(Debug, Subcommand)]
enum SubscribeCommand {
    Add {
        repo: String,
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
    Remove {
        repo: String,
    },
    List,
}

struct App {
    cfg: config::Config,
    store: Arc<SqliteStore>,
    fetcher: Arc<GitHubClient>,
}

impl App {
    async fn open(cfg: config::Config) -> Result<Self> {
        cfg.ensure_dirs()?;
        let store = Arc::new(SqliteStore::open(&cfg.database_url()).await?);
        let fetcher = Arc::new(GitHubClient::from_config(&cfg.github)?);
        Ok(Self { cfg, store, fetcher })
    }

    fn registry(&self) -> Registry {
        Registry::new(self.store.clone(), self.fetcher.clone())
    }

    fn orchestrator(&self, window_days: u32) -> Result<Orchestrator> {
        let renderer = ReportRenderer::new(
            ai::from_config(&self.cfg.ai)?,
            ReportSettings::from_config(&self.cfg.ai),
        );
        let sinks = notify::sinks_from_config(&self.cfg.notification)?;
        Ok(Orchestrator::new(
            DigestBuilder::new(self.fetcher.clone()),
            renderer,
            self.store.clone(),
            sinks,
        )
        .with_window(chrono::Duration::days(i64::from(window_days)))
        .with_concurrency(self.cfg.app.concurrency))
    }
}

fn print_summary(summary: CycleSummary) {
    println!(
        "cycle finished: {} succeeded, {} failed, {} skipped",
        summary.succeeded, summary.failed, summary.skipped
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    if let Command::Init { force } = &args.command {
        if args.config.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", args.config.display());
        }
        std::fs::write(&args.config, config::example())
            .with_context(|| format!("failed to write {}", args.config.display()))?;
        println!("wrote {}", args.config.display());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let app = App::open(cfg).await?;

    match args.command {
        Command::Init { .. } => {}
        Command::Subscribe(SubscribeCommand::Add { repo, tags }) => {
            let sub = app.registry().subscribe(&repo, &tags).await?;
            println!("subscribed to {} (id {})", sub.repo, sub.id);
        }
        Command::Subscribe(SubscribeCommand::Remove { repo }) => {
            app.registry().unsubscribe(&repo).await?;
            println!("unsubscribed from {repo}");
        }
        Command::Subscribe(SubscribeCommand::List) => {
            let subs = app.registry().list().await?;
            if subs.is_empty() {
                println!("no subscriptions");
            }
            for sub in subs {
                let last = sub
                    .last_updated
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "never".into());
                let tags = if sub.tags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", sub.tags.join(", "))
                };
                println!("{}{} (last updated: {})", sub.repo, tags, last);
            }
        }
        Command::Update => {
            let orchestrator = app.orchestrator(app.cfg.app.window_days)?;
            let subs = app.store.list().await?;
            print_summary(orchestrator.run_cycle(&subs).await);
        }
        Command::Check { repo, days, output } => {
            let repo = RepoId::parse(&repo)?;
            let orchestrator = app.orchestrator(app.cfg.app.window_days)?;
            let lookback = days.map(|d| chrono::Duration::days(i64::from(d)));
            let report = orchestrator.run_single_with_lookback(&repo, lookback).await?;
            if let Some(path) = output {
                tokio::fs::write(&path, &report)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "report written");
            }
            println!("{report}");
        }
        Command::History { repo, limit } => {
            let records = app.registry().history(&repo, limit).await?;
            if records.is_empty() {
                println!("no history for {repo}");
            }
            for record in records {
                let u = &record.update;
                println!(
                    "#{} {} window {} → {}: {} commits, {} PRs, {} issues, {} releases",
                    record.id,
                    record.created_at.format("%Y-%m-%d %H:%M UTC"),
                    u.window_start.format("%Y-%m-%d %H:%M"),
                    u.window_end.format("%Y-%m-%d %H:%M"),
                    u.commits.len(),
                    u.pull_requests.len(),
                    u.issues.len(),
                    u.releases.len()
                );
            }
        }
        Command::Start => run_scheduled(&app).await?,
    }

    Ok(())
}

async fn run_scheduled(app: &App) -> Result<()> {
    let orchestrator = app.orchestrator(app.cfg.app.window_days)?;
    let interval = Duration::from_secs(app.cfg.app.interval_minutes * 60);
    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(?err, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown requested; finishing in-flight repositories");
        let _ = tx.send(true);
    });

    info!(interval_minutes = app.cfg.app.interval_minutes, "scheduler started");
    loop {
        let subs = match app.store.list().await {
            Ok(subs) => subs,
            Err(err) => {
                error!(%err, "failed to list subscriptions");
                Vec::new()
            }
        };
        print_summary(orchestrator.run_cycle_until(&subs, &rx).await);
        if *rx.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            Ok(()) = rx.changed() => break,
        }
    }
    info!("scheduler stopped");
    Ok(())
}
