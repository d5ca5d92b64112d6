use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use gitwatch_cache::{KeyValueStore, MemoryStore, SqliteStore};
use gitwatch_core::{
    CheckSummary, Config, Orchestrator, Platform, RefreshSummary, StatusReport, WatchEntry,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod sink;

use sink::{EventFormat, StdoutSink};

#[derive(Parser)]
#[command(name = "gitwatch")]
#[command(version, about = "Watch GitHub, GitLab and CNB for new commits and releases", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/gitwatch/config.toml)
    #[arg(short, long, global = true, env = "GITWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    json: bool,

    /// Keep state in memory only; nothing is persisted
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run one check cycle now
    Check,
    /// Check periodically until interrupted
    Run,
    /// Re-list every watched group
    Refresh,
    /// Show configuration, cache and last-cycle state
    Status,
    /// List configured watches
    List,
    /// Show which providers are enabled
    Providers,
    /// Forget stored cursors so targets re-seed on the next check
    Reset {
        /// Only this provider (github, gitlab, cnb)
        #[arg(long)]
        provider: Option<Platform>,
        /// Only this repository (owner/repo)
        #[arg(long)]
        repo: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays clean
    let default_filter = if cli.verbose { "gitwatch=debug" } else { "gitwatch=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load(cli.config.as_deref()).context("loading config")?;

    let store: Arc<dyn KeyValueStore> = if cli.ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let path = config.state_path()?;
        Arc::new(
            SqliteStore::open(&path)
                .with_context(|| format!("opening state store at {}", path.display()))?,
        )
    };

    let format = if cli.json {
        EventFormat::JsonLines
    } else {
        EventFormat::Text
    };
    let orchestrator = Orchestrator::from_config(config, store, Arc::new(StdoutSink::new(format)))?;

    match cli.command {
        Commands::Check => {
            let summary = orchestrator.check_now().await;
            emit(cli.json, &summary, print_summary)?;
        }
        Commands::Run => {
            if !orchestrator.config().auto_check {
                anyhow::bail!(
                    "auto_check is off in the config; set auto_check = true or use `gitwatch check`"
                );
            }
            orchestrator
                .run_periodic(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Could not listen for Ctrl+C: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
        Commands::Refresh => {
            let summary = orchestrator.refresh_groups().await;
            emit(cli.json, &summary, print_refresh)?;
        }
        Commands::Status => {
            let report = orchestrator.status().await;
            emit(cli.json, &report, print_status)?;
        }
        Commands::List => {
            let watches = orchestrator.list_watches().await;
            emit(cli.json, &watches, |w| print_watches(w))?;
        }
        Commands::Providers => {
            let providers = orchestrator.providers();
            emit(cli.json, &providers, |providers| {
                for p in providers {
                    let state = if p.enabled { "enabled" } else { "disabled" };
                    let token = if p.has_token { "token" } else { "anonymous" };
                    if p.enabled {
                        println!("{:<8} {:<9} {:<10} {}", p.platform, state, token, p.api_url);
                    } else {
                        println!("{:<8} {}", p.platform, state);
                    }
                }
            })?;
        }
        Commands::Reset { provider, repo } => {
            let removed = orchestrator.reset(provider, repo.as_deref()).await?;
            emit(cli.json, &serde_json::json!({ "removed": removed }), |_| {
                println!("Removed {} stored cursor(s)", removed);
            })?;
        }
    }

    Ok(())
}

fn emit<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce(&T)) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_summary(summary: &CheckSummary) {
    let elapsed = summary.finished_at - summary.started_at;
    println!(
        "Checked {} target(s) in {:.1}s: {} new, {} failed",
        summary.results.len() + summary.failures.len(),
        elapsed.num_milliseconds() as f64 / 1000.0,
        summary.total_new(),
        summary.failures.len()
    );

    for result in summary.results.iter().filter(|r| r.new_items > 0) {
        println!("  {:<50} +{}", result.target.to_string(), result.new_items);
    }
    for failure in &summary.failures {
        println!("  {:<50} {} ({})", failure.target, failure.kind, failure.message);
    }
    for skipped in &summary.skipped {
        println!("  {:<50} skipped, provider disabled", skipped);
    }
    if summary.delivery_failures > 0 {
        println!("  {} notification(s) could not be delivered", summary.delivery_failures);
    }
}

fn print_refresh(summary: &RefreshSummary) {
    for group in &summary.groups {
        match &group.error {
            None => println!("{:<40} {} repo(s)", group.group, group.repos),
            Some(failure) => println!(
                "{:<40} failed ({}), keeping {} known repo(s)",
                group.group, failure.kind, group.repos
            ),
        }
    }
    for skipped in &summary.skipped {
        println!("{:<40} skipped, provider disabled", skipped);
    }
    if summary.groups.is_empty() && summary.skipped.is_empty() {
        println!("No groups configured");
    }
}

fn print_status(report: &StatusReport) {
    let auto = if report.auto_check { "on" } else { "off" };
    println!("Auto check:     {} (every {}s)", auto, report.check_interval);
    println!("First push:     {}", report.first_push);
    println!(
        "Watches:        {} repo(s), {} group(s)",
        report.watched_repos, report.watched_groups
    );
    println!("Tracked:        {} target(s)", report.tracked_targets);

    let enabled: Vec<String> = report
        .providers
        .iter()
        .filter(|p| p.enabled)
        .map(|p| p.platform.to_string())
        .collect();
    println!("Providers:      {}", enabled.join(", "));

    for group in &report.cached_groups {
        println!(
            "Group cache:    {}:{} {} repo(s) at {}",
            group.platform.as_str(),
            group.group,
            group.repo_count,
            group.fetched_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    for throttle in &report.throttled {
        println!(
            "Rate limited:   {} for another {}s",
            throttle.platform, throttle.remaining_secs
        );
    }
    match &report.last_cycle {
        Some(cycle) => println!(
            "Last cycle:     {} ({} target(s), {} new, {} failed)",
            cycle.finished_at.format("%Y-%m-%d %H:%M:%S"),
            cycle.targets,
            cycle.new_items,
            cycle.failures
        ),
        None => println!("Last cycle:     never (in this process)"),
    }
}

fn print_watches(watches: &[WatchEntry]) {
    if watches.is_empty() {
        println!("No watches configured");
        return;
    }

    for w in watches {
        let branch = if w.branch.is_empty() {
            "(default)"
        } else {
            w.branch.as_str()
        };
        let mut line = format!(
            "{:<6} {:<7} {:<40} {:<10} {:<9}",
            format!("{:?}", w.kind).to_lowercase(),
            w.provider.as_str(),
            w.name,
            branch,
            w.watch_type
        );
        if let Some(count) = w.resolved_repos {
            line.push_str(&format!(" {} repo(s)", count));
        }
        if !w.active {
            line.push_str(" [inactive]");
        }
        if !w.note.is_empty() {
            line.push_str(&format!(" # {}", w.note));
        }
        println!("{}", line);
    }
}
