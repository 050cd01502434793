mod atomic;
mod config;
mod cookies;
mod fetch;
mod history;
mod model;
mod monitor;
mod notify;
mod parser;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::fetch::HttpFetcher;
use crate::history::{HistoryStore, LoadOutcome};
use crate::model::Candidate;
use crate::monitor::Monitor;
use crate::notify::Notify;

#[derive(Parser)]
#[command(name = "invite_monitor", about = "Watch a profile page for new invite codes")]
struct Cli {
    /// Config file (json/toml/yaml); MONITOR_* env vars override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check now, then again every interval until Ctrl-C
    Run,
    /// Run a single monitoring pass
    Once,
    /// Look for codes in a saved page without touching history
    Scan {
        /// Saved HTML file
        file: Option<PathBuf>,
        /// Scan this text instead of a file
        #[arg(short, long, conflicts_with = "file")]
        text: Option<String>,
    },
    /// Show recorded invite codes
    History {
        /// Max rows to display (most recent)
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Import cookies and headers from a browser "copy as curl" command
    Cookies {
        /// File holding the curl command
        #[arg(short, long, default_value = "curl_command.txt")]
        file: PathBuf,
        /// The curl command itself (takes precedence over --file)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => {
            let settings = Settings::load(cli.config.as_deref())?;
            let interval = Duration::from_secs(settings.interval_minutes * 60);
            let mut monitor = build_monitor(&settings)?;
            println!(
                "Watching {} every {} min (history: {}, notify: {})",
                monitor.target_url,
                settings.interval_minutes,
                settings.history_path.display(),
                monitor.notifier.channel()
            );
            monitor.run_forever(interval).await;
            Ok(())
        }
        Commands::Once => {
            let settings = Settings::load(cli.config.as_deref())?;
            let mut monitor = build_monitor(&settings)?;
            let report = monitor.run_pass().await;
            if !report.fetched {
                println!("Page could not be fetched; nothing scanned.");
                return Ok(());
            }
            println!(
                "Scanned {} blocks ({} failed): {} accepted, {} new.",
                report.blocks, report.failed_blocks, report.accepted, report.new.len()
            );
            print_candidates(&report.new);
            Ok(())
        }
        Commands::Scan { file, text } => {
            let settings = Settings::load(cli.config.as_deref())?;
            let (input, origin) = match (file, text) {
                (_, Some(text)) => (text, settings.target_url()),
                (Some(path), None) => {
                    let html = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    (html, settings.target_url())
                }
                (None, None) => bail!("Give a file to scan or --text"),
            };

            let detector = settings.detection.detector();
            let blocks: Vec<_> = detector.blocks(&input, &origin).collect();
            let found: Vec<Candidate> = blocks.iter().flat_map(|b| detector.detect(b)).collect();
            println!("{} relevant blocks, {} candidates.", blocks.len(), found.len());
            print_candidates(&found);
            Ok(())
        }
        Commands::History { limit } => {
            let settings = Settings::load(cli.config.as_deref())?;
            let store = HistoryStore::load(&settings.history_path);
            if let LoadOutcome::Corrupt { reason } = store.outcome() {
                println!("History was unreadable and has been reset: {reason}");
            }
            let records = store
                .records()
                .with_context(|| format!("Failed to read {}", store.path().display()))?;
            if records.is_empty() {
                println!("No invite codes recorded yet.");
                return Ok(());
            }
            let skip = records.len().saturating_sub(limit);
            print_candidates(&records[skip..]);
            println!("\n{} shown of {} recorded ({} fingerprints)", records.len() - skip, records.len(), store.len());
            Ok(())
        }
        Commands::Cookies { file, command } => {
            let curl = if command.is_empty() {
                std::fs::read_to_string(&file).with_context(|| {
                    format!("No curl command given and {} is unreadable", file.display())
                })?
            } else {
                command.join(" ")
            };
            let imported = cookies::import(&curl)?;
            println!(
                "Found {} cookies, keeping {}.",
                imported.seen,
                imported.cookies.len()
            );
            for c in &imported.cookies {
                println!("  {}: {}", c.name, truncate(&c.value, 20));
            }
            if !imported.headers.is_empty() {
                let names: Vec<_> = imported.headers.keys().map(String::as_str).collect();
                println!("Headers: {}", names.join(", "));
            }
            let path = cli.config.unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG));
            cookies::update_config(&path, &imported)?;
            println!("Updated {}", path.display());
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn build_monitor(settings: &Settings) -> anyhow::Result<Monitor> {
    let fetcher = HttpFetcher::new(settings).context("Failed to build HTTP client")?;
    Ok(Monitor {
        target_url: settings.target_url(),
        detector: settings.detection.detector(),
        store: HistoryStore::load(&settings.history_path),
        fetcher: Box::new(fetcher),
        notifier: notify::from_settings(&settings.notify),
    })
}

fn print_candidates(found: &[Candidate]) {
    if found.is_empty() {
        return;
    }
    println!(
        "{:>3} | {:<16} | {:<7} | {:<19} | {:<24} | {}",
        "#", "Code", "Source", "Found", "From", "Context"
    );
    println!("{}", "-".repeat(110));
    for (i, c) in found.iter().enumerate() {
        println!(
            "{:>3} | {:<16} | {:<7} | {:<19} | {:<24} | {}",
            i + 1,
            truncate(&c.content, 16),
            c.source,
            c.discovered_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&c.note_title, 24),
            truncate(&c.context, 40)
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
