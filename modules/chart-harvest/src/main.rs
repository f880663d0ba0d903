use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chart_harvest::{AppConfig, HarvestJob, ListRequest, PageProfile, WebDriverSession};

#[derive(Parser)]
#[command(
    name = "chart-harvest",
    about = "Harvest complete ranked lists from virtualized chart pages"
)]
struct Cli {
    /// List ids or URLs. Falls back to HARVEST_LISTS.
    lists: Vec<String>,

    /// Entries to collect per list (default: the count the page advertises, else 50)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    target_count: Option<u32>,

    /// WebDriver endpoint, e.g. a running chromedriver
    #[arg(long)]
    webdriver_url: Option<String>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Write the JSON report here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chart_harvest=info,fantoccini=warn"));
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = AppConfig::from_env()?;
    if !cli.lists.is_empty() {
        config.lists = cli.lists;
    }
    if let Some(url) = cli.webdriver_url {
        config.webdriver_url = url;
    }
    if cli.target_count.is_some() {
        config.target_count = cli.target_count;
    }
    if cli.headed {
        config.headless = false;
    }
    if config.lists.is_empty() {
        bail!("No lists to harvest. Pass list ids/URLs or set HARVEST_LISTS");
    }
    config.log_summary();

    let requests: Vec<ListRequest> = config
        .lists
        .iter()
        .map(|reference| ListRequest::new(reference.as_str(), config.target_count))
        .collect();

    let session = WebDriverSession::start(&config).await?;
    let job = HarvestJob::new(PageProfile::spotify_playlist(), config.harvest.clone());
    let report = job.run_and_close(&session, &requests).await;

    let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            info!(path = %path.display(), "Report written");
        }
        None => println!("{json}"),
    }

    if report.failed_count() == report.lists.len() {
        bail!("Every list failed");
    }
    Ok(())
}
