use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use research_pipeline::config::{ConfigManager, FileConfigManager};
use research_pipeline::output::{default_report_path, write_report, OutputFormat};
use research_pipeline::{Query, ResearchOrchestrator, RunStatus};

/// Search the web for a question, read the sources and write a cited synthesis.
#[derive(Parser, Debug)]
#[command(name = "research-pipeline", version, about)]
struct Cli {
    /// The research question
    query: String,

    #[arg(short, long, env = "RESEARCH_CONFIG", default_value = "research.toml")]
    config: PathBuf,

    /// Number of search results to scrape
    #[arg(long)]
    max_sources: Option<usize>,

    /// Two-letter language code for search region and answer language
    #[arg(long)]
    language: Option<String>,

    /// Report format; defaults to `output.format` from the config
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Report path; defaults to a file in `output.directory`
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // keys may live in a .env next to the binary or the working directory
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config_manager = FileConfigManager::new(cli.config.clone());
    let config = config_manager
        .load_config()
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("loading {}", cli.config.display()))?;

    tracing::info!("Starting research pipeline");

    let orchestrator = ResearchOrchestrator::from_config(&config)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("building pipeline")?;

    let mut query = Query::new(cli.query);
    if let Some(max_sources) = cli.max_sources {
        query = query.with_max_sources(max_sources);
    }
    if let Some(language) = cli.language {
        query = query.with_language(language);
    }

    let result = orchestrator.run(query).await;
    orchestrator.shutdown().await;

    let format = cli.format.unwrap_or(config.output.format);
    let path = cli
        .output
        .unwrap_or_else(|| default_report_path(&config.output.directory, &result, format));
    write_report(&result, format, &path)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("writing report")?;

    match result.status {
        RunStatus::Completed => {
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        RunStatus::Failed(ref kind) => {
            eprintln!("Research run failed: {}", kind);
            eprintln!("Partial report written to {}", path.display());
            Ok(ExitCode::from(2))
        }
    }
}
