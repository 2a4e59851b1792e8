use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod error;
mod gemini;
mod probe;

use probe::{ApiProbe, ProbeConfig, RunOptions, Selection};

#[derive(Parser, Debug)]
#[command(name = "gemini-probe")]
#[command(about = "Conformance checks for Gemini-compatible API endpoints")]
#[command(version)]
struct Cli {
    /// Base URL of the API server
    #[arg(long, env = "GEMINI_PROBE_BASE_URL", default_value = "http://localhost:8000")]
    base_url: String,

    /// API key, sent as x-goog-api-key and as a bearer token
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Which check to run
    #[arg(long = "test", value_enum, default_value_t = Selection::Stream)]
    test: Selection,

    /// Model identifier used by generation and token checks
    #[arg(long, default_value = gemini::DEFAULT_MODEL)]
    model: String,

    /// Route prefix to try, in order (repeatable; "" or "/" for the direct route)
    #[arg(long = "prefix")]
    prefixes: Vec<String>,

    /// Append ?alt=sse to streaming requests
    #[arg(long)]
    alt_sse: bool,

    /// Seconds allowed for a generation call (per chunk when streaming)
    #[arg(long, default_value_t = 60)]
    generation_timeout: u64,

    /// Image file for the image check instead of the built-in pixel
    #[arg(long)]
    image: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run in quiet mode
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("Starting gemini-probe v{}", env!("CARGO_PKG_VERSION"));

    let config = ProbeConfig::new(&cli.base_url, cli.api_key)
        .with_prefixes(&cli.prefixes)
        .with_alt_sse(cli.alt_sse)
        .with_generation_timeout(Duration::from_secs(cli.generation_timeout));

    let image = cli
        .image
        .as_deref()
        .map(gemini::models::load_image)
        .transpose()?;

    let probe = ApiProbe::new(config)?;
    let options = RunOptions {
        model: cli.model,
        image,
    };

    let summary = probe::run(&probe, cli.test, &options).await;
    info!(
        "Finished: {}/{} checks passed",
        summary.passed(),
        summary.total()
    );

    Ok(())
}
