use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use veille_cli::config::{Config, SearchMode};
use veille_cli::llm;
use veille_cli::orchestration::ArticlePipeline;
use veille_cli::search::{DuckDuckGoProvider, SearchTool};
use veille_cli::transport::{self, AppState, ServiceInfo};

#[derive(Parser)]
#[command(name = "veille")]
#[command(
    author,
    version = concat!(env!("CARGO_PKG_VERSION"), env!("VEILLE_VERSION_SUFFIX")),
    about = "Veille - search the web, synthesize, and stream a ready-to-publish article",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: platform config dir, veille/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// LLM provider to use (ollama, openai)
    #[arg(short, long, global = true)]
    provider: Option<String>,

    /// Model to use (e.g., aya-expanse:8b-q8_0, gpt-4o-mini)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Search mode (text, news)
    #[arg(long, global = true)]
    mode: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one article and stream it to stdout
    Generate {
        /// What to research
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Interactive session: type a query, get an article
    Chat,

    /// Start the HTTP server
    Serve {
        /// Port to listen on (default from config: 8501)
        #[arg(long)]
        port: Option<u16>,

        /// Host to bind to (default from config: 127.0.0.1)
        #[arg(long)]
        host: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

/// Load the config file and apply command-line overrides
fn load_config(cli: &Cli) -> Result<(Config, Option<PathBuf>)> {
    let path = cli.config.clone().or_else(Config::config_path);
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(provider) = &cli.provider {
        config.llm.provider = provider.clone();
    }
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if let Some(mode) = &cli.mode {
        config.search.mode = mode.parse::<SearchMode>()?;
    }

    config.validate()?;
    Ok((config, path))
}

fn build_pipeline(config: &Config) -> Result<Arc<ArticlePipeline>> {
    let provider = llm::create_provider(&config.llm)?;
    let search_provider = DuckDuckGoProvider::from_config(&config.search)
        .context("Failed to set up the web search client")?;
    let search = Arc::new(SearchTool::new(Arc::new(search_provider), &config.search));

    tracing::info!(
        "Search: {} mode, region {}, strategy {}",
        config.search.mode,
        config.search.region,
        config.pipeline.search_strategy.as_str()
    );
    Ok(Arc::new(ArticlePipeline::new(
        provider,
        search,
        &config.pipeline,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "veille_cli=debug,veille=debug"
    } else {
        "veille_cli=info,veille=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Configuration errors stop here, before any run
    let (config, config_path) = load_config(&cli)?;

    match cli.command {
        Commands::Generate { query } => {
            let pipeline = build_pipeline(&config)?;
            transport::cli::run_generate(pipeline, &query.join(" ")).await?;
        }
        Commands::Chat => {
            let pipeline = build_pipeline(&config)?;
            transport::cli::run_chat(pipeline).await?;
        }
        Commands::Serve { port, host } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let pipeline = build_pipeline(&config)?;
            let state = Arc::new(AppState::new(pipeline, ServiceInfo::from_config(&config)));

            tracing::info!("Starting HTTP server on {}:{}", host, port);
            transport::http::run_http_server(state, &host, port).await?;
        }
        Commands::Config => {
            transport::cli::run_config(&config, config_path.as_deref())?;
        }
    }

    Ok(())
}
