//! qs-gateway: QuoteSnap main binary
//!
//! Wires the item store, Gmail mailbox, extraction service, monitoring
//! scheduler and HTTP API together.
//!
//! Usage:
//!   qs-gateway           - Start server mode (HTTP API + email monitoring)
//!   qs-gateway --once    - Run a single ingestion cycle and print its report
//!   qs-gateway --help    - Show help

use std::sync::Arc;
use std::time::Duration;

use qs_api::AppState;
use qs_core::{
    Config, CsvQuotationRenderer, Database, ItemStore, LlmExtractor, QueryService, ReprocessQueue,
};
use qs_email::GmailClient;
use qs_schedule::{CycleRunner, IngestionPipeline, MonitoringScheduler, PipelineSettings};
use tracing_subscriber::EnvFilter;

/// Run mode
enum RunMode {
    /// Server mode (HTTP API + email monitoring)
    Server,
    /// One ingestion cycle, then exit
    Once,
    /// Show help
    Help,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_args();

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("qs-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting qs-gateway...");
    tracing::info!("Extraction model: {}", config.extraction.model);

    let services = Services::build(&config)?;

    match mode {
        RunMode::Once => run_once(services).await,
        RunMode::Server => run_server(config, services).await,
        _ => Ok(()),
    }
}

/// Parse command line arguments
fn parse_args() -> RunMode {
    let args: Vec<String> = std::env::args().collect();

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--once" | "-1" => return RunMode::Once,
            "--help" | "-h" => return RunMode::Help,
            "--version" | "-v" => return RunMode::Version,
            _ => {}
        }
    }

    RunMode::Server
}

/// Print help message
fn print_help() {
    println!("qs-gateway - QuoteSnap email ingestion and quotation service");
    println!();
    println!("Usage:");
    println!("  qs-gateway           Start server mode (HTTP API + email monitoring)");
    println!("  qs-gateway --once    Run one ingestion cycle and print the report");
    println!("  qs-gateway --help    Show this help message");
    println!("  qs-gateway --version Show version");
    println!();
    println!("Configuration is read from qs-gateway.toml when present, then from");
    println!("environment variables:");
    println!("  LLM_API_KEY            Extraction API key (required)");
    println!("  LLM_PROVIDER           Provider: claude or openai (default: claude)");
    println!("  LLM_MODEL              Model name (default: claude-sonnet-4-20250514)");
    println!("  LLM_BASE_URL           Custom API endpoint");
    println!("  GMAIL_CLIENT_ID        OAuth client id");
    println!("  GMAIL_CLIENT_SECRET    OAuth client secret");
    println!("  GMAIL_REDIRECT_URI     OAuth redirect (default: http://localhost:5000/api/auth/callback)");
    println!("  DATABASE_PATH          SQLite file (default: data/quotesnap.db)");
    println!("  EMAIL_CHECK_INTERVAL   Seconds between cycles (default: 30)");
    println!("  MAX_EMAILS_PER_CHECK   Messages per cycle (default: 50)");
    println!("  API_PORT               HTTP API port (default: 5000)");
    println!("  API_KEY                Bearer key for mutating endpoints (optional)");
    println!("  FRONTEND_URL           Where OAuth redirects land (default: http://localhost:3000)");
}

/// Long-lived components shared by both run modes
struct Services {
    store: ItemStore,
    queue: ReprocessQueue,
    mailbox: Arc<GmailClient>,
    pipeline: Arc<IngestionPipeline>,
}

impl Services {
    fn build(config: &Config) -> anyhow::Result<Self> {
        let db = Database::open(&config.store.db_path)
            .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
        let store = ItemStore::new(db.clone());
        let queue = ReprocessQueue::new(db);

        let mailbox = Arc::new(
            GmailClient::new(config.mailbox.clone())
                .map_err(|e| anyhow::anyhow!("Failed to create mailbox client: {}", e))?,
        );
        let extractor = Arc::new(
            LlmExtractor::new(&config.extraction)
                .map_err(|e| anyhow::anyhow!("Failed to create extraction client: {}", e))?,
        );

        let pipeline = Arc::new(IngestionPipeline::new(
            store.clone(),
            queue.clone(),
            mailbox.clone(),
            extractor,
            PipelineSettings::from_config(config),
        ));

        Ok(Self {
            store,
            queue,
            mailbox,
            pipeline,
        })
    }
}

/// Run a single cycle against the configured mailbox
async fn run_once(services: Services) -> anyhow::Result<()> {
    use qs_email::MailboxClient;

    if !services.mailbox.is_authenticated().await {
        anyhow::bail!("Mailbox is not authenticated; log in through the API first");
    }

    let report = services.pipeline.run_cycle().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run server mode (HTTP API + email monitoring)
async fn run_server(config: Config, services: Services) -> anyhow::Result<()> {
    let Services {
        store,
        queue,
        mailbox,
        pipeline,
    } = services;

    let scheduler = Arc::new(MonitoringScheduler::new(
        pipeline,
        mailbox,
        store.clone(),
        Duration::from_secs(config.monitor.interval_secs),
    ));

    if config.monitor.autostart {
        match scheduler.start_if_authenticated().await {
            Ok(true) => tracing::info!("Email monitoring started automatically"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Could not start email monitoring: {}", e),
        }
    } else {
        tracing::info!("Email monitoring autostart disabled");
    }

    let query = QueryService::new(store, Arc::new(CsvQuotationRenderer));
    let state = AppState::new(query, queue, Arc::clone(&scheduler), config.api.clone());

    tracing::info!("qs-gateway initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    qs_api::start_server(state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("Shutting down...");
    })
    .await?;

    // Let an in-flight cycle finish before the process exits
    scheduler.stop().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
