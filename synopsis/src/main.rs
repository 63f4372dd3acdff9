/*
synopsis - single-binary main.rs
Starts the Rocket HTTP server, or runs one of the maintenance commands.
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use common::init_db_pool;
use synopsis::auth::{self, Caller, TokenSigner};
use synopsis::llm::remote::RemoteSummarizer;
use synopsis::llm::ExternalSummarizer;
use synopsis::pipeline::{GenerationRequest, SummaryPipeline};
use synopsis::server::{self, AppState};
use synopsis::settings::{GenerationSettings, SettingsStore};

#[derive(Parser, Debug)]
#[command(name = "synopsis", about = "Summary generation service for content items")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Print an argon2 hash for a config user's password
    HashPassword { password: String },
    /// Summarize a local file with the pipeline, without touching the database
    Preview {
        /// File holding the content (markup allowed)
        file: PathBuf,
        /// Target length in words
        #[arg(long, default_value_t = 40)]
        length: i64,
        /// External summarizer base URL (":generateContent" is appended)
        #[arg(long)]
        api_url: Option<String>,
        /// Environment variable holding the external API key
        #[arg(long, default_value = "SYNOPSIS_API_KEY")]
        api_key_env: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(args.config).await,
        Command::HashPassword { password } => {
            println!("{}", auth::hash_password(&password)?);
            Ok(())
        }
        Command::Preview {
            file,
            length,
            api_url,
            api_key_env,
        } => preview(args.config, file, length, api_url, &api_key_env).await,
    }
}

async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    .context("failed to load configuration")?;
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path).await?;

    let db_path_abs = match tokio::fs::canonicalize(&config.database.path).await {
        Ok(p) => p.to_string_lossy().to_string(),
        Err(_) => config.database.path.clone(),
    };
    info!(db_path = %db_path_abs, "resolved DB path");

    let db_pool = init_db_pool(&db_path_abs).await.map_err(|e| {
        error!(%e, db_path = %db_path_abs, "failed to initialize database pool");
        e
    })?;

    if config.auto_migrate() {
        info!("Auto-migrate enabled: ensuring DB schema");
        common::ensure_schema(&db_pool).await?;
        common::sync_users(&config, &db_pool).await?;
        info!("Configuration users synchronized into database");
    }

    // First start seeds the default generation settings.
    SettingsStore::new(db_pool.clone())
        .initialize_defaults()
        .await
        .context("failed to initialize generation settings (is the schema in place?)")?;

    let signer = Arc::new(TokenSigner::from_config(&config.security));
    let external: Arc<dyn ExternalSummarizer> =
        Arc::new(RemoteSummarizer::from_config(&config.summarizer));
    let state = AppState::new(db_pool, Some(Arc::new(config)), signer, external);

    info!("Launching Rocket HTTP server");
    if let Err(e) = server::launch_rocket(state).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn preview(
    config_path: Option<PathBuf>,
    file: PathBuf,
    length: i64,
    api_url: Option<String>,
    api_key_env: &str,
) -> Result<()> {
    let summarizer_config = match load_config(config_path).await {
        Ok(cfg) => cfg.summarizer,
        Err(e) => {
            info!("no usable configuration ({}), using summarizer defaults", e);
            Default::default()
        }
    };

    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let settings = GenerationSettings {
        summary_length: length,
        external_api_key: std::env::var(api_key_env).unwrap_or_default(),
        external_api_url: api_url.unwrap_or_default(),
    };
    if !settings.external_api_url.is_empty() && settings.external_api_key.is_empty() {
        info!(env = api_key_env, "API key env var not set; using local truncation only");
    }

    let pipeline = SummaryPipeline::new(Arc::new(RemoteSummarizer::from_config(&summarizer_config)));
    let request = GenerationRequest {
        content_item_id: 0,
        caller: Caller::anonymous(),
        anti_forgery_token: String::new(),
        supplied_content: None,
    };

    let summary = pipeline.generate(&request, &settings, &content).await?;
    println!("{}", summary);
    Ok(())
}
