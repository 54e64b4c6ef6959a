//! `polly` — a scheduled poll orchestrator for chat platforms. Wires
//! the gateway connection, scheduler, reaction safeguard, startup
//! recovery sweep, and the external web interface (C16) around the
//! shared `polly-core` engine.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serenity::http::Http;
use serenity::model::gateway::GatewayIntents;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use polly_core::app::{GatewayHandler, Service};
use polly_core::chat::serenity_adapter::SerenityAdapter;
use polly_core::chat::ChatAdapter;
use polly_core::config::Config;
use polly_core::recovery::RecoveryDelays;

mod web;

#[derive(Parser)]
#[command(name = "polly", version, about = "Scheduled poll orchestrator for chat platforms")]
struct Cli {
    /// Path to the TOML config file. Falls back to POLLY_* env vars if absent.
    #[arg(short, long, env = "POLLY_CONFIG", default_value = "polly.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway connection, scheduler, safeguard, and web server.
    Serve,
    /// Run the startup recovery sweep once and print the resulting report.
    Recover,
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if path.exists() {
        Config::load(path).with_context(|| format!("loading config from {}", path.display()))
    } else {
        Config::from_env().context("building config from environment")
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    let http = Arc::new(Http::new(&config.bot_token));
    let chat: Arc<dyn ChatAdapter> = Arc::new(SerenityAdapter::new(http.clone()));
    let service = Service::new(&config, chat).await.context("initializing service")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Recover => {
            let report = service.run_recovery(RecoveryDelays::default()).await;
            info!(?report, "recovery sweep complete");
            println!("{report:#?}");
            Ok(())
        }
        Commands::Serve => serve(service, config, http).await,
    }
}

async fn serve(service: Arc<Service>, config: Config, http: Arc<Http>) -> Result<()> {
    let startup_report = service.run_recovery(RecoveryDelays::default()).await;
    info!(?startup_report, "startup recovery complete");

    let shutdown = CancellationToken::new();
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::DIRECT_MESSAGE_REACTIONS;

    let mut gateway_client = serenity::Client::builder(&config.bot_token, intents)
        .event_handler(GatewayHandler::new(service.clone()))
        .http(http)
        .await
        .context("building gateway client")?;

    let scheduler_service = service.clone();
    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move { scheduler_service.run_scheduler(scheduler_shutdown).await });

    let safeguard = service.safeguard(config.safeguard_interval_secs);
    let safeguard_shutdown = shutdown.clone();
    let safeguard_task = tokio::spawn(async move { safeguard.run(safeguard_shutdown).await });

    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway_client.start().await {
            error!(error = %e, "gateway client stopped with an error");
        }
    });

    let web_state = web::AppState::new(service.clone());
    let app = web::router(web_state).layer(tower_http::trace::TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding web interface to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "web interface listening");

    let web_shutdown = shutdown.clone();
    let web_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { web_shutdown.cancelled().await })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = gateway_task => {
            error!("gateway task exited unexpectedly");
        }
    }

    shutdown.cancel();
    let _ = scheduler_task.await;
    let _ = safeguard_task.await;
    let _ = web_task.await;

    Ok(())
}
