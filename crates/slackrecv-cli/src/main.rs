use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use slackrecv_core::HandlerSettings;
use slackrecv_relay::{EventRelay, LoopExit, find_channel_id};
use slackrecv_slack::{SlackApi, SlackGateway};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod handlers;

use config::SlackrecvConfig;

#[derive(Parser)]
#[command(name = "slackrecv")]
#[command(version)]
#[command(about = "Relay Slack messages into workflow handlers")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until Ctrl+C or every handler has stopped
    Run,

    /// List the channels a handler's token can see
    Channels {
        /// Handler name from the config file
        #[arg(long)]
        handler: String,
    },

    /// Write a default config file
    Init,

    /// Show current configuration (tokens masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Run => cmd_run(&cli.config).await,
        Commands::Channels { handler } => cmd_channels(&cli.config, &handler).await,
    }
}

fn build_gateway(cfg: &SlackrecvConfig) -> Result<SlackGateway> {
    let api = SlackApi::with_base(&cfg.slack.api_base)?;
    Ok(SlackGateway::with_api(api)
        .with_reconnect(cfg.slack.reconnect_policy())
        .with_ping_interval(cfg.slack.ping_interval()))
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let default_config = include_str!("../../../config/default.toml");
    tokio::fs::write(&config_path, default_config).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600)).await?;
    }

    info!("Created default config at {}", config_path.display());
    println!("Edit {} to configure your handlers.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SlackrecvConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg.masked())?);
    Ok(())
}

async fn cmd_run(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SlackrecvConfig::load(config_path)?;
    if cfg.handlers.is_empty() {
        return Err(anyhow!("No handlers configured"));
    }

    let gateway = build_gateway(&cfg)?;
    let handlers = handlers::build_handlers(&cfg.handlers)?;
    let relay = Arc::new(EventRelay::with_options(
        Arc::new(gateway),
        handlers,
        cfg.relay.clone(),
    ));

    let started = relay.start().await?;
    if started == 0 {
        return Err(anyhow!("None of the {} handlers could be started", cfg.handlers.len()));
    }

    let mut waiter = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move { relay.wait().await })
    };

    let reports = tokio::select! {
        reports = &mut waiter => reports?,
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            relay.stop();
            waiter.await?
        }
    };

    for report in &reports {
        let outcome = &report.outcome;
        if outcome.exit == LoopExit::InvalidAuth {
            warn!("Handler '{}' stopped: token rejected", report.handler);
        }
        println!(
            "{}: {} ({} dispatched, {} failed)",
            report.handler, outcome.exit, outcome.dispatched, outcome.failed
        );
    }

    println!("slackrecv stopped.");
    Ok(())
}

async fn cmd_channels(config_path: &Option<PathBuf>, name: &str) -> Result<()> {
    let cfg = SlackrecvConfig::load(config_path)?;
    let handler_cfg = cfg
        .handler(name)
        .ok_or_else(|| anyhow!("No handler named '{}' in config", name))?;

    let handler = handlers::ConfiguredHandler::from_config(handler_cfg)?;
    let settings = HandlerSettings::from_handler(&handler)?;

    let api = SlackApi::with_base(&cfg.slack.api_base)?;
    let channels = api
        .list_channels(&settings.access_token)
        .await
        .context("Failed to list channels")?;

    for ch in &channels {
        println!("{}\t#{}", ch.id, ch.name);
    }

    if let Some(wanted) = &settings.channel {
        match find_channel_id(&channels, wanted) {
            Some(id) => println!("\nFilter #{} resolves to {}", wanted, id),
            None => println!("\nFilter #{} does not match any channel; the handler will receive nothing", wanted),
        }
    }
    Ok(())
}
