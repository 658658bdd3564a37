use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use background_service::{BackgroundService, BotContext};
use clap::Parser;
use database::Database;
use dealvote_core::{BotConfig, Forum};
use reddit_client::{RedditClient, RedditOAuth2Config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str =
    "dealvote=info,background_service=info,reddit_client=info,database=info";

/// Tallies deal feedback in a subreddit and keeps a stickied summary on
/// every post.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Opts {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "dealvote.toml")]
    config: PathBuf,

    /// Ledger location, overriding `bot.database_url`
    #[arg(long, env = "DEALVOTE_DATABASE_URL")]
    database_url: Option<String>,

    /// Run a single scan cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let opts = Opts::parse();
    info!("Starting dealvote");

    let mut config = BotConfig::load(&opts.config)
        .with_context(|| format!("loading {}", opts.config.display()))?;
    if let Some(url) = opts.database_url {
        config.bot.database_url = url;
    }

    let mut ledger = Database::new(config.bot.database_url.clone());
    ledger.connect().await.context("opening ledger")?;
    ledger
        .run_migrations()
        .await
        .context("migrating ledger")?;
    let ledger = Arc::new(ledger);

    let client = RedditClient::new(RedditOAuth2Config::from(&config.reddit))
        .context("building Reddit client")?;
    client.login().await.context("logging in to Reddit")?;

    let identity = match client.own_username().await {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "Could not confirm account name, using configured username");
            config.reddit.username.clone()
        }
    };
    info!(identity = %identity, subreddit = %config.bot.subreddit, "Logged in");

    let ctx = BotContext::new(Arc::new(client), ledger.clone(), &config, identity);
    let mut service = BackgroundService::new(ctx);

    tokio::select! {
        () = service.run(opts.once) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }

    ledger.close().await;
    info!("Stopped");
    Ok(())
}
