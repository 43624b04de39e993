//! Ping Bot Example
//!
//! Answers `!ping` with `pong`, repeats `!echo <text>` and logs every
//! message. A background loop reports the gateway latency once a minute.
//!
//! # Usage
//!
//! ```bash
//! GUILDED_TOKEN=... cargo run --package ping-bot
//! cargo run --package ping-bot -- --config ./guilder.toml --log-level debug
//! ```

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use guilder::prelude::*;
use guilder::runtime::config::LogLevel;

#[derive(Debug, Parser)]
#[command(name = "ping-bot", about = "A small ping/echo bot built on guilder")]
struct Args {
    /// Bot token; overrides `client.token` from the configuration.
    #[arg(long, env = "GUILDED_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Configuration file to load instead of searching for `guilder.toml`.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(long)]
    profile: Option<String>,

    /// Overrides `logging.level`.
    #[arg(long, value_parser = parse_level)]
    log_level: Option<LogLevel>,
}

fn parse_level(s: &str) -> Result<LogLevel, String> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(format!("unknown log level '{other}'")),
    }
}

// ============================================================================
// Handlers
// ============================================================================

fn is_own(client: &ClientHandle, message: &ChatMessage) -> bool {
    match (client.user(), &message.created_by) {
        (Some(me), Some(author)) => &me.id == author,
        _ => false,
    }
}

async fn log_message(event: EventContext<MessageEvent>) {
    let message = &event.message;
    info!(
        channel = %message.channel_id,
        author = message.created_by.as_deref().unwrap_or("webhook"),
        "{}",
        message.text()
    );
}

async fn ping(client: SessionRef<ClientHandle>, event: EventContext<MessageEvent>) -> ClientResult<()> {
    let message = &event.message;
    if is_own(&client, message) || message.text().trim() != "!ping" {
        return Ok(());
    }
    client.create_message(&message.channel_id, "pong").await?;
    Ok(())
}

async fn echo(client: SessionRef<ClientHandle>, event: EventContext<MessageEvent>) -> ClientResult<()> {
    let message = &event.message;
    if is_own(&client, message) {
        return Ok(());
    }
    if let Some(text) = message.text().strip_prefix("!echo ") {
        client.create_message(&message.channel_id, text).await?;
    }
    Ok(())
}

async fn announce(event: EventContext<ReadyEvent>) {
    info!(user = %event.user.name, id = %event.user.id, "Logged in");
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(profile) = &args.profile {
        loader = loader.profile(profile);
    }
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load().context("failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_from_config(&config.logging);

    let mut builder = Client::builder().config(config).matchers([
        on_message().name("log").handler(log_message),
        on_message().name("commands").handler(ping).handler(echo),
        on_ready().handler(announce),
    ]);
    if let Some(token) = args.token {
        builder = builder.token(token);
    }
    let client = builder.build()?;

    let handle = client.handle();
    let status = client
        .task_loop()
        .name("latency-report")
        .minutes(1.0)
        .build(move || {
            let handle = handle.clone();
            async move {
                match handle.latency() {
                    Some(latency) => info!(latency = ?latency, "Gateway latency"),
                    None => debug!("No heartbeat measured yet"),
                }
                Ok::<(), ClientError>(())
            }
        })?;
    status.start()?;

    let result = client.run().await;
    status.cancel();
    result.context("client stopped with an error")
}
