// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ember_core::{InMemoryBus, OutboundKind};
use ember_model::{AuthStyle, ModelProvider, OpenAiCompatProvider};
use ember_runtime::{AgentInstanceFactory, Dispatcher, InboundMessage};
use ember_tools::ToolRegistry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use cli::{Cli, Commands};

/// Default API base for known provider ids; anything else must set
/// `model.base_url` explicitly (e.g. a local llama.cpp/vLLM server).
fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        _ => "http://localhost:11434/v1",
    }
}

fn provider_key(provider: &str, name: &str) -> String {
    format!("{provider}:{name}")
}

fn build_provider(provider: &str, name: &str, api_key_env: Option<&str>, base_url: Option<&str>) -> Arc<dyn ModelProvider> {
    let api_key = api_key_env.and_then(|v| std::env::var(v).ok());
    let base_url = base_url.map(str::to_string).unwrap_or_else(|| default_base_url(provider).to_string());
    let auth_style = if api_key.is_some() { AuthStyle::Bearer } else { AuthStyle::None };
    Arc::new(OpenAiCompatProvider::new(provider.to_string(), name.to_string(), api_key, &base_url, auth_style))
}

/// Build the `<provider>:<name>` catalog for the primary model plus every
/// configured fallback, so both the factory and the `/switch model` command
/// can resolve by key.
fn build_catalog(config: &ember_config::Config) -> HashMap<String, Arc<dyn ModelProvider>> {
    let mut catalog: HashMap<String, Arc<dyn ModelProvider>> = HashMap::new();
    catalog.insert(
        provider_key(&config.model.provider, &config.model.name),
        build_provider(&config.model.provider, &config.model.name, config.model.api_key_env.as_deref(), config.model.base_url.as_deref()),
    );
    for fb in &config.model.fallbacks {
        catalog
            .entry(provider_key(&fb.provider, &fb.name))
            .or_insert_with(|| build_provider(&fb.provider, &fb.name, config.model.api_key_env.as_deref(), config.model.base_url.as_deref()));
    }
    catalog
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Drain currently-buffered bus messages and print replies/errors to stdout,
/// ignoring status lifecycle (already suppressed for the internal `cli` channel).
async fn drain_and_print(rx: &mut tokio::sync::broadcast::Receiver<ember_core::OutboundMessage>) {
    loop {
        match rx.try_recv() {
            Ok(msg) => match msg.kind {
                OutboundKind::Reply => println!("{}", msg.content),
                OutboundKind::Error => eprintln!("error: {}", msg.content),
                _ => {}
            },
            Err(_) => break,
        }
    }
}

async fn run_one_shot(dispatcher: Arc<Dispatcher>, bus: Arc<InMemoryBus>, channel: &str, session: &str, prompt: String) {
    let mut rx = bus.subscribe();
    dispatcher
        .process_one(InboundMessage {
            channel: channel.to_string(),
            sender_id: "local".to_string(),
            chat_id: session.to_string(),
            content: prompt,
            ..Default::default()
        })
        .await;
    drain_and_print(&mut rx).await;
}

async fn run_repl(dispatcher: Arc<Dispatcher>, bus: Arc<InMemoryBus>, channel: &str, session: &str) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut rx = bus.subscribe();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        dispatcher
            .process_one(InboundMessage {
                channel: channel.to_string(),
                sender_id: "local".to_string(),
                chat_id: session.to_string(),
                content: line,
                ..Default::default()
            })
            .await;
        drain_and_print(&mut rx).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    let config = ember_config::load(cli.config.as_deref()).context("loading configuration")?;

    if matches!(cli.command, Some(Commands::ShowConfig)) {
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let workspace = match cli.workspace {
        Some(w) => w,
        None => std::env::current_dir().context("resolving current directory")?,
    };

    debug!(?workspace, provider = %config.model.provider, model = %config.model.name, "starting ember");

    let catalog = build_catalog(&config);
    let tools = ToolRegistry::new();
    let bus = Arc::new(InMemoryBus::new(256));

    let factory = AgentInstanceFactory::new(catalog.clone());
    let instance = factory
        .build(config, &workspace, tools, bus.clone())
        .map_err(anyhow::Error::msg)
        .context("building agent instance")?;

    let dispatcher = Arc::new(Dispatcher::new(instance, catalog, vec!["cli".to_string()]));
    let session = cli.session.unwrap_or_else(|| "default".to_string());

    match cli.prompt {
        Some(prompt) => run_one_shot(dispatcher, bus, "cli", &session, prompt).await,
        None => run_repl(dispatcher, bus, "cli", &session).await?,
    }

    Ok(())
}
