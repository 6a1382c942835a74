//! Nexum CLI — serve a controller or call remote objects from the shell.

mod cli;
mod config;
mod objects;

use crate::cli::{Cli, Commands, Target};
use anyhow::{bail, Context};
use clap::Parser;
use nexum_client::Client;
use nexum_controller::{Controller, ServiceObject};
use nexum_types::ClientConfig;
use nexum_wire::NamedArgs;
use rand::RngCore;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => serve(cli.config.as_deref()).await,
        Commands::Call {
            object,
            method,
            args,
            named,
            target,
        } => call(target, object, method, args, named).await,
        Commands::Objects { target } => objects_cmd(target).await,
    }
}

async fn serve(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let mut config = config::load_controller_config(config_path);
    if config.secret.is_empty() {
        let mut bytes = [0u8; 20];
        rand::thread_rng().fill_bytes(&mut bytes);
        config.secret = hex::encode(bytes);
        info!(secret = %config.secret, "No secret configured, generated one");
    }

    let controller = Controller::new(config).context("invalid controller configuration")?;
    controller
        .register([(
            "kv".to_string(),
            Arc::new(objects::KvStore::new()) as Arc<dyn ServiceObject>,
        )])
        .context("failed to register built-in objects")?;

    let addr = controller.start().await.context("failed to bind listener")?;
    info!(%addr, "Serving; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    controller.stop().await;
    info!("Stopped");
    Ok(())
}

async fn connect(target: &Target) -> anyhow::Result<Client> {
    let client = Client::new(ClientConfig {
        host: target.host.clone(),
        port: target.port,
        ..ClientConfig::default()
    });
    if let Some(secret) = &target.secret {
        if !client.authenticate(secret.clone()).await {
            bail!("authentication failed");
        }
    }
    Ok(client)
}

async fn call(
    target: Target,
    object: String,
    method: String,
    args: Option<String>,
    named: Option<String>,
) -> anyhow::Result<()> {
    let args = match args {
        Some(text) => match serde_json::from_str::<Value>(&text)
            .context("positional arguments must be valid JSON")?
        {
            Value::Array(values) => values,
            other => vec![other],
        },
        None => vec![],
    };
    let named: NamedArgs = match named {
        Some(text) => {
            serde_json::from_str(&text).context("named arguments must be a JSON object")?
        }
        None => NamedArgs::new(),
    };

    let client = connect(&target).await?;
    let value = client.call(object, method, args, named).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn objects_cmd(target: Target) -> anyhow::Result<()> {
    let client = connect(&target).await?;
    for name in client.registered_objects().await? {
        println!("{name}");
    }
    Ok(())
}
