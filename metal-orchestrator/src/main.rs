use anyhow::{Context, Result};
use metal_orchestrator::command::{self, Command, Environment};
use metal_orchestrator::runner_spec::ScriptUserData;
use metal_orchestrator::{Config, MetalController};
use metal_providers::equinix::EquinixClient;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    // stdout carries the command result, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let env = Environment::from_env()?;
    let config = Config::load(&env.config_file)?;
    let client = EquinixClient::new(&config.api_url, &config.auth_token)?;
    let controller = MetalController::new(
        Arc::new(client),
        config,
        env.controller_id.clone(),
        Arc::new(ScriptUserData),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });

    let mut stdin = String::new();
    if env.command == Command::CreateInstance {
        tokio::io::stdin()
            .read_to_string(&mut stdin)
            .await
            .context("failed to read bootstrap params from stdin")?;
    }

    let out = command::run(&controller, &env, &cancel, &stdin).await?;
    if !out.is_empty() {
        println!("{}", out);
    }
    Ok(())
}
