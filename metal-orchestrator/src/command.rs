use anyhow::{anyhow, bail, Context, Result};
use metal_common::BootstrapInstance;
use std::path::PathBuf;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::controller::MetalController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CreateInstance,
    DeleteInstance,
    GetInstance,
    ListInstances,
    RemoveAllInstances,
    StartInstance,
    StopInstance,
    GetVersion,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CreateInstance" => Command::CreateInstance,
            "DeleteInstance" => Command::DeleteInstance,
            "GetInstance" => Command::GetInstance,
            "ListInstances" => Command::ListInstances,
            "RemoveAllInstances" => Command::RemoveAllInstances,
            "StartInstance" => Command::StartInstance,
            "StopInstance" => Command::StopInstance,
            "GetVersion" => Command::GetVersion,
            other => bail!("unknown command {:?}", other),
        })
    }
}

/// Invocation parameters handed over by the orchestrator through the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Environment {
    pub command: Command,
    pub config_file: PathBuf,
    pub controller_id: String,
    pub pool_id: Option<String>,
    pub instance_id: Option<String>,
}

impl Environment {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let command: Command = get("PROVIDER_COMMAND")
            .ok_or_else(|| anyhow!("PROVIDER_COMMAND must be set"))?
            .parse()?;
        let config_file = get("PROVIDER_CONFIG_FILE")
            .ok_or_else(|| anyhow!("PROVIDER_CONFIG_FILE must be set"))?;
        let controller_id = get("PROVIDER_CONTROLLER_ID")
            .ok_or_else(|| anyhow!("PROVIDER_CONTROLLER_ID must be set"))?;

        let env = Self {
            command,
            config_file: PathBuf::from(config_file),
            controller_id,
            pool_id: get("PROVIDER_POOL_ID"),
            instance_id: get("PROVIDER_INSTANCE_ID"),
        };
        env.validate()?;
        Ok(env)
    }

    fn validate(&self) -> Result<()> {
        match self.command {
            Command::ListInstances if self.pool_id.is_none() => {
                bail!("PROVIDER_POOL_ID is required for ListInstances")
            }
            Command::DeleteInstance
            | Command::GetInstance
            | Command::StartInstance
            | Command::StopInstance
                if self.instance_id.is_none() =>
            {
                bail!("PROVIDER_INSTANCE_ID is required for {:?}", self.command)
            }
            _ => Ok(()),
        }
    }

    fn instance_id(&self) -> Result<&str> {
        self.instance_id
            .as_deref()
            .ok_or_else(|| anyhow!("missing instance ID"))
    }
}

/// Execute one command. Returns the text to print on stdout (possibly empty).
pub async fn run(
    controller: &MetalController,
    env: &Environment,
    cancel: &CancellationToken,
    stdin: &str,
) -> Result<String> {
    info!(command = ?env.command, controller_id = controller.controller_id(), "running command");
    let out = match env.command {
        Command::CreateInstance => {
            let params: BootstrapInstance =
                serde_json::from_str(stdin).context("failed to decode bootstrap params")?;
            let instance = controller.create_instance(cancel, &params).await?;
            serde_json::to_string(&instance)?
        }
        Command::GetInstance => {
            let instance = controller.get_instance(env.instance_id()?).await?;
            serde_json::to_string(&instance)?
        }
        Command::ListInstances => {
            let pool_id = env.pool_id.as_deref().unwrap_or_default();
            let instances = controller.list_instances(pool_id).await?;
            serde_json::to_string(&instances)?
        }
        Command::DeleteInstance => {
            controller.delete_instance(cancel, env.instance_id()?).await?;
            String::new()
        }
        Command::RemoveAllInstances => {
            controller.remove_all_instances().await?;
            String::new()
        }
        Command::StartInstance => {
            controller.start(env.instance_id()?).await?;
            String::new()
        }
        Command::StopInstance => {
            controller.stop(env.instance_id()?, true).await?;
            String::new()
        }
        Command::GetVersion => controller.version().to_string(),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn parses_environment() {
        let env = Environment::from_lookup(lookup(&[
            ("PROVIDER_COMMAND", "ListInstances"),
            ("PROVIDER_CONFIG_FILE", "/etc/metal.toml"),
            ("PROVIDER_CONTROLLER_ID", "ctrl"),
            ("PROVIDER_POOL_ID", "pool"),
        ]))
        .unwrap();
        assert_eq!(env.command, Command::ListInstances);
        assert_eq!(env.config_file, PathBuf::from("/etc/metal.toml"));
        assert_eq!(env.pool_id.as_deref(), Some("pool"));
        assert_eq!(env.instance_id, None);
    }

    #[test]
    fn rejects_missing_per_command_inputs() {
        let err = Environment::from_lookup(lookup(&[
            ("PROVIDER_COMMAND", "DeleteInstance"),
            ("PROVIDER_CONFIG_FILE", "/etc/metal.toml"),
            ("PROVIDER_CONTROLLER_ID", "ctrl"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PROVIDER_INSTANCE_ID"));

        let err = Environment::from_lookup(lookup(&[
            ("PROVIDER_COMMAND", "Reboot"),
            ("PROVIDER_CONFIG_FILE", "/etc/metal.toml"),
            ("PROVIDER_CONTROLLER_ID", "ctrl"),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "unknown command \"Reboot\"");
    }
}
