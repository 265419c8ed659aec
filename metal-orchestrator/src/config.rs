use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{env, fs, path::Path};

fn default_api_url() -> String {
    "https://api.equinix.com/metal/v1".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
    /// Authentication token for the Metal API. May be left empty in the file
    /// and supplied through `METAL_AUTH_TOKEN_FILE` or `METAL_AUTH_TOKEN`.
    #[serde(default)]
    pub auth_token: String,
    /// Metro (usually a two letter code) to create devices in.
    pub metro_code: String,
    #[serde(default)]
    pub hardware_reservation_id: Option<String>,
    pub project_id: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("error reading config {}", path.display()))?;
        let mut config = Self::parse(&raw).context("error decoding config")?;
        config.resolve_auth_token(|k| env::var(k).ok())?;
        config.validate().context("error validating config")?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    // Prefer *_FILE for secrets (Docker/K8s friendly), fallback to env var.
    pub fn resolve_auth_token(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if !self.auth_token.trim().is_empty() {
            return Ok(());
        }
        let set = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        let token = match set("METAL_AUTH_TOKEN_FILE") {
            Some(path) => fs::read_to_string(path.trim())
                .with_context(|| format!("error reading METAL_AUTH_TOKEN_FILE {}", path.trim()))?,
            None => set("METAL_AUTH_TOKEN").unwrap_or_default(),
        };
        self.auth_token = token.trim().to_string();
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth_token.trim().is_empty() {
            bail!("auth_token is required");
        }
        if self.metro_code.trim().is_empty() {
            bail!("metro_code is required");
        }
        if self.project_id.trim().is_empty() {
            bail!("project_id is required");
        }
        Ok(())
    }
}
