use metal_common::{BootstrapInstance, OsArch, OsType, RunnerApplicationDownload};
use serde::Deserialize;

use crate::error::{ReconcileError, Result};
use crate::tags::{self, Ownership};

/// Per-pool overrides carried in the bootstrap request. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExtraSpecs {
    pub metro_code: Option<String>,
    pub hardware_reservation_id: Option<String>,
    pub disable_updates: Option<bool>,
    pub enable_boot_debug: Option<bool>,
    #[serde(default)]
    pub extra_packages: Vec<String>,
}

impl ExtraSpecs {
    pub fn from_bootstrap(params: &BootstrapInstance) -> Result<Self> {
        match &params.extra_specs {
            None | Some(serde_json::Value::Null) => Ok(Self::default()),
            Some(v) => serde_json::from_value(v.clone()).map_err(|e| {
                ReconcileError::validation(format!("failed to validate extra specs: {}", e))
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDataOptions {
    pub disable_updates_on_boot: bool,
    pub enable_boot_debug: bool,
    pub extra_packages: Vec<String>,
}

/// Injected source of runner tools and boot payloads.
pub trait UserDataProvider: Send + Sync {
    fn fetch_tools(
        &self,
        os_type: &OsType,
        os_arch: &OsArch,
        tools: &[RunnerApplicationDownload],
    ) -> anyhow::Result<RunnerApplicationDownload>;

    fn cloud_config(
        &self,
        params: &BootstrapInstance,
        tools: &RunnerApplicationDownload,
        options: &UserDataOptions,
    ) -> anyhow::Result<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunnerSpec {
    pub metro_code: Option<String>,
    pub hardware_reservation_id: Option<String>,
    pub disable_updates: bool,
    pub enable_boot_debug: bool,
    pub extra_packages: Vec<String>,
    pub tools: RunnerApplicationDownload,
    pub tags: Vec<String>,
    pub bootstrap_params: BootstrapInstance,
}

impl RunnerSpec {
    pub fn from_bootstrap(
        params: &BootstrapInstance,
        controller_id: &str,
        provider: &dyn UserDataProvider,
    ) -> Result<Self> {
        let tools = provider
            .fetch_tools(&params.os_type, &params.os_arch, &params.tools)
            .map_err(|e| ReconcileError::validation(format!("failed to get tools: {}", e)))?;
        let extra = ExtraSpecs::from_bootstrap(params)
            .map_err(|e| e.context("error loading extra specs"))?;

        let mut tags = Ownership::new(params.pool_id.clone(), controller_id).to_tags();
        tags.push(tags::encode_tag(tags::OS_TYPE_TAG, params.os_type.as_str()));
        tags.push(tags::encode_tag(tags::OS_ARCH_TAG, params.os_arch.as_str()));
        tags.push(tags::encode_tag(tags::NAME_TAG, &params.name));

        let mut spec = Self {
            metro_code: None,
            hardware_reservation_id: None,
            disable_updates: false,
            enable_boot_debug: false,
            extra_packages: vec![],
            tools,
            tags,
            bootstrap_params: params.clone(),
        };
        spec.merge_extra_specs(extra);
        spec.validate()
            .map_err(|e| e.context("error validating spec"))?;
        Ok(spec)
    }

    pub fn merge_extra_specs(&mut self, extra: ExtraSpecs) {
        if let Some(metro) = extra.metro_code.filter(|m| !m.is_empty()) {
            self.metro_code = Some(metro);
        }
        if extra.hardware_reservation_id.is_some() {
            self.hardware_reservation_id = extra.hardware_reservation_id;
        }
        if let Some(v) = extra.disable_updates {
            self.disable_updates = v;
        }
        if let Some(v) = extra.enable_boot_debug {
            self.enable_boot_debug = v;
        }
        self.extra_packages = extra.extra_packages;
    }

    pub fn validate(&self) -> Result<()> {
        if self.tools.download_url.is_none() {
            return Err(ReconcileError::validation("missing tools"));
        }
        let p = &self.bootstrap_params;
        if p.name.is_empty() || p.os_type == OsType::Unknown || p.instance_token.is_empty() {
            return Err(ReconcileError::validation("invalid bootstrap params"));
        }
        Ok(())
    }

    pub fn compose_user_data(&self, provider: &dyn UserDataProvider) -> Result<String> {
        let os_type = &self.bootstrap_params.os_type;
        if !matches!(os_type, OsType::Linux | OsType::Windows) {
            return Err(ReconcileError::validation(format!(
                "unsupported OS type for cloud config: {}",
                os_type
            )));
        }
        let options = UserDataOptions {
            disable_updates_on_boot: self.disable_updates,
            enable_boot_debug: self.enable_boot_debug,
            extra_packages: self.extra_packages.clone(),
        };
        let udata = provider
            .cloud_config(&self.bootstrap_params, &self.tools, &options)
            .map_err(|e| ReconcileError::validation(format!("failed to generate userdata: {}", e)))?;
        if *os_type == OsType::Windows {
            return Ok(format!("#ps1_sysnative\n{}", udata));
        }
        Ok(udata)
    }
}

/// Default payload source: picks the tool bundle for the requested platform and
/// renders a small download-and-register script.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptUserData;

fn tool_os(os: &OsType) -> &str {
    match os {
        OsType::Windows => "win",
        other => other.as_str(),
    }
}

fn tool_arch(arch: &OsArch) -> &str {
    match arch {
        OsArch::Amd64 => "x64",
        other => other.as_str(),
    }
}

/// Single-quote a value for bash. Embedded quotes become `'\''`.
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

// PowerShell single-quoted strings escape a quote by doubling it.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl UserDataProvider for ScriptUserData {
    fn fetch_tools(
        &self,
        os_type: &OsType,
        os_arch: &OsArch,
        tools: &[RunnerApplicationDownload],
    ) -> anyhow::Result<RunnerApplicationDownload> {
        tools
            .iter()
            .find(|t| {
                t.os.as_deref() == Some(tool_os(os_type))
                    && t.architecture.as_deref() == Some(tool_arch(os_arch))
            })
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!("unable to find tools for OS {} and arch {}", os_type, os_arch)
            })
    }

    fn cloud_config(
        &self,
        params: &BootstrapInstance,
        tools: &RunnerApplicationDownload,
        options: &UserDataOptions,
    ) -> anyhow::Result<String> {
        let url = tools
            .download_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing tools download URL"))?;
        let filename = tools.filename.as_deref().unwrap_or("runner.tar.gz");
        let labels = params.labels.join(",");

        let script = match params.os_type {
            OsType::Windows => {
                let q = ps_quote;
                format!(
                    "$ErrorActionPreference = \"Stop\"\n\
                     New-Item -ItemType Directory -Force -Path C:\\runner | Out-Null\n\
                     Set-Location C:\\runner\n\
                     Invoke-WebRequest -Uri {url} -OutFile {file}\n\
                     Expand-Archive -Path {file} -DestinationPath . -Force\n\
                     ./config.cmd --unattended --url {repo} --token {token} --name {name} --labels {labels} --ephemeral\n\
                     ./run.cmd\n",
                    url = q(url),
                    file = q(filename),
                    repo = q(&params.repo_url),
                    token = q(&params.instance_token),
                    name = q(&params.name),
                    labels = q(&labels),
                )
            }
            _ => {
                let q = sh_quote;
                let mut s = String::from("#!/bin/bash\nset -e\n");
                if options.enable_boot_debug {
                    s.push_str("set -x\n");
                }
                if !options.disable_updates_on_boot {
                    s.push_str("apt-get update -y || true\n");
                }
                if !options.extra_packages.is_empty() {
                    let packages: Vec<String> = options.extra_packages.iter().map(|p| q(p)).collect();
                    s.push_str(&format!("apt-get install -y {}\n", packages.join(" ")));
                }
                s.push_str(&format!(
                    "mkdir -p /opt/runner && cd /opt/runner\n\
                     curl -fsSL -o {file} {url}\n\
                     tar xzf {file}\n\
                     ./config.sh --unattended --url {repo} --token {token} --name {name} --labels {labels} --ephemeral\n\
                     ./run.sh\n",
                    url = q(url),
                    file = q(filename),
                    repo = q(&params.repo_url),
                    token = q(&params.instance_token),
                    name = q(&params.name),
                    labels = q(&labels),
                ));
                s
            }
        };
        Ok(script)
    }
}
