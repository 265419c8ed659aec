use serde::{Deserialize, Serialize};
use std::fmt;

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Running, // Provider reports the machine as (coming) up
    Stopped, // Powered off, deleted, or powering off
    Error,   // Provisioning failed
    #[default]
    Unknown, // Unset or unrecognized provider state
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Error => "error",
            InstanceStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    Public,
    Private,
}

/// Operating system family. Values read back from tags are kept verbatim,
/// so anything other than `linux`/`windows` lands in `Other`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum OsType {
    Linux,
    Windows,
    #[default]
    Unknown,
    Other(String),
}

impl OsType {
    pub fn as_str(&self) -> &str {
        match self {
            OsType::Linux => "linux",
            OsType::Windows => "windows",
            OsType::Unknown => "",
            OsType::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for OsType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "linux" => OsType::Linux,
            "windows" => OsType::Windows,
            "" => OsType::Unknown,
            _ => OsType::Other(s),
        }
    }
}

impl From<&str> for OsType {
    fn from(s: &str) -> Self {
        OsType::from(s.to_string())
    }
}

impl From<OsType> for String {
    fn from(os: OsType) -> Self {
        os.as_str().to_string()
    }
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum OsArch {
    Amd64,
    Arm64,
    #[default]
    Unknown,
    Other(String),
}

impl OsArch {
    pub fn as_str(&self) -> &str {
        match self {
            OsArch::Amd64 => "amd64",
            OsArch::Arm64 => "arm64",
            OsArch::Unknown => "",
            OsArch::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for OsArch {
    fn from(s: String) -> Self {
        match s.as_str() {
            "amd64" => OsArch::Amd64,
            "arm64" => OsArch::Arm64,
            "" => OsArch::Unknown,
            _ => OsArch::Other(s),
        }
    }
}

impl From<&str> for OsArch {
    fn from(s: &str) -> Self {
        OsArch::from(s.to_string())
    }
}

impl From<OsArch> for String {
    fn from(arch: OsArch) -> Self {
        arch.as_str().to_string()
    }
}

impl fmt::Display for OsArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Entities ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Address {
    pub address: String,
    #[serde(rename = "type")]
    pub kind: AddressType,
}

/// Provider-agnostic view of a remote machine. Built fresh on every read.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ProviderInstance {
    pub provider_id: String,
    pub name: String,
    #[serde(default)]
    pub os_type: OsType,
    #[serde(default)]
    pub os_arch: OsArch,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<Address>,
    pub status: InstanceStatus,
}

/// Downloadable runner tool bundle offered by the orchestrator for one OS/arch pair.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct RunnerApplicationDownload {
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub sha256_checksum: Option<String>,
    #[serde(default)]
    pub temp_download_token: Option<String>,
}

/// Request from the orchestrator to create one runner instance.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct BootstrapInstance {
    pub name: String,
    #[serde(default)]
    pub tools: Vec<RunnerApplicationDownload>,
    #[serde(default)]
    pub repo_url: String,
    #[serde(default)]
    pub callback_url: String,
    #[serde(default)]
    pub metadata_url: String,
    #[serde(default)]
    pub instance_token: String,
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    #[serde(default)]
    pub os_type: OsType,
    #[serde(default)]
    pub os_arch: OsArch,
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub pool_id: String,
    /// Free-form JSON, validated by the provider against its own schema.
    #[serde(default)]
    pub extra_specs: Option<serde_json::Value>,
}
