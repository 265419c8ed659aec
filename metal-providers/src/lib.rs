use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Capability seam over the remote compute API. The orchestrator receives an
/// implementation by injection; nothing here is global.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    /// `Ok(None)` means the API answered without a device body.
    async fn find_device_by_id(&self, device_id: &str) -> Result<Option<device::Device>, ApiError>;

    async fn find_project_devices(&self, project_id: &str) -> Result<Vec<device::Device>, ApiError>;

    async fn create_device(
        &self,
        project_id: &str,
        request: &device::CreateDeviceRequest,
    ) -> Result<Option<device::Device>, ApiError>;

    async fn delete_device(&self, device_id: &str) -> Result<(), ApiError>;

    // Power actions are fire-and-forget: success means "accepted", not "reached".
    async fn perform_action(
        &self,
        device_id: &str,
        action: device::DeviceAction,
    ) -> Result<(), ApiError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Decode(_) => None,
        }
    }

    /// 403 and 404 both mean the device is gone (or no longer ours to see).
    pub fn is_absent(&self) -> bool {
        matches!(self.status_code(), Some(403) | Some(404))
    }
}

pub mod device {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "snake_case")]
    pub enum DeviceState {
        Queued,
        Provisioning,
        Deprovisioning,
        Reinstalling,
        Active,
        Inactive,
        Failed,
        PoweringOn,
        PoweringOff,
        Deleted,
        #[serde(other)]
        Unrecognized,
    }

    impl DeviceState {
        pub fn as_str(&self) -> &'static str {
            match self {
                DeviceState::Queued => "queued",
                DeviceState::Provisioning => "provisioning",
                DeviceState::Deprovisioning => "deprovisioning",
                DeviceState::Reinstalling => "reinstalling",
                DeviceState::Active => "active",
                DeviceState::Inactive => "inactive",
                DeviceState::Failed => "failed",
                DeviceState::PoweringOn => "powering_on",
                DeviceState::PoweringOff => "powering_off",
                DeviceState::Deleted => "deleted",
                DeviceState::Unrecognized => "unrecognized",
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
    pub struct IpAssignment {
        #[serde(default)]
        pub address: String,
        #[serde(default)]
        pub public: bool,
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
    pub struct Device {
        #[serde(default)]
        pub id: String,
        #[serde(default)]
        pub hostname: Option<String>,
        #[serde(default)]
        pub state: Option<DeviceState>,
        #[serde(default)]
        pub tags: Vec<String>,
        #[serde(default)]
        pub ip_addresses: Vec<IpAssignment>,
        #[serde(default)]
        pub provisioning_percentage: Option<f32>,
    }

    #[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
    pub struct CreateDeviceRequest {
        pub metro: String,
        pub plan: String,
        pub operating_system: String,
        pub tags: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub userdata: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub hardware_reservation_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub hostname: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "snake_case")]
    pub enum DeviceAction {
        PowerOn,
        PowerOff,
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "equinix")]
pub mod equinix;
