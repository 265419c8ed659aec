//! Conversion between flat `Key=Value` device tags and canonical instance records.
//!
//! The remote API has no ownership concept of its own: a device belongs to a pool
//! and a controller only through the tags written at creation time.

use std::collections::HashMap;

use metal_common::{Address, AddressType, InstanceStatus, OsArch, OsType, ProviderInstance};
use metal_providers::device::{Device, DeviceState};

use crate::error::{ReconcileError, Result};

pub const NAME_TAG: &str = "Name";
pub const OS_TYPE_TAG: &str = "OSType";
pub const OS_ARCH_TAG: &str = "OSArch";
pub const POOL_ID_TAG: &str = "garm-pool-id";
pub const CONTROLLER_ID_TAG: &str = "garm-controller-id";

/// Split each tag on its first `=`. Entries without a separator are dropped and
/// a repeated key keeps its last value.
pub fn decode_tags(raw: &[String]) -> HashMap<String, String> {
    raw.iter()
        .filter_map(|tag| tag.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn encode_tag(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

/// Tenant scope of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub pool_id: String,
    pub controller_id: String,
}

impl Ownership {
    pub fn new(pool_id: impl Into<String>, controller_id: impl Into<String>) -> Self {
        Self {
            pool_id: pool_id.into(),
            controller_id: controller_id.into(),
        }
    }

    pub fn to_tags(&self) -> Vec<String> {
        vec![
            encode_tag(POOL_ID_TAG, &self.pool_id),
            encode_tag(CONTROLLER_ID_TAG, &self.controller_id),
        ]
    }

    /// `None` unless both scope tags are present.
    pub fn from_tags(tags: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            pool_id: tags.get(POOL_ID_TAG)?.clone(),
            controller_id: tags.get(CONTROLLER_ID_TAG)?.clone(),
        })
    }
}

pub fn is_owned_by(tags: &HashMap<String, String>, controller_id: &str) -> bool {
    tags.get(CONTROLLER_ID_TAG).map(String::as_str) == Some(controller_id)
}

pub fn status_for(state: Option<DeviceState>) -> InstanceStatus {
    let Some(state) = state else {
        return InstanceStatus::Unknown;
    };
    match state {
        DeviceState::Queued
        | DeviceState::Provisioning
        | DeviceState::Active
        | DeviceState::PoweringOn => InstanceStatus::Running,
        DeviceState::Inactive | DeviceState::PoweringOff | DeviceState::Deleted => {
            InstanceStatus::Stopped
        }
        DeviceState::Failed => InstanceStatus::Error,
        DeviceState::Deprovisioning | DeviceState::Reinstalling | DeviceState::Unrecognized => {
            InstanceStatus::Unknown
        }
    }
}

pub fn to_provider_instance(device: &Device) -> Result<ProviderInstance> {
    let mut tags = decode_tags(&device.tags);
    let name = tags
        .remove(NAME_TAG)
        .ok_or_else(|| ReconcileError::validation("missing Name property"))?;
    if device.id.is_empty() {
        return Err(ReconcileError::validation("device ID is empty"));
    }

    let addresses = device
        .ip_addresses
        .iter()
        .map(|ip| Address {
            address: ip.address.clone(),
            kind: if ip.public {
                AddressType::Public
            } else {
                AddressType::Private
            },
        })
        .collect();

    Ok(ProviderInstance {
        provider_id: device.id.clone(),
        name,
        os_type: tags.remove(OS_TYPE_TAG).map(OsType::from).unwrap_or_default(),
        os_arch: tags.remove(OS_ARCH_TAG).map(OsArch::from).unwrap_or_default(),
        addresses,
        status: status_for(device.state),
    })
}
