// Common test fixtures: a controller wired to the in-memory compute API.
#![allow(dead_code)]

use metal_common::{BootstrapInstance, OsArch, OsType, RunnerApplicationDownload};
use metal_orchestrator::runner_spec::ScriptUserData;
use metal_orchestrator::{Config, MetalController, PollPolicy};
use metal_providers::device::{Device, DeviceState, IpAssignment};
use metal_providers::mock::MockComputeClient;
use std::sync::Arc;
use std::time::Duration;

pub const CONTROLLER_ID: &str = "mock-controller-id";
pub const POOL_ID: &str = "test-pool";
pub const PROJECT_ID: &str = "project";

pub fn test_config() -> Config {
    Config {
        auth_token: "token".to_string(),
        metro_code: "AM".to_string(),
        hardware_reservation_id: None,
        project_id: PROJECT_ID.to_string(),
        api_url: "http://localhost".to_string(),
    }
}

pub fn fast_policy(attempts: u32) -> PollPolicy {
    PollPolicy {
        attempts,
        delay: Duration::from_millis(1),
    }
}

/// Controller plus a handle on its mock so tests can script and inspect calls.
pub fn controller_with(mock: MockComputeClient) -> (MetalController, Arc<MockComputeClient>) {
    let mock = Arc::new(mock);
    let controller = MetalController::new(
        mock.clone(),
        test_config(),
        CONTROLLER_ID,
        Arc::new(ScriptUserData),
    )
    .with_poll_policy(fast_policy(20));
    (controller, mock)
}

pub fn device(id: &str, name: &str, state: DeviceState) -> Device {
    owned_device(id, name, POOL_ID, CONTROLLER_ID, state)
}

pub fn owned_device(id: &str, name: &str, pool: &str, controller: &str, state: DeviceState) -> Device {
    Device {
        id: id.to_string(),
        hostname: Some(name.to_string()),
        state: Some(state),
        tags: vec![
            format!("Name={}", name),
            format!("garm-pool-id={}", pool),
            format!("garm-controller-id={}", controller),
            "OSType=linux".to_string(),
            "OSArch=amd64".to_string(),
        ],
        ip_addresses: vec![IpAssignment {
            address: "10.10.0.4".to_string(),
            public: false,
        }],
        provisioning_percentage: None,
    }
}

pub fn bootstrap_params(name: &str, os_type: OsType) -> BootstrapInstance {
    let tool = |os: &str| RunnerApplicationDownload {
        os: Some(os.to_string()),
        architecture: Some("x64".to_string()),
        download_url: Some("http://test.com".to_string()),
        filename: Some("runner.tar.gz".to_string()),
        sha256_checksum: Some("sha256:1123".to_string()),
        temp_download_token: Some("test-token".to_string()),
    };
    BootstrapInstance {
        name: name.to_string(),
        instance_token: "test-token".to_string(),
        os_type,
        os_arch: OsArch::Amd64,
        image: "ubuntu_22_04".to_string(),
        flavor: "c3.small.x86".to_string(),
        pool_id: POOL_ID.to_string(),
        tools: vec![tool("linux"), tool("win")],
        extra_specs: Some(serde_json::json!({"metro_code": "AM"})),
        ..Default::default()
    }
}

pub fn uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}
