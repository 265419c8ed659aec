use std::sync::Arc;

use metal_common::{BootstrapInstance, OsType, ProviderInstance};
use metal_providers::device::{CreateDeviceRequest, DeviceAction};
use metal_providers::ComputeClient;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ReconcileError, Result};
use crate::poller::{self, PollPolicy};
use crate::runner_spec::{RunnerSpec, UserDataProvider};
use crate::tags::{self, Ownership};

/// Windows hostnames are capped at 15 characters by the provider.
pub const WINDOWS_HOSTNAME_LIMIT: usize = 15;

/// Lifecycle operations for the devices owned by one controller.
///
/// Cheap to clone: every field is shared, so a clone can be moved into a
/// spawned task.
#[derive(Clone)]
pub struct MetalController {
    pub(crate) client: Arc<dyn ComputeClient>,
    pub(crate) config: Arc<Config>,
    pub(crate) controller_id: Arc<str>,
    user_data: Arc<dyn UserDataProvider>,
    pub(crate) poll_policy: PollPolicy,
}

impl MetalController {
    pub fn new(
        client: Arc<dyn ComputeClient>,
        config: Config,
        controller_id: impl Into<String>,
        user_data: Arc<dyn UserDataProvider>,
    ) -> Self {
        let controller_id: String = controller_id.into();
        Self {
            client,
            config: Arc::new(config),
            controller_id: Arc::from(controller_id),
            user_data,
            poll_policy: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    pub fn controller_id(&self) -> &str {
        &self.controller_id
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn create_request(&self, spec: &RunnerSpec, userdata: String) -> CreateDeviceRequest {
        let params = &spec.bootstrap_params;
        let hostname = if params.os_type == OsType::Windows {
            params.name.chars().take(WINDOWS_HOSTNAME_LIMIT).collect()
        } else {
            params.name.clone()
        };
        CreateDeviceRequest {
            metro: spec
                .metro_code
                .clone()
                .unwrap_or_else(|| self.config.metro_code.clone()),
            plan: params.flavor.clone(),
            operating_system: params.image.clone(),
            tags: spec.tags.clone(),
            userdata: Some(userdata),
            hardware_reservation_id: spec
                .hardware_reservation_id
                .clone()
                .or_else(|| self.config.hardware_reservation_id.clone()),
            hostname: Some(hostname),
        }
    }

    /// Create a device and block until the activation poller reports it usable.
    pub async fn create_instance(
        &self,
        cancel: &CancellationToken,
        params: &BootstrapInstance,
    ) -> Result<ProviderInstance> {
        let spec = RunnerSpec::from_bootstrap(params, &self.controller_id, self.user_data.as_ref())
            .map_err(|e| e.context("failed to get runner spec"))?;
        let userdata = spec
            .compose_user_data(self.user_data.as_ref())
            .map_err(|e| e.context("failed to compose userdata"))?;
        let request = self.create_request(&spec, userdata);

        info!(
            name = %params.name,
            pool_id = %params.pool_id,
            metro = %request.metro,
            plan = %request.plan,
            "creating device"
        );
        let device = self
            .client
            .create_device(&self.config.project_id, &request)
            .await
            .map_err(|e| ReconcileError::upstream("failed to create device", e))?;
        let device_id = match device {
            Some(d) if !d.id.is_empty() => d.id,
            _ => return Err(ReconcileError::validation("device ID is empty")),
        };

        info!(device_id = %device_id, name = %params.name, "device created");
        poller::wait_device_active(self.client.as_ref(), &device_id, self.poll_policy, cancel).await
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<ProviderInstance> {
        let device = match self.client.find_device_by_id(instance_id).await {
            Ok(Some(d)) => d,
            Ok(None) => return Err(ReconcileError::NotFound("device not found".to_string())),
            Err(e) if e.is_absent() => {
                return Err(ReconcileError::NotFound("device not found".to_string()))
            }
            Err(e) => return Err(ReconcileError::upstream("failed to find device", e)),
        };
        tags::to_provider_instance(&device)
            .map_err(|e| e.context("failed to convert device to instance"))
    }

    /// Devices of `pool_id` that carry this controller's tag. Devices outside that
    /// scope are skipped, not reported.
    pub async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>> {
        let devices = self
            .client
            .find_project_devices(&self.config.project_id)
            .await
            .map_err(|e| ReconcileError::upstream("failed to list devices", e))?;

        let want = Ownership::new(pool_id, &*self.controller_id);
        let mut ret = Vec::new();
        for device in &devices {
            let device_tags = tags::decode_tags(&device.tags);
            if Ownership::from_tags(&device_tags).as_ref() != Some(&want) {
                continue;
            }
            let instance = tags::to_provider_instance(device)
                .map_err(|e| e.context("failed to convert device to instance"))?;
            ret.push(instance);
        }
        Ok(ret)
    }

    pub async fn start(&self, instance_id: &str) -> Result<()> {
        self.power(instance_id, DeviceAction::PowerOn)
            .await
            .map_err(|e| e.context("failed to start device"))
    }

    /// `force` is accepted for protocol compatibility; the power-off action has no
    /// graceful variant.
    pub async fn stop(&self, instance_id: &str, _force: bool) -> Result<()> {
        self.power(instance_id, DeviceAction::PowerOff)
            .await
            .map_err(|e| e.context("failed to stop device"))
    }

    async fn power(&self, instance_id: &str, action: DeviceAction) -> Result<()> {
        info!(device_id = instance_id, ?action, "requesting power action");
        self.client
            .perform_action(instance_id, action)
            .await
            .map_err(|e| {
                warn!(device_id = instance_id, ?action, error = %e, "power action rejected");
                ReconcileError::upstream("power action rejected", e)
            })
    }

    /// Nothing is tracked locally, so there is nothing to sweep.
    pub async fn remove_all_instances(&self) -> Result<()> {
        Ok(())
    }
}
