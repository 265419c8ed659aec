use futures_util::stream::{FuturesUnordered, StreamExt};
use metal_providers::device::{Device, DeviceState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::MetalController;
use crate::error::{ReconcileError, Result};
use crate::poller;
use crate::tags::{self, NAME_TAG};

impl MetalController {
    /// Remove the device(s) behind `identifier`, which is either a device UUID or
    /// an instance name. Names are not unique; every owned match is deleted.
    pub async fn delete_instance(&self, cancel: &CancellationToken, identifier: &str) -> Result<()> {
        if identifier.is_empty() {
            return Err(ReconcileError::validation("instance ID is empty"));
        }
        if Uuid::parse_str(identifier).is_ok() {
            return self.delete_one_instance(cancel, identifier).await;
        }

        let matches = self
            .find_instances_by_name(identifier)
            .await
            .map_err(|e| e.context("failed to find instances by name"))?;
        match matches.as_slice() {
            [] => {
                debug!(name = identifier, "no devices match, nothing to delete");
                Ok(())
            }
            [only] => self.delete_one_instance(cancel, &only.id).await,
            _ => {
                let ids = matches.into_iter().map(|d| d.id).collect();
                self.delete_concurrently(cancel, ids).await
            }
        }
    }

    /// Owned devices whose `Name` tag equals `name`.
    pub async fn find_instances_by_name(&self, name: &str) -> Result<Vec<Device>> {
        let devices = self
            .client
            .find_project_devices(&self.config.project_id)
            .await
            .map_err(|e| ReconcileError::upstream("failed to list devices", e))?;

        Ok(devices
            .into_iter()
            .filter(|dev| {
                let t = tags::decode_tags(&dev.tags);
                t.get(NAME_TAG).map(String::as_str) == Some(name)
                    && tags::is_owned_by(&t, &self.controller_id)
            })
            .collect())
    }

    /// One task per device. Returns the first failure once every task is done, or
    /// `Cancelled` as soon as `cancel` fires. Tasks still running at that point are
    /// left to finish on their own.
    async fn delete_concurrently(&self, cancel: &CancellationToken, ids: Vec<String>) -> Result<()> {
        info!(count = ids.len(), "deleting devices concurrently");
        let group = cancel.child_token();
        let mut tasks: FuturesUnordered<JoinHandle<Result<()>>> = ids
            .into_iter()
            .map(|id| {
                let this = self.clone();
                let token = group.clone();
                tokio::spawn(async move { this.delete_one_instance(&token, &id).await })
            })
            .collect();

        let wait_all = async {
            let mut first_err = None;
            while let Some(joined) = tasks.next().await {
                let res = joined.unwrap_or_else(|e| Err(ReconcileError::Task(e.to_string())));
                if let Err(e) = res {
                    if first_err.is_none() {
                        // Siblings stop at their next suspension point.
                        group.cancel();
                        first_err = Some(e);
                    }
                }
            }
            first_err.map_or(Ok(()), Err)
        };

        tokio::select! {
            res = wait_all => res,
            _ = cancel.cancelled() => {
                warn!("delete cancelled by caller, in-flight deletions continue detached");
                Err(ReconcileError::Cancelled)
            }
        }
    }

    /// Delete a single device by UUID. Absent devices count as deleted.
    pub async fn delete_one_instance(&self, cancel: &CancellationToken, instance_id: &str) -> Result<()> {
        Uuid::parse_str(instance_id).map_err(|e| {
            ReconcileError::validation(format!("invalid instance ID {}: {}", instance_id, e))
        })?;
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        let device = match self.client.find_device_by_id(instance_id).await {
            Ok(Some(d)) => d,
            Ok(None) => {
                debug!(device_id = instance_id, "lookup returned no device, treating as deleted");
                return Ok(());
            }
            Err(e) if e.is_absent() => {
                debug!(device_id = instance_id, status = ?e.status_code(), "device already gone");
                return Ok(());
            }
            Err(e) => return Err(ReconcileError::upstream("failed to find device", e)),
        };

        // The API refuses to delete a device that is still being created.
        let state = device.state;
        if matches!(state, Some(DeviceState::Provisioning) | Some(DeviceState::Queued)) {
            info!(device_id = instance_id, "device still provisioning, waiting before delete");
            poller::wait_device_active(self.client.as_ref(), instance_id, self.poll_policy, cancel)
                .await
                .map_err(|e| e.context("failed to wait for device"))?;
        }

        match self.client.delete_device(instance_id).await {
            Ok(()) => {
                info!(device_id = instance_id, "device deleted");
                Ok(())
            }
            Err(e) if e.is_absent() => Ok(()),
            Err(e) if matches!(state, Some(DeviceState::Deleted) | Some(DeviceState::Failed)) => {
                debug!(device_id = instance_id, error = %e, "delete failed on a dead device, ignoring");
                Ok(())
            }
            Err(e) => Err(ReconcileError::upstream("failed to delete device", e)),
        }
    }
}
