use crate::device::{CreateDeviceRequest, Device, DeviceAction, DeviceState};
use crate::{ApiError, ComputeClient};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Scripted answer for one `find_device_by_id` call.
#[derive(Debug, Clone)]
pub enum MockLookup {
    Found(Device),
    Empty,
    Status(u16),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    FindDevice(String),
    ListProject(String),
    Create(String, CreateDeviceRequest),
    Delete(String),
    Action(String, DeviceAction),
}

#[derive(Default)]
struct MockState {
    devices: Vec<Device>,
    lookups: HashMap<String, VecDeque<MockLookup>>,
    delete_failures: HashMap<String, u16>,
    list_failure: Option<u16>,
    create_failure: Option<u16>,
    create_response: Option<MockLookup>,
    action_failure: Option<u16>,
    delete_delay: Option<Duration>,
    calls: Vec<MockCall>,
}

/// In-memory compute API. Devices live in a list; individual calls can be
/// scripted to fail with a given HTTP status.
#[derive(Default)]
pub struct MockComputeClient {
    state: Mutex<MockState>,
}

fn status_error(status: u16) -> ApiError {
    ApiError::Status {
        status,
        body: format!("mock error {}", status),
    }
}

impl MockComputeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<Device>) -> Self {
        let mock = Self::new();
        for d in devices {
            mock.insert_device(d);
        }
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert_device(&self, device: Device) {
        let mut st = self.state();
        st.devices.retain(|d| d.id != device.id);
        st.devices.push(device);
    }

    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.state().devices.iter().find(|d| d.id == device_id).cloned()
    }

    /// Queue answers for successive lookups of `device_id`. Once drained,
    /// lookups fall back to the stored devices.
    pub fn script_lookups(&self, device_id: &str, answers: Vec<MockLookup>) {
        self.state()
            .lookups
            .entry(device_id.to_string())
            .or_default()
            .extend(answers);
    }

    pub fn fail_delete(&self, device_id: &str, status: u16) {
        self.state()
            .delete_failures
            .insert(device_id.to_string(), status);
    }

    pub fn fail_list(&self, status: u16) {
        self.state().list_failure = Some(status);
    }

    pub fn fail_create(&self, status: u16) {
        self.state().create_failure = Some(status);
    }

    pub fn fail_actions(&self, status: u16) {
        self.state().action_failure = Some(status);
    }

    /// Override what `create_device` returns instead of synthesizing a queued device.
    pub fn set_create_response(&self, answer: MockLookup) {
        self.state().create_response = Some(answer);
    }

    pub fn set_delete_delay(&self, delay: Duration) {
        self.state().delete_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Delete(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn lookup_count(&self, device_id: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::FindDevice(id) if id == device_id))
            .count()
    }
}

#[async_trait]
impl ComputeClient for MockComputeClient {
    async fn find_device_by_id(&self, device_id: &str) -> Result<Option<Device>, ApiError> {
        let mut st = self.state();
        st.calls.push(MockCall::FindDevice(device_id.to_string()));

        let scripted = st.lookups.get_mut(device_id).and_then(|q| q.pop_front());
        match scripted {
            Some(MockLookup::Found(d)) => Ok(Some(d)),
            Some(MockLookup::Empty) => Ok(None),
            Some(MockLookup::Status(code)) => Err(status_error(code)),
            None => st
                .devices
                .iter()
                .find(|d| d.id == device_id)
                .cloned()
                .map(Some)
                .ok_or_else(|| status_error(404)),
        }
    }

    async fn find_project_devices(&self, project_id: &str) -> Result<Vec<Device>, ApiError> {
        let mut st = self.state();
        st.calls.push(MockCall::ListProject(project_id.to_string()));
        if let Some(code) = st.list_failure {
            return Err(status_error(code));
        }
        Ok(st.devices.clone())
    }

    async fn create_device(
        &self,
        project_id: &str,
        request: &CreateDeviceRequest,
    ) -> Result<Option<Device>, ApiError> {
        let mut st = self.state();
        st.calls
            .push(MockCall::Create(project_id.to_string(), request.clone()));
        if let Some(code) = st.create_failure {
            return Err(status_error(code));
        }
        match st.create_response.clone() {
            Some(MockLookup::Found(d)) => {
                st.devices.retain(|x| x.id != d.id);
                st.devices.push(d.clone());
                Ok(Some(d))
            }
            Some(MockLookup::Empty) => Ok(None),
            Some(MockLookup::Status(code)) => Err(status_error(code)),
            None => {
                let device = Device {
                    id: uuid::Uuid::new_v4().to_string(),
                    hostname: request.hostname.clone(),
                    state: Some(DeviceState::Queued),
                    tags: request.tags.clone(),
                    ip_addresses: vec![],
                    provisioning_percentage: Some(0.0),
                };
                st.devices.push(device.clone());
                Ok(Some(device))
            }
        }
    }

    async fn delete_device(&self, device_id: &str) -> Result<(), ApiError> {
        let delay = {
            let mut st = self.state();
            st.calls.push(MockCall::Delete(device_id.to_string()));
            st.delete_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut st = self.state();
        if let Some(code) = st.delete_failures.get(device_id).copied() {
            return Err(status_error(code));
        }
        let before = st.devices.len();
        st.devices.retain(|d| d.id != device_id);
        if st.devices.len() == before {
            return Err(status_error(404));
        }
        Ok(())
    }

    async fn perform_action(&self, device_id: &str, action: DeviceAction) -> Result<(), ApiError> {
        let mut st = self.state();
        st.calls
            .push(MockCall::Action(device_id.to_string(), action));
        if let Some(code) = st.action_failure {
            return Err(status_error(code));
        }
        let device = st
            .devices
            .iter_mut()
            .find(|d| d.id == device_id)
            .ok_or_else(|| status_error(404))?;
        device.state = Some(match action {
            DeviceAction::PowerOn => DeviceState::PoweringOn,
            DeviceAction::PowerOff => DeviceState::PoweringOff,
        });
        Ok(())
    }
}
