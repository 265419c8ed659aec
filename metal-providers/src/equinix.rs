use crate::device::{CreateDeviceRequest, Device, DeviceAction};
use crate::{ApiError, ComputeClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://api.equinix.com/metal/v1";

const PAGE_SIZE: u32 = 100;

/// HTTP client for the Equinix Metal device API.
pub struct EquinixClient {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<Device>,
    #[serde(default)]
    meta: Option<PageMeta>,
}

#[derive(Deserialize)]
struct PageMeta {
    #[serde(default)]
    last_page: Option<u32>,
}

impl EquinixClient {
    pub fn new(base_url: &str, auth_token: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Auth-Token",
            HeaderValue::from_str(auth_token.trim()).context("invalid auth token header value")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        // Default reqwest client has no overall timeout. If the API stalls, a poll can hang forever.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn check(method: &str, url: &str, resp: Response) -> Result<Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            debug!("[Metal API] {} {} succeeded: status={}", method, url, status.as_u16());
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(
            "[Metal API] {} {} failed: status={}, response={}",
            method,
            url,
            status.as_u16(),
            body
        );
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode_optional_device(resp: Response) -> Result<Option<Device>, ApiError> {
        let text = resp.text().await?;
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        serde_json::from_str(trimmed)
            .map(Some)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ComputeClient for EquinixClient {
    async fn find_device_by_id(&self, device_id: &str) -> Result<Option<Device>, ApiError> {
        let url = format!("{}/devices/{}", self.base_url, device_id);
        let resp = self.client.get(&url).send().await?;
        let resp = Self::check("GET", &url, resp).await?;
        Self::decode_optional_device(resp).await
    }

    async fn find_project_devices(&self, project_id: &str) -> Result<Vec<Device>, ApiError> {
        let url = format!("{}/projects/{}/devices", self.base_url, project_id);
        let mut devices = Vec::new();
        let mut page = 1u32;
        loop {
            let resp = self
                .client
                .get(&url)
                .query(&[("page", page), ("per_page", PAGE_SIZE)])
                .send()
                .await?;
            let resp = Self::check("GET", &url, resp).await?;
            let list: DeviceList = resp
                .json()
                .await
                .map_err(|e| ApiError::Decode(e.to_string()))?;
            devices.extend(list.devices);

            let last_page = list.meta.and_then(|m| m.last_page).unwrap_or(page);
            if page >= last_page {
                break;
            }
            page += 1;
        }
        debug!(
            "[Metal API] project {} has {} devices",
            project_id,
            devices.len()
        );
        Ok(devices)
    }

    async fn create_device(
        &self,
        project_id: &str,
        request: &CreateDeviceRequest,
    ) -> Result<Option<Device>, ApiError> {
        let url = format!("{}/projects/{}/devices", self.base_url, project_id);
        debug!(
            "[Metal API] POST {} - Creating device: plan={}, os={}, metro={}, has_userdata={}",
            url,
            request.plan,
            request.operating_system,
            request.metro,
            request.userdata.is_some()
        );
        let resp = self.client.post(&url).json(request).send().await?;
        let resp = Self::check("POST", &url, resp).await?;
        Self::decode_optional_device(resp).await
    }

    async fn delete_device(&self, device_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/devices/{}", self.base_url, device_id);
        let resp = self.client.delete(&url).send().await?;
        Self::check("DELETE", &url, resp).await?;
        Ok(())
    }

    async fn perform_action(&self, device_id: &str, action: DeviceAction) -> Result<(), ApiError> {
        let url = format!("{}/devices/{}/actions", self.base_url, device_id);
        let body = json!({ "type": action });
        let resp = self.client.post(&url).json(&body).send().await?;
        Self::check("POST", &url, resp).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceState;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> EquinixClient {
        EquinixClient::new(&server.uri(), "secret-token").unwrap()
    }

    #[tokio::test]
    async fn find_device_sends_token_and_decodes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices/dev-1"))
            .and(header("X-Auth-Token", "secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "dev-1",
                "state": "provisioning",
                "provisioning_percentage": 42.5,
                "tags": ["Name=runner-1"],
                "ip_addresses": [{"address": "147.75.1.1", "public": true}]
            })))
            .mount(&mock_server)
            .await;

        let dev = client(&mock_server)
            .await
            .find_device_by_id("dev-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dev.id, "dev-1");
        assert_eq!(dev.state, Some(DeviceState::Provisioning));
        assert_eq!(dev.provisioning_percentage, Some(42.5));
        assert!(dev.ip_addresses[0].public);
    }

    #[tokio::test]
    async fn not_found_keeps_status_code() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/devices/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("{\"error\":\"Not found\"}"))
            .mount(&mock_server)
            .await;

        let err = client(&mock_server)
            .await
            .find_device_by_id("gone")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), Some(404));
        assert!(err.is_absent());
    }

    #[tokio::test]
    async fn listing_follows_pages() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/proj/devices"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [{"id": "a"}, {"id": "b"}],
                "meta": {"current_page": 1, "last_page": 2}
            })))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/projects/proj/devices"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "devices": [{"id": "c"}],
                "meta": {"current_page": 2, "last_page": 2}
            })))
            .mount(&mock_server)
            .await;

        let devices = client(&mock_server)
            .await
            .find_project_devices("proj")
            .await
            .unwrap();
        let ids: Vec<_> = devices.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn create_posts_request_body() {
        let mock_server = MockServer::start().await;
        let request = CreateDeviceRequest {
            metro: "am".to_string(),
            plan: "c3.small.x86".to_string(),
            operating_system: "ubuntu_22_04".to_string(),
            tags: vec!["Name=runner-1".to_string()],
            userdata: Some("#!/bin/bash".to_string()),
            hardware_reservation_id: None,
            hostname: Some("runner-1".to_string()),
        };
        Mock::given(method("POST"))
            .and(path("/projects/proj/devices"))
            .and(body_json(serde_json::json!({
                "metro": "am",
                "plan": "c3.small.x86",
                "operating_system": "ubuntu_22_04",
                "tags": ["Name=runner-1"],
                "userdata": "#!/bin/bash",
                "hostname": "runner-1"
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"id": "new-dev", "state": "queued"})),
            )
            .mount(&mock_server)
            .await;

        let dev = client(&mock_server)
            .await
            .create_device("proj", &request)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dev.id, "new-dev");
        assert_eq!(dev.state, Some(DeviceState::Queued));
    }

    #[tokio::test]
    async fn actions_and_delete() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/devices/dev-1/actions"))
            .and(body_json(serde_json::json!({"type": "power_on"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/devices/dev-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/devices/dev-2"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let c = client(&mock_server).await;
        c.perform_action("dev-1", DeviceAction::PowerOn).await.unwrap();
        c.delete_device("dev-1").await.unwrap();
        let err = c.delete_device("dev-2").await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(err.to_string(), "status=500 body=boom");
    }
}
