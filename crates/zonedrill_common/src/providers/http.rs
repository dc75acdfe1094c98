//! HTTP adapter for a scheduler gateway
//!
//! Speaks JSON to a REST gateway fronting the container scheduler and the
//! network provider. Every request carries the region in `X-Zonedrill-Region`.
//!
//! Routes:
//! - `GET  /v1/clusters/{cluster}/services/{service}`
//! - `GET  /v1/clusters/{cluster}/services/{service}/instances?status=running`
//! - `PUT  /v1/clusters/{cluster}/services/{service}/network`
//! - `POST /v1/clusters/{cluster}/instances/{id}/stop`
//! - `POST /v1/subnets/query`
//! - `GET  /v1/clusters/{cluster}/instances/{id}/placement`

use super::{ApiResult, ComputeCluster, NetworkConfigUpdate, NetworkTopologyApi, SubnetFilter};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::types::{InstanceId, PlacementRecord, ServiceDescription, ServiceKey, Subnet};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REGION_HEADER: &str = "X-Zonedrill-Region";

#[derive(Debug, Serialize)]
struct StopRequest<'a> {
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct InstanceList {
    instances: Vec<InstanceId>,
}

#[derive(Debug, Deserialize)]
struct SubnetList {
    subnets: Vec<Subnet>,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    #[serde(default)]
    message: String,
}

/// Scheduler + network client over HTTP
pub struct HttpSchedulerClient {
    endpoint: Url,
    region: String,
    token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpSchedulerClient {
    pub fn new(config: &ApiConfig, region: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Unavailable(format!("failed to create HTTP client: {}", e)))?;

        let endpoint = Url::parse(&config.endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                ApiError::Rejected(format!("invalid gateway endpoint {:?}", config.endpoint))
            })?;

        Ok(Self {
            endpoint,
            region: region.to_string(),
            token: config.token.clone(),
            timeout_secs: config.timeout_secs,
            client,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Endpoint with `segments` appended, each percent-encoded as one path segment
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn service_url(&self, key: &ServiceKey, rest: &[&str]) -> Url {
        let mut segments = vec![
            "v1",
            "clusters",
            key.cluster.as_str(),
            "services",
            key.service.as_str(),
        ];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn instance_url(&self, key: &ServiceKey, instance: &InstanceId, action: &str) -> Url {
        self.url(&[
            "v1",
            "clusters",
            key.cluster.as_str(),
            "instances",
            instance.as_str(),
            action,
        ])
    }

    fn prepare(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(REGION_HEADER, &self.region);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> ApiResult<reqwest::Response> {
        let response = self.prepare(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Unavailable(format!("request timed out after {}s", self.timeout_secs))
            } else {
                ApiError::Unavailable(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<GatewayError>()
            .await
            .map(|body| body.message)
            .unwrap_or_default();
        Err(classify_status(status, message))
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> ApiResult<T> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Map a gateway status onto the adapter error taxonomy
fn classify_status(status: StatusCode, message: String) -> ApiError {
    let detail = if message.is_empty() {
        status.to_string()
    } else {
        format!("{} ({})", message, status)
    };
    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(detail),
        s if s.is_client_error() => ApiError::Rejected(detail),
        _ => ApiError::Unavailable(detail),
    }
}

#[async_trait]
impl ComputeCluster for HttpSchedulerClient {
    async fn describe_service(&self, key: &ServiceKey) -> ApiResult<ServiceDescription> {
        self.fetch(self.client.get(self.service_url(key, &[]))).await
    }

    async fn list_running_instances(&self, key: &ServiceKey) -> ApiResult<Vec<InstanceId>> {
        let url = self.service_url(key, &["instances"]);
        let list: InstanceList = self
            .fetch(self.client.get(url).query(&[("status", "running")]))
            .await?;
        Ok(list.instances)
    }

    async fn update_service_network(
        &self,
        key: &ServiceKey,
        update: &NetworkConfigUpdate,
    ) -> ApiResult<()> {
        let url = self.service_url(key, &["network"]);
        self.send(self.client.put(url).json(update)).await?;
        Ok(())
    }

    async fn stop_instance(
        &self,
        key: &ServiceKey,
        instance: &InstanceId,
        reason: &str,
    ) -> ApiResult<()> {
        let url = self.instance_url(key, instance, "stop");
        self.send(self.client.post(url).json(&StopRequest { reason }))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NetworkTopologyApi for HttpSchedulerClient {
    async fn describe_subnets(&self, filter: &SubnetFilter) -> ApiResult<Vec<Subnet>> {
        let url = self.url(&["v1", "subnets", "query"]);
        let list: SubnetList = self.fetch(self.client.post(url).json(filter)).await?;
        Ok(list.subnets)
    }

    async fn resolve_instance_placement(
        &self,
        key: &ServiceKey,
        instance: &InstanceId,
    ) -> ApiResult<PlacementRecord> {
        let url = self.instance_url(key, instance, "placement");
        self.fetch(self.client.get(url)).await
    }
}
