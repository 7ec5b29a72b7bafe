use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::models::{InspectionItemLocal, InspectionLocal};

// ===== ERRORS =====

/// Typed failure of a gateway call. The sync engine's state machine
/// branches on the class, so this cannot be a plain string error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("not authorized")]
    Unauthorized,
    #[error("{message}")]
    Business { message: String },
    #[error("network unavailable: {detail}")]
    Network { detail: String },
    #[error("protocol error: {detail}")]
    Protocol { detail: String },
}

impl GatewayError {
    /// Classifies a transport-level failure: timeouts, refused connections,
    /// DNS and mid-transfer I/O all count as network trouble that a later
    /// pass may resolve; anything else (decode, builder) is a protocol
    /// defect and must not be silently retried.
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_body() || e.is_request() {
            GatewayError::Network {
                detail: e.to_string(),
            }
        } else {
            GatewayError::Protocol {
                detail: e.to_string(),
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Network { .. })
    }

    /// The documented loose contract: a business rejection whose message
    /// mentions "parameter" is fixable by a catalog refresh. Centralized
    /// here so a structured error code can replace it in one place.
    pub fn is_parameter_related(&self) -> bool {
        match self {
            GatewayError::Business { message } => message.to_lowercase().contains("parameter"),
            _ => false,
        }
    }
}

// ===== WIRE TYPES =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(username: String, password: String) -> Self {
        Self { username, password }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitySummary {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub type_code: String,
    pub inspection_count: i64,
    pub last_inspection_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoneSummary {
    /// Absent for the "directly on facility" virtual zone.
    pub zone_id: Option<i64>,
    pub name: String,
    pub voltage_kv: Option<f64>,
    pub type_code: Option<String>,
    pub device_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistParameter {
    pub parameter_id: i64,
    pub name: String,
    pub data_kind: String,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub unit: Option<String>,
    pub required: bool,
    pub display_order: i32,
    pub default_bool: Option<bool>,
    pub default_num: Option<f64>,
    pub default_text: Option<String>,
    pub last_checked_at: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChecklist {
    pub device_id: i64,
    pub nameplate: String,
    pub serial_no: String,
    pub type_code: String,
    pub type_name: String,
    pub zone_id: Option<i64>,
    pub zone_name: String,
    pub voltage_kv: Option<f64>,
    pub parameters: Vec<ChecklistParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionUpload {
    pub local_id: String,
    pub facility_id: i64,
    pub user_id: i64,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<&InspectionLocal> for InspectionUpload {
    fn from(inspection: &InspectionLocal) -> Self {
        Self {
            local_id: inspection.local_id.clone(),
            facility_id: inspection.facility_id,
            user_id: inspection.user_id,
            started_at: inspection.started_at.clone(),
            finished_at: inspection.finished_at.clone(),
            note: inspection.note.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpload {
    pub local_id: String,
    pub device_id: i64,
    pub parameter_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_bool: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_num: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub recorded_at: String,
}

impl From<&InspectionItemLocal> for ItemUpload {
    fn from(item: &InspectionItemLocal) -> Self {
        Self {
            local_id: item.local_id.clone(),
            device_id: item.device_id,
            parameter_id: item.parameter_id,
            value_bool: item.value_bool,
            value_num: item.value_num,
            value_text: item.value_text.clone(),
            note: item.note.clone(),
            recorded_at: item.recorded_at.clone(),
        }
    }
}

/// One inspection and its items, submitted as a single request keyed by
/// the inspection's local UUID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub inspection: InspectionUpload,
    pub items: Vec<ItemUpload>,
}

impl SyncRequest {
    pub fn new(inspection: &InspectionLocal, items: &[InspectionItemLocal]) -> Self {
        Self {
            inspection: InspectionUpload::from(inspection),
            items: items.iter().map(ItemUpload::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMapping {
    pub local_id: String,
    pub server_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdMappings {
    #[serde(default)]
    pub inspection: Option<IdMapping>,
    #[serde(default)]
    pub items: Vec<IdMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAck {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub server_inspection_id: Option<i64>,
    #[serde(default)]
    pub id_mappings: Option<IdMappings>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

// ===== GATEWAY =====

/// The remote authority, as consumed by the engine. Object-safe so tests
/// can script a double.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, GatewayError>;

    async fn fetch_facilities(&self, bearer: &str) -> Result<Vec<FacilitySummary>, GatewayError>;

    async fn fetch_zones(
        &self,
        bearer: &str,
        facility_id: i64,
    ) -> Result<Vec<ZoneSummary>, GatewayError>;

    /// `zone_id: None` addresses the "directly on facility" virtual zone.
    async fn fetch_checklist(
        &self,
        bearer: &str,
        facility_id: i64,
        zone_id: Option<i64>,
    ) -> Result<Vec<DeviceChecklist>, GatewayError>;

    /// Idempotent on the server side: resubmitting the same inspection
    /// local UUID returns the same server ids instead of duplicating.
    async fn submit_inspection(
        &self,
        bearer: &str,
        request: &SyncRequest,
    ) -> Result<SyncAck, GatewayError>;
}

/// HTTP implementation of the gateway against the inspection server's
/// REST API.
pub struct HttpGateway {
    base_url: Url,
    http: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| anyhow!("Invalid server URL {}: {}", base_url, e))?;
        // Url::join treats a path without a trailing slash as a file.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            base_url: base,
            http,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url.join(path).map_err(|e| GatewayError::Protocol {
            detail: format!("bad endpoint {}: {}", path, e),
        })
    }

    /// Maps the HTTP outcome onto the error taxonomy: 401 is an auth
    /// failure, other non-2xx bodies carry a business message, 2xx bodies
    /// decode into the expected type.
    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }

        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(GatewayError::from_transport);
        }

        let body = response
            .text()
            .await
            .map_err(GatewayError::from_transport)?;
        let message = serde_json::from_str::<ApiMessage>(&body)
            .map(|m| m.message)
            .unwrap_or_else(|_| format!("server returned {}: {}", status, body));
        Err(GatewayError::Business { message })
    }
}

#[async_trait]
impl RemoteGateway for HttpGateway {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, GatewayError> {
        let url = self.endpoint("v1/auth/login")?;
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(GatewayError::from_transport)?;
        Self::read_json(response).await
    }

    async fn fetch_facilities(&self, bearer: &str) -> Result<Vec<FacilitySummary>, GatewayError> {
        let url = self.endpoint("v1/facilities")?;
        let response = self
            .http
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(GatewayError::from_transport)?;
        Self::read_json(response).await
    }

    async fn fetch_zones(
        &self,
        bearer: &str,
        facility_id: i64,
    ) -> Result<Vec<ZoneSummary>, GatewayError> {
        let url = self.endpoint(&format!("v1/facilities/{}/zones", facility_id))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(GatewayError::from_transport)?;
        Self::read_json(response).await
    }

    async fn fetch_checklist(
        &self,
        bearer: &str,
        facility_id: i64,
        zone_id: Option<i64>,
    ) -> Result<Vec<DeviceChecklist>, GatewayError> {
        let mut url = self.endpoint(&format!("v1/facilities/{}/checklist", facility_id))?;
        if let Some(zone_id) = zone_id {
            url.query_pairs_mut()
                .append_pair("zoneId", &zone_id.to_string());
        }
        let response = self
            .http
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(GatewayError::from_transport)?;
        Self::read_json(response).await
    }

    async fn submit_inspection(
        &self,
        bearer: &str,
        request: &SyncRequest,
    ) -> Result<SyncAck, GatewayError> {
        let url = self.endpoint("v1/inspections/sync")?;
        let response = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .json(request)
            .send()
            .await
            .map_err(GatewayError::from_transport)?;
        Self::read_json(response).await
    }
}
