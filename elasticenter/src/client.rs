//! ElastiCenter HTTP API client
//!
//! Every call is a single `GET /client/api?command=<Cmd>&response=json&...&apiKey=<key>`
//! round trip returning a JSON envelope. There are no retries at this layer;
//! async operations are confirmed by the [`crate::job`] poller.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::job::JobStatusSource;
use crate::types::{AddQosGroupResponse, JobRecord, QueryJobResponse};

/// Path of the API endpoint on the controller
pub const API_PATH: &str = "/client/api";

/// Request parameters. Values are always sent as text.
pub type Params = BTreeMap<String, String>;

/// Command names understood by the controller.
pub mod commands {
    pub const LIST_ACCOUNT: &str = "listAccount";
    pub const LIST_TSM: &str = "listTsm";
    pub const ADD_QOS_GROUP: &str = "addQosGroup";
    pub const CREATE_VOLUME: &str = "createVolume";
    pub const LIST_FILESYSTEM: &str = "listFileSystem";
    pub const DELETE_FILESYSTEM: &str = "deleteFileSystem";
    pub const LIST_ISCSI_SERVICE: &str = "listVolumeiSCSIService";
    pub const UPDATE_ISCSI_SERVICE: &str = "updateVolumeiSCSIService";
    pub const LIST_ISCSI_INITIATOR: &str = "listiSCSIInitiator";
    pub const QUERY_ASYNC_JOB_RESULT: &str = "queryAsyncJobResult";
}

/// Connection settings for [`ElastiCenterClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bare host (HTTPS implied) or a full base URL
    pub controller_address: String,
    pub api_key: String,
    /// Accept self-signed controller certificates
    pub accept_invalid_certs: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(controller_address: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            controller_address: controller_address.into(),
            api_key: api_key.into(),
            accept_invalid_certs: false,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Client for the ElastiCenter management API.
#[derive(Debug, Clone)]
pub struct ElastiCenterClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

/// Build the API endpoint URL from a configured controller address.
fn endpoint_for(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        format!("{}{}", address, API_PATH)
    } else {
        format!("https://{}{}", address, API_PATH)
    }
}

/// Pull the controller's error text out of an error body.
///
/// Error bodies are a single-key map such as
/// `{"errorresponse": {"errorcode": 431, "errortext": "..."}}`. Anything that
/// does not have that shape is returned verbatim.
pub(crate) fn extract_error_text(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body)
        && let Some(text) = map
            .values()
            .filter_map(|v| v.get("errortext"))
            .filter_map(Value::as_str)
            .last()
    {
        return text.to_string();
    }
    body.trim().to_string()
}

/// Query pairs in wire order: command, response format, parameters, key.
fn query_pairs<'a>(command: &'a str, params: &'a Params, api_key: &'a str) -> Vec<(&'a str, &'a str)> {
    let mut pairs = Vec::with_capacity(params.len() + 3);
    pairs.push(("command", command));
    pairs.push(("response", "json"));
    pairs.extend(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    pairs.push(("apiKey", api_key));
    pairs
}

impl ElastiCenterClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            http,
            endpoint: endpoint_for(&config.controller_address),
            api_key: config.api_key,
        })
    }

    /// The full URL calls are sent to (without query).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// URL of a call with the credential masked, for logs and errors.
    fn display_url(&self, command: &str, params: &Params) -> String {
        Url::parse_with_params(&self.endpoint, query_pairs(command, params, "***"))
            .map(String::from)
            .unwrap_or_else(|_| self.endpoint.clone())
    }

    /// Execute a command and decode the JSON body.
    pub async fn invoke(&self, command: &str, params: &Params) -> Result<Value> {
        let url = self.display_url(command, params);
        debug!(command, url = %url, "Calling ElastiCenter API");

        let response = self
            .http
            .get(&self.endpoint)
            .query(&query_pairs(command, params, &self.api_key))
            .send()
            .await
            .map_err(|source| {
                warn!(command, error = %source, "ElastiCenter API unreachable");
                ApiError::Unavailable {
                    command: command.to_string(),
                    url: url.clone(),
                    source,
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| ApiError::Unavailable {
                command: command.to_string(),
                url: url.clone(),
                source,
            })?;

        if status != StatusCode::OK {
            let message = extract_error_text(&body);
            warn!(command, status = status.as_u16(), error = %message, "ElastiCenter API returned an error");
            return Err(ApiError::Remote {
                command: command.to_string(),
                url,
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::protocol(command, format!("invalid JSON body: {}", e)))
    }

    /// Execute a command and decode the body into a typed envelope.
    pub async fn invoke_as<T: DeserializeOwned>(&self, command: &str, params: &Params) -> Result<T> {
        let value = self.invoke(command, params).await?;
        serde_json::from_value(value).map_err(|e| ApiError::protocol(command, e.to_string()))
    }

    /// Create a QoS group and return its id.
    pub async fn add_qos_group(&self, params: &Params) -> Result<String> {
        let response: AddQosGroupResponse =
            self.invoke_as(commands::ADD_QOS_GROUP, params).await?;
        Ok(response.body.qosgroup.id)
    }

    /// Submit a volume creation. The response carries the async job handle.
    pub async fn create_volume(&self, params: &Params) -> Result<Value> {
        self.invoke(commands::CREATE_VOLUME, params).await
    }

    /// Submit a volume deletion. The response carries the async job handle.
    pub async fn delete_volume(&self, volume_id: &str) -> Result<Value> {
        let params = Params::from([("id".to_string(), volume_id.to_string())]);
        self.invoke(commands::DELETE_FILESYSTEM, &params).await
    }

    /// Point an iSCSI service at an initiator group. `None` leaves `igid` off the request.
    pub async fn update_transport_service(
        &self,
        service_id: &str,
        initiator_group_id: Option<&str>,
    ) -> Result<()> {
        let mut params = Params::from([("id".to_string(), service_id.to_string())]);
        if let Some(group) = initiator_group_id {
            params.insert("igid".to_string(), group.to_string());
        }
        self.invoke(commands::UPDATE_ISCSI_SERVICE, &params).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStatusSource for ElastiCenterClient {
    async fn query_job(&self, job_id: &str) -> Result<JobRecord> {
        let params = Params::from([("jobId".to_string(), job_id.to_string())]);
        let response: QueryJobResponse = self
            .invoke_as(commands::QUERY_ASYNC_JOB_RESULT, &params)
            .await?;
        Ok(response.body)
    }
}
